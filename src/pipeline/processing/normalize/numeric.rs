use crate::config::{MarketValueUnit, NormalizationConfig, PercentFormat};
use crate::constants::{CURRENCY_MARKERS, LACS_PER_CRORE, NULL_SENTINELS, RUPEES_PER_LAC};
use crate::domain::{CellValue, ReviewFlag};

/// Result of null-safe numeric parsing of one cell
#[derive(Debug, Clone, PartialEq)]
pub enum Numeric {
    Null,
    Value(f64),
    /// Non-empty text that is not a number; carries the raw text
    Unparseable(String),
}

impl Numeric {
    pub fn value(&self) -> Option<f64> {
        match self {
            Numeric::Value(v) => Some(*v),
            _ => None,
        }
    }
}

/// Parse a numeric cell: currency markers, `%`, thousands separators and
/// whitespace are stripped, `(x)` reads as `-x`, sentinels read as null.
pub fn parse_numeric(cell: &CellValue) -> Numeric {
    match cell {
        CellValue::Empty => Numeric::Null,
        CellValue::Number(n) if n.is_finite() => Numeric::Value(*n),
        CellValue::Number(n) => Numeric::Unparseable(n.to_string()),
        CellValue::Date { date } => Numeric::Unparseable(date.to_string()),
        CellValue::Text(raw) => parse_numeric_text(raw),
    }
}

fn parse_numeric_text(raw: &str) -> Numeric {
    let upper = raw.trim().to_uppercase();
    if NULL_SENTINELS.contains(&upper.as_str()) {
        return Numeric::Null;
    }

    let mut cleaned = upper;
    for marker in CURRENCY_MARKERS {
        cleaned = cleaned.replace(marker, "");
    }
    let mut cleaned: String = cleaned
        .chars()
        .filter(|c| *c != '%' && *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return Numeric::Null;
    }

    let negative = cleaned.starts_with('(') && cleaned.ends_with(')');
    if negative {
        cleaned = cleaned[1..cleaned.len() - 1].to_string();
    }

    match cleaned.parse::<f64>() {
        Ok(v) if v.is_finite() => Numeric::Value(if negative { -v } else { v }),
        _ => Numeric::Unparseable(raw.trim().to_string()),
    }
}

/// Multiplier taking the source's market value onto Rs. Lacs.
///
/// `auto` looks at the matched market-value header first, then at every header.
pub fn unit_multiplier<S: AsRef<str>>(unit: MarketValueUnit, market_value_header: &str, headers: &[S]) -> f64 {
    let resolved = match unit {
        MarketValueUnit::Auto => detect_unit(market_value_header)
            .or_else(|| headers.iter().find_map(|h| detect_unit(h.as_ref())))
            .unwrap_or(MarketValueUnit::Rupees),
        other => other,
    };
    match resolved {
        MarketValueUnit::Crores => LACS_PER_CRORE,
        MarketValueUnit::Rupees => 1.0 / RUPEES_PER_LAC,
        MarketValueUnit::Lacs | MarketValueUnit::Auto => 1.0,
    }
}

fn detect_unit(header: &str) -> Option<MarketValueUnit> {
    let lower = header.to_lowercase();
    if lower.contains("crore") {
        Some(MarketValueUnit::Crores)
    } else if lower.contains("lac") || lower.contains("lakh") {
        Some(MarketValueUnit::Lacs)
    } else {
        None
    }
}

/// Coerce a raw `% to NAV` onto a fraction, flagging values near the threshold.
pub fn coerce_percentage(raw: f64, format: PercentFormat, config: &NormalizationConfig) -> (f64, Option<ReviewFlag>) {
    match format {
        PercentFormat::Fraction => (raw, None),
        PercentFormat::Percent => (raw / 100.0, None),
        PercentFormat::Auto => {
            let coerced = if raw > config.percent_threshold { raw / 100.0 } else { raw };
            let [low, high] = config.review_band;
            let flag = (low <= raw && raw <= high).then_some(ReviewFlag::NearPercentThreshold { raw, coerced });
            (coerced, flag)
        }
    }
}
