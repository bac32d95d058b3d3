use chrono::{Days, Months, NaiveDate};
use regex::Regex;

use crate::config::{BucketEdge, PipelineConfig};
use crate::constants::DAYS_PER_YEAR;
use crate::domain::{CellValue, InstrumentType, MaturityBucket};
use crate::error::Result;

const TEXT_DATE_FORMATS: &[&str] = &[
    "%d-%b-%Y", "%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d.%m.%Y", "%d %b %Y", "%d %B %Y", "%b %d, %Y", "%d-%B-%Y",
];

/// Excel serial day 0
fn excel_epoch() -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(1899, 12, 30)
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
    ];
    let upper = name.to_uppercase();
    let abbrev = upper.get(..3)?;
    MONTHS.iter().position(|m| *m == abbrev).map(|i| i as u32 + 1)
}

fn expand_two_digit_year(yy: i32) -> i32 {
    if yy < 50 {
        2000 + yy
    } else {
        1900 + yy
    }
}

/// Parse a free-standing date string in any of the accepted text layouts.
pub fn parse_date_text(text: &str) -> Option<NaiveDate> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    for fmt in TEXT_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }
    // "2028-01-15 00:00:00" and similar timestamp renderings
    trimmed
        .get(..10)
        .and_then(|head| NaiveDate::parse_from_str(head, "%Y-%m-%d").ok())
}

/// Date from an explicit maturity column cell.
pub fn parse_explicit(cell: &CellValue) -> Option<NaiveDate> {
    match cell {
        CellValue::Empty => None,
        CellValue::Date { date } => Some(*date),
        CellValue::Number(serial) => from_excel_serial(*serial),
        CellValue::Text(text) => parse_date_text(text).or_else(|| {
            text.trim()
                .parse::<f64>()
                .ok()
                .and_then(from_excel_serial)
        }),
    }
}

fn from_excel_serial(serial: f64) -> Option<NaiveDate> {
    if !(1.0..2_958_466.0).contains(&serial) {
        return None;
    }
    excel_epoch()?.checked_add_days(Days::new(serial.trunc() as u64))
}

/// One way of reading a maturity date out of an instrument name.
pub trait DateStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn resolve(&self, text: &str, as_of: NaiveDate) -> Option<NaiveDate>;
}

/// `MAT 150128` style DDMMYY tags
struct MatDdmmyy(Regex);

impl DateStrategy for MatDdmmyy {
    fn name(&self) -> &'static str {
        "mat_ddmmyy"
    }

    fn resolve(&self, text: &str, _as_of: NaiveDate) -> Option<NaiveDate> {
        let caps = self.0.captures(text)?;
        let day = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let year = expand_two_digit_year(caps[3].parse().ok()?);
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

/// `Maturity: 15-Jan-2028`, `Mat. 15/01/2028`
struct TaggedDate(Regex);

impl DateStrategy for TaggedDate {
    fn name(&self) -> &'static str {
        "tagged"
    }

    fn resolve(&self, text: &str, _as_of: NaiveDate) -> Option<NaiveDate> {
        let caps = self.0.captures(text)?;
        parse_date_text(&caps[1])
    }
}

/// `(15/01/2028)`
struct ParenthesisedDate(Regex);

impl DateStrategy for ParenthesisedDate {
    fn name(&self) -> &'static str {
        "parenthesised"
    }

    fn resolve(&self, text: &str, _as_of: NaiveDate) -> Option<NaiveDate> {
        let caps = self.0.captures(text)?;
        let day = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

/// `15-JAN-2028` or `15/01/2028` anywhere in the name
struct DayMonthYear {
    named_month: Regex,
    numeric: Regex,
}

impl DateStrategy for DayMonthYear {
    fn name(&self) -> &'static str {
        "day_month_year"
    }

    fn resolve(&self, text: &str, _as_of: NaiveDate) -> Option<NaiveDate> {
        if let Some(caps) = self.named_month.captures(text) {
            let day = caps[1].parse().ok()?;
            let month = month_from_name(&caps[2])?;
            let year = caps[3].parse().ok()?;
            return NaiveDate::from_ymd_opt(year, month, day);
        }
        let caps = self.numeric.captures(text)?;
        NaiveDate::from_ymd_opt(caps[3].parse().ok()?, caps[2].parse().ok()?, caps[1].parse().ok()?)
    }
}

/// `15th Jan 2028`
struct OrdinalDate(Regex);

impl DateStrategy for OrdinalDate {
    fn name(&self) -> &'static str {
        "ordinal"
    }

    fn resolve(&self, text: &str, _as_of: NaiveDate) -> Option<NaiveDate> {
        let caps = self.0.captures(text)?;
        let day = caps[1].parse().ok()?;
        let month = month_from_name(&caps[2])?;
        NaiveDate::from_ymd_opt(caps[3].parse().ok()?, month, day)
    }
}

/// `Jan 2028`, taken as the first of the month
struct MonthYear(Regex);

impl DateStrategy for MonthYear {
    fn name(&self) -> &'static str {
        "month_year"
    }

    fn resolve(&self, text: &str, _as_of: NaiveDate) -> Option<NaiveDate> {
        let caps = self.0.captures(text)?;
        let month = month_from_name(&caps[1])?;
        NaiveDate::from_ymd_opt(caps[2].parse().ok()?, month, 1)
    }
}

/// `5Y`, `10 YEARS`, `364 DTB`, `91 DAYS` relative to the as-of date
struct Tenor {
    years: Regex,
    days: Regex,
}

impl DateStrategy for Tenor {
    fn name(&self) -> &'static str {
        "tenor"
    }

    fn resolve(&self, text: &str, as_of: NaiveDate) -> Option<NaiveDate> {
        if let Some(caps) = self.days.captures(text) {
            let days: u64 = caps[1].parse().ok()?;
            return as_of.checked_add_days(Days::new(days));
        }
        let caps = self.years.captures(text)?;
        let years: u32 = caps[1].parse().ok()?;
        as_of.checked_add_months(Months::new(years * 12))
    }
}

/// Name strategies in the order they are tried
pub fn default_strategies() -> Result<Vec<Box<dyn DateStrategy>>> {
    const MONTH: &str = r"(jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)";
    Ok(vec![
        Box::new(MatDdmmyy(Regex::new(r"(?i)\bMAT\.?\s*(\d{2})(\d{2})(\d{2})\b")?)),
        Box::new(TaggedDate(Regex::new(
            r"(?i)\b(?:maturity|mat\.?)\s*(?:date)?\s*[:\-]?\s*(\d{1,2}[-/.\s][a-z]{3,9}[-/.\s]\d{4}|\d{1,2}[-/.]\d{1,2}[-/.]\d{4}|\d{4}-\d{2}-\d{2})",
        )?)),
        Box::new(ParenthesisedDate(Regex::new(r"\((\d{1,2})[-/.](\d{1,2})[-/.](\d{4})\)")?)),
        Box::new(DayMonthYear {
            named_month: Regex::new(&format!(r"(?i)\b(\d{{1,2}})[-/\s]{MONTH}[-/\s](\d{{4}})\b"))?,
            numeric: Regex::new(r"\b(\d{1,2})/(\d{1,2})/(\d{4})\b")?,
        }),
        Box::new(OrdinalDate(Regex::new(&format!(
            r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)\s+{MONTH},?\s+(\d{{4}})\b"
        ))?)),
        Box::new(MonthYear(Regex::new(&format!(r"(?i)\b{MONTH}[\s\-',]*(\d{{4}})\b"))?)),
        Box::new(Tenor {
            years: Regex::new(r"(?i)\b(\d{1,2})\s*(?:Y|YR|YRS|YEAR|YEARS)\b")?,
            days: Regex::new(r"(?i)\b(\d{1,3})\s*(?:DTB|DAY|DAYS)\b")?,
        }),
    ])
}

/// Outcome of maturity resolution for one holding
#[derive(Debug, Clone, PartialEq)]
pub struct MaturityResolution {
    pub date: Option<NaiveDate>,
    pub bucket: MaturityBucket,
    /// Exclusion pattern that forced `EXCLUDED`
    pub exclusion_match: Option<String>,
    /// Money-market paper placed in the first bucket without a date
    pub assumed_short_tenor: bool,
}

pub struct MaturityResolver {
    buckets: Vec<BucketEdge>,
    terminal_bucket: String,
    matured_bucket: Option<String>,
    exclusions: Vec<Regex>,
    money_market_short_tenor: bool,
    strategies: Vec<Box<dyn DateStrategy>>,
    option_keyword: Regex,
}

impl MaturityResolver {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        let m = &config.maturity;
        let exclusions = m
            .exclusion_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            buckets: m.buckets.clone(),
            terminal_bucket: m.terminal_bucket.clone(),
            matured_bucket: m.matured_bucket.clone(),
            exclusions,
            money_market_short_tenor: m.money_market_short_tenor,
            strategies: default_strategies()?,
            option_keyword: Regex::new(r"(?i)\b(call|put|reset)\b")?,
        })
    }

    /// First exclusion pattern matching the instrument name
    pub fn exclusion_for(&self, instrument_name: &str) -> Option<&str> {
        self.exclusions
            .iter()
            .find(|re| re.is_match(instrument_name))
            .map(|re| re.as_str())
    }

    /// Date read from the name; text after a call/put/reset keyword is ignored.
    pub fn date_from_name(&self, instrument_name: &str, as_of: NaiveDate) -> Option<NaiveDate> {
        let searchable = match self.option_keyword.find(instrument_name) {
            Some(m) => &instrument_name[..m.start()],
            None => instrument_name,
        };
        self.strategies.iter().find_map(|s| s.resolve(searchable, as_of))
    }

    pub fn bucket_for(&self, maturity: NaiveDate, as_of: NaiveDate) -> MaturityBucket {
        let years = (maturity - as_of).num_days() as f64 / DAYS_PER_YEAR;
        let first = self.buckets.first().map(|b| b.name.clone());

        if years < 0.0 {
            return match (&self.matured_bucket, first) {
                (Some(matured), _) => MaturityBucket::Named(matured.clone()),
                (None, Some(first)) => MaturityBucket::Named(first),
                (None, None) => MaturityBucket::Named(self.terminal_bucket.clone()),
            };
        }

        if let Some(edge) = self
            .buckets
            .iter()
            .find(|b| b.min_years <= years && years < b.max_years)
        {
            return MaturityBucket::Named(edge.name.clone());
        }

        match self.buckets.first() {
            Some(edge) if years < edge.min_years => MaturityBucket::Named(edge.name.clone()),
            _ => MaturityBucket::Named(self.terminal_bucket.clone()),
        }
    }

    pub fn resolve(
        &self,
        instrument_name: &str,
        instrument_type: InstrumentType,
        explicit: Option<&CellValue>,
        as_of: NaiveDate,
    ) -> MaturityResolution {
        let date = explicit
            .and_then(parse_explicit)
            .or_else(|| self.date_from_name(instrument_name, as_of));

        if let Some(pattern) = self.exclusion_for(instrument_name) {
            return MaturityResolution {
                date,
                bucket: MaturityBucket::Excluded,
                exclusion_match: Some(pattern.to_string()),
                assumed_short_tenor: false,
            };
        }

        match date {
            Some(d) => MaturityResolution {
                date,
                bucket: self.bucket_for(d, as_of),
                exclusion_match: None,
                assumed_short_tenor: false,
            },
            None => {
                let short = self.money_market_short_tenor && instrument_type.is_money_market();
                let bucket = match (short, self.buckets.first()) {
                    (true, Some(edge)) => MaturityBucket::Named(edge.name.clone()),
                    _ => MaturityBucket::Unknown,
                };
                MaturityResolution {
                    assumed_short_tenor: matches!(bucket, MaturityBucket::Named(_)),
                    date: None,
                    bucket,
                    exclusion_match: None,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;

    fn resolver() -> MaturityResolver {
        MaturityResolver::from_config(&test_config()).unwrap()
    }

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn as_of() -> NaiveDate {
        d(2025, 7, 31)
    }

    #[test]
    fn test_name_date_formats() {
        let r = resolver();
        let cases = [
            ("7.75% HDFC Bank NCD MAT 150128", d(2028, 1, 15)),
            ("8.10% REC Ltd Maturity: 15-Mar-2030", d(2030, 3, 15)),
            ("7.26% GOI (14/01/2029)", d(2029, 1, 14)),
            ("7.44% NABARD 15-JAN-2028", d(2028, 1, 15)),
            ("7.44% NABARD 15/01/2028", d(2028, 1, 15)),
            ("Bajaj Finance 15th Jan 2028", d(2028, 1, 15)),
            ("7.18% GS Aug 2033", d(2033, 8, 1)),
            ("SIDBI 3Y NCD", d(2028, 7, 31)),
            ("364 DTB", d(2026, 7, 30)),
        ];
        for (name, expected) in cases {
            assert_eq!(r.date_from_name(name, as_of()), Some(expected), "{name}");
        }
    }

    #[test]
    fn test_call_date_is_never_maturity() {
        let r = resolver();
        assert_eq!(r.date_from_name("8.5% SBI Bond CALL 15-JAN-2028", as_of()), None);
        assert_eq!(
            r.date_from_name("8.5% PFC 15-MAR-2032 PUT 15-MAR-2027", as_of()),
            Some(d(2032, 3, 15))
        );
    }

    #[test]
    fn test_explicit_column_takes_priority() {
        let r = resolver();
        let cell = CellValue::text("01-Apr-2027");
        let res = r.resolve("7.44% NABARD 15-JAN-2034", InstrumentType::CorporateBond, Some(&cell), as_of());
        assert_eq!(res.date, Some(d(2027, 4, 1)));
        assert_eq!(res.bucket, MaturityBucket::Named("1-3".to_string()));
    }

    #[test]
    fn test_explicit_excel_serial() {
        // 46023 = 2026-01-01
        assert_eq!(parse_explicit(&CellValue::Number(46023.0)), Some(d(2026, 1, 1)));
        assert_eq!(parse_explicit(&CellValue::text("2026-01-01 00:00:00")), Some(d(2026, 1, 1)));
        assert_eq!(parse_explicit(&CellValue::Empty), None);
    }

    #[test]
    fn test_exclusion_wins_over_resolved_date() {
        let r = resolver();
        let cell = CellValue::from(d(2030, 1, 1));
        let res = r.resolve("8.99% SBI AT1 Basel III Perp", InstrumentType::At1Tier2, Some(&cell), as_of());
        assert_eq!(res.bucket, MaturityBucket::Excluded);
        assert!(res.exclusion_match.is_some());

        let tier2 = r.resolve("7.9% Canara Bank Tier II Bond", InstrumentType::At1Tier2, None, as_of());
        assert_eq!(tier2.bucket, MaturityBucket::Excluded);
    }

    #[test]
    fn test_bucket_edges_are_half_open() {
        let r = resolver();
        // exactly 3 years of 365.25 days lands in 3-5, not 1-3
        let three_years = as_of() + chrono::Duration::days(1096);
        assert_eq!(r.bucket_for(three_years, as_of()).label(), "3-5");
        let just_under = as_of() + chrono::Duration::days(1095);
        assert_eq!(r.bucket_for(just_under, as_of()).label(), "1-3");
        assert_eq!(r.bucket_for(d(2045, 1, 1), as_of()).label(), ">10");
    }

    #[test]
    fn test_matured_paper_is_bucketed_not_rejected() {
        let r = resolver();
        assert_eq!(r.bucket_for(d(2025, 1, 1), as_of()).label(), "<1");

        let mut config = test_config();
        config.maturity.matured_bucket = Some("MATURED".to_string());
        let r = MaturityResolver::from_config(&config).unwrap();
        assert_eq!(r.bucket_for(d(2025, 1, 1), as_of()).label(), "MATURED");
    }

    #[test]
    fn test_unknown_and_money_market_fallback() {
        let r = resolver();
        let bond = r.resolve("HDFC Bank NCD", InstrumentType::CorporateBond, None, as_of());
        assert_eq!(bond.bucket, MaturityBucket::Unknown);
        assert!(!bond.assumed_short_tenor);

        let treps = r.resolve("TREPS", InstrumentType::Overnight, None, as_of());
        assert_eq!(treps.bucket.label(), "<1");
        assert!(treps.assumed_short_tenor);
    }
}
