use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, TimeDelta};
use regex::Regex;

use crate::config::{OutlierConfig, OutlierMethod, QualityConfig};
use crate::constants::DAYS_PER_YEAR;
use crate::domain::{
    CanonicalField, ConsolidatedDataset, Holding, MaturityBucket, RowId, SourceStatus, StandardizedRating,
};
use crate::error::{PipelineError, Result};

use super::{Finding, GateName, GateStatus, QualityGateResult, Scoring};

/// One independent validation over the whole dataset
pub trait Gate: Send + Sync {
    fn name(&self) -> GateName;
    fn evaluate(&self, dataset: &ConsolidatedDataset) -> QualityGateResult;
}

pub fn default_gates(config: &QualityConfig) -> Result<Vec<Box<dyn Gate>>> {
    let coverage_thresholds = config
        .coverage_thresholds
        .iter()
        .map(|(field, threshold)| {
            field
                .parse::<CanonicalField>()
                .map(|f| (f, *threshold))
                .map_err(PipelineError::Config)
        })
        .collect::<Result<BTreeMap<_, _>>>()?;

    Ok(vec![
        Box::new(DateIntegrityGate {
            far_maturity_years: config.far_maturity_years,
        }),
        Box::new(NavSanityGate {
            ceiling: config.nav_ceiling,
            total_band: config.nav_total_band,
        }),
        Box::new(IsinFormatGate {
            structure: Regex::new(r"^[A-Z]{2}[A-Z0-9]{9}[0-9]$")?,
        }),
        Box::new(TypeCastingGate),
        Box::new(OutlierGate {
            config: config.outliers.clone(),
        }),
        Box::new(CoverageGate {
            thresholds: coverage_thresholds,
            min_rating_standardization: config.min_rating_standardization,
            min_graded_coverage: config.min_graded_rating_coverage,
        }),
        Box::new(BusinessLogicGate),
        Box::new(CrossFundGate),
    ])
}

fn row_level(dataset: &ConsolidatedDataset) -> Scoring {
    Scoring::RowLevel {
        total_rows: dataset.len(),
    }
}

/// Luhn check over the ISIN with letters expanded to two-digit numbers (A=10 .. Z=35).
pub fn isin_checksum_valid(isin: &str) -> bool {
    if isin.len() < 2 || !isin.is_ascii() {
        return false;
    }
    let (body, check) = isin.split_at(isin.len() - 1);
    let Some(check) = check.chars().next().and_then(|c| c.to_digit(10)) else {
        return false;
    };

    let mut digits = Vec::with_capacity(body.len() * 2);
    for c in body.chars() {
        match c.to_digit(36) {
            Some(v) if v >= 10 => {
                digits.push(v / 10);
                digits.push(v % 10);
            }
            Some(v) => digits.push(v),
            None => return false,
        }
    }

    // The check digit sits to the right, so doubling starts at the rightmost body digit
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, d)| {
            if i % 2 == 0 {
                let doubled = d * 2;
                doubled / 10 + doubled % 10
            } else {
                *d
            }
        })
        .sum();

    (10 - sum % 10) % 10 == check
}

pub struct DateIntegrityGate {
    far_maturity_years: f64,
}

impl Gate for DateIntegrityGate {
    fn name(&self) -> GateName {
        GateName::DateIntegrity
    }

    fn evaluate(&self, dataset: &ConsolidatedDataset) -> QualityGateResult {
        let as_of = dataset.as_of_date;
        let far_limit = TimeDelta::try_days((self.far_maturity_years * DAYS_PER_YEAR) as i64)
            .and_then(|span| as_of.checked_add_signed(span))
            .unwrap_or(NaiveDate::MAX);
        let mut findings = Vec::new();

        for h in &dataset.holdings {
            match h.as_of_date {
                None => findings.push(Finding::new(
                    format!("{}:as_of_date", h.row_id),
                    "as-of date missing or unparseable",
                    GateStatus::Fail,
                )
                .with_rows([h.row_id.clone()])),
                Some(date) if date != as_of => findings.push(
                    Finding::new(
                        format!("{}:as_of_date", h.row_id),
                        format!("as-of date {} diverges from run date {}", date, as_of),
                        GateStatus::Fail,
                    )
                    .with_rows([h.row_id.clone()]),
                ),
                Some(_) => {}
            }

            if let Some(maturity) = h.maturity_date {
                if maturity < as_of {
                    findings.push(
                        Finding::new(
                            format!("{}:maturity_date", h.row_id),
                            format!("maturity date {} is before the as-of date", maturity),
                            GateStatus::Warn,
                        )
                        .with_rows([h.row_id.clone()]),
                    );
                } else if maturity > far_limit {
                    findings.push(
                        Finding::new(
                            format!("{}:maturity_date", h.row_id),
                            format!(
                                "maturity date {} is more than {} years out",
                                maturity, self.far_maturity_years
                            ),
                            GateStatus::Warn,
                        )
                        .with_rows([h.row_id.clone()]),
                    );
                }
            }
        }

        QualityGateResult::from_findings(self.name(), Scoring::DatasetLevel, findings)
    }
}

pub struct NavSanityGate {
    ceiling: f64,
    total_band: [f64; 2],
}

impl Gate for NavSanityGate {
    fn name(&self) -> GateName {
        GateName::NavSanity
    }

    fn evaluate(&self, dataset: &ConsolidatedDataset) -> QualityGateResult {
        let mut findings: Vec<Finding> = dataset
            .holdings
            .iter()
            .filter(|h| !(0.0..=self.ceiling).contains(&h.pct_to_nav))
            .map(|h| {
                Finding::for_row(
                    &h.row_id,
                    format!("% to NAV {:.4} outside [0, {}]", h.pct_to_nav, self.ceiling),
                    GateStatus::Warn,
                )
            })
            .collect();

        let [low, high] = self.total_band;
        for fund in dataset.funds() {
            let total: f64 = dataset.holdings_for_fund(fund).map(|h| h.pct_to_nav).sum();
            if total < low || total > high {
                findings.push(Finding::new(
                    format!("fund:{}", fund),
                    format!("% to NAV totals {:.4}, expected within [{}, {}]", total, low, high),
                    GateStatus::Warn,
                ));
            }
        }

        QualityGateResult::from_findings(self.name(), row_level(dataset), findings)
    }
}

pub struct IsinFormatGate {
    structure: Regex,
}

impl Gate for IsinFormatGate {
    fn name(&self) -> GateName {
        GateName::IsinFormat
    }

    fn evaluate(&self, dataset: &ConsolidatedDataset) -> QualityGateResult {
        let findings = dataset
            .holdings
            .iter()
            .filter_map(|h| {
                let isin = h.isin.as_deref()?;
                let problem = if !self.structure.is_match(isin) {
                    format!("ISIN '{}' is malformed ({} characters)", isin, isin.chars().count())
                } else if !isin_checksum_valid(isin) {
                    format!("ISIN '{}' fails its check digit", isin)
                } else {
                    return None;
                };
                Some(Finding::for_row(&h.row_id, problem, GateStatus::Fail))
            })
            .collect();

        QualityGateResult::from_findings(self.name(), row_level(dataset), findings)
    }
}

pub struct TypeCastingGate;

impl Gate for TypeCastingGate {
    fn name(&self) -> GateName {
        GateName::TypeCasting
    }

    fn evaluate(&self, dataset: &ConsolidatedDataset) -> QualityGateResult {
        let findings = dataset
            .holdings
            .iter()
            .filter(|h| !h.unparsed_fields.is_empty())
            .map(|h| {
                let fields: Vec<String> = h
                    .unparsed_fields
                    .iter()
                    .map(|u| format!("{}='{}'", u.field, u.raw))
                    .collect();
                Finding::for_row(
                    &h.row_id,
                    format!("non-numeric value left after normalization: {}", fields.join(", ")),
                    GateStatus::Fail,
                )
            })
            .collect();

        QualityGateResult::from_findings(self.name(), row_level(dataset), findings)
    }
}

pub struct OutlierGate {
    config: OutlierConfig,
}

/// Linear-interpolated percentile of an ascending slice
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

impl OutlierGate {
    /// Rows whose value falls outside the fund's own distribution
    fn outliers<'h>(&self, values: &[(&'h Holding, f64)]) -> Vec<(&'h Holding, f64)> {
        if values.len() < self.config.min_sample.max(2) {
            return Vec::new();
        }
        let xs: Vec<f64> = values.iter().map(|(_, v)| *v).collect();

        let (low, high) = match self.config.method {
            OutlierMethod::StdDev => {
                let n = xs.len() as f64;
                let mean = xs.iter().sum::<f64>() / n;
                let std = (xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt();
                if std == 0.0 {
                    return Vec::new();
                }
                (mean - self.config.std_devs * std, mean + self.config.std_devs * std)
            }
            OutlierMethod::Percentile => {
                let mut sorted = xs.clone();
                sorted.sort_by(|a, b| a.total_cmp(b));
                let [p_low, p_high] = self.config.percentile_band;
                (percentile(&sorted, p_low), percentile(&sorted, p_high))
            }
        };

        values
            .iter()
            .filter(|(_, v)| *v < low || *v > high)
            .copied()
            .collect()
    }
}

impl Gate for OutlierGate {
    fn name(&self) -> GateName {
        GateName::OutlierDetection
    }

    fn evaluate(&self, dataset: &ConsolidatedDataset) -> QualityGateResult {
        let mut findings = Vec::new();
        let [min_yield, max_yield] = self.config.yield_bounds;

        for fund in dataset.funds() {
            let holdings: Vec<&Holding> = dataset.holdings_for_fund(fund).collect();

            let yields: Vec<(&Holding, f64)> = holdings
                .iter()
                .filter_map(|h| h.yield_pct.map(|y| (*h, y)))
                .collect();
            for (h, y) in &yields {
                if *y < min_yield || *y > max_yield {
                    findings.push(
                        Finding::new(
                            format!("{}:yield_bounds", h.row_id),
                            format!("yield {} outside [{}, {}]", y, min_yield, max_yield),
                            GateStatus::Warn,
                        )
                        .with_rows([h.row_id.clone()]),
                    );
                }
            }
            for (h, y) in self.outliers(&yields) {
                findings.push(
                    Finding::new(
                        format!("{}:yield", h.row_id),
                        format!("yield {} is an outlier within {}", y, fund),
                        GateStatus::Warn,
                    )
                    .with_rows([h.row_id.clone()]),
                );
            }

            let values: Vec<(&Holding, f64)> = holdings.iter().map(|h| (*h, h.market_value_lacs)).collect();
            for (h, mv) in self.outliers(&values) {
                findings.push(
                    Finding::new(
                        format!("{}:market_value", h.row_id),
                        format!("market value {:.2} lacs is an outlier within {}", mv, fund),
                        GateStatus::Warn,
                    )
                    .with_rows([h.row_id.clone()]),
                );
            }
        }

        QualityGateResult::from_findings(self.name(), row_level(dataset), findings)
    }
}

pub struct CoverageGate {
    thresholds: BTreeMap<CanonicalField, f64>,
    /// Minimum share of raw ratings that land on a known grade
    min_rating_standardization: f64,
    /// Minimum share of rows carrying a graded rating
    min_graded_coverage: f64,
}

/// Whether a holding carries a non-null value for a canonical field
fn has_value(h: &Holding, field: CanonicalField) -> bool {
    match field {
        CanonicalField::Isin => h.isin.is_some(),
        CanonicalField::Yield => h.yield_pct.is_some(),
        CanonicalField::Rating => !h.raw_rating.trim().is_empty(),
        CanonicalField::Quantity => h.quantity.is_some(),
        CanonicalField::MaturityDate => h.maturity_date.is_some(),
        CanonicalField::AsOfDate => h.as_of_date.is_some(),
        CanonicalField::Coupon => h.coupon_pct.is_some(),
        CanonicalField::FundName
        | CanonicalField::InstrumentName
        | CanonicalField::MarketValue
        | CanonicalField::PctToNav => true,
    }
}

impl Gate for CoverageGate {
    fn name(&self) -> GateName {
        GateName::CoverageAnalysis
    }

    fn evaluate(&self, dataset: &ConsolidatedDataset) -> QualityGateResult {
        let mut findings = Vec::new();

        for fund in dataset.funds() {
            let holdings: Vec<&Holding> = dataset.holdings_for_fund(fund).collect();
            for (field, threshold) in &self.thresholds {
                let missing: Vec<RowId> = holdings
                    .iter()
                    .filter(|h| !has_value(h, *field))
                    .map(|h| h.row_id.clone())
                    .collect();
                let coverage = 1.0 - missing.len() as f64 / holdings.len() as f64;
                if coverage < *threshold {
                    findings.push(
                        Finding::new(
                            format!("{}:{}", fund, field),
                            format!(
                                "{} coverage {:.1}% below minimum {:.1}%",
                                field,
                                coverage * 100.0,
                                threshold * 100.0
                            ),
                            GateStatus::Warn,
                        )
                        .with_rows(missing),
                    );
                }
            }
            findings.extend(self.rating_findings(fund, &holdings));
        }

        let total = dataset.len();
        for source in &dataset.sources {
            let share = if total == 0 {
                0.0
            } else {
                source.holdings_produced as f64 / total as f64 * 100.0
            };
            let description = match &source.status {
                SourceStatus::Failed { reason } => format!("0.0% of rows (source failed: {})", reason),
                SourceStatus::Extracted => {
                    format!("{:.1}% of rows ({} holdings)", share, source.holdings_produced)
                }
            };
            let severity = if source.holdings_produced == 0 {
                GateStatus::Warn
            } else {
                GateStatus::Pass
            };
            findings.push(Finding::new(format!("source:{}", source.source_id), description, severity));
        }

        QualityGateResult::from_findings(self.name(), row_level(dataset), findings)
    }
}

impl CoverageGate {
    /// How well raw ratings were standardized for one fund
    fn rating_findings(&self, fund: &str, holdings: &[&Holding]) -> Vec<Finding> {
        let mut findings = Vec::new();

        let rated: Vec<&&Holding> = holdings
            .iter()
            .filter(|h| h.is_sovereign || !h.raw_rating.trim().is_empty())
            .collect();
        let unmapped: Vec<RowId> = rated
            .iter()
            .filter(|h| h.standardized_rating == StandardizedRating::Other)
            .map(|h| h.row_id.clone())
            .collect();
        if !rated.is_empty() {
            let rate = 1.0 - unmapped.len() as f64 / rated.len() as f64;
            if rate < self.min_rating_standardization {
                findings.push(
                    Finding::new(
                        format!("{}:rating_standardization", fund),
                        format!(
                            "{:.1}% of raw ratings standardized, below minimum {:.1}%",
                            rate * 100.0,
                            self.min_rating_standardization * 100.0
                        ),
                        GateStatus::Warn,
                    )
                    .with_rows(unmapped),
                );
            }
        }

        let ungraded: Vec<RowId> = holdings
            .iter()
            .filter(|h| !h.standardized_rating.is_graded())
            .map(|h| h.row_id.clone())
            .collect();
        let graded = 1.0 - ungraded.len() as f64 / holdings.len() as f64;
        if graded < self.min_graded_coverage {
            findings.push(
                Finding::new(
                    format!("{}:standardized_rating", fund),
                    format!(
                        "graded rating coverage {:.1}% below minimum {:.1}%",
                        graded * 100.0,
                        self.min_graded_coverage * 100.0
                    ),
                    GateStatus::Warn,
                )
                .with_rows(ungraded),
            );
        }

        findings
    }
}

pub struct BusinessLogicGate;

impl Gate for BusinessLogicGate {
    fn name(&self) -> GateName {
        GateName::BusinessLogic
    }

    fn evaluate(&self, dataset: &ConsolidatedDataset) -> QualityGateResult {
        let mut findings = Vec::new();

        for h in &dataset.holdings {
            if h.is_sovereign && h.standardized_rating != StandardizedRating::Sovereign {
                findings.push(
                    Finding::new(
                        format!("{}:sovereign_rating", h.row_id),
                        format!("sovereign instrument rated {}", h.standardized_rating),
                        GateStatus::Fail,
                    )
                    .with_rows([h.row_id.clone()]),
                );
            }

            let excluded = h.maturity_bucket == MaturityBucket::Excluded;
            match (excluded, &h.exclusion_match) {
                (true, None) => findings.push(
                    Finding::new(
                        format!("{}:exclusion", h.row_id),
                        "bucket EXCLUDED without a matching exclusion pattern",
                        GateStatus::Fail,
                    )
                    .with_rows([h.row_id.clone()]),
                ),
                (false, Some(pattern)) => findings.push(
                    Finding::new(
                        format!("{}:exclusion", h.row_id),
                        format!("matched exclusion pattern '{}' but bucketed {}", pattern, h.maturity_bucket),
                        GateStatus::Fail,
                    )
                    .with_rows([h.row_id.clone()]),
                ),
                _ => {}
            }
        }

        for dup in &dataset.duplicates {
            let rows: Vec<String> = dup.rows.iter().map(|r| r.to_string()).collect();
            findings.push(
                Finding::new(
                    format!("duplicate:{}:{}", dup.source_id, dup.isin),
                    format!("{} holds {} more than once in one source ({})", dup.fund_name, dup.isin, rows.join(", ")),
                    GateStatus::Fail,
                )
                .with_rows(dup.rows.iter().cloned()),
            );
        }

        QualityGateResult::from_findings(self.name(), row_level(dataset), findings)
    }
}

pub struct CrossFundGate;

impl Gate for CrossFundGate {
    fn name(&self) -> GateName {
        GateName::CrossFundValidation
    }

    fn evaluate(&self, dataset: &ConsolidatedDataset) -> QualityGateResult {
        let mut findings = Vec::new();

        for isin in dataset.shared_isins.keys() {
            let holdings: Vec<&Holding> = dataset
                .holdings
                .iter()
                .filter(|h| h.isin.as_deref() == Some(isin.as_str()))
                .collect();
            let rows = || holdings.iter().map(|h| h.row_id.clone());

            let ratings: BTreeSet<StandardizedRating> = holdings
                .iter()
                .map(|h| h.standardized_rating)
                .filter(StandardizedRating::is_graded)
                .collect();
            if ratings.len() > 1 {
                let listed: Vec<&str> = ratings.iter().map(|r| r.as_str()).collect();
                findings.push(
                    Finding::new(
                        format!("{}:rating", isin),
                        format!("rated differently across funds: {}", listed.join(", ")),
                        GateStatus::Warn,
                    )
                    .with_rows(rows()),
                );
            }

            let maturities: BTreeSet<_> = holdings.iter().filter_map(|h| h.maturity_date).collect();
            if maturities.len() > 1 {
                let listed: Vec<String> = maturities.iter().map(|d| d.to_string()).collect();
                findings.push(
                    Finding::new(
                        format!("{}:maturity_date", isin),
                        format!("maturity differs across funds: {}", listed.join(", ")),
                        GateStatus::Warn,
                    )
                    .with_rows(rows()),
                );
            }
        }

        QualityGateResult::from_findings(self.name(), row_level(dataset), findings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{SourceReport, UnparsedValue};
    use crate::pipeline::processing::consolidate::tests::{extraction, holding};
    use crate::pipeline::processing::consolidate::Consolidator;

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 31).unwrap()
    }

    fn dataset(holdings: Vec<Holding>) -> ConsolidatedDataset {
        Consolidator::consolidate(as_of(), vec![extraction("a", holdings)])
    }

    fn gate(name: GateName) -> Box<dyn Gate> {
        default_gates(&QualityConfig::default())
            .unwrap()
            .into_iter()
            .find(|g| g.name() == name)
            .unwrap()
    }

    #[test]
    fn test_isin_checksum() {
        for valid in ["US0378331005", "INE040A08146", "IN0020230085", "INE261F08EK5"] {
            assert!(isin_checksum_valid(valid), "{valid}");
        }
        assert!(!isin_checksum_valid("INE040A08147"));
        assert!(!isin_checksum_valid(""));
    }

    #[test]
    fn test_isin_gate_flags_only_bad_rows() {
        let rows = vec![
            holding("a", 2, "F", "INE040A08146", 100.0),
            holding("a", 3, "F", "INE040A0814", 100.0),
            holding("a", 4, "F", "INE040A08147", 100.0),
        ];
        let result = gate(GateName::IsinFormat).evaluate(&dataset(rows));
        assert_eq!(result.status, GateStatus::Fail);
        assert_eq!(result.details.len(), 2);
        assert!(result.details["a#3"].contains("11 characters"));
        assert!(result.details["a#4"].contains("check digit"));
        assert!((result.score - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_date_integrity_fails_on_divergent_dates() {
        let mut h = holding("a", 2, "F", "INE040A08146", 100.0);
        h.as_of_date = NaiveDate::from_ymd_opt(2025, 6, 30);
        let result = gate(GateName::DateIntegrity).evaluate(&dataset(vec![h]));
        assert_eq!(result.status, GateStatus::Fail);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_date_integrity_warns_on_matured_paper() {
        let mut h = holding("a", 2, "F", "INE040A08146", 100.0);
        h.maturity_date = NaiveDate::from_ymd_opt(2024, 1, 1);
        let result = gate(GateName::DateIntegrity).evaluate(&dataset(vec![h]));
        assert_eq!(result.status, GateStatus::Warn);
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn test_date_integrity_survives_huge_horizon() {
        let config = QualityConfig {
            far_maturity_years: 1e9,
            ..QualityConfig::default()
        };
        let gate = default_gates(&config)
            .unwrap()
            .into_iter()
            .find(|g| g.name() == GateName::DateIntegrity)
            .unwrap();
        let mut h = holding("a", 2, "F", "INE040A08146", 100.0);
        h.maturity_date = NaiveDate::from_ymd_opt(2090, 1, 1);
        let result = gate.evaluate(&dataset(vec![h]));
        assert_eq!(result.status, GateStatus::Pass);
    }

    #[test]
    fn test_nav_sanity_row_and_fund_total() {
        let mut big = holding("a", 2, "F", "INE040A08146", 100.0);
        big.pct_to_nav = 1.7;
        let result = gate(GateName::NavSanity).evaluate(&dataset(vec![big]));
        assert_eq!(result.status, GateStatus::Warn);
        assert!(result.details.contains_key("a#2"));
        assert!(result.details.contains_key("fund:F"));
        assert_eq!(result.affected_rows.len(), 1);
    }

    #[test]
    fn test_type_casting_fails_on_residual_text() {
        let mut h = holding("a", 2, "F", "INE040A08146", 100.0);
        h.unparsed_fields.push(UnparsedValue {
            field: CanonicalField::Yield,
            raw: "7.1 approx".to_string(),
        });
        let result = gate(GateName::TypeCasting).evaluate(&dataset(vec![h]));
        assert_eq!(result.status, GateStatus::Fail);
        assert!(result.details["a#2"].contains("yield='7.1 approx'"));
    }

    #[test]
    fn test_outliers_by_std_dev_and_bounds() {
        let isins = [
            "INE040A08146", "INE002A08534", "INE261F08EK5", "INE062A08264", "INE134E08115", "INE020B08443",
            "INE090A08224", "INE752E07645", "INE115A07452", "INE001A07306", "INE095A08025", "INE296A07831",
        ];
        let mut rows: Vec<Holding> = isins
            .iter()
            .enumerate()
            .map(|(i, isin)| holding("a", i + 2, "F", isin, 100.0))
            .collect();
        rows[11].market_value_lacs = 50_000.0;
        rows[5].yield_pct = Some(25.0);

        let result = gate(GateName::OutlierDetection).evaluate(&dataset(rows));
        assert_eq!(result.status, GateStatus::Warn);
        assert!(result.details.contains_key("a#13:market_value"));
        assert!(result.details.contains_key("a#7:yield_bounds"));
        assert!(result.details.contains_key("a#7:yield"));
    }

    #[test]
    fn test_outliers_skip_small_samples() {
        let mut rows = vec![
            holding("a", 2, "F", "INE040A08146", 100.0),
            holding("a", 3, "F", "INE002A08534", 90_000.0),
        ];
        rows[0].yield_pct = Some(7.0);
        let result = gate(GateName::OutlierDetection).evaluate(&dataset(rows));
        assert_eq!(result.status, GateStatus::Pass);
    }

    #[test]
    fn test_percentile_method() {
        let config = OutlierConfig {
            method: OutlierMethod::Percentile,
            percentile_band: [10.0, 90.0],
            ..OutlierConfig::default()
        };
        let gate = OutlierGate { config };
        let rows: Vec<Holding> = (0..10)
            .map(|i| holding("a", i + 2, "F", "INE040A08146", 100.0 + i as f64))
            .collect();
        let refs: Vec<(&Holding, f64)> = rows.iter().map(|h| (h, h.market_value_lacs)).collect();
        let flagged: Vec<f64> = gate.outliers(&refs).into_iter().map(|(_, v)| v).collect();
        assert_eq!(flagged, vec![100.0, 109.0]);
    }

    #[test]
    fn test_coverage_warns_per_fund_field() {
        let mut h = holding("a", 2, "F", "INE040A08146", 100.0);
        h.yield_pct = None;
        let result = gate(GateName::CoverageAnalysis).evaluate(&dataset(vec![h]));
        assert_eq!(result.status, GateStatus::Warn);
        assert!(result.details["F:yield"].contains("0.0%"));
        assert!(result.details["source:a"].starts_with("100.0%"));
    }

    #[test]
    fn test_coverage_warns_when_ratings_do_not_standardize() {
        let rows: Vec<Holding> = [("INE040A08146", 2), ("INE002A08534", 3), ("INE020B08443", 4)]
            .into_iter()
            .map(|(isin, row)| {
                let mut h = holding("a", row, "F", isin, 100.0);
                h.raw_rating = "PROVISIONAL XYZ".to_string();
                h.standardized_rating = StandardizedRating::Other;
                h
            })
            .collect();

        let result = gate(GateName::CoverageAnalysis).evaluate(&dataset(rows));
        assert_eq!(result.status, GateStatus::Warn);
        assert!(result.details["F:rating_standardization"].starts_with("0.0%"));
        assert!(result.details["F:standardized_rating"].contains("0.0%"));
        assert!(!result.details.contains_key("F:rating"));
        assert_eq!(result.affected_rows.len(), 3);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_unrated_rows_count_as_standardized() {
        let mut nr = holding("a", 3, "F", "INE002A08534", 100.0);
        nr.raw_rating = "NR".to_string();
        nr.standardized_rating = StandardizedRating::Unrated;
        let rows = vec![
            holding("a", 2, "F", "INE040A08146", 100.0),
            holding("a", 4, "F", "INE020B08443", 100.0),
            nr,
        ];

        let result = gate(GateName::CoverageAnalysis).evaluate(&dataset(rows));
        assert!(!result.details.contains_key("F:rating_standardization"));
        assert!(!result.details.contains_key("F:standardized_rating"));
    }

    #[test]
    fn test_coverage_reports_failed_source() {
        let mut ds = dataset(vec![holding("a", 2, "F", "INE040A08146", 100.0)]);
        ds.sources.push(SourceReport::failed("b", "B", "Fund B", "no header matching isin"));
        let result = gate(GateName::CoverageAnalysis).evaluate(&ds);
        assert_eq!(result.status, GateStatus::Warn);
        assert!(result.details["source:b"].starts_with("0.0%"));
        assert!(result.affected_rows.is_empty());
    }

    #[test]
    fn test_business_logic_rules() {
        let mut sov = holding("a", 2, "F", "IN0020230085", 100.0);
        sov.is_sovereign = true;
        let mut excluded = holding("a", 3, "F", "INE062A08264", 100.0);
        excluded.maturity_bucket = MaturityBucket::Excluded;
        let dup_a = holding("a", 4, "F", "INE002A08534", 100.0);
        let dup_b = holding("a", 5, "F", "INE002A08534", 100.0);

        let result = gate(GateName::BusinessLogic).evaluate(&dataset(vec![sov, excluded, dup_a, dup_b]));
        assert_eq!(result.status, GateStatus::Fail);
        assert!(result.details.contains_key("a#2:sovereign_rating"));
        assert!(result.details.contains_key("a#3:exclusion"));
        assert!(result.details.contains_key("duplicate:a:INE002A08534"));
        assert_eq!(result.affected_rows.len(), 4);
    }

    #[test]
    fn test_cross_fund_rating_and_maturity_mismatch() {
        let a = holding("a", 2, "Fund A", "INE040A08146", 100.0);
        let mut b = holding("b", 2, "Fund B", "INE040A08146", 100.0);
        b.standardized_rating = StandardizedRating::Aa;
        b.maturity_date = NaiveDate::from_ymd_opt(2029, 1, 1);
        let ds = Consolidator::consolidate(as_of(), vec![extraction("a", vec![a]), extraction("b", vec![b])]);

        let result = gate(GateName::CrossFundValidation).evaluate(&ds);
        assert_eq!(result.status, GateStatus::Warn);
        assert!(result.details.contains_key("INE040A08146:rating"));
        assert!(result.details.contains_key("INE040A08146:maturity_date"));
        assert_eq!(result.affected_rows.len(), 2);
    }
}
