use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::AggregatesConfig;
use crate::constants::{SCHEMA_VERSION, TOP_HOLDINGS_N};
use crate::domain::{
    AggregateMetric, ConsolidatedDataset, Distribution, DuplicateHolding, Holding, MaturityBucket, MetricBasis, Scope,
};
use crate::error::Result;
use crate::pipeline::processing::normalize::SourceExtraction;

pub const WEIGHTED_AVG_YIELD: &str = "weighted_avg_yield";
pub const WEIGHTED_AVG_RESIDUAL_MATURITY: &str = "weighted_avg_residual_maturity_years";
pub const TOP10_CONCENTRATION: &str = "top10_concentration";
pub const TOP_ISSUER_CONCENTRATION: &str = "top_issuer_concentration";
pub const PCT_TO_NAV_TOTAL: &str = "pct_to_nav_total";

const OTHER_ISSUERS: &str = "OTHER ISSUERS";

/// Aggregate metrics and distributions for every fund and for all funds together
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub as_of_date: NaiveDate,
    pub metrics: Vec<AggregateMetric>,
    pub distributions: Vec<Distribution>,
}

impl AggregateReport {
    pub fn metric(&self, scope: &Scope, name: &str) -> Option<&AggregateMetric> {
        self.metrics.iter().find(|m| &m.scope == scope && m.name == name)
    }

    pub fn distribution(&self, scope: &Scope, dimension: &str) -> Option<&Distribution> {
        self.distributions
            .iter()
            .find(|d| &d.scope == scope && d.dimension == dimension)
    }
}

/// Weighting for one scope: market value, or row count when no value is known
struct Weights {
    basis: MetricBasis,
    by_row: Vec<f64>,
    total: f64,
}

impl Weights {
    fn for_holdings(holdings: &[&Holding]) -> Self {
        let total_mv: f64 = holdings.iter().map(|h| h.market_value_lacs).sum();
        if total_mv > 0.0 {
            Self {
                basis: MetricBasis::MarketValue(total_mv),
                by_row: holdings.iter().map(|h| h.market_value_lacs).collect(),
                total: total_mv,
            }
        } else {
            Self {
                basis: MetricBasis::RowCount(holdings.len()),
                by_row: vec![1.0; holdings.len()],
                total: holdings.len() as f64,
            }
        }
    }

    fn share(&self, weight: f64) -> f64 {
        if self.total > 0.0 {
            weight / self.total
        } else {
            0.0
        }
    }
}

/// Weighted average over rows with a value, renormalized over those rows only.
///
/// Returns `(value, coverage_fraction)`; value is `None` when nothing contributed.
pub fn weighted_average<F>(holdings: &[&Holding], weights: &[f64], input: F) -> (Option<f64>, f64)
where
    F: Fn(&Holding) -> Option<f64>,
{
    let total: f64 = weights.iter().sum();
    let mut covered = 0.0;
    let mut weighted_sum = 0.0;
    for (h, w) in holdings.iter().zip(weights) {
        if let Some(v) = input(h) {
            covered += w;
            weighted_sum += v * w;
        }
    }

    let coverage = if total > 0.0 { (covered / total).clamp(0.0, 1.0) } else { 0.0 };
    let value = (covered > 0.0).then(|| weighted_sum / covered);
    (value, coverage)
}

/// Yield category of one holding: `<first%`, `low-high%` or `>=last%`.
pub fn yield_bucket(yield_pct: Option<f64>, config: &AggregatesConfig) -> String {
    let Some(y) = yield_pct.filter(|y| y.is_finite()) else {
        return config.no_yield_label.clone();
    };
    let edges = &config.yield_bucket_edges;
    match edges.iter().position(|edge| y < *edge) {
        Some(0) => format!("<{}%", edges[0]),
        Some(idx) => format!("{}-{}%", edges[idx - 1], edges[idx]),
        None => match edges.last() {
            Some(last) => format!(">={}%", last),
            None => config.no_yield_label.clone(),
        },
    }
}

/// Concatenates per-source holdings and computes dataset-level statistics.
pub struct Consolidator;

impl Consolidator {
    /// Build the dataset. Extractions are expected in configuration order.
    pub fn consolidate(as_of_date: NaiveDate, extractions: Vec<SourceExtraction>) -> ConsolidatedDataset {
        let mut holdings = Vec::new();
        let mut sources = Vec::with_capacity(extractions.len());
        let mut duplicates = Vec::new();

        for extraction in extractions {
            duplicates.extend(Self::within_source_duplicates(&extraction.report.source_id, &extraction.holdings));
            holdings.extend(extraction.holdings);
            sources.push(extraction.report);
        }

        let shared_isins = Self::shared_isins(&holdings);

        ConsolidatedDataset {
            schema_version: SCHEMA_VERSION.to_string(),
            as_of_date,
            holdings,
            sources,
            duplicates,
            shared_isins,
        }
    }

    fn within_source_duplicates(source_id: &str, holdings: &[Holding]) -> Vec<DuplicateHolding> {
        let mut order: Vec<(String, String)> = Vec::new();
        let mut groups: HashMap<(String, String), Vec<_>> = HashMap::new();
        for h in holdings {
            let Some(isin) = &h.isin else { continue };
            let key = (h.fund_name.clone(), isin.clone());
            let rows = groups.entry(key.clone()).or_default();
            if rows.is_empty() {
                order.push(key);
            }
            rows.push(h.row_id.clone());
        }

        order
            .into_iter()
            .filter_map(|key| {
                let rows = groups.remove(&key)?;
                (rows.len() > 1).then(|| DuplicateHolding {
                    source_id: source_id.to_string(),
                    fund_name: key.0,
                    isin: key.1,
                    rows,
                })
            })
            .collect()
    }

    /// ISIN -> funds, for ISINs held by more than one fund. Expected, not an error.
    fn shared_isins(holdings: &[Holding]) -> BTreeMap<String, Vec<String>> {
        let mut funds_by_isin: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for h in holdings {
            if let Some(isin) = &h.isin {
                let funds = funds_by_isin.entry(isin.clone()).or_default();
                if !funds.contains(&h.fund_name) {
                    funds.push(h.fund_name.clone());
                }
            }
        }
        funds_by_isin.retain(|_, funds| funds.len() > 1);
        funds_by_isin
    }

    pub fn aggregates(dataset: &ConsolidatedDataset, config: &AggregatesConfig) -> AggregateReport {
        let mut scopes: Vec<(Scope, Vec<&Holding>)> = dataset
            .funds()
            .into_iter()
            .map(|fund| (Scope::fund(fund), dataset.holdings_for_fund(fund).collect()))
            .collect();
        scopes.push((Scope::AllFunds, dataset.holdings.iter().collect()));

        let mut metrics = Vec::new();
        let mut distributions = Vec::new();
        for (scope, holdings) in &scopes {
            metrics.extend(Self::scope_metrics(scope, holdings, dataset.as_of_date));
            distributions.extend(Self::scope_distributions(scope, holdings, config));
        }

        AggregateReport {
            as_of_date: dataset.as_of_date,
            metrics,
            distributions,
        }
    }

    fn scope_metrics(scope: &Scope, holdings: &[&Holding], as_of: NaiveDate) -> Vec<AggregateMetric> {
        let weights = Weights::for_holdings(holdings);
        let full_coverage = if holdings.is_empty() { 0.0 } else { 1.0 };
        let metric = |name: &str, (value, coverage_fraction): (Option<f64>, f64)| AggregateMetric {
            scope: scope.clone(),
            name: name.to_string(),
            value: if coverage_fraction > 0.0 { value } else { None },
            coverage_fraction,
            basis: weights.basis,
        };

        let yield_avg = weighted_average(holdings, &weights.by_row, |h| h.yield_pct);
        let residual = weighted_average(holdings, &weights.by_row, |h| {
            if h.maturity_bucket == MaturityBucket::Excluded {
                None
            } else {
                h.residual_years(as_of)
            }
        });

        let mut sorted: Vec<f64> = weights.by_row.clone();
        sorted.sort_by(|a, b| b.total_cmp(a));
        let top_n: f64 = sorted.iter().take(TOP_HOLDINGS_N).sum();

        let mut by_issuer: HashMap<&str, f64> = HashMap::new();
        for (h, w) in holdings.iter().zip(&weights.by_row) {
            *by_issuer.entry(h.issuer_name.as_str()).or_default() += w;
        }
        let top_issuer = by_issuer.values().copied().fold(0.0, f64::max);

        let nav_total: f64 = holdings.iter().map(|h| h.pct_to_nav).sum();

        vec![
            metric(WEIGHTED_AVG_YIELD, yield_avg),
            metric(WEIGHTED_AVG_RESIDUAL_MATURITY, residual),
            metric(TOP10_CONCENTRATION, (Some(weights.share(top_n)), full_coverage)),
            metric(TOP_ISSUER_CONCENTRATION, (Some(weights.share(top_issuer)), full_coverage)),
            metric(PCT_TO_NAV_TOTAL, (Some(nav_total), full_coverage)),
        ]
    }

    fn scope_distributions(scope: &Scope, holdings: &[&Holding], config: &AggregatesConfig) -> Vec<Distribution> {
        let weights = Weights::for_holdings(holdings);
        let shares_by = |key: &dyn Fn(&Holding) -> String| {
            let mut shares: BTreeMap<String, f64> = BTreeMap::new();
            for (h, w) in holdings.iter().zip(&weights.by_row) {
                *shares.entry(key(h)).or_default() += weights.share(*w);
            }
            shares
        };

        let mut issuers: Vec<(String, f64)> = shares_by(&|h: &Holding| h.issuer_name.clone()).into_iter().collect();
        issuers.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let mut issuer_shares: BTreeMap<String, f64> = BTreeMap::new();
        for (idx, (issuer, share)) in issuers.into_iter().enumerate() {
            let key = if idx < TOP_HOLDINGS_N { issuer } else { OTHER_ISSUERS.to_string() };
            *issuer_shares.entry(key).or_default() += share;
        }

        let distribution = |dimension: &str, shares: BTreeMap<String, f64>| Distribution {
            scope: scope.clone(),
            dimension: dimension.to_string(),
            shares,
        };

        vec![
            distribution("rating", shares_by(&|h: &Holding| h.standardized_rating.to_string())),
            distribution("maturity_bucket", shares_by(&|h: &Holding| h.maturity_bucket.to_string())),
            distribution("instrument_type", shares_by(&|h: &Holding| h.instrument_type.as_str().to_string())),
            distribution("yield_bucket", shares_by(&|h: &Holding| yield_bucket(h.yield_pct, config))),
            distribution("issuer", issuer_shares),
        ]
    }
}

impl ConsolidatedDataset {
    /// SHA-256 (hex) over the canonical JSON of the holdings, in order.
    pub fn fingerprint(&self) -> Result<String> {
        let bytes = serde_json::to_vec(&self.holdings)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{InstrumentType, RowId, SourceReport, SourceStatus, StandardizedRating};

    pub(crate) fn holding(source: &str, row: usize, fund: &str, isin: &str, mv: f64) -> Holding {
        Holding {
            row_id: RowId::new(source, row),
            fund_name: fund.to_string(),
            amc: source.to_uppercase(),
            isin: Some(isin.to_string()),
            instrument_name: format!("{isin} NCD"),
            instrument_type: InstrumentType::CorporateBond,
            market_value_lacs: mv,
            pct_to_nav: 0.1,
            yield_pct: Some(7.0),
            coupon_pct: None,
            raw_rating: "AAA".to_string(),
            standardized_rating: StandardizedRating::Aaa,
            quantity: Some(100.0),
            maturity_date: NaiveDate::from_ymd_opt(2028, 7, 31),
            maturity_bucket: MaturityBucket::Named("1-3".to_string()),
            exclusion_match: None,
            is_sovereign: false,
            issuer_name: format!("ISSUER {isin}"),
            as_of_date: NaiveDate::from_ymd_opt(2025, 7, 31),
            unparsed_fields: Vec::new(),
            review_flags: Vec::new(),
        }
    }

    pub(crate) fn extraction(source: &str, holdings: Vec<Holding>) -> SourceExtraction {
        SourceExtraction {
            report: SourceReport {
                source_id: source.to_string(),
                amc: source.to_uppercase(),
                fund_name: holdings.first().map(|h| h.fund_name.clone()).unwrap_or_default(),
                status: SourceStatus::Extracted,
                rows_read: holdings.len(),
                holdings_produced: holdings.len(),
                malformed_rows: Vec::new(),
                skipped_rows: Vec::new(),
                field_mapping: BTreeMap::new(),
            },
            holdings,
        }
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 31).unwrap()
    }

    fn aggregates(dataset: &ConsolidatedDataset) -> AggregateReport {
        Consolidator::aggregates(dataset, &AggregatesConfig::default())
    }

    #[test]
    fn test_concatenates_and_tracks_duplicates() {
        let a = extraction(
            "a",
            vec![
                holding("a", 2, "Fund A", "INE040A08146", 100.0),
                holding("a", 3, "Fund A", "INE040A08146", 50.0),
                holding("a", 4, "Fund A", "INE002A08534", 10.0),
            ],
        );
        let b = extraction("b", vec![holding("b", 2, "Fund B", "INE002A08534", 70.0)]);

        let dataset = Consolidator::consolidate(as_of(), vec![a, b]);
        assert_eq!(dataset.len(), 4);
        assert_eq!(dataset.schema_version, SCHEMA_VERSION);
        assert_eq!(dataset.duplicates.len(), 1);
        assert_eq!(dataset.duplicates[0].rows, vec![RowId::new("a", 2), RowId::new("a", 3)]);
        assert_eq!(
            dataset.shared_isins.get("INE002A08534"),
            Some(&vec!["Fund A".to_string(), "Fund B".to_string()])
        );
        assert!(!dataset.shared_isins.contains_key("INE040A08146"));
    }

    #[test]
    fn test_weighted_average_renormalizes_over_known_rows() {
        let mut h1 = holding("a", 2, "F", "INE040A08146", 300.0);
        h1.yield_pct = Some(8.0);
        let mut h2 = holding("a", 3, "F", "INE002A08534", 100.0);
        h2.yield_pct = Some(6.0);
        let mut h3 = holding("a", 4, "F", "INE020B08443", 100.0);
        h3.yield_pct = None;

        let rows = vec![&h1, &h2, &h3];
        let weights: Vec<f64> = rows.iter().map(|h| h.market_value_lacs).collect();
        let (value, coverage) = weighted_average(&rows, &weights, |h| h.yield_pct);
        assert_eq!(value, Some(7.5));
        assert_eq!(coverage, 0.8);
    }

    #[test]
    fn test_zero_coverage_is_undefined_not_zero() {
        let mut h = holding("a", 2, "F", "INE040A08146", 100.0);
        h.yield_pct = None;
        let dataset = Consolidator::consolidate(as_of(), vec![extraction("a", vec![h])]);
        let report = aggregates(&dataset);
        let metric = report.metric(&Scope::fund("F"), WEIGHTED_AVG_YIELD).unwrap();
        assert_eq!(metric.value, None);
        assert_eq!(metric.coverage_fraction, 0.0);
    }

    #[test]
    fn test_aggregates_are_idempotent() {
        let dataset = Consolidator::consolidate(
            as_of(),
            vec![extraction(
                "a",
                vec![
                    holding("a", 2, "F", "INE040A08146", 100.0),
                    holding("a", 3, "F", "INE002A08534", 40.0),
                ],
            )],
        );
        assert_eq!(aggregates(&dataset), aggregates(&dataset));
    }

    #[test]
    fn test_coverage_never_decreases_when_known_rows_are_added() {
        let mut base = vec![
            holding("a", 2, "F", "INE040A08146", 100.0),
            holding("a", 3, "F", "INE002A08534", 100.0),
        ];
        base[1].yield_pct = None;

        let before = aggregates(&Consolidator::consolidate(as_of(), vec![extraction("a", base.clone())]));
        base.push(holding("a", 4, "F", "INE020B08443", 55.0));
        let after = aggregates(&Consolidator::consolidate(as_of(), vec![extraction("a", base)]));

        let c0 = before.metric(&Scope::fund("F"), WEIGHTED_AVG_YIELD).unwrap().coverage_fraction;
        let c1 = after.metric(&Scope::fund("F"), WEIGHTED_AVG_YIELD).unwrap().coverage_fraction;
        assert!(c1 >= c0);
    }

    #[test]
    fn test_row_count_basis_when_market_value_is_zero() {
        let dataset = Consolidator::consolidate(
            as_of(),
            vec![extraction("a", vec![holding("a", 2, "F", "INE040A08146", 0.0)])],
        );
        let report = aggregates(&dataset);
        let metric = report.metric(&Scope::AllFunds, WEIGHTED_AVG_YIELD).unwrap();
        assert_eq!(metric.basis, MetricBasis::RowCount(1));
        assert_eq!(metric.value, Some(7.0));
    }

    #[test]
    fn test_distributions_sum_to_one() {
        let mut sov = holding("a", 3, "F", "IN0020230085", 300.0);
        sov.standardized_rating = StandardizedRating::Sovereign;
        let dataset = Consolidator::consolidate(
            as_of(),
            vec![extraction("a", vec![holding("a", 2, "F", "INE040A08146", 100.0), sov])],
        );
        let report = aggregates(&dataset);
        let rating = report.distribution(&Scope::fund("F"), "rating").unwrap();
        assert_eq!(rating.shares.get("SOVEREIGN"), Some(&0.75));
        assert_eq!(rating.shares.get("AAA"), Some(&0.25));
        let issuer_total: f64 = report.distribution(&Scope::fund("F"), "issuer").unwrap().shares.values().sum();
        assert!((issuer_total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_yield_buckets() {
        let config = AggregatesConfig::default();
        assert_eq!(yield_bucket(Some(4.99), &config), "<5%");
        assert_eq!(yield_bucket(Some(5.0), &config), "5-6%");
        assert_eq!(yield_bucket(Some(7.35), &config), "7-8%");
        assert_eq!(yield_bucket(Some(8.0), &config), ">=8%");
        assert_eq!(yield_bucket(None, &config), "No Yield Info");
    }

    #[test]
    fn test_yield_bucket_distribution_per_scope() {
        let mut low = holding("a", 2, "F", "INE040A08146", 100.0);
        low.yield_pct = Some(6.5);
        let mut high = holding("a", 3, "F", "INE002A08534", 300.0);
        high.yield_pct = Some(8.4);
        let mut unknown = holding("b", 2, "G", "INE020B08443", 100.0);
        unknown.yield_pct = None;
        let dataset = Consolidator::consolidate(
            as_of(),
            vec![extraction("a", vec![low, high]), extraction("b", vec![unknown])],
        );

        let report = aggregates(&dataset);
        let fund = report.distribution(&Scope::fund("F"), "yield_bucket").unwrap();
        assert_eq!(fund.shares.get("6-7%"), Some(&0.25));
        assert_eq!(fund.shares.get(">=8%"), Some(&0.75));
        let all = report.distribution(&Scope::AllFunds, "yield_bucket").unwrap();
        assert_eq!(all.shares.get("No Yield Info"), Some(&0.2));
    }

    #[test]
    fn test_fund_named_all_does_not_collide_with_dataset_scope() {
        let mut mine = holding("a", 2, "ALL", "INE040A08146", 100.0);
        mine.yield_pct = Some(6.0);
        let mut other = holding("b", 2, "Other Fund", "INE002A08534", 100.0);
        other.yield_pct = Some(8.0);
        let dataset = Consolidator::consolidate(as_of(), vec![extraction("a", vec![mine]), extraction("b", vec![other])]);

        let report = aggregates(&dataset);
        let fund = report.metric(&Scope::fund("ALL"), WEIGHTED_AVG_YIELD).unwrap();
        let everything = report.metric(&Scope::AllFunds, WEIGHTED_AVG_YIELD).unwrap();
        assert_eq!(fund.value, Some(6.0));
        assert_eq!(everything.value, Some(7.0));
        let all_scoped = report
            .metrics
            .iter()
            .filter(|m| m.name == WEIGHTED_AVG_YIELD && m.scope == Scope::AllFunds)
            .count();
        assert_eq!(all_scoped, 1);
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let build = |mv: f64| {
            Consolidator::consolidate(
                as_of(),
                vec![extraction("a", vec![holding("a", 2, "F", "INE040A08146", mv)])],
            )
        };
        let a = build(100.0).fingerprint().unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, build(100.0).fingerprint().unwrap());
        assert_ne!(a, build(101.0).fingerprint().unwrap());
    }
}
