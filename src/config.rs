use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_NAV_CEILING, DEFAULT_PERCENT_THRESHOLD, MAX_FAR_MATURITY_YEARS};
use crate::domain::{CanonicalField, StandardizedRating};
use crate::error::{PipelineError, Result};

/// Full run configuration: schema aliases, per-source quirks and every
/// resolver/gate threshold. Loaded once and shared read-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub schema: SchemaConfig,
    pub sources: Vec<SourceConfig>,
    pub rating: RatingConfig,
    pub maturity: MaturityConfig,
    pub issuer: IssuerConfig,
    #[serde(default)]
    pub normalization: NormalizationConfig,
    #[serde(default)]
    pub quality: QualityConfig,
    #[serde(default)]
    pub aggregates: AggregatesConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<String>,
    /// Canonical field -> header aliases shared by every source
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub amc: String,
    pub fund_name: String,
    #[serde(default)]
    pub unit: MarketValueUnit,
    #[serde(default)]
    pub pct_format: PercentFormat,
    /// Zero-based index of the header row within the raw grid
    #[serde(default)]
    pub header_row_offset: usize,
    #[serde(default = "default_stop_markers")]
    pub stop_markers: Vec<String>,
    /// Source-specific aliases, merged over the common table
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
}

/// Unit the source reports market value in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketValueUnit {
    Lacs,
    Crores,
    Rupees,
    /// Infer from the header text
    #[default]
    Auto,
}

/// How the source writes `% to NAV`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PercentFormat {
    /// Threshold heuristic per value
    #[default]
    Auto,
    Fraction,
    Percent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatingConfig {
    /// Standardized rating -> accepted raw grades
    pub aliases: BTreeMap<String, Vec<String>>,
    /// Grades on the short-term scale; never compared with long-term grades
    #[serde(default)]
    pub short_term_grades: Vec<String>,
    /// Optional explicit long-term equivalent for a standalone short-term grade
    #[serde(default)]
    pub short_term_equivalents: BTreeMap<String, String>,
    #[serde(default = "default_agency_prefixes")]
    pub agency_prefixes: Vec<String>,
    #[serde(default = "default_ignored_rating_tokens")]
    pub ignored_tokens: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketEdge {
    pub name: String,
    pub min_years: f64,
    pub max_years: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaturityConfig {
    /// Contiguous half-open `[min_years, max_years)` edges, ascending
    pub buckets: Vec<BucketEdge>,
    /// Open-ended bucket beyond the last edge
    pub terminal_bucket: String,
    /// Bucket for already-matured paper; first edge when unset
    #[serde(default)]
    pub matured_bucket: Option<String>,
    pub exclusion_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub money_market_short_tenor: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuerConfig {
    #[serde(default = "default_strip_tokens")]
    pub strip_tokens: Vec<String>,
    /// Words after which an instrument name no longer names the issuer
    #[serde(default = "default_issuer_stop_words")]
    pub stop_words: Vec<String>,
    #[serde(default = "default_legal_suffixes")]
    pub legal_suffixes: Vec<String>,
    /// Canonical issuer -> name variants
    #[serde(default)]
    pub aliases: BTreeMap<String, Vec<String>>,
    pub sovereign_name_markers: Vec<String>,
    #[serde(default)]
    pub sovereign_isin_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizationConfig {
    /// Raw `% to NAV` above this is a whole-number percent
    pub percent_threshold: f64,
    /// Values within `[low, high]` are flagged for review
    pub review_band: [f64; 2],
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        Self {
            percent_threshold: DEFAULT_PERCENT_THRESHOLD,
            review_band: [1.0, 2.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    #[default]
    StdDev,
    Percentile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutlierConfig {
    pub method: OutlierMethod,
    pub std_devs: f64,
    /// Percentile band, in percent
    pub percentile_band: [f64; 2],
    /// Funds with fewer values are not tested
    pub min_sample: usize,
    /// Absolute yield band in percentage points
    pub yield_bounds: [f64; 2],
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            method: OutlierMethod::StdDev,
            std_devs: 3.0,
            percentile_band: [1.0, 99.0],
            min_sample: 5,
            yield_bounds: [-5.0, 20.0],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    pub nav_ceiling: f64,
    /// Acceptable band for a fund's summed `% to NAV`
    pub nav_total_band: [f64; 2],
    pub far_maturity_years: f64,
    pub outliers: OutlierConfig,
    /// Field -> minimum non-null fraction per fund
    pub coverage_thresholds: BTreeMap<String, f64>,
    /// Minimum fraction of raw ratings per fund that map onto a known grade
    pub min_rating_standardization: f64,
    /// Minimum fraction of rows per fund with a graded rating
    pub min_graded_rating_coverage: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        let coverage_thresholds = [
            ("isin", 1.0),
            ("rating", 0.8),
            ("yield", 0.7),
            ("maturity_date", 0.5),
            ("quantity", 0.5),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        Self {
            nav_ceiling: DEFAULT_NAV_CEILING,
            nav_total_band: [0.92, 1.02],
            far_maturity_years: 50.0,
            outliers: OutlierConfig::default(),
            coverage_thresholds,
            min_rating_standardization: 0.7,
            min_graded_rating_coverage: 0.6,
        }
    }
}

/// Settings for the per-scope aggregates and distributions
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatesConfig {
    /// Ascending yield edges in percent; `[5, 6]` gives `<5%`, `5-6%`, `>=6%`
    pub yield_bucket_edges: Vec<f64>,
    /// Category for holdings without a yield
    pub no_yield_label: String,
}

impl Default for AggregatesConfig {
    fn default() -> Self {
        Self {
            yield_bucket_edges: vec![5.0, 6.0, 7.0, 8.0],
            no_yield_label: "No Yield Info".to_string(),
        }
    }
}

fn default_required_fields() -> Vec<String> {
    ["isin", "instrument_name", "market_value", "pct_to_nav"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_stop_markers() -> Vec<String> {
    ["GRAND TOTAL", "TOTAL", "NET ASSETS"].iter().map(|s| s.to_string()).collect()
}

fn default_agency_prefixes() -> Vec<String> {
    ["CRISIL", "ICRA", "CARE", "IND-RA", "IND", "FITCH", "BWR", "BRICKWORK", "ACUITE"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_ignored_rating_tokens() -> Vec<String> {
    ["STABLE", "POSITIVE", "NEGATIVE", "WATCH", "DEVELOPING", "OUTLOOK"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_strip_tokens() -> Vec<String> {
    [
        "NCD", "NCDS", "BOND", "BONDS", "DEBENTURE", "DEBENTURES", "SR", "SERIES", "TRANCHE", "AT1", "TIER",
        "CP", "CD", "SECURED", "UNSECURED", "STRPP", "MLD", "PERPETUAL", "SUB", "SUBORDINATED",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_issuer_stop_words() -> Vec<String> {
    ["MAT", "MATURITY", "CALL", "PUT", "RESET", "OPTION"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_legal_suffixes() -> Vec<String> {
    ["LIMITED", "LTD.", "LTD", "PVT", "PRIVATE", "CORPN", "CO."]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_true() -> bool {
    true
}

impl PipelineConfig {
    /// Load and validate a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: PipelineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn source(&self, source_id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    pub fn required_fields(&self) -> Result<Vec<CanonicalField>> {
        self.schema
            .required_fields
            .iter()
            .map(|f| f.parse::<CanonicalField>().map_err(PipelineError::Config))
            .collect()
    }

    /// Common aliases with the source's own aliases merged on top.
    pub fn field_aliases_for(&self, source: &SourceConfig) -> Result<BTreeMap<CanonicalField, Vec<String>>> {
        let mut merged: BTreeMap<CanonicalField, Vec<String>> = BTreeMap::new();
        for (key, aliases) in self.schema.aliases.iter().chain(source.aliases.iter()) {
            let field = key.parse::<CanonicalField>().map_err(|e| {
                PipelineError::Config(format!("source '{}': {}", source.source_id, e))
            })?;
            let entry = merged.entry(field).or_default();
            for alias in aliases {
                if !entry.contains(alias) {
                    entry.push(alias.clone());
                }
            }
        }
        Ok(merged)
    }

    pub fn rating_aliases(&self) -> Result<BTreeMap<StandardizedRating, Vec<String>>> {
        self.rating
            .aliases
            .iter()
            .map(|(k, v)| {
                k.parse::<StandardizedRating>()
                    .map(|r| (r, v.clone()))
                    .map_err(PipelineError::Config)
            })
            .collect()
    }

    /// Structural checks; any failure is fatal before processing starts.
    pub fn validate(&self) -> Result<()> {
        if self.sources.is_empty() {
            return Err(PipelineError::Config("no sources configured".to_string()));
        }

        let required = self.required_fields()?;
        if !required.contains(&CanonicalField::InstrumentName) {
            return Err(PipelineError::Config(
                "instrument_name must be a required field".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.source_id.trim().is_empty() {
                return Err(PipelineError::Config("source with empty source_id".to_string()));
            }
            if !seen.insert(source.source_id.as_str()) {
                return Err(PipelineError::Config(format!(
                    "duplicate source_id '{}'",
                    source.source_id
                )));
            }
            if source.fund_name.trim().is_empty() {
                return Err(PipelineError::Config(format!(
                    "source '{}' has no fund_name",
                    source.source_id
                )));
            }
            let aliases = self.field_aliases_for(source)?;
            if aliases.is_empty() {
                return Err(PipelineError::Config(format!(
                    "source '{}' has no alias table",
                    source.source_id
                )));
            }
        }

        self.validate_rating()?;
        self.validate_maturity()?;
        self.validate_issuer()?;
        self.validate_thresholds()
    }

    fn validate_rating(&self) -> Result<()> {
        let aliases = self.rating_aliases()?;
        if aliases.is_empty() {
            return Err(PipelineError::Config("rating alias table is empty".to_string()));
        }
        for (grade, equivalent) in &self.rating.short_term_equivalents {
            if !self
                .rating
                .short_term_grades
                .iter()
                .any(|g| g.eq_ignore_ascii_case(grade))
            {
                return Err(PipelineError::Config(format!(
                    "short-term equivalent given for '{}' which is not a short-term grade",
                    grade
                )));
            }
            equivalent.parse::<StandardizedRating>().map_err(PipelineError::Config)?;
        }
        Ok(())
    }

    fn validate_maturity(&self) -> Result<()> {
        let m = &self.maturity;
        if m.buckets.is_empty() {
            return Err(PipelineError::Config("no maturity buckets configured".to_string()));
        }
        let mut names = HashSet::new();
        for (i, edge) in m.buckets.iter().enumerate() {
            if !(edge.min_years < edge.max_years) {
                return Err(PipelineError::Config(format!(
                    "maturity bucket '{}' has min_years >= max_years",
                    edge.name
                )));
            }
            if let Some(next) = m.buckets.get(i + 1) {
                if (next.min_years - edge.max_years).abs() > f64::EPSILON {
                    return Err(PipelineError::Config(format!(
                        "maturity buckets '{}' and '{}' are not contiguous",
                        edge.name, next.name
                    )));
                }
            }
            names.insert(edge.name.as_str());
        }
        for reserved in ["EXCLUDED", "UNKNOWN"] {
            if names.contains(reserved) || m.terminal_bucket == reserved {
                return Err(PipelineError::Config(format!(
                    "'{}' is reserved and cannot name a maturity bucket",
                    reserved
                )));
            }
        }
        if m.terminal_bucket.trim().is_empty() {
            return Err(PipelineError::Config("terminal_bucket is empty".to_string()));
        }
        for pattern in &m.exclusion_patterns {
            Regex::new(pattern)?;
        }
        Ok(())
    }

    fn validate_issuer(&self) -> Result<()> {
        if self.issuer.sovereign_name_markers.is_empty() && self.issuer.sovereign_isin_prefixes.is_empty() {
            return Err(PipelineError::Config(
                "issuer config needs sovereign name markers or ISIN prefixes".to_string(),
            ));
        }
        Ok(())
    }

    fn validate_thresholds(&self) -> Result<()> {
        let n = &self.normalization;
        if n.percent_threshold <= 0.0 {
            return Err(PipelineError::Config("percent_threshold must be positive".to_string()));
        }
        if !(n.review_band[0] <= n.percent_threshold && n.percent_threshold <= n.review_band[1]) {
            return Err(PipelineError::Config(
                "review_band must contain percent_threshold".to_string(),
            ));
        }

        let q = &self.quality;
        if q.nav_ceiling <= 0.0 || q.nav_total_band[0] > q.nav_total_band[1] {
            return Err(PipelineError::Config("invalid NAV thresholds".to_string()));
        }
        if !(q.far_maturity_years.is_finite()
            && q.far_maturity_years > 0.0
            && q.far_maturity_years <= MAX_FAR_MATURITY_YEARS)
        {
            return Err(PipelineError::Config(format!(
                "far_maturity_years must be within (0, {}]",
                MAX_FAR_MATURITY_YEARS
            )));
        }

        let edges = &self.aggregates.yield_bucket_edges;
        if edges.is_empty() || edges.iter().any(|e| !e.is_finite()) || edges.windows(2).any(|w| w[0] >= w[1]) {
            return Err(PipelineError::Config(
                "yield_bucket_edges must be finite and strictly ascending".to_string(),
            ));
        }
        let o = &q.outliers;
        if o.std_devs <= 0.0 || o.percentile_band[0] >= o.percentile_band[1] || o.percentile_band[1] > 100.0 {
            return Err(PipelineError::Config("invalid outlier thresholds".to_string()));
        }
        for (name, threshold) in [
            ("min_rating_standardization", q.min_rating_standardization),
            ("min_graded_rating_coverage", q.min_graded_rating_coverage),
        ] {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(PipelineError::Config(format!("{} must be within [0, 1]", name)));
            }
        }
        for (field, threshold) in &q.coverage_thresholds {
            field.parse::<CanonicalField>().map_err(PipelineError::Config)?;
            if !(0.0..=1.0).contains(threshold) {
                return Err(PipelineError::Config(format!(
                    "coverage threshold for '{}' must be within [0, 1]",
                    field
                )));
            }
        }
        Ok(())
    }
}
