//! Canonical data shapes shared by every pipeline stage.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::constants::DAYS_PER_YEAR;

/// Canonical field names every source schema is resolved onto
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CanonicalField {
    FundName,
    Isin,
    InstrumentName,
    MarketValue,
    PctToNav,
    Yield,
    Rating,
    Quantity,
    MaturityDate,
    AsOfDate,
    Coupon,
}

impl CanonicalField {
    pub const ALL: [CanonicalField; 11] = [
        CanonicalField::FundName,
        CanonicalField::Isin,
        CanonicalField::InstrumentName,
        CanonicalField::MarketValue,
        CanonicalField::PctToNav,
        CanonicalField::Yield,
        CanonicalField::Rating,
        CanonicalField::Quantity,
        CanonicalField::MaturityDate,
        CanonicalField::AsOfDate,
        CanonicalField::Coupon,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CanonicalField::FundName => "fund_name",
            CanonicalField::Isin => "isin",
            CanonicalField::InstrumentName => "instrument_name",
            CanonicalField::MarketValue => "market_value",
            CanonicalField::PctToNav => "pct_to_nav",
            CanonicalField::Yield => "yield",
            CanonicalField::Rating => "rating",
            CanonicalField::Quantity => "quantity",
            CanonicalField::MaturityDate => "maturity_date",
            CanonicalField::AsOfDate => "as_of_date",
            CanonicalField::Coupon => "coupon",
        }
    }
}

impl fmt::Display for CanonicalField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CanonicalField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase();
        CanonicalField::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == key)
            .ok_or_else(|| format!("unknown canonical field '{}'", s))
    }
}

/// Fixed ordinal rating taxonomy used for cross-AMC comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StandardizedRating {
    Sovereign,
    Aaa,
    Aa,
    A,
    Bbb,
    BelowIg,
    Other,
    Unrated,
}

impl StandardizedRating {
    pub const ALL: [StandardizedRating; 8] = [
        StandardizedRating::Sovereign,
        StandardizedRating::Aaa,
        StandardizedRating::Aa,
        StandardizedRating::A,
        StandardizedRating::Bbb,
        StandardizedRating::BelowIg,
        StandardizedRating::Other,
        StandardizedRating::Unrated,
    ];

    /// Higher is better credit quality.
    pub fn rank(&self) -> u8 {
        match self {
            StandardizedRating::Sovereign => 7,
            StandardizedRating::Aaa => 6,
            StandardizedRating::Aa => 5,
            StandardizedRating::A => 4,
            StandardizedRating::Bbb => 3,
            StandardizedRating::BelowIg => 2,
            StandardizedRating::Other => 1,
            StandardizedRating::Unrated => 0,
        }
    }

    /// True for grades on the long-term credit scale (not OTHER/UNRATED).
    pub fn is_graded(&self) -> bool {
        !matches!(self, StandardizedRating::Other | StandardizedRating::Unrated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StandardizedRating::Sovereign => "SOVEREIGN",
            StandardizedRating::Aaa => "AAA",
            StandardizedRating::Aa => "AA",
            StandardizedRating::A => "A",
            StandardizedRating::Bbb => "BBB",
            StandardizedRating::BelowIg => "BELOW_IG",
            StandardizedRating::Other => "OTHER",
            StandardizedRating::Unrated => "UNRATED",
        }
    }
}

impl fmt::Display for StandardizedRating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StandardizedRating {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_uppercase();
        StandardizedRating::ALL
            .iter()
            .copied()
            .find(|r| r.as_str() == key)
            .ok_or_else(|| format!("unknown standardized rating '{}'", s))
    }
}

/// Maturity bucket assigned to a holding
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum MaturityBucket {
    /// A configured bucket label (including the terminal and matured buckets)
    Named(String),
    /// AT1 / Tier-2 / perpetual: no maturity analysis
    Excluded,
    /// No date could be resolved
    Unknown,
}

impl MaturityBucket {
    pub fn label(&self) -> &str {
        match self {
            MaturityBucket::Named(name) => name,
            MaturityBucket::Excluded => "EXCLUDED",
            MaturityBucket::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for MaturityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<MaturityBucket> for String {
    fn from(bucket: MaturityBucket) -> Self {
        bucket.label().to_string()
    }
}

impl From<String> for MaturityBucket {
    fn from(label: String) -> Self {
        match label.as_str() {
            "EXCLUDED" => MaturityBucket::Excluded,
            "UNKNOWN" => MaturityBucket::Unknown,
            _ => MaturityBucket::Named(label),
        }
    }
}

/// Instrument category derived from the instrument name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentType {
    Overnight,
    TBill,
    Sdl,
    GSec,
    Cp,
    Cd,
    At1Tier2,
    CorporateBond,
}

impl InstrumentType {
    /// Money-market paper whose tenor is under a year by construction
    pub fn is_money_market(&self) -> bool {
        matches!(
            self,
            InstrumentType::Overnight | InstrumentType::TBill | InstrumentType::Cp | InstrumentType::Cd
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstrumentType::Overnight => "OVERNIGHT",
            InstrumentType::TBill => "T_BILL",
            InstrumentType::Sdl => "SDL",
            InstrumentType::GSec => "G_SEC",
            InstrumentType::Cp => "CP",
            InstrumentType::Cd => "CD",
            InstrumentType::At1Tier2 => "AT1_TIER2",
            InstrumentType::CorporateBond => "CORPORATE_BOND",
        }
    }
}

/// One spreadsheet cell as delivered by the extraction collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Empty,
    Number(f64),
    Text(String),
    Date { date: NaiveDate },
}

impl CellValue {
    pub fn text(value: impl Into<String>) -> Self {
        CellValue::Text(value.into())
    }

    pub fn is_blank(&self) -> bool {
        match self {
            CellValue::Empty => true,
            CellValue::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Cell rendered as text, `None` for empty cells.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Number(n) => Some(n.to_string()),
            CellValue::Date { date } => Some(date.format("%Y-%m-%d").to_string()),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(date: NaiveDate) -> Self {
        CellValue::Date { date }
    }
}

/// Raw cell grid for one source; the header row sits at the source's
/// configured offset and data rows follow it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTable {
    #[serde(default)]
    pub source_id: String,
    pub rows: Vec<Vec<CellValue>>,
}

impl RawTable {
    /// Build a table whose first row is the given header
    pub fn with_header(source_id: &str, headers: &[&str], rows: Vec<Vec<CellValue>>) -> Self {
        let mut grid = Vec::with_capacity(rows.len() + 1);
        grid.push(headers.iter().map(|h| CellValue::from(*h)).collect());
        grid.extend(rows);
        Self {
            source_id: source_id.to_string(),
            rows: grid,
        }
    }
}

/// Stable identifier of a source row: source id plus 1-based sheet row
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId {
    pub source_id: String,
    pub row_number: usize,
}

impl RowId {
    pub fn new(source_id: &str, row_number: usize) -> Self {
        Self {
            source_id: source_id.to_string(),
            row_number,
        }
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source_id, self.row_number)
    }
}

/// A value that survived normalization as text instead of its numeric type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnparsedValue {
    pub field: CanonicalField,
    pub raw: String,
}

/// Normalization decisions flagged for manual review
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReviewFlag {
    /// The raw % to NAV sat inside the review band around the percent threshold
    NearPercentThreshold { raw: f64, coerced: f64 },
    /// Money-market instrument with no resolvable date placed in the first bucket
    AssumedShortTenor,
}

/// One instrument position within one fund as of one date
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub row_id: RowId,
    pub fund_name: String,
    /// Asset manager code
    pub amc: String,
    pub isin: Option<String>,
    pub instrument_name: String,
    pub instrument_type: InstrumentType,
    /// Always Rs. Lacs after unit normalization
    pub market_value_lacs: f64,
    /// Fraction of NAV after percentage coercion
    pub pct_to_nav: f64,
    /// Percentage points
    pub yield_pct: Option<f64>,
    pub coupon_pct: Option<f64>,
    /// Source rating text, preserved verbatim
    pub raw_rating: String,
    pub standardized_rating: StandardizedRating,
    pub quantity: Option<f64>,
    pub maturity_date: Option<NaiveDate>,
    pub maturity_bucket: MaturityBucket,
    /// Exclusion pattern that forced `EXCLUDED`, if any
    pub exclusion_match: Option<String>,
    pub is_sovereign: bool,
    pub issuer_name: String,
    pub as_of_date: Option<NaiveDate>,
    pub unparsed_fields: Vec<UnparsedValue>,
    pub review_flags: Vec<ReviewFlag>,
}

impl Holding {
    /// Residual tenor in years relative to `as_of`, if a maturity date is known
    pub fn residual_years(&self, as_of: NaiveDate) -> Option<f64> {
        self.maturity_date
            .map(|d| (d - as_of).num_days() as f64 / DAYS_PER_YEAR)
    }
}

/// Terminal state of one source's extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SourceStatus {
    Extracted,
    Failed { reason: String },
}

/// A row dropped or skipped during extraction, with the reason
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowIssue {
    pub row_number: usize,
    pub reason: String,
}

/// Per-source extraction report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub source_id: String,
    pub amc: String,
    pub fund_name: String,
    pub status: SourceStatus,
    pub rows_read: usize,
    pub holdings_produced: usize,
    /// Rows that could not be coerced into a Holding
    pub malformed_rows: Vec<RowIssue>,
    /// Blank and summary rows passed over on purpose
    pub skipped_rows: Vec<RowIssue>,
    /// Canonical field -> raw header used
    pub field_mapping: BTreeMap<String, String>,
}

impl SourceReport {
    pub fn failed(source_id: &str, amc: &str, fund_name: &str, reason: impl Into<String>) -> Self {
        Self {
            source_id: source_id.to_string(),
            amc: amc.to_string(),
            fund_name: fund_name.to_string(),
            status: SourceStatus::Failed { reason: reason.into() },
            rows_read: 0,
            holdings_produced: 0,
            malformed_rows: Vec::new(),
            skipped_rows: Vec::new(),
            field_mapping: BTreeMap::new(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, SourceStatus::Failed { .. })
    }
}

/// Same (fund, ISIN) appearing more than once within one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateHolding {
    pub source_id: String,
    pub fund_name: String,
    pub isin: String,
    pub rows: Vec<RowId>,
}

/// All holdings of one pipeline run, rebuilt from scratch every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidatedDataset {
    pub schema_version: String,
    pub as_of_date: NaiveDate,
    pub holdings: Vec<Holding>,
    /// One report per configured source, failed ones included
    pub sources: Vec<SourceReport>,
    /// Within-source duplicates, reported as data errors
    pub duplicates: Vec<DuplicateHolding>,
    /// ISIN -> funds holding it, for ISINs held by more than one fund
    pub shared_isins: BTreeMap<String, Vec<String>>,
}

impl ConsolidatedDataset {
    pub fn len(&self) -> usize {
        self.holdings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.holdings.is_empty()
    }

    /// Fund names in first-seen order
    pub fn funds(&self) -> Vec<&str> {
        let mut funds: Vec<&str> = Vec::new();
        for h in &self.holdings {
            if !funds.contains(&h.fund_name.as_str()) {
                funds.push(&h.fund_name);
            }
        }
        funds
    }

    pub fn holdings_for_fund<'a>(&'a self, fund: &'a str) -> impl Iterator<Item = &'a Holding> + 'a {
        self.holdings.iter().filter(move |h| h.fund_name == fund)
    }
}

/// Weight used by an aggregate
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "total", rename_all = "snake_case")]
pub enum MetricBasis {
    /// Sum of market value (Lacs) over all rows in scope
    MarketValue(f64),
    /// Number of rows in scope
    RowCount(usize),
}

/// What an aggregate is computed over
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Fund(String),
    /// Every holding of the run, whatever its fund
    AllFunds,
}

impl Scope {
    pub fn fund(name: impl Into<String>) -> Self {
        Scope::Fund(name.into())
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Fund(name) => write!(f, "fund:{}", name),
            Scope::AllFunds => f.write_str("all_funds"),
        }
    }
}

/// A computed statistic with explicit coverage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetric {
    pub scope: Scope,
    pub name: String,
    /// `None` when nothing contributed (`coverage_fraction == 0`)
    pub value: Option<f64>,
    pub coverage_fraction: f64,
    pub basis: MetricBasis,
}

/// Value share per category within one scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub scope: Scope,
    pub dimension: String,
    /// Category -> share of market value, ordered by category
    pub shares: BTreeMap<String, f64>,
}
