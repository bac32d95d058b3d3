/// Version tag written with every consolidated dataset export
pub const SCHEMA_VERSION: &str = "holdings.v1";

/// Strings that spreadsheets use to mean "no value"
pub const NULL_SENTINELS: &[&str] = &["", "-", "--", "NA", "N.A.", "N/A", "NIL", "NULL", "NONE"];

/// Currency markers stripped before numeric parsing
pub const CURRENCY_MARKERS: &[&str] = &["₹", "RS.", "RS", "INR", "$"];

/// Default percentage threshold: values above it are whole-number percents
pub const DEFAULT_PERCENT_THRESHOLD: f64 = 1.5;

/// Default ceiling for a single holding's share of NAV
pub const DEFAULT_NAV_CEILING: f64 = 1.5;

/// Upper bound accepted for the far-maturity warning horizon
pub const MAX_FAR_MATURITY_YEARS: f64 = 200.0;

/// Day count used to turn a date difference into years
pub const DAYS_PER_YEAR: f64 = 365.25;

/// Lakhs in one crore
pub const LACS_PER_CRORE: f64 = 100.0;

/// Rupees in one lakh
pub const RUPEES_PER_LAC: f64 = 100_000.0;

/// Number of largest holdings used for the top-N concentration metric
pub const TOP_HOLDINGS_N: usize = 10;
