//! Row-level normalization: one raw spreadsheet row in, one canonical
//! [`Holding`] (or a malformed-row error) out.

pub mod numeric;

use chrono::NaiveDate;
use tracing::debug;

use crate::config::{NormalizationConfig, PipelineConfig, SourceConfig};
use crate::constants::NULL_SENTINELS;
use crate::domain::{
    CanonicalField, CellValue, Holding, RawTable, ReviewFlag, RowId, RowIssue, SourceReport, SourceStatus,
    StandardizedRating, UnparsedValue,
};
use crate::error::{PipelineError, Result};
use crate::pipeline::processing::issuer::IssuerClassifier;
use crate::pipeline::processing::maturity::{parse_explicit, MaturityResolver};
use crate::pipeline::processing::rating::RatingNormalizer;
use crate::pipeline::processing::schema::{FieldMapping, SchemaResolver};

use self::numeric::{coerce_percentage, parse_numeric, unit_multiplier, Numeric};

/// Compiled resolvers shared read-only by every source of a run
pub struct Resolvers {
    pub rating: RatingNormalizer,
    pub maturity: MaturityResolver,
    pub issuer: IssuerClassifier,
}

impl Resolvers {
    pub fn from_config(config: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            rating: RatingNormalizer::from_config(config)?,
            maturity: MaturityResolver::from_config(config)?,
            issuer: IssuerClassifier::from_config(config)?,
        })
    }
}

/// Holdings and report produced by one source
#[derive(Debug, Clone)]
pub struct SourceExtraction {
    pub report: SourceReport,
    pub holdings: Vec<Holding>,
}

impl SourceExtraction {
    pub fn failed(source: &SourceConfig, reason: impl Into<String>) -> Self {
        Self {
            report: SourceReport::failed(&source.source_id, &source.amc, &source.fund_name, reason),
            holdings: Vec::new(),
        }
    }
}

/// Turns rows of one source into holdings using a resolved field mapping.
pub struct RecordNormalizer<'a> {
    source: &'a SourceConfig,
    mapping: &'a FieldMapping,
    resolvers: &'a Resolvers,
    normalization: &'a NormalizationConfig,
    unit_multiplier: f64,
    as_of: NaiveDate,
}

impl<'a> RecordNormalizer<'a> {
    pub fn new<S: AsRef<str>>(
        source: &'a SourceConfig,
        mapping: &'a FieldMapping,
        resolvers: &'a Resolvers,
        normalization: &'a NormalizationConfig,
        headers: &[S],
        as_of: NaiveDate,
    ) -> Self {
        let mv_header = mapping.header(CanonicalField::MarketValue).unwrap_or_default();
        Self {
            source,
            mapping,
            resolvers,
            normalization,
            unit_multiplier: unit_multiplier(source.unit, mv_header, headers),
            as_of,
        }
    }

    pub fn unit_multiplier(&self) -> f64 {
        self.unit_multiplier
    }

    fn cell<'r>(&self, row: &'r [CellValue], field: CanonicalField) -> Option<&'r CellValue> {
        self.mapping.column(field).and_then(|idx| row.get(idx))
    }

    /// Trimmed text of a mapped cell; blanks and null sentinels read as `None`.
    fn text(&self, row: &[CellValue], field: CanonicalField) -> Option<String> {
        let text = self.cell(row, field)?.as_text()?;
        let trimmed = text.trim();
        if NULL_SENTINELS.contains(&trimmed.to_uppercase().as_str()) {
            None
        } else {
            Some(trimmed.to_string())
        }
    }

    fn required_number(&self, row: &[CellValue], field: CanonicalField, row_id: &RowId) -> Result<f64> {
        let parsed = self.cell(row, field).map(parse_numeric).unwrap_or(Numeric::Null);
        match parsed {
            Numeric::Value(v) => Ok(v),
            Numeric::Null => Err(malformed(row_id, format!("missing {}", field))),
            Numeric::Unparseable(raw) => Err(malformed(row_id, format!("unparseable {} '{}'", field, raw))),
        }
    }

    fn optional_number(&self, row: &[CellValue], field: CanonicalField, unparsed: &mut Vec<UnparsedValue>) -> Option<f64> {
        let cell = self.cell(row, field)?;
        match parse_numeric(cell) {
            Numeric::Value(v) => Some(v),
            Numeric::Null => None,
            Numeric::Unparseable(raw) => {
                unparsed.push(UnparsedValue { field, raw });
                None
            }
        }
    }

    /// Text that identifies a summary row: the instrument name, or the first
    /// non-empty text cell when the name cell is blank.
    fn summary_label(&self, row: &[CellValue]) -> Option<String> {
        self.text(row, CanonicalField::InstrumentName).or_else(|| {
            row.iter().find_map(|c| match c {
                CellValue::Text(t) if !t.trim().is_empty() => Some(t.trim().to_string()),
                _ => None,
            })
        })
    }

    /// Normalize one data row. `row_number` is the 1-based sheet row.
    pub fn normalize_row(&self, row: &[CellValue], row_number: usize) -> Result<Holding> {
        let row_id = RowId::new(&self.source.source_id, row_number);

        let instrument_name = self
            .text(row, CanonicalField::InstrumentName)
            .ok_or_else(|| malformed(&row_id, "missing instrument_name"))?;

        let market_value = self.required_number(row, CanonicalField::MarketValue, &row_id)?;
        if market_value < 0.0 {
            return Err(malformed(&row_id, format!("negative market_value {}", market_value)));
        }
        let raw_pct = self.required_number(row, CanonicalField::PctToNav, &row_id)?;

        let mut unparsed_fields = Vec::new();
        let mut review_flags = Vec::new();

        let (pct_to_nav, pct_flag) = coerce_percentage(raw_pct, self.source.pct_format, self.normalization);
        review_flags.extend(pct_flag);

        let yield_pct = self.optional_number(row, CanonicalField::Yield, &mut unparsed_fields);
        let coupon_pct = self.optional_number(row, CanonicalField::Coupon, &mut unparsed_fields);
        let quantity = self.optional_number(row, CanonicalField::Quantity, &mut unparsed_fields);

        let isin = self
            .text(row, CanonicalField::Isin)
            .map(|s| s.to_uppercase());
        let fund_name = self
            .text(row, CanonicalField::FundName)
            .unwrap_or_else(|| self.source.fund_name.clone());
        let as_of_date = match self.cell(row, CanonicalField::AsOfDate) {
            Some(cell) if !cell.is_blank() => parse_explicit(cell),
            _ => Some(self.as_of),
        };

        let raw_rating = self.text(row, CanonicalField::Rating).unwrap_or_default();
        let classification = self.resolvers.issuer.classify(&instrument_name, isin.as_deref());
        let standardized_rating = if classification.is_sovereign {
            StandardizedRating::Sovereign
        } else {
            self.resolvers.rating.normalize(&raw_rating)
        };

        let maturity = self.resolvers.maturity.resolve(
            &instrument_name,
            classification.instrument_type,
            self.cell(row, CanonicalField::MaturityDate),
            self.as_of,
        );
        if maturity.assumed_short_tenor {
            review_flags.push(ReviewFlag::AssumedShortTenor);
        }

        Ok(Holding {
            row_id,
            fund_name,
            amc: self.source.amc.clone(),
            isin,
            instrument_name,
            instrument_type: classification.instrument_type,
            market_value_lacs: market_value * self.unit_multiplier,
            pct_to_nav,
            yield_pct,
            coupon_pct,
            raw_rating,
            standardized_rating,
            quantity,
            maturity_date: maturity.date,
            maturity_bucket: maturity.bucket,
            exclusion_match: maturity.exclusion_match,
            is_sovereign: classification.is_sovereign,
            issuer_name: classification.issuer_name,
            as_of_date,
            unparsed_fields,
            review_flags,
        })
    }
}

fn malformed(row_id: &RowId, reason: impl Into<String>) -> PipelineError {
    PipelineError::MalformedRow {
        row: row_id.to_string(),
        reason: reason.into(),
    }
}

/// True when a cell starts with a stop marker as a whole word ("TOTAL", not "TOTALENERGIES").
fn is_summary_cell(text: &str, markers: &[String]) -> bool {
    let upper = text.trim().to_uppercase();
    markers.iter().any(|marker| {
        let marker = marker.to_uppercase();
        upper
            .strip_prefix(marker.as_str())
            .map(|rest| !rest.starts_with(|c: char| c.is_ascii_alphanumeric()))
            .unwrap_or(false)
    })
}

/// Resolve the schema of one raw table and normalize every data row.
///
/// Schema errors fail the whole source; row errors only drop the row.
pub fn extract_source(
    config: &PipelineConfig,
    source: &SourceConfig,
    table: &RawTable,
    resolvers: &Resolvers,
    as_of: NaiveDate,
) -> Result<SourceExtraction> {
    let required = config.required_fields()?;
    let aliases = config.field_aliases_for(source)?;

    let Some(header_row) = table.rows.get(source.header_row_offset) else {
        return Ok(SourceExtraction::failed(
            source,
            format!("header row {} not present", source.header_row_offset + 1),
        ));
    };
    let headers: Vec<String> = header_row.iter().map(|c| c.as_text().unwrap_or_default()).collect();

    let mapping = match SchemaResolver::new(&source.source_id, &aliases, &required).resolve(&headers) {
        Ok(mapping) => mapping,
        Err(e) if !e.is_fatal() => return Ok(SourceExtraction::failed(source, e.to_string())),
        Err(e) => return Err(e),
    };

    let normalizer = RecordNormalizer::new(source, &mapping, resolvers, &config.normalization, &headers, as_of);

    let mut report = SourceReport {
        source_id: source.source_id.clone(),
        amc: source.amc.clone(),
        fund_name: source.fund_name.clone(),
        status: SourceStatus::Extracted,
        rows_read: 0,
        holdings_produced: 0,
        malformed_rows: Vec::new(),
        skipped_rows: Vec::new(),
        field_mapping: mapping.describe(),
    };
    let mut holdings = Vec::new();

    for (idx, row) in table.rows.iter().enumerate().skip(source.header_row_offset + 1) {
        let row_number = idx + 1;
        report.rows_read += 1;

        if row.iter().all(CellValue::is_blank) {
            report.skipped_rows.push(RowIssue {
                row_number,
                reason: "blank row".to_string(),
            });
            continue;
        }
        let is_summary = normalizer
            .summary_label(row)
            .is_some_and(|label| is_summary_cell(&label, &source.stop_markers));
        if is_summary {
            report.skipped_rows.push(RowIssue {
                row_number,
                reason: "summary row".to_string(),
            });
            continue;
        }

        match normalizer.normalize_row(row, row_number) {
            Ok(holding) => holdings.push(holding),
            Err(PipelineError::MalformedRow { row, reason }) => {
                debug!(source_id = %source.source_id, row = %row, reason = %reason, "Dropping malformed row");
                report.malformed_rows.push(RowIssue { row_number, reason });
            }
            Err(e) => return Err(e),
        }
    }

    report.holdings_produced = holdings.len();
    Ok(SourceExtraction { report, holdings })
}
