use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, info_span, warn};

use crate::config::{PipelineConfig, SourceConfig};
use crate::domain::{RawTable, SourceStatus};
use crate::pipeline::processing::normalize::{extract_source, Resolvers, SourceExtraction};

/// Use case for turning one source's raw table into canonical holdings.
///
/// Synchronous on purpose: it is CPU-bound and the run use case drives it
/// from blocking worker threads.
pub struct NormalizeUseCase {
    config: Arc<PipelineConfig>,
    resolvers: Arc<Resolvers>,
}

impl NormalizeUseCase {
    pub fn new(config: Arc<PipelineConfig>, resolvers: Arc<Resolvers>) -> Self {
        Self { config, resolvers }
    }

    /// Build the resolvers from the configuration
    pub fn from_config(config: Arc<PipelineConfig>) -> Result<Self> {
        let resolvers = Resolvers::from_config(&config)?;
        Ok(Self::new(config, Arc::new(resolvers)))
    }

    /// Normalize a single source. Schema failures come back as a failed
    /// extraction; only configuration errors are returned as `Err`.
    pub fn normalize_source(&self, source: &SourceConfig, table: &RawTable, as_of: NaiveDate) -> Result<SourceExtraction> {
        let span = info_span!("normalize_source", source_id = %source.source_id);
        let _guard = span.enter();
        let started = Instant::now();

        let extraction = extract_source(&self.config, source, table, &self.resolvers, as_of)?;
        let report = &extraction.report;

        match &report.status {
            SourceStatus::Extracted => {
                info!(
                    "Extracted {} holdings from {} rows ({} malformed, {} skipped)",
                    report.holdings_produced,
                    report.rows_read,
                    report.malformed_rows.len(),
                    report.skipped_rows.len()
                );
                crate::observability::metrics::normalize::rows_normalized(&source.source_id, report.holdings_produced);
                crate::observability::metrics::normalize::rows_malformed(&source.source_id, report.malformed_rows.len());
                crate::observability::metrics::normalize::rows_skipped(&source.source_id, report.skipped_rows.len());
                crate::observability::metrics::normalize::source_completed(
                    &source.source_id,
                    started.elapsed().as_secs_f64(),
                );
            }
            SourceStatus::Failed { reason } => {
                warn!("Source failed: {}", reason);
                crate::observability::metrics::normalize::source_failed(&source.source_id);
            }
        }

        Ok(extraction)
    }

    /// Record a source that never reached normalization
    pub fn source_unavailable(&self, source: &SourceConfig, reason: impl Into<String>) -> SourceExtraction {
        let reason = reason.into();
        warn!(source_id = %source.source_id, "Source unavailable: {}", reason);
        crate::observability::metrics::normalize::source_failed(&source.source_id);
        SourceExtraction::failed(source, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::test_config;
    use crate::domain::CellValue;

    fn use_case() -> NormalizeUseCase {
        NormalizeUseCase::from_config(Arc::new(test_config())).unwrap()
    }

    fn as_of() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 31).unwrap()
    }

    #[test]
    fn test_normalize_source() {
        let uc = use_case();
        let source = uc.config.source("alpha").unwrap().clone();
        let table = RawTable::with_header(
            "alpha",
            &["Name of the Instrument", "ISIN", "Market/Fair Value (Rs. in Lacs)", "% to NAV"],
            vec![
                vec!["REC Ltd NCD".into(), "INE020B08443".into(), 250.0.into(), 2.5.into()],
                vec!["Grand Total".into(), CellValue::Empty, 250.0.into(), 2.5.into()],
            ],
        );

        let extraction = uc.normalize_source(&source, &table, as_of()).unwrap();
        assert_eq!(extraction.report.status, SourceStatus::Extracted);
        assert_eq!(extraction.holdings.len(), 1);
        assert_eq!(extraction.report.skipped_rows.len(), 1);
    }

    #[test]
    fn test_schema_failure_is_not_an_error() {
        let uc = use_case();
        let source = uc.config.source("alpha").unwrap().clone();
        let table = RawTable::with_header("alpha", &["Name of the Instrument", "% to NAV"], vec![]);

        let extraction = uc.normalize_source(&source, &table, as_of()).unwrap();
        assert!(extraction.report.is_failed());
        assert!(extraction.holdings.is_empty());
    }

    #[test]
    fn test_source_unavailable() {
        let uc = use_case();
        let source = uc.config.source("beta").unwrap().clone();
        let extraction = uc.source_unavailable(&source, "file not found");
        assert_eq!(
            extraction.report.status,
            SourceStatus::Failed {
                reason: "file not found".to_string()
            }
        );
    }
}
