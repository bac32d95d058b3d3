use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tokio::task::JoinSet;
use tracing::{error, info, info_span, Instrument};

use crate::app::normalize_use_case::NormalizeUseCase;
use crate::app::ports::{DatasetOutputPort, RawTablePort};
use crate::app::quality_gate_use_case::QualityGateUseCase;
use crate::config::PipelineConfig;
use crate::domain::ConsolidatedDataset;
use crate::pipeline::processing::consolidate::{AggregateReport, Consolidator};
use crate::pipeline::processing::normalize::SourceExtraction;
use crate::pipeline::processing::quality_gate::QualityReport;

/// Everything one pipeline run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub dataset: ConsolidatedDataset,
    pub aggregates: AggregateReport,
    pub quality_report: QualityReport,
}

/// Orchestrates one full run: per-source normalization in parallel, then
/// consolidation, aggregates and quality gates over the whole dataset.
pub struct RunUseCase {
    config: Arc<PipelineConfig>,
    normalizer: Arc<NormalizeUseCase>,
    input: Box<dyn RawTablePort>,
    dataset_output: Box<dyn DatasetOutputPort>,
    quality_gate: QualityGateUseCase,
}

impl RunUseCase {
    pub fn new(
        config: Arc<PipelineConfig>,
        input: Box<dyn RawTablePort>,
        dataset_output: Box<dyn DatasetOutputPort>,
        quality_gate: QualityGateUseCase,
    ) -> Result<Self> {
        config.validate().context("invalid pipeline configuration")?;
        let normalizer = Arc::new(NormalizeUseCase::from_config(config.clone())?);
        Ok(Self {
            config,
            normalizer,
            input,
            dataset_output,
            quality_gate,
        })
    }

    pub async fn run(&self, as_of: NaiveDate) -> Result<RunOutcome> {
        let span = info_span!("pipeline_run", as_of = %as_of);
        self.run_inner(as_of).instrument(span).await
    }

    async fn run_inner(&self, as_of: NaiveDate) -> Result<RunOutcome> {
        info!("Starting run over {} sources", self.config.sources.len());

        let extractions = self.extract_all(as_of).await?;
        let dataset = Consolidator::consolidate(as_of, extractions);
        crate::observability::metrics::consolidate::dataset_built(dataset.len(), dataset.shared_isins.len());
        crate::observability::metrics::consolidate::duplicates_detected(dataset.duplicates.len());
        info!(
            "Consolidated {} holdings across {} funds ({} failed sources)",
            dataset.len(),
            dataset.funds().len(),
            dataset.sources.iter().filter(|s| s.is_failed()).count()
        );

        let aggregates = Consolidator::aggregates(&dataset, &self.config.aggregates);

        self.dataset_output.write_dataset(&dataset).await?;
        self.dataset_output.write_aggregates(&aggregates).await?;

        let quality_report = self.quality_gate.assess(&dataset).await?;

        Ok(RunOutcome {
            dataset,
            aggregates,
            quality_report,
        })
    }

    /// Normalize every source on blocking workers; results come back in
    /// configuration order regardless of completion order.
    async fn extract_all(&self, as_of: NaiveDate) -> Result<Vec<SourceExtraction>> {
        let mut slots: Vec<Option<SourceExtraction>> = vec![None; self.config.sources.len()];
        let mut workers = JoinSet::new();

        for (idx, source) in self.config.sources.iter().enumerate() {
            let table = match self.input.load_table(&source.source_id).await {
                Ok(table) => table,
                Err(e) => {
                    slots[idx] = Some(self.normalizer.source_unavailable(source, format!("{:#}", e)));
                    continue;
                }
            };

            let normalizer = self.normalizer.clone();
            let source = source.clone();
            workers.spawn_blocking(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| normalizer.normalize_source(&source, &table, as_of)));
                let extraction = match outcome {
                    Ok(result) => result,
                    Err(_) => Ok(normalizer.source_unavailable(&source, "normalization worker panicked")),
                };
                (idx, extraction)
            });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok((idx, extraction)) => slots[idx] = Some(extraction?),
                Err(e) => error!("Normalization worker did not complete: {}", e),
            }
        }

        Ok(slots
            .into_iter()
            .zip(&self.config.sources)
            .map(|(slot, source)| {
                slot.unwrap_or_else(|| self.normalizer.source_unavailable(source, "normalization worker did not complete"))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::QualityReportOutputPort;
    use crate::config::tests::test_config;
    use crate::domain::{RawTable, SourceStatus};
    use crate::pipeline::processing::quality_gate::GateStatus;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    struct InMemoryTables {
        tables: HashMap<String, RawTable>,
    }

    #[async_trait]
    impl RawTablePort for InMemoryTables {
        async fn load_table(&self, source_id: &str) -> Result<RawTable> {
            self.tables
                .get(source_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no table for {}", source_id))
        }
    }

    #[derive(Default)]
    struct MockDatasetOutput {
        pub datasets: Arc<Mutex<Vec<ConsolidatedDataset>>>,
        pub aggregates: Arc<Mutex<Vec<AggregateReport>>>,
    }

    #[async_trait]
    impl DatasetOutputPort for MockDatasetOutput {
        async fn write_dataset(&self, dataset: &ConsolidatedDataset) -> Result<()> {
            self.datasets.lock().await.push(dataset.clone());
            Ok(())
        }

        async fn write_aggregates(&self, aggregates: &AggregateReport) -> Result<()> {
            self.aggregates.lock().await.push(aggregates.clone());
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockQualityReportOutput {
        pub reports: Arc<Mutex<Vec<QualityReport>>>,
    }

    #[async_trait]
    impl QualityReportOutputPort for MockQualityReportOutput {
        async fn write_quality_report(&self, report: &QualityReport) -> Result<()> {
            self.reports.lock().await.push(report.clone());
            Ok(())
        }
    }

    fn alpha_table() -> RawTable {
        RawTable::with_header(
            "alpha",
            &["Name of the Instrument", "ISIN", "Rating", "Market/Fair Value (Rs. in Lacs)", "% to NAV", "YTM", "Quantity", "Maturity Date"],
            vec![
                vec![
                    "7.75% HDFC Bank Ltd NCD".into(),
                    "INE040A08146".into(),
                    "CRISIL AAA".into(),
                    600.0.into(),
                    60.0.into(),
                    7.4.into(),
                    100.0.into(),
                    "15-Jan-2028".into(),
                ],
                vec![
                    "7.55% REC Ltd NCD".into(),
                    "INE020B08443".into(),
                    "ICRA AAA".into(),
                    400.0.into(),
                    40.0.into(),
                    7.3.into(),
                    50.0.into(),
                    "20-Mar-2027".into(),
                ],
            ],
        )
    }

    #[tokio::test]
    async fn test_run_with_missing_source() {
        let input = InMemoryTables {
            tables: HashMap::from([("alpha".to_string(), alpha_table())]),
        };
        let dataset_output = MockDatasetOutput::default();
        let datasets = dataset_output.datasets.clone();
        let aggregates = dataset_output.aggregates.clone();
        let report_output = MockQualityReportOutput::default();
        let reports = report_output.reports.clone();

        let config = Arc::new(test_config());
        let quality_gate = QualityGateUseCase::from_config(&config.quality, Box::new(report_output)).unwrap();
        let use_case = RunUseCase::new(config, Box::new(input), Box::new(dataset_output), quality_gate).unwrap();

        let as_of = NaiveDate::from_ymd_opt(2025, 7, 31).unwrap();
        let outcome = use_case.run(as_of).await.unwrap();

        assert_eq!(outcome.dataset.len(), 2);
        assert_eq!(outcome.dataset.sources.len(), 2);
        assert_eq!(outcome.dataset.sources[0].source_id, "alpha");
        assert_eq!(outcome.dataset.sources[0].status, SourceStatus::Extracted);
        assert_eq!(outcome.dataset.sources[1].source_id, "beta");
        assert!(outcome.dataset.sources[1].is_failed());

        let coverage = outcome
            .quality_report
            .gate(crate::pipeline::processing::quality_gate::GateName::CoverageAnalysis)
            .unwrap();
        assert_eq!(coverage.status, GateStatus::Warn);
        assert!(coverage.details["source:beta"].starts_with("0.0%"));

        assert_eq!(datasets.lock().await.len(), 1);
        assert_eq!(aggregates.lock().await.len(), 1);
        assert_eq!(reports.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_preserves_config_order() {
        let mut beta = alpha_table();
        beta.source_id = "beta".to_string();
        beta.rows[0][3] = "Market Value (Rs. in Crores)".into();
        let input = InMemoryTables {
            tables: HashMap::from([("alpha".to_string(), alpha_table()), ("beta".to_string(), beta)]),
        };

        let config = Arc::new(test_config());
        let quality_gate =
            QualityGateUseCase::from_config(&config.quality, Box::new(MockQualityReportOutput::default())).unwrap();
        let use_case =
            RunUseCase::new(config, Box::new(input), Box::new(MockDatasetOutput::default()), quality_gate).unwrap();

        let outcome = use_case.run(NaiveDate::from_ymd_opt(2025, 7, 31).unwrap()).await.unwrap();
        let sources: Vec<&str> = outcome.dataset.holdings.iter().map(|h| h.row_id.source_id.as_str()).collect();
        assert_eq!(sources, vec!["alpha", "alpha", "beta", "beta"]);
        assert_eq!(outcome.dataset.shared_isins.len(), 2);
    }
}
