use async_trait::async_trait;

use crate::domain::{ConsolidatedDataset, RawTable};
use crate::pipeline::processing::consolidate::AggregateReport;
use crate::pipeline::processing::quality_gate::QualityReport;

/// Supplies the raw cell grid extracted from one source's spreadsheet
#[async_trait]
pub trait RawTablePort: Send + Sync {
    async fn load_table(&self, source_id: &str) -> anyhow::Result<RawTable>;
}

#[async_trait]
pub trait DatasetOutputPort: Send + Sync {
    async fn write_dataset(&self, dataset: &ConsolidatedDataset) -> anyhow::Result<()>;
    async fn write_aggregates(&self, aggregates: &AggregateReport) -> anyhow::Result<()>;
}

#[async_trait]
pub trait QualityReportOutputPort: Send + Sync {
    async fn write_quality_report(&self, report: &QualityReport) -> anyhow::Result<()>;
}
