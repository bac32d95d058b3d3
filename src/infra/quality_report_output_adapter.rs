use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::info;

use crate::app::ports::QualityReportOutputPort;
use crate::pipeline::processing::quality_gate::QualityReport;

pub const QUALITY_REPORT_FILE: &str = "quality_report.json";

/// File-based implementation of QualityReportOutputPort
pub struct FileQualityReportOutputAdapter {
    file_path: PathBuf,
}

impl FileQualityReportOutputAdapter {
    pub fn new(output_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let dir = output_dir.as_ref();
        fs::create_dir_all(dir)?;

        let file_path = dir.join(QUALITY_REPORT_FILE);
        info!("Creating quality report output file: {}", file_path.display());
        Ok(Self { file_path })
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }
}

#[async_trait::async_trait]
impl QualityReportOutputPort for FileQualityReportOutputAdapter {
    async fn write_quality_report(&self, report: &QualityReport) -> anyhow::Result<()> {
        let mut writer = BufWriter::new(File::create(&self.file_path)?);
        serde_json::to_writer_pretty(&mut writer, report)?;
        writer.flush()?;
        crate::observability::metrics::output::records_written(QUALITY_REPORT_FILE, report.gates.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityConfig;
    use crate::pipeline::processing::consolidate::Consolidator;
    use crate::pipeline::processing::quality_gate::QualityGateEngine;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_report_json() {
        let dir = TempDir::new().unwrap();
        let adapter = FileQualityReportOutputAdapter::new(dir.path()).unwrap();
        let dataset = Consolidator::consolidate(NaiveDate::from_ymd_opt(2025, 7, 31).unwrap(), vec![]);
        let report = QualityGateEngine::from_config(&QualityConfig::default())
            .unwrap()
            .evaluate(&dataset);

        adapter.write_quality_report(&report).await.unwrap();

        let read: QualityReport = serde_json::from_str(&fs::read_to_string(adapter.file_path()).unwrap()).unwrap();
        assert_eq!(read.run_id, report.run_id);
        assert_eq!(read.gates.len(), 8);
    }
}
