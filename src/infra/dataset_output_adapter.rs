use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::anyhow;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::ports::DatasetOutputPort;
use crate::domain::{ConsolidatedDataset, DuplicateHolding, SourceReport};
use crate::pipeline::processing::consolidate::AggregateReport;

pub const HOLDINGS_FILE: &str = "holdings.ndjson";
pub const MANIFEST_FILE: &str = "dataset_manifest.json";
pub const AGGREGATES_FILE: &str = "aggregate_metrics.json";

/// Everything about the dataset except the holdings themselves
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetManifest {
    pub schema_version: String,
    pub as_of_date: NaiveDate,
    pub written_at: DateTime<Utc>,
    pub total_rows: usize,
    /// SHA-256 of the holdings, see [`ConsolidatedDataset::fingerprint`]
    pub fingerprint: String,
    pub sources: Vec<SourceReport>,
    pub duplicates: Vec<DuplicateHolding>,
    pub shared_isins: std::collections::BTreeMap<String, Vec<String>>,
}

/// File-based implementation of DatasetOutputPort.
/// Holdings go to NDJSON, one per line, in dataset order. Each write replaces
/// the previous contents.
pub struct FileDatasetOutputAdapter {
    holdings_writer: Mutex<BufWriter<File>>,
    output_dir: PathBuf,
}

impl FileDatasetOutputAdapter {
    pub fn new(output_dir: impl AsRef<Path>) -> anyhow::Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;

        let holdings_path = output_dir.join(HOLDINGS_FILE);
        info!("Creating holdings output file: {}", holdings_path.display());

        let holdings_writer = BufWriter::new(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&holdings_path)?,
        );

        Ok(Self {
            holdings_writer: Mutex::new(holdings_writer),
            output_dir,
        })
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    fn write_json<T: Serialize>(&self, file_name: &str, value: &T) -> anyhow::Result<()> {
        let path = self.output_dir.join(file_name);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, value)?;
        writer.flush()?;
        info!("Wrote {}", path.display());
        Ok(())
    }
}

#[async_trait::async_trait]
impl DatasetOutputPort for FileDatasetOutputAdapter {
    async fn write_dataset(&self, dataset: &ConsolidatedDataset) -> anyhow::Result<()> {
        {
            let mut writer = self
                .holdings_writer
                .lock()
                .map_err(|_| anyhow!("holdings writer lock poisoned"))?;
            writer.flush()?;
            let file = writer.get_mut();
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            for holding in &dataset.holdings {
                let json_line = serde_json::to_string(holding)?;
                writeln!(writer, "{}", json_line)?;
            }
            writer.flush()?;
        }
        crate::observability::metrics::output::records_written(HOLDINGS_FILE, dataset.len());

        let manifest = DatasetManifest {
            schema_version: dataset.schema_version.clone(),
            as_of_date: dataset.as_of_date,
            written_at: Utc::now(),
            total_rows: dataset.len(),
            fingerprint: dataset.fingerprint()?,
            sources: dataset.sources.clone(),
            duplicates: dataset.duplicates.clone(),
            shared_isins: dataset.shared_isins.clone(),
        };
        self.write_json(MANIFEST_FILE, &manifest)
    }

    async fn write_aggregates(&self, aggregates: &AggregateReport) -> anyhow::Result<()> {
        self.write_json(AGGREGATES_FILE, aggregates)?;
        crate::observability::metrics::output::records_written(AGGREGATES_FILE, aggregates.metrics.len());
        Ok(())
    }
}
