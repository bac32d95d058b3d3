use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use crate::app::ports::RawTablePort;
use crate::domain::RawTable;

/// Reads `<dir>/<source_id>.json` raw tables written by the extraction step
pub struct JsonRawTableAdapter {
    input_dir: PathBuf,
}

impl JsonRawTableAdapter {
    pub fn new(input_dir: impl AsRef<Path>) -> Self {
        Self {
            input_dir: input_dir.as_ref().to_path_buf(),
        }
    }

    pub fn path_for(&self, source_id: &str) -> PathBuf {
        self.input_dir.join(format!("{}.json", source_id))
    }
}

#[async_trait]
impl RawTablePort for JsonRawTableAdapter {
    async fn load_table(&self, source_id: &str) -> anyhow::Result<RawTable> {
        let path = self.path_for(source_id);
        debug!("Loading raw table: {}", path.display());

        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading raw table {}", path.display()))?;
        let mut table: RawTable =
            serde_json::from_slice(&bytes).with_context(|| format!("parsing raw table {}", path.display()))?;

        if table.source_id.is_empty() {
            table.source_id = source_id.to_string();
        } else if table.source_id != source_id {
            anyhow::bail!(
                "raw table {} belongs to source '{}', expected '{}'",
                path.display(),
                table.source_id,
                source_id
            );
        }
        Ok(table)
    }
}
