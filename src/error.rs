use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source '{source_id}' has no header matching required field(s): {}", .fields.join(", "))]
    UnmappedField { source_id: String, fields: Vec<String> },

    #[error("Source '{source_id}' has ambiguous columns for field '{field}': {}", .columns.join(" | "))]
    AmbiguousAlias {
        source_id: String,
        field: String,
        columns: Vec<String>,
    },

    #[error("Malformed row {row}: {reason}")]
    MalformedRow { row: String, reason: String },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Output error: {0}")]
    Output(String),
}

impl PipelineError {
    /// Errors that abort a whole run rather than a single source or row.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            PipelineError::UnmappedField { .. }
                | PipelineError::AmbiguousAlias { .. }
                | PipelineError::MalformedRow { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
