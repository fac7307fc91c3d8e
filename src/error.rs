use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum IngestError {
    #[error("{0}")]
    Format(String),

    #[error("{0}")]
    Validation(String),

    #[error("Duplicate gene: {0}")]
    DuplicateGene(String),

    #[error("{0}")]
    DimensionMismatch(String),

    #[error("MTX file must be sorted: gene index {current} follows {previous} (line {line})")]
    OrderingViolation {
        line: usize,
        previous: usize,
        current: usize,
    },

    #[error("{0}")]
    UniquenessConflict(String),

    #[error("Score '{value}' is not valid for gene {gene}")]
    InvalidScore { gene: String, value: String },

    #[error("gene index {index} on line {line} is outside 1..={max}")]
    InvalidGeneIndex {
        line: usize,
        index: usize,
        max: usize,
    },

    #[error("barcode index {index} on line {line} is outside 1..={max}")]
    InvalidBarcodeIndex {
        line: usize,
        index: usize,
        max: usize,
    },

    #[error("invalid document id: {0}")]
    InvalidId(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("failed to write {collection} after {attempts} attempt(s)")]
    Persistence {
        collection: String,
        attempts: u32,
        #[source]
        source: GatewayError,
    },

    #[error("failed to encode record: {0}")]
    Encode(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("download failed: {0}")]
    Download(String),

    #[error("download returned status {status}: {message}")]
    DownloadStatus { status: u16, message: String },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("connection lost: {0}")]
    Reconnect(String),

    #[error("bulk write failed ({written} written, {failed} failed): {message}")]
    BulkWrite {
        written: usize,
        failed: usize,
        message: String,
    },

    #[error("{0}")]
    Other(String),
}

impl IngestError {
    pub fn is_preflight(&self) -> bool {
        matches!(
            self,
            IngestError::Format(_)
                | IngestError::Validation(_)
                | IngestError::DimensionMismatch(_)
                | IngestError::UniquenessConflict(_)
        )
    }
}
