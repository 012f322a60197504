use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR failed: {0}")]
    OcrFailed(String),

    #[error("OCR rate limited after {attempts} attempt(s): {details}")]
    RateLimited { attempts: u32, details: String },

    #[error("progress marker error: {0}")]
    Checkpoint(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index is not built; build or load an index first")]
    NotBuilt,

    #[error("index file {path} could not be accessed: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index file {path} is corrupt: {details}")]
    Corrupt { path: PathBuf, details: String },

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("invalid chunking config: {0}")]
    InvalidChunkConfig(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(String),
}

#[derive(Debug, Error)]
pub enum TutorError {
    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("generation failed: {0}")]
    Generation(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;
