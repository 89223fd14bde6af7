use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Document not found: {0}")]
    DocumentNotFound(uuid::Uuid),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Text extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Model output failed schema parse after repair: {0}")]
    MalformedModelOutput(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Invalid metadata field: {0}")]
    InvalidField(String),

    #[error("Invalid field value for {field}: {reason}")]
    InvalidFieldValue { field: String, reason: String },

    #[error("Entity not found: {0}")]
    EntityNotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
