use thiserror::Error;

/// Main error type for the application.
#[derive(Error, Debug)]
pub enum AppError {
    /// Source file could not be imported (corrupt or unsupported).
    #[error("Import error: {0}")]
    Import(String),

    /// Resource not found error.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid format error.
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Transient translation failure (retries exhausted).
    #[error("Network error: {0}")]
    Network(String),

    /// Non-retryable translation provider failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Cache or session write failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// ZIP archive error.
    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// XML parsing error.
    #[error("XML parsing error: {0}")]
    Xml(#[from] roxmltree::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether this error must stop the user-facing operation.
    ///
    /// Only import failures block; translation and persistence problems
    /// degrade to original text or in-memory state.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            AppError::Import(_) | AppError::InvalidFormat(_) | AppError::Zip(_) | AppError::Xml(_)
        )
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Persistence(format!("Serialization failed: {}", e))
    }
}

/// Result type alias for the application.
pub type Result<T> = std::result::Result<T, AppError>;
