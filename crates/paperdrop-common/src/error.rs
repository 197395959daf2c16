use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaperdropError {
    /// Missing credentials or invalid configuration. Fatal before any run.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Network failure or non-2xx response from the search API or a document host.
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// Malformed feed entry or document.
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Summarization error: {0}")]
    Summarization(String),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("An ingestion run is already in progress")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PaperdropError {
    /// Wrap a transport-level `reqwest` failure as a fetch error.
    pub fn fetch(err: reqwest::Error) -> Self {
        PaperdropError::Fetch(err.to_string())
    }

    /// Wrap a transport-level `reqwest` failure as a store error.
    pub fn store(err: reqwest::Error) -> Self {
        PaperdropError::Store(err.to_string())
    }

    /// Whether a long-running trigger should give up instead of waiting for the next slot.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PaperdropError::Config(_) | PaperdropError::Io(_))
    }
}

impl From<serde_json::Error> for PaperdropError {
    fn from(err: serde_json::Error) -> Self {
        PaperdropError::Parse(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PaperdropError>;
