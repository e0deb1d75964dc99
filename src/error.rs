use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EnrichError>;

#[derive(Debug, Error)]
pub enum EnrichError {
    #[error("Input file {0:?} does not exist")]
    NotFound(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("No response stored; call request() first")]
    NoResponse,

    #[error("Output already created; cannot add headers {0:?}")]
    HeadersFrozen(Vec<String>),

    #[error("No headers for output")]
    NoHeaders,

    #[error("Column '{0}' not found in input header")]
    MissingColumn(String),

    #[error("Page error: {0}")]
    InvalidPage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for EnrichError {
    fn from(err: reqwest::Error) -> Self {
        EnrichError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for EnrichError {
    fn from(err: serde_json::Error) -> Self {
        EnrichError::Decode(err.to_string())
    }
}
