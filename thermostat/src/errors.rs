use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single `send_batch` call against an ingestion sink.
#[derive(Debug, Error)]
pub enum TransmissionError {
    #[error("send timed out after {0:?}")]
    Timeout(Duration),

    #[error("sink rejected batch with status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("sink rejected credentials")]
    Unauthorized,

    #[error("sink error: {0}")]
    Sink(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("sink is not connected: {0}")]
    Disconnected(String),

    #[error("sink is closed")]
    Closed,
}

impl TransmissionError {
    pub fn sink<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Sink(Box::new(err))
    }

    /// Whether another attempt at the same batch could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            // Retryable errors
            TransmissionError::Timeout(_) => true,
            TransmissionError::Sink(_) => true,
            TransmissionError::Disconnected(_) => true, // Client reconnects on its own
            TransmissionError::Status { status, .. } => *status == 429 || *status >= 500,

            // Non-retryable errors
            TransmissionError::Unauthorized => false, // Credentials won't fix themselves
            TransmissionError::Closed => false,
        }
    }
}
