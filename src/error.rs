use std::time::Duration;

use pir_crypto::CryptoError;
use thiserror::Error;
use uuid::Uuid;

use crate::executor::QueryFailure;

#[derive(Debug, Error)]
pub enum PirError {
    #[error("Invalid index: {0}")]
    InvalidIndex(String),

    #[error("Dataset too small: {size} records cannot hold a query of {required} entries")]
    DatasetTooSmall { size: usize, required: usize },

    #[error("Experiment {0} has no protocol configured")]
    ExperimentNotConfigured(Uuid),

    #[error("Experiment {0} has not been executed")]
    NotExecuted(Uuid),

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    #[error("Experiment not found: {0}")]
    ExperimentNotFound(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Every query of experiment {id} failed ({} failures)", .failures.len())]
    ExecutionFailed { id: Uuid, failures: Vec<QueryFailure> },

    #[error("Item timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker failed: {0}")]
    Worker(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PirError {
    /// Stable machine-readable code carried by API envelopes.
    pub fn code(&self) -> &'static str {
        match self {
            PirError::InvalidIndex(_) => "INVALID_INDEX",
            PirError::DatasetTooSmall { .. } => "DATASET_TOO_SMALL",
            PirError::ExperimentNotConfigured(_) => "EXPERIMENT_NOT_CONFIGURED",
            PirError::NotExecuted(_) => "NOT_EXECUTED",
            PirError::UnknownProtocol(_) => "UNKNOWN_PROTOCOL",
            PirError::ExperimentNotFound(_) => "EXPERIMENT_NOT_FOUND",
            PirError::InvalidParameter(_) => "INVALID_PARAMETER",
            PirError::InvalidState(_) => "INVALID_STATE",
            PirError::ExecutionFailed { .. } => "EXECUTION_FAILED",
            PirError::Timeout(_) => "TIMEOUT",
            PirError::Worker(_) => "WORKER_FAILED",
            PirError::Storage(_) => "STORAGE_ERROR",
            PirError::Crypto(e) => e.code(),
            PirError::Json(_) => "JSON_ERROR",
        }
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PirError {
    fn from(e: rusqlite::Error) -> Self {
        PirError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PirError>;
