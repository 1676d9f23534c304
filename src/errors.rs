//! Error types for pools, activation and timeout tracking

use thiserror::Error;

/// Error type returned by caller-supplied lifecycle functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Factory creation failed: {0}")]
    FactoryCreation(String),

    #[error("Factory destruction failed: {0}")]
    FactoryDestroy(String),

    #[error("Destroying resource (generation {epoch}, slot {slot:?}) failed: {message}")]
    Destroy {
        epoch: u64,
        slot: Option<usize>,
        message: String,
    },

    #[error("Activation failed: {0}")]
    Activation(String),

    #[error("Operation was cancelled")]
    Cancelled,

    #[error("No Tokio runtime is available")]
    NoRuntime,

    #[error("Metrics export failed: {0}")]
    MetricsExport(String),

    #[error("Workload operation failed: {0}")]
    Workload(String),
}

impl PoolError {
    pub(crate) fn destroy(epoch: u64, slot: Option<usize>, source: &BoxError) -> Self {
        PoolError::Destroy {
            epoch,
            slot,
            message: source.to_string(),
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
