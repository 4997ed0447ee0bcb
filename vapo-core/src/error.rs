//! Errors in the library.
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the training engine.
///
/// Configuration errors abort a run before the loop starts.
/// [`VapoError::InsufficientData`] is the only variant the [`Trainer`] recovers from.
///
/// [`Trainer`]: crate::Trainer
#[derive(Error, Debug)]
pub enum VapoError {
    /// A batch was requested before enough transitions were stored.
    #[error("Insufficient data in the replay buffer: requested {requested}, available {available}")]
    InsufficientData {
        /// Requested batch size.
        requested: usize,
        /// Number of stored transitions.
        available: usize,
    },

    /// The checkpoint file does not exist.
    #[error("Checkpoint not found: {0:?}")]
    CheckpointNotFound(PathBuf),

    /// The batch size exceeds the capacity of the replay buffer.
    #[error("Batch size {batch_size} exceeds replay buffer capacity {capacity}")]
    BatchSizeExceedsCapacity {
        /// Batch size of the agent.
        batch_size: usize,
        /// Capacity of the replay buffer.
        capacity: usize,
    },

    /// The action dimension of the policy differs from the declared action space.
    #[error("Action dimension mismatch: policy {policy}, environment {env}")]
    ActionDimMismatch {
        /// Output dimension of the policy.
        policy: usize,
        /// Dimension of the action space.
        env: usize,
    },

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The checkpoint does not match the architecture it is restored into.
    #[error("Incompatible checkpoint: {0}")]
    IncompatibleCheckpoint(String),

    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// Record value type error.
    #[error("Record value type error: {0}")]
    RecordValueTypeError(String),
}

impl VapoError {
    /// Returns `true` if the error is [`VapoError::InsufficientData`].
    pub fn is_insufficient_data(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<VapoError>(),
            Some(VapoError::InsufficientData { .. })
        )
    }
}
