use thiserror::Error;

/// Errors surfaced by mixture construction and checkpoint restore.
///
/// Numeric query paths never produce these: per the error-handling contract,
/// contract violations on sample batches are logged no-ops and numerical
/// trouble is reported through [`crate::FpStatus`] / `Option` returns.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PriorError {
    /// A mixture must own at least one candidate model.
    #[error("Cannot build a one-of-n prior with no candidate models")]
    NoModels,

    /// An initial or restored model weight was non-finite or non-positive.
    #[error("Invalid model weight: {0}")]
    InvalidWeight(String),

    /// Checkpoint payload failed validation or deserialization.
    #[error("Bad checkpoint: {0}")]
    BadCheckpoint(String),

    /// Checkpoint was written by an incompatible version of this crate.
    #[error("Unsupported checkpoint version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
}

// Convenience constructors for common error patterns
impl PriorError {
    /// Create an invalid-weight error.
    pub fn invalid_weight(msg: impl Into<String>) -> Self {
        PriorError::InvalidWeight(msg.into())
    }

    /// Create a bad-checkpoint error.
    pub fn bad_checkpoint(msg: impl Into<String>) -> Self {
        PriorError::BadCheckpoint(msg.into())
    }
}
