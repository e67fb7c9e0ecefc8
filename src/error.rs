//! Unified error types for demix
//!
//! Error strategy:
//! - Configuration errors (bad overlap, empty bag, mismatched sources):
//!   detected before any compute is dispatched, never retried.
//! - Resource errors (batch too large for the device): retried locally via
//!   batch-size halving down to a floor, then surfaced as `ResourceExhausted`.
//! - Invariant violations (non-positive stitch weight): always a planning
//!   bug, never retried, fatal.
//! - Cancellation: cooperative, observed at batch boundaries, no partial
//!   result is returned.

use thiserror::Error;

/// Top-level error type for demix operations
#[derive(Debug, Error)]
pub enum DemixError {
    // =========================================================================
    // Configuration errors - rejected before any inference runs
    // =========================================================================
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error(
        "Models in the bag disagree on source names: expected {expected:?}, found {found:?}\n  \
         Every model in an ensemble must declare the same set of output sources"
    )]
    ModelSetMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    // =========================================================================
    // Resource errors - surfaced only after halve-and-retry hits the floor
    // =========================================================================
    #[error(
        "Compute resources exhausted at batch size {batch_size}: {reason}\n  \
         Tip: lower `batch_size`, enable `cpu_fallback`, or shorten the model segment"
    )]
    ResourceExhausted { batch_size: usize, reason: String },

    // =========================================================================
    // Invariant violations - fatal, indicate a planning bug
    // =========================================================================
    #[error(
        "Stitch weight sum is not strictly positive at sample {index}: \
         a planned segment failed to cover this position"
    )]
    ArithmeticInvariantViolated { index: usize },

    // =========================================================================
    // Cancellation and opaque model failures
    // =========================================================================
    #[error("Separation request was cancelled")]
    Cancelled,

    #[error("Model inference failed: {reason}")]
    Inference { reason: String },
}

/// Result type alias for demix operations
pub type Result<T> = std::result::Result<T, DemixError>;

impl DemixError {
    /// Returns true if this error was detected before any compute ran
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            DemixError::Config(_) | DemixError::ModelSetMismatch { .. }
        )
    }

    /// Returns true if this error is a device-capacity failure that a caller
    /// might address by reconfiguring (smaller batches, CPU fallback)
    pub fn is_resource(&self) -> bool {
        matches!(self, DemixError::ResourceExhausted { .. })
    }

    /// Create a configuration error
    pub fn config(reason: impl Into<String>) -> Self {
        DemixError::Config(reason.into())
    }

    /// Create an inference error from an opaque model failure
    pub fn inference(reason: impl Into<String>) -> Self {
        DemixError::Inference {
            reason: reason.into(),
        }
    }
}
