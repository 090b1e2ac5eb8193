//! Error types for LiveCast.

use thiserror::Error;

/// Main error type for LiveCast operations.
///
/// Per-tick, per-consumer failures are isolated to the consumer and the tick
/// they occurred on. Only setup failures (initial pool allocation, surface
/// registration, attaching with an unsupported format) are fatal to the
/// caller that triggered them.
#[derive(Error, Debug)]
pub enum LiveCastError {
    /// Pool or cache has no room. Recovered locally by dropping the unit.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// The consumer was detached while a delivery to it was being prepared.
    #[error("Consumer {0} unavailable")]
    ConsumerUnavailable(u64),

    /// The format adapter cannot produce the requested format.
    #[error("Format mismatch: cannot convert {from} to {to}")]
    FormatMismatch { from: String, to: String },

    /// The pacing clock skipped one or more ticks.
    #[error("Deadline missed by {late_ticks} tick(s)")]
    DeadlineMissed { late_ticks: u64 },

    /// The zero-copy bridge could not map a surface. Retry on the next tick.
    #[error("Device mapping failed: {0}")]
    DeviceMappingFailed(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Pipeline is shut down")]
    ShutDown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LiveCastError {
    /// Shorthand for a pool exhaustion error.
    pub fn pool_exhausted(max_outstanding: usize) -> Self {
        Self::ResourceExhausted(format!(
            "buffer pool exhausted ({max_outstanding} buffers outstanding)"
        ))
    }

    /// Whether the same operation may succeed on a later tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DeviceMappingFailed(_) | Self::ResourceExhausted(_)
        )
    }

    /// Whether the error ends the attachment of the consumer that hit it.
    pub fn is_fatal_to_consumer(&self) -> bool {
        matches!(self, Self::FormatMismatch { .. })
    }
}

/// Result type alias for LiveCast operations.
pub type Result<T> = std::result::Result<T, LiveCastError>;
