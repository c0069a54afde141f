//! Error types for redo-log operations.

use thiserror::Error;

/// Result type alias using [`LogError`].
pub type Result<T> = std::result::Result<T, LogError>;

/// Error types for redo-log operations.
#[derive(Debug, Error)]
pub enum LogError {
    /// General I/O error on a log file.
    #[error("I/O error: {0}")]
    Io(String),

    /// The checkpoint age reached the log group capacity.
    ///
    /// The engine refuses further log admission until a checkpoint
    /// advances the last checkpoint LSN.
    #[error(
        "checkpoint age {age} exceeds the log group capacity {capacity}; \
         log writes are refused until a checkpoint completes"
    )]
    CapacityExceeded { age: u64, capacity: u64 },

    /// The smallest log group cannot accommodate the reserved headroom
    /// for the configured thread concurrency.
    #[error(
        "log group capacity {capacity} is too small for the reserved \
         headroom {needed}; lower the thread concurrency or enlarge the \
         log files"
    )]
    GroupTooSmall { needed: u64, capacity: u64 },

    /// A bounded wait loop made no progress.
    #[error("retry limit exhausted while waiting for {0}")]
    RetryExhausted(&'static str),

    /// A log block or checkpoint record failed checksum verification.
    #[error("checksum mismatch in log block {block_no}")]
    ChecksumMismatch { block_no: u32 },

    /// A mutating operation was attempted in read-only mode.
    #[error("the log engine is in read-only mode")]
    ReadOnly,

    /// Invalid engine or group configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
