//! Error types for the chronicle engine.
//!
//! All fallible chronicle operations return `ChronicleResult<T>`.  Every
//! variant maps to a stable `ErrorCode` that callers can match on without
//! parsing messages.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Stable, caller-matchable error identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    Io,
    Validation,
    LockTimeout,
    Halt,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Io => "IO",
            ErrorCode::Validation => "VALIDATION",
            ErrorCode::LockTimeout => "LOCK_TIMEOUT",
            ErrorCode::Halt => "HALT",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unified error type for the chronicle engine.
#[derive(Debug, Error)]
pub enum ChronicleError {
    /// A filesystem operation failed.
    ///
    /// Reading a chronicle that does not exist is NOT an error (an absent
    /// log is an empty log); every other I/O failure lands here.
    #[error("i/o error during {operation} on '{}': {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A malformed chronicle path or event shape.  Raised before any lock
    /// is taken, so nothing on disk has changed.
    #[error("validation failed: {reason}")]
    Validation { reason: String },

    /// The chronicle lock could not be acquired in time.  The target file is
    /// untouched and the call is safe to retry.
    #[error("timed out after {waited_ms}ms waiting for lock '{}'", lock_path.display())]
    LockTimeout { lock_path: PathBuf, waited_ms: u64 },

    /// An integrity violation: a broken causal link or an event whose id
    /// does not match its content.
    #[error("integrity violation: {reason}")]
    Halt { reason: String },

    /// A configuration file is missing, unreadable, or malformed.
    #[error("configuration error: {reason}")]
    Config { reason: String },
}

impl ChronicleError {
    /// Build an `Io` error with the operation name and path attached.
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ChronicleError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        ChronicleError::Validation {
            reason: reason.into(),
        }
    }

    /// The stable identifier for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            ChronicleError::Io { .. } => ErrorCode::Io,
            ChronicleError::Validation { .. } | ChronicleError::Config { .. } => {
                ErrorCode::Validation
            }
            ChronicleError::LockTimeout { .. } => ErrorCode::LockTimeout,
            ChronicleError::Halt { .. } => ErrorCode::Halt,
        }
    }

    /// True when retrying the same call may succeed without any change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ChronicleError::LockTimeout { .. })
    }
}

/// Convenience alias used throughout the chronicle crates.
pub type ChronicleResult<T> = Result<T, ChronicleError>;
