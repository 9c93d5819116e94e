use crate::cancel::CancelReason;
use std::error::Error as StdError;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Error produced by a name sanitizer.
pub type BoxError = Box<dyn StdError + Send + Sync>;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("Invalid shard pool size {0}: must be greater than zero")]
    InvalidPoolSize(usize),

    #[error("Failed to derive lock file name for key {key:?}: {source}")]
    Sanitize {
        key: String,
        source: Arc<dyn StdError + Send + Sync>,
    },

    #[error("Failed to acquire lock on {path}: {reason}")]
    Cancelled { path: PathBuf, reason: CancelReason },

    #[error("Lock handle for {0} has failed; create a new handle")]
    HandleFailed(PathBuf),

    #[error("Failed to create lock file {path}: {source}")]
    LockCreationFailed { path: PathBuf, source: io::Error },

    #[error("Failed to acquire lock on {path}: {source}")]
    LockAcquisitionFailed { path: PathBuf, source: io::Error },

    #[error("Failed to release lock on {path}: {source}")]
    LockReleaseFailed { path: PathBuf, source: io::Error },

    #[error("Unsupported: {0}")]
    Unsupported(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Coarse classification of a [`LockError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid construction parameters.
    Configuration,
    /// The name sanitizer rejected the key.
    Sanitization,
    /// The cancellation token fired while waiting for contention to clear.
    Cancelled,
    /// Unexpected filesystem or OS failure.
    Resource,
    /// The strategy is not available on this platform.
    Unsupported,
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockError::InvalidPoolSize(_) => ErrorKind::Configuration,
            LockError::Sanitize { .. } => ErrorKind::Sanitization,
            LockError::Cancelled { .. } => ErrorKind::Cancelled,
            LockError::Unsupported(_) => ErrorKind::Unsupported,
            LockError::HandleFailed(_)
            | LockError::LockCreationFailed { .. }
            | LockError::LockAcquisitionFailed { .. }
            | LockError::LockReleaseFailed { .. }
            | LockError::Io(_) => ErrorKind::Resource,
        }
    }

    /// The underlying OS error, untouched, if this error carries one.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            LockError::LockCreationFailed { source, .. }
            | LockError::LockAcquisitionFailed { source, .. }
            | LockError::LockReleaseFailed { source, .. }
            | LockError::Io(source) => Some(source),
            _ => None,
        }
    }

    /// The cancellation reason, if the acquire was cancelled.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            LockError::Cancelled { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == ErrorKind::Cancelled
    }

    pub(crate) fn sanitize(key: &str, source: Arc<dyn StdError + Send + Sync>) -> Self {
        LockError::Sanitize {
            key: key.to_string(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, LockError>;
