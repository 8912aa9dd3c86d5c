//! Failures of the shared-memory layer.

use pursuit_core::EnvError;
use thiserror::Error;

/// Error raised while mapping or signalling shared resources.
#[derive(Debug, Error)]
pub enum IpcError {
    /// The backing file could not be created, opened or mapped.
    #[error("failed to map shared resource {name}")]
    Io {
        /// Resource name.
        name: String,
        /// Underlying failure.
        #[source]
        source: std::io::Error,
    },
    /// The resource exists but is smaller than the negotiated layout.
    #[error("shared resource {name} holds {actual} bytes, expected at least {expected}")]
    SizeMismatch {
        /// Resource name.
        name: String,
        /// Bytes required.
        expected: usize,
        /// Bytes present.
        actual: u64,
    },
    /// A doorbell was rung while its single slot was still set.
    #[error("doorbell {0} was already rung")]
    DoorbellSaturated(String),
    /// The prefix cannot be used to name resources.
    #[error("invalid resource prefix {prefix:?}: {reason}")]
    InvalidPrefix {
        /// Offending prefix.
        prefix: String,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// A buffer was accessed before the handshake opened it.
    #[error("channel is not connected")]
    NotConnected,
}

impl From<IpcError> for EnvError {
    fn from(err: IpcError) -> Self {
        match &err {
            IpcError::Io { source, .. } => EnvError::Native(format!("{err}: {source}")),
            _ => EnvError::Native(err.to_string()),
        }
    }
}
