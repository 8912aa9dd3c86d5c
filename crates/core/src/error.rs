//! Typed failures raised while serving the environment.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Domain error carried back to the client through the return-code buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EnvError {
    /// No request doorbell within the client timeout.
    #[error("client did not send a request within {0:?}")]
    ClientTimeout(Duration),
    /// No frame confirmation within the game timeout.
    #[error("simulation did not complete a frame within {0:?}")]
    GameTimeout(Duration),
    /// The captured frame cannot be turned into an observation.
    #[error("unsupported frame format: {0}")]
    UnsupportedFormat(String),
    /// A pressed action index has no matching input.
    #[error("action index {0} does not map to a known input")]
    UnknownAction(usize),
    /// STEP before the first reset or after the episode ended.
    #[error("environment must be reset before stepping")]
    EnvironmentNotReset,
    /// Anything else.
    #[error("native failure: {0}")]
    Native(String),
}

impl EnvError {
    /// Wire code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ClientTimeout(_) => ErrorCode::ClientTimeout,
            Self::GameTimeout(_) => ErrorCode::GameTimeout,
            Self::UnsupportedFormat(_) => ErrorCode::UnsupportedFormat,
            Self::UnknownAction(_) => ErrorCode::UnknownAction,
            Self::EnvironmentNotReset => ErrorCode::EnvironmentNotReset,
            Self::Native(_) => ErrorCode::NativeError,
        }
    }

    /// Fatal errors end the instruction loop; the rest are reported and the loop continues.
    pub fn is_fatal(&self) -> bool {
        self.code().is_fatal()
    }

    /// Wrap any displayable failure as a native error.
    pub fn native(err: impl std::fmt::Display) -> Self {
        Self::Native(err.to_string())
    }
}

impl From<std::io::Error> for EnvError {
    fn from(err: std::io::Error) -> Self {
        Self::Native(err.to_string())
    }
}
