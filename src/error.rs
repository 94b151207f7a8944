//! Error taxonomy for a connector session.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LinkError {
    /// Socket connect, read or write failed; ends the session.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),

    /// Capture device kept failing after the bounded restart.
    #[error("capture failure: {0}")]
    CaptureFailure(String),

    /// Hex payload could not be decoded, or the frame outgrew its limit.
    #[error("malformed hex input at index {index}: {reason}")]
    MalformedHexInput { index: usize, reason: String },

    #[error("playback failure: {0}")]
    PlaybackFailure(String),

    /// Clip file could not be created or written.
    #[error("clip storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl LinkError {
    /// Fatal errors end the whole session; the rest are logged and the
    /// session carries on.
    pub fn is_fatal(&self) -> bool {
        match self {
            LinkError::ConnectionFailure(_) => true,
            LinkError::CaptureFailure(_) => true,
            LinkError::MalformedHexInput { .. } => false,
            LinkError::PlaybackFailure(_) => false,
            LinkError::Storage(_) => false,
        }
    }

    /// A fresh connection can get past this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::ConnectionFailure(_))
    }
}

pub type Result<T> = std::result::Result<T, LinkError>;
