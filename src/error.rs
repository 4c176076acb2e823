//! Error types for the axoncast broadcast node

use thiserror::Error;

use crate::message::ErrorCode;

/// Main error type for axoncast operations
#[derive(Error, Debug)]
pub enum AxonError {
    /// Request body could not be decoded
    #[error("Malformed request: {message}")]
    Malformed { message: String },

    /// A request other than `init` arrived before the node learned its id
    #[error("Node has not been initialized")]
    NotInitialized,

    /// Request kind this node does not serve
    #[error("Unsupported request type: {kind}")]
    Unsupported { kind: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// The outbound channel to the writer task is gone
    #[error("Outbound channel closed")]
    ChannelClosed,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Join handle errors
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl AxonError {
    /// Create a malformed-request error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Create an unsupported-request error
    pub fn unsupported(kind: impl Into<String>) -> Self {
        Self::Unsupported { kind: kind.into() }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Error code reported back to the requester in an `error` reply
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Malformed { .. } | Self::Serialization(_) => ErrorCode::MalformedRequest,
            Self::NotInitialized => ErrorCode::TemporarilyUnavailable,
            Self::Unsupported { .. } => ErrorCode::NotSupported,
            Self::Config { .. } | Self::ChannelClosed | Self::Io(_) | Self::Join(_) => {
                ErrorCode::Crash
            }
        }
    }
}
