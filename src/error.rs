//! Error types for live sessions.

use thiserror::Error;

/// Result type for live session operations.
pub type Result<T> = std::result::Result<T, LiveError>;

/// Errors that can occur during a live session.
#[derive(Error, Debug)]
pub enum LiveError {
    /// Microphone could not be acquired (no device, permission denied).
    ///
    /// Reported when capture starts, never mid-stream. Non-fatal to the
    /// rest of the session.
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// WebSocket connection error (failed to connect, or dropped).
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// Malformed or unparseable protocol message.
    #[error("protocol message error: {0}")]
    MessageError(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    ConfigError(String),

    /// Audio data did not match the expected format.
    #[error("audio format error: {0}")]
    AudioFormatError(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic IO error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl LiveError {
    /// Create a new capture-unavailable error.
    pub fn capture<S: Into<String>>(msg: S) -> Self {
        Self::CaptureUnavailable(msg.into())
    }

    /// Create a new connection error.
    pub fn connection<S: Into<String>>(msg: S) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a new protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::MessageError(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a new audio format error.
    pub fn audio<S: Into<String>>(msg: S) -> Self {
        Self::AudioFormatError(msg.into())
    }
}
