// Error types for the duplex voice pipeline

use thiserror::Error;
use tokio_tungstenite::tungstenite;

/// Microphone / speaker acquisition or stream failure. Fatal to the session.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("no {0} device available")]
    NotFound(&'static str),

    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("audio device error: {0:#}")]
    Backend(#[from] anyhow::Error),
}

/// Send / receive failure on the duplex channel. Triggers teardown, never a retry.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    Connect(#[source] tungstenite::Error),

    #[error("send failed: {0}")]
    Send(#[source] tungstenite::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] tungstenite::Error),

    #[error("outbound encode failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("outbound queue full")]
    QueueFull,

    #[error("channel closed")]
    Closed,
}

/// Malformed inbound message. Logged and dropped, never fatal.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("PCM payload must contain an even number of bytes (got {0})")]
    OddPcmByteLength(usize),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config read failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse failed: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Errors that end a session. The owner tears down and offers a retry.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Short user-facing status; never the raw error detail.
    pub fn status_text(&self) -> &'static str {
        match self {
            SessionError::Device(_) => "Microphone or speaker unavailable, please retry",
            SessionError::Transport(_) => "Connection lost",
            SessionError::Config(_) => "Configuration error",
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;
