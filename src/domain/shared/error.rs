//! Domain errors

use thiserror::Error;

/// Domain result type
pub type Result<T> = std::result::Result<T, TurnError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TurnError {
    /// Host name could not be resolved to an IPv4 socket address
    #[error("Bad host: {0}")]
    BadHost(String),

    /// The server refused an Allocate request
    #[error("Allocation rejected ({code}): {reason}")]
    AllocateError { code: u16, reason: String },

    /// The server refused some other request
    #[error("{request} rejected ({code}): {reason}")]
    RequestRejected {
        request: String,
        code: u16,
        reason: String,
    },

    #[error("Send error: {0}")]
    SendError(String),

    #[error("Receive error: {0}")]
    ReceiveError(String),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    /// OS-level socket failure; the channel is closed afterwards
    #[error("Socket failure: {0}")]
    SocketFatal(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Invalid state transition: {0}")]
    InvalidState(String),

    #[error("Channel is not listening")]
    NotListening,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for TurnError {
    fn from(err: config::ConfigError) -> Self {
        TurnError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for TurnError {
    fn from(err: serde_json::Error) -> Self {
        TurnError::Signaling(err.to_string())
    }
}
