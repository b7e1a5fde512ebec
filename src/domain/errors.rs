use thiserror::Error;

use crate::domain::entities::connection_state::ConnectionState;

/// Errors surfaced by the public `ConnectionManager` API.
///
/// Transport failures after a connection attempt has started are never
/// returned here: they are absorbed by the reconnect policy and only logged.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConnectionError {
    #[error("Invalid connection URL: {0}")]
    InvalidUrl(String),

    #[error("Not connected (state: {0})")]
    NotConnected(ConnectionState),

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("Failed to serialize outbound message: {0}")]
    Serialization(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("Failed to open transport: {0}")]
    OpenFailed(String),

    #[error("Failed to send frame: {0}")]
    SendFailed(String),

    #[error("Socket is closed")]
    Closed,
}

/// Why an inbound frame was dropped before reaching any handler.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    #[error("Frame is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Frame payload is not a JSON object")]
    NotAnObject,

    #[error("Frame is missing a string `type` field")]
    MissingType,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BatchSendError {
    #[error("Network error while sending batch: {0}")]
    Network(String),

    #[error("Batch rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Failed to serialize batch: {0}")]
    Serialization(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {name}: '{value}' ({reason})")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },
}

impl From<serde_json::Error> for ConnectionError {
    fn from(e: serde_json::Error) -> Self {
        ConnectionError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for ConnectionError {
    fn from(e: url::ParseError) -> Self {
        ConnectionError::InvalidUrl(e.to_string())
    }
}
