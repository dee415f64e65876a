// src/core/errors.rs

//! Defines the primary error type for the client.

use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the client.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete data in stream")]
    IncompleteData,

    #[error("Protocol Error: {0}")]
    Protocol(String),

    /// An error reply (`-ERR ...`) received from the server, reported verbatim.
    #[error("{0}")]
    Server(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Connection is in a disconnected state and reconnect is disabled. Commands are not accepted.")]
    ReconnectDisabled,

    #[error("Command was cancelled: {0}")]
    Cancelled(String),

    #[error("Internal Client Error: {0}")]
    Internal(String),
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
// We wrap it in an Arc to allow for cheap, shared cloning.
impl Clone for ClientError {
    fn clone(&self) -> Self {
        match self {
            ClientError::Io(e) => ClientError::Io(Arc::clone(e)),
            ClientError::IncompleteData => ClientError::IncompleteData,
            ClientError::Protocol(s) => ClientError::Protocol(s.clone()),
            ClientError::Server(s) => ClientError::Server(s.clone()),
            ClientError::ConnectionClosed => ClientError::ConnectionClosed,
            ClientError::ReconnectDisabled => ClientError::ReconnectDisabled,
            ClientError::Cancelled(s) => ClientError::Cancelled(s.clone()),
            ClientError::Internal(s) => ClientError::Internal(s.clone()),
        }
    }
}

impl PartialEq for ClientError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (ClientError::Io(e1), ClientError::Io(e2)) => e1.to_string() == e2.to_string(),
            (ClientError::Protocol(s1), ClientError::Protocol(s2)) => s1 == s2,
            (ClientError::Server(s1), ClientError::Server(s2)) => s1 == s2,
            (ClientError::Cancelled(s1), ClientError::Cancelled(s2)) => s1 == s2,
            (ClientError::Internal(s1), ClientError::Internal(s2)) => s1 == s2,
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ClientError {
    fn from(e: std::io::Error) -> Self {
        ClientError::Io(Arc::new(e))
    }
}

impl From<std::str::Utf8Error> for ClientError {
    fn from(e: std::str::Utf8Error) -> Self {
        ClientError::Protocol(format!("invalid UTF-8 in frame: {e}"))
    }
}
