//! LurchHome error types

use thiserror::Error;

/// LurchHome error type
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Non-success status or broken connection on a transport
    #[error("Transport error: {0}")]
    Transport(String),

    /// Correlated call did not receive a reply in time
    #[error("Timeout waiting reply for request {id} ({method})")]
    Timeout { id: u64, method: String },

    /// Handshake or authentication violation
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The peer answered a correlated call with an error object
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// Stream, socket or command queue is gone
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Language model provider error
    #[error("Model error: {0}")]
    Model(String),

    /// Tool adapter error
    #[error("Tool error: {0}")]
    Tool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Result type alias for LurchHome operations
pub type Result<T> = std::result::Result<T, Error>;
