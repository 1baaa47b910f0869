//! Error types for the cable hub
//!
//! Transport failures end a single connection and are reported through the
//! connection-closed hook. Nothing here is fatal to a room or to the server.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Cable hub errors
#[derive(Debug, Error)]
pub enum CableError {
    /// A join queue was full; the caller must close the transport
    #[error("Resource exhausted: {0} is full")]
    ResourceExhausted(&'static str),

    /// WebSocket protocol or IO error on a connection
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// No pong arrived before the read deadline
    #[error("Read deadline exceeded")]
    ReadTimeout,

    /// A frame could not be written before the write deadline
    #[error("Write deadline exceeded")]
    WriteTimeout,

    /// The accept hook refused the connection
    #[error("Connection rejected")]
    Rejected,

    /// The dispatcher is no longer receiving requests
    #[error("Server closed")]
    ServerClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl CableError {
    /// Check if this error is a transport-level failure of one connection
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CableError::Transport(_) | CableError::ReadTimeout | CableError::WriteTimeout
        )
    }
}
