use huddle::protocol::ProtocolError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("invalid server url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("no transport configured")]
    NoTransports,

    #[error("all transports failed: {0}")]
    Exhausted(String),

    #[error("connect timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed")]
    Closed,
}
