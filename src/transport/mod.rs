pub mod channel;
pub mod soap;
pub mod tcp;
pub mod websocket;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A connection capable of exchanging text frames with the central system.
/// WebSocket and TCP implementations run a background reader; SOAP is
/// synchronous request/response only (see DESIGN.md Open Question #3).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_frame(&self, frame: &str) -> Result<(), TransportError>;
    async fn receive_frame(&self) -> Result<String, TransportError>;
    async fn close(&self) -> Result<(), TransportError>;
}
