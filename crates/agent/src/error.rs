//! Typed errors at the core-library boundary. Everything below this boundary
//! (pipeline construction, GStreamer/X11 plumbing) uses `anyhow`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("negotiation failed: {0}")]
    NegotiationFailed(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("capture failed: {0}")]
    CaptureFailed(String),

    #[error("encode failed: {0}")]
    EncodeFailed(String),

    #[error("transport failed: {0}")]
    TransportFailed(String),
}
