use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A snapshot of one attached display, as returned by screen enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screen {
    pub index: u32,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Negotiable video codecs, in the order the registry may register them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodecKind {
    H264,
    Vp8,
}

impl CodecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecKind::H264 => "h264",
            CodecKind::Vp8 => "vp8",
        }
    }

    /// Parses the `video.encoder` config/CLI override string. Returns `None`
    /// for anything not recognized; `AgentConfig::validate` is what rejects
    /// an unknown value before it reaches here.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "h264" => Some(CodecKind::H264),
            "vp8" => Some(CodecKind::Vp8),
            _ => None,
        }
    }
}

/// `POST /api/sessions` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSessionRequest {
    pub screen_index: Option<u32>,
    pub fps: Option<u32>,
}

/// `POST /api/sessions` response body.
#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
}

/// `POST /api/sessions/:id/offer` request/response bodies.
#[derive(Debug, Clone, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OfferResponse {
    pub sdp: String,
}

/// Error body returned to the browser for negotiation/session failures.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
