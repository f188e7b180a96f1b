//! Embedded HTTP signaling: a thin REST surface over the core session
//! contract (`list_screens`, `create_session`, `process_offer`, `close`),
//! plus a static fallback for the bundled web client.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use rsa_protocol::{
    CodecKind, CreateSessionRequest, CreateSessionResponse, ErrorResponse, OfferRequest,
    OfferResponse, Screen,
};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use crate::display::DisplayProvider;
use crate::encoder::EncoderRegistry;
use crate::error::StreamError;
use crate::session::Session;

const STATIC_DIR: &str = "web/dist";

pub struct AppState {
    pub registry: Arc<EncoderRegistry>,
    pub display: Arc<DisplayProvider>,
    pub stun_url: String,
    pub default_fps: u32,
    pub default_screen: u32,
    pub forced_encoder: Option<CodecKind>,
    pub sessions: Mutex<HashMap<Uuid, Arc<Session>>>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/api/screens", get(list_screens))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}/offer", post(offer))
        .route("/api/sessions/{id}/close", post(close_session))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&state));

    let serve_dir = ServeDir::new(STATIC_DIR);
    api.fallback_service(serve_dir)
}

async fn list_screens(State(state): State<Arc<AppState>>) -> Response {
    match state.display.screens() {
        Ok(screens) => Json(screens).into_response(),
        Err(e) => {
            warn!(error = %e, "failed to enumerate screens");
            error_response(StatusCode::SERVICE_UNAVAILABLE, "screen enumeration failed")
        }
    }
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateSessionRequest>,
) -> Response {
    let (screen, fps) = match validate_session_request(&state, &req) {
        Ok(pair) => pair,
        Err(e) => {
            warn!(error = %e, "session request rejected");
            return error_response(StatusCode::SERVICE_UNAVAILABLE, &e.to_string());
        }
    };

    let id = Uuid::new_v4();
    let session = Session::new(
        id,
        screen,
        fps,
        state.stun_url.clone(),
        state.forced_encoder,
        Arc::clone(&state.registry),
        Arc::clone(&state.display),
    );

    state.sessions.lock().unwrap().insert(id, session);
    info!(session = %id, screen = screen.index, fps, "session created");

    Json(CreateSessionResponse { session_id: id }).into_response()
}

/// Resolves the requested screen and fps, or rejects the request as
/// `ResourceUnavailable` if there is no screen to capture or the forced
/// encoder preference names a codec this build doesn't compile in.
fn validate_session_request(
    state: &AppState,
    req: &CreateSessionRequest,
) -> Result<(Screen, u32), StreamError> {
    let screens = state
        .display
        .screens()
        .map_err(|e| StreamError::ResourceUnavailable(e.to_string()))?;

    if screens.is_empty() {
        return Err(StreamError::ResourceUnavailable("no screens available".to_string()));
    }

    if let Some(kind) = state.forced_encoder {
        if !state.registry.supports(kind) {
            return Err(StreamError::ResourceUnavailable(format!(
                "forced encoder {} is not compiled into this build",
                kind.as_str()
            )));
        }
    }

    let requested_index = req.screen_index.unwrap_or(state.default_screen);
    let screen = screens
        .iter()
        .find(|s| s.index == requested_index)
        .copied()
        .unwrap_or(screens[0]);

    let fps = req.fps.unwrap_or(state.default_fps).clamp(1, 240);

    Ok((screen, fps))
}

async fn offer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<OfferRequest>,
) -> Response {
    let session = {
        let sessions = state.sessions.lock().unwrap();
        sessions.get(&id).cloned()
    };

    let Some(session) = session else {
        return error_response(StatusCode::NOT_FOUND, "unknown session");
    };

    match session.process_offer(&req.sdp).await {
        Ok(sdp) => Json(OfferResponse { sdp }).into_response(),
        Err(e) => {
            warn!(session = %id, error = %e, "negotiation failed");
            error_response(StatusCode::BAD_REQUEST, &e.to_string())
        }
    }
}

async fn close_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    let session = state.sessions.lock().unwrap().remove(&id);
    if let Some(session) = session {
        session.close().await;
    }
    StatusCode::NO_CONTENT.into_response()
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse { error: message.to_string() })).into_response()
}
