//! Session: the per-peer state machine. Owns the peer connection, the
//! outbound track (via Streamer), and the PLI ticker; reacts to ICE
//! connection state changes and tears itself down fully on disconnect or
//! failure — a fresh `create_session` call is the only recovery path.

use crate::encoder::EncoderRegistry;
use crate::negotiator::negotiate;
use crate::peer::WebRtcPeer;
use crate::streamer::Streamer;
use crate::capture::Grabber;
use crate::display::DisplayProvider;
use crate::error::StreamError;
use anyhow::bail;
use rsa_protocol::{CodecKind, Screen};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;

const PLI_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Negotiating,
    Streaming,
    Closed,
}

struct SessionInner {
    peer: Arc<WebRtcPeer>,
    streamer: Arc<Streamer>,
    pli_handle: JoinHandle<()>,
}

pub struct Session {
    pub id: Uuid,
    screen: Screen,
    fps: u32,
    stun_url: String,
    forced_encoder: Option<CodecKind>,
    registry: Arc<EncoderRegistry>,
    display: Arc<DisplayProvider>,
    state: Mutex<SessionState>,
    inner: Mutex<Option<SessionInner>>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: Uuid,
        screen: Screen,
        fps: u32,
        stun_url: String,
        forced_encoder: Option<CodecKind>,
        registry: Arc<EncoderRegistry>,
        display: Arc<DisplayProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            screen,
            fps,
            stun_url,
            forced_encoder,
            registry,
            display,
            state: Mutex::new(SessionState::Negotiating),
            inner: Mutex::new(None),
        })
    }

    /// Negotiates the offer and returns the answer SDP. On any failure the
    /// session is left closed, matching the idempotent-failure contract.
    #[instrument(skip(self, sdp), fields(session = %self.id))]
    pub async fn process_offer(self: &Arc<Self>, sdp: &str) -> anyhow::Result<String> {
        match self.process_offer_inner(sdp).await {
            Ok(answer) => Ok(answer),
            Err(e) => {
                self.close().await;
                Err(e)
            }
        }
    }

    async fn process_offer_inner(self: &Arc<Self>, sdp: &str) -> anyhow::Result<String> {
        {
            let state = self.state.lock().unwrap();
            if *state != SessionState::Negotiating {
                bail!("session is not in the negotiating state");
            }
        }

        let forced = self.forced_encoder;
        let negotiated = negotiate(sdp, |kind| match forced {
            Some(forced_kind) => kind == forced_kind && self.registry.supports(kind),
            None => self.registry.supports(kind),
        })?;

        let peer = Arc::new(
            WebRtcPeer::new(negotiated.codec, negotiated.direction, &self.stun_url, self.id).await?,
        );
        let encoder = self.registry.new_encoder(
            negotiated.codec,
            (self.screen.width, self.screen.height),
            self.fps,
        )?;
        let grabber: Grabber = self.display.grabber(self.screen, self.fps)?;
        let streamer = Arc::new(Streamer::new(
            self.id,
            Arc::new(grabber),
            Arc::new(encoder),
            Arc::clone(&peer),
            self.fps,
        ));

        let answer = peer.handle_offer(sdp).await?;

        let weak_self: Weak<Session> = Arc::downgrade(self);
        peer.on_ice_connection_state_change(move |state| {
            let Some(session) = weak_self.upgrade() else {
                return;
            };
            match state {
                RTCIceConnectionState::Connected => {
                    tokio::spawn(async move { session.start_streaming().await });
                }
                RTCIceConnectionState::Disconnected | RTCIceConnectionState::Failed => {
                    tokio::spawn(async move { session.close().await });
                }
                _ => {}
            }
        });

        let pli_handle = spawn_pli_ticker(Arc::clone(&peer));

        *self.inner.lock().unwrap() = Some(SessionInner {
            peer,
            streamer,
            pli_handle,
        });

        Ok(answer)
    }

    #[instrument(skip(self), fields(session = %self.id))]
    async fn start_streaming(self: Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != SessionState::Negotiating {
                return;
            }
            *state = SessionState::Streaming;
        }

        let streamer = {
            let inner = self.inner.lock().unwrap();
            inner.as_ref().map(|i| Arc::clone(&i.streamer))
        };

        if let Some(streamer) = streamer {
            if let Err(e) = streamer.start() {
                error!(error = %e, session = %self.id, "failed to start streamer");
                self.close().await;
                return;
            }
            info!(session = %self.id, "session streaming");
        }
    }

    /// Idempotent: safe to call from any task, including the ICE callback
    /// that itself triggered the close. All three teardown steps run even if
    /// one of them fails; failures are logged, not propagated.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn close(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SessionState::Closed {
                return;
            }
            *state = SessionState::Closed;
        }

        let inner = self.inner.lock().unwrap().take();
        let Some(inner) = inner else {
            return;
        };

        inner.pli_handle.abort();
        inner.streamer.close();
        if let Err(e) = inner.peer.close().await {
            let stream_err = StreamError::TransportFailed(e.to_string());
            warn!(error = %stream_err, session = %self.id, "error closing peer connection");
        }

        info!(session = %self.id, "session closed");
    }
}

fn spawn_pli_ticker(peer: Arc<WebRtcPeer>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(PLI_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = peer.write_pli().await {
                warn!(error = %e, "PLI send failed, stopping ticker");
                break;
            }
        }
    })
}
