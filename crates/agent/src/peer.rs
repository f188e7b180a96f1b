//! Thin WebRTC peer wrapper: one outbound video track, one codec, no audio,
//! no data channel. Signaling is non-trickle — `handle_offer` waits for ICE
//! gathering to finish and returns a complete answer in a single call.

use anyhow::Context;
use rsa_protocol::CodecKind;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_H264, MIME_TYPE_VP8, MediaEngine};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp_transceiver::RTCPFeedback;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use crate::negotiator::TrackDirection;

const H264_PROFILE_LEVEL_ID: &str = "42e01f";

pub struct WebRtcPeer {
    peer_connection: Arc<RTCPeerConnection>,
    video_track: Arc<TrackLocalStaticSample>,
    video_sender: Arc<RTCRtpSender>,
}

impl WebRtcPeer {
    pub async fn new(
        codec: CodecKind,
        direction: TrackDirection,
        stun_url: &str,
        session_id: uuid::Uuid,
    ) -> anyhow::Result<Self> {
        let mut media_engine = MediaEngine::default();

        let feedback = vec![
            RTCPFeedback {
                typ: "goog-remb".into(),
                parameter: "".into(),
            },
            RTCPFeedback {
                typ: "ccm".into(),
                parameter: "fir".into(),
            },
            RTCPFeedback {
                typ: "nack".into(),
                parameter: "".into(),
            },
            RTCPFeedback {
                typ: "nack".into(),
                parameter: "pli".into(),
            },
        ];

        let capability = match codec {
            CodecKind::H264 => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_H264.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: format!(
                    "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id={H264_PROFILE_LEVEL_ID}"
                ),
                rtcp_feedback: feedback.clone(),
            },
            CodecKind::Vp8 => RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: "".to_string(),
                rtcp_feedback: feedback.clone(),
            },
        };

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: capability.clone(),
                payload_type: 102,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: vec![stun_url.to_string()],
                ..Default::default()
            }],
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);

        let video_track = Arc::new(TrackLocalStaticSample::new(
            capability,
            "remote-screen".to_string(),
            session_id.to_string(),
        ));

        let video_sender = match direction {
            // recvonly offer: the browser only receives, so this side's
            // transceiver must be send-only rather than the bidirectional
            // sender `add_track` would negotiate.
            TrackDirection::SendOnly => {
                let init = RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendonly,
                    send_encodings: Vec::new(),
                };
                let transceiver = peer_connection
                    .add_transceiver_from_track(
                        Arc::clone(&video_track) as Arc<dyn TrackLocal + Send + Sync>,
                        Some(init),
                    )
                    .await
                    .context("failed to add send-only video transceiver")?;
                transceiver.sender().await
            }
            TrackDirection::SendRecv => peer_connection
                .add_track(Arc::clone(&video_track) as Arc<dyn TrackLocal + Send + Sync>)
                .await
                .context("failed to add video track")?,
        };

        info!(codec = codec.as_str(), direction = ?direction, "webrtc peer created");

        Ok(Self {
            peer_connection,
            video_track,
            video_sender,
        })
    }

    /// Negotiate the given offer and return the answer SDP. Blocks until ICE
    /// candidate gathering completes so the answer is self-contained; this
    /// agent does not expose a separate trickle-ICE endpoint.
    pub async fn handle_offer(&self, sdp: &str) -> anyhow::Result<String> {
        let offer =
            RTCSessionDescription::offer(sdp.to_string()).context("failed to parse SDP offer")?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .context("failed to set remote description")?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .context("failed to create answer")?;

        let mut gather_complete = self.peer_connection.gathering_complete_promise().await;

        self.peer_connection
            .set_local_description(answer)
            .await
            .context("failed to set local description")?;

        let _ = gather_complete.recv().await;

        let local_desc = self
            .peer_connection
            .local_description()
            .await
            .context("no local description after ICE gathering")?;

        debug!(sdp_len = local_desc.sdp.len(), "answer ready");
        Ok(local_desc.sdp)
    }

    pub fn on_ice_connection_state_change(
        &self,
        callback: impl Fn(RTCIceConnectionState) + Send + Sync + 'static,
    ) {
        self.peer_connection
            .on_ice_connection_state_change(Box::new(move |state| {
                callback(state);
                Box::pin(async {})
            }));
    }

    pub async fn write_video_sample(&self, data: Vec<u8>, duration: Duration) -> anyhow::Result<()> {
        self.video_track
            .write_sample(&webrtc::media::Sample {
                data: bytes::Bytes::from(data),
                duration,
                ..Default::default()
            })
            .await
            .context("failed to write video sample")?;
        Ok(())
    }

    /// Emit one RTCP picture-loss-indication referencing the outbound
    /// track's own SSRC, prompting the encoder to refresh with a keyframe.
    pub async fn write_pli(&self) -> anyhow::Result<()> {
        let params = self.video_sender.get_parameters().await;
        let ssrc = params
            .encodings
            .first()
            .map(|e| e.ssrc)
            .unwrap_or_default();

        self.peer_connection
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: ssrc,
                media_ssrc: ssrc,
            })])
            .await
            .context("failed to write PLI")?;
        Ok(())
    }

    pub async fn close(&self) -> anyhow::Result<()> {
        self.peer_connection
            .close()
            .await
            .context("failed to close peer connection")?;
        Ok(())
    }
}
