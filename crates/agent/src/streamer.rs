//! Streamer: pulls frames from a Grabber, resizes them to the encoder's
//! accepted size, encodes, and writes samples to the outbound track.

use crate::capture::Grabber;
use crate::encoder::Encoder;
use crate::error::StreamError;
use crate::peer::WebRtcPeer;
use fast_image_resize as fir;
use fir::images::{TypedImage, TypedImageRef};
use fir::pixels::U8x4;
use fir::{ResizeAlg, ResizeOptions, Resizer};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

pub struct Streamer {
    session_id: Uuid,
    grabber: Arc<Grabber>,
    encoder: Arc<Encoder>,
    peer: Arc<WebRtcPeer>,
    fps: u32,
    stop: Arc<AtomicBool>,
    handle: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl Streamer {
    pub fn new(
        session_id: Uuid,
        grabber: Arc<Grabber>,
        encoder: Arc<Encoder>,
        peer: Arc<WebRtcPeer>,
        fps: u32,
    ) -> Self {
        Self {
            session_id,
            grabber,
            encoder,
            peer,
            fps,
            stop: Arc::new(AtomicBool::new(false)),
            handle: std::sync::Mutex::new(None),
        }
    }

    #[instrument(skip(self), fields(session = %self.session_id))]
    pub fn start(&self) -> anyhow::Result<()> {
        self.grabber.start()?;
        let mut frame_rx = self
            .grabber
            .frames()
            .ok_or_else(|| anyhow::anyhow!("streamer already started"))?;

        let encoder = Arc::clone(&self.encoder);
        let peer = Arc::clone(&self.peer);
        let stop = Arc::clone(&self.stop);
        let (accepted_w, accepted_h) = encoder.accepted_size();
        let sample_duration = Duration::from_secs_f64(1.0 / self.fps as f64);

        let handle = tokio::spawn(async move {
            let mut resizer = Resizer::new();
            let mut resize_buf = vec![0u8; accepted_w as usize * accepted_h as usize * 4];
            let mut pts: u64 = 0;
            let pts_step = sample_duration.as_nanos() as u64;

            loop {
                if stop.load(Ordering::SeqCst) {
                    break;
                }

                let frame = tokio::select! {
                    frame = frame_rx.recv() => match frame {
                        Some(f) => f,
                        None => {
                            debug!("frame channel closed, stopping streamer");
                            break;
                        }
                    },
                    _ = wait_while_running(&stop) => break,
                };

                let resized = match resize_frame(
                    &mut resizer,
                    frame.as_bytes(),
                    frame.width,
                    frame.height,
                    accepted_w,
                    accepted_h,
                    &mut resize_buf,
                ) {
                    Ok(()) => &resize_buf,
                    Err(e) => {
                        let stream_err = StreamError::EncodeFailed(format!("resize: {e}"));
                        error!(error = %stream_err, "frame resize failed, stopping streamer");
                        break;
                    }
                };

                let payload = match encoder.encode(resized, pts) {
                    Ok(payload) => payload,
                    Err(e) => {
                        let stream_err = StreamError::EncodeFailed(e.to_string());
                        error!(error = %stream_err, "encode failed, stopping streamer");
                        break;
                    }
                };
                pts += pts_step;

                if payload.is_empty() {
                    continue;
                }

                if let Err(e) = peer.write_video_sample(payload, sample_duration).await {
                    let stream_err = StreamError::TransportFailed(e.to_string());
                    error!(error = %stream_err, "track write failed, stopping streamer");
                    break;
                }
            }

            info!("streamer pump task exited");
        });

        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Signals stop. The Grabber is stopped here, not inside the pump task,
    /// so shutdown has a single owner regardless of which path triggered it.
    #[instrument(skip(self), fields(session = %self.session_id))]
    pub fn close(&self) {
        self.stop.store(true, Ordering::SeqCst);
        self.grabber.stop();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

async fn wait_while_running(stop: &Arc<AtomicBool>) {
    while !stop.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[allow(clippy::too_many_arguments)]
fn resize_frame(
    resizer: &mut Resizer,
    src: &[u8],
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
    dst: &mut [u8],
) -> anyhow::Result<()> {
    let src_view = TypedImageRef::<U8x4>::from_buffer(src_w, src_h, src)
        .map_err(|e| anyhow::anyhow!("failed to build source image view: {e}"))?;
    let mut dst_view = TypedImage::<U8x4>::from_buffer(dst_w, dst_h, dst)
        .map_err(|e| anyhow::anyhow!("failed to build destination image view: {e}"))?;

    let opts = ResizeOptions::new()
        .resize_alg(ResizeAlg::Convolution(fir::FilterType::Lanczos3))
        .use_alpha(false);

    resizer
        .resize_typed::<U8x4>(&src_view, &mut dst_view, &opts)
        .map_err(|e| anyhow::anyhow!("resize failed: {e}"))?;

    Ok(())
}
