//! Encoder Registry: conditionally-available codec backends realized as
//! GStreamer pipelines, probed at process init so `supports()` reflects what
//! the running host can actually instantiate, not a compile-time constant.

mod h264_profile;

use anyhow::{Context, bail};
use gstreamer::prelude::*;
use gstreamer::{self as gst, ClockTime, ElementFactory, FlowError};
use gstreamer_app::{AppSink, AppSinkCallbacks, AppSrc};
use rsa_protocol::CodecKind;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use tracing::{debug, info};

const H264_BITRATE_KBPS: u32 = 2_000;
const VP8_TARGET_BITRATE_BPS: u32 = 90_000;
const VP8_KEYFRAME_MAX_DIST: i32 = 10;

/// Process-wide, read-only after construction: populated once at startup by
/// probing which codec pipelines actually instantiate on this host.
pub struct EncoderRegistry {
    h264: bool,
    vp8: bool,
}

impl EncoderRegistry {
    pub fn probe() -> Self {
        let h264 = can_instantiate("x264enc");
        let vp8 = can_instantiate("vp8enc");
        info!(h264, vp8, "encoder registry probed");
        Self { h264, vp8 }
    }

    pub fn supports(&self, kind: CodecKind) -> bool {
        match kind {
            CodecKind::H264 => self.h264,
            CodecKind::Vp8 => self.vp8,
        }
    }

    /// Build a new encoder for `kind`. The returned encoder's
    /// [`Encoder::accepted_size`] may differ from `requested_size` (H.264
    /// profile 3.1 only accepts a fixed candidate set of resolutions).
    pub fn new_encoder(
        &self,
        kind: CodecKind,
        requested_size: (u32, u32),
        fps: u32,
    ) -> anyhow::Result<Encoder> {
        if !self.supports(kind) {
            bail!("codec {:?} is not registered on this host", kind);
        }
        match kind {
            CodecKind::H264 => {
                let accepted = h264_profile::resolve(requested_size.0, requested_size.1);
                Encoder::new_h264(accepted, fps)
            }
            CodecKind::Vp8 => Encoder::new_vp8(requested_size, fps),
        }
    }
}

fn can_instantiate(name: &str) -> bool {
    match ElementFactory::make(name).build() {
        Ok(elem) => {
            let _ = elem.set_state(gst::State::Null);
            true
        }
        Err(_) => false,
    }
}

/// One session's codec state. Exclusively owned by the Streamer; `close`
/// must be called exactly once before the encoder is dropped.
pub struct Encoder {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    encoded_rx: Mutex<mpsc::Receiver<Vec<u8>>>,
    _bus_watch: gst::bus::BusWatchGuard,
    accepted_size: (u32, u32),
    closed: AtomicBool,
}

impl Encoder {
    fn new_h264(accepted_size: (u32, u32), fps: u32) -> anyhow::Result<Self> {
        let (width, height) = accepted_size;

        let convert = ElementFactory::make("videoconvert")
            .build()
            .context("failed to create videoconvert")?;
        let encoder = ElementFactory::make("x264enc")
            .property_from_str("profile", "baseline")
            .property_from_str("tune", "zerolatency")
            .property_from_str("speed-preset", "veryfast")
            .property("bitrate", H264_BITRATE_KBPS)
            .property("key-int-max", fps * 2)
            .build()
            .context("failed to create x264enc")?;
        let parser = ElementFactory::make("h264parse")
            .property_from_str("config-interval", "-1")
            .build()
            .context("failed to create h264parse")?;
        let out_caps = gst::Caps::builder("video/x-h264")
            .field("stream-format", "byte-stream")
            .field("alignment", "au")
            .build();
        let out_capsfilter = ElementFactory::make("capsfilter")
            .property("caps", &out_caps)
            .build()
            .context("failed to create output capsfilter")?;

        Self::build(
            width,
            height,
            fps,
            accepted_size,
            &[&convert, &encoder, &parser, &out_capsfilter],
        )
    }

    fn new_vp8(accepted_size: (u32, u32), fps: u32) -> anyhow::Result<Self> {
        let (width, height) = accepted_size;

        let convert = ElementFactory::make("videoconvert")
            .build()
            .context("failed to create videoconvert")?;
        let encoder = ElementFactory::make("vp8enc")
            .property("target-bitrate", VP8_TARGET_BITRATE_BPS as i32)
            .property_from_str("error-resilient", "default")
            .property("keyframe-max-dist", VP8_KEYFRAME_MAX_DIST)
            .property("deadline", 1i64)
            .build()
            .context("failed to create vp8enc")?;

        Self::build(width, height, fps, accepted_size, &[&convert, &encoder])
    }

    fn build(
        width: u32,
        height: u32,
        fps: u32,
        accepted_size: (u32, u32),
        middle: &[&gst::Element],
    ) -> anyhow::Result<Self> {
        let pipeline = gst::Pipeline::new();

        let appsrc_elem = ElementFactory::make("appsrc")
            .name("src")
            .build()
            .context("failed to create appsrc")?;
        let appsrc = appsrc_elem
            .dynamic_cast::<AppSrc>()
            .map_err(|_| anyhow::anyhow!("failed to cast to AppSrc"))?;

        let in_caps = gst::Caps::builder("video/x-raw")
            .field("format", "BGRA")
            .field("width", width as i32)
            .field("height", height as i32)
            .field("framerate", gst::Fraction::new(fps as i32, 1))
            .build();
        appsrc.set_caps(Some(&in_caps));
        appsrc.set_is_live(true);
        appsrc.set_format(gst::Format::Time);
        appsrc.set_property("block", false);
        appsrc.set_property("max-bytes", 0u64);

        let appsink_elem = ElementFactory::make("appsink")
            .name("sink")
            .property("sync", false)
            .property("async", false)
            .property("emit-signals", true)
            .property("max-buffers", 1u32)
            .property("drop", true)
            .build()
            .context("failed to create appsink")?;
        let appsink = appsink_elem
            .dynamic_cast::<AppSink>()
            .map_err(|_| anyhow::anyhow!("failed to cast to AppSink"))?;

        let (encoded_tx, encoded_rx) = mpsc::channel::<Vec<u8>>();
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let sample = sink.pull_sample().map_err(|_| FlowError::Eos)?;
                    let buffer = sample.buffer().ok_or(FlowError::Error)?;
                    let map = buffer.map_readable().map_err(|_| FlowError::Error)?;
                    let _ = encoded_tx.send(map.to_vec());
                    Ok(gst::FlowSuccess::Ok)
                })
                .build(),
        );

        let mut elements = vec![appsrc.upcast_ref::<gst::Element>()];
        elements.extend_from_slice(middle);
        elements.push(appsink.upcast_ref::<gst::Element>());

        pipeline
            .add_many(elements.iter().copied())
            .context("failed to add elements to pipeline")?;
        gst::Element::link_many(elements.iter().copied()).context("failed to link pipeline")?;

        let pipeline_error = std::sync::Arc::new(AtomicBool::new(false));
        let pipeline_error_flag = std::sync::Arc::clone(&pipeline_error);
        let bus = pipeline.bus().context("failed to get pipeline bus")?;
        let _bus_watch = bus
            .add_watch(move |_, msg| {
                use gst::MessageView;
                if let MessageView::Error(err) = msg.view() {
                    tracing::error!(error = %err.error(), debug = ?err.debug(), "encoder pipeline error");
                    pipeline_error_flag.store(true, Ordering::Relaxed);
                }
                gst::glib::ControlFlow::Continue
            })
            .context("failed to add bus watch")?;

        pipeline
            .set_state(gst::State::Playing)
            .context("failed to set pipeline to playing")?;

        debug!(width, height, fps, "encoder pipeline started");

        Ok(Self {
            pipeline,
            appsrc,
            encoded_rx: Mutex::new(encoded_rx),
            _bus_watch,
            accepted_size,
            closed: AtomicBool::new(false),
        })
    }

    /// Push one RGBA (host-native channel order) frame of exactly
    /// `accepted_size` and return whatever the pipeline has produced since
    /// the previous call. An empty vec means the codec is still buffering
    /// internally and is not an error.
    pub fn encode(&self, frame: &[u8], pts: u64) -> anyhow::Result<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("encode called after close");
        }

        let mut buffer = gst::Buffer::from_mut_slice(frame.to_vec());
        {
            let buffer_mut = buffer
                .get_mut()
                .expect("freshly-created GstBuffer should have unique ownership");
            buffer_mut.set_pts(ClockTime::from_nseconds(pts));
        }
        self.appsrc
            .push_buffer(buffer)
            .context("failed to push buffer to appsrc")?;

        let rx = self.encoded_rx.lock().unwrap_or_else(|e| e.into_inner());
        match rx.try_recv() {
            Ok(data) => Ok(data),
            Err(mpsc::TryRecvError::Empty) => Ok(Vec::new()),
            Err(mpsc::TryRecvError::Disconnected) => bail!("encoder pipeline disconnected"),
        }
    }

    pub fn accepted_size(&self) -> (u32, u32) {
        self.accepted_size
    }

    /// Releases native resources. Must be called exactly once; further
    /// `encode` calls after `close` return an error.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.appsrc.end_of_stream();
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}

impl Drop for Encoder {
    fn drop(&mut self) {
        self.close();
    }
}
