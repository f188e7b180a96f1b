mod capture;
mod cli;
mod config;
mod display;
mod encoder;
mod error;
mod http;
mod negotiator;
mod peer;
mod session;
mod streamer;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Context;
use display::DisplayProvider;
use encoder::EncoderRegistry;
use http::AppState;
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    gstreamer::init().context("failed to initialize GStreamer")?;

    let args = cli::parse_args()?;

    let mut cfg = match &args.config {
        Some(path) => config::load_config(std::path::Path::new(path))?,
        None => rsa_protocol::AgentConfig::default(),
    };

    if let Some(bind) = args.bind {
        cfg.server.bind = bind;
    }
    if let Some(port) = args.port {
        cfg.server.port = port;
    }
    if let Some(screen) = args.screen {
        cfg.video.default_screen = screen;
    }
    if let Some(fps) = args.fps {
        cfg.video.default_fps = fps;
    }
    if let Some(stun) = args.stun {
        cfg.ice.stun_url = stun;
    }
    if let Some(encoder) = args.encoder {
        cfg.video.encoder = Some(encoder);
    }

    if let Err(issues) = cfg.validate() {
        for issue in &issues {
            tracing::warn!("{issue}");
        }
        if issues.iter().any(|i| i.starts_with("ERROR")) {
            anyhow::bail!("invalid configuration");
        }
    }

    let registry = Arc::new(EncoderRegistry::probe());
    let display = Arc::new(DisplayProvider::new(":0"));
    let forced_encoder = cfg.video.encoder.as_deref().and_then(rsa_protocol::CodecKind::parse);

    let bind_addr = format!("{}:{}", cfg.server.bind, cfg.server.port);

    let state = Arc::new(AppState {
        registry,
        display,
        stun_url: cfg.ice.stun_url,
        default_fps: cfg.video.default_fps,
        default_screen: cfg.video.default_screen,
        forced_encoder,
        sessions: Mutex::new(HashMap::new()),
    });

    let app = http::build_router(Arc::clone(&state));

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind to {bind_addr}"))?;

    info!(bind = %bind_addr, "remote-screen-agent ready, accepting connections");

    axum::serve(listener, app)
        .await
        .context("HTTP server error")?;

    Ok(())
}
