//! Display enumeration: snapshots the host's attached monitors via RandR.
//!
//! Distinct from opening a single fixed X display — this walks every
//! connected output's CRTC geometry so a session can target any attached
//! monitor, not just the root window as a whole.

use anyhow::{Context, Result};
use rsa_protocol::Screen;
use x11rb::connection::Connection;
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::ConnectionExt as _;
use x11rb::rust_connection::RustConnection;

use crate::capture::Grabber;

pub struct DisplayProvider {
    x_display: String,
}

impl DisplayProvider {
    pub fn new(x_display: impl Into<String>) -> Self {
        Self {
            x_display: x_display.into(),
        }
    }

    /// Snapshot of currently attached displays. Order is stable within a run
    /// (RandR's own output enumeration order); fails only on host API failure.
    pub fn screens(&self) -> Result<Vec<Screen>> {
        let (conn, screen_num) = RustConnection::connect(Some(&self.x_display))
            .context("failed to connect to X display")?;
        let root = conn.setup().roots[screen_num].root;

        randr::query_version(&conn, 1, 5)
            .context("RandR query_version request failed")?
            .reply()
            .context("RandR not available on this X server")?;

        let resources = conn
            .randr_get_screen_resources_current(root)
            .context("RandR get_screen_resources request failed")?
            .reply()
            .context("RandR get_screen_resources reply failed")?;

        let mut screens = Vec::new();
        for output in resources.outputs {
            let info = conn
                .randr_get_output_info(output, resources.config_timestamp)
                .context("RandR get_output_info request failed")?
                .reply()
                .context("RandR get_output_info reply failed")?;

            if info.connection != randr::Connection::CONNECTED || info.crtc == 0 {
                continue;
            }

            let crtc = conn
                .randr_get_crtc_info(info.crtc, resources.config_timestamp)
                .context("RandR get_crtc_info request failed")?
                .reply()
                .context("RandR get_crtc_info reply failed")?;

            if crtc.width == 0 || crtc.height == 0 {
                continue;
            }

            screens.push(Screen {
                index: screens.len() as u32,
                x: crtc.x as i32,
                y: crtc.y as i32,
                width: crtc.width as u32,
                height: crtc.height as u32,
            });
        }

        Ok(screens)
    }

    /// Construct a capture source for `screen` at `fps` frames per second.
    /// `fps` must already be clamped to `[1, 240]` by the caller; the screen
    /// is treated as opaque (no re-validation against a fresh enumeration).
    pub fn grabber(&self, screen: Screen, fps: u32) -> Result<Grabber> {
        Grabber::new(self.x_display.clone(), screen, fps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn screen_ordering_is_assigned_sequentially() {
        // Construction-only check: Screen indices are assigned by enumeration
        // position, not by the host's internal output id.
        let a = Screen {
            index: 0,
            x: 0,
            y: 0,
            width: 1920,
            height: 1080,
        };
        let b = Screen {
            index: 1,
            x: 1920,
            y: 0,
            width: 1280,
            height: 1024,
        };
        assert_eq!(a.index, 0);
        assert_eq!(b.index, 1);
        assert_ne!(a.width, b.width);
    }
}
