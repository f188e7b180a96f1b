//! Frame Grabber: captures one display region on a fixed cadence and
//! publishes frames to a bounded channel, dropping frames rather than
//! queuing them when the consumer falls behind.

use anyhow::{Context, bail};
use rsa_protocol::Screen;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc as std_mpsc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use x11rb::connection::Connection;
use x11rb::protocol::shm;
use x11rb::protocol::xproto::ImageFormat;
use x11rb::rust_connection::RustConnection;

use crate::error::StreamError;

const BYTES_PER_PIXEL: u32 = 4;
const POOL_SIZE: usize = 3;

/// One captured frame. 32bpp, host-native channel order (BGRA on X11 — the
/// fourth byte is forced to 0xFF since depth-24 SHM images leave it as
/// undefined padding, not real alpha).
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub stride: usize,
    data: Vec<u8>,
    return_tx: Option<std_mpsc::Sender<Vec<u8>>>,
}

impl Frame {
    #[cfg(test)]
    fn for_test(width: u32, height: u32) -> Self {
        let stride = width as usize * BYTES_PER_PIXEL as usize;
        Self {
            width,
            height,
            stride,
            data: vec![0u8; stride * height as usize],
            return_tx: None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        if let Some(tx) = &self.return_tx {
            let data = std::mem::take(&mut self.data);
            let _ = tx.send(data);
        }
    }
}

/// Low-level SHM capture of a fixed screen rectangle.
struct RawCapture {
    conn: RustConnection,
    root: u32,
    x: i16,
    y: i16,
    width: u32,
    height: u32,
    shm_seg: shm::Seg,
    shm_id: i32,
    shm_ptr: *mut u8,
    shm_size: usize,
    pool_tx: std_mpsc::Sender<Vec<u8>>,
    pool_rx: std_mpsc::Receiver<Vec<u8>>,
}

// SAFETY: the SHM pointer is only touched from capture_frame, which requires &mut self.
unsafe impl Send for RawCapture {}

impl RawCapture {
    fn new(x_display: &str, screen: Screen) -> anyhow::Result<Self> {
        let (conn, _screen_num) =
            RustConnection::connect(Some(x_display)).context("failed to connect to X display")?;
        let root = conn.setup().roots[0].root;

        shm::query_version(&conn)
            .context("SHM extension not available")?
            .reply()
            .context("SHM query_version failed")?;

        let shm_size = (screen.width * screen.height * BYTES_PER_PIXEL) as usize;

        let shm_id = unsafe { libc::shmget(libc::IPC_PRIVATE, shm_size, libc::IPC_CREAT | 0o600) };
        if shm_id < 0 {
            bail!("shmget failed: {}", std::io::Error::last_os_error());
        }

        let shm_ptr = unsafe { libc::shmat(shm_id, std::ptr::null(), 0) };
        if shm_ptr == usize::MAX as *mut libc::c_void {
            unsafe { libc::shmctl(shm_id, libc::IPC_RMID, std::ptr::null_mut()) };
            bail!("shmat failed: {}", std::io::Error::last_os_error());
        }
        unsafe { libc::shmctl(shm_id, libc::IPC_RMID, std::ptr::null_mut()) };

        let shm_seg = conn.generate_id().context("failed to generate SHM seg id")?;
        shm::attach(&conn, shm_seg, shm_id as u32, false)
            .context("SHM attach request failed")?
            .check()
            .context("SHM attach failed")?;

        let (pool_tx, pool_rx) = std_mpsc::channel();
        for _ in 0..POOL_SIZE {
            let _ = pool_tx.send(vec![0u8; shm_size]);
        }

        debug!(
            screen.index,
            screen.width, screen.height, shm_size, "SHM capture region attached"
        );

        Ok(Self {
            conn,
            root,
            x: screen.x as i16,
            y: screen.y as i16,
            width: screen.width,
            height: screen.height,
            shm_seg,
            shm_id,
            shm_ptr: shm_ptr as *mut u8,
            shm_size,
            pool_tx,
            pool_rx,
        })
    }

    fn capture_frame(&mut self) -> anyhow::Result<Frame> {
        shm::get_image(
            &self.conn,
            self.root,
            self.x,
            self.y,
            self.width as u16,
            self.height as u16,
            !0,
            ImageFormat::Z_PIXMAP.into(),
            self.shm_seg,
            0,
        )
        .context("SHM GetImage request failed")?
        .reply()
        .context("SHM GetImage reply failed")?;

        let mut data = self
            .pool_rx
            .try_recv()
            .unwrap_or_else(|_| vec![0u8; self.shm_size]);
        data.resize(self.shm_size, 0);

        // SAFETY: segment is shm_size bytes, &mut self rules out concurrent access.
        let shm_slice = unsafe { std::slice::from_raw_parts(self.shm_ptr, self.shm_size) };
        data.copy_from_slice(shm_slice);

        for pixel in data.chunks_exact_mut(4) {
            pixel[3] = 0xFF;
        }

        Ok(Frame {
            width: self.width,
            height: self.height,
            stride: self.width as usize * BYTES_PER_PIXEL as usize,
            data,
            return_tx: Some(self.pool_tx.clone()),
        })
    }
}

impl Drop for RawCapture {
    fn drop(&mut self) {
        let _ = shm::detach(&self.conn, self.shm_seg);
        let _ = self.conn.flush();
        unsafe {
            libc::shmdt(self.shm_ptr as *const libc::c_void);
        }
        let _ = self.shm_id;
    }
}

/// Per-session frame producer. `start`/`stop` are idempotent; `frames()` can
/// only be taken once (subsequent calls return `None`).
pub struct Grabber {
    x_display: String,
    screen: Screen,
    fps: u32,
    stop: Arc<AtomicBool>,
    started: AtomicBool,
    frame_rx: std::sync::Mutex<Option<mpsc::Receiver<Frame>>>,
    frame_tx: mpsc::Sender<Frame>,
    handle: std::sync::Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Grabber {
    pub fn new(x_display: String, screen: Screen, fps: u32) -> anyhow::Result<Self> {
        let (frame_tx, frame_rx) = mpsc::channel(1);
        Ok(Self {
            x_display,
            screen,
            fps,
            stop: Arc::new(AtomicBool::new(false)),
            started: AtomicBool::new(false),
            frame_rx: std::sync::Mutex::new(Some(frame_rx)),
            frame_tx,
            handle: std::sync::Mutex::new(None),
        })
    }

    /// Idempotent. Spawns a background OS thread that captures one frame per
    /// period and publishes it to the frame channel (capacity 1, acting as
    /// the channel's rendezvous point: a full channel means the previous
    /// frame hasn't been drained yet, so the new one is dropped rather than
    /// queued — this is the documented backpressure choice for this Grabber).
    pub fn start(&self) -> anyhow::Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let period = Duration::from_secs_f64(1.0 / self.fps as f64);
        let stop = Arc::clone(&self.stop);
        let tx = self.frame_tx.clone();
        let x_display = self.x_display.clone();
        let screen = self.screen;

        let handle = std::thread::Builder::new()
            .name("frame-grabber".into())
            .spawn(move || {
                let mut capture = match RawCapture::new(&x_display, screen) {
                    Ok(c) => c,
                    Err(e) => {
                        error!(error = %e, "failed to initialize display capture");
                        return;
                    }
                };

                info!(screen.index, fps = ?period, "frame grabber started");

                loop {
                    if stop.load(Ordering::SeqCst) {
                        break;
                    }

                    let iter_start = Instant::now();

                    match capture.capture_frame() {
                        Ok(frame) => {
                            if tx.try_send(frame).is_err() {
                                debug!("frame channel full or closed, dropping this frame");
                            }
                        }
                        Err(e) => {
                            let stream_err = StreamError::CaptureFailed(e.to_string());
                            error!(error = %stream_err, "capture failed, stopping grabber");
                            break;
                        }
                    }

                    let elapsed = iter_start.elapsed();
                    if let Some(remaining) = period.checked_sub(elapsed) {
                        std::thread::sleep(remaining);
                    }
                }

                info!("frame grabber stopped");
            })
            .context("failed to spawn frame-grabber thread")?;

        *self.handle.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Takes the receiving half of the frame channel. Can only be called
    /// once; subsequent calls return `None`.
    pub fn frames(&self) -> Option<mpsc::Receiver<Frame>> {
        self.frame_rx.lock().unwrap().take()
    }

    /// Idempotent. Signals the producer thread to terminate; does not block
    /// waiting for it to exit (the frame channel will close once it does).
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for Grabber {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_without_pool_drops_cleanly() {
        let frame = Frame::for_test(64, 48);
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.as_bytes().len(), 64 * 48 * 4);
    }

    #[test]
    fn pooled_frame_returns_buffer_on_drop() {
        let (tx, rx) = std_mpsc::channel();
        let frame = Frame {
            width: 4,
            height: 4,
            stride: 16,
            data: vec![0u8; 64],
            return_tx: Some(tx),
        };
        drop(frame);
        let returned = rx.try_recv().expect("buffer should be returned to pool");
        assert_eq!(returned.len(), 64);
    }

    #[test]
    fn grabber_frames_can_only_be_taken_once() {
        let screen = Screen {
            index: 0,
            x: 0,
            y: 0,
            width: 640,
            height: 480,
        };
        let grabber = Grabber::new(":0".to_string(), screen, 20).unwrap();
        assert!(grabber.frames().is_some());
        assert!(grabber.frames().is_none());
    }

    #[test]
    fn stop_is_idempotent_before_start() {
        let screen = Screen {
            index: 0,
            x: 0,
            y: 0,
            width: 640,
            height: 480,
        };
        let grabber = Grabber::new(":0".to_string(), screen, 20).unwrap();
        grabber.stop();
        grabber.stop();
    }
}
