use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fleetsim_input::{GuiExchange, GuiIo};
use fleetsim_kernel::{GuiOptions, SceneSnapshot, World};
use parking_lot::Mutex;

use crate::backend::{TextBackend, TextBackendHandle, ViewBackend};
use crate::renderer::{DebugTextRenderer, RenderView, Renderer};

/// What the render thread draws: the latest snapshot and the options it was
/// taken with.
struct Frame {
    scene: SceneSnapshot,
    options: GuiOptions,
}

struct ViewerShared {
    /// Set by the render thread while it runs.
    running: AtomicBool,
    /// Set by `close`, read by the render thread.
    must_close: AtomicBool,
    /// Latest frame; a newer one replaces an undrawn one.
    frame: Mutex<Option<Arc<Frame>>>,
    frames: AtomicU64,
}

/// Rendering actor for one world.
///
/// The render thread is started by the first [`update_view`](Self::update_view)
/// and paced at the scene's `refresh_fps`. It never touches the world lock:
/// callers push snapshots in through `update_view`, keys flow out through
/// the world's [`GuiExchange`].
pub struct Viewer {
    world: Arc<World>,
    shared: Arc<ViewerShared>,
    backend: Mutex<Option<Box<dyn ViewBackend>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Viewer {
    pub fn new(world: Arc<World>, backend: Box<dyn ViewBackend>) -> Self {
        Self {
            world,
            shared: Arc::new(ViewerShared {
                running: AtomicBool::new(false),
                must_close: AtomicBool::new(false),
                frame: Mutex::new(None),
                frames: AtomicU64::new(0),
            }),
            backend: Mutex::new(Some(backend)),
            thread: Mutex::new(None),
        }
    }

    /// Viewer drawing into an in-memory [`TextBackend`].
    pub fn with_text_backend(world: Arc<World>) -> (Self, TextBackendHandle) {
        let (backend, handle) = TextBackend::pair();
        (Self::new(world, Box::new(backend)), handle)
    }

    /// Push a fresh snapshot to the render thread, starting it on the first
    /// call. With `io`, hands out the latest keystroke and publishes
    /// `io.msg_lines` for display.
    ///
    /// Returns whether the viewer is still open.
    pub fn update_view(&self, io: Option<&mut GuiIo>) -> bool {
        if self.shared.must_close.load(Ordering::Acquire) {
            return false;
        }
        let frame = {
            let state = self.world.lock();
            Frame {
                scene: state.snapshot(),
                options: state.gui_options().clone(),
            }
        };
        *self.shared.frame.lock() = Some(Arc::new(frame));
        if let Some(io) = io {
            self.world.gui_exchange().exchange(io);
        }
        if let Some(backend) = self.backend.lock().take() {
            self.start(backend);
        }
        self.is_open()
    }

    fn start(&self, backend: Box<dyn ViewBackend>) {
        let shared = Arc::clone(&self.shared);
        let gui = self.world.gui_exchange();
        self.shared.running.store(true, Ordering::Release);
        let spawned = thread::Builder::new()
            .name("fleetsim-viewer".into())
            .spawn(move || render_loop(shared, gui, backend));
        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                tracing::info!("viewer started");
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                self.shared.must_close.store(true, Ordering::Release);
                tracing::warn!(error = %e, "cannot start viewer thread");
            }
        }
    }

    /// Whether the render thread is running and no close was requested.
    /// Never blocks.
    pub fn is_open(&self) -> bool {
        self.shared.running.load(Ordering::Acquire) && !self.shared.must_close.load(Ordering::Acquire)
    }

    /// Request shutdown. The render thread notices within one frame.
    pub fn close(&self) {
        if !self.shared.must_close.swap(true, Ordering::AcqRel) {
            tracing::debug!("viewer close requested");
        }
    }

    pub fn frames_rendered(&self) -> u64 {
        self.shared.frames.load(Ordering::Relaxed)
    }
}

impl Drop for Viewer {
    fn drop(&mut self) {
        self.close();
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                tracing::warn!("viewer thread panicked");
            }
        }
    }
}

fn render_loop(shared: Arc<ViewerShared>, gui: Arc<GuiExchange>, mut backend: Box<dyn ViewBackend>) {
    let renderer = DebugTextRenderer::new();
    let mut fps = GuiOptions::default().refresh_fps;
    while !shared.must_close.load(Ordering::Acquire) && !backend.is_closed() {
        let started = Instant::now();
        while let Some(key) = backend.poll_key() {
            gui.push_key(key);
        }
        let frame = shared.frame.lock().clone();
        if let Some(frame) = frame {
            fps = frame.options.refresh_fps.max(1);
            let view = RenderView::follow(&frame.options, &frame.scene);
            let text = renderer.render(&frame.scene, &view, &gui.messages());
            backend.present(&text);
            shared.frames.fetch_add(1, Ordering::Relaxed);
        }
        let period = Duration::from_secs_f64(1.0 / f64::from(fps));
        if let Some(rest) = period.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
    shared.running.store(false, Ordering::Release);
    tracing::info!(frames = shared.frames.load(Ordering::Relaxed), "viewer stopped");
}
