//! Presentation backends driven by the viewer's render thread.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender};
use fleetsim_input::{KeyCode, KeyEvent};
use parking_lot::Mutex;

/// Where rendered frames go and where keystrokes come from.
///
/// Owned by the render thread; never shared.
pub trait ViewBackend: Send {
    fn present(&mut self, frame: &str);
    /// Next pending keystroke, without blocking.
    fn poll_key(&mut self) -> Option<KeyEvent>;
    /// True once the user closed the view.
    fn is_closed(&self) -> bool;
}

// ── TextBackend ────────────────────────────────────────────────────

#[derive(Default)]
struct TextShared {
    latest: Mutex<Option<String>>,
    presented: AtomicU64,
    closed: AtomicBool,
}

/// In-memory backend keeping the latest frame.
///
/// Paired with a [`TextBackendHandle`] that reads frames, injects keys and
/// closes the view from any thread.
pub struct TextBackend {
    shared: Arc<TextShared>,
    keys: Receiver<KeyEvent>,
}

#[derive(Clone)]
pub struct TextBackendHandle {
    shared: Arc<TextShared>,
    keys: Sender<KeyEvent>,
}

impl TextBackend {
    pub fn pair() -> (Self, TextBackendHandle) {
        let shared = Arc::new(TextShared::default());
        let (tx, rx) = crossbeam_channel::unbounded();
        (
            Self {
                shared: Arc::clone(&shared),
                keys: rx,
            },
            TextBackendHandle { shared, keys: tx },
        )
    }
}

impl ViewBackend for TextBackend {
    fn present(&mut self, frame: &str) {
        *self.shared.latest.lock() = Some(frame.to_string());
        self.shared.presented.fetch_add(1, Ordering::Relaxed);
    }

    fn poll_key(&mut self) -> Option<KeyEvent> {
        self.keys.try_recv().ok()
    }

    fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl TextBackendHandle {
    pub fn latest_frame(&self) -> Option<String> {
        self.shared.latest.lock().clone()
    }

    pub fn frames_presented(&self) -> u64 {
        self.shared.presented.load(Ordering::Relaxed)
    }

    pub fn send_key(&self, event: KeyEvent) {
        let _ = self.keys.send(event);
    }

    /// Simulate the user closing the window.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }
}

// ── TerminalBackend ────────────────────────────────────────────────

/// Backend drawing frames on stdout and reading one key per stdin line.
///
/// An empty line or end of input closes the view.
pub struct TerminalBackend {
    keys: Receiver<KeyEvent>,
    closed: Arc<AtomicBool>,
}

impl TerminalBackend {
    pub fn new() -> std::io::Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let stdin_closed = Arc::clone(&closed);
        // Detached: a blocking stdin read cannot be interrupted.
        thread::Builder::new()
            .name("fleetsim-stdin".into())
            .spawn(move || read_keys(tx, stdin_closed))?;
        Ok(Self { keys: rx, closed })
    }
}

fn read_keys(tx: Sender<KeyEvent>, closed: Arc<AtomicBool>) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let Some(c) = line.chars().next() else { break };
        let code = match u8::try_from(c) {
            Ok(ascii) => KeyCode::from_ascii(ascii),
            Err(_) => KeyCode::Other(u32::from(c)),
        };
        let event = KeyEvent::new(code);
        if tx.send(event).is_err() {
            return;
        }
    }
    closed.store(true, Ordering::Release);
}

impl ViewBackend for TerminalBackend {
    fn present(&mut self, frame: &str) {
        let mut out = std::io::stdout().lock();
        // Clear screen and home the cursor.
        let _ = write!(out, "\x1b[2J\x1b[H{frame}");
        let _ = out.flush();
    }

    fn poll_key(&mut self) -> Option<KeyEvent> {
        self.keys.try_recv().ok()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
