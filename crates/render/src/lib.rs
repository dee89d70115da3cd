//! Rendering actor: draws world snapshots on its own thread.
//!
//! # Invariants
//! - Renderers work from [`SceneSnapshot`](fleetsim_kernel::SceneSnapshot)s
//!   and never mutate the world.
//! - The render thread never takes the world lock; snapshots are pushed to it.
//! - `Viewer::is_open` and `Viewer::close` never block.

mod backend;
mod renderer;
mod viewer;

pub use backend::{TerminalBackend, TextBackend, TextBackendHandle, ViewBackend};
pub use renderer::{DebugTextRenderer, RenderView, Renderer};
pub use viewer::Viewer;

pub fn crate_info() -> &'static str {
    concat!("fleetsim-render v", env!("CARGO_PKG_VERSION"))
}
