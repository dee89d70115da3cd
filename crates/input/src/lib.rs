//! Keyboard input and the GUI input/output exchange.
//!
//! # Invariants
//! - The key and message cells never share a lock with the world.
//! - A new key event overwrites an unconsumed one; there is no queue.
//! - Apps react to [`Action`]s, not to raw key codes.

pub mod action;
pub mod exchange;
pub mod key;

pub use action::{Action, Teleop};
pub use exchange::{GuiExchange, GuiIo};
pub use key::{KeyCode, KeyEvent, Modifiers};
