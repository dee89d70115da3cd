//! Scene description parsing.
//!
//! A scene is an XML document whose root is `<world>`. This crate only turns
//! text into an owned [`SceneNode`] tree and offers typed accessors over it;
//! interpreting the tree is the kernel's job.

pub mod error;
pub mod node;
pub mod parser;

pub use error::{ConfigError, Result};
pub use node::SceneNode;
pub use parser::{parse_file, parse_str};
