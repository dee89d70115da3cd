//! Developer tooling: read-only world inspection.
//!
//! # Invariants
//! - Inspection takes the world lock once per query and never mutates state.

mod inspector;

pub use inspector::{EntityInfo, SensorInfo, WorldInspector, WorldSummary};

pub fn crate_info() -> &'static str {
    concat!("fleetsim-tools v", env!("CARGO_PKG_VERSION"))
}
