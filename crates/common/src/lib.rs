//! Shared value types for the fleetsim workspace.
//!
//! Everything here is plain data: cheap to copy or clone, serializable, and
//! free of any reference back into a world.

pub mod observation;
pub mod types;

pub use observation::{Observation, ObservationPayload, ObservationSource};
pub use types::{EntityHandle, EntityKind, Pose, Twist, wrap_angle};
