use fleetsim_common::EntityHandle;
use thiserror::Error;

/// Runtime errors from world operations.
///
/// Scene and configuration problems are reported as
/// [`ConfigError`](crate::ConfigError) instead.
#[derive(Debug, Error, PartialEq)]
pub enum WorldError {
    #[error("entity handle {0} is stale or was never issued by this world")]
    StaleHandle(EntityHandle),

    #[error("entity {0} is not a vehicle")]
    NotAVehicle(EntityHandle),

    #[error("timestep must be finite and positive, got {0}")]
    InvalidTimestep(f64),

    #[error("simulation interval must be finite and non-negative, got {0}")]
    InvalidDt(f64),
}
