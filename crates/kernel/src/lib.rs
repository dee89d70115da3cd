//! Fleet kernel: world ownership, fixed-timestep stepping, sensor sampling
//! and asynchronous observation dispatch.
//!
//! # Invariants
//! - Every entity owns exactly one physics body; despawn and clear remove both.
//! - All registry, body and clock access happens under the world lock.
//! - The simulation clock only advances in whole timesteps.
//! - A sensor never samples more often than its period.
//! - Observations of one sensor reach their sinks in sampling order.
//! - Sink failures are counted and logged, never propagated into stepping.

pub mod arena;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod entity;
pub mod error;
pub mod loader;
pub mod model;
pub mod physics;
pub mod publish;
pub mod registry;
pub mod sensor;
pub mod snapshot;
pub mod world;

pub use config::{DispatchConfig, GuiOptions, WorldConfig};
pub use context::{SimContext, StepClock};
pub use dispatch::{
    DispatchMetrics, DispatchShutdownReport, NoopHook, ObservationDispatcher, ObservationHook,
    SensorRoute,
};
pub use entity::{Entity, EntitySpec};
pub use error::WorldError;
pub use fleetsim_scene::ConfigError;
pub use loader::LoadSummary;
pub use model::{BoxBlock, DifferentialDrive, EntityModel, GroundGrid};
pub use physics::{
    Body, BodyDef, BodyId, BodyKind, KinematicWorld, PhysicsFactory, PhysicsWorld, Shape,
    kinematic_factory,
};
pub use publish::{InProcessBus, PublishError, PublishedObservation, Publisher};
pub use registry::TypeRegistry;
pub use sensor::{LaserScanner, PoseSensor, Sensor, SensorCore, SensorOwner};
pub use snapshot::{EntityVisual, SceneSnapshot, SensorVisual};
pub use world::{SimParams, StepReport, World, WorldBuilder, WorldState};
