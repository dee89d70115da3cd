use serde::{Deserialize, Serialize};

use crate::physics::PhysicsWorld;

/// Clock value of one discrete step. Copied into every dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct StepClock {
    /// Simulation time in seconds.
    pub simul_time: f64,
    /// Length of the step in seconds.
    pub dt: f64,
}

/// Ephemeral view handed to sensors during one stepping pass.
///
/// Lives only while the world lock is held; nothing here may be stored.
pub struct SimContext<'a> {
    pub clock: StepClock,
    pub physics: &'a dyn PhysicsWorld,
}

impl<'a> SimContext<'a> {
    pub fn new(clock: StepClock, physics: &'a dyn PhysicsWorld) -> Self {
        Self { clock, physics }
    }

    pub fn simul_time(&self) -> f64 {
        self.clock.simul_time
    }
}
