use std::sync::Arc;

use fleetsim_common::{EntityHandle, EntityKind, Observation, ObservationSource, Pose, Twist};
use fleetsim_scene::SceneNode;

use crate::context::SimContext;
use crate::model::EntityModel;
use crate::physics::{BodyId, Shape};
use crate::sensor::{Sensor, SensorOwner};
use crate::world::PendingObservation;

/// A vehicle, block or world element owned by a world.
///
/// Entities are only reachable through the world lock (visitors,
/// [`WorldState::entity`](crate::WorldState::entity)); no reference to one
/// outlives the lock guard.
pub struct Entity {
    pub(crate) kind: EntityKind,
    pub(crate) name: String,
    pub(crate) body: BodyId,
    pub(crate) shape: Shape,
    pub(crate) pose: Pose,
    pub(crate) twist: Twist,
    pub(crate) command: Twist,
    pub(crate) model: Box<dyn EntityModel>,
    pub(crate) sensors: Vec<Box<dyn Sensor>>,
    pub(crate) visual: Option<SceneNode>,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        self.model.class_name()
    }

    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Pose as of the end of the last step.
    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn twist(&self) -> Twist {
        self.twist
    }

    /// Current velocity command (vehicles only; zero otherwise).
    pub fn command(&self) -> Twist {
        self.command
    }

    pub fn visual(&self) -> Option<&SceneNode> {
        self.visual.as_ref()
    }

    pub fn sensors(&self) -> impl Iterator<Item = &dyn Sensor> {
        self.sensors.iter().map(|s| s.as_ref())
    }

    pub fn sensor_count(&self) -> usize {
        self.sensors.len()
    }

    pub fn sensor(&self, name: &str) -> Option<&dyn Sensor> {
        self.sensors().find(|s| s.core().name() == name)
    }

    /// Run every sensor through its gate and collect the observations.
    pub(crate) fn sample_sensors(
        &mut self,
        handle: EntityHandle,
        ctx: &SimContext<'_>,
        out: &mut Vec<PendingObservation>,
    ) {
        let owner = SensorOwner {
            handle,
            name: &self.name,
            body: self.body,
            pose: self.pose,
            twist: self.twist,
        };
        for sensor in &mut self.sensors {
            if !sensor.core_mut().should_sample(ctx.simul_time(), owner.pose) {
                continue;
            }
            let Some(payload) = sensor.sample(ctx, &owner) else {
                continue;
            };
            let core = sensor.core_mut();
            let observation = Observation {
                timestamp: ctx.simul_time(),
                source: ObservationSource {
                    handle,
                    name: owner.name.to_string(),
                },
                sensor: core.name().to_string(),
                sequence: core.next_sequence(),
                owner_pose: core.pose_at_sample(),
                payload,
            };
            tracing::trace!(
                owner = owner.name,
                sensor = core.name(),
                t = observation.timestamp,
                kind = observation.payload.kind(),
                "sensor sampled"
            );
            out.push(PendingObservation {
                observation: Arc::new(observation),
                clock: ctx.clock,
                route: core.route(),
            });
        }
    }
}

/// Everything needed to spawn an entity programmatically.
pub struct EntitySpec {
    pub kind: EntityKind,
    /// Auto-generated (`veh1`, `block2`, ...) when `None` or empty.
    pub name: Option<String>,
    pub pose: Pose,
    pub twist: Twist,
    pub model: Box<dyn EntityModel>,
    pub visual: Option<SceneNode>,
}

impl EntitySpec {
    pub fn new(kind: EntityKind, model: Box<dyn EntityModel>) -> Self {
        Self {
            kind,
            name: None,
            pose: Pose::default(),
            twist: Twist::default(),
            model,
            visual: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_pose(mut self, pose: Pose) -> Self {
        self.pose = pose;
        self
    }

    pub fn with_twist(mut self, twist: Twist) -> Self {
        self.twist = twist;
        self
    }

    pub fn with_visual(mut self, visual: SceneNode) -> Self {
        self.visual = Some(visual);
        self
    }
}
