//! Renderable copies of the world, detached from the world lock.

use fleetsim_common::{EntityHandle, EntityKind, Pose, Twist};
use fleetsim_scene::SceneNode;

use crate::physics::Shape;
use crate::world::WorldState;

/// Sensor state a viewer may draw.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorVisual {
    pub name: String,
    pub class: String,
    pub last_sample_time: f64,
    pub pose_at_sample: Pose,
    pub visual: Option<SceneNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityVisual {
    pub handle: EntityHandle,
    pub kind: EntityKind,
    pub name: String,
    pub class: String,
    pub pose: Pose,
    pub twist: Twist,
    pub shape: Shape,
    pub sensors: Vec<SensorVisual>,
    pub visual: Option<SceneNode>,
}

/// Everything a renderer needs for one frame.
///
/// Captured under the world lock, so `entities.len() == body_count` always
/// holds for a world whose entities each own one body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SceneSnapshot {
    pub simul_time: f64,
    pub step_count: u64,
    pub body_count: usize,
    pub entities: Vec<EntityVisual>,
}

impl SceneSnapshot {
    pub(crate) fn capture(state: &WorldState) -> Self {
        let entities = state
            .entities()
            .map(|(handle, e)| EntityVisual {
                handle,
                kind: e.kind(),
                name: e.name().to_string(),
                class: e.class_name().to_string(),
                pose: e.pose(),
                twist: e.twist(),
                shape: e.shape(),
                sensors: e
                    .sensors()
                    .map(|s| {
                        let core = s.core();
                        SensorVisual {
                            name: core.name().to_string(),
                            class: core.class_name().to_string(),
                            last_sample_time: core.last_sample_time(),
                            pose_at_sample: core.pose_at_sample(),
                            visual: core.visual().cloned(),
                        }
                    })
                    .collect(),
                visual: e.visual().cloned(),
            })
            .collect();
        Self {
            simul_time: state.simul_time(),
            step_count: state.step_count(),
            body_count: state.body_count(),
            entities,
        }
    }

    pub fn vehicles(&self) -> impl Iterator<Item = &EntityVisual> {
        self.entities
            .iter()
            .filter(|e| e.kind == EntityKind::Vehicle)
    }

    /// First entity with this name.
    pub fn find(&self, name: &str) -> Option<&EntityVisual> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn is_consistent(&self) -> bool {
        self.entities.len() == self.body_count
    }
}

#[cfg(test)]
mod tests {
    use crate::World;
    use crate::entity::EntitySpec;
    use crate::model::DifferentialDrive;
    use crate::sensor::PoseSensor;
    use fleetsim_common::{EntityKind, Pose};

    #[test]
    fn snapshot_copies_entities_and_sensors() {
        let w = World::new();
        let v = w.spawn(
            EntitySpec::new(EntityKind::Vehicle, Box::new(DifferentialDrive::default()))
                .with_name("r1")
                .with_pose(Pose::new(3.0, 4.0, 0.0)),
        );
        w.attach_sensor(v, Box::new(PoseSensor::new())).unwrap();

        let snap = w.snapshot();
        assert!(snap.is_consistent());
        let r1 = snap.find("r1").unwrap();
        assert_eq!(r1.handle, v);
        assert_eq!(r1.class, "differential");
        assert_eq!(r1.pose.position.x, 3.0);
        assert_eq!(r1.sensors.len(), 1);
        assert_eq!(r1.sensors[0].name, "pose1");
        assert_eq!(snap.vehicles().count(), 1);
    }
}
