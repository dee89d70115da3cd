use std::fmt;

use fleetsim_common::{EntityHandle, EntityKind};
use fleetsim_kernel::{DispatchMetrics, Entity, World};
use serde::Serialize;

/// World inspector for developer tooling.
///
/// Read-only queries against a world for debugging and command-line reports.
pub struct WorldInspector;

impl WorldInspector {
    /// Produce a summary of the world state.
    pub fn summary(world: &World) -> WorldSummary {
        let (simul_time, steps, entities, vehicles, blocks, elements, bodies, sensors) = {
            let state = world.lock();
            let mut sensors = 0;
            state.visit_vehicles(|_, e| sensors += e.sensor_count());
            (
                state.simul_time(),
                state.step_count(),
                state.entity_count(),
                state.vehicle_count(),
                state.block_count(),
                state.element_count(),
                state.body_count(),
                sensors,
            )
        };
        WorldSummary {
            simul_time,
            steps,
            entities,
            vehicles,
            blocks,
            elements,
            bodies,
            sensors,
            dispatch: world.dispatch_metrics(),
        }
    }

    pub fn inspect_entity(world: &World, handle: EntityHandle) -> Option<EntityInfo> {
        world.with_entity(handle, |e| EntityInfo::from_entity(handle, e))
    }

    /// All vehicles, in registry order.
    pub fn inspect_vehicles(world: &World) -> Vec<EntityInfo> {
        let mut out = Vec::new();
        world.visit_vehicles(|h, e| out.push(EntityInfo::from_entity(h, e)));
        out
    }

    /// Handles of every entity: vehicles, then blocks, then elements.
    pub fn list_entities(world: &World) -> Vec<EntityHandle> {
        let state = world.lock();
        let mut handles = Vec::with_capacity(state.entity_count());
        state.visit_vehicles(|h, _| handles.push(h));
        state.visit_blocks(|h, _| handles.push(h));
        state.visit_elements(|h, _| handles.push(h));
        handles
    }
}

/// Summary of world state for the inspector.
#[derive(Debug, Clone, Serialize)]
pub struct WorldSummary {
    pub simul_time: f64,
    pub steps: u64,
    pub entities: usize,
    pub vehicles: usize,
    pub blocks: usize,
    pub elements: usize,
    pub bodies: usize,
    pub sensors: usize,
    pub dispatch: DispatchMetrics,
}

impl fmt::Display for WorldSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "World: t={:.3}s steps={} entities={} (vehicles={} blocks={} elements={}) bodies={} sensors={}",
            self.simul_time,
            self.steps,
            self.entities,
            self.vehicles,
            self.blocks,
            self.elements,
            self.bodies,
            self.sensors
        )?;
        let d = &self.dispatch;
        write!(
            f,
            "Dispatch: completed={}/{} published={} (failed {}) logged={} (failed {}) hook_panics={} dropped={}",
            d.completed,
            d.enqueued,
            d.published,
            d.publish_failures,
            d.logged,
            d.log_failures,
            d.hook_panics,
            d.dropped
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorInfo {
    pub name: String,
    pub class: String,
    pub period: f64,
    pub last_sample_time: f64,
    pub topic: Option<String>,
    pub samples: u64,
}

/// Detailed info about a single entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityInfo {
    pub handle: EntityHandle,
    pub kind: EntityKind,
    pub name: String,
    pub class: String,
    pub position: [f64; 2],
    pub yaw: f64,
    pub speed: f64,
    pub sensors: Vec<SensorInfo>,
}

impl EntityInfo {
    fn from_entity(handle: EntityHandle, entity: &Entity) -> Self {
        let pose = entity.pose();
        Self {
            handle,
            kind: entity.kind(),
            name: entity.name().to_string(),
            class: entity.class_name().to_string(),
            position: [pose.position.x, pose.position.y],
            yaw: pose.yaw,
            speed: entity.twist().linear.length(),
            sensors: entity
                .sensors()
                .map(|s| {
                    let core = s.core();
                    SensorInfo {
                        name: core.name().to_string(),
                        class: core.class_name().to_string(),
                        period: core.period(),
                        last_sample_time: core.last_sample_time(),
                        topic: core.topic().map(str::to_string),
                        samples: core.sequence(),
                    }
                })
                .collect(),
        }
    }
}

impl fmt::Display for EntityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} [{}] pos=({:.2}, {:.2}) yaw={:.1}deg speed={:.2}",
            self.kind,
            self.handle,
            self.name,
            self.class,
            self.position[0],
            self.position[1],
            self.yaw.to_degrees(),
            self.speed
        )?;
        for s in &self.sensors {
            write!(f, "\n    {} [{}] period={}s samples={}", s.name, s.class, s.period, s.samples)?;
            if let Some(topic) = &s.topic {
                write!(f, " topic={topic}")?;
            }
        }
        Ok(())
    }
}
