//! Physics backend contract and the default kinematic backend.
//!
//! The world only decides when and how often the backend is stepped. Every
//! registered entity owns exactly one body; bodies are created on spawn and
//! destroyed on despawn or clear.

use std::collections::BTreeMap;

use fleetsim_common::{Pose, Twist, wrap_angle};
use glam::DVec2;
use serde::{Deserialize, Serialize};

/// Opaque key of a body inside a [`PhysicsWorld`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BodyId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BodyKind {
    /// Never moves.
    Static,
    /// Velocity set by its model every step; no friction.
    Kinematic,
    /// Free body slowed down by friction.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Shape {
    Circle { radius: f64 },
    Box { half_extents: DVec2 },
    /// No footprint (markers, grids).
    Empty,
}

impl Shape {
    /// Radius of the smallest enclosing circle.
    pub fn bounding_radius(&self) -> f64 {
        match *self {
            Self::Circle { radius } => radius,
            Self::Box { half_extents } => half_extents.length(),
            Self::Empty => 0.0,
        }
    }
}

/// Template for [`PhysicsWorld::create_body`].
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDef {
    pub kind: BodyKind,
    pub pose: Pose,
    pub twist: Twist,
    pub shape: Shape,
    pub mass: f64,
    /// Coulomb friction coefficient against the ground.
    pub friction: f64,
    /// Whether the body blocks range sensors.
    pub collidable: bool,
}

impl BodyDef {
    pub fn new(kind: BodyKind, shape: Shape) -> Self {
        Self {
            kind,
            pose: Pose::default(),
            twist: Twist::default(),
            shape,
            mass: 1.0,
            friction: 0.5,
            collidable: true,
        }
    }

    pub fn at(mut self, pose: Pose, twist: Twist) -> Self {
        self.pose = pose;
        self.twist = twist;
        self
    }
}

/// Live state of one body.
#[derive(Debug, Clone, PartialEq)]
pub struct Body {
    pub kind: BodyKind,
    pub pose: Pose,
    pub twist: Twist,
    pub shape: Shape,
    pub mass: f64,
    pub friction: f64,
    pub collidable: bool,
}

impl From<BodyDef> for Body {
    fn from(def: BodyDef) -> Self {
        let twist = if def.kind == BodyKind::Static {
            Twist::default()
        } else {
            def.twist
        };
        Self {
            kind: def.kind,
            pose: def.pose,
            twist,
            shape: def.shape,
            mass: def.mass,
            friction: def.friction,
            collidable: def.collidable,
        }
    }
}

/// Rigid-body solver plugged into a world.
///
/// Calls always happen with the world lock held, never concurrently.
pub trait PhysicsWorld: Send {
    fn create_body(&mut self, def: BodyDef) -> BodyId;
    /// Returns false when the id is unknown.
    fn destroy_body(&mut self, id: BodyId) -> bool;
    fn body(&self, id: BodyId) -> Option<&Body>;
    fn body_mut(&mut self, id: BodyId) -> Option<&mut Body>;
    fn body_count(&self) -> usize;
    fn set_gravity(&mut self, gravity: f64);
    /// Advance every body by `dt` seconds.
    fn step(&mut self, dt: f64, velocity_iterations: u32, position_iterations: u32);
    fn bodies(&self) -> Box<dyn Iterator<Item = (BodyId, &Body)> + '_>;
}

/// Builds a fresh backend; called at world creation and on every clear.
pub type PhysicsFactory = std::sync::Arc<dyn Fn(f64) -> Box<dyn PhysicsWorld> + Send + Sync>;

pub fn kinematic_factory() -> PhysicsFactory {
    std::sync::Arc::new(|gravity| Box::new(KinematicWorld::new(gravity)))
}

/// Integrates velocities into poses; dynamic bodies decelerate by `mu * g`.
/// Collisions are not resolved.
#[derive(Debug, Default)]
pub struct KinematicWorld {
    bodies: BTreeMap<BodyId, Body>,
    next_id: u64,
    gravity: f64,
    steps: u64,
}

impl KinematicWorld {
    pub fn new(gravity: f64) -> Self {
        Self {
            gravity,
            ..Self::default()
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl PhysicsWorld for KinematicWorld {
    fn create_body(&mut self, def: BodyDef) -> BodyId {
        let id = BodyId(self.next_id);
        self.next_id += 1;
        self.bodies.insert(id, Body::from(def));
        id
    }

    fn destroy_body(&mut self, id: BodyId) -> bool {
        self.bodies.remove(&id).is_some()
    }

    fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(&id)
    }

    fn body_mut(&mut self, id: BodyId) -> Option<&mut Body> {
        self.bodies.get_mut(&id)
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }

    fn set_gravity(&mut self, gravity: f64) {
        self.gravity = gravity;
    }

    fn step(&mut self, dt: f64, _velocity_iterations: u32, _position_iterations: u32) {
        for body in self.bodies.values_mut() {
            match body.kind {
                BodyKind::Static => continue,
                BodyKind::Dynamic => apply_friction(body, self.gravity, dt),
                BodyKind::Kinematic => {}
            }
            body.pose.position += body.twist.linear * dt;
            body.pose.yaw = wrap_angle(body.pose.yaw + body.twist.angular * dt);
        }
        self.steps += 1;
    }

    fn bodies(&self) -> Box<dyn Iterator<Item = (BodyId, &Body)> + '_> {
        Box::new(self.bodies.iter().map(|(id, b)| (*id, b)))
    }
}

fn apply_friction(body: &mut Body, gravity: f64, dt: f64) {
    let decel = body.friction * gravity * dt;
    let speed = body.twist.linear.length();
    if speed <= decel {
        body.twist.linear = DVec2::ZERO;
    } else {
        body.twist.linear *= (speed - decel) / speed;
    }
    let spin = body.twist.angular.abs();
    body.twist.angular = if spin <= decel {
        0.0
    } else {
        body.twist.angular.signum() * (spin - decel)
    };
}

/// Distance along a ray to the nearest collidable body, skipping `exclude`.
pub fn raycast(
    physics: &dyn PhysicsWorld,
    origin: DVec2,
    direction: DVec2,
    max_range: f64,
    exclude: Option<BodyId>,
) -> Option<f64> {
    let dir = direction.normalize_or_zero();
    if dir == DVec2::ZERO {
        return None;
    }
    physics
        .bodies()
        .filter(|(id, b)| b.collidable && Some(*id) != exclude)
        .filter_map(|(_, b)| ray_hit(origin, dir, b))
        .filter(|d| *d <= max_range)
        .min_by(|a, b| a.total_cmp(b))
}

fn ray_hit(origin: DVec2, dir: DVec2, body: &Body) -> Option<f64> {
    match body.shape {
        Shape::Circle { radius } => {
            let oc = origin - body.pose.position;
            let b = oc.dot(dir);
            let c = oc.length_squared() - radius * radius;
            let disc = b * b - c;
            if disc < 0.0 {
                return None;
            }
            let sq = disc.sqrt();
            [-b - sq, -b + sq].into_iter().find(|t| *t >= 0.0)
        }
        Shape::Box { half_extents } => {
            // Slab test in the box frame.
            let rot = DVec2::from_angle(-body.pose.yaw);
            let o = rot.rotate(origin - body.pose.position);
            let d = rot.rotate(dir);
            let mut t_min = f64::NEG_INFINITY;
            let mut t_max = f64::INFINITY;
            for (oi, di, hi) in [(o.x, d.x, half_extents.x), (o.y, d.y, half_extents.y)] {
                if di.abs() < 1e-12 {
                    if oi.abs() > hi {
                        return None;
                    }
                    continue;
                }
                let (t1, t2) = ((-hi - oi) / di, (hi - oi) / di);
                t_min = t_min.max(t1.min(t2));
                t_max = t_max.min(t1.max(t2));
            }
            if t_max < t_min || t_max < 0.0 {
                None
            } else {
                Some(t_min.max(0.0))
            }
        }
        Shape::Empty => None,
    }
}
