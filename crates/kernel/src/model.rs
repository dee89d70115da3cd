//! Per-class entity behaviour.
//!
//! An [`EntityModel`] describes the body an entity needs and, for vehicles,
//! turns the current velocity command into body velocities before every
//! physics step. Models are built from scene nodes by constructors held in
//! the [`TypeRegistry`](crate::TypeRegistry).

use fleetsim_common::{Pose, Twist};
use fleetsim_scene::{ConfigError, SceneNode};
use glam::DVec2;

use crate::context::StepClock;
use crate::physics::{Body, BodyDef, BodyKind, Shape};

pub trait EntityModel: Send {
    /// Registry class name, e.g. `"differential"`.
    fn class_name(&self) -> &str;

    /// Body to create when the entity is spawned at `pose`.
    fn body_def(&self, pose: Pose, twist: Twist) -> BodyDef;

    /// Called with the world lock held, before the physics step.
    fn pre_step(&mut self, _clock: &StepClock, _command: &Twist, _body: &mut Body) {}
}

// ── differential ───────────────────────────────────────────────────

/// Two-wheeled vehicle commanded by forward speed and yaw rate.
#[derive(Debug, Clone, PartialEq)]
pub struct DifferentialDrive {
    pub radius: f64,
    pub mass: f64,
    pub max_speed: f64,
    pub max_turn_rate: f64,
}

impl Default for DifferentialDrive {
    fn default() -> Self {
        Self {
            radius: 0.3,
            mass: 15.0,
            max_speed: 2.0,
            max_turn_rate: 2.0,
        }
    }
}

impl DifferentialDrive {
    pub const CLASS: &'static str = "differential";

    /// Reads `<radius>`, `<mass>`, `<max_speed>` and `<max_turn_rate_deg>`.
    pub fn from_node(node: &SceneNode) -> Result<Self, ConfigError> {
        let d = Self::default();
        let model = Self {
            radius: node.param_or("radius", d.radius)?,
            mass: node.param_or("mass", d.mass)?,
            max_speed: node.param_or("max_speed", d.max_speed)?,
            max_turn_rate: node
                .param::<f64>("max_turn_rate_deg")?
                .map_or(d.max_turn_rate, f64::to_radians),
        };
        for (param, v) in [
            ("radius", model.radius),
            ("mass", model.mass),
            ("max_speed", model.max_speed),
            ("max_turn_rate_deg", model.max_turn_rate),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(ConfigError::invalid_value(param, node.name(), "must be positive"));
            }
        }
        Ok(model)
    }
}

impl EntityModel for DifferentialDrive {
    fn class_name(&self) -> &str {
        Self::CLASS
    }

    fn body_def(&self, pose: Pose, twist: Twist) -> BodyDef {
        let mut def = BodyDef::new(BodyKind::Kinematic, Shape::Circle { radius: self.radius }).at(pose, twist);
        def.mass = self.mass;
        def
    }

    fn pre_step(&mut self, _clock: &StepClock, command: &Twist, body: &mut Body) {
        let v = command.linear.x.clamp(-self.max_speed, self.max_speed);
        let w = command.angular.clamp(-self.max_turn_rate, self.max_turn_rate);
        body.twist = Twist {
            linear: body.pose.heading() * v,
            angular: w,
        };
    }
}

// ── box ────────────────────────────────────────────────────────────

/// Rectangular obstacle. Static unless `static="false"`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxBlock {
    pub half_extents: DVec2,
    pub mass: f64,
    pub is_static: bool,
}

impl BoxBlock {
    pub const CLASS: &'static str = "box";

    /// Static box of the given half extents.
    pub fn new(half_extents: DVec2) -> Self {
        Self {
            half_extents,
            mass: 10.0,
            is_static: true,
        }
    }

    /// `<size>w h</size>` is mandatory.
    pub fn from_node(node: &SceneNode) -> Result<Self, ConfigError> {
        let size = node
            .vector_param("size", 2)?
            .ok_or_else(|| ConfigError::missing_element("size", format!("<{}>", node.name())))?;
        if size.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(ConfigError::invalid_value("size", node.name(), "must be positive"));
        }
        let mass: f64 = node.param_or("mass", 10.0)?;
        if !(mass.is_finite() && mass > 0.0) {
            return Err(ConfigError::invalid_value("mass", node.name(), "must be positive"));
        }
        Ok(Self {
            half_extents: DVec2::new(size[0], size[1]) * 0.5,
            mass,
            is_static: node.bool_attr("static")?.unwrap_or(true),
        })
    }
}

impl EntityModel for BoxBlock {
    fn class_name(&self) -> &str {
        Self::CLASS
    }

    fn body_def(&self, pose: Pose, twist: Twist) -> BodyDef {
        let kind = if self.is_static {
            BodyKind::Static
        } else {
            BodyKind::Dynamic
        };
        let mut def = BodyDef::new(
            kind,
            Shape::Box {
                half_extents: self.half_extents,
            },
        )
        .at(pose, twist);
        def.mass = self.mass;
        def
    }
}

// ── ground_grid ────────────────────────────────────────────────────

/// Visual floor grid. Static and invisible to range sensors.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundGrid {
    pub extent: f64,
    pub spacing: f64,
}

impl Default for GroundGrid {
    fn default() -> Self {
        Self {
            extent: 50.0,
            spacing: 1.0,
        }
    }
}

impl GroundGrid {
    pub const CLASS: &'static str = "ground_grid";

    pub fn from_node(node: &SceneNode) -> Result<Self, ConfigError> {
        let grid = Self {
            extent: node.param_or("extent", 50.0)?,
            spacing: node.param_or("interval", 1.0)?,
        };
        if !(grid.spacing.is_finite() && grid.spacing > 0.0) {
            return Err(ConfigError::invalid_value("interval", node.name(), "must be positive"));
        }
        Ok(grid)
    }
}

impl EntityModel for GroundGrid {
    fn class_name(&self) -> &str {
        Self::CLASS
    }

    fn body_def(&self, pose: Pose, _twist: Twist) -> BodyDef {
        let mut def = BodyDef::new(BodyKind::Static, Shape::Empty).at(pose, Twist::default());
        def.collidable = false;
        def
    }
}
