//! Sensor contract, periodic sampling gate and the built-in sensors.

use std::path::PathBuf;
use std::sync::Arc;

use fleetsim_common::{EntityHandle, ObservationPayload, Pose, Twist};
use fleetsim_scene::{ConfigError, SceneNode};
use glam::DVec2;

use crate::context::SimContext;
use crate::dispatch::SensorRoute;
use crate::physics::{BodyId, raycast};

/// Sampling period used when a sensor does not set `<sensor_period>`.
pub const DEFAULT_SENSOR_PERIOD: f64 = 0.1;

/// Slack for rounding in `k * h` clocks compared against summed periods.
pub const GATE_TOLERANCE: f64 = 1e-9;

/// Read-only view of the entity a sensor is attached to.
#[derive(Debug, Clone, Copy)]
pub struct SensorOwner<'a> {
    pub handle: EntityHandle,
    pub name: &'a str,
    pub body: BodyId,
    pub pose: Pose,
    pub twist: Twist,
}

/// A sensor attached to one vehicle.
///
/// The world calls [`sample`](Self::sample) only after the sampling gate in
/// [`SensorCore::should_sample`] admitted the current step, and turns the
/// returned payload into an [`Observation`](fleetsim_common::Observation).
pub trait Sensor: Send {
    fn core(&self) -> &SensorCore;
    fn core_mut(&mut self) -> &mut SensorCore;

    /// Produce this step's measurement. `None` skips the observation.
    fn sample(&mut self, ctx: &SimContext<'_>, owner: &SensorOwner<'_>)
    -> Option<ObservationPayload>;
}

/// State shared by every sensor type.
#[derive(Debug, Clone)]
pub struct SensorCore {
    class: String,
    name: String,
    period: f64,
    last_sample_time: f64,
    pose_at_sample: Pose,
    topic: Option<String>,
    log_path: Option<PathBuf>,
    visual: Option<SceneNode>,
    sequence: u64,
    serial: Option<u64>,
    route: Option<Arc<SensorRoute>>,
}

impl SensorCore {
    pub fn new(class: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            name: String::new(),
            period: DEFAULT_SENSOR_PERIOD,
            last_sample_time: 0.0,
            pose_at_sample: Pose::default(),
            topic: None,
            log_path: None,
            visual: None,
            sequence: 0,
            serial: None,
            route: None,
        }
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    /// Empty until assigned; the world names unnamed sensors on attach.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the name if none has been assigned yet. Returns whether it took.
    pub fn set_name(&mut self, name: impl Into<String>) -> bool {
        if !self.name.is_empty() {
            return false;
        }
        self.name = name.into();
        !self.name.is_empty()
    }

    pub fn period(&self) -> f64 {
        self.period
    }

    pub fn set_period(&mut self, period: f64) -> Result<(), ConfigError> {
        if !(period.is_finite() && period >= 0.0) {
            return Err(ConfigError::invalid_value(
                "sensor_period",
                "sensor",
                format!("{period} is not a finite, non-negative number"),
            ));
        }
        self.period = period;
        Ok(())
    }

    pub fn last_sample_time(&self) -> f64 {
        self.last_sample_time
    }

    /// Owner pose recorded by the last admitted sample.
    pub fn pose_at_sample(&self) -> Pose {
        self.pose_at_sample
    }

    pub fn topic(&self) -> Option<&str> {
        self.topic.as_deref()
    }

    pub fn set_topic(&mut self, topic: Option<String>) {
        self.topic = topic.filter(|t| !t.is_empty());
        self.route = None;
    }

    pub fn log_path(&self) -> Option<&std::path::Path> {
        self.log_path.as_deref()
    }

    pub fn set_log_path(&mut self, path: Option<PathBuf>) {
        self.log_path = path;
        self.route = None;
    }

    pub fn visual(&self) -> Option<&SceneNode> {
        self.visual.as_ref()
    }

    /// Observations produced so far.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Sampling gate.
    ///
    /// Admits iff `simul_time >= last_sample_time + period` (within
    /// [`GATE_TOLERANCE`]), recording the new sample time and the owner
    /// pose. A rejected call changes nothing.
    pub fn should_sample(&mut self, simul_time: f64, owner_pose: Pose) -> bool {
        if simul_time + GATE_TOLERANCE < self.last_sample_time + self.period {
            return false;
        }
        self.last_sample_time = simul_time;
        self.pose_at_sample = owner_pose;
        true
    }

    /// Parse the parameters every sensor accepts: the `name` attribute,
    /// `<sensor_period>`, `<log_file>` (alias `<save_to_rawlog>`),
    /// `<publish>` and `<visual>`.
    pub fn load_common(&mut self, node: &SceneNode) -> Result<(), ConfigError> {
        if let Some(name) = node.attr("name").filter(|n| !n.is_empty()) {
            self.name = name.to_string();
        }
        if let Some(period) = node.param::<f64>("sensor_period")? {
            self.set_period(period)?;
        }
        let log = match node.param::<String>("log_file")? {
            Some(path) => Some(path),
            None => node.param::<String>("save_to_rawlog")?,
        };
        if let Some(path) = log.filter(|p| !p.is_empty()) {
            self.set_log_path(Some(PathBuf::from(path)));
        }
        if let Some(publish) = node.child("publish") {
            let topic = publish.param::<String>("publish_topic")?;
            if publish.bool_attr("enabled")?.unwrap_or(true) {
                self.set_topic(topic.or_else(|| self.topic.clone()));
            } else {
                self.set_topic(None);
            }
        }
        if let Some(visual) = node.child("visual") {
            self.visual = Some(visual.clone());
        }
        Ok(())
    }

    /// Replace `${NAME}` and `${PARENT_NAME}` in the topic and log path.
    pub(crate) fn expand_vars(&mut self, parent_name: &str) {
        let expand = |s: &str| {
            s.replace("${NAME}", &self.name)
                .replace("${PARENT_NAME}", parent_name)
        };
        let topic = self.topic.as_deref().map(expand);
        let log = self
            .log_path
            .as_deref()
            .map(|p| PathBuf::from(expand(&p.to_string_lossy())));
        self.set_topic(topic);
        self.set_log_path(log);
    }

    pub(crate) fn bind(&mut self, serial: u64) {
        self.serial = Some(serial);
        self.route = None;
    }

    pub(crate) fn next_sequence(&mut self) -> u64 {
        let seq = self.sequence;
        self.sequence += 1;
        seq
    }

    /// Sink routing for this sensor, built on first use after any change.
    pub(crate) fn route(&mut self) -> Arc<SensorRoute> {
        let serial = self.serial.unwrap_or(0);
        let route = self.route.get_or_insert_with(|| {
            Arc::new(SensorRoute::new(
                serial,
                self.name.clone(),
                self.topic.clone(),
                self.log_path.clone(),
            ))
        });
        Arc::clone(route)
    }
}

// ── pose ───────────────────────────────────────────────────────────

/// Ground-truth odometry of the owner.
#[derive(Debug, Clone)]
pub struct PoseSensor {
    core: SensorCore,
}

impl PoseSensor {
    pub const CLASS: &'static str = "pose";

    pub fn new() -> Self {
        Self {
            core: SensorCore::new(Self::CLASS),
        }
    }

    pub fn from_node(_owner: EntityHandle, _node: &SceneNode) -> Result<Self, ConfigError> {
        Ok(Self::new())
    }
}

impl Default for PoseSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl Sensor for PoseSensor {
    fn core(&self) -> &SensorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }

    fn sample(
        &mut self,
        _ctx: &SimContext<'_>,
        owner: &SensorOwner<'_>,
    ) -> Option<ObservationPayload> {
        Some(ObservationPayload::Odometry {
            pose: owner.pose,
            twist: owner.twist,
        })
    }
}

// ── laser ──────────────────────────────────────────────────────────

/// Planar range scanner casting rays against collidable bodies.
#[derive(Debug, Clone)]
pub struct LaserScanner {
    core: SensorCore,
    /// Mounting pose in the owner frame.
    pub mount: Pose,
    pub fov: f64,
    pub rays: usize,
    pub max_range: f64,
}

impl LaserScanner {
    pub const CLASS: &'static str = "laser";

    pub fn new(fov: f64, rays: usize, max_range: f64) -> Self {
        Self {
            core: SensorCore::new(Self::CLASS),
            mount: Pose::default(),
            fov,
            rays,
            max_range,
        }
    }

    /// Reads `<fov_degrees>` (180), `<nrays>` (181), `<range_max>` (80) and
    /// `<pose>x y yaw_deg</pose>`.
    pub fn from_node(_owner: EntityHandle, node: &SceneNode) -> Result<Self, ConfigError> {
        let fov_deg: f64 = node.param_or("fov_degrees", 180.0)?;
        let rays: usize = node.param_or("nrays", 181)?;
        let max_range: f64 = node.param_or("range_max", 80.0)?;
        if rays == 0 {
            return Err(ConfigError::invalid_value("nrays", node.name(), "must be at least 1"));
        }
        if !(max_range.is_finite() && max_range > 0.0) {
            return Err(ConfigError::invalid_value("range_max", node.name(), "must be positive"));
        }
        let mut laser = Self::new(fov_deg.to_radians(), rays, max_range);
        if let Some(p) = node.vector_param("pose", 3)? {
            laser.mount = Pose::new(p[0], p[1], p[2].to_radians());
        }
        Ok(laser)
    }

    fn angle_increment(&self) -> f64 {
        if self.rays > 1 {
            self.fov / (self.rays - 1) as f64
        } else {
            0.0
        }
    }
}

impl Sensor for LaserScanner {
    fn core(&self) -> &SensorCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SensorCore {
        &mut self.core
    }

    fn sample(
        &mut self,
        ctx: &SimContext<'_>,
        owner: &SensorOwner<'_>,
    ) -> Option<ObservationPayload> {
        let origin = owner.pose.compose(&self.mount);
        let angle_min = -self.fov / 2.0;
        let increment = self.angle_increment();
        let mut ranges = Vec::with_capacity(self.rays);
        let mut valid = Vec::with_capacity(self.rays);
        for i in 0..self.rays {
            let dir = DVec2::from_angle(origin.yaw + angle_min + increment * i as f64);
            match raycast(ctx.physics, origin.position, dir, self.max_range, Some(owner.body)) {
                Some(d) => {
                    ranges.push(d as f32);
                    valid.push(true);
                }
                None => {
                    ranges.push(self.max_range as f32);
                    valid.push(false);
                }
            }
        }
        Some(ObservationPayload::RangeScan {
            angle_min,
            angle_increment: increment,
            max_range: self.max_range as f32,
            ranges,
            valid,
        })
    }
}
