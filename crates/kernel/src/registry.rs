//! Class-name to constructor registry for entity models and sensors.
//!
//! One registry value is built at startup and shared by every world that
//! uses it. Registration never replaces an existing entry, so repeated
//! registration (including of the built-ins) is a no-op.

use std::collections::BTreeMap;
use std::sync::{Arc, Once};

use fleetsim_common::{EntityHandle, EntityKind};
use fleetsim_scene::{ConfigError, SceneNode};
use parking_lot::RwLock;

use crate::model::{BoxBlock, DifferentialDrive, EntityModel, GroundGrid};
use crate::sensor::{LaserScanner, PoseSensor, Sensor};

pub type ModelCtor =
    Arc<dyn Fn(&SceneNode) -> Result<Box<dyn EntityModel>, ConfigError> + Send + Sync>;

pub type SensorCtor =
    Arc<dyn Fn(EntityHandle, &SceneNode) -> Result<Box<dyn Sensor>, ConfigError> + Send + Sync>;

pub struct TypeRegistry {
    models: RwLock<BTreeMap<(EntityKind, String), ModelCtor>>,
    sensors: RwLock<BTreeMap<String, SensorCtor>>,
    builtins: Once,
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self {
            models: RwLock::new(BTreeMap::new()),
            sensors: RwLock::new(BTreeMap::new()),
            builtins: Once::new(),
        }
    }
}

impl TypeRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_builtins();
        registry
    }

    /// Register the built-in classes. Runs at most once per registry.
    pub fn register_builtins(&self) {
        self.builtins.call_once(|| {
            self.register_model(EntityKind::Vehicle, DifferentialDrive::CLASS, |node| {
                Ok(Box::new(DifferentialDrive::from_node(node)?))
            });
            self.register_model(EntityKind::Block, BoxBlock::CLASS, |node| {
                Ok(Box::new(BoxBlock::from_node(node)?))
            });
            self.register_model(EntityKind::Element, GroundGrid::CLASS, |node| {
                Ok(Box::new(GroundGrid::from_node(node)?))
            });
            self.register_sensor(PoseSensor::CLASS, |owner, node| {
                Ok(Box::new(PoseSensor::from_node(owner, node)?))
            });
            self.register_sensor(LaserScanner::CLASS, |owner, node| {
                Ok(Box::new(LaserScanner::from_node(owner, node)?))
            });
            tracing::debug!("built-in entity and sensor classes registered");
        });
    }

    /// Returns false (and keeps the existing entry) if `class` is taken.
    pub fn register_model<F>(&self, kind: EntityKind, class: &str, ctor: F) -> bool
    where
        F: Fn(&SceneNode) -> Result<Box<dyn EntityModel>, ConfigError> + Send + Sync + 'static,
    {
        let mut models = self.models.write();
        let key = (kind, class.to_string());
        if models.contains_key(&key) {
            tracing::trace!(%kind, class, "model class already registered");
            return false;
        }
        models.insert(key, Arc::new(ctor));
        true
    }

    /// Returns false (and keeps the existing entry) if `class` is taken.
    pub fn register_sensor<F>(&self, class: &str, ctor: F) -> bool
    where
        F: Fn(EntityHandle, &SceneNode) -> Result<Box<dyn Sensor>, ConfigError>
            + Send
            + Sync
            + 'static,
    {
        let mut sensors = self.sensors.write();
        if sensors.contains_key(class) {
            tracing::trace!(class, "sensor class already registered");
            return false;
        }
        sensors.insert(class.to_string(), Arc::new(ctor));
        true
    }

    pub fn has_model(&self, kind: EntityKind, class: &str) -> bool {
        self.models.read().contains_key(&(kind, class.to_string()))
    }

    pub fn has_sensor(&self, class: &str) -> bool {
        self.sensors.read().contains_key(class)
    }

    pub fn model_classes(&self, kind: EntityKind) -> Vec<String> {
        self.models
            .read()
            .keys()
            .filter(|(k, _)| *k == kind)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn sensor_classes(&self) -> Vec<String> {
        self.sensors.read().keys().cloned().collect()
    }

    /// Build the model for an entity node from its mandatory `class`
    /// attribute.
    pub fn create_model(
        &self,
        kind: EntityKind,
        node: &SceneNode,
    ) -> Result<Box<dyn EntityModel>, ConfigError> {
        let class = node.required_attr("class")?;
        let ctor = self
            .models
            .read()
            .get(&(kind, class.to_string()))
            .cloned()
            .ok_or_else(|| ConfigError::unknown_type(kind.tag(), class))?;
        ctor(node)
    }

    /// Build a sensor from a `<sensor class="...">` node, including the
    /// parameters common to all sensors.
    pub fn create_sensor(
        &self,
        owner: EntityHandle,
        node: &SceneNode,
    ) -> Result<Box<dyn Sensor>, ConfigError> {
        if node.name() != "sensor" {
            return Err(ConfigError::WrongNode {
                expected: "sensor",
                found: node.name().to_string(),
            });
        }
        let class = node.required_attr("class")?;
        let ctor = self
            .sensors
            .read()
            .get(class)
            .cloned()
            .ok_or_else(|| ConfigError::unknown_type("sensor", class))?;
        let mut sensor = ctor(owner, node)?;
        sensor.core_mut().load_common(node)?;
        Ok(sensor)
    }
}
