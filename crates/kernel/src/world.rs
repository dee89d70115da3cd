use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use fleetsim_common::{EntityHandle, EntityKind, Observation, Twist};
use fleetsim_input::GuiExchange;
use glam::DVec2;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::arena::Arena;
use crate::config::{GuiOptions, WorldConfig};
use crate::context::{SimContext, StepClock};
use crate::dispatch::{
    DispatchMetrics, DispatchShutdownReport, ObservationDispatcher, ObservationHook, SensorRoute,
};
use crate::entity::{Entity, EntitySpec};
use crate::error::WorldError;
use crate::physics::{PhysicsFactory, PhysicsWorld, kinematic_factory};
use crate::publish::{InProcessBus, Publisher};
use crate::registry::TypeRegistry;
use crate::sensor::Sensor;
use crate::snapshot::SceneSnapshot;
use crate::ConfigError;

/// Pending time below this is treated as zero.
const PENDING_EPSILON: f64 = 1e-9;

/// Global simulation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimParams {
    pub timestep: f64,
    pub gravity: f64,
    pub velocity_iterations: u32,
    pub position_iterations: u32,
}

impl From<&WorldConfig> for SimParams {
    fn from(config: &WorldConfig) -> Self {
        Self {
            timestep: config.timestep,
            gravity: config.gravity,
            velocity_iterations: config.velocity_iterations,
            position_iterations: config.position_iterations,
        }
    }
}

/// Outcome of one [`World::run_simulation`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Discrete steps executed by this call.
    pub steps: u64,
    /// Clock value after the call.
    pub simul_time: f64,
    pub wall_time: Duration,
}

/// An observation sampled during a step, waiting to be reported once the
/// world lock is released.
pub(crate) struct PendingObservation {
    pub(crate) observation: Arc<Observation>,
    pub(crate) clock: StepClock,
    pub(crate) route: Arc<SensorRoute>,
}

/// Everything protected by the world lock.
///
/// Obtained through [`World::lock`]. Methods here assume the lock is held;
/// use them to batch several operations under one acquisition.
pub struct WorldState {
    entities: Arena<Entity>,
    vehicles: BTreeMap<String, Vec<EntityHandle>>,
    blocks: BTreeMap<String, Vec<EntityHandle>>,
    elements: Vec<EntityHandle>,
    physics: Box<dyn PhysicsWorld>,
    physics_factory: PhysicsFactory,
    params: SimParams,
    gui_options: GuiOptions,
    clock_origin: f64,
    steps_since_origin: u64,
    total_steps: u64,
    pending: f64,
    next_sensor_serial: u64,
    /// Entities spawned per kind since creation or the last clear; drives
    /// auto-naming.
    spawned_per_kind: BTreeMap<EntityKind, usize>,
}

impl WorldState {
    fn new(config: &WorldConfig, physics_factory: PhysicsFactory) -> Self {
        let params = SimParams::from(config);
        Self {
            entities: Arena::new(),
            vehicles: BTreeMap::new(),
            blocks: BTreeMap::new(),
            elements: Vec::new(),
            physics: physics_factory(params.gravity),
            physics_factory,
            params,
            gui_options: config.gui.clone(),
            clock_origin: 0.0,
            steps_since_origin: 0,
            total_steps: 0,
            pending: 0.0,
            next_sensor_serial: 0,
            spawned_per_kind: BTreeMap::new(),
        }
    }

    /// Simulation clock in seconds.
    pub fn simul_time(&self) -> f64 {
        self.clock_origin + self.steps_since_origin as f64 * self.params.timestep
    }

    /// Discrete steps executed since creation or the last clear.
    pub fn step_count(&self) -> u64 {
        self.total_steps
    }

    pub fn params(&self) -> SimParams {
        self.params
    }

    /// Change the fixed timestep. The clock keeps its current value.
    pub fn set_timestep(&mut self, h: f64) -> Result<(), WorldError> {
        if !(h.is_finite() && h > 0.0) {
            return Err(WorldError::InvalidTimestep(h));
        }
        self.clock_origin = self.simul_time();
        self.steps_since_origin = 0;
        self.params.timestep = h;
        Ok(())
    }

    pub fn set_gravity(&mut self, gravity: f64) {
        self.params.gravity = gravity;
        self.physics.set_gravity(gravity);
    }

    pub fn set_solver_iterations(&mut self, velocity: u32, position: u32) {
        self.params.velocity_iterations = velocity.max(1);
        self.params.position_iterations = position.max(1);
    }

    pub fn gui_options(&self) -> &GuiOptions {
        &self.gui_options
    }

    pub fn set_gui_options(&mut self, options: GuiOptions) {
        self.gui_options = options;
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.values().map(Vec::len).sum()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.values().map(Vec::len).sum()
    }

    pub fn element_count(&self) -> usize {
        self.elements.len()
    }

    pub fn body_count(&self) -> usize {
        self.physics.body_count()
    }

    pub fn physics(&self) -> &dyn PhysicsWorld {
        &*self.physics
    }

    pub fn entity(&self, handle: EntityHandle) -> Option<&Entity> {
        self.entities.get(handle)
    }

    /// All vehicles registered under `name`, in spawn order.
    pub fn vehicles_named(&self, name: &str) -> &[EntityHandle] {
        self.vehicles.get(name).map_or(&[], Vec::as_slice)
    }

    /// Create an entity and its physics body.
    pub fn spawn(&mut self, spec: EntitySpec) -> EntityHandle {
        let kind = spec.kind;
        let serial = {
            let spawned = self.spawned_per_kind.entry(kind).or_default();
            *spawned += 1;
            *spawned
        };
        let name = spec
            .name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("{}{}", kind.name_prefix(), serial));
        let def = spec.model.body_def(spec.pose, spec.twist);
        let shape = def.shape;
        let body = self.physics.create_body(def);
        let (pose, twist) = self
            .physics
            .body(body)
            .map_or((spec.pose, spec.twist), |b| (b.pose, b.twist));

        // A vehicle keeps its initial velocity as its body-frame command
        // until it is commanded otherwise.
        let command = match kind {
            EntityKind::Vehicle => Twist {
                linear: DVec2::from_angle(-spec.pose.yaw).rotate(spec.twist.linear),
                angular: spec.twist.angular,
            },
            _ => Twist::default(),
        };

        let handle = self.entities.insert(Entity {
            kind,
            name: name.clone(),
            body,
            shape,
            pose,
            twist,
            command,
            model: spec.model,
            sensors: Vec::new(),
            visual: spec.visual,
        });
        match kind {
            EntityKind::Vehicle => self.vehicles.entry(name.clone()).or_default().push(handle),
            EntityKind::Block => self.blocks.entry(name.clone()).or_default().push(handle),
            EntityKind::Element => self.elements.push(handle),
        }
        tracing::debug!(%handle, %kind, name, "entity spawned");
        handle
    }

    /// Remove an entity together with its body and sensors.
    pub fn despawn(&mut self, handle: EntityHandle) -> Result<(), WorldError> {
        let entity = self
            .entities
            .remove(handle)
            .ok_or(WorldError::StaleHandle(handle))?;
        self.physics.destroy_body(entity.body);
        match entity.kind {
            EntityKind::Vehicle => unregister(&mut self.vehicles, &entity.name, handle),
            EntityKind::Block => unregister(&mut self.blocks, &entity.name, handle),
            EntityKind::Element => self.elements.retain(|h| *h != handle),
        }
        tracing::debug!(%handle, kind = %entity.kind, name = entity.name, "entity despawned");
        Ok(())
    }

    /// Attach a sensor to a vehicle. Returns the sensor's final name.
    ///
    /// Unnamed sensors are called `{class}{k}` where `k` is the owner's
    /// sensor count plus one. `${NAME}` and `${PARENT_NAME}` in the topic and
    /// log path are expanded here.
    pub fn attach_sensor(
        &mut self,
        handle: EntityHandle,
        mut sensor: Box<dyn Sensor>,
    ) -> Result<String, WorldError> {
        let entity = self
            .entities
            .get_mut(handle)
            .ok_or(WorldError::StaleHandle(handle))?;
        if entity.kind != EntityKind::Vehicle {
            return Err(WorldError::NotAVehicle(handle));
        }
        let core = sensor.core_mut();
        let default_name = format!("{}{}", core.class_name(), entity.sensors.len() + 1);
        core.set_name(default_name);
        core.expand_vars(&entity.name);
        core.bind(self.next_sensor_serial);
        self.next_sensor_serial += 1;
        let name = core.name().to_string();
        tracing::debug!(owner = entity.name, sensor = name, class = core.class_name(), "sensor attached");
        entity.sensors.push(sensor);
        Ok(name)
    }

    /// Set the velocity command of a vehicle, applied from the next step.
    pub fn command_vehicle(&mut self, handle: EntityHandle, command: Twist) -> Result<(), WorldError> {
        let entity = self
            .entities
            .get_mut(handle)
            .ok_or(WorldError::StaleHandle(handle))?;
        if entity.kind != EntityKind::Vehicle {
            return Err(WorldError::NotAVehicle(handle));
        }
        entity.command = command;
        Ok(())
    }

    /// Call `f` once per vehicle, grouped by name in name order.
    pub fn visit_vehicles(&self, mut f: impl FnMut(EntityHandle, &Entity)) {
        visit_map(&self.entities, &self.vehicles, &mut f);
    }

    /// Call `f` once per block, grouped by name in name order.
    pub fn visit_blocks(&self, mut f: impl FnMut(EntityHandle, &Entity)) {
        visit_map(&self.entities, &self.blocks, &mut f);
    }

    /// Call `f` once per world element, in insertion order.
    pub fn visit_elements(&self, mut f: impl FnMut(EntityHandle, &Entity)) {
        for &handle in &self.elements {
            if let Some(entity) = self.entities.get(handle) {
                f(handle, entity);
            }
        }
    }

    /// Remove every entity, rebuild the physics backend and reset the clock.
    pub fn clear(&mut self) {
        let drained = self.entities.drain();
        for (_, entity) in &drained {
            self.physics.destroy_body(entity.body);
        }
        self.vehicles.clear();
        self.blocks.clear();
        self.elements.clear();
        self.physics = (self.physics_factory)(self.params.gravity);
        self.clock_origin = 0.0;
        self.steps_since_origin = 0;
        self.total_steps = 0;
        self.pending = 0.0;
        self.spawned_per_kind.clear();
        tracing::debug!(entities = drained.len(), "world cleared");
    }

    /// Copy out everything a renderer needs.
    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot::capture(self)
    }

    pub(crate) fn entities(&self) -> impl Iterator<Item = (EntityHandle, &Entity)> {
        self.entities.iter()
    }

    pub(crate) fn apply_params(&mut self, params: SimParams) -> Result<(), WorldError> {
        self.set_timestep(params.timestep)?;
        self.set_gravity(params.gravity);
        self.set_solver_iterations(params.velocity_iterations, params.position_iterations);
        Ok(())
    }

    /// One discrete step of length `h`.
    ///
    /// Order: model pre-step hooks, solver, clock, pose sync and sensor
    /// gates. Returns the observations sampled at the new clock value.
    fn step_once(&mut self) -> Vec<PendingObservation> {
        let h = self.params.timestep;
        let before = StepClock {
            simul_time: self.simul_time(),
            dt: h,
        };
        let _span = tracing::trace_span!("step", t = before.simul_time).entered();

        for (_, entity) in self.entities.iter_mut() {
            if let Some(body) = self.physics.body_mut(entity.body) {
                entity.model.pre_step(&before, &entity.command, body);
            }
        }
        self.physics.step(
            h,
            self.params.velocity_iterations,
            self.params.position_iterations,
        );
        self.steps_since_origin += 1;
        self.total_steps += 1;

        let clock = StepClock {
            simul_time: self.simul_time(),
            dt: h,
        };
        let ctx = SimContext::new(clock, &*self.physics);
        let mut sampled = Vec::new();
        for (handle, entity) in self.entities.iter_mut() {
            if let Some(body) = ctx.physics.body(entity.body) {
                entity.pose = body.pose;
                entity.twist = body.twist;
            }
            entity.sample_sensors(handle, &ctx, &mut sampled);
        }
        sampled
    }
}

fn unregister(map: &mut BTreeMap<String, Vec<EntityHandle>>, name: &str, handle: EntityHandle) {
    if let Some(handles) = map.get_mut(name) {
        handles.retain(|h| *h != handle);
        if handles.is_empty() {
            map.remove(name);
        }
    }
}

fn visit_map(
    entities: &Arena<Entity>,
    map: &BTreeMap<String, Vec<EntityHandle>>,
    f: &mut impl FnMut(EntityHandle, &Entity),
) {
    for &handle in map.values().flatten() {
        if let Some(entity) = entities.get(handle) {
            f(handle, entity);
        }
    }
}

pub(crate) struct SteppingGuard<'a>(&'a AtomicBool);

impl Drop for SteppingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Builder for [`World`].
#[derive(Default)]
pub struct WorldBuilder {
    config: WorldConfig,
    registry: Option<Arc<TypeRegistry>>,
    publisher: Option<Arc<dyn Publisher>>,
    physics: Option<PhysicsFactory>,
    hook: Option<Arc<dyn ObservationHook>>,
}

impl WorldBuilder {
    pub fn config(mut self, config: WorldConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to a fresh registry holding the built-in classes.
    pub fn registry(mut self, registry: Arc<TypeRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Defaults to an [`InProcessBus`].
    pub fn publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Defaults to [`kinematic_factory`].
    pub fn physics(mut self, factory: PhysicsFactory) -> Self {
        self.physics = Some(factory);
        self
    }

    pub fn observation_hook(mut self, hook: Arc<dyn ObservationHook>) -> Self {
        self.hook = Some(hook);
        self
    }

    pub fn build(self) -> Result<World, ConfigError> {
        self.config.validate()?;
        Ok(self.assemble())
    }

    fn assemble(self) -> World {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(TypeRegistry::with_builtins()));
        let publisher = self
            .publisher
            .unwrap_or_else(|| Arc::new(InProcessBus::new()));
        let dispatcher = ObservationDispatcher::new(&self.config.dispatch, publisher);
        if let Some(hook) = self.hook {
            dispatcher.set_hook(hook);
        }
        let state = WorldState::new(
            &self.config,
            self.physics.unwrap_or_else(kinematic_factory),
        );
        tracing::info!(
            timestep = self.config.timestep,
            workers = dispatcher.worker_count(),
            "world created"
        );
        World {
            state: Mutex::new(state),
            registry,
            dispatcher,
            gui: Arc::new(GuiExchange::new()),
            stepping: AtomicBool::new(false),
        }
    }
}

/// The authoritative simulation world.
///
/// Shared between threads behind an `Arc`. Every operation touching
/// entities, bodies or the clock takes the world lock for its own duration;
/// [`World::lock`] hands out the guard for batching. The key/message
/// exchange with the viewer has its own lock.
pub struct World {
    pub(crate) state: Mutex<WorldState>,
    pub(crate) registry: Arc<TypeRegistry>,
    pub(crate) dispatcher: ObservationDispatcher,
    gui: Arc<GuiExchange>,
    stepping: AtomicBool,
}

impl World {
    pub fn builder() -> WorldBuilder {
        WorldBuilder::default()
    }

    /// World with the default config, registry, publisher and physics.
    pub fn new() -> Self {
        WorldBuilder::default().assemble()
    }

    pub fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock()
    }

    /// Acquire the lock and clear. Callers already holding the guard use
    /// [`WorldState::clear`].
    pub fn clear(&self) {
        self.state.lock().clear();
    }

    /// Advance the simulation by `dt` seconds of requested time.
    ///
    /// Runs `ceil`-like whole steps of the fixed timestep while pending time
    /// remains; the overshoot (less than one step) is carried into the next
    /// call. The lock is held for each discrete step and released between
    /// steps. Sampled observations are handed to the dispatcher after the
    /// lock is released.
    ///
    /// # Panics
    ///
    /// If called while another `run_simulation` on the same world is in
    /// progress.
    pub fn run_simulation(&self, dt: f64) -> Result<StepReport, WorldError> {
        if !dt.is_finite() || dt < 0.0 {
            return Err(WorldError::InvalidDt(dt));
        }
        let _stepping = self.enter_stepping();
        let _span = tracing::info_span!("run_simulation", dt).entered();
        let started = Instant::now();

        self.state.lock().pending += dt;
        let mut steps = 0u64;
        loop {
            let sampled = {
                let mut state = self.state.lock();
                if state.pending <= PENDING_EPSILON {
                    break;
                }
                let h = state.params.timestep;
                let sampled = state.step_once();
                state.pending -= h;
                sampled
            };
            steps += 1;
            for p in sampled {
                self.dispatcher.report(p.observation, p.clock, p.route);
            }
        }

        let report = StepReport {
            steps,
            simul_time: self.simul_time(),
            wall_time: started.elapsed(),
        };
        tracing::trace!(steps, t = report.simul_time, "simulation advanced");
        Ok(report)
    }

    pub(crate) fn enter_stepping(&self) -> SteppingGuard<'_> {
        if self.stepping.swap(true, Ordering::AcqRel) {
            panic!("concurrency violation: run_simulation re-entered while a stepping pass is running");
        }
        SteppingGuard(&self.stepping)
    }

    pub fn simul_time(&self) -> f64 {
        self.state.lock().simul_time()
    }

    pub fn step_count(&self) -> u64 {
        self.state.lock().step_count()
    }

    pub fn timestep(&self) -> f64 {
        self.state.lock().params.timestep
    }

    pub fn set_timestep(&self, h: f64) -> Result<(), WorldError> {
        self.state.lock().set_timestep(h)
    }

    pub fn gravity(&self) -> f64 {
        self.state.lock().params.gravity
    }

    pub fn set_gravity(&self, gravity: f64) {
        self.state.lock().set_gravity(gravity);
    }

    pub fn params(&self) -> SimParams {
        self.state.lock().params()
    }

    pub fn set_solver_iterations(&self, velocity: u32, position: u32) {
        self.state.lock().set_solver_iterations(velocity, position);
    }

    pub fn gui_options(&self) -> GuiOptions {
        self.state.lock().gui_options.clone()
    }

    pub fn spawn(&self, spec: EntitySpec) -> EntityHandle {
        self.state.lock().spawn(spec)
    }

    pub fn despawn(&self, handle: EntityHandle) -> Result<(), WorldError> {
        self.state.lock().despawn(handle)
    }

    /// Attach a sensor and advertise its topic, if it has one.
    pub fn attach_sensor(
        &self,
        handle: EntityHandle,
        sensor: Box<dyn Sensor>,
    ) -> Result<String, WorldError> {
        let (name, topic) = {
            let mut state = self.state.lock();
            let name = state.attach_sensor(handle, sensor)?;
            let topic = state
                .entity(handle)
                .and_then(|e| e.sensors.last())
                .and_then(|s| s.core().topic().map(str::to_string));
            (name, topic)
        };
        if let Some(topic) = topic {
            self.advertise(&topic);
        }
        Ok(name)
    }

    pub(crate) fn advertise(&self, topic: &str) {
        if let Err(e) = self.dispatcher.publisher().advertise(topic) {
            tracing::warn!(topic, error = %e, "cannot advertise sensor topic");
        }
    }

    pub fn command_vehicle(&self, handle: EntityHandle, command: Twist) -> Result<(), WorldError> {
        self.state.lock().command_vehicle(handle, command)
    }

    pub fn vehicles_named(&self, name: &str) -> Vec<EntityHandle> {
        self.state.lock().vehicles_named(name).to_vec()
    }

    pub fn entity_count(&self) -> usize {
        self.state.lock().entity_count()
    }

    pub fn vehicle_count(&self) -> usize {
        self.state.lock().vehicle_count()
    }

    pub fn block_count(&self) -> usize {
        self.state.lock().block_count()
    }

    pub fn element_count(&self) -> usize {
        self.state.lock().element_count()
    }

    pub fn body_count(&self) -> usize {
        self.state.lock().body_count()
    }

    /// Run `f` on one entity under the lock.
    pub fn with_entity<R>(&self, handle: EntityHandle, f: impl FnOnce(&Entity) -> R) -> Option<R> {
        self.state.lock().entity(handle).map(f)
    }

    /// Visit every vehicle under one lock acquisition.
    pub fn visit_vehicles(&self, f: impl FnMut(EntityHandle, &Entity)) {
        self.state.lock().visit_vehicles(f);
    }

    pub fn visit_blocks(&self, f: impl FnMut(EntityHandle, &Entity)) {
        self.state.lock().visit_blocks(f);
    }

    /// Visit every world element in insertion order.
    pub fn visit_elements(&self, f: impl FnMut(EntityHandle, &Entity)) {
        self.state.lock().visit_elements(f);
    }

    /// Copy of the renderable state, taken under a short lock.
    pub fn snapshot(&self) -> SceneSnapshot {
        self.state.lock().snapshot()
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn publisher(&self) -> Arc<dyn Publisher> {
        self.dispatcher.publisher()
    }

    /// Replace the hook run by the dispatch workers for every observation.
    pub fn set_observation_hook(&self, hook: Arc<dyn ObservationHook>) {
        self.dispatcher.set_hook(hook);
    }

    /// Block until every observation reported so far went through its sinks.
    pub fn flush_observations(&self) {
        self.dispatcher.flush();
    }

    pub fn dispatch_metrics(&self) -> DispatchMetrics {
        self.dispatcher.metrics()
    }

    /// Drain and join the dispatch workers. Later observations are dropped.
    pub fn shutdown_dispatch(&self) -> DispatchShutdownReport {
        self.dispatcher.shutdown()
    }

    /// Key and message cell shared with the viewer.
    pub fn gui_exchange(&self) -> Arc<GuiExchange> {
        Arc::clone(&self.gui)
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}
