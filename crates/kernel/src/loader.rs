//! Scene loading.
//!
//! A load is atomic: the world is cleared, populated from the `<world>`
//! node and, on any error, cleared again so no partially constructed entity
//! stays visible.

use std::path::Path;

use fleetsim_common::{EntityKind, Pose, Twist};
use fleetsim_scene::{ConfigError, SceneNode};
use glam::DVec2;

use crate::config::{GuiOptions, validate_timestep};
use crate::entity::EntitySpec;
use crate::registry::TypeRegistry;
use crate::world::{SimParams, World, WorldState};

/// Children of `<world>` that are parameters, not entities.
const WORLD_PARAMS: &[&str] = &[
    "simul_timestep",
    "gravity",
    "velocity_iterations",
    "position_iterations",
    "gui",
];

/// What a successful load created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadSummary {
    pub vehicles: usize,
    pub blocks: usize,
    pub elements: usize,
    pub sensors: usize,
    /// Topics advertised for the loaded sensors.
    pub topics: Vec<String>,
}

impl LoadSummary {
    pub fn entities(&self) -> usize {
        self.vehicles + self.blocks + self.elements
    }
}

impl World {
    pub fn load_scene_str(&self, xml: &str) -> Result<LoadSummary, ConfigError> {
        match fleetsim_scene::parse_str(xml) {
            Ok(root) => self.load_scene(&root),
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    pub fn load_scene_file(&self, path: impl AsRef<Path>) -> Result<LoadSummary, ConfigError> {
        match fleetsim_scene::parse_file(path.as_ref()) {
            Ok(root) => self.load_scene(&root),
            Err(e) => {
                self.clear();
                Err(e)
            }
        }
    }

    /// Replace the world contents with the scene rooted at `root`.
    pub fn load_scene(&self, root: &SceneNode) -> Result<LoadSummary, ConfigError> {
        let summary = {
            let mut state = self.state.lock();
            state.clear();
            match populate(&mut state, &self.registry, root) {
                Ok(summary) => summary,
                Err(e) => {
                    state.clear();
                    tracing::warn!(error = %e, "scene load failed, world left empty");
                    return Err(e);
                }
            }
        };
        for topic in &summary.topics {
            self.advertise(topic);
        }
        tracing::info!(
            vehicles = summary.vehicles,
            blocks = summary.blocks,
            elements = summary.elements,
            sensors = summary.sensors,
            "scene loaded"
        );
        Ok(summary)
    }
}

fn populate(
    state: &mut WorldState,
    registry: &TypeRegistry,
    root: &SceneNode,
) -> Result<LoadSummary, ConfigError> {
    if root.name() != "world" {
        return Err(ConfigError::WrongNode {
            expected: "world",
            found: root.name().to_string(),
        });
    }
    let params = parse_params(root, state.params())?;
    let gui = match root.child("gui") {
        Some(node) => parse_gui(node, state.gui_options().clone())?,
        None => state.gui_options().clone(),
    };

    let mut summary = LoadSummary::default();
    for node in root.children() {
        let kind = match node.name() {
            "vehicle" => EntityKind::Vehicle,
            "block" => EntityKind::Block,
            "element" => EntityKind::Element,
            name if WORLD_PARAMS.contains(&name) => continue,
            other => {
                tracing::warn!(node = other, "unknown scene node ignored");
                continue;
            }
        };
        load_entity(state, registry, kind, node, &mut summary)?;
    }

    state
        .apply_params(params)
        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
    state.set_gui_options(gui);
    Ok(summary)
}

fn parse_params(root: &SceneNode, mut params: SimParams) -> Result<SimParams, ConfigError> {
    if let Some(h) = root.param::<f64>("simul_timestep")? {
        validate_timestep(h)?;
        params.timestep = h;
    }
    if let Some(g) = root.param::<f64>("gravity")? {
        if !(g.is_finite() && g >= 0.0) {
            return Err(ConfigError::invalid_value("gravity", "world", "must be non-negative"));
        }
        params.gravity = g;
    }
    for (name, slot) in [
        ("velocity_iterations", &mut params.velocity_iterations),
        ("position_iterations", &mut params.position_iterations),
    ] {
        if let Some(n) = root.param::<u32>(name)? {
            if n == 0 {
                return Err(ConfigError::invalid_value(name, "world", "must be at least 1"));
            }
            *slot = n;
        }
    }
    Ok(params)
}

fn parse_gui(node: &SceneNode, mut gui: GuiOptions) -> Result<GuiOptions, ConfigError> {
    if let Some(fps) = node.param::<u32>("refresh_fps")? {
        if fps == 0 {
            return Err(ConfigError::invalid_value("refresh_fps", "gui", "must be at least 1"));
        }
        gui.refresh_fps = fps;
    }
    gui.win_w = node.param_or("win_w", gui.win_w)?;
    gui.win_h = node.param_or("win_h", gui.win_h)?;
    if let Some(name) = node.param::<String>("follow_vehicle")? {
        gui.follow_vehicle = Some(name).filter(|n| !n.is_empty());
    }
    if let Some(d) = node.param::<f64>("cam_distance")? {
        if !(d.is_finite() && d > 0.0) {
            return Err(ConfigError::invalid_value("cam_distance", "gui", "must be positive"));
        }
        gui.camera_distance = d;
    }
    Ok(gui)
}

fn load_entity(
    state: &mut WorldState,
    registry: &TypeRegistry,
    kind: EntityKind,
    node: &SceneNode,
    summary: &mut LoadSummary,
) -> Result<(), ConfigError> {
    let model = registry.create_model(kind, node)?;
    let pose = match node.vector_param("init_pose", 3)? {
        Some(v) => Pose::new(v[0], v[1], v[2].to_radians()),
        None => Pose::default(),
    };
    // Initial velocity is given in the body frame.
    let twist = match node.vector_param("init_vel", 3)? {
        Some(v) => {
            let linear = DVec2::from_angle(pose.yaw).rotate(DVec2::new(v[0], v[1]));
            Twist::new(linear.x, linear.y, v[2].to_radians())
        }
        None => Twist::default(),
    };

    let mut spec = EntitySpec::new(kind, model).with_pose(pose).with_twist(twist);
    if let Some(name) = node.attr("name") {
        spec = spec.with_name(name);
    }
    if let Some(visual) = node.child("visual") {
        spec = spec.with_visual(visual.clone());
    }
    let handle = state.spawn(spec);
    match kind {
        EntityKind::Vehicle => summary.vehicles += 1,
        EntityKind::Block => summary.blocks += 1,
        EntityKind::Element => summary.elements += 1,
    }

    for sensor_node in node.children_named("sensor") {
        if kind != EntityKind::Vehicle {
            return Err(ConfigError::WrongNode {
                expected: "vehicle",
                found: kind.tag().to_string(),
            });
        }
        let sensor = registry.create_sensor(handle, sensor_node)?;
        state
            .attach_sensor(handle, sensor)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        summary.sensors += 1;
        let topic = state
            .entity(handle)
            .and_then(|e| e.sensors().last())
            .and_then(|s| s.core().topic().map(str::to_string));
        summary.topics.extend(topic);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::InProcessBus;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Arc;

    const SCENE: &str = r#"
        <world>
          <simul_timestep>0.05</simul_timestep>
          <gravity>3.7</gravity>
          <gui>
            <refresh_fps>30</refresh_fps>
            <follow_vehicle>r1</follow_vehicle>
          </gui>
          <element class="ground_grid"/>
          <vehicle name="r1" class="differential">
            <init_pose>1 2 90</init_pose>
            <init_vel>1 0 0</init_vel>
            <sensor class="pose">
              <publish><publish_topic>/${PARENT_NAME}/odom</publish_topic></publish>
            </sensor>
          </vehicle>
          <vehicle class="differential"/>
          <block class="box"><size>1 2</size></block>
          <lights/>
        </world>"#;

    #[test]
    fn loads_entities_params_and_gui() {
        let bus = Arc::new(InProcessBus::new());
        let w = World::builder().publisher(bus.clone()).build().unwrap();
        let summary = w.load_scene_str(SCENE).unwrap();
        assert_eq!(summary.vehicles, 2);
        assert_eq!(summary.blocks, 1);
        assert_eq!(summary.elements, 1);
        assert_eq!(summary.sensors, 1);
        assert_eq!(summary.topics, vec!["/r1/odom".to_string()]);
        assert!(bus.is_advertised("/r1/odom"));

        assert_eq!(w.timestep(), 0.05);
        assert_eq!(w.gravity(), 3.7);
        let gui = w.gui_options();
        assert_eq!(gui.refresh_fps, 30);
        assert_eq!(gui.follow_vehicle.as_deref(), Some("r1"));

        assert_eq!(w.body_count(), 4);
        assert_eq!(w.vehicles_named("veh2").len(), 1);
        let r1 = w.vehicles_named("r1")[0];
        let (pose, twist) = w.with_entity(r1, |e| (e.pose(), e.twist())).unwrap();
        assert!((pose.yaw - FRAC_PI_2).abs() < 1e-12);
        assert!(twist.linear.x.abs() < 1e-12);
        assert!((twist.linear.y - 1.0).abs() < 1e-12);
    }

    #[test]
    fn init_vel_keeps_vehicle_moving() {
        let w = World::new();
        w.load_scene_str(
            r#"<world>
                 <simul_timestep>0.1</simul_timestep>
                 <vehicle name="r1" class="differential">
                   <init_pose>0 0 90</init_pose>
                   <init_vel>1 0 0</init_vel>
                 </vehicle>
               </world>"#,
        )
        .unwrap();
        w.run_simulation(1.0).unwrap();
        let r1 = w.vehicles_named("r1")[0];
        let (pose, twist) = w.with_entity(r1, |e| (e.pose(), e.twist())).unwrap();
        assert!(pose.position.x.abs() < 1e-9);
        assert!((pose.position.y - 1.0).abs() < 1e-9);
        assert!((twist.linear.y - 1.0).abs() < 1e-12);

        w.command_vehicle(r1, Twist::default()).unwrap();
        w.run_simulation(0.5).unwrap();
        let y = w.with_entity(r1, |e| e.pose().position.y).unwrap();
        assert!((y - 1.0).abs() < 1e-9);
    }

    #[test]
    fn vehicle_params_that_would_break_stepping_are_rejected() {
        let w = World::new();
        let err = w
            .load_scene_str(
                r#"<world>
                     <vehicle class="differential"><max_turn_rate_deg>-30</max_turn_rate_deg></vehicle>
                   </world>"#,
            )
            .unwrap_err();
        match err {
            ConfigError::InvalidValue { param, .. } => assert_eq!(param, "max_turn_rate_deg"),
            other => panic!("expected InvalidValue, got {other:?}"),
        }
        assert_eq!(w.entity_count(), 0);
        assert_eq!(w.run_simulation(0.1).unwrap().steps, 1);
    }

    #[test]
    fn reload_replaces_previous_scene() {
        let w = World::new();
        w.load_scene_str(SCENE).unwrap();
        w.load_scene_str(r#"<world><vehicle class="differential"/></world>"#)
            .unwrap();
        assert_eq!(w.entity_count(), 1);
        assert_eq!(w.body_count(), 1);
    }

    #[test]
    fn failed_load_leaves_world_empty() {
        let w = World::new();
        w.load_scene_str(SCENE).unwrap();
        let err = w
            .load_scene_str(
                r#"<world>
                     <vehicle class="differential"/>
                     <block class="pyramid"/>
                   </world>"#,
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownType { .. }));
        assert!(err.to_string().contains("pyramid"));
        assert_eq!(w.entity_count(), 0);
        assert_eq!(w.body_count(), 0);
        // Parameters of the failed scene were never applied.
        assert_eq!(w.timestep(), 0.05);
    }

    #[test]
    fn missing_class_fails() {
        let w = World::new();
        let err = w.load_scene_str("<world><vehicle/></world>").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingAttribute { attribute: "class", .. }
        ));
    }

    #[test]
    fn missing_box_size_fails() {
        let w = World::new();
        let err = w
            .load_scene_str(r#"<world><block class="box"/></world>"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingElement { element: "size", .. }));
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn wrong_root_fails() {
        let w = World::new();
        let err = w.load_scene_str("<scene/>").unwrap_err();
        assert!(matches!(err, ConfigError::WrongNode { expected: "world", .. }));
    }

    #[test]
    fn malformed_xml_clears_world() {
        let w = World::new();
        w.load_scene_str(SCENE).unwrap();
        assert!(w.load_scene_str("<world><vehicle").is_err());
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn sensors_on_blocks_are_rejected() {
        let w = World::new();
        let err = w
            .load_scene_str(
                r#"<world><block class="box"><size>1 1</size><sensor class="pose"/></block></world>"#,
            )
            .unwrap_err();
        assert!(matches!(err, ConfigError::WrongNode { expected: "vehicle", .. }));
        assert_eq!(w.entity_count(), 0);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.xml");
        std::fs::write(&path, SCENE).unwrap();
        let w = World::new();
        assert_eq!(w.load_scene_file(&path).unwrap().entities(), 4);
        assert!(matches!(
            w.load_scene_file(dir.path().join("missing.xml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
