//! Whole-world scenarios: scene loading, stepping, sampling and sinks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use fleetsim_common::{EntityKind, Observation, ObservationPayload};
use fleetsim_kernel::{
    ConfigError, DifferentialDrive, EntitySpec, InProcessBus, ObservationHook, PublishedObservation,
    StepClock, World, WorldConfig,
};
use parking_lot::Mutex;
use proptest::prelude::*;

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, f64, u64)>>,
}

impl ObservationHook for Recorder {
    fn on_observation(&self, observation: &Observation, _clock: &StepClock) {
        self.seen.lock().push((
            observation.sensor.clone(),
            observation.timestamp,
            observation.sequence,
        ));
    }
}

fn recorded_world(recorder: &Arc<Recorder>) -> World {
    World::builder()
        .observation_hook(recorder.clone())
        .build()
        .unwrap()
}

// =============================================================================
// Scenarios
// =============================================================================

#[test]
fn periodic_sensor_samples_twice_in_one_second() {
    let recorder = Arc::new(Recorder::default());
    let world = recorded_world(&recorder);
    world
        .load_scene_str(
            r#"<world>
                 <simul_timestep>0.1</simul_timestep>
                 <vehicle name="r1" class="differential">
                   <sensor class="pose"><sensor_period>0.5</sensor_period></sensor>
                 </vehicle>
               </world>"#,
        )
        .unwrap();

    let report = world.run_simulation(1.0).unwrap();
    assert_eq!(report.steps, 10);
    world.flush_observations();

    let seen = recorder.seen.lock().clone();
    let times: Vec<f64> = seen.iter().map(|(_, t, _)| *t).collect();
    assert_eq!(times, vec![0.5, 1.0]);
    assert_eq!(seen[0].0, "pose1");
    assert_eq!(world.dispatch_metrics().completed, 2);
}

#[test]
fn sensor_without_class_fails_the_whole_load() {
    let world = World::new();
    let err = world
        .load_scene_str(
            r#"<world>
                 <vehicle class="differential"><sensor/></vehicle>
                 <block class="box"><size>1 1</size></block>
               </world>"#,
        )
        .unwrap_err();
    assert!(matches!(
        err,
        ConfigError::MissingAttribute { attribute: "class", .. }
    ));
    assert_eq!(world.entity_count(), 0);
    assert_eq!(world.body_count(), 0);
}

#[test]
fn unknown_entity_type_is_named_and_load_is_atomic() {
    let world = World::new();
    let err = world
        .load_scene_str(
            r#"<world>
                 <vehicle class="differential"/>
                 <vehicle class="hovercraft"/>
               </world>"#,
        )
        .unwrap_err();
    match err {
        ConfigError::UnknownType { type_name, .. } => assert_eq!(type_name, "hovercraft"),
        other => panic!("expected UnknownType, got {other:?}"),
    }
    assert_eq!(world.vehicle_count(), 0);
    assert_eq!(world.entity_count(), 0);
}

#[test]
fn publish_only_sensor_publishes_once_and_never_logs() {
    let bus = Arc::new(InProcessBus::new());
    let rx = bus.subscribe("/r1/odom");
    let world = World::builder().publisher(bus.clone()).build().unwrap();
    world
        .load_scene_str(
            r#"<world>
                 <simul_timestep>0.1</simul_timestep>
                 <vehicle name="r1" class="differential">
                   <sensor class="pose">
                     <sensor_period>0.1</sensor_period>
                     <publish><publish_topic>/r1/odom</publish_topic></publish>
                   </sensor>
                 </vehicle>
               </world>"#,
        )
        .unwrap();

    assert_eq!(world.run_simulation(0.1).unwrap().steps, 1);
    world.flush_observations();

    assert_eq!(bus.published_count("/r1/odom"), 1);
    let metrics = world.dispatch_metrics();
    assert_eq!(metrics.published, 1);
    assert_eq!(metrics.logged, 0);
    assert_eq!(metrics.log_failures, 0);

    let msg = PublishedObservation::from_json(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(msg.source_object_id, "r1");
    assert!(matches!(
        msg.observation.payload,
        ObservationPayload::Odometry { .. }
    ));
}

#[test]
fn log_sink_receives_observations_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let log_pattern = format!("{}/{}", dir.path().display(), "${PARENT_NAME}_${NAME}.fsol");
    let scene = format!(
        r#"<world>
             <simul_timestep>0.05</simul_timestep>
             <vehicle name="r7" class="differential">
               <sensor class="pose" name="odom">
                 <sensor_period>0.1</sensor_period>
                 <log_file>{log_pattern}</log_file>
               </sensor>
             </vehicle>
           </world>"#
    );
    let world = World::new();
    world.load_scene_str(&scene).unwrap();
    let expected = dir.path().join("r7_odom.fsol");
    assert!(!expected.exists(), "log must be opened lazily");

    world.run_simulation(1.0).unwrap();
    world.flush_observations();

    let records = fleetsim_persist::read_log(&expected).unwrap();
    assert_eq!(records.len(), 10);
    for (i, obs) in records.iter().enumerate() {
        assert_eq!(obs.sequence, i as u64);
        assert_eq!(obs.sensor, "odom");
    }
    assert!(records.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
}

#[test]
fn laser_sees_a_block_ahead() {
    let bus = Arc::new(InProcessBus::new());
    let rx = bus.subscribe("/scan");
    let world = World::builder().publisher(bus.clone()).build().unwrap();
    world
        .load_scene_str(
            r#"<world>
                 <simul_timestep>0.1</simul_timestep>
                 <vehicle name="r1" class="differential">
                   <sensor class="laser">
                     <nrays>3</nrays>
                     <fov_degrees>90</fov_degrees>
                     <range_max>20</range_max>
                     <publish><publish_topic>/scan</publish_topic></publish>
                   </sensor>
                 </vehicle>
                 <block class="box"><init_pose>5 0 0</init_pose><size>2 2</size></block>
               </world>"#,
        )
        .unwrap();

    world.run_simulation(0.1).unwrap();
    world.flush_observations();

    let msg = PublishedObservation::from_json(&rx.try_recv().unwrap()).unwrap();
    match msg.observation.payload {
        ObservationPayload::RangeScan { ranges, valid, .. } => {
            assert_eq!(valid, vec![false, true, false]);
            assert!((ranges[1] - 4.0).abs() < 1e-4);
            assert_eq!(ranges[0], 20.0);
        }
        other => panic!("expected a range scan, got {other:?}"),
    }
}

#[test]
fn visitors_match_registry_sizes() {
    let world = World::new();
    world
        .load_scene_str(
            r#"<world>
                 <vehicle class="differential"/>
                 <vehicle class="differential"/>
                 <vehicle name="veh1" class="differential"/>
                 <element class="ground_grid"/>
                 <element class="ground_grid"/>
               </world>"#,
        )
        .unwrap();

    let mut vehicles = 0;
    world.visit_vehicles(|_, e| {
        assert_eq!(e.kind(), EntityKind::Vehicle);
        vehicles += 1;
    });
    assert_eq!(vehicles, world.vehicle_count());
    assert_eq!(vehicles, 3);
    assert_eq!(world.vehicles_named("veh1").len(), 2);

    let mut names = Vec::new();
    world.visit_elements(|_, e| names.push(e.name().to_string()));
    assert_eq!(names, vec!["element1", "element2"]);
}

#[test]
fn snapshots_never_see_inconsistent_worlds() {
    let world = Arc::new(World::new());
    world
        .load_scene_str(
            r#"<world>
                 <vehicle class="differential"><sensor class="pose"/></vehicle>
                 <block class="box"><size>1 1</size></block>
               </world>"#,
        )
        .unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let stepper = {
        let world = Arc::clone(&world);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            for _ in 0..200 {
                world.run_simulation(0.02).unwrap();
            }
            done.store(true, Ordering::Release);
        })
    };
    let churn = {
        let world = Arc::clone(&world);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let h = world.spawn(EntitySpec::new(
                    EntityKind::Vehicle,
                    Box::new(DifferentialDrive::default()),
                ));
                world.despawn(h).unwrap();
            }
        })
    };

    while !done.load(Ordering::Acquire) {
        let snap = world.snapshot();
        assert!(snap.is_consistent());
        let state = world.lock();
        assert_eq!(state.entity_count(), state.body_count());
    }
    stepper.join().unwrap();
    churn.join().unwrap();
    assert!((world.simul_time() - 4.0).abs() < 1e-9);
}

#[test]
fn shutdown_drains_then_drops() {
    let recorder = Arc::new(Recorder::default());
    let world = recorded_world(&recorder);
    world
        .load_scene_str(
            r#"<world>
                 <simul_timestep>0.1</simul_timestep>
                 <vehicle class="differential"><sensor class="pose"/></vehicle>
               </world>"#,
        )
        .unwrap();
    world.run_simulation(1.0).unwrap();
    let report = world.shutdown_dispatch();
    assert_eq!(report.metrics.completed, 10);
    assert_eq!(recorder.seen.lock().len(), 10);

    world.run_simulation(0.1).unwrap();
    assert_eq!(world.dispatch_metrics().dropped, 1);
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// The clock advances in whole steps and never lags the requested time
    /// by more than one step.
    #[test]
    fn clock_tracks_requested_time(
        h in 0.005f64..0.2,
        dts in prop::collection::vec(0.0f64..0.3, 1..30),
    ) {
        let config = WorldConfig { timestep: h, ..WorldConfig::default() };
        let world = World::builder().config(config).build().unwrap();
        let mut requested = 0.0;
        for dt in dts {
            world.run_simulation(dt).unwrap();
            requested += dt;
            let advanced = world.simul_time();
            let steps = world.step_count() as f64;
            prop_assert!((advanced - steps * h).abs() < 1e-9);
            prop_assert!(advanced - requested > -1e-9);
            prop_assert!(advanced - requested < h);
        }
    }

    /// Consecutive admitted samples are at least one period apart.
    #[test]
    fn sensor_gate_respects_period(
        period in 0.01f64..1.0,
        increments in prop::collection::vec(0.001f64..0.5, 1..100),
    ) {
        let mut core = fleetsim_kernel::SensorCore::new("pose");
        core.set_period(period).unwrap();
        let mut t = 0.0;
        let mut last_admitted: Option<f64> = None;
        for inc in increments {
            t += inc;
            if core.should_sample(t, Default::default()) {
                if let Some(prev) = last_admitted {
                    prop_assert!(t - prev >= period - 1e-9);
                }
                prop_assert!(!core.should_sample(t, Default::default()));
                last_admitted = Some(t);
            }
        }
    }
}
