use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use fleetsim_common::EntityKind;
use fleetsim_input::{Action, GuiIo, Teleop};
use fleetsim_kernel::{TypeRegistry, World, WorldConfig};
use fleetsim_render::{TerminalBackend, Viewer};
use fleetsim_tools::WorldInspector;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fleetsim-cli", about = "CLI tool for fleetsim scenes")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and registered entity and sensor classes
    Info,
    /// Load a scene and report what it contains
    Validate {
        /// Scene description (XML)
        scene: PathBuf,
        /// World configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Load a scene and simulate it
    Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
    /// Scene description (XML)
    scene: PathBuf,
    /// Simulated seconds to run
    #[arg(short, long, default_value = "10")]
    duration: f64,
    /// Interval passed to each `run_simulation` call
    #[arg(long, default_value = "0.05")]
    dt: f64,
    /// Pace simulated time to wall-clock time
    #[arg(long)]
    realtime: bool,
    /// Open the terminal viewer with keyboard teleop
    #[arg(long)]
    view: bool,
    /// World configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print the final summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match cli.command {
        Commands::Info => {
            println!("fleetsim-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("render: {}", fleetsim_render::crate_info());
            println!("tools: {}", fleetsim_tools::crate_info());
            let registry = TypeRegistry::with_builtins();
            for kind in [EntityKind::Vehicle, EntityKind::Block, EntityKind::Element] {
                println!("{kind} classes: {}", registry.model_classes(kind).join(", "));
            }
            println!("sensor classes: {}", registry.sensor_classes().join(", "));
        }
        Commands::Validate { scene, config } => {
            let world = build_world(config.as_deref())?;
            let summary = world
                .load_scene_file(&scene)
                .with_context(|| format!("invalid scene {}", scene.display()))?;
            println!(
                "{}: OK, {} vehicles, {} blocks, {} elements, {} sensors",
                scene.display(),
                summary.vehicles,
                summary.blocks,
                summary.elements,
                summary.sensors
            );
            for topic in &summary.topics {
                println!("  topic {topic}");
            }
            for vehicle in WorldInspector::inspect_vehicles(&world) {
                println!("  {vehicle}");
            }
        }
        Commands::Run(args) => run(args)?,
    }

    Ok(())
}

fn build_world(config: Option<&Path>) -> anyhow::Result<World> {
    let config = match config {
        Some(path) => WorldConfig::from_json_file(path)
            .with_context(|| format!("cannot load config {}", path.display()))?,
        None => WorldConfig::default(),
    };
    Ok(World::builder().config(config).build()?)
}

fn run(args: RunArgs) -> anyhow::Result<()> {
    anyhow::ensure!(
        args.duration.is_finite() && args.duration >= 0.0,
        "duration must be finite and non-negative"
    );
    anyhow::ensure!(args.dt.is_finite() && args.dt > 0.0, "dt must be finite and positive");

    let world = Arc::new(build_world(args.config.as_deref())?);
    let loaded = world
        .load_scene_file(&args.scene)
        .with_context(|| format!("cannot load scene {}", args.scene.display()))?;
    info!(
        scene = %args.scene.display(),
        entities = loaded.entities(),
        sensors = loaded.sensors,
        "running scene"
    );

    let viewer = if args.view {
        let backend = TerminalBackend::new().context("cannot start terminal input")?;
        Some(Viewer::new(Arc::clone(&world), Box::new(backend)))
    } else {
        None
    };
    let stop = AtomicBool::new(false);

    thread::scope(|scope| -> anyhow::Result<()> {
        let stepper = thread::Builder::new()
            .name("fleetsim-sim".into())
            .spawn_scoped(scope, || simulate(&world, &args, &stop))?;
        if let Some(viewer) = &viewer {
            drive_viewer(&world, viewer, &stepper, &stop);
        }
        stepper
            .join()
            .map_err(|_| anyhow::anyhow!("simulation thread panicked"))?
    })?;
    drop(viewer);

    world.flush_observations();
    let report = world.shutdown_dispatch();
    info!(workers = report.workers_joined, "dispatch drained");

    let summary = WorldInspector::summary(&world);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }
    Ok(())
}

/// Stepping loop. Stops after `duration` simulated seconds or when `stop` is set.
fn simulate(world: &World, args: &RunArgs, stop: &AtomicBool) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut requested = 0.0;
    while requested < args.duration - 1e-9 && !stop.load(Ordering::Acquire) {
        let dt = args.dt.min(args.duration - requested);
        world.run_simulation(dt)?;
        requested += dt;
        if args.realtime {
            let target = Duration::from_secs_f64(requested);
            if let Some(rest) = target.checked_sub(started.elapsed()) {
                thread::sleep(rest);
            }
        }
    }
    stop.store(true, Ordering::Release);
    info!(
        simul_time = world.simul_time(),
        wall = ?started.elapsed(),
        "simulation finished"
    );
    Ok(())
}

/// Viewer and teleop loop on the calling thread, paced at the scene's
/// refresh rate.
fn drive_viewer(
    world: &World,
    viewer: &Viewer,
    stepper: &thread::ScopedJoinHandle<'_, anyhow::Result<()>>,
    stop: &AtomicBool,
) {
    let mut teleop = Teleop::default();
    let period = Duration::from_secs_f64(1.0 / f64::from(world.gui_options().refresh_fps.max(1)));
    while !stepper.is_finished() {
        let mut io = GuiIo::with_message(status_line(&teleop));
        if !viewer.update_view(Some(&mut io)) {
            info!("viewer closed");
            break;
        }
        if let Some(key) = io.key_event {
            match Action::from_key(&key) {
                Action::Quit => {
                    viewer.close();
                    break;
                }
                action => {
                    if teleop.apply(action).is_some() {
                        command_selected(world, &teleop);
                    }
                }
            }
        }
        thread::sleep(period);
    }
    stop.store(true, Ordering::Release);
}

fn command_selected(world: &World, teleop: &Teleop) {
    let mut selected = None;
    let mut index = 0;
    world.visit_vehicles(|h, _| {
        if index == teleop.selected {
            selected = Some(h);
        }
        index += 1;
    });
    let Some(handle) = selected else {
        warn!(index = teleop.selected, "no vehicle at this index");
        return;
    };
    if let Err(e) = world.command_vehicle(handle, teleop.command()) {
        warn!(error = %e, "teleop command rejected");
    }
}

fn status_line(teleop: &Teleop) -> String {
    format!(
        "vehicle {} v={:.2} m/s w={:.2} rad/s\nw/s speed, a/d turn, space stop, 1-9 select, q quit (one key per line)",
        teleop.selected + 1,
        teleop.forward,
        teleop.turn
    )
}
