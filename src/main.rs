//! icpslam node.
//!
//! Runs the threaded SLAM pipeline against a simulated lidar and drifting
//! reference pose source, then reports the trajectory error.
//!
//! # Usage
//!
//! ```bash
//! # One loop of the default scenario
//! cargo run --release
//!
//! # Custom config, point-to-point ICP, debug outputs
//! cargo run --release -- --config icpslam.toml --matcher icp --verbosity 1
//! ```
//!
//! # Threads
//!
//! ```text
//! main (simulation) ──reference──► SLAM thread ──outputs──► main (logging)
//!                   ──cloud──────►      │
//!                                       ▼
//!                                  SharedState ◄── broadcast thread (map → odom)
//! ```

use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use crossbeam_channel::{Receiver, bounded, unbounded};

use icpslam::algorithms::matching::{DynMatcher, MatcherType};
use icpslam::config::SlamConfig;
use icpslam::engine::slam::IcpSlam;
use icpslam::io::frames::TransformLookup;
use icpslam::io::messages::SlamOutput;
use icpslam::io::simulation::{SensorSample, Simulation};
use icpslam::state::{SharedStateHandle, create_shared_state};
use icpslam::threads::{BroadcastThread, SlamInputs, SlamThread, SlamThreadConfig};

/// Lidar ICP SLAM on a simulated scenario
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (default: icpslam.toml, then /etc/icpslam.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override configured verbosity (0-2)
    #[arg(short, long)]
    verbosity: Option<u8>,

    /// Simulated seconds to run (default: one full loop plus 10%)
    #[arg(short, long)]
    duration_s: Option<f64>,

    /// Override configured scan matcher
    #[arg(short, long, value_enum)]
    matcher: Option<MatcherType>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{}] {} - {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let args = Args::parse();

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        r.store(false, Ordering::Relaxed);
    })
    .expect("Error setting Ctrl-C handler");

    if let Err(e) = run(&args, running) {
        log::error!("icpslam error: {}", e);
        std::process::exit(1);
    }

    log::info!("icpslam shutdown complete");
}

fn load_config(args: &Args) -> icpslam::Result<SlamConfig> {
    let (mut config, source) = SlamConfig::load(args.config.as_deref())?;
    match source {
        Some(path) => log::info!("Loaded config from {}", path.display()),
        None => log::info!("Using default configuration"),
    }

    if let Some(verbosity) = args.verbosity {
        config.verbosity = verbosity;
    }
    if let Some(matcher) = args.matcher {
        config.matcher.algorithm = matcher;
        config.loop_closure.matcher.algorithm = matcher;
    }
    config.validate()?;
    Ok(config)
}

fn run(args: &Args, running: Arc<AtomicBool>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(args)?;

    log::info!("icpslam starting");
    log::info!("  Matcher: {}", config.matcher.algorithm);
    log::info!("  Voxel leaf: {:.3} m", config.preprocessing.leaf_size);
    log::info!(
        "  Loop closure: {}",
        if config.loop_closure.enabled { "enabled" } else { "disabled" }
    );

    let mut simulation = Simulation::new(config.simulation)?;
    let duration_s = args
        .duration_s
        .unwrap_or_else(|| simulation.loop_period_s() * 1.1);
    let steps = (duration_s * config.simulation.rate_hz).ceil() as u64;
    log::info!("  Scenario: {:.1} s, {} steps", duration_s, steps);

    // 1. Shared state and engine writing into its graph
    let shared_state = create_shared_state(config.graph.information_epsilon);
    let engine = IcpSlam::with_graph(
        &config,
        DynMatcher::new(&config.matcher),
        Arc::clone(&shared_state.graph),
    )?;

    // 2. Channels
    let (reference_tx, reference_rx) = bounded(4);
    let (cloud_tx, cloud_rx) = bounded(4);
    let (output_tx, output_rx) = unbounded();

    // 3. Threads
    let slam_thread = SlamThread::spawn(
        SlamThreadConfig {
            frames: config.frames.clone(),
            ..Default::default()
        },
        Box::new(engine),
        Arc::clone(&shared_state),
        SlamInputs { reference_rx, cloud_rx },
        Some(output_tx),
        running.clone(),
    );
    let broadcast_thread = BroadcastThread::spawn(
        config.broadcast,
        config.frames.clone(),
        Arc::clone(&shared_state),
        running.clone(),
    );

    // 4. Drive the scenario
    let mut output_counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    for _ in 0..steps {
        if !running.load(Ordering::Relaxed) {
            break;
        }
        for sample in simulation.step() {
            let sent = match sample {
                SensorSample::Reference(pose) => reference_tx.send(pose).is_ok(),
                SensorSample::Cloud(cloud) => cloud_tx.send(cloud).is_ok(),
            };
            if !sent {
                log::warn!("SLAM thread stopped accepting input");
                running.store(false, Ordering::Relaxed);
            }
        }
        drain_outputs(&output_rx, &mut output_counts);
    }

    // 5. Shutdown: closing the inputs ends the SLAM thread
    drop(reference_tx);
    drop(cloud_tx);
    slam_thread.join().map_err(|_| "SLAM thread panicked")?;
    running.store(false, Ordering::Relaxed);
    broadcast_thread.join().map_err(|_| "broadcast thread panicked")?;
    drain_outputs(&output_rx, &mut output_counts);

    report(&config, &simulation, &shared_state, &output_counts);
    Ok(())
}

fn drain_outputs(rx: &Receiver<SlamOutput>, counts: &mut BTreeMap<&'static str, u64>) {
    for output in rx.try_iter() {
        if let SlamOutput::Graph(snapshot) = &output {
            log::debug!(
                "Graph: {} keyframes, {} loop-closure edges",
                snapshot.keyframes.len(),
                snapshot.loop_closure_edges.len()
            );
        }
        *counts.entry(output.kind()).or_default() += 1;
    }
}

fn report(
    config: &SlamConfig,
    simulation: &Simulation,
    shared_state: &SharedStateHandle,
    counts: &BTreeMap<&'static str, u64>,
) {
    let status = shared_state.status();
    log::info!(
        "Processed {} clouds: {} registrations, {} failures",
        status.clouds_processed,
        status.registrations,
        status.registration_failures
    );
    log::info!(
        "Graph: {} vertices, {} edges, {} keyframes, {} loop closures",
        status.vertices,
        status.edges,
        status.keyframes,
        status.loop_closures
    );
    log::info!(
        "Optimizations: {} ok, {} failed",
        status.optimizations,
        status.optimization_failures
    );
    for (kind, count) in counts {
        log::info!("  {:<15} {}", kind, count);
    }

    if let Some(map) = shared_state.map() {
        log::info!("Map: {} points from {} keyframes", map.len(), map.keyframes.len());
        if let Some((min, max)) = map.cloud.bounds() {
            log::info!(
                "Map extent: ({:.2}, {:.2}, {:.2}) to ({:.2}, {:.2}, {:.2})",
                min.x,
                min.y,
                min.z,
                max.x,
                max.y,
                max.z
            );
        }
    }

    if let Some(pose) = shared_state.graph.read().latest_optimized_pose() {
        log::info!(
            "Latest optimized pose: ({:.3}, {:.3}, {:.3})",
            pose.position.x,
            pose.position.y,
            pose.position.z
        );
    }

    match shared_state.transforms.lookup(&config.frames.map, &config.frames.odom) {
        Ok(t) => log::info!(
            "map → odom: ({:.3}, {:.3}, {:.3})",
            t.translation.vector.x,
            t.translation.vector.y,
            t.translation.vector.z
        ),
        Err(e) => log::info!("map → odom not published: {}", e),
    }

    // Compare the newest vertex against ground truth
    let graph = shared_state.graph.read();
    if let Some(latest) = graph.latest_pose() {
        let truth = simulation.true_pose(latest.timestamp_us as f64 * 1e-6);
        let error = (latest.position - truth.translation.vector).norm();
        log::info!("Final position error: {:.3} m", error);
    }
}
