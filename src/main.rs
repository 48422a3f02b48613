//! Demo binary: runs the tool-change orchestration against the simulated
//! HAL, driven by a TOML configuration file.
//!
//! Useful for exercising a rack configuration without hardware: it mounts
//! tool 1, starts the spindle, swaps to tool 2 and returns everything to
//! the rack, logging every step.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use spindle_atc::config::load_config;
use spindle_atc::hal::simulation::{ProbeOutcome, SimClock, SimMotionPort, SimOutputProvider};
use spindle_atc::state::{SpindleState, SystemState};
use spindle_atc::SpindleUnit;

/// Spindle & ATC orchestration demo
#[derive(Parser, Debug)]
#[command(name = "spindle_atc")]
#[command(version)]
#[command(about = "Simulated spindle / tool-changer session")]
struct Args {
    /// Path to the configuration TOML.
    #[arg(default_value = "config/spindle.toml")]
    config: PathBuf,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("spindle_atc v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("session complete");
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(&args.config)?;
    info!("config OK: {}", args.config.display());

    let system = Arc::new(SystemState::new());
    let clock = Arc::new(SimClock::default());
    let mut provider = SimOutputProvider::default();
    let mut motion = SimMotionPort::new(system.clone());
    motion.set_probe_outcome(ProbeOutcome::Contact { z: -55.0 });

    let mut unit = SpindleUnit::from_config(
        &config,
        &mut provider,
        system,
        clock.clone(),
    );
    unit.init()?;

    unit.tool_change(1, false, &mut motion)?;
    info!("tool 1 mounted");

    unit.controller.set_state(SpindleState::Clockwise, 8000);
    info!(speed = unit.controller.current_speed(), "spindle running");

    motion.set_probe_outcome(ProbeOutcome::Contact { z: -52.5 });
    unit.tool_change(2, false, &mut motion)?;
    info!("tool 2 mounted, spindle state {:?}", unit.controller.state());

    unit.controller.stop();
    unit.tool_change(0, false, &mut motion)?;
    info!(
        motion_commands = motion.motion_count(),
        simulated_wait_ms = clock.slept_ms(),
        "all tools returned"
    );

    unit.deinit();
    Ok(())
}

fn setup_tracing(args: &Args) {
    let default_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if args.json {
        builder.json().init();
    } else {
        builder.init();
    }
}
