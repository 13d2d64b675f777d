//! # Cadence Core host
//!
//! Loads an application file, configures it with the built-in registries,
//! activates one state and runs its threads until Ctrl-C or until the
//! requested duration elapses.

use cadence_common::config::LogLevel;
use cadence_common::consts::DEFAULT_CONFIG_PATH;
use cadence_core::config::{ApplicationConfig, load_config};
use cadence_core::{RealTimeApplication, Registries, WorkerSummary};
use clap::Parser;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Cadence Core: cyclic real-time execution of GAM applications
#[derive(Parser, Debug)]
#[command(name = "cadence_core")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Runs a GAM application state on real-time threads")]
struct Args {
    /// Application file (TOML).
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// State to activate (default: `application.initial_state`).
    #[arg(long)]
    state: Option<String>,

    /// Stop after this many milliseconds instead of waiting for Ctrl-C.
    #[arg(long, value_name = "MS")]
    duration_ms: Option<u64>,

    /// Enable verbose logging (DEBUG level, overrides `shared.log_level`).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    let config = load_config(&args.config);
    let level = config.as_ref().map(|c| c.shared.log_level).unwrap_or_default();
    setup_tracing(&args, level);

    info!("Cadence Core v{} starting...", env!("CARGO_PKG_VERSION"));

    let result = config
        .map_err(Box::<dyn std::error::Error>::from)
        .and_then(|config| run(&args, config));
    if let Err(e) = result {
        error!("FATAL: {e}");
        process::exit(1);
    }

    info!("Cadence Core shutdown complete");
}

fn run(args: &Args, config: ApplicationConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        "Config OK: service={}, application={}, data_sources={}, functions={}, states={}",
        config.shared.service_name,
        config.application.name,
        config.data_sources.len(),
        config.functions.len(),
        config.states.len(),
    );

    let mut app = RealTimeApplication::configure(&config, &Registries::default())?;

    let state = args
        .state
        .clone()
        .or_else(|| app.initial_state().map(str::to_string))
        .ok_or("no state given and the application has no initial_state")?;
    app.prepare_next_state(&state)?;
    app.start_execution()?;

    // Setup signal handler for graceful shutdown.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        r.store(false, Ordering::SeqCst);
    })?;

    let deadline = args.duration_ms.map(|ms| Instant::now() + Duration::from_millis(ms));
    while running.load(Ordering::SeqCst) {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Requested duration elapsed");
            break;
        }
        if !app.scheduler().is_running() {
            warn!("All threads of '{state}' have ended");
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let summaries = app.terminate();
    for s in &summaries {
        log_summary(s);
    }
    Ok(())
}

fn log_summary(s: &WorkerSummary) {
    info!(
        "{}.{}: cycles={} avg={}ns min={}ns max={}ns stddev={:.0}ns overruns={} max_latency={}ns exit={:?}",
        s.state,
        s.thread,
        s.stats.cycle_count,
        s.stats.avg_cycle_ns(),
        s.stats.min_or_zero(),
        s.stats.max_cycle_ns,
        s.stats.stddev_cycle_ns(),
        s.stats.overruns,
        s.stats.max_latency_ns,
        s.exit,
    );
}

fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .init();
    }
}
