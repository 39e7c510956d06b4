//! LISIDA Hardware Simulator
//!
//! Serves synthetic lysimeter/isotope telemetry on one TCP port per system
//! so the acquisition daemon can be exercised without field hardware.
//! Scenarios:
//! - Normal operation
//! - Sudden count-rate spike every 30 samples
//! - Temperature sensor drift
//! - Periodic disturbance on soil moisture
//!
//! # Usage
//! ```bash
//! ./simulation --profile spike --interval-ms 500
//! ./lisida --system-1 SIMULATOR_1 --system-2 SIMULATOR_2
//! ```

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lisida::config::AppConfig;
use lisida::simulation::{SimulationProfile, SimulationState, SimulatorServer};
use lisida::SystemId;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "simulation")]
#[command(about = "Line-protocol telemetry simulator for LISIDA testing")]
#[command(version)]
struct Args {
    /// Path to the TOML config file ([simulator] section)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Listen host (IP literal)
    #[arg(long)]
    host: Option<String>,

    /// Port for System_1
    #[arg(long = "port-1")]
    port_1: Option<u16>,

    /// Port for System_2
    #[arg(long = "port-2")]
    port_2: Option<u16>,

    /// Milliseconds between samples per client
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    interval_ms: Option<u64>,

    /// Initial profile: normal, spike, drift or periodic
    #[arg(short, long, default_value = "normal")]
    profile: SimulationProfile,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Disable the interactive stdin menu
    #[arg(long)]
    no_menu: bool,
}

fn print_menu() {
    println!();
    println!("--- Select Simulation Scenario ---");
    for profile in SimulationProfile::ALL {
        println!("  {}: {}", profile.menu_key(), profile.description());
    }
    println!("  q: Quit");
}

/// Blocking stdin menu. Runs on its own thread; stdin reads cannot be cancelled.
fn run_menu(state: Arc<SimulationState>, cancel: CancellationToken) {
    let stdin = std::io::stdin();
    print_menu();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let choice = line.trim();
        if choice.eq_ignore_ascii_case("q") {
            info!("Closing simulator...");
            cancel.cancel();
            return;
        }
        match choice.parse::<SimulationProfile>() {
            Ok(profile) if choice.len() == 1 => {
                state.set_profile(profile);
                info!(profile = %profile, "🎛️  Profile switched");
            }
            _ => println!("Invalid choice."),
        }
        if cancel.is_cancelled() {
            return;
        }
        print_menu();
    }
    // stdin closed (e.g. running under a supervisor): keep serving
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let app_config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load(),
    };
    let mut sim_config = app_config.simulator;
    if let Some(host) = args.host {
        sim_config.host = host;
    }
    if let Some(port) = args.port_1 {
        sim_config.set_port(SystemId::System1, port);
    }
    if let Some(port) = args.port_2 {
        sim_config.set_port(SystemId::System2, port);
    }
    if let Some(interval) = args.interval_ms {
        sim_config.sample_interval_ms = interval;
    }

    info!("===== LISIDA Hardware Simulator =====");
    info!(
        profile = %args.profile,
        interval_ms = sim_config.sample_interval_ms,
        source = %sim_config.source_label,
        "Starting"
    );
    if let Some(seed) = args.seed {
        info!("Random seed: {}", seed);
    }

    let state = Arc::new(SimulationState::new(args.profile));
    let mut server = SimulatorServer::new(sim_config, Arc::clone(&state));
    if let Some(seed) = args.seed {
        server = server.with_seed(seed);
    }
    let running = server.start().await.context("Failed to start simulator")?;

    let cancel = CancellationToken::new();
    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, shutting down simulator...");
        shutdown_token.cancel();
    });

    if args.no_menu {
        info!("Interactive menu disabled; profile fixed at {}", args.profile);
    } else {
        let menu_state = Arc::clone(&state);
        let menu_cancel = cancel.clone();
        // Detached: a blocked stdin read must not hold up shutdown
        std::thread::spawn(move || run_menu(menu_state, menu_cancel));
    }

    cancel.cancelled().await;
    running.shutdown().await;

    info!(profile = %state.profile(), "✓ Simulator stopped");
    Ok(())
}
