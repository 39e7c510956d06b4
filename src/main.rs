//! LISIDA acquisition daemon
//!
//! Connects each configured system to its data source, applies calibration,
//! tracks signal health and logs (or prints as JSON lines) everything the
//! pipeline publishes.
//!
//! # Usage
//!
//! ```bash
//! # Both systems against the bundled simulator
//! ./simulation &
//! ./lisida --system-1 SIMULATOR_1 --system-2 SIMULATOR_2
//!
//! # Hardware on System_1, JSON records on stdout
//! ./lisida --system-1 /dev/ttyUSB0 --json > records.jsonl
//! ```
//!
//! # Environment Variables
//!
//! - `LISIDA_CONFIG`: Path to the TOML config (default: ./lisida.toml)
//! - `RUST_LOG`: Logging level (default: info)

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lisida::config::{self, AppConfig, ConfigEvent, Severity, ThresholdConfig};
use lisida::{
    AcquisitionManager, ConnectionTarget, HealthState, ManagerSettings, NumericField,
    PipelineEvent, SystemId,
};

type TaskName = &'static str;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "lisida")]
#[command(about = "LISIDA telemetry acquisition daemon")]
#[command(version)]
struct CliArgs {
    /// Path to the TOML config file (overrides LISIDA_CONFIG and ./lisida.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Target for System_1: SIMULATOR_1, tcp://HOST:PORT or a serial device path
    #[arg(long = "system-1", value_name = "TARGET")]
    system_1: Option<String>,

    /// Target for System_2: SIMULATOR_2, tcp://HOST:PORT or a serial device path
    #[arg(long = "system-2", value_name = "TARGET")]
    system_2: Option<String>,

    /// Print calibrated records to stdout as JSON lines
    #[arg(long)]
    json: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,

    /// Do not watch the config file for calibration changes
    #[arg(long)]
    no_watch: bool,
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Logs go to stderr so --json output on stdout stays clean
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Config file currently in effect, if any (same search order as `AppConfig::load`).
fn config_path(explicit: Option<&PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.clone());
    }
    std::env::var(config::CONFIG_ENV_VAR)
        .ok()
        .map(PathBuf::from)
        .filter(|p| p.exists())
        .or_else(|| Some(PathBuf::from(config::LOCAL_CONFIG_FILE)).filter(|p| p.exists()))
}

// ============================================================================
// Tasks
// ============================================================================

/// Log every pipeline event; with `json`, also print records to stdout.
async fn run_event_consumer(
    mut rx: broadcast::Receiver<PipelineEvent>,
    thresholds: ThresholdConfig,
    json: bool,
    cancel: CancellationToken,
) -> Result<TaskName> {
    let mut records: u64 = 0;

    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(event @ PipelineEvent::Record { .. }) => {
                records += 1;
                if json {
                    let line = serde_json::to_string(&event).context("Failed to encode record")?;
                    let mut stdout = std::io::stdout().lock();
                    writeln!(stdout, "{line}").context("Failed to write to stdout")?;
                }
                if let PipelineEvent::Record { system, record } = &event {
                    info!(
                        system = %system,
                        temperature = record.temperature,
                        moisture = record.moisture,
                        ph = record.ph,
                        cps = record.cps,
                        "[Record]"
                    );
                    for field in [NumericField::Temperature, NumericField::Moisture, NumericField::Cps] {
                        let value = record.value(field);
                        match thresholds.severity(field, value) {
                            Severity::Normal => {}
                            Severity::Warning => {
                                warn!(system = %system, field = %field, value, "⚠️  Threshold warning");
                            }
                            Severity::Danger => {
                                error!(system = %system, field = %field, value, "🚨 Threshold danger");
                            }
                        }
                    }
                }
            }
            Ok(PipelineEvent::Status { system, message }) => {
                info!(system = %system, "[Status] {}", message);
            }
            Ok(PipelineEvent::Health { system, state }) => match state {
                HealthState::Warning => warn!(system = %system, "[Health] {}", state),
                _ => info!(system = %system, "[Health] {}", state),
            },
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "[Consumer] Fell behind, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }

    info!(records, "[Consumer] Stopped");
    Ok("event-consumer")
}

/// Watch the config file and push calibration changes into the manager.
fn spawn_config_watcher(
    task_set: &mut JoinSet<Result<TaskName>>,
    path: PathBuf,
    manager: Arc<AcquisitionManager>,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = mpsc::channel(4);
    task_set.spawn({
        let cancel = cancel.clone();
        async move {
            config::run_config_watcher(path, tx, cancel).await;
            Ok("config-watcher")
        }
    });
    task_set.spawn(async move {
        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = rx.recv() => event,
            };
            match event {
                Some(ConfigEvent::Reloaded(new_config)) => {
                    manager.set_calibration(new_config.calibration_set());
                    info!("🔄 Calibration reloaded (other settings apply on restart)");
                }
                Some(ConfigEvent::Error(e)) => {
                    warn!("Config reload rejected: {}", e);
                }
                None => break,
            }
        }
        Ok("config-applier")
    });
}

/// Run the supervisor loop: monitor tasks, cancel on failure.
async fn run_supervisor(
    task_set: &mut JoinSet<Result<TaskName>>,
    cancel_token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("Supervisor: Task {} completed", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("Supervisor: Task failed with error: {:#}", e);
                        cancel_token.cancel();
                        return Err(e);
                    }
                    Some(Err(e)) => {
                        error!("Supervisor: Task panicked: {}", e);
                        cancel_token.cancel();
                        return Err(anyhow::anyhow!("Task panicked: {}", e));
                    }
                    None => break,
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_json);

    let mut app_config = match &args.config {
        Some(path) => AppConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => AppConfig::load(),
    };
    if let Some(target) = &args.system_1 {
        app_config.acquisition.set_target(SystemId::System1, target.clone());
    }
    if let Some(target) = &args.system_2 {
        app_config.acquisition.set_target(SystemId::System2, target.clone());
    }

    let mut targets = Vec::new();
    for system in SystemId::ALL {
        if let Some(raw) = app_config.acquisition.target_for(system) {
            let target: ConnectionTarget = raw
                .parse()
                .with_context(|| format!("Invalid target for {system}"))?;
            targets.push((system, target));
        }
    }
    if targets.is_empty() {
        anyhow::bail!(
            "No connection targets configured; pass --system-1/--system-2 or set [acquisition] system_1/system_2"
        );
    }

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  LISIDA - Lysimeter & Isotope Data Acquisition");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let manager = Arc::new(AcquisitionManager::new(
        ManagerSettings::from(&app_config),
        app_config.calibration_set(),
    ));

    // Graceful shutdown via Ctrl+C
    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        shutdown_token.cancel();
    });

    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();
    task_set.spawn(run_event_consumer(
        manager.subscribe(),
        app_config.thresholds.clone(),
        args.json,
        cancel_token.clone(),
    ));

    if !args.no_watch {
        if let Some(path) = config_path(args.config.as_ref()) {
            spawn_config_watcher(&mut task_set, path, Arc::clone(&manager), cancel_token.clone());
        }
    }

    for (system, target) in &targets {
        info!(system = %system, target = %target, "📥 Starting acquisition");
        manager
            .start(*system, target)
            .await
            .with_context(|| format!("Failed to start {system}"))?;
    }

    let outcome = run_supervisor(&mut task_set, cancel_token.clone()).await;

    cancel_token.cancel();
    manager.stop_all().await;
    while task_set.join_next().await.is_some() {}

    info!("✓ LISIDA shutdown complete");
    outcome
}
