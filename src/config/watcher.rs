//! Polling-based config file watcher.
//!
//! Checks the config file's mtime on a fixed interval. When a change is
//! detected, debounces (editors often write in stages), re-parses the file
//! and sends the result via an mpsc channel.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::AppConfig;

/// Events emitted by the config watcher.
#[derive(Debug)]
pub enum ConfigEvent {
    /// File changed and parsed cleanly.
    Reloaded(Box<AppConfig>),
    /// Reload was attempted but failed (previous config stays active).
    Error(String),
}

/// Interval between mtime checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Debounce delay after detecting a change.
pub const DEBOUNCE_DELAY: Duration = Duration::from_millis(500);

/// Run the config file watcher loop with the default timings.
pub async fn run_config_watcher(
    path: PathBuf,
    tx: mpsc::Sender<ConfigEvent>,
    cancel: CancellationToken,
) {
    watch_with_intervals(path, tx, cancel, POLL_INTERVAL, DEBOUNCE_DELAY).await;
}

/// Poll `path` for mtime changes and reload when detected.
///
/// Returns when the channel is closed or `cancel` fires.
pub async fn watch_with_intervals(
    path: PathBuf,
    tx: mpsc::Sender<ConfigEvent>,
    cancel: CancellationToken,
    poll: Duration,
    debounce: Duration,
) {
    tracing::info!(path = %path.display(), "Config watcher started");

    let mut last_mtime = get_mtime(&path);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!("Config watcher cancelled");
                return;
            }
            () = tokio::time::sleep(poll) => {}
        }

        let Some(current) = get_mtime(&path) else {
            // Only warn on the transition to missing
            if last_mtime.is_some() {
                tracing::warn!(
                    path = %path.display(),
                    "Config file not accessible, keeping current config"
                );
                last_mtime = None;
            }
            continue;
        };

        if last_mtime == Some(current) {
            continue;
        }

        tokio::time::sleep(debounce).await;
        if get_mtime(&path) != Some(current) {
            // Still being written
            continue;
        }
        last_mtime = Some(current);

        let event = match AppConfig::load_from_file(&path) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "Config reloaded");
                ConfigEvent::Reloaded(Box::new(config))
            }
            Err(e) => {
                tracing::error!(error = %e, "Config hot-reload failed, keeping previous config");
                ConfigEvent::Error(e.to_string())
            }
        };

        if tx.send(event).await.is_err() {
            tracing::debug!("Config watcher channel closed, stopping");
            return;
        }
    }
}

fn get_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
