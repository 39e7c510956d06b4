//! Acquisition manager - one slot per system
//!
//! Owns the connection worker and pump task of every system, enforces single
//! ownership (starting a system first stops whatever it was running), applies
//! the live calibration and drives each system's health watchdog.
//!
//! ```text
//! WorkerHandle ──WorkerEvent (mpsc, wire order)──▶ pump ──PipelineEvent──▶ broadcast
//!                                                   │
//!                                      calibration (ArcSwap) + HealthWatchdog
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::events::PipelineEvent;
use super::watchdog::HealthWatchdog;
use crate::acquisition::{
    ConnectionTarget, Endpoint, StopReason, TargetError, WorkerEvent, WorkerHandle,
    WorkerSettings, WorkerState,
};
use crate::config::{defaults, AppConfig, SimulatorConfig};
use crate::processing::CalibrationSet;
use crate::types::{HealthState, SystemId};

/// Everything the manager needs besides calibration.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub worker: WorkerSettings,
    pub signal_lost: Duration,
    pub simulator: SimulatorConfig,
    pub default_baud_rate: u32,
    pub event_capacity: usize,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            worker: WorkerSettings::default(),
            signal_lost: Duration::from_secs(defaults::SIGNAL_LOST_SECS),
            simulator: SimulatorConfig::default(),
            default_baud_rate: defaults::DEFAULT_BAUD_RATE,
            event_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl From<&AppConfig> for ManagerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            worker: WorkerSettings::from(&config.acquisition),
            signal_lost: config.watchdog.signal_lost(),
            simulator: config.simulator.clone(),
            default_baud_rate: config.acquisition.default_baud_rate,
            event_capacity: defaults::EVENT_CHANNEL_CAPACITY,
        }
    }
}

/// State shared with every pump task.
struct Shared {
    events: broadcast::Sender<PipelineEvent>,
    calibration: ArcSwap<CalibrationSet>,
    health: HashMap<SystemId, watch::Sender<HealthState>>,
}

impl Shared {
    fn publish(&self, event: PipelineEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    fn set_health(&self, system: SystemId, state: HealthState) {
        if let Some(tx) = self.health.get(&system) {
            tx.send_replace(state);
        }
        info!(system = %system, health = %state, "[Health] Transition");
        self.publish(PipelineEvent::Health { system, state });
    }
}

/// A running worker and the pump draining it.
struct Slot {
    worker: WorkerHandle,
    pump: JoinHandle<()>,
}

impl Slot {
    async fn shutdown(mut self, system: SystemId) {
        self.worker.stop().await;
        if let Err(e) = self.pump.await {
            warn!(system = %system, error = %e, "[Manager] Pump task ended abnormally");
        }
    }
}

pub struct AcquisitionManager {
    settings: ManagerSettings,
    shared: Arc<Shared>,
    slots: HashMap<SystemId, Mutex<Option<Slot>>>,
}

impl AcquisitionManager {
    pub fn new(settings: ManagerSettings, calibration: CalibrationSet) -> Self {
        let (events, _) = broadcast::channel(settings.event_capacity.max(1));
        let health = SystemId::ALL
            .iter()
            .map(|&system| (system, watch::channel(HealthState::Disconnected).0))
            .collect();
        let slots = SystemId::ALL
            .iter()
            .map(|&system| (system, Mutex::new(None)))
            .collect();

        Self {
            settings,
            shared: Arc::new(Shared {
                events,
                calibration: ArcSwap::from_pointee(calibration),
                health,
            }),
            slots,
        }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.shared.events.subscribe()
    }

    /// Resolve `target` and (re)start `system` on it.
    pub async fn start(&self, system: SystemId, target: &ConnectionTarget) -> Result<(), TargetError> {
        let endpoint = target.resolve(&self.settings.simulator, self.settings.default_baud_rate)?;
        self.start_endpoint(system, endpoint).await;
        Ok(())
    }

    /// (Re)start `system` on a concrete endpoint.
    ///
    /// Any live worker for `system` is stopped and its transport released
    /// before the new one is spawned.
    pub async fn start_endpoint(&self, system: SystemId, endpoint: Endpoint) {
        let mut slot = self.slot(system).lock().await;
        if let Some(previous) = slot.take() {
            info!(system = %system, "[Manager] Replacing running connection");
            previous.shutdown(system).await;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = WorkerHandle::spawn(system, endpoint, self.settings.worker, tx);
        let pump = tokio::spawn(pump(
            system,
            rx,
            Arc::clone(&self.shared),
            self.settings.signal_lost,
        ));
        *slot = Some(Slot { worker, pump });
    }

    /// Stop `system` and wait for its transport to be released. No-op when idle.
    pub async fn stop(&self, system: SystemId) {
        // Held across shutdown so a concurrent start cannot overlap the old transport
        let mut slot = self.slot(system).lock().await;
        if let Some(previous) = slot.take() {
            previous.shutdown(system).await;
        }
    }

    /// Stop every system concurrently.
    pub async fn stop_all(&self) {
        let stops = SystemId::ALL.map(|system| self.stop(system));
        let [first, second] = stops;
        tokio::join!(first, second);
    }

    pub fn health(&self, system: SystemId) -> HealthState {
        self.shared
            .health
            .get(&system)
            .map_or(HealthState::Disconnected, |tx| *tx.borrow())
    }

    /// Observe health changes for one system.
    pub fn health_receiver(&self, system: SystemId) -> Option<watch::Receiver<HealthState>> {
        self.shared.health.get(&system).map(watch::Sender::subscribe)
    }

    pub async fn worker_state(&self, system: SystemId) -> WorkerState {
        self.slot(system)
            .lock()
            .await
            .as_ref()
            .map_or(WorkerState::Idle, |slot| slot.worker.state())
    }

    pub async fn is_running(&self, system: SystemId) -> bool {
        self.slot(system)
            .lock()
            .await
            .as_ref()
            .is_some_and(|slot| !slot.worker.is_finished())
    }

    /// Swap in a new calibration; the next record of every system uses it.
    pub fn set_calibration(&self, calibration: CalibrationSet) {
        info!(channels = calibration.len(), "[Manager] Calibration updated");
        self.shared.calibration.store(Arc::new(calibration));
    }

    pub fn calibration(&self) -> Arc<CalibrationSet> {
        self.shared.calibration.load_full()
    }

    fn slot(&self, system: SystemId) -> &Mutex<Option<Slot>> {
        // Populated for every SystemId in new()
        &self.slots[&system]
    }
}

/// Per-system pump: calibrate, publish, and drive the watchdog.
async fn pump(
    system: SystemId,
    mut rx: mpsc::UnboundedReceiver<WorkerEvent>,
    shared: Arc<Shared>,
    signal_lost: Duration,
) {
    let mut watchdog = HealthWatchdog::new(signal_lost);

    loop {
        let deadline = watchdog.deadline();
        let event = tokio::select! {
            event = rx.recv() => event,
            () = sleep_until(deadline) => {
                if let Some(state) = watchdog.on_tick(Instant::now()) {
                    warn!(system = %system, "[Health] No data for {:?}", signal_lost);
                    shared.set_health(system, state);
                }
                continue;
            }
        };

        match event {
            Some(WorkerEvent::Record(raw)) => {
                if let Some(state) = watchdog.on_record(Instant::now()) {
                    shared.set_health(system, state);
                }
                let record = shared.calibration.load().apply(&raw);
                shared.publish(PipelineEvent::Record { system, record });
            }
            Some(WorkerEvent::Status(message)) => {
                shared.publish(PipelineEvent::Status { system, message });
            }
            Some(WorkerEvent::Stopped(reason)) => {
                debug!(system = %system, ?reason, "[Manager] Worker stopped");
                if reason == StopReason::PeerStop {
                    shared.publish(PipelineEvent::Status {
                        system,
                        message: "Source ended the session".to_string(),
                    });
                }
                break;
            }
            None => break,
        }
    }

    if let Some(state) = watchdog.on_stopped() {
        shared.set_health(system, state);
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_idle_manager() {
        let manager = AcquisitionManager::new(ManagerSettings::default(), CalibrationSet::identity());
        for system in SystemId::ALL {
            assert_eq!(manager.health(system), HealthState::Disconnected);
            assert_eq!(manager.worker_state(system).await, WorkerState::Idle);
            assert!(!manager.is_running(system).await);
        }
        // Stopping an idle system is a no-op
        manager.stop_all().await;
    }

    #[tokio::test]
    async fn test_calibration_swap() {
        use crate::processing::CalibrationParameter;
        use crate::types::NumericField;

        let manager = AcquisitionManager::new(ManagerSettings::default(), CalibrationSet::identity());
        assert!(manager.calibration().is_empty());

        let mut set = CalibrationSet::identity();
        set.set(NumericField::Ec, CalibrationParameter::new(0.5, 0.0));
        manager.set_calibration(set.clone());
        assert_eq!(*manager.calibration(), set);
    }

    #[tokio::test]
    async fn test_bad_simulator_host_rejected() {
        let mut settings = ManagerSettings::default();
        settings.simulator.host = "localhost-ish".to_string();
        let manager = AcquisitionManager::new(settings, CalibrationSet::identity());
        let result = manager
            .start(SystemId::System1, &ConnectionTarget::Simulator(SystemId::System1))
            .await;
        assert!(matches!(result, Err(TargetError::BadSimulatorHost(_))));
        assert!(!manager.is_running(SystemId::System1).await);
    }
}
