//! Connection worker: one task owning one transport for one system
//!
//! ```text
//! Idle ──spawn──▶ Connecting ──open ok──▶ Streaming ──STOP / stop request──▶ Stopping ──▶ Stopped
//!                     │                       │
//!                     └──open failed──────────┴──transport failure──────────────────────▶ Stopped
//! ```
//!
//! The worker never calibrates and never tracks liveness. It emits raw
//! records in wire order plus human-readable status strings, and always
//! finishes with exactly one `WorkerEvent::Stopped`.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{self, STOP_TOKEN};
use super::target::Endpoint;
use super::transport::{LineTransport, TransportError};
use crate::config::{defaults, AcquisitionConfig};
use crate::types::{SystemId, TelemetryRecord};

/// Lifecycle of one connection worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Connecting,
    Streaming,
    Stopping,
    Stopped,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Why a worker reached `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The owner asked for a stop
    Requested,
    /// The peer sent `STOP`
    PeerStop,
    /// EOF, reset or device error while streaming
    TransportFailure,
    /// The transport never opened
    ConnectFailed,
}

/// Everything a worker tells its owner.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// Raw, uncalibrated record
    Record(TelemetryRecord),
    /// Human-readable status line
    Status(String),
    /// Final event; nothing follows it
    Stopped(StopReason),
}

/// Timing knobs for a worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Bounded wait per read; also the upper bound on stop latency
    pub read_wait: Duration,
    pub connect_timeout: Duration,
    /// Upper bound on the final `STOP` write
    pub handshake_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            read_wait: Duration::from_millis(defaults::READ_WAIT_MS),
            connect_timeout: Duration::from_millis(defaults::CONNECT_TIMEOUT_MS),
            handshake_timeout: Duration::from_millis(defaults::HANDSHAKE_TIMEOUT_MS),
        }
    }
}

impl From<&AcquisitionConfig> for WorkerSettings {
    fn from(config: &AcquisitionConfig) -> Self {
        Self {
            read_wait: config.read_wait(),
            connect_timeout: config.connect_timeout(),
            handshake_timeout: config.handshake_timeout(),
        }
    }
}

// ============================================================================
// Handle
// ============================================================================

/// Owner's side of a running worker.
///
/// Dropping the handle requests a stop; it does not wait for one.
#[derive(Debug)]
pub struct WorkerHandle {
    system: SystemId,
    cancel: CancellationToken,
    state_rx: watch::Receiver<WorkerState>,
    task: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Spawn a worker that opens `endpoint` and streams from it.
    pub fn spawn(
        system: SystemId,
        endpoint: Endpoint,
        settings: WorkerSettings,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (worker, handle) = Worker::new(system, settings, events);
        let task = tokio::spawn(worker.run(endpoint));
        handle.with_task(task)
    }

    /// Spawn a worker over an already-open transport.
    pub fn attach(
        system: SystemId,
        transport: Box<dyn LineTransport>,
        settings: WorkerSettings,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> Self {
        let (worker, handle) = Worker::new(system, settings, events);
        let task = tokio::spawn(async move {
            worker.set_state(WorkerState::Connecting);
            worker.stream(transport).await;
        });
        handle.with_task(task)
    }

    fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    pub fn system(&self) -> SystemId {
        self.system
    }

    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<WorkerState> {
        self.state_rx.clone()
    }

    /// Ask the worker to stop. Idempotent, returns immediately.
    pub fn request_stop(&self) {
        self.cancel.cancel();
    }

    /// Request a stop and wait until the worker has released its transport.
    pub async fn stop(&mut self) {
        self.request_stop();
        self.wait_stopped().await;
    }

    /// Wait for the worker task to finish without requesting a stop.
    ///
    /// Returns immediately if it has already been awaited.
    pub async fn wait_stopped(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(system = %self.system, error = %e, "[Worker] Task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ============================================================================
// Worker Task
// ============================================================================

struct Worker {
    system: SystemId,
    settings: WorkerSettings,
    events: mpsc::UnboundedSender<WorkerEvent>,
    cancel: CancellationToken,
    state_tx: watch::Sender<WorkerState>,
    records: u64,
    rejected: u64,
}

impl Worker {
    fn new(
        system: SystemId,
        settings: WorkerSettings,
        events: mpsc::UnboundedSender<WorkerEvent>,
    ) -> (Self, WorkerHandle) {
        let cancel = CancellationToken::new();
        let (state_tx, state_rx) = watch::channel(WorkerState::Idle);
        let worker = Self {
            system,
            settings,
            events,
            cancel: cancel.clone(),
            state_tx,
            records: 0,
            rejected: 0,
        };
        let handle = WorkerHandle {
            system,
            cancel,
            state_rx,
            task: None,
        };
        (worker, handle)
    }

    fn set_state(&self, state: WorkerState) {
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: WorkerEvent) {
        // Owner gone means nobody cares; keep draining until stopped
        let _ = self.events.send(event);
    }

    fn status(&self, message: String) {
        info!(system = %self.system, "[Worker] {}", message);
        self.emit(WorkerEvent::Status(message));
    }

    async fn run(self, endpoint: Endpoint) {
        self.set_state(WorkerState::Connecting);
        self.status(format!("Connecting to {endpoint}..."));

        let opened = tokio::select! {
            () = self.cancel.cancelled() => None,
            result = endpoint.open(self.settings.connect_timeout) => Some(result),
        };

        match opened {
            Some(Ok(transport)) => self.stream(transport).await,
            Some(Err(e)) => {
                self.status(format!("Failed to connect to {endpoint}: {e}"));
                self.finish(StopReason::ConnectFailed);
            }
            None => {
                self.status("Connect cancelled".to_string());
                self.finish(StopReason::Requested);
            }
        }
    }

    async fn stream(mut self, mut transport: Box<dyn LineTransport>) {
        self.set_state(WorkerState::Streaming);
        self.status(format!("Connected to {}", transport.describe()));

        let cancel = self.cancel.clone();
        let wait = self.settings.read_wait;

        let reason = loop {
            let read = tokio::select! {
                biased;
                () = cancel.cancelled() => break StopReason::Requested,
                read = transport.read_line(wait) => read,
            };

            match read {
                Ok(None) => {}
                Ok(Some(line)) if protocol::is_stop(&line) => {
                    info!(system = %self.system, "[Worker] Peer requested stop");
                    break StopReason::PeerStop;
                }
                Ok(Some(line)) => match protocol::decode(&line) {
                    Ok(record) => {
                        self.records += 1;
                        self.emit(WorkerEvent::Record(record));
                    }
                    Err(e) => {
                        self.rejected += 1;
                        debug!(system = %self.system, error = %e, line = %line, "[Worker] Dropped undecodable line");
                    }
                },
                Err(e) => {
                    self.status(format!("Connection lost: {e}"));
                    break StopReason::TransportFailure;
                }
            }
        };

        if reason != StopReason::TransportFailure {
            self.set_state(WorkerState::Stopping);
            if transport.supports_handshake() {
                self.send_stop(transport.as_mut()).await;
            }
        }

        transport.close().await;
        let description = transport.describe().to_string();
        drop(transport);

        info!(
            system = %self.system,
            records = self.records,
            rejected = self.rejected,
            "[Worker] Stream closed"
        );
        self.status(format!("Disconnected from {description}"));
        self.finish(reason);
    }

    /// Best-effort `STOP`; failures are reported and never block release.
    async fn send_stop(&self, transport: &mut dyn LineTransport) {
        let outcome = tokio::time::timeout(
            self.settings.handshake_timeout,
            transport.write_line(STOP_TOKEN),
        )
        .await;

        match outcome {
            Ok(Ok(())) => debug!(system = %self.system, "[Worker] Sent STOP"),
            Ok(Err(TransportError::Closed)) => {}
            Ok(Err(e)) => self.status(format!("Shutdown handshake failed: {e}")),
            Err(_) => self.status("Shutdown handshake timed out".to_string()),
        }
    }

    fn finish(&self, reason: StopReason) {
        self.set_state(WorkerState::Stopped);
        self.emit(WorkerEvent::Stopped(reason));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::transport::StreamTransport;
    use tokio_test::io::Builder;

    const LINE: &[u8] = b"25.10,50.20,55.30,7.01,742.00,150.00,75.00,99.00,Co-60,1250.50,262,1.80\n";

    fn settings() -> WorkerSettings {
        WorkerSettings {
            read_wait: Duration::from_millis(20),
            connect_timeout: Duration::from_millis(200),
            handshake_timeout: Duration::from_millis(200),
        }
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<WorkerEvent>) -> Vec<WorkerEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            let done = matches!(event, WorkerEvent::Stopped(_));
            events.push(event);
            if done {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn test_records_then_peer_stop() {
        let mock = Builder::new()
            .read(LINE)
            .read(b"garbage,line\n")
            .read(LINE)
            .read(b"STOP\n")
            .write(b"STOP")
            .write(b"\n")
            .build();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::attach(
            SystemId::System1,
            Box::new(StreamTransport::new(mock, "mock")),
            settings(),
            tx,
        );

        let events = collect(rx).await;
        handle.wait_stopped().await;

        let records = events
            .iter()
            .filter(|e| matches!(e, WorkerEvent::Record(_)))
            .count();
        assert_eq!(records, 2);
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Stopped(StopReason::PeerStop))
        ));
        assert_eq!(handle.state(), WorkerState::Stopped);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_unterminated_stop_is_peer_stop() {
        let mock = Builder::new()
            .read(LINE)
            .read(b"STOP")
            .write(b"STOP")
            .write(b"\n")
            .build();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::attach(
            SystemId::System1,
            Box::new(StreamTransport::new(mock, "mock")),
            settings(),
            tx,
        );

        let events = collect(rx).await;
        handle.wait_stopped().await;
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Stopped(StopReason::PeerStop))
        ));
    }

    #[tokio::test]
    async fn test_final_unterminated_record_is_kept() {
        let mock = Builder::new().read(&LINE[..LINE.len() - 1]).build();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::attach(
            SystemId::System1,
            Box::new(StreamTransport::new(mock, "mock")),
            settings(),
            tx,
        );

        let events = collect(rx).await;
        handle.wait_stopped().await;
        assert!(events.iter().any(|e| matches!(e, WorkerEvent::Record(_))));
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Stopped(StopReason::TransportFailure))
        ));
    }

    #[tokio::test]
    async fn test_eof_is_transport_failure() {
        let mock = Builder::new().read(LINE).build();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::attach(
            SystemId::System2,
            Box::new(StreamTransport::new(mock, "mock")),
            settings(),
            tx,
        );

        let events = collect(rx).await;
        handle.wait_stopped().await;
        assert!(events
            .iter()
            .any(|e| matches!(e, WorkerEvent::Status(s) if s.starts_with("Connection lost"))));
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Stopped(StopReason::TransportFailure))
        ));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        // A silent peer: the read never completes
        let (client, _server) = tokio::io::duplex(1024);
        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle = WorkerHandle::attach(
            SystemId::System1,
            Box::new(StreamTransport::new(client, "duplex")),
            settings(),
            tx,
        );

        handle.stop().await;
        handle.stop().await;
        handle.request_stop();

        let events = collect(rx).await;
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Stopped(StopReason::Requested))
        ));
        let stopped = events
            .iter()
            .filter(|e| matches!(e, WorkerEvent::Stopped(_)))
            .count();
        assert_eq!(stopped, 1);
        assert_eq!(handle.state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_connect_failure() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, rx) = mpsc::unbounded_channel();
        let mut handle =
            WorkerHandle::spawn(SystemId::System1, Endpoint::Socket(addr), settings(), tx);

        let events = collect(rx).await;
        handle.wait_stopped().await;
        assert!(matches!(
            events.last(),
            Some(WorkerEvent::Stopped(StopReason::ConnectFailed))
        ));
        assert_eq!(handle.state(), WorkerState::Stopped);
    }
}
