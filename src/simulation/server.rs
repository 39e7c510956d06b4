//! Multi-client line-protocol server, one listener per system

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::generator::{is_spike_tick, SampleGenerator};
use super::profile::SimulationState;
use crate::acquisition::protocol::{encode, is_stop, STOP_TOKEN};
use crate::acquisition::transport::{LineTransport, StreamTransport};
use crate::config::SimulatorConfig;
use crate::types::SystemId;

/// Upper bound on the farewell `STOP` during shutdown.
const FAREWELL_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SimulatorError {
    #[error("Simulator host '{0}' is not an IP address")]
    BadHost(String),

    #[error("Failed to bind {system} listener on {addr}: {source}")]
    Bind {
        system: SystemId,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Configured but not yet listening.
pub struct SimulatorServer {
    config: SimulatorConfig,
    state: Arc<SimulationState>,
    seed: Option<u64>,
}

impl SimulatorServer {
    pub fn new(config: SimulatorConfig, state: Arc<SimulationState>) -> Self {
        Self {
            config,
            state,
            seed: None,
        }
    }

    /// Make every client's sample stream reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Bind both listeners and start accepting.
    ///
    /// Port 0 binds an ephemeral port; read it back with
    /// [`RunningSimulator::local_addr`].
    pub async fn start(self) -> Result<RunningSimulator, SimulatorError> {
        let ip: IpAddr = self
            .config
            .host
            .parse()
            .map_err(|_| SimulatorError::BadHost(self.config.host.clone()))?;

        let cancel = CancellationToken::new();
        let mut listeners = JoinSet::new();
        let mut addrs = HashMap::new();

        for system in SystemId::ALL {
            let addr = SocketAddr::new(ip, self.config.port_for(system));
            let listener = TcpListener::bind(addr)
                .await
                .map_err(|source| SimulatorError::Bind { system, addr, source })?;
            let local = listener.local_addr().unwrap_or(addr);
            info!(system = %system, address = %local, "[Simulator] Listening");
            addrs.insert(system, local);

            let ctx = ClientContext {
                system,
                state: Arc::clone(&self.state),
                interval: self.config.sample_interval(),
                stop_poll: self.config.stop_poll(),
                source_label: self.config.source_label.clone(),
                seed: self.seed.map(|s| s.wrapping_add(u64::from(system.index()) << 32)),
            };
            listeners.spawn(accept_loop(listener, ctx, cancel.clone()));
        }

        Ok(RunningSimulator {
            addrs,
            cancel,
            listeners,
            state: self.state,
        })
    }
}

/// A live simulator. Dropping it cancels all tasks without waiting.
pub struct RunningSimulator {
    addrs: HashMap<SystemId, SocketAddr>,
    cancel: CancellationToken,
    listeners: JoinSet<()>,
    state: Arc<SimulationState>,
}

impl RunningSimulator {
    pub fn local_addr(&self, system: SystemId) -> Option<SocketAddr> {
        self.addrs.get(&system).copied()
    }

    pub fn state(&self) -> &Arc<SimulationState> {
        &self.state
    }

    /// Token that stops every listener and client when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Send `STOP` to every client, close all sockets and wait for the tasks.
    pub async fn shutdown(mut self) {
        info!("[Simulator] Shutting down");
        self.cancel.cancel();
        while let Some(result) = self.listeners.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "[Simulator] Listener task ended abnormally");
            }
        }
    }
}

impl Drop for RunningSimulator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[derive(Clone)]
struct ClientContext {
    system: SystemId,
    state: Arc<SimulationState>,
    interval: Duration,
    stop_poll: Duration,
    source_label: String,
    seed: Option<u64>,
}

async fn accept_loop(listener: TcpListener, ctx: ClientContext, cancel: CancellationToken) {
    let mut clients = JoinSet::new();
    let mut next_client: u64 = 0;

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    info!(system = %ctx.system, peer = %peer, "[Simulator] Client connected");
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "[Simulator] Could not disable Nagle");
                    }
                    let mut client_ctx = ctx.clone();
                    client_ctx.seed = ctx.seed.map(|s| s.wrapping_add(next_client));
                    next_client += 1;
                    let transport = StreamTransport::new(stream, format!("client {peer}"));
                    clients.spawn(serve_client(transport, peer.to_string(), client_ctx, cancel.child_token()));
                }
                Err(e) => {
                    warn!(system = %ctx.system, error = %e, "[Simulator] Accept failed");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            },
            // Reap finished clients so the set does not grow without bound
            Some(_) = clients.join_next(), if !clients.is_empty() => {}
        }
    }

    drop(listener);
    while clients.join_next().await.is_some() {}
    debug!(system = %ctx.system, "[Simulator] Listener closed");
}

/// Stream samples to one client until the session ends.
///
/// Every await is bounded by `cancel`; a client that stops reading must not
/// hold up shutdown.
async fn serve_client<S>(
    mut transport: StreamTransport<S>,
    peer: String,
    ctx: ClientContext,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let system = ctx.system;
    let mut generator = SampleGenerator::new(ctx.seed, ctx.source_label);

    loop {
        let (profile, t) = ctx.state.next_tick();
        let record = generator.generate(profile, t);
        if is_spike_tick(profile, t) {
            info!(system = %system, cps = record.cps, "[Simulator] *** INJECTING SPIKE ***");
        }

        let line = encode(&record);
        let written = tokio::select! {
            () = cancel.cancelled() => {
                debug!(system = %system, peer = %peer, "[Simulator] Shutdown while client was not reading");
                break;
            }
            written = transport.write_line(&line) => written,
        };
        if let Err(e) = written {
            debug!(system = %system, peer = %peer, error = %e, "[Simulator] Client went away");
            break;
        }

        tokio::select! {
            () = cancel.cancelled() => {
                let _ = tokio::time::timeout(FAREWELL_TIMEOUT, transport.write_line(STOP_TOKEN)).await;
                break;
            }
            () = tokio::time::sleep(ctx.interval) => {}
        }

        match transport.read_line(ctx.stop_poll).await {
            Ok(Some(line)) if is_stop(&line) => {
                info!(system = %system, peer = %peer, "[Simulator] Client requested STOP");
                let _ = transport.write_line(STOP_TOKEN).await;
                break;
            }
            Ok(_) => {}
            Err(e) => {
                debug!(system = %system, peer = %peer, error = %e, "[Simulator] Client disconnected");
                break;
            }
        }
    }

    transport.close().await;
    info!(system = %system, peer = %peer, "[Simulator] Client finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::SimulationProfile;

    fn context() -> ClientContext {
        ClientContext {
            system: SystemId::System1,
            state: Arc::new(SimulationState::new(SimulationProfile::Normal)),
            interval: Duration::from_millis(1),
            stop_poll: Duration::from_millis(1),
            source_label: "Co-60".to_string(),
            seed: Some(7),
        }
    }

    #[tokio::test]
    async fn test_shutdown_does_not_wait_on_stalled_client() {
        // The client end is never read, so the 64-byte pipe fills on the first sample
        let (server_side, _client_side) = tokio::io::duplex(64);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve_client(
            StreamTransport::new(server_side, "stalled"),
            "stalled".to_string(),
            context(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("client task should end promptly after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_client_stop_ends_session() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let (server_side, mut client_side) = tokio::io::duplex(4096);
        let task = tokio::spawn(serve_client(
            StreamTransport::new(server_side, "mock"),
            "mock".to_string(),
            context(),
            CancellationToken::new(),
        ));

        client_side.write_all(b"STOP").await.unwrap();
        let mut received = String::new();
        tokio::time::timeout(Duration::from_secs(1), client_side.read_to_string(&mut received))
            .await
            .expect("session should close after STOP")
            .unwrap();
        task.await.unwrap();
        assert!(received.lines().any(|line| line == STOP_TOKEN));
    }
}
