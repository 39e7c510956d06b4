//! Connection targets and their resolved endpoints

use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::config::SimulatorConfig;
use crate::types::SystemId;

use super::transport::{LineTransport, SerialTransport, StreamTransport, TransportError};

/// What an operator asks a system to connect to.
///
/// Parses from:
/// - `SIMULATOR_1` / `SIMULATOR_2`: the built-in simulator listener for that system
/// - `tcp://host:port`: any line-protocol producer
/// - anything else: a serial device path (optionally `path@baud`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionTarget {
    Serial { path: String, baud_rate: Option<u32> },
    Simulator(SystemId),
    Tcp(SocketAddr),
}

impl ConnectionTarget {
    /// Resolve into a concrete endpoint using the simulator addressing and
    /// default baud rate.
    pub fn resolve(
        &self,
        simulator: &SimulatorConfig,
        default_baud_rate: u32,
    ) -> Result<Endpoint, TargetError> {
        match self {
            Self::Serial { path, baud_rate } => Ok(Endpoint::Serial {
                path: path.clone(),
                baud_rate: baud_rate.unwrap_or(default_baud_rate),
            }),
            Self::Simulator(system) => simulator
                .address_for(*system)
                .map(Endpoint::Socket)
                .map_err(|_| TargetError::BadSimulatorHost(simulator.host.clone())),
            Self::Tcp(addr) => Ok(Endpoint::Socket(*addr)),
        }
    }
}

impl FromStr for ConnectionTarget {
    type Err = TargetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(TargetError::Empty);
        }

        if let Some(index) = s.strip_prefix("SIMULATOR_") {
            let system = index
                .parse::<u8>()
                .ok()
                .and_then(SystemId::from_index)
                .ok_or_else(|| TargetError::UnknownSimulator(s.to_string()))?;
            return Ok(Self::Simulator(system));
        }

        if let Some(addr) = s.strip_prefix("tcp://") {
            return addr
                .parse::<SocketAddr>()
                .map(Self::Tcp)
                .map_err(|_| TargetError::BadAddress(addr.to_string()));
        }

        // Windows device paths never contain '@', so a trailing "@<digits>" is a baud rate
        if let Some((path, baud)) = s.rsplit_once('@') {
            if let Ok(baud_rate) = baud.parse::<u32>() {
                return Ok(Self::Serial {
                    path: path.to_string(),
                    baud_rate: Some(baud_rate),
                });
            }
        }

        Ok(Self::Serial {
            path: s.to_string(),
            baud_rate: None,
        })
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial {
                path,
                baud_rate: Some(baud),
            } => write!(f, "{path}@{baud}"),
            Self::Serial { path, .. } => f.write_str(path),
            Self::Simulator(system) => write!(f, "SIMULATOR_{}", system.index()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("Empty connection target")]
    Empty,

    #[error("Unknown simulator target '{0}' (expected SIMULATOR_1 or SIMULATOR_2)")]
    UnknownSimulator(String),

    #[error("Invalid socket address '{0}'")]
    BadAddress(String),

    #[error("Simulator host '{0}' is not an IP address")]
    BadSimulatorHost(String),
}

/// A concrete place to open a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Serial { path: String, baud_rate: u32 },
    Socket(SocketAddr),
}

impl Endpoint {
    /// Open a transport, bounded by `timeout`.
    pub async fn open(&self, timeout: Duration) -> Result<Box<dyn LineTransport>, TransportError> {
        match self {
            Self::Serial { path, baud_rate } => {
                let transport = tokio::time::timeout(timeout, SerialTransport::open(path, *baud_rate))
                    .await
                    .map_err(|_| TransportError::Timeout)??;
                Ok(Box::new(transport))
            }
            Self::Socket(addr) => {
                let transport = StreamTransport::connect(*addr, timeout).await?;
                Ok(Box::new(transport))
            }
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial { path, baud_rate } => write!(f, "{path} @ {baud_rate} baud"),
            Self::Socket(addr) => write!(f, "{addr}"),
        }
    }
}
