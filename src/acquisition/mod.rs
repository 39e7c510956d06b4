//! Acquisition layer: wire protocol, transports and connection workers
//!
//! - `protocol`: line codec for the 12-field telemetry format
//! - `transport`: TCP and serial line transports
//! - `target`: operator-facing connection targets and endpoints
//! - `worker`: per-system connection lifecycle

pub mod protocol;
pub mod target;
pub mod transport;
pub mod worker;

pub use protocol::{decode, encode, is_stop, is_valid_source_name, DecodeError, LineBuffer, STOP_TOKEN};
pub use target::{ConnectionTarget, Endpoint, TargetError};
pub use transport::{LineTransport, SerialTransport, StreamTransport, TransportError};
pub use worker::{StopReason, WorkerEvent, WorkerHandle, WorkerSettings, WorkerState};
