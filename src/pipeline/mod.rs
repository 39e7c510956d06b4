//! Acquisition Pipeline Module
//!
//! ```text
//! worker (raw records, status, stop)
//!   │  unbounded mpsc, wire order
//!   ▼
//! pump ── calibration (ArcSwap) ── HealthWatchdog
//!   │
//!   ▼
//! broadcast<PipelineEvent> ──▶ daemon logger / JSON output / any subscriber
//! ```
//!
//! Each system has its own worker, pump and watchdog; a failure in one never
//! touches the other.

mod events;
pub mod manager;
pub mod watchdog;

pub use events::PipelineEvent;
pub use manager::{AcquisitionManager, ManagerSettings};
pub use watchdog::HealthWatchdog;
