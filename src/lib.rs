//! LISIDA: Lysimeter and Isotope Data Acquisition
//!
//! Acquisition core for two field instruments streaming a fixed 12-field
//! line protocol over serial or TCP.
//!
//! ## Architecture
//!
//! - **Protocol**: line codec and byte-to-line assembly (`acquisition::protocol`)
//! - **Connection Worker**: one task per system owning one transport (`acquisition::worker`)
//! - **Calibration**: per-channel `value * m + c` (`processing::calibration`)
//! - **Health Watchdog**: signal-lost detection from record cadence (`pipeline::watchdog`)
//! - **Acquisition Manager**: single ownership per system, event fan-out (`pipeline::manager`)
//! - **Simulator**: multi-client synthetic source with scenario profiles (`simulation`)

pub mod acquisition;
pub mod config;
pub mod pipeline;
pub mod processing;
pub mod simulation;
pub mod types;

// Re-export configuration
pub use config::AppConfig;

// Re-export commonly used types
pub use types::{HealthState, NumericField, SystemId, TelemetryRecord};

// Re-export acquisition
pub use acquisition::{ConnectionTarget, Endpoint, WorkerHandle, WorkerState};

// Re-export pipeline
pub use pipeline::{AcquisitionManager, ManagerSettings, PipelineEvent};

// Re-export calibration
pub use processing::{CalibrationParameter, CalibrationSet};
