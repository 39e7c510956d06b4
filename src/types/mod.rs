//! Shared data structures for the telemetry acquisition pipeline
//!
//! - `TelemetryRecord` / `NumericField`: one decoded sample and its calibratable channels
//! - `SystemId`: logical instrument identity (System_1, System_2)
//! - `HealthState`: watchdog liveness state

mod telemetry;
mod system;

pub use telemetry::*;
pub use system::*;
