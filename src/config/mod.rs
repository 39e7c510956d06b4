//! Station Configuration Module
//!
//! Typed TOML configuration for the acquisition daemon and the simulator.
//!
//! ## Loading Order
//!
//! 1. `LISIDA_CONFIG` environment variable (path to TOML file)
//! 2. `lisida.toml` in the current working directory
//! 3. Built-in defaults (see `defaults.rs`)
//!
//! Unlike a process-wide global, the loaded `AppConfig` is passed explicitly
//! to whoever needs it; calibration changes reach the pipeline through
//! `AcquisitionManager::set_calibration`.

mod app_config;
pub mod defaults;
pub mod validation;
pub mod watcher;

pub use app_config::*;
pub use validation::ValidationWarning;
pub use watcher::{run_config_watcher, ConfigEvent};
