//! Data-source simulator
//!
//! Stands in for the field hardware: one TCP listener per system, each
//! serving any number of clients with synthetic records over the same line
//! protocol, under an operator-selectable profile.

pub mod generator;
pub mod profile;
pub mod server;

pub use generator::{is_spike_tick, SampleGenerator};
pub use profile::{SimulationProfile, SimulationState};
pub use server::{RunningSimulator, SimulatorError, SimulatorServer};
