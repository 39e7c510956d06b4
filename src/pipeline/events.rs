//! Events published by the acquisition manager

use serde::Serialize;

use crate::types::{HealthState, SystemId, TelemetryRecord};

/// One observable fact about a system's pipeline.
///
/// Records from a single system arrive in wire order; there is no ordering
/// guarantee across systems.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    /// Calibrated record
    Record {
        system: SystemId,
        record: TelemetryRecord,
    },
    Status {
        system: SystemId,
        message: String,
    },
    /// Published on every health transition
    Health {
        system: SystemId,
        state: HealthState,
    },
}

impl PipelineEvent {
    pub fn system(&self) -> SystemId {
        match self {
            Self::Record { system, .. } | Self::Status { system, .. } | Self::Health { system, .. } => {
                *system
            }
        }
    }
}
