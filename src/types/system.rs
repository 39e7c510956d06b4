//! Logical system identity and health state

use serde::{Deserialize, Serialize};

/// One of the two monitored field instruments.
///
/// Each identity owns at most one live connection worker at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SystemId {
    #[serde(rename = "System_1")]
    System1,
    #[serde(rename = "System_2")]
    System2,
}

impl SystemId {
    pub const ALL: [Self; 2] = [Self::System1, Self::System2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System1 => "System_1",
            Self::System2 => "System_2",
        }
    }

    /// 1-based index used by simulator target names (`SIMULATOR_1`).
    pub fn index(&self) -> u8 {
        match self {
            Self::System1 => 1,
            Self::System2 => 2,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        match index {
            1 => Some(Self::System1),
            2 => Some(Self::System2),
            _ => None,
        }
    }
}

impl std::fmt::Display for SystemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SystemId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system_1" | "system1" | "1" => Ok(Self::System1),
            "system_2" | "system2" | "2" => Ok(Self::System2),
            other => Err(format!("unknown system '{other}' (expected System_1 or System_2)")),
        }
    }
}

/// Liveness of a system, inferred purely from record cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum HealthState {
    #[default]
    Disconnected,
    Connected,
    /// No record within the signal-lost interval
    Warning,
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connected => write!(f, "Connected"),
            Self::Warning => write!(f, "Warning (signal lost)"),
        }
    }
}
