//! Simulation profiles and the shared sample counter

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Scenario applied on top of the baseline signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationProfile {
    #[default]
    Normal,
    /// Count-rate and temperature spike every 30 samples
    Spike,
    /// Temperature sensor creeping upwards
    Drift,
    /// Fast oscillation on soil moisture
    Periodic,
}

impl SimulationProfile {
    pub const ALL: [Self; 4] = [Self::Normal, Self::Spike, Self::Drift, Self::Periodic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Spike => "spike",
            Self::Drift => "drift",
            Self::Periodic => "periodic",
        }
    }

    /// Key used in the interactive menu.
    pub fn menu_key(&self) -> char {
        match self {
            Self::Normal => '1',
            Self::Spike => '2',
            Self::Drift => '3',
            Self::Periodic => '4',
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Normal => "Normal operation",
            Self::Spike => "Sudden spike",
            Self::Drift => "Sensor drift",
            Self::Periodic => "Periodic disturbance",
        }
    }

    /// Whether selecting this profile restarts the sample counter.
    fn resets_counter(self) -> bool {
        !matches!(self, Self::Normal)
    }
}

impl std::fmt::Display for SimulationProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SimulationProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s || (s.len() == 1 && s.starts_with(p.menu_key())))
            .ok_or_else(|| format!("unknown profile '{s}' (expected normal, spike, drift or periodic)"))
    }
}

#[derive(Debug)]
struct Inner {
    profile: SimulationProfile,
    counter: u64,
}

/// Active profile plus the sample counter, shared by every client of every
/// listener.
#[derive(Debug)]
pub struct SimulationState {
    inner: Mutex<Inner>,
}

impl Default for SimulationState {
    fn default() -> Self {
        Self::new(SimulationProfile::Normal)
    }
}

impl SimulationState {
    pub fn new(profile: SimulationProfile) -> Self {
        Self {
            inner: Mutex::new(Inner { profile, counter: 0 }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn profile(&self) -> SimulationProfile {
        self.lock().profile
    }

    pub fn counter(&self) -> u64 {
        self.lock().counter
    }

    /// Switch profile. Spike, Drift and Periodic restart the counter at 0.
    pub fn set_profile(&self, profile: SimulationProfile) {
        let mut inner = self.lock();
        inner.profile = profile;
        if profile.resets_counter() {
            inner.counter = 0;
        }
    }

    /// Profile and counter for the next sample; the counter is post-incremented.
    pub fn next_tick(&self) -> (SimulationProfile, u64) {
        let mut inner = self.lock();
        let tick = (inner.profile, inner.counter);
        inner.counter += 1;
        tick
    }
}
