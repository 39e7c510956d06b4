//! System-wide default constants.
//!
//! Centralises the timing and addressing numbers shared by the acquisition
//! daemon and the simulator. Grouped by subsystem for easy discovery.

// ============================================================================
// Acquisition
// ============================================================================

/// Bounded wait for one read in a connection worker (ms).
///
/// A stop request is observed within one of these intervals even when the
/// source is silent.
pub const READ_WAIT_MS: u64 = 250;

/// Timeout for opening a socket or serial device (ms).
pub const CONNECT_TIMEOUT_MS: u64 = 5_000;

/// Upper bound on sending the final `STOP` line during shutdown (ms).
pub const HANDSHAKE_TIMEOUT_MS: u64 = 1_000;

/// Baud rate used when a serial target does not specify one.
pub const DEFAULT_BAUD_RATE: u32 = 9_600;

/// Capacity of the manager's broadcast channel (events per subscriber).
pub const EVENT_CHANNEL_CAPACITY: usize = 1_024;

// ============================================================================
// Health Watchdog
// ============================================================================

/// Silence after the last record before a system is flagged `Warning` (s).
pub const SIGNAL_LOST_SECS: u64 = 10;

// ============================================================================
// Simulator
// ============================================================================

/// Loopback host the simulator listens on.
pub const SIMULATOR_HOST: &str = "127.0.0.1";

/// Listener port for System_1.
pub const SIMULATOR_PORT_SYSTEM_1: u16 = 65_431;

/// Listener port for System_2.
pub const SIMULATOR_PORT_SYSTEM_2: u16 = 65_432;

/// Interval between generated samples per client (ms).
pub const SAMPLE_INTERVAL_MS: u64 = 2_000;

/// Bounded wait for an inbound `STOP` after each sample (ms).
pub const STOP_POLL_MS: u64 = 100;

/// Isotope label carried in `source_name`.
pub const SOURCE_LABEL: &str = "Co-60";

/// Counter cadence of injected spikes in the `Spike` profile.
pub const SPIKE_PERIOD: u64 = 30;

// ============================================================================
// Alarm Thresholds (pass-through for consumers)
// ============================================================================

pub const TEMP_WARN_C: f64 = 28.0;
pub const TEMP_DANGER_C: f64 = 32.0;
pub const MOISTURE_WARN_PCT: f64 = 40.0;
pub const MOISTURE_DANGER_PCT: f64 = 30.0;
pub const CPS_WARN: f64 = 400.0;
pub const CPS_DANGER: f64 = 500.0;
