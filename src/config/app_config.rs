//! Application configuration - acquisition, watchdog, simulator, calibration
//!
//! Each section implements `Default` with the values in `defaults.rs`, so a
//! missing file or a partial file behaves exactly like the stock install.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, warn};

use super::defaults;
use crate::processing::{CalibrationParameter, CalibrationSet};
use crate::acquisition::protocol::is_valid_source_name;
use crate::types::{NumericField, SystemId};

/// Environment variable naming an explicit config file.
pub const CONFIG_ENV_VAR: &str = "LISIDA_CONFIG";

/// Config file looked up in the working directory.
pub const LOCAL_CONFIG_FILE: &str = "lisida.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one acquisition station.
///
/// Load with `AppConfig::load()` which searches:
/// 1. `$LISIDA_CONFIG` env var
/// 2. `./lisida.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Connection targets and worker timing
    #[serde(default)]
    pub acquisition: AcquisitionConfig,

    /// Signal-lost detection
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Built-in data-source simulator
    #[serde(default)]
    pub simulator: SimulatorConfig,

    /// Per-channel linear calibration, keyed by channel name
    #[serde(default, deserialize_with = "lenient_calibration_table")]
    pub calibration: BTreeMap<String, CalibrationParameter>,

    /// Alarm thresholds for display consumers
    #[serde(default)]
    pub thresholds: ThresholdConfig,
}

impl AppConfig {
    /// Load configuration using the standard search order:
    /// 1. `$LISIDA_CONFIG` environment variable
    /// 2. `./lisida.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded config from {}", CONFIG_ENV_VAR);
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from {}, falling back", CONFIG_ENV_VAR);
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded config from ./{}", LOCAL_CONFIG_FILE);
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;

        // Two-pass: unknown keys are warnings only
        for w in super::validation::validate_unknown_keys(&contents) {
            warn!("{}", w);
        }

        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        for w in super::validation::validate_timing(&config) {
            warn!("{}", w);
        }
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = self.to_toml()?;
        std::fs::write(path, contents).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        info!(path = %path.display(), "Config saved");
        Ok(())
    }

    /// Typed calibration table. Unknown channels are dropped with a warning.
    pub fn calibration_set(&self) -> CalibrationSet {
        CalibrationSet::from_named(
            self.calibration
                .iter()
                .map(|(name, param)| (name.as_str(), param)),
        )
    }

    /// Validate all sections for internal consistency.
    ///
    /// Calibration entries never fail validation: unknown channels and
    /// unusable coefficients are reported as warnings and later degrade
    /// to identity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors: Vec<String> = Vec::new();
        let a = &self.acquisition;

        if a.read_wait_ms == 0 {
            errors.push("acquisition.read_wait_ms must be > 0".to_string());
        }
        if a.connect_timeout_ms == 0 {
            errors.push("acquisition.connect_timeout_ms must be > 0".to_string());
        }
        if a.default_baud_rate == 0 {
            errors.push("acquisition.default_baud_rate must be > 0".to_string());
        }
        if self.watchdog.signal_lost_secs == 0 {
            errors.push("watchdog.signal_lost_secs must be > 0".to_string());
        }

        let s = &self.simulator;
        if s.host.parse::<IpAddr>().is_err() {
            errors.push(format!("simulator.host: '{}' is not an IP address", s.host));
        }
        if s.system_1_port != 0 && s.system_1_port == s.system_2_port {
            errors.push(format!(
                "simulator: system_1_port and system_2_port must differ (both {})",
                s.system_1_port
            ));
        }
        if s.sample_interval_ms == 0 {
            errors.push("simulator.sample_interval_ms must be > 0".to_string());
        }
        if s.stop_poll_ms == 0 {
            errors.push("simulator.stop_poll_ms must be > 0".to_string());
        }
        if !is_valid_source_name(&s.source_label) {
            errors.push(format!(
                "simulator.source_label: {:?} must be non-empty with no surrounding whitespace, commas or newlines",
                s.source_label
            ));
        }

        let t = &self.thresholds;
        Self::check_escalation(t.temp_warn, t.temp_danger, "thresholds.temp", &mut errors);
        Self::check_escalation(t.cps_warn, t.cps_danger, "thresholds.cps", &mut errors);
        // Moisture alarms on the way down
        Self::check_escalation(
            -t.moisture_warn,
            -t.moisture_danger,
            "thresholds.moisture (danger must be <= warning)",
            &mut errors,
        );

        for (name, param) in &self.calibration {
            if name.parse::<NumericField>().is_err() {
                warn!(channel = %name, "calibration: unknown channel, entry ignored");
            } else if !param.is_valid() {
                warn!(channel = %name, "calibration: non-numeric or non-finite m/c, channel left uncalibrated");
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    fn check_escalation(warning: f64, danger: f64, name: &str, errors: &mut Vec<String>) {
        // NaN comparisons silently pass
        if !warning.is_finite() || !danger.is_finite() {
            errors.push(format!(
                "{name}: values must be finite (got warning={warning}, danger={danger})"
            ));
            return;
        }
        if danger < warning {
            errors.push(format!(
                "{name}: danger ({danger:.1}) must be beyond warning ({warning:.1})"
            ));
        }
    }
}

/// Parse each calibration entry on its own so one malformed channel cannot
/// reject the whole file.
fn lenient_calibration_table<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, CalibrationParameter>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, toml::Value>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(name, value)| match CalibrationParameter::deserialize(value) {
            Ok(param) => Some((name, param)),
            Err(e) => {
                warn!(channel = %name, error = %e, "calibration: malformed entry ignored");
                None
            }
        })
        .collect())
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(PathBuf, std::io::Error),
    Parse(PathBuf, toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<String>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(path, e) => write!(f, "Config I/O error ({}): {}", path.display(), e),
            ConfigError::Parse(path, e) => {
                write!(f, "Config parse error ({}): {}", path.display(), e)
            }
            ConfigError::Serialize(e) => write!(f, "Config serialization error: {e}"),
            ConfigError::Validation(errors) => {
                writeln!(f, "Config validation failed:")?;
                for e in errors {
                    writeln!(f, "  - {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Acquisition
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Bounded wait per read in the worker loop (ms)
    #[serde(default = "default_read_wait_ms")]
    pub read_wait_ms: u64,

    /// Transport open timeout (ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Upper bound on the final STOP write (ms)
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Baud rate for bare serial paths
    #[serde(default = "default_baud_rate")]
    pub default_baud_rate: u32,

    /// Target started for System_1 at boot ("SIMULATOR_1", "tcp://host:port" or a device path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_1: Option<String>,

    /// Target started for System_2 at boot
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_2: Option<String>,
}

fn default_read_wait_ms() -> u64 { defaults::READ_WAIT_MS }
fn default_connect_timeout_ms() -> u64 { defaults::CONNECT_TIMEOUT_MS }
fn default_handshake_timeout_ms() -> u64 { defaults::HANDSHAKE_TIMEOUT_MS }
fn default_baud_rate() -> u32 { defaults::DEFAULT_BAUD_RATE }

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            read_wait_ms: default_read_wait_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            default_baud_rate: default_baud_rate(),
            system_1: None,
            system_2: None,
        }
    }
}

impl AcquisitionConfig {
    pub fn target_for(&self, system: SystemId) -> Option<&str> {
        match system {
            SystemId::System1 => self.system_1.as_deref(),
            SystemId::System2 => self.system_2.as_deref(),
        }
    }

    pub fn set_target(&mut self, system: SystemId, target: impl Into<String>) {
        let target = Some(target.into());
        match system {
            SystemId::System1 => self.system_1 = target,
            SystemId::System2 => self.system_2 = target,
        }
    }

    pub fn read_wait(&self) -> Duration {
        Duration::from_millis(self.read_wait_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

// ============================================================================
// Watchdog
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Silence before a connected system is flagged `Warning` (s)
    #[serde(default = "default_signal_lost_secs")]
    pub signal_lost_secs: u64,
}

fn default_signal_lost_secs() -> u64 { defaults::SIGNAL_LOST_SECS }

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            signal_lost_secs: default_signal_lost_secs(),
        }
    }
}

impl WatchdogConfig {
    pub fn signal_lost(&self) -> Duration {
        Duration::from_secs(self.signal_lost_secs)
    }
}

// ============================================================================
// Simulator
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Listen host; must be an IP literal
    #[serde(default = "default_simulator_host")]
    pub host: String,

    #[serde(default = "default_port_1")]
    pub system_1_port: u16,

    #[serde(default = "default_port_2")]
    pub system_2_port: u16,

    /// Interval between samples per client (ms)
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Wait for an inbound STOP after each sample (ms)
    #[serde(default = "default_stop_poll_ms")]
    pub stop_poll_ms: u64,

    /// Isotope label carried in `source_name`
    #[serde(default = "default_source_label")]
    pub source_label: String,
}

fn default_simulator_host() -> String { defaults::SIMULATOR_HOST.to_string() }
fn default_port_1() -> u16 { defaults::SIMULATOR_PORT_SYSTEM_1 }
fn default_port_2() -> u16 { defaults::SIMULATOR_PORT_SYSTEM_2 }
fn default_sample_interval_ms() -> u64 { defaults::SAMPLE_INTERVAL_MS }
fn default_stop_poll_ms() -> u64 { defaults::STOP_POLL_MS }
fn default_source_label() -> String { defaults::SOURCE_LABEL.to_string() }

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            host: default_simulator_host(),
            system_1_port: default_port_1(),
            system_2_port: default_port_2(),
            sample_interval_ms: default_sample_interval_ms(),
            stop_poll_ms: default_stop_poll_ms(),
            source_label: default_source_label(),
        }
    }
}

impl SimulatorConfig {
    pub fn port_for(&self, system: SystemId) -> u16 {
        match system {
            SystemId::System1 => self.system_1_port,
            SystemId::System2 => self.system_2_port,
        }
    }

    pub fn set_port(&mut self, system: SystemId, port: u16) {
        match system {
            SystemId::System1 => self.system_1_port = port,
            SystemId::System2 => self.system_2_port = port,
        }
    }

    /// Socket address of the listener for `system`.
    pub fn address_for(&self, system: SystemId) -> Result<SocketAddr, std::net::AddrParseError> {
        let ip: IpAddr = self.host.parse()?;
        Ok(SocketAddr::new(ip, self.port_for(system)))
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn stop_poll(&self) -> Duration {
        Duration::from_millis(self.stop_poll_ms)
    }
}

// ============================================================================
// Thresholds
// ============================================================================

/// Alarm thresholds handed through to display consumers.
///
/// Temperature and count rate alarm above their limits; soil moisture
/// alarms below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_temp_warn")]
    pub temp_warn: f64,
    #[serde(default = "default_temp_danger")]
    pub temp_danger: f64,
    #[serde(default = "default_moisture_warn")]
    pub moisture_warn: f64,
    #[serde(default = "default_moisture_danger")]
    pub moisture_danger: f64,
    #[serde(default = "default_cps_warn")]
    pub cps_warn: f64,
    #[serde(default = "default_cps_danger")]
    pub cps_danger: f64,
}

fn default_temp_warn() -> f64 { defaults::TEMP_WARN_C }
fn default_temp_danger() -> f64 { defaults::TEMP_DANGER_C }
fn default_moisture_warn() -> f64 { defaults::MOISTURE_WARN_PCT }
fn default_moisture_danger() -> f64 { defaults::MOISTURE_DANGER_PCT }
fn default_cps_warn() -> f64 { defaults::CPS_WARN }
fn default_cps_danger() -> f64 { defaults::CPS_DANGER }

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            temp_warn: default_temp_warn(),
            temp_danger: default_temp_danger(),
            moisture_warn: default_moisture_warn(),
            moisture_danger: default_moisture_danger(),
            cps_warn: default_cps_warn(),
            cps_danger: default_cps_danger(),
        }
    }
}

/// Alarm level of a single reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Normal,
    Warning,
    Danger,
}

impl ThresholdConfig {
    /// Classify a reading. Channels without thresholds are always `Normal`.
    pub fn severity(&self, field: NumericField, value: f64) -> Severity {
        match field {
            NumericField::Temperature => {
                if value > self.temp_danger {
                    Severity::Danger
                } else if value > self.temp_warn {
                    Severity::Warning
                } else {
                    Severity::Normal
                }
            }
            NumericField::Moisture => {
                if value < self.moisture_danger {
                    Severity::Danger
                } else if value < self.moisture_warn {
                    Severity::Warning
                } else {
                    Severity::Normal
                }
            }
            NumericField::Cps => {
                if value > self.cps_danger {
                    Severity::Danger
                } else if value > self.cps_warn {
                    Severity::Warning
                } else {
                    Severity::Normal
                }
            }
            _ => Severity::Normal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.acquisition.default_baud_rate, 9600);
        assert_eq!(config.simulator.system_1_port, 65431);
        assert_eq!(config.simulator.system_2_port, 65432);
        assert_eq!(config.watchdog.signal_lost(), Duration::from_secs(10));
    }

    #[test]
    fn test_partial_file_keeps_section_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [acquisition]
            system_1 = "SIMULATOR_1"

            [simulator]
            sample_interval_ms = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.acquisition.target_for(SystemId::System1), Some("SIMULATOR_1"));
        assert_eq!(config.acquisition.target_for(SystemId::System2), None);
        assert_eq!(config.acquisition.read_wait_ms, defaults::READ_WAIT_MS);
        assert_eq!(config.simulator.sample_interval(), Duration::from_millis(500));
        assert_eq!(config.simulator.source_label, "Co-60");
    }

    #[test]
    fn test_simulator_address() {
        let sim = SimulatorConfig::default();
        assert_eq!(
            sim.address_for(SystemId::System2).unwrap(),
            "127.0.0.1:65432".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = AppConfig::default();
        config.acquisition.read_wait_ms = 0;
        config.thresholds.temp_danger = 20.0;
        config.thresholds.moisture_danger = 45.0;
        config.simulator.source_label = "Co,60".to_string();
        config.simulator.system_2_port = config.simulator.system_1_port;

        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 5, "{errors:?}"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_non_finite_threshold_rejected() {
        let mut config = AppConfig::default();
        config.thresholds.cps_warn = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_calibration_is_not_fatal() {
        let config: AppConfig = toml::from_str(
            r#"
            [calibration.temperature]
            m = nan

            [calibration.unobtainium]
            m = 2.0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());

        let set = config.calibration_set();
        assert_eq!(set.len(), 1);
        assert!(set.get(NumericField::Temperature).unwrap().is_identity());
    }

    #[test]
    fn test_malformed_calibration_entry_is_skipped() {
        let config: AppConfig = toml::from_str(
            r#"
            [calibration]
            humidity = 3

            [calibration.ph]
            m = 1.5
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert!(!config.calibration.contains_key("humidity"));
        assert_eq!(config.calibration["ph"].m, 1.5);
    }

    #[test]
    fn test_source_label_must_survive_the_wire() {
        let mut config = AppConfig::default();
        config.simulator.source_label = " Co-60".to_string();
        assert!(config.validate().is_err());
        config.simulator.source_label = "Cs 137".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_severity() {
        let t = ThresholdConfig::default();
        assert_eq!(t.severity(NumericField::Temperature, 27.0), Severity::Normal);
        assert_eq!(t.severity(NumericField::Temperature, 29.0), Severity::Warning);
        assert_eq!(t.severity(NumericField::Temperature, 33.0), Severity::Danger);
        assert_eq!(t.severity(NumericField::Moisture, 35.0), Severity::Warning);
        assert_eq!(t.severity(NumericField::Moisture, 25.0), Severity::Danger);
        assert_eq!(t.severity(NumericField::Cps, 550.0), Severity::Danger);
        assert_eq!(t.severity(NumericField::Ph, 14.0), Severity::Normal);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = AppConfig::default();
        config.acquisition.set_target(SystemId::System2, "/dev/ttyUSB0");
        config
            .calibration
            .insert("ph".to_string(), CalibrationParameter::new(1.1, -0.2));

        let text = config.to_toml().unwrap();
        let back: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(back, config);
    }
}
