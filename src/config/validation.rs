//! Config validation: unknown-key detection with Levenshtein suggestions
//! and timing sanity checks.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use crate::types::NumericField;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, " (did you mean '{s}'?)")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Fixed keys of `AppConfig`. Must track the structs in app_config.rs.
const STATIC_KEYS: &[&str] = &[
    // [acquisition]
    "acquisition",
    "acquisition.read_wait_ms",
    "acquisition.connect_timeout_ms",
    "acquisition.handshake_timeout_ms",
    "acquisition.default_baud_rate",
    "acquisition.system_1",
    "acquisition.system_2",
    // [watchdog]
    "watchdog",
    "watchdog.signal_lost_secs",
    // [simulator]
    "simulator",
    "simulator.host",
    "simulator.system_1_port",
    "simulator.system_2_port",
    "simulator.sample_interval_ms",
    "simulator.stop_poll_ms",
    "simulator.source_label",
    // [thresholds]
    "thresholds",
    "thresholds.temp_warn",
    "thresholds.temp_danger",
    "thresholds.moisture_warn",
    "thresholds.moisture_danger",
    "thresholds.cps_warn",
    "thresholds.cps_danger",
    // [calibration]
    "calibration",
];

/// Returns the complete set of valid dotted key paths for `AppConfig`.
///
/// The `[calibration.<channel>]` tables are generated from `NumericField`.
pub fn known_config_keys() -> HashSet<String> {
    let mut keys: HashSet<String> = STATIC_KEYS.iter().map(|k| (*k).to_string()).collect();
    for field in NumericField::ALL {
        let base = format!("calibration.{field}");
        for leaf in ["m", "c", "last_calibrated"] {
            keys.insert(format!("{base}.{leaf}"));
        }
        keys.insert(base);
    }
    keys
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            if v.is_table() {
                keys.extend(walk_toml_keys(v, &path));
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
///
/// Ties resolve to the lexicographically smallest key so output is stable.
pub fn suggest_correction(unknown: &str, known: &HashSet<String>) -> Option<String> {
    known
        .iter()
        .map(|k| (levenshtein(unknown, k), k))
        .filter(|(dist, _)| *dist <= 3)
        .min()
        .map(|(_, k)| k.clone())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys; it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key))
        .map(|key| ValidationWarning {
            message: format!("Unknown config key '{key}'"),
            suggestion: suggest_correction(&key, &known),
            field: key,
        })
        .collect()
}

// ============================================================================
// Timing Sanity
// ============================================================================

/// Suspicious but legal timing combinations.
pub fn validate_timing(config: &super::AppConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();
    let signal_lost_ms = config.watchdog.signal_lost_secs.saturating_mul(1000);

    // A watchdog shorter than the sample cadence flaps between Connected and Warning
    if signal_lost_ms <= config.simulator.sample_interval_ms {
        warnings.push(ValidationWarning {
            field: "watchdog.signal_lost_secs".to_string(),
            message: format!(
                "watchdog.signal_lost_secs = {} is not longer than simulator.sample_interval_ms = {}",
                config.watchdog.signal_lost_secs, config.simulator.sample_interval_ms
            ),
            suggestion: None,
        });
    }

    if config.acquisition.read_wait_ms >= signal_lost_ms {
        warnings.push(ValidationWarning {
            field: "acquisition.read_wait_ms".to_string(),
            message: format!(
                "acquisition.read_wait_ms = {} delays stop requests beyond the watchdog interval",
                config.acquisition.read_wait_ms
            ),
            suggestion: None,
        });
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("hello", "hello"), 0);
        assert_eq!(levenshtein("moistrue", "moisture"), 2);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [calibration.ph]
            m = 1.0
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"calibration".to_string()));
        assert!(keys.contains(&"calibration.ph".to_string()));
        assert!(keys.contains(&"calibration.ph.m".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let warnings = validate_unknown_keys(
            r#"
[watchdog]
signal_lost_sec = 10
"#,
        );
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "watchdog.signal_lost_sec");
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("watchdog.signal_lost_secs")
        );
    }

    #[test]
    fn test_calibration_channel_typo() {
        let warnings = validate_unknown_keys(
            r#"
[calibration.potasium]
m = 1.1
"#,
        );
        let table = warnings
            .iter()
            .find(|w| w.field == "calibration.potasium")
            .unwrap();
        assert_eq!(table.suggestion.as_deref(), Some("calibration.potassium"));
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let warnings = validate_unknown_keys(
            r#"
[acquisition]
system_1 = "SIMULATOR_1"
system_2 = "/dev/ttyUSB0"

[simulator]
source_label = "Cs-137"

[calibration.cps]
m = 0.98
c = 2.0
last_calibrated = "2024-06-01"

[thresholds]
cps_danger = 600
"#,
        );
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_timing_warnings() {
        let mut config = super::super::AppConfig::default();
        assert!(validate_timing(&config).is_empty());

        config.watchdog.signal_lost_secs = 1;
        config.simulator.sample_interval_ms = 2_000;
        let warnings = validate_timing(&config);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "watchdog.signal_lost_secs");
    }
}
