//! Linear calibration of decoded telemetry
//!
//! Every numeric channel can carry a `value * m + c` correction. The
//! transform is total: bad coefficients degrade to identity and a result
//! that would leave the finite range keeps the raw reading.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::types::{NumericField, TelemetryRecord};

/// Gain/offset pair for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationParameter {
    #[serde(default = "default_gain", deserialize_with = "lenient_coefficient")]
    pub m: f64,

    #[serde(default, deserialize_with = "lenient_coefficient")]
    pub c: f64,

    /// Date of the last bench calibration, if known.
    #[serde(
        default,
        deserialize_with = "lenient_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_calibrated: Option<NaiveDate>,
}

fn default_gain() -> f64 {
    1.0
}

impl Default for CalibrationParameter {
    fn default() -> Self {
        Self {
            m: 1.0,
            c: 0.0,
            last_calibrated: None,
        }
    }
}

impl CalibrationParameter {
    pub fn new(m: f64, c: f64) -> Self {
        Self {
            m,
            c,
            last_calibrated: None,
        }
    }

    /// Coefficients usable as-is (both finite).
    pub fn is_valid(&self) -> bool {
        self.m.is_finite() && self.c.is_finite()
    }

    pub fn is_identity(&self) -> bool {
        !self.is_valid() || ((self.m - 1.0).abs() < f64::EPSILON && self.c == 0.0)
    }

    /// Apply `value * m + c`, falling back to `value` whenever the
    /// coefficients or the result are not finite.
    pub fn transform(&self, value: f64) -> f64 {
        if !self.is_valid() {
            return value;
        }
        let out = value * self.m + self.c;
        if out.is_finite() {
            out
        } else {
            value
        }
    }
}

/// Integers and floats are taken as numbers. Any other value becomes NaN,
/// which leaves the channel uncalibrated instead of rejecting the file.
#[allow(clippy::cast_precision_loss)]
fn lenient_coefficient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match toml::Value::deserialize(deserializer)? {
        toml::Value::Float(v) => v,
        toml::Value::Integer(v) => v as f64,
        _ => f64::NAN,
    })
}

/// Accepts ISO dates (string or TOML date); anything else, including the
/// legacy "N/A" placeholder, becomes `None`.
fn lenient_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<toml::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|value| match value {
        toml::Value::String(s) => parse_date(&s),
        toml::Value::Datetime(dt) => parse_date(&dt.to_string()),
        _ => None,
    }))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    let date = raw.trim().get(..10)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Per-channel calibration table. Channels without an entry pass through.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalibrationSet {
    params: BTreeMap<NumericField, CalibrationParameter>,
}

impl CalibrationSet {
    /// An empty set: every channel passes through unchanged.
    pub fn identity() -> Self {
        Self::default()
    }

    /// Build from a name-keyed table as found in the config file.
    ///
    /// Unknown channel names are skipped with a warning.
    pub fn from_named<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a CalibrationParameter)>,
    {
        let mut set = Self::identity();
        for (name, param) in entries {
            match name.parse::<NumericField>() {
                Ok(field) => {
                    if !param.is_valid() {
                        warn!(
                            field = %field,
                            m = param.m,
                            c = param.c,
                            "[Calibration] Non-numeric or non-finite coefficients, channel left uncalibrated"
                        );
                    }
                    set.set(field, *param);
                }
                Err(_) => {
                    warn!(name = %name, "[Calibration] Ignoring entry for unknown channel");
                }
            }
        }
        set
    }

    pub fn set(&mut self, field: NumericField, param: CalibrationParameter) {
        self.params.insert(field, param);
    }

    pub fn get(&self, field: NumericField) -> Option<&CalibrationParameter> {
        self.params.get(&field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NumericField, &CalibrationParameter)> {
        self.params.iter().map(|(field, param)| (*field, param))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Return a calibrated copy of `record`.
    pub fn apply(&self, record: &TelemetryRecord) -> TelemetryRecord {
        let mut out = record.clone();
        for (field, param) in &self.params {
            if param.is_identity() {
                continue;
            }
            out.set_value(*field, param.transform(record.value(*field)));
        }
        out
    }
}

/// Free-function form of [`CalibrationSet::apply`].
pub fn apply(record: &TelemetryRecord, calibration: &CalibrationSet) -> TelemetryRecord {
    calibration.apply(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record() -> TelemetryRecord {
        TelemetryRecord {
            timestamp: Utc::now(),
            temperature: 25.0,
            humidity: 50.0,
            moisture: 55.0,
            ph: 7.0,
            ec: 750.0,
            nitrogen: 150.0,
            phosphorus: 75.0,
            potassium: 100.0,
            source_name: "Co-60".to_string(),
            energy: 1250.0,
            cps: 260,
            activity: 1.75,
        }
    }

    #[test]
    fn test_identity_set_is_noop() {
        let raw = record();
        assert_eq!(apply(&raw, &CalibrationSet::identity()), raw);

        let mut explicit = CalibrationSet::identity();
        for field in NumericField::ALL {
            explicit.set(field, CalibrationParameter::default());
        }
        assert_eq!(explicit.apply(&raw), raw);
    }

    #[test]
    fn test_linear_transform_per_channel() {
        let raw = record();
        let mut set = CalibrationSet::identity();
        set.set(NumericField::Temperature, CalibrationParameter::new(2.0, 1.0));
        set.set(NumericField::Ph, CalibrationParameter::new(1.0, -0.5));

        let out = set.apply(&raw);
        assert!((out.temperature - 51.0).abs() < 1e-9);
        assert!((out.ph - 6.5).abs() < 1e-9);
        assert_eq!(out.humidity, raw.humidity);
        assert_eq!(out.source_name, raw.source_name);
        assert_eq!(out.timestamp, raw.timestamp);
    }

    #[test]
    fn test_cps_is_floored_after_transform() {
        let mut set = CalibrationSet::identity();
        set.set(NumericField::Cps, CalibrationParameter::new(1.01, 0.0));
        // 260 * 1.01 = 262.6
        assert_eq!(set.apply(&record()).cps, 262);
    }

    #[test]
    fn test_non_finite_coefficients_degrade_to_identity() {
        let raw = record();
        let mut set = CalibrationSet::identity();
        set.set(NumericField::Temperature, CalibrationParameter::new(f64::NAN, 0.0));
        set.set(NumericField::Humidity, CalibrationParameter::new(1.0, f64::INFINITY));
        set.set(NumericField::Energy, CalibrationParameter::new(f64::MAX, 0.0));

        let out = set.apply(&raw);
        assert_eq!(out.temperature, raw.temperature);
        assert_eq!(out.humidity, raw.humidity);
        // Overflow keeps the raw value
        assert_eq!(out.energy, raw.energy);
        assert!(out.is_finite());
    }

    #[test]
    fn test_from_named_skips_unknown_channels() {
        let gain = CalibrationParameter::new(1.5, 0.0);
        let entries = vec![("moisture", &gain), ("soil_colour", &gain)];
        let set = CalibrationSet::from_named(entries);
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(NumericField::Moisture), Some(&gain));
    }

    #[test]
    fn test_lenient_last_calibrated() {
        let parsed: BTreeMap<String, CalibrationParameter> = toml::from_str(
            r#"
            [temperature]
            m = 1.02
            c = -0.3
            last_calibrated = "2024-03-18"

            [humidity]
            last_calibrated = "N/A"

            [ph]
            last_calibrated = 2023-11-02
            "#,
        )
        .unwrap();

        assert_eq!(
            parsed["temperature"].last_calibrated,
            NaiveDate::from_ymd_opt(2024, 3, 18)
        );
        assert_eq!(parsed["humidity"].last_calibrated, None);
        assert_eq!(parsed["humidity"].m, 1.0);
        assert_eq!(
            parsed["ph"].last_calibrated,
            NaiveDate::from_ymd_opt(2023, 11, 2)
        );
    }

    #[test]
    fn test_non_numeric_coefficients_degrade_to_identity() {
        let parsed: BTreeMap<String, CalibrationParameter> = toml::from_str(
            r#"
            [temperature]
            m = "abc"

            [ph]
            m = 2
            c = [1, 2]

            [ec]
            c = 3
            "#,
        )
        .unwrap();

        assert!(parsed["temperature"].m.is_nan());
        assert!(parsed["temperature"].is_identity());
        assert!(!parsed["ph"].is_valid());
        assert_eq!(parsed["ec"], CalibrationParameter::new(1.0, 3.0));

        let set = CalibrationSet::from_named(parsed.iter().map(|(k, v)| (k.as_str(), v)));
        let raw = record();
        let out = set.apply(&raw);
        assert_eq!(out.temperature, raw.temperature);
        assert_eq!(out.ph, raw.ph);
        assert!((out.ec - 753.0).abs() < 1e-9);
    }
}
