//! Telemetry record types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded telemetry sample from a lysimeter/isotope station.
///
/// A record is only ever constructed fully populated. The protocol decoder
/// either yields a complete record or a `DecodeError`, never a partial one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Capture time, stamped by the receiver (not transmitted on the wire)
    pub timestamp: DateTime<Utc>,

    // === Soil / Climate ===
    /// Air temperature (°C)
    pub temperature: f64,
    /// Relative humidity (%)
    pub humidity: f64,
    /// Soil moisture (%)
    pub moisture: f64,
    /// Soil pH
    pub ph: f64,
    /// Electrical conductivity (µS/cm)
    pub ec: f64,

    // === Nutrients (mg/kg) ===
    pub nitrogen: f64,
    pub phosphorus: f64,
    pub potassium: f64,

    // === Radiation ===
    /// Isotope label of the reference source (e.g. "Co-60")
    pub source_name: String,
    /// Photopeak energy (keV)
    pub energy: f64,
    /// Count rate (counts per second)
    pub cps: i64,
    /// Source activity (µCi)
    pub activity: f64,
}

impl TelemetryRecord {
    /// Read a numeric field as `f64` (`cps` is widened).
    pub fn value(&self, field: NumericField) -> f64 {
        match field {
            NumericField::Temperature => self.temperature,
            NumericField::Humidity => self.humidity,
            NumericField::Moisture => self.moisture,
            NumericField::Ph => self.ph,
            NumericField::Ec => self.ec,
            NumericField::Nitrogen => self.nitrogen,
            NumericField::Phosphorus => self.phosphorus,
            NumericField::Potassium => self.potassium,
            NumericField::Energy => self.energy,
            #[allow(clippy::cast_precision_loss)]
            NumericField::Cps => self.cps as f64,
            NumericField::Activity => self.activity,
        }
    }

    /// Overwrite a numeric field. `cps` is floored back to an integer.
    pub fn set_value(&mut self, field: NumericField, value: f64) {
        match field {
            NumericField::Temperature => self.temperature = value,
            NumericField::Humidity => self.humidity = value,
            NumericField::Moisture => self.moisture = value,
            NumericField::Ph => self.ph = value,
            NumericField::Ec => self.ec = value,
            NumericField::Nitrogen => self.nitrogen = value,
            NumericField::Phosphorus => self.phosphorus = value,
            NumericField::Potassium => self.potassium = value,
            NumericField::Energy => self.energy = value,
            #[allow(clippy::cast_possible_truncation)]
            NumericField::Cps => self.cps = value.floor() as i64,
            NumericField::Activity => self.activity = value,
        }
    }

    /// True when every floating-point field is finite.
    pub fn is_finite(&self) -> bool {
        NumericField::ALL
            .iter()
            .all(|&f| self.value(f).is_finite())
    }
}

/// The eleven numeric (calibratable) telemetry fields.
///
/// `source_name` and `timestamp` are absent: they are never
/// calibrated. The snake_case names double as configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericField {
    Temperature,
    Humidity,
    Moisture,
    Ph,
    Ec,
    Nitrogen,
    Phosphorus,
    Potassium,
    Energy,
    Cps,
    Activity,
}

impl NumericField {
    pub const ALL: [Self; 11] = [
        Self::Temperature,
        Self::Humidity,
        Self::Moisture,
        Self::Ph,
        Self::Ec,
        Self::Nitrogen,
        Self::Phosphorus,
        Self::Potassium,
        Self::Energy,
        Self::Cps,
        Self::Activity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Moisture => "moisture",
            Self::Ph => "ph",
            Self::Ec => "ec",
            Self::Nitrogen => "nitrogen",
            Self::Phosphorus => "phosphorus",
            Self::Potassium => "potassium",
            Self::Energy => "energy",
            Self::Cps => "cps",
            Self::Activity => "activity",
        }
    }
}

impl std::fmt::Display for NumericField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NumericField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown telemetry field '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TelemetryRecord {
        TelemetryRecord {
            timestamp: Utc::now(),
            temperature: 25.4,
            humidity: 51.2,
            moisture: 48.9,
            ph: 7.05,
            ec: 742.0,
            nitrogen: 150.0,
            phosphorus: 75.0,
            potassium: 99.0,
            source_name: "Co-60".to_string(),
            energy: 1250.5,
            cps: 262,
            activity: 1.8,
        }
    }

    #[test]
    fn test_field_names_round_trip() {
        for field in NumericField::ALL {
            assert_eq!(field.as_str().parse::<NumericField>().unwrap(), field);
        }
        assert!("source_name".parse::<NumericField>().is_err());
    }

    #[test]
    fn test_cps_set_value_floors() {
        let mut record = sample();
        record.set_value(NumericField::Cps, 301.9);
        assert_eq!(record.cps, 301);
        assert_eq!(record.value(NumericField::Cps), 301.0);
    }

    #[test]
    fn test_value_reads_every_field() {
        let record = sample();
        assert_eq!(record.value(NumericField::Ec), 742.0);
        assert_eq!(record.value(NumericField::Energy), 1250.5);
        assert!(record.is_finite());
    }
}
