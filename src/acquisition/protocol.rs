//! Telemetry Line Protocol
//!
//! Every data source (serial hardware and the simulator) speaks the same
//! newline-terminated ASCII/UTF-8 format: one record per line, exactly
//! twelve comma-separated fields in fixed positional order.
//!
//! ```text
//! 25.31,50.12,54.80,7.02,742.00,150.00,75.00,99.00,Co-60,1250.50,262,1.80
//! ```
//!
//! | Pos | Field        | Pos | Field        |
//! |-----|--------------|-----|--------------|
//! | 0   | temperature  | 6   | phosphorus   |
//! | 1   | humidity     | 7   | potassium    |
//! | 2   | moisture     | 8   | source_name  |
//! | 3   | ph           | 9   | energy       |
//! | 4   | ec           | 10  | cps          |
//! | 5   | nitrogen     | 11  | activity     |
//!
//! The mapping is positional, not by name, and is frozen for compatibility
//! with deployed stations. The single control line `STOP` requests (or
//! confirms) graceful shutdown in either direction.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::TelemetryRecord;

/// Control token for the shutdown handshake.
pub const STOP_TOKEN: &str = "STOP";

/// Number of comma-separated fields in a telemetry line.
pub const FIELD_COUNT: usize = 12;

/// Upper bound on an unterminated line before it is discarded.
pub const MAX_LINE_BYTES: usize = 4096;

/// Wire positions
mod pos {
    pub const TEMPERATURE: usize = 0;
    pub const HUMIDITY: usize = 1;
    pub const MOISTURE: usize = 2;
    pub const PH: usize = 3;
    pub const EC: usize = 4;
    pub const NITROGEN: usize = 5;
    pub const PHOSPHORUS: usize = 6;
    pub const POTASSIUM: usize = 7;
    pub const SOURCE_NAME: usize = 8;
    pub const ENERGY: usize = 9;
    pub const CPS: usize = 10;
    pub const ACTIVITY: usize = 11;
}

const FIELD_NAMES: [&str; FIELD_COUNT] = [
    "temperature",
    "humidity",
    "moisture",
    "ph",
    "ec",
    "nitrogen",
    "phosphorus",
    "potassium",
    "source_name",
    "energy",
    "cps",
    "activity",
];

/// Reasons a line could not be decoded. Always recoverable: the line is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("Empty line")]
    EmptyLine,

    #[error("Expected 12 fields, got {0}")]
    WrongFieldCount(usize),

    #[error("Field '{field}' is not a number: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Field '{field}' is not finite")]
    NonFinite { field: &'static str },

    #[error("Field 'source_name' is empty")]
    EmptySourceName,
}

/// True if the line is the `STOP` control token.
pub fn is_stop(line: &str) -> bool {
    line.trim() == STOP_TOKEN
}

/// Decode one line, stamping it with the current time.
pub fn decode(line: &str) -> Result<TelemetryRecord, DecodeError> {
    decode_at(line, Utc::now())
}

/// Decode one line with an explicit capture timestamp.
pub fn decode_at(line: &str, timestamp: DateTime<Utc>) -> Result<TelemetryRecord, DecodeError> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() {
        return Err(DecodeError::EmptyLine);
    }

    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() != FIELD_COUNT {
        return Err(DecodeError::WrongFieldCount(parts.len()));
    }

    let source_name = parts[pos::SOURCE_NAME];
    if source_name.is_empty() {
        return Err(DecodeError::EmptySourceName);
    }

    let num = |idx: usize| parse_number(FIELD_NAMES[idx], parts[idx]);

    Ok(TelemetryRecord {
        timestamp,
        temperature: num(pos::TEMPERATURE)?,
        humidity: num(pos::HUMIDITY)?,
        moisture: num(pos::MOISTURE)?,
        ph: num(pos::PH)?,
        ec: num(pos::EC)?,
        nitrogen: num(pos::NITROGEN)?,
        phosphorus: num(pos::PHOSPHORUS)?,
        potassium: num(pos::POTASSIUM)?,
        source_name: source_name.to_string(),
        energy: num(pos::ENERGY)?,
        cps: floor_to_count(num(pos::CPS)?),
        activity: num(pos::ACTIVITY)?,
    })
}

/// True if `name` survives a trip through the wire unchanged: non-empty,
/// no surrounding whitespace, no commas or line breaks.
pub fn is_valid_source_name(name: &str) -> bool {
    !name.is_empty() && name.trim() == name && !name.contains([',', '\n', '\r'])
}

/// Encode a record into one newline-terminated line.
///
/// Floating fields carry two decimals, `cps` is written as an integer.
/// The timestamp is not transmitted. `source_name` must satisfy
/// [`is_valid_source_name`]; otherwise `decode` rejects or alters the line.
pub fn encode(record: &TelemetryRecord) -> String {
    debug_assert!(
        is_valid_source_name(&record.source_name),
        "source_name {:?} cannot be carried on the wire",
        record.source_name
    );
    format!(
        "{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{:.2},{},{:.2},{},{:.2}\n",
        record.temperature,
        record.humidity,
        record.moisture,
        record.ph,
        record.ec,
        record.nitrogen,
        record.phosphorus,
        record.potassium,
        record.source_name,
        record.energy,
        record.cps,
        record.activity,
    )
}

fn parse_number(field: &'static str, raw: &str) -> Result<f64, DecodeError> {
    let value: f64 = raw.parse().map_err(|_| DecodeError::InvalidNumber {
        field,
        value: raw.to_string(),
    })?;
    if !value.is_finite() {
        return Err(DecodeError::NonFinite { field });
    }
    Ok(value)
}

#[allow(clippy::cast_possible_truncation)]
fn floor_to_count(value: f64) -> i64 {
    value.floor() as i64
}

// ============================================================================
// Line Assembly
// ============================================================================

/// Reassembles newline-terminated lines from arbitrarily chunked reads.
///
/// Only the bytes of the current partial line are held; complete lines are
/// handed out in arrival order.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Set while skipping the tail of an oversized line
    discarding: bool,
    oversized_lines: u64,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly read bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    /// Pop the next complete line (terminator stripped), if any.
    pub fn next_line(&mut self) -> Option<String> {
        loop {
            match self.pending.iter().position(|&b| b == b'\n') {
                Some(idx) => {
                    let raw: Vec<u8> = self.pending.drain(..=idx).collect();
                    if self.discarding {
                        self.discarding = false;
                        continue;
                    }
                    let text = String::from_utf8_lossy(&raw[..idx]);
                    return Some(text.trim_end_matches('\r').to_string());
                }
                None => {
                    if self.pending.len() > MAX_LINE_BYTES {
                        tracing::debug!(
                            bytes = self.pending.len(),
                            "Discarding oversized unterminated line"
                        );
                        self.pending.clear();
                        if !self.discarding {
                            self.oversized_lines += 1;
                        }
                        self.discarding = true;
                    }
                    return None;
                }
            }
        }
    }

    /// Pop a `STOP` token still waiting for its terminator.
    ///
    /// Peers may send the token without a trailing newline, so a bare
    /// `STOP` sitting in the buffer counts as a complete line.
    pub fn take_stop(&mut self) -> Option<String> {
        if self.discarding || !is_stop(&String::from_utf8_lossy(&self.pending)) {
            return None;
        }
        self.pending.clear();
        Some(STOP_TOKEN.to_string())
    }

    /// Pop the unterminated remainder as a final line. Used at end of stream.
    pub fn take_partial(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.pending);
        if std::mem::take(&mut self.discarding) || raw.is_empty() {
            return None;
        }
        let text = String::from_utf8_lossy(&raw);
        Some(text.trim_end_matches('\r').to_string())
    }

    /// Number of lines dropped for exceeding `MAX_LINE_BYTES`.
    pub fn oversized_lines(&self) -> u64 {
        self.oversized_lines
    }

    /// Bytes of the current unterminated line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::{SampleGenerator, SimulationProfile};
    use crate::types::NumericField;

    const GOOD: &str = "25.31,50.12,54.80,7.02,742,150,75,99,Co-60,1250.50,262,1.80";

    #[test]
    fn test_decode_positional_mapping() {
        let record = decode(GOOD).unwrap();
        assert_eq!(record.temperature, 25.31);
        assert_eq!(record.humidity, 50.12);
        assert_eq!(record.moisture, 54.80);
        assert_eq!(record.ph, 7.02);
        // Position 4 is stored as ec, position 9 as energy
        assert_eq!(record.ec, 742.0);
        assert_eq!(record.nitrogen, 150.0);
        assert_eq!(record.phosphorus, 75.0);
        assert_eq!(record.potassium, 99.0);
        assert_eq!(record.source_name, "Co-60");
        assert_eq!(record.energy, 1250.50);
        assert_eq!(record.cps, 262);
        assert_eq!(record.activity, 1.80);
    }

    #[test]
    fn test_decode_strips_terminators_and_spaces() {
        let line = format!("{}\r\n", GOOD.replace(',', " , "));
        let record = decode(&line).unwrap();
        assert_eq!(record.source_name, "Co-60");
        assert_eq!(record.activity, 1.80);
    }

    #[test]
    fn test_cps_floors_fractional_counts() {
        let line = GOOD.replace(",262,", ",262.9,");
        assert_eq!(decode(&line).unwrap().cps, 262);

        let line = GOOD.replace(",262,", ",-3.5,");
        assert_eq!(decode(&line).unwrap().cps, -4);
    }

    #[test]
    fn test_decode_rejects_malformed_lines() {
        assert_eq!(decode(""), Err(DecodeError::EmptyLine));
        assert_eq!(decode("   \r\n"), Err(DecodeError::EmptyLine));
        assert_eq!(decode("1,2,3"), Err(DecodeError::WrongFieldCount(3)));
        assert_eq!(
            decode(&format!("{GOOD},extra")),
            Err(DecodeError::WrongFieldCount(13))
        );
        assert!(matches!(
            decode(&GOOD.replace("7.02", "abc")),
            Err(DecodeError::InvalidNumber { field: "ph", .. })
        ));
        assert!(matches!(
            decode(&GOOD.replace(",262,", ",many,")),
            Err(DecodeError::InvalidNumber { field: "cps", .. })
        ));
        assert_eq!(
            decode(&GOOD.replace("25.31", "NaN")),
            Err(DecodeError::NonFinite { field: "temperature" })
        );
        assert_eq!(
            decode(&GOOD.replace("1250.50", "inf")),
            Err(DecodeError::NonFinite { field: "energy" })
        );
        assert_eq!(
            decode(&GOOD.replace("Co-60", " ")),
            Err(DecodeError::EmptySourceName)
        );
        assert_eq!(decode("STOP"), Err(DecodeError::WrongFieldCount(1)));
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let original = decode(GOOD).unwrap();
        let line = encode(&original);
        assert!(line.ends_with('\n'));
        assert_eq!(line.trim_end().split(',').count(), FIELD_COUNT);

        let decoded = decode_at(&line, original.timestamp).unwrap();
        assert_eq!(decoded, original);
    }

    fn assert_round_trips(original: &TelemetryRecord) {
        let decoded = decode_at(&encode(original), original.timestamp).unwrap();
        for field in NumericField::ALL {
            if field == NumericField::Cps {
                assert_eq!(decoded.cps, original.cps);
            } else {
                let (got, want) = (decoded.value(field), original.value(field));
                assert!((got - want).abs() <= 0.005 + 1e-9, "{field}: {got} vs {want}");
            }
        }
        assert_eq!(decoded.source_name, original.source_name);
        assert_eq!(decoded.timestamp, original.timestamp);
    }

    #[test]
    fn test_generated_records_round_trip() {
        let mut generator = SampleGenerator::new(Some(42), "Co-60");
        for profile in SimulationProfile::ALL {
            for t in 0..500 {
                assert_round_trips(&generator.generate(profile, t));
            }
        }
    }

    #[test]
    fn test_negative_and_fractional_values_round_trip() {
        let mut record = decode(GOOD).unwrap();
        record.temperature = -12.345;
        record.moisture = -0.004;
        record.ph = -1.0;
        record.energy = 0.001;
        record.cps = -7;
        assert_round_trips(&record);

        // Fractional counts are floored on decode, then carried exactly
        let floored = decode(&GOOD.replace(",262,", ",261.99,")).unwrap();
        assert_eq!(floored.cps, 261);
        assert_round_trips(&floored);
    }

    #[test]
    fn test_source_name_wire_safety() {
        assert!(is_valid_source_name("Co-60"));
        assert!(is_valid_source_name("Cs 137"));
        assert!(!is_valid_source_name(""));
        assert!(!is_valid_source_name(" Co-60"));
        assert!(!is_valid_source_name("Co,60"));
        assert!(!is_valid_source_name("Co-60\n"));
    }

    #[test]
    fn test_encode_rounds_to_two_decimals() {
        let mut record = decode(GOOD).unwrap();
        record.temperature = 25.456_789;
        record.ec = 812.349;
        let decoded = decode(&encode(&record)).unwrap();
        assert!((decoded.temperature - record.temperature).abs() <= 0.005);
        assert!((decoded.ec - record.ec).abs() <= 0.005);
        assert_eq!(decoded.cps, record.cps);
    }

    #[test]
    fn test_stop_token() {
        assert!(is_stop("STOP"));
        assert!(is_stop("STOP\r\n"));
        assert!(is_stop("  STOP "));
        assert!(!is_stop("stop"));
        assert!(!is_stop(GOOD));
    }

    #[test]
    fn test_line_buffer_reassembles_split_reads() {
        let mut buf = LineBuffer::new();
        buf.extend(b"25.31,50.12,");
        assert_eq!(buf.next_line(), None);
        buf.extend(b"54.80\r\nSTOP\nfirst");
        assert_eq!(buf.next_line().as_deref(), Some("25.31,50.12,54.80"));
        assert_eq!(buf.next_line().as_deref(), Some("STOP"));
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.pending_len(), 5);
    }

    #[test]
    fn test_line_buffer_drops_oversized_line() {
        let mut buf = LineBuffer::new();
        buf.extend(&vec![b'x'; MAX_LINE_BYTES + 1]);
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.oversized_lines(), 1);

        // Tail of the oversized line is skipped, the next line survives
        buf.extend(b"tail-of-garbage\nSTOP\n");
        assert_eq!(buf.next_line().as_deref(), Some("STOP"));
        assert_eq!(buf.oversized_lines(), 1);
    }

    #[test]
    fn test_line_buffer_bare_stop() {
        let mut buf = LineBuffer::new();
        buf.extend(b"ST");
        assert_eq!(buf.take_stop(), None);
        buf.extend(b"OP");
        assert_eq!(buf.next_line(), None);
        assert_eq!(buf.take_stop().as_deref(), Some("STOP"));
        assert_eq!(buf.pending_len(), 0);

        // A data fragment is never mistaken for the token
        buf.extend(b"25.31,50.12");
        assert_eq!(buf.take_stop(), None);
        assert_eq!(buf.pending_len(), 11);
    }

    #[test]
    fn test_line_buffer_flushes_partial_line() {
        let mut buf = LineBuffer::new();
        buf.extend(b"done\nSTOP");
        assert_eq!(buf.next_line().as_deref(), Some("done"));
        assert_eq!(buf.take_partial().as_deref(), Some("STOP"));
        assert_eq!(buf.take_partial(), None);
    }
}
