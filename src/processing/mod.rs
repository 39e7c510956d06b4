//! Record processing applied between decoding and publication

pub mod calibration;

pub use calibration::{apply, CalibrationParameter, CalibrationSet};
