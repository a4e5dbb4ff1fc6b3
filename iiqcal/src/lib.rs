//! Library to read, edit and write Phase One IIQ calibration data.
//!
//! Calibration blobs are stored as a standalone `.cal` file or embedded
//! into the MakerNote of an IIQ raw file. This crate parses both, keeps
//! track of sensor defects (bad pixels and bad columns), rebuilds the
//! calibration blob after edits and replays the calibration against a
//! decoded raw pixel buffer.
//!
//! # Example
//! ```rust,no_run
//! use iiqcal::formats::calib::{CalibrationFile, SensorVariant};
//!
//! fn main() -> iiqcal::Result<()> {
//!   let mut cal = CalibrationFile::load("P0012345.cal")?;
//!   cal.add_column(SensorVariant::Standard, 1200);
//!   cal.save()?;
//!   Ok(())
//! }
//! ```

#![deny(unstable_features)]

use thiserror::Error;

pub mod analyze;
pub mod bits;
pub mod cancel;
pub mod cfa;
pub mod correct;
pub mod envparams;
pub mod formats;
pub mod imgop;
pub mod pixarray;
pub mod rawimage;
pub mod remap;
pub mod tags;

pub use cancel::CancelToken;
pub use correct::{CancelReason, CorrectionOutcome, CorrectionParams};
pub use formats::calib::{CalibrationFile, SensorVariant};
pub use formats::iiq::IiqFile;
pub use rawimage::{RawImage, SensorImage, SensorLayout};

#[derive(Error, Debug)]
pub enum CalError {
  #[error("Invalid format: {}", _0)]
  InvalidFormat(String),
  #[error("Corrupt data: reading {wanted} bytes at offset {offset} exceeds buffer")]
  CorruptData { offset: usize, wanted: usize },
  #[error("Serial mismatch: expected '{expected}', found '{found}'")]
  SerialMismatch { expected: String, found: String },
  #[error("Calibration has no Sensor+ footer")]
  NotSensorPlus,
  #[error("Invalid parameter: {}", _0)]
  InvalidParam(String),
  #[error("I/O error: {}", _0)]
  Io(#[from] std::io::Error),
  #[error("{}", _0)]
  General(String),
}

impl From<String> for CalError {
  fn from(str: String) -> Self {
    Self::General(str)
  }
}

impl From<&str> for CalError {
  fn from(str: &str) -> Self {
    Self::General(str.to_string())
  }
}

pub type Result<T> = std::result::Result<T, CalError>;

#[cfg(test)]
pub(crate) fn init_test_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}
