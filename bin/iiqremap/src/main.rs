// SPDX-License-Identifier: LGPL-2.1

mod app;
mod correct;
mod defects;
mod dump;
mod extract;
mod inject;
mod merge;
mod remap;

use std::path::{Path, PathBuf};

use fern::colors::{Color, ColoredLevelConfig};
use iiqcal::{CalError, CalibrationFile, IiqFile, SensorVariant};
use log::debug;
use thiserror::Error;

const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Main entry function
///
/// We initialize the fern logger here, create a Clap command line
/// parser and dispatch to the subcommand.
fn main() -> anyhow::Result<()> {
  let app = app::create_app();
  let matches = app.try_get_matches().unwrap_or_else(|e| e.exit());

  let colors = ColoredLevelConfig::new().debug(Color::Magenta);
  fern::Dispatch::new()
    .chain(std::io::stderr())
    .level({
      match matches.get_count("debug") {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
      }
    })
    .format(move |out, message, record| {
      out.finish(format_args!(
        "[{:6}][{}] {} ({}:{})",
        colors.color(record.level()),
        record.target(),
        message,
        record.file().unwrap_or("<undefined>"),
        record.line().unwrap_or(0)
      ))
    })
    .apply()?;

  debug!("{} {}", PKG_NAME, PKG_VERSION);

  match matches.subcommand() {
    Some(("dump", sc)) => dump::dump(sc)?,
    Some(("extract", sc)) => extract::extract(sc)?,
    Some(("defects", sc)) => defects::defects(sc)?,
    Some(("merge", sc)) => merge::merge(sc)?,
    Some(("inject", sc)) => inject::inject(sc)?,
    Some(("correct", sc)) => correct::correct(sc)?,
    Some(("remap", sc)) => remap::remap(sc)?,
    _ => return Err(AppError::InvalidCmdSwitch("Unknown subcommand".into()).into()),
  }
  Ok(())
}

#[derive(Error, Debug)]
pub enum AppError {
  #[error("{}", _0)]
  General(String),
  #[error("Invalid arguments: {}", _0)]
  InvalidCmdSwitch(String),
  #[error("I/O error: {}", _0)]
  Io(#[from] std::io::Error),
  #[error("Not found: {}", _0.display())]
  NotFound(PathBuf),
  #[error("Already exists: {}", _0.display())]
  AlreadyExists(PathBuf),
  #[error("Unsupported file: {}", _0)]
  UnsupportedFile(String),
  #[error(transparent)]
  Calibration(#[from] CalError),
  #[error(transparent)]
  Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for AppError {
  fn from(value: serde_json::Error) -> Self {
    anyhow::Error::new(value).into()
  }
}

impl From<serde_yaml::Error> for AppError {
  fn from(value: serde_yaml::Error) -> Self {
    anyhow::Error::new(value).into()
  }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Load a standalone calibration file. An invalid container is an error here.
pub(crate) fn load_calibration(path: &Path) -> Result<CalibrationFile> {
  if !path.exists() {
    return Err(AppError::NotFound(path.to_path_buf()));
  }
  let cal = CalibrationFile::load(path)?;
  if !cal.is_valid() {
    return Err(AppError::UnsupportedFile(format!("{} is not a Phase One calibration file", path.display())));
  }
  debug!("Loaded calibration {} from {}", cal.serial(), path.display());
  Ok(cal)
}

/// Load an IIQ raw file, `None` if the file is not an IIQ container.
pub(crate) fn load_iiq(path: &Path) -> Result<Option<IiqFile>> {
  if !path.exists() {
    return Err(AppError::NotFound(path.to_path_buf()));
  }
  match IiqFile::load(path) {
    Ok(iiq) => Ok(Some(iiq)),
    Err(CalError::InvalidFormat(reason)) => {
      debug!("{} is not an IIQ file: {}", path.display(), reason);
      Ok(None)
    }
    Err(err) => Err(err.into()),
  }
}

/// Refuse to replace an existing file unless `override` is set.
pub(crate) fn check_dest(path: &Path, overwrite: bool) -> Result<()> {
  if path.exists() && !overwrite {
    return Err(AppError::AlreadyExists(path.to_path_buf()));
  }
  Ok(())
}

pub(crate) fn variant_arg(options: &clap::ArgMatches) -> SensorVariant {
  match options.get_one::<String>("variant").map(String::as_str) {
    Some("sensorplus") => SensorVariant::SensorPlus,
    _ => SensorVariant::Standard,
  }
}
