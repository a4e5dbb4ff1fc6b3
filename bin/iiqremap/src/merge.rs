// SPDX-License-Identifier: LGPL-2.1

use std::path::PathBuf;

use clap::ArgMatches;
use log::debug;

use crate::{AppError, Result};

/// Entry point for Clap sub command `merge`
pub fn merge(options: &ArgMatches) -> Result<()> {
  let first: &PathBuf = options.get_one("CAL1").expect("CAL1 not available");
  let second: &PathBuf = options.get_one("CAL2").expect("CAL2 not available");
  let out_path: &PathBuf = options.get_one("OUTPUT").expect("OUTPUT not available");
  crate::check_dest(out_path, options.get_flag("override"))?;

  let mut cal = crate::load_calibration(first)?;
  let other = crate::load_calibration(second)?;
  debug!("Merge {} ({:?}) with {} ({:?})", cal.serial(), first, other.serial(), second);
  if !cal.merge(other) {
    return Err(AppError::General(format!(
      "{} and {} are not complementary Sensor+ calibrations of the same body",
      first.display(),
      second.display()
    )));
  }
  cal.write_to(out_path)?;
  println!("{}", out_path.display());
  Ok(())
}
