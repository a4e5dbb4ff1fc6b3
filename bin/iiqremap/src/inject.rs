// SPDX-License-Identifier: LGPL-2.1

use std::path::PathBuf;

use clap::ArgMatches;
use log::info;

use crate::{AppError, Result};

/// Entry point for Clap sub command `inject`
pub fn inject(options: &ArgMatches) -> Result<()> {
  let iiq_path: &PathBuf = options.get_one("IIQ").expect("IIQ not available");
  let cal_path: &PathBuf = options.get_one("CAL").expect("CAL not available");
  let out_path: &PathBuf = options.get_one("OUTPUT").expect("OUTPUT not available");
  crate::check_dest(out_path, options.get_flag("override"))?;

  let iiq = crate::load_iiq(iiq_path)?.ok_or_else(|| AppError::UnsupportedFile(format!("{} is not an IIQ file", iiq_path.display())))?;
  let cal = crate::load_calibration(cal_path)?;
  let data = iiq.write_calibration(&cal)?;
  std::fs::write(out_path, &data)?;
  info!("{} bytes written to {}", data.len(), out_path.display());
  println!("{}", out_path.display());
  Ok(())
}
