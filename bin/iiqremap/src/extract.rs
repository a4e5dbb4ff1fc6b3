// SPDX-License-Identifier: LGPL-2.1

use std::path::PathBuf;

use clap::ArgMatches;
use log::{debug, info};

use crate::{AppError, Result};

/// Entry point for Clap sub command `extract`
pub fn extract(options: &ArgMatches) -> Result<()> {
  let in_path: &PathBuf = options.get_one("INPUT").expect("INPUT not available");
  let iiq = crate::load_iiq(in_path)?.ok_or_else(|| AppError::UnsupportedFile(format!("{} is not an IIQ file", in_path.display())))?;
  let blob = iiq
    .extract_calibration()
    .ok_or_else(|| AppError::General(format!("{} has no embedded calibration", in_path.display())))?;

  let out_path = match options.get_one::<PathBuf>("OUTPUT") {
    Some(path) => path.clone(),
    None if iiq.serial().is_empty() => return Err(AppError::General("IIQ file has no body serial, OUTPUT is required".into())),
    None => PathBuf::from(format!("{}.cal", iiq.serial())),
  };
  debug!("Extract {} bytes of calibration to {:?}", blob.len(), out_path);
  crate::check_dest(&out_path, options.get_flag("override"))?;

  std::fs::write(&out_path, blob)?;
  info!("Calibration of {} written to {}", iiq.serial(), out_path.display());
  println!("{}", out_path.display());
  Ok(())
}
