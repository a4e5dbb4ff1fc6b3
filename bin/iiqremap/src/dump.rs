// SPDX-License-Identifier: LGPL-2.1

use std::path::PathBuf;

use clap::ArgMatches;
use iiqcal::CalibrationFile;
use iiqcal::analyze::{CalibrationDump, IiqDump};
use log::debug;
use serde::Serialize;

use crate::{AppError, Result};

pub(crate) fn print_output<T: Serialize + ?Sized>(obj: &T, options: &ArgMatches) -> Result<()> {
  if options.get_flag("yaml") {
    let yaml = serde_yaml::to_string(obj)?;
    println!("{}", yaml);
  } else {
    let json = serde_json::to_string_pretty(obj)?;
    println!("{}", json);
  }
  Ok(())
}

/// Entry point for Clap sub command `dump`
pub fn dump(options: &ArgMatches) -> Result<()> {
  let in_file: &PathBuf = options.get_one("FILE").expect("FILE not available");
  debug!("Infile: {:?}", in_file);

  let (cal, iiq) = match crate::load_iiq(in_file)? {
    Some(iiq) => (iiq.calibration(), Some(iiq)),
    None => {
      let cal = CalibrationFile::from_bytes(&std::fs::read(in_file)?);
      (cal.is_valid().then_some(cal), None)
    }
  };

  if let Some(tag) = options.get_one::<u32>("tag") {
    let cal = cal.ok_or_else(|| AppError::UnsupportedFile(format!("{} holds no calibration", in_file.display())))?;
    let variant = crate::variant_arg(options);
    let payload = cal
      .tags(variant)
      .find(|(entry, _)| entry.tag == *tag)
      .ok_or_else(|| AppError::General(format!("Tag 0x{:x} not found in {:?} calibration", tag, variant)))?
      .1
      .ok_or_else(|| AppError::General(format!("Payload of tag 0x{:x} exceeds the calibration", tag)))?;
    println!("{}", hex::encode(payload));
    return Ok(());
  }

  match (iiq, cal) {
    (Some(iiq), _) => print_output(&IiqDump::new(&iiq), options),
    (None, Some(cal)) => print_output(&CalibrationDump::new(&cal), options),
    (None, None) => Err(AppError::UnsupportedFile(format!(
      "{} is neither an IIQ nor a calibration file",
      in_file.display()
    ))),
  }
}
