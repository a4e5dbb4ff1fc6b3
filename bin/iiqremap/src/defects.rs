// SPDX-License-Identifier: LGPL-2.1

use std::path::PathBuf;

use clap::ArgMatches;
use iiqcal::analyze::DefectListing;
use log::{info, warn};
use serde::Serialize;

use crate::dump::print_output;
use crate::{AppError, Result};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DefectSummary {
  serial: String,
  columns: Vec<u16>,
  /// `(col, row)` pairs
  pixels: Vec<(u16, u16)>,
}

/// Entry point for Clap sub command `defects`
pub fn defects(options: &ArgMatches) -> Result<()> {
  let (cmd, sc) = options
    .subcommand()
    .ok_or_else(|| AppError::InvalidCmdSwitch("defects needs list, add or remove".into()))?;
  let path: &PathBuf = sc.get_one("CAL").expect("CAL not available");
  let variant = crate::variant_arg(sc);
  let mut cal = crate::load_calibration(path)?;
  if !cal.is_variant_valid(variant) {
    return Err(AppError::General(format!("{} has no {:?} calibration", path.display(), variant)));
  }

  let pixels: Vec<(u16, u16)> = sc.try_get_many::<(u16, u16)>("pixel").ok().flatten().into_iter().flatten().copied().collect();
  let columns: Vec<u16> = sc.try_get_many::<u16>("column").ok().flatten().into_iter().flatten().copied().collect();

  match cmd {
    "list" => {
      if sc.get_flag("raw") {
        return print_output(&DefectListing::new(&cal, variant), sc);
      }
      let set = cal.defects(variant);
      let summary = DefectSummary {
        serial: cal.serial().to_string(),
        columns: set.columns().iter().copied().collect(),
        pixels: set.pixels().iter().copied().collect(),
      };
      return print_output(&summary, sc);
    }
    "add" => {
      let added = cal.add_pixels(variant, pixels.iter().copied());
      let added_cols = columns.iter().filter(|col| cal.add_column(variant, **col)).count();
      info!("Added {} pixels and {} columns", added, added_cols);
    }
    "remove" => {
      let mut removed = 0;
      if sc.get_flag("all_pixels") {
        removed += cal.remove_pixel(variant, -1, -1) as usize;
      }
      if sc.get_flag("all_columns") {
        removed += cal.remove_column(variant, -1) as usize;
      }
      removed += pixels.iter().filter(|(col, row)| cal.remove_pixel(variant, *col as i32, *row as i32)).count();
      removed += columns.iter().filter(|col| cal.remove_column(variant, **col as i32)).count();
      info!("{} removals applied", removed);
    }
    _ => return Err(AppError::InvalidCmdSwitch(format!("Unknown defects command {}", cmd))),
  }

  if cal.save()? {
    println!("{} saved", path.display());
  } else {
    warn!("Nothing changed, {} not written", path.display());
  }
  Ok(())
}
