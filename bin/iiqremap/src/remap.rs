// SPDX-License-Identifier: LGPL-2.1

use std::path::PathBuf;
use std::time::Instant;

use clap::ArgMatches;
use iiqcal::SensorImage;
use iiqcal::cfa::Channel;
use iiqcal::remap::{ChannelStats, RemapParams, adaptive_remap, average_remap, median_stack};
use log::{debug, info, warn};

use crate::correct::{build_image, read_pgm_file};
use crate::{AppError, Result};

/// Entry point for Clap sub command `remap`
pub fn remap(options: &ArgMatches) -> Result<()> {
  let now = Instant::now();
  let cal_path: &PathBuf = options.get_one("CAL").expect("CAL not available");
  let inputs: Vec<&PathBuf> = options.get_many("INPUT").expect("INPUT not available").collect();

  let mut params = RemapParams::from_env();
  if let Some(sigma) = options.get_one::<f32>("sigma") {
    params.sigma = *sigma;
  }
  params.adaptive = options.get_flag("adaptive");
  params.block = *options.get_one::<usize>("block").expect("block has a default");
  params.count_only = options.get_flag("count");
  params.validate()?;

  let variant = crate::variant_arg(options);
  let mut cal = crate::load_calibration(cal_path)?;
  if !cal.is_variant_valid(variant) {
    return Err(AppError::General(format!("{} has no {:?} calibration", cal_path.display(), variant)));
  }

  let mut frames = inputs.iter().map(|path| read_pgm_file(path)).collect::<Result<Vec<_>>>()?;
  let pixels = if frames.len() > 1 {
    debug!("Stacking {} frames", frames.len());
    median_stack(&frames)?
  } else {
    frames.pop().ok_or_else(|| AppError::InvalidCmdSwitch("No input frame".into()))?
  };
  let image = build_image(options, pixels, None)?;

  let stats = ChannelStats::collect(&image);
  for ch in Channel::ALL {
    let s = stats.get(ch);
    println!(
      "{:?}: {} pixels, min {}, max {}, mean {:.2}, stddev {:.2}",
      ch, s.count, s.min, s.max, s.mean, s.stddev
    );
  }
  let thresholds = stats.thresholds(params.sigma);
  debug!("Remap thresholds: {:?}, params: {:?}", thresholds, params);

  let (candidates, counts) = if params.adaptive {
    let result = adaptive_remap(&image, &thresholds, params.block, &params.channels, params.count_only)?;
    (result.candidates, result.counts)
  } else {
    let candidates = average_remap(&image, &stats, &thresholds, &params.channels);
    let mut counts = [0_u64; 4];
    for (col, row) in &candidates {
      counts[image.raw_channel(*row as usize, *col as usize).index()] += 1;
    }
    (candidates, counts)
  };
  for ch in Channel::ALL {
    println!("{:?}: {} candidates", ch, counts[ch.index()]);
  }
  info!("Remap done in {:.2}s", now.elapsed().as_secs_f32());

  if params.count_only {
    return Ok(());
  }
  let added = cal.add_pixels(variant, candidates);
  println!("{} new bad pixels", added);
  if cal.save()? {
    println!("{} saved", cal_path.display());
  } else {
    warn!("No new defects, {} not written", cal_path.display());
  }
  Ok(())
}
