// SPDX-License-Identifier: LGPL-2.1

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::ArgMatches;
use iiqcal::cfa::CfaPattern;
use iiqcal::correct::correct as apply_calibration;
use iiqcal::pixarray::PixU16;
use iiqcal::rawimage::pgm::{raw_as_pgm, read_pgm};
use iiqcal::{CalibrationFile, CancelToken, CorrectionOutcome, CorrectionParams, IiqFile, RawImage, SensorLayout, SensorVariant};
use log::{debug, info};

use crate::{AppError, Result};

/// Calibration from a `.cal` file or embedded in an IIQ file. The IIQ
/// file is returned as well, it knows the sensor layout.
pub(crate) fn open_calibration(path: &Path) -> Result<(CalibrationFile, Option<IiqFile>)> {
  match crate::load_iiq(path)? {
    Some(iiq) => {
      let cal = iiq
        .calibration()
        .filter(|cal| cal.is_valid())
        .ok_or_else(|| AppError::General(format!("{} has no valid embedded calibration", path.display())))?;
      Ok((cal, Some(iiq)))
    }
    None => Ok((crate::load_calibration(path)?, None)),
  }
}

pub(crate) fn read_pgm_file(path: &Path) -> Result<PixU16> {
  if !path.exists() {
    return Err(AppError::NotFound(path.to_path_buf()));
  }
  let mut reader = BufReader::new(File::open(path)?);
  let pixels = read_pgm(&mut reader)?;
  debug!("Read {}x{} PGM from {}", pixels.width, pixels.height, path.display());
  Ok(pixels)
}

/// Wrap a raw dump with the layout from the IIQ file and the command line.
pub(crate) fn build_image(options: &ArgMatches, pixels: PixU16, iiq: Option<&IiqFile>) -> Result<RawImage> {
  let mut layout = match iiq {
    Some(iiq) => iiq.sensor_layout()?,
    None => SensorLayout::plain(pixels.width, pixels.height),
  };
  if let Some((left, top)) = options.get_one::<(u16, u16)>("margins") {
    layout.left_margin = *left as usize;
    layout.top_margin = *top as usize;
  }
  if let Some(col) = options.get_one::<usize>("split_col") {
    layout.split_col = *col;
  }
  if let Some(row) = options.get_one::<usize>("split_row") {
    layout.split_row = *row;
  }
  if let Some(temp) = options.get_one::<f32>("sensor_temp") {
    layout.sensor_temperature = *temp;
  }
  let cfa_name: &String = options.get_one("cfa").expect("cfa has a default");
  let cfa = CfaPattern::new(cfa_name).ok_or_else(|| AppError::InvalidCmdSwitch(format!("'{}' is not a Bayer pattern", cfa_name)))?;
  debug!("Sensor layout: {:?}, CFA: {:?}", layout, cfa);

  let mut image = RawImage::with_layout(pixels, layout, cfa)?;
  if let Some(black) = iiq.and_then(IiqFile::black_levels) {
    image.set_black_levels(black);
  }
  Ok(image)
}

/// Variant the image was captured with. An IIQ file knows it.
pub(crate) fn capture_variant(options: &ArgMatches, iiq: Option<&IiqFile>) -> SensorVariant {
  iiq.map(IiqFile::sensor_variant).unwrap_or_else(|| crate::variant_arg(options))
}

/// Entry point for Clap sub command `correct`
pub fn correct(options: &ArgMatches) -> Result<()> {
  let now = Instant::now();
  let cal_path: &PathBuf = options.get_one("CAL").expect("CAL not available");
  let in_path: &PathBuf = options.get_one("INPUT").expect("INPUT not available");
  let out_path: &PathBuf = options.get_one("OUTPUT").expect("OUTPUT not available");
  crate::check_dest(out_path, options.get_flag("override"))?;

  let (cal, iiq) = open_calibration(cal_path)?;
  let mut image = build_image(options, read_pgm_file(in_path)?, iiq.as_ref())?;
  let variant = capture_variant(options, iiq.as_ref());

  let mut params = CorrectionParams::from_env();
  params.apply_defects = !options.get_flag("no_defects");
  let data = cal.correction_data(variant, params.apply_defects)?;

  match apply_calibration(&mut image, &data, &params, &CancelToken::new())? {
    CorrectionOutcome::Completed => {}
    CorrectionOutcome::Cancelled(reason) => return Err(AppError::General(format!("Correction cancelled: {:?}", reason))),
  }

  let mut writer = BufWriter::new(File::create(out_path)?);
  raw_as_pgm(image.pixels.width, image.pixels.height, image.pixels.pixels(), &mut writer)?;
  writer.flush()?;
  info!("Corrected {} with {:?} calibration in {:.2}s", in_path.display(), variant, now.elapsed().as_secs_f32());
  println!("{}", out_path.display());
  Ok(())
}
