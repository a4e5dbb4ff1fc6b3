// SPDX-License-Identifier: LGPL-2.1

//! Phase One sensor correction.
//!
//! The calibration directory is replayed tag by tag against the raw pixel
//! buffer. Each known tag reads its parameters straight from the stream
//! and transforms the pixels in place. A read past the end of the stream
//! stops the replay, pixels already transformed are kept.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::bits::{Endian, IIQ_BIGENDIAN};
use crate::cancel::CancelToken;
use crate::cfa::Channel;
use crate::envparams;
use crate::formats::cursor::DataCursor;
use crate::rawimage::SensorImage;
use crate::tags::CalTag;
use crate::{CalError, Result};

pub mod black;
mod curves;
mod defects;
mod flatfield;
mod quadrant;

/// Switches for the individual correction passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrectionParams {
  pub apply_defects: bool,
  pub subtract_black: bool,
  pub apply_flatfield: bool,
  pub apply_curves: bool,
  pub apply_quadrants: bool,
}

impl Default for CorrectionParams {
  fn default() -> Self {
    Self {
      apply_defects: true,
      subtract_black: true,
      apply_flatfield: true,
      apply_curves: true,
      apply_quadrants: true,
    }
  }
}

impl CorrectionParams {
  /// Defaults with developer overrides from the environment applied.
  pub fn from_env() -> Self {
    let mut params = Self::default();
    if let Some(true) = envparams::skip_flatfield() {
      params.apply_flatfield = false;
    }
    if let Some(true) = envparams::skip_curves() {
      params.apply_curves = false;
    }
    if let Some(true) = envparams::skip_quadrants() {
      params.apply_quadrants = false;
    }
    params
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CancelReason {
  /// The cancel token was triggered
  Requested,
  /// The calibration stream ended before a tag was fully read
  CorruptData { offset: usize, wanted: usize },
}

impl From<CalError> for CancelReason {
  fn from(err: CalError) -> Self {
    match err {
      CalError::CorruptData { offset, wanted } => Self::CorruptData { offset, wanted },
      _ => Self::CorruptData { offset: 0, wanted: 0 },
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CorrectionOutcome {
  Completed,
  Cancelled(CancelReason),
}

impl CorrectionOutcome {
  pub fn is_completed(&self) -> bool {
    matches!(self, Self::Completed)
  }
}

pub(crate) type Replay<T> = std::result::Result<T, CancelReason>;

#[inline(always)]
pub(crate) fn checkpoint(cancel: &CancelToken) -> Replay<()> {
  if cancel.is_cancelled() { Err(CancelReason::Requested) } else { Ok(()) }
}

/// Sensor geometry the passes work with. All coordinates are sensor
/// coordinates including margins.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Geometry {
  pub width: usize,
  pub height: usize,
  pub split_col: usize,
  pub split_row: usize,
  channels: [[Channel; 2]; 2],
}

impl Geometry {
  pub fn of<I: SensorImage + ?Sized>(image: &I) -> Result<Self> {
    let (width, height) = (image.raw_width(), image.raw_height());
    if image.pixels().len() != width * height {
      return Err(CalError::InvalidParam(format!(
        "Pixel buffer has {} pixels, expected {}x{}",
        image.pixels().len(),
        width,
        height
      )));
    }
    Ok(Self {
      width,
      height,
      split_col: image.split_col(),
      split_row: image.split_row(),
      channels: [
        [image.raw_channel(0, 0), image.raw_channel(0, 1)],
        [image.raw_channel(1, 0), image.raw_channel(1, 1)],
      ],
    })
  }

  #[inline(always)]
  pub fn channel(&self, row: usize, col: usize) -> Channel {
    self.channels[row & 1][col & 1]
  }

  /// Row and column range of quadrant `(qr, qc)`.
  pub fn quadrant(&self, qr: usize, qc: usize) -> (std::ops::Range<usize>, std::ops::Range<usize>) {
    let split_row = self.split_row.min(self.height);
    let split_col = self.split_col.min(self.width);
    let rows = if qr > 0 { split_row..self.height } else { 0..split_row };
    let cols = if qc > 0 { split_col..self.width } else { 0..split_col };
    (rows, cols)
  }
}

/// Correct `image` with the calibration in `calibration`.
///
/// The black pre-pass runs first if the image carries black levels that
/// were not yet subtracted. An `Err` is only returned for an image whose
/// pixel buffer does not match its dimensions, everything else is
/// reported through the outcome.
pub fn correct<I: SensorImage + ?Sized>(image: &mut I, calibration: &[u8], params: &CorrectionParams, cancel: &CancelToken) -> Result<CorrectionOutcome> {
  let geo = Geometry::of(image)?;
  debug!(
    "Correct {}x{} image, split col: {}, row: {}, params: {:?}",
    geo.width, geo.height, geo.split_col, geo.split_row, params
  );

  if params.subtract_black {
    if let Some(levels) = image.black_levels().cloned() {
      if let Err(reason) = black::subtract_black(image.pixels_mut(), &geo, &levels, cancel) {
        return Ok(CorrectionOutcome::Cancelled(reason));
      }
      image.mark_black_subtracted();
    }
  }

  let temperature = image.sensor_temperature();
  match replay(image.pixels_mut(), &geo, temperature, calibration, params, cancel) {
    Ok(()) => Ok(CorrectionOutcome::Completed),
    Err(reason) => {
      warn!("Correction cancelled: {:?}", reason);
      Ok(CorrectionOutcome::Cancelled(reason))
    }
  }
}

fn replay(pixels: &mut [u16], geo: &Geometry, temperature: f32, data: &[u8], params: &CorrectionParams, cancel: &CancelToken) -> Replay<()> {
  if data.is_empty() {
    return Ok(());
  }
  let mut cur = DataCursor::new(data, Endian::Little);
  if cur.get32()? == IIQ_BIGENDIAN {
    cur.set_endian(Endian::Big);
  }
  cur.set_position(4, true);
  let dir = cur.get32()? as usize;
  cur.set_position(dir, false);
  let entries = cur.get32()?;
  cur.get32()?;

  let mut bad_cols: Vec<u16> = Vec::new();
  let mut qlin_applied = false;
  let mut qmult_applied = false;

  for _ in 0..entries {
    checkpoint(cancel)?;
    let tag = cur.get32()?;
    let len = cur.get32()?;
    let offset = cur.get32()?;
    let save = cur.position();
    cur.set_position(offset as usize, false);

    match CalTag::try_from(tag) {
      Ok(CalTag::DefectCorrection) if params.apply_defects => {
        defects::read_defects(&mut cur, len, pixels, geo, &mut bad_cols)?;
      }
      Ok(CalTag::DualOutputPoly) if params.apply_curves => curves::poly_half(&mut cur, pixels, geo, temperature, cancel)?,
      Ok(CalTag::PolynomialCurve) if params.apply_curves => curves::poly_full(&mut cur, pixels, geo, cancel)?,
      Ok(CalTag::LumaAllColourFlatField) if params.apply_flatfield => {
        flatfield::flat_field(&mut cur, pixels, geo, flatfield::FlatKind::FLOAT_LUMA, cancel)?
      }
      Ok(CalTag::LumaFlatField2 | CalTag::Luma) if params.apply_flatfield => flatfield::flat_field(&mut cur, pixels, geo, flatfield::FlatKind::LUMA, cancel)?,
      Ok(CalTag::ChromaRedBlue) if params.apply_flatfield => flatfield::flat_field(&mut cur, pixels, geo, flatfield::FlatKind::CHROMA, cancel)?,
      Ok(CalTag::FourTileLinearisation) if params.apply_quadrants && !qlin_applied => {
        quadrant::linearization(&mut cur, pixels, geo, cancel)?;
        qlin_applied = true;
      }
      Ok(CalTag::FourTileOutput) if params.apply_quadrants && !qmult_applied => {
        quadrant::multipliers(&mut cur, pixels, geo, cancel)?;
        qmult_applied = true;
      }
      Ok(CalTag::FourTileGainLut) if params.apply_quadrants && !qmult_applied => {
        quadrant::combined(&mut cur, pixels, geo, cancel)?;
        qmult_applied = true;
        qlin_applied = true;
      }
      _ => {}
    }
    cur.set_position(save, false);
  }

  defects::repair_columns(pixels, geo, &mut bad_cols, cancel)
}
