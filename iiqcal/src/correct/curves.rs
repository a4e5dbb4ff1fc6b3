// SPDX-License-Identifier: LGPL-2.1

use log::debug;
use rayon::prelude::*;

use super::{Geometry, Replay, checkpoint};
use crate::bits::clamp;
use crate::cancel::CancelToken;
use crate::formats::cursor::DataCursor;

/// Polynom curve for the right side of the sensor, read out by the
/// second output amplifier. Depends on the sensor temperature.
pub(super) fn poly_half(cur: &mut DataCursor, pixels: &mut [u16], geo: &Geometry, temperature: f32, cancel: &CancelToken) -> Replay<()> {
  cur.get32()?;
  let mut poly = [0.0_f32; 8];
  for p in poly.iter_mut() {
    *p = cur.get_float()?;
  }
  debug!("Apply polynom curve half correction, split col: {}", geo.split_col);
  poly[3] += (temperature - poly[7]) * poly[6] + 1.0;

  let mut curve = vec![0_u16; 0x10000];
  for (i, x) in curve.iter_mut().enumerate() {
    let num = (poly[5] * i as f32 + poly[3]) * i as f32 + poly[1];
    *x = clamp(num as i32, 0, 0xffff) as u16;
  }
  apply_curve(pixels, geo, &curve, geo.split_col, cancel)
}

/// Polynom curve for the full sensor.
pub(super) fn poly_full(cur: &mut DataCursor, pixels: &mut [u16], geo: &Geometry, cancel: &CancelToken) -> Replay<()> {
  let mut poly = [0.0_f32; 4];
  for p in poly.iter_mut() {
    *p = cur.get_float()?;
  }
  debug!("Apply polynom curve full correction");
  let mut curve = vec![0_u16; 0x10000];
  for (i, x) in curve.iter_mut().enumerate() {
    let mut num = 0.0;
    for p in poly.iter().rev() {
      num = num * i as f32 + *p;
    }
    *x = clamp((num + i as f32) as i32, 0, 0xffff) as u16;
  }
  apply_curve(pixels, geo, &curve, 0, cancel)
}

fn apply_curve(pixels: &mut [u16], geo: &Geometry, curve: &[u16], start_col: usize, cancel: &CancelToken) -> Replay<()> {
  if geo.width == 0 {
    return Ok(());
  }
  pixels.par_chunks_mut(geo.width).try_for_each(|row| {
    checkpoint(cancel)?;
    for pix in row.iter_mut().skip(start_col) {
      *pix = curve[*pix as usize];
    }
    Ok(())
  })
}

#[cfg(test)]
mod tests {
  use super::super::tests::{floats, gradient, stream};
  use super::super::{CorrectionParams, correct};
  use crate::bits::Endian;
  use crate::cancel::CancelToken;

  #[test]
  fn half_curve_only_right_of_split() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let e = Endian::Little;
    let mut img = gradient(8, 4);
    img.layout.split_col = 4;
    img.layout.sensor_temperature = 30.0;
    let before = img.pixels.clone();
    // p1 = 5, p3 = -1 + (30 - 20) * 0.1 + 1 = 1
    let mut payload = vec![0; 4];
    payload.extend(floats(e, &[0.0, 5.0, 0.0, -1.0, 0.0, 0.0, 0.1, 20.0]));
    let cal = stream(e, &[(0x419, payload)]);
    assert!(correct(&mut img, &cal, &CorrectionParams::default(), &CancelToken::new())?.is_completed());
    for (row, (a, b)) in img.pixels.pixel_rows().zip(before.pixel_rows()).enumerate() {
      assert_eq!(&a[..4], &b[..4], "row {}", row);
      assert!(a[4..].iter().zip(&b[4..]).all(|(x, y)| (*x as i32 - (*y as i32 + 5)).abs() <= 1));
    }
    Ok(())
  }

  #[test]
  fn full_curve_clamps() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let e = Endian::Big;
    let mut img = gradient(4, 4);
    let cal = stream(e, &[(0x41a, floats(e, &[70000.0, 0.0, 0.0, 0.0]))]);
    correct(&mut img, &cal, &CorrectionParams::default(), &CancelToken::new())?;
    assert!(img.pixels.pixels().iter().all(|p| *p == 0xffff));
    Ok(())
  }
}
