// SPDX-License-Identifier: LGPL-2.1

//! Per quadrant corrections for sensors read out by four amplifiers.

use log::{debug, warn};
use rayon::prelude::*;

use super::{Geometry, Replay, checkpoint};
use crate::bits::clamp;
use crate::cancel::CancelToken;
use crate::formats::cursor::DataCursor;
use crate::imgop::Point;
use crate::imgop::spline::Spline;

/// Apply `op` to every pixel of quadrant `(qr, qc)`.
fn apply_quadrant<F>(pixels: &mut [u16], geo: &Geometry, qr: usize, qc: usize, cancel: &CancelToken, op: F) -> Replay<()>
where
  F: Fn(u16) -> u16 + Send + Sync,
{
  if geo.width == 0 {
    return Ok(());
  }
  let (rows, cols) = geo.quadrant(qr, qc);
  pixels
    .par_chunks_mut(geo.width)
    .skip(rows.start)
    .take(rows.len())
    .try_for_each(|line| {
      checkpoint(cancel)?;
      line[cols.clone()].iter_mut().for_each(|pix| *pix = op(*pix));
      Ok(())
    })
}

fn apply_spline(pixels: &mut [u16], geo: &Geometry, qr: usize, qc: usize, points: &[Point], cancel: &CancelToken) -> Replay<()> {
  match Spline::new(points) {
    Ok(spline) => {
      let curve = spline.calculate_curve();
      apply_quadrant(pixels, geo, qr, qc, cancel, |pix| curve[pix as usize])
    }
    Err(err) => {
      warn!("Quadrant {},{} curve skipped: {}", qr, qc, err);
      Ok(())
    }
  }
}

/// Apply quadrant linearization correction
pub(super) fn linearization(cur: &mut DataCursor, pixels: &mut [u16], geo: &Geometry, cancel: &CancelToken) -> Replay<()> {
  let mut lc = [[[0_usize; 16]; 2]; 2];
  for v in lc.iter_mut().flatten().flatten() {
    *v = cur.get32()? as u16 as usize;
  }
  debug!("Apply quadrant linearization, split col: {}, row: {}", geo.split_col, geo.split_row);

  let mut reference = [0_usize; 16];
  for (i, r) in reference.iter_mut().enumerate() {
    let v: usize = lc.iter().flatten().map(|q| q[i]).sum();
    *r = (v + 2) >> 2;
  }

  for qr in 0..2 {
    for qc in 0..2 {
      let q = &lc[qr][qc];
      let mut points = Vec::with_capacity(19);
      points.push(Point::new(0, 0));
      points.extend(q.iter().zip(reference.iter()).map(|(x, y)| Point::new(*x, *y)));
      // Some calibrations overflow 65535 here, clamp to stay below the end point
      let tail = if q[15] == 0 { 65535 } else { ((reference[15] * 65535) / q[15]).min(65535) };
      points.push(Point::new(tail, tail));
      points.push(Point::new(65535, 65535));
      apply_spline(pixels, geo, qr, qc, &points, cancel)?;
    }
  }
  Ok(())
}

/// Apply quadrant multipliers correction
pub(super) fn multipliers(cur: &mut DataCursor, pixels: &mut [u16], geo: &Geometry, cancel: &CancelToken) -> Replay<()> {
  let mut values = [0.0_f32; 19];
  for v in values.iter_mut() {
    *v = cur.get_float()?;
  }
  let qmul = [[1.0 + values[4], 1.0 + values[10]], [1.0 + values[14], 1.0 + values[18]]];
  debug!("Apply quadrant multipliers {:?}", qmul);

  for (qr, muls) in qmul.iter().enumerate() {
    for (qc, mul) in muls.iter().enumerate() {
      apply_quadrant(pixels, geo, qr, qc, cancel, |pix| clamp((mul * pix as f32) as i32, 0, 0xffff) as u16)?;
    }
  }
  Ok(())
}

/// Apply quadrant combined spline curve correction
pub(super) fn combined(cur: &mut DataCursor, pixels: &mut [u16], geo: &Geometry, cancel: &CancelToken) -> Replay<()> {
  let mut coord_x = [0_usize; 7];
  for x in coord_x.iter_mut() {
    *x = cur.get32()? as u16 as usize;
  }
  let mut coord_y = [[[0_usize; 7]; 2]; 2];
  for y in coord_y.iter_mut().flatten().flatten() {
    *y = cur.get32()? as u16 as usize;
  }
  debug!("Apply quadrant combined correction, split col: {}, row: {}", geo.split_col, geo.split_row);

  for qr in 0..2 {
    for qc in 0..2 {
      let mut points = Vec::with_capacity(9);
      points.push(Point::new(0, 0));
      points.extend(coord_x.iter().zip(coord_y[qr][qc].iter()).map(|(x, y)| Point::new(*x, (x * y) / 10_000)));
      points.push(Point::new(65535, 65535));
      apply_spline(pixels, geo, qr, qc, &points, cancel)?;
    }
  }
  Ok(())
}
