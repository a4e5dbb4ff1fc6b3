// SPDX-License-Identifier: LGPL-2.1

use log::debug;

use super::{Geometry, Replay, checkpoint};
use crate::bits::clamp;
use crate::cancel::CancelToken;
use crate::formats::cursor::DataCursor;

/// Encoding of a flat field tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct FlatKind {
  /// Gain nodes are floats instead of 1/32768 fixed point shorts
  pub is_float: bool,
  /// Number of interleaved node and delta planes
  pub nc: usize,
}

impl FlatKind {
  pub const FLOAT_LUMA: Self = Self { is_float: true, nc: 2 };
  pub const LUMA: Self = Self { is_float: false, nc: 2 };
  pub const CHROMA: Self = Self { is_float: false, nc: 4 };
}

/// Apply flat field correction.
///
/// The payload starts with 8 shorts `{left, top, width, height, step_x,
/// step_y, ..}` followed by the gain nodes, one row of nodes per `step_y`
/// pixel rows. Gains between the nodes are interpolated bilinearly. Luma
/// fields scale every pixel, chroma fields hold a red and a blue plane.
pub(super) fn flat_field(cur: &mut DataCursor, pixels: &mut [u16], geo: &Geometry, kind: FlatKind, cancel: &CancelToken) -> Replay<()> {
  let nc = kind.nc;
  let head: Vec<i64> = cur.get_shorts(8)?.into_iter().map(i64::from).collect();
  debug!("Apply flat field correction {:?}, head: {:?}", kind, head);
  if head[2..6].contains(&0) {
    return Ok(());
  }
  let wide = ((head[2] + head[4] - 1) / head[4]) as usize;
  let high = ((head[3] + head[5] - 1) / head[5]) as usize;
  let (width, height) = (geo.width as i64, geo.height as i64);
  let row_limit = head[1] + head[3] - head[5];
  let col_limit = head[0] + head[2] - head[4];

  let mut mrow = vec![0.0_f32; nc * wide];
  let mut mult = [0.0_f32; 4]; // One multiplier per color (R=0, G1=1, ...)

  for y in 0..high {
    checkpoint(cancel)?;
    for x in 0..wide {
      for c in (0..nc).step_by(2) {
        let num = if kind.is_float { cur.get_float()? } else { cur.get16()? as f32 / 32768.0 };
        if y == 0 {
          mrow[c * wide + x] = num;
        } else {
          mrow[(c + 1) * wide + x] = (num - mrow[c * wide + x]) / head[5] as f32;
        }
      }
    }
    if y == 0 {
      continue;
    }
    let rend = head[1] + y as i64 * head[5];
    let mut row = rend - head[5];
    while row < height && row < rend && row < row_limit {
      for x in 1..wide {
        for c in (0..nc).step_by(2) {
          mult[c] = mrow[c * wide + x - 1];
          mult[c + 1] = (mrow[c * wide + x] - mult[c]) / head[4] as f32;
        }
        let cend = head[0] + x as i64 * head[4];
        let mut col = cend - head[4];
        while col < width && col < cend && col < col_limit {
          let color = if nc > 2 { geo.channel(row as usize, col as usize).index() } else { 0 };
          // This matches for R (0) and B (2), not for G1 (1) and G2 (3)
          if color & 1 == 0 {
            let idx = row as usize * geo.width + col as usize;
            let pix = pixels[idx] as f32 * mult[color];
            pixels[idx] = clamp(pix as i32, 0, 65535) as u16;
          }
          for c in (0..nc).step_by(2) {
            mult[c] += mult[c + 1];
          }
          col += 1;
        }
      }
      for x in 0..wide {
        for c in (0..nc).step_by(2) {
          mrow[c * wide + x] += mrow[(c + 1) * wide + x];
        }
      }
      row += 1;
    }
  }
  Ok(())
}
