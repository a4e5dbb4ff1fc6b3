// SPDX-License-Identifier: LGPL-2.1

use log::debug;
use rayon::prelude::*;

use super::{Geometry, Replay, checkpoint};
use crate::bits::clamp;
use crate::cancel::CancelToken;
use crate::rawimage::BlackLevels;

/// Remove black level and adjust individual row/col black level per quadrant.
pub(crate) fn subtract_black(pixels: &mut [u16], geo: &Geometry, levels: &BlackLevels, cancel: &CancelToken) -> Replay<()> {
  debug!(
    "Subtract black level {}, {} row and {} column offsets",
    levels.black,
    levels.rows.len(),
    levels.cols.len()
  );
  if geo.width == 0 {
    return Ok(());
  }
  let black = levels.black as i32;
  let (split_col, split_row) = (geo.split_col, geo.split_row);
  let row_black = |idx: usize| levels.rows.get(idx).copied().unwrap_or(0) as i32;
  let col_black = |idx: usize| levels.cols.get(idx).copied().unwrap_or(0) as i32;

  pixels.par_chunks_mut(geo.width).enumerate().try_for_each(|(row, line)| {
    checkpoint(cancel)?;
    let qr = if row >= split_row { 1 } else { 0 };
    for (col, pix) in line.iter_mut().enumerate() {
      let qc = if col >= split_col { 1 } else { 0 };
      let x = *pix as i32 - black + row_black(row * 2 + qc) + col_black(col * 2 + qr);
      *pix = clamp(x, 0, 0xffff) as u16;
    }
    Ok(())
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cfa::CfaPattern;
  use crate::pixarray::PixU16;
  use crate::rawimage::{RawImage, SensorLayout};

  #[test]
  fn quadrant_offsets() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let layout = SensorLayout {
      split_col: 1,
      split_row: 1,
      ..SensorLayout::plain(2, 2)
    };
    let mut img = RawImage::with_layout(PixU16::new_with(vec![100, 100, 100, 5], 2, 2), layout, CfaPattern::default())?;
    let geo = Geometry::of(&img)?;
    let levels = BlackLevels {
      black: 10,
      rows: vec![1, 2, 3, 4],
      cols: vec![10, 20, 30, 40],
    };
    subtract_black(img.pixels.pixels_mut(), &geo, &levels, &CancelToken::new()).map_err(|r| format!("{:?}", r))?;
    // (0,0): 100-10+1+10, (0,1): 100-10+2+30, (1,0): 100-10+3+20, (1,1): 5-10+4+40
    assert_eq!(img.pixels.pixels(), &[101, 122, 113, 39]);
    Ok(())
  }
}
