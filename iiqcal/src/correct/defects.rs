// SPDX-License-Identifier: LGPL-2.1

use log::debug;
use rayon::prelude::*;

use super::{Geometry, Replay, checkpoint};
use crate::cancel::CancelToken;
use crate::cfa::Channel;
use crate::formats::cursor::DataCursor;
use crate::tags::DefectType;

/// Neighbours of a bad pixel as `(row, col)` offsets. Green pixels use
/// the first 8 entries, red and blue pixels the last 8.
const PIXEL_DIRS: [(isize, isize); 12] = [
  (-1, -1),
  (-1, 1),
  (1, -1),
  (1, 1),
  (-2, 0),
  (0, -2),
  (0, 2),
  (2, 0),
  (-2, -2),
  (-2, 2),
  (2, -2),
  (2, 2),
];

/// Averaging sets for pixels in clustered bad columns, tried in order.
/// None of them touches the bad column itself.
const AVG_SETS: [&[(isize, isize)]; 3] = [
  &[(-2, -2), (-2, 2), (2, -2), (2, 2)],
  &[(-2, -4), (-4, -2), (2, -4), (4, -2), (-2, 4), (-4, 2), (2, 4), (4, 2)],
  &[(-4, -4), (-4, 4), (4, -4), (4, 4)],
];

/// Gradient prediction sets for pixels in isolated bad columns. The first
/// pair forms the estimate, all six pairs the gradient.
const GRAD_SETS: [[(isize, isize); 12]; 7] = [
  [(-4, -2), (4, 2), (-3, -1), (1, 1), (-1, -1), (3, 1), (-4, -1), (0, 1), (-2, -1), (2, 1), (0, -1), (4, 1)],
  [(-2, -2), (2, 2), (-3, -1), (-1, 1), (-1, -1), (1, 1), (1, -1), (3, 1), (-2, -1), (0, 1), (0, -1), (2, 1)],
  [(-2, -4), (2, 4), (-1, -3), (1, 1), (-1, -1), (1, 3), (-2, -1), (0, 3), (-1, -2), (1, 2), (0, -3), (2, 1)],
  [(0, -2), (0, 2), (-1, -1), (-1, 1), (1, -1), (1, 1), (-1, -2), (-1, 2), (0, -1), (0, -1), (1, -2), (1, 2)],
  [(-2, 4), (2, -4), (-1, 3), (1, -1), (-1, 1), (1, -3), (-2, 1), (0, -3), (-1, 2), (1, -2), (0, 3), (2, -1)],
  [(-2, 2), (2, -2), (-3, 1), (-1, -1), (-1, 1), (1, -1), (1, 1), (3, -1), (-2, 1), (0, -1), (0, 1), (2, -1)],
  [(-4, 2), (4, -2), (-3, 1), (1, -1), (-1, 1), (3, -1), (-4, 1), (0, -1), (-2, 1), (2, -1), (0, 1), (4, -1)],
];

/// Pixel at an offset from `(row, col)`, `None` outside the sensor.
#[inline(always)]
fn neighbour(pixels: &[u16], geo: &Geometry, row: usize, col: usize, (dr, dc): (isize, isize)) -> Option<u16> {
  let r = row.checked_add_signed(dr).filter(|r| *r < geo.height)?;
  let c = col.checked_add_signed(dc).filter(|c| *c < geo.width)?;
  Some(pixels[r * geo.width + c])
}

/// Average of the in-bounds neighbours from `dirs`.
fn average(pixels: &[u16], geo: &Geometry, row: usize, col: usize, dirs: &[(isize, isize)]) -> Option<u16> {
  let (sum, count) = dirs
    .iter()
    .filter_map(|d| neighbour(pixels, geo, row, col, *d))
    .fold((0_u32, 0_u32), |(sum, count), v| (sum + v as u32, count + 1));
  if count > 0 { Some(((sum + (count >> 1)) / count) as u16) } else { None }
}

/// Read the defect list, fix single pixels right away and collect bad
/// columns for [`repair_columns`].
pub(super) fn read_defects(cur: &mut DataCursor, len: u32, pixels: &mut [u16], geo: &Geometry, bad_cols: &mut Vec<u16>) -> Replay<()> {
  let mut remaining = len as i64;
  let mut fixed = 0;
  while remaining >= 8 {
    remaining -= 8;
    let col = cur.get16()?;
    let row = cur.get16()?;
    let typ = cur.get16()?;
    cur.get16()?;
    if col as usize >= geo.width {
      continue;
    }
    if DefectType::is_repaired_column(typ) {
      bad_cols.push(col);
    } else if typ == DefectType::Pixel as u16 {
      let (row, col) = (row as usize, col as usize);
      if row >= geo.height {
        continue;
      }
      let start = if matches!(geo.channel(row, col), Channel::Green | Channel::Green2) { 0 } else { 4 };
      if let Some(v) = average(pixels, geo, row, col, &PIXEL_DIRS[start..start + 8]) {
        pixels[row * geo.width + col] = v;
        fixed += 1;
      }
    }
  }
  debug!("Fixed {} bad pixels, {} bad columns pending", fixed, bad_cols.len());
  Ok(())
}

/// Estimate a pixel of an isolated bad column from the neighbour
/// directions with the smallest gradients.
fn fix_pixel_grad(pixels: &[u16], geo: &Geometry, row: usize, col: usize) -> u16 {
  let p = |d: (isize, isize)| neighbour(pixels, geo, row, col, d).unwrap_or(0) as u32;
  let (left, right) = (p((0, -2)), p((0, 2)));
  let (lower, upper) = (left.min(right), left.max(right));

  let mut est = [0_u32; 7];
  let mut grad = [0_u32; 7];
  for (i, set) in GRAD_SETS.iter().enumerate() {
    est[i] = p(set[0]) + p(set[1]);
    grad[i] = set.chunks_exact(2).map(|pair| p(pair[0]).abs_diff(p(pair[1]))).sum();
  }
  let min_grad = grad.iter().copied().min().unwrap_or(0);
  let limit = (min_grad * 3) >> 1;
  let (total, count) = est
    .iter()
    .zip(grad.iter())
    .filter(|(_, g)| **g <= limit)
    .fold((0_u32, 0_u32), |(total, count), (e, _)| (total + e, count + 2));
  if count == 0 {
    return pixels[row * geo.width + col];
  }
  ((total + (count >> 1)) / count).clamp(lower, upper) as u16
}

/// Average a pixel of a clustered bad column from the first set with
/// any pixel inside the sensor.
fn fix_col_pixel_avg(pixels: &[u16], geo: &Geometry, row: usize, col: usize) -> u16 {
  AVG_SETS
    .iter()
    .find_map(|set| average(pixels, geo, row, col, set))
    .unwrap_or(pixels[row * geo.width + col])
}

/// Repair all collected bad columns. Columns more than 4 apart from both
/// neighbours use gradient prediction, clustered columns plain averaging.
pub(super) fn repair_columns(pixels: &mut [u16], geo: &Geometry, bad_cols: &mut Vec<u16>, cancel: &CancelToken) -> Replay<()> {
  if bad_cols.is_empty() {
    return Ok(());
  }
  bad_cols.sort_unstable();
  bad_cols.dedup();
  debug!("Repair bad columns: {:?}", bad_cols);

  let mut prev_isolated = true;
  for (i, col) in bad_cols.iter().enumerate() {
    checkpoint(cancel)?;
    let col = *col as usize;
    let next_isolated = bad_cols.get(i + 1).is_none_or(|next| *next as usize > col + 4);
    let isolated = prev_isolated && next_isolated;
    let view: &[u16] = pixels;
    let values: Vec<u16> = (0..geo.height)
      .into_par_iter()
      .map(|row| {
        if isolated {
          fix_pixel_grad(view, geo, row, col)
        } else {
          fix_col_pixel_avg(view, geo, row, col)
        }
      })
      .collect();
    for (row, v) in values.into_iter().enumerate() {
      pixels[row * geo.width + col] = v;
    }
    prev_isolated = next_isolated;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::super::tests::stream;
  use super::super::{CorrectionParams, correct};
  use crate::bits::Endian;
  use crate::cancel::CancelToken;
  use crate::cfa::CfaPattern;
  use crate::formats::calib::DefectEntry;
  use crate::pixarray::PixU16;
  use crate::rawimage::RawImage;

  fn defect_stream(entries: &[DefectEntry]) -> Vec<u8> {
    let e = Endian::Little;
    let mut payload = Vec::new();
    entries.iter().for_each(|d| d.write(e, &mut payload));
    stream(e, &[(0x400, payload)])
  }

  /// Flat image with a brighter row 5.
  fn striped() -> RawImage {
    let data = (0..16 * 10).map(|i| if i / 16 == 5 { 2000 } else { 1000 }).collect();
    RawImage::new(PixU16::new_with(data, 16, 10), CfaPattern::default())
  }

  fn repaired_row5(cols: &[u16]) -> Result<Vec<u16>, Box<dyn std::error::Error>> {
    let mut img = striped();
    for col in cols {
      *img.pixels.at_mut(5, *col as usize) = 0;
    }
    let entries: Vec<DefectEntry> = cols.iter().map(|c| DefectEntry::column(*c)).collect();
    assert!(correct(&mut img, &defect_stream(&entries), &CorrectionParams::default(), &CancelToken::new())?.is_completed());
    Ok(cols.iter().map(|c| *img.pixels.at(5, *c as usize)).collect())
  }

  #[test]
  fn isolated_columns_use_gradient() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    assert_eq!(repaired_row5(&[4, 9])?, vec![2000, 2000]);
    Ok(())
  }

  #[test]
  fn close_columns_use_averaging() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    assert_eq!(repaired_row5(&[4, 7])?, vec![1000, 1000]);
    assert_eq!(repaired_row5(&[4, 8])?, vec![1000, 1000]);
    Ok(())
  }

  #[test]
  fn duplicate_columns_stay_isolated() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let mut img = striped();
    let entries = [DefectEntry::column(4), DefectEntry { col: 4, row: 0, typ: 137, extra: 0 }];
    correct(&mut img, &defect_stream(&entries), &CorrectionParams::default(), &CancelToken::new())?;
    assert_eq!(*img.pixels.at(5, 4), 2000);
    Ok(())
  }

  #[test]
  fn only_primary_column_codes_are_repaired() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let mut img = striped();
    *img.pixels.at_mut(5, 4) = 0;
    *img.pixels.at_mut(5, 9) = 0;
    let entries = [DefectEntry { col: 4, row: 0, typ: 138, extra: 0 }, DefectEntry { col: 9, row: 0, typ: 140, extra: 0 }];
    correct(&mut img, &defect_stream(&entries), &CorrectionParams::default(), &CancelToken::new())?;
    assert_eq!(*img.pixels.at(5, 4), 0);
    assert_eq!(*img.pixels.at(5, 9), 0);
    Ok(())
  }

  #[test]
  fn gradient_column_is_interpolated() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let data = (0..12 * 12).map(|i| if i % 12 == 5 { 0 } else { 1000 + (i % 12) as u16 * 10 }).collect();
    let mut img = RawImage::new(PixU16::new_with(data, 12, 12), CfaPattern::default());
    correct(&mut img, &defect_stream(&[DefectEntry::column(5)]), &CorrectionParams::default(), &CancelToken::new())?;
    for row in 0..12 {
      let v = *img.pixels.at(row, 5);
      assert!((1030..=1070).contains(&v), "row {}: {}", row, v);
      if (4..8).contains(&row) {
        assert_eq!(v, 1050);
      }
    }
    Ok(())
  }

  #[test]
  fn bad_pixels_use_inbound_neighbours() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let data = (0..8 * 8).map(|i| ((i / 8) * 100 + i % 8) as u16).collect();
    let mut img = RawImage::new(PixU16::new_with(data, 8, 8), CfaPattern::default());
    *img.pixels.at_mut(4, 4) = 9999;
    let entries = [
      DefectEntry::pixel(0, 0),
      DefectEntry::pixel(4, 4),
      DefectEntry::pixel(100, 1),
      DefectEntry::pixel(1, 100),
    ];
    correct(&mut img, &defect_stream(&entries), &CorrectionParams::default(), &CancelToken::new())?;
    // Red corner pixel: (0,2), (2,0) and (2,2) are inside
    assert_eq!(*img.pixels.at(0, 0), (2 + 200 + 202 + 1) / 3);
    assert_eq!(*img.pixels.at(4, 4), 404);

    let mut img = striped();
    *img.pixels.at_mut(5, 5) = 0;
    let params = CorrectionParams {
      apply_defects: false,
      ..Default::default()
    };
    correct(&mut img, &defect_stream(&[DefectEntry::pixel(5, 5)]), &params, &CancelToken::new())?;
    assert_eq!(*img.pixels.at(5, 5), 0);
    Ok(())
  }
}
