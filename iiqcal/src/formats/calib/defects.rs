// SPDX-License-Identifier: LGPL-2.1

use std::collections::BTreeSet;

use serde::Serialize;

use crate::bits::Endian;
use crate::tags::DefectType;

/// Size of a single on-disk defect record.
pub const DEFECT_ENTRY_SIZE: usize = 8;

/// One 8 byte record of the defect correction tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DefectEntry {
  pub col: u16,
  pub row: u16,
  pub typ: u16,
  pub extra: u16,
}

impl DefectEntry {
  pub fn read(endian: Endian, buf: &[u8], offset: usize) -> Self {
    Self {
      col: endian.read_u16(buf, offset),
      row: endian.read_u16(buf, offset + 2),
      typ: endian.read_u16(buf, offset + 4),
      extra: endian.read_u16(buf, offset + 6),
    }
  }

  pub fn write(&self, endian: Endian, buf: &mut Vec<u8>) {
    endian.push_u16(buf, self.col);
    endian.push_u16(buf, self.row);
    endian.push_u16(buf, self.typ);
    endian.push_u16(buf, self.extra);
  }

  pub fn pixel(col: u16, row: u16) -> Self {
    Self {
      col,
      row,
      typ: DefectType::Pixel.into(),
      extra: 0,
    }
  }

  pub fn column(col: u16) -> Self {
    Self {
      col,
      row: 0,
      typ: DefectType::Column.into(),
      extra: 0,
    }
  }
}

/// Iterate all complete defect records in a payload.
pub fn defect_entries(endian: Endian, payload: &[u8]) -> impl Iterator<Item = DefectEntry> + '_ {
  payload.chunks_exact(DEFECT_ENTRY_SIZE).map(move |chunk| DefectEntry::read(endian, chunk, 0))
}

/// Ordered, deduplicated bad pixels and bad columns of one sensor.
///
/// Pixels are keyed `(col, row)` so all pixels of a column are adjacent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefectSet {
  pixels: BTreeSet<(u16, u16)>,
  columns: BTreeSet<u16>,
}

impl DefectSet {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn pixels(&self) -> &BTreeSet<(u16, u16)> {
    &self.pixels
  }

  pub fn columns(&self) -> &BTreeSet<u16> {
    &self.columns
  }

  pub fn is_empty(&self) -> bool {
    self.pixels.is_empty() && self.columns.is_empty()
  }

  pub fn is_pixel(&self, col: u16, row: u16) -> bool {
    self.pixels.contains(&(col, row))
  }

  pub fn is_column(&self, col: u16) -> bool {
    self.columns.contains(&col)
  }

  /// Returns true if the pixel was not known before.
  pub fn add_pixel(&mut self, col: u16, row: u16) -> bool {
    self.pixels.insert((col, row))
  }

  pub fn add_column(&mut self, col: u16) -> bool {
    self.columns.insert(col)
  }

  /// Remove pixel defects. A negative `row` removes every pixel in `col`,
  /// a negative `col` removes all pixels. Returns true if anything was removed.
  pub fn remove_pixel(&mut self, col: i32, row: i32) -> bool {
    if col < 0 {
      let changed = !self.pixels.is_empty();
      self.pixels.clear();
      return changed;
    }
    let Ok(col) = u16::try_from(col) else {
      return false;
    };
    if row < 0 {
      let before = self.pixels.len();
      self.pixels.retain(|(c, _)| *c != col);
      return before != self.pixels.len();
    }
    match u16::try_from(row) {
      Ok(row) => self.pixels.remove(&(col, row)),
      Err(_) => false,
    }
  }

  /// Remove a bad column, or all columns if `col` is negative.
  pub fn remove_column(&mut self, col: i32) -> bool {
    if col < 0 {
      let changed = !self.columns.is_empty();
      self.columns.clear();
      return changed;
    }
    match u16::try_from(col) {
      Ok(col) => self.columns.remove(&col),
      Err(_) => false,
    }
  }

  /// Pixels not covered by a bad column.
  pub fn effective_pixels(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
    self.pixels.iter().copied().filter(|(col, _)| !self.columns.contains(col))
  }

  /// Drop pixel defects inside bad columns. Returns true on change.
  pub fn drop_subsumed_pixels(&mut self) -> bool {
    let mut changed = false;
    for col in self.columns.iter().copied().collect::<Vec<_>>() {
      changed |= self.remove_pixel(col as i32, -1);
    }
    changed
  }

  /// Route a parsed record into the matching set. Other types are ignored.
  pub(crate) fn insert_entry(&mut self, entry: &DefectEntry) {
    if DefectType::is_column(entry.typ) {
      self.columns.insert(entry.col);
    } else if DefectType::is_pixel(entry.typ) {
      self.pixels.insert((entry.col, entry.row));
    }
  }
}
