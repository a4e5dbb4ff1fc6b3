// SPDX-License-Identifier: LGPL-2.1

//! Phase One calibration container.
//!
//! A calibration blob starts with a 12 byte header `{magic, version,
//! dir_offset}`. At `dir_offset` follows an entry count, 4 unused bytes
//! and the entries `{tag, size, data}`. An entry with size 0 stores its
//! value inline in the data field, otherwise the data field is an
//! offset into the blob.

use std::collections::BTreeSet;
use std::ops::Range;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::bits::Endian;
use crate::tags::CalTag;
use crate::{CalError, Result};

pub mod defects;
mod rebuild;
pub mod sensorplus;

pub use defects::{DefectEntry, DefectSet, defect_entries};

pub const HEADER_SIZE: usize = 12;
pub const ENTRY_SIZE: usize = 12;
/// Entry count plus 4 unused bytes.
pub const DIR_HEADER_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SensorVariant {
  Standard = 0,
  SensorPlus = 1,
}

impl SensorVariant {
  pub const ALL: [Self; 2] = [Self::Standard, Self::SensorPlus];

  pub fn index(self) -> usize {
    self as usize
  }

  pub fn other(self) -> Self {
    match self {
      Self::Standard => Self::SensorPlus,
      Self::SensorPlus => Self::Standard,
    }
  }
}

/// One resolved directory entry. Offsets index into the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagEntry {
  pub tag: u32,
  /// Size field as stored, 0 for inline values
  pub size: u32,
  /// Raw data field, inline value or payload offset
  pub value: u32,
  /// Offset of the entry itself
  pub entry_offset: usize,
}

impl TagEntry {
  pub fn is_inline(&self) -> bool {
    self.size == 0
  }

  pub fn payload_range(&self) -> Range<usize> {
    if self.is_inline() {
      let start = self.entry_offset + 8;
      start..start + 4
    } else {
      let start = self.value as usize;
      start..start.saturating_add(self.size as usize)
    }
  }

  /// Payload bytes, `None` if they lie outside the buffer.
  pub fn payload<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
    buf.get(self.payload_range())
  }
}

/// Parsed directory of a calibration blob.
#[derive(Debug, Clone)]
pub struct Directory {
  pub endian: Endian,
  pub offset: usize,
  pub entries: Vec<TagEntry>,
}

impl Directory {
  /// Read the header and directory. Returns `None` for a truncated
  /// buffer, unknown magic or a directory running past the end.
  pub fn read(buf: &[u8]) -> Option<Self> {
    if buf.len() < HEADER_SIZE {
      return None;
    }
    let endian = Endian::from_magic(buf)?;
    let offset = endian.read_u32(buf, 8) as usize;
    if buf.len() < offset.checked_add(DIR_HEADER_SIZE + ENTRY_SIZE)? {
      return None;
    }
    let count = endian.read_u32(buf, offset) as usize;
    let first = offset + DIR_HEADER_SIZE;
    if count.checked_mul(ENTRY_SIZE)?.checked_add(first)? > buf.len() {
      debug!("Calibration directory with {} entries exceeds buffer", count);
      return None;
    }
    let entries = (0..count)
      .map(|i| {
        let entry_offset = first + i * ENTRY_SIZE;
        TagEntry {
          tag: endian.read_u32(buf, entry_offset),
          size: endian.read_u32(buf, entry_offset + 4),
          value: endian.read_u32(buf, entry_offset + 8),
          entry_offset,
        }
      })
      .collect();
    Some(Self { endian, offset, entries })
  }
}

/// Calibration of one sensor readout mode.
#[derive(Debug, Clone, Default)]
pub struct CalibrationVariant {
  data: Vec<u8>,
  endian: Endian,
  tags: BTreeSet<u32>,
  serial: String,
  defects: DefectSet,
  dirty: bool,
}

impl CalibrationVariant {
  pub fn parse(data: Vec<u8>) -> Self {
    let mut variant = Self {
      data,
      ..Default::default()
    };
    variant.reparse();
    variant
  }

  /// Rebuild tag set, serial and defects from the stored blob.
  fn reparse(&mut self) {
    self.tags.clear();
    self.serial.clear();
    self.defects = DefectSet::new();
    self.dirty = false;

    let Some(dir) = Directory::read(&self.data) else {
      if !self.data.is_empty() {
        warn!("Calibration blob of {} bytes has no valid directory", self.data.len());
      }
      return;
    };
    self.endian = dir.endian;
    for entry in &dir.entries {
      self.tags.insert(entry.tag);
      let Some(payload) = entry.payload(&self.data) else {
        warn!(
          "Payload of calibration tag 0x{:x} ({} bytes at {}) exceeds buffer, skipped",
          entry.tag, entry.size, entry.value
        );
        continue;
      };
      if entry.tag == CalTag::SerialNumber as u32 {
        let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
        self.serial = String::from_utf8_lossy(&payload[..end]).into_owned();
      } else if entry.tag == CalTag::DefectCorrection as u32 {
        defect_entries(dir.endian, payload).for_each(|e| self.defects.insert_entry(&e));
      }
    }
    debug!(
      "Parsed calibration {}: {} tags, {} bad pixels, {} bad columns",
      self.serial,
      self.tags.len(),
      self.defects.pixels().len(),
      self.defects.columns().len()
    );
  }

  pub fn is_valid(&self) -> bool {
    !self.tags.is_empty()
  }

  pub fn is_dirty(&self) -> bool {
    self.dirty
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn endian(&self) -> Endian {
    self.endian
  }

  pub fn tags(&self) -> &BTreeSet<u32> {
    &self.tags
  }

  pub fn serial(&self) -> &str {
    &self.serial
  }

  pub fn defects(&self) -> &DefectSet {
    &self.defects
  }

  /// Directory entries of the stored blob, for inspection.
  pub fn entries(&self) -> Vec<TagEntry> {
    Directory::read(&self.data).map(|dir| dir.entries).unwrap_or_default()
  }

  /// Serialize the current defect sets into a new blob.
  pub fn rebuild(&self, timestamp: u32) -> Result<Vec<u8>> {
    rebuild::rebuild(&self.data, &self.defects, timestamp)
  }

  fn mark(&mut self, changed: bool) -> bool {
    self.dirty |= changed;
    changed
  }

  /// Replace the blob after a successful write.
  fn commit(&mut self, data: Vec<u8>) {
    self.data = data;
    self.reparse();
  }
}

/// Calibration file with up to two sensor variants.
#[derive(Debug, Clone, Default)]
pub struct CalibrationFile {
  variants: [CalibrationVariant; 2],
  serial: String,
  endian: Endian,
  sensor_plus: bool,
  path: Option<PathBuf>,
}

/// Containers are equal if they belong to the same camera body.
impl PartialEq for CalibrationFile {
  fn eq(&self, other: &Self) -> bool {
    self.serial == other.serial
  }
}

impl CalibrationFile {
  pub fn new() -> Self {
    Self::default()
  }

  /// Parse a calibration blob. Never fails, check [`Self::is_valid`].
  pub fn from_bytes(data: &[u8]) -> Self {
    let mut cal = Self::default();
    match sensorplus::detect(data) {
      Some(layout) => {
        cal.sensor_plus = true;
        for variant in SensorVariant::ALL {
          if let Some(range) = &layout.blobs[variant.index()] {
            cal.variants[variant.index()] = CalibrationVariant::parse(data[range.clone()].to_vec());
          }
        }
      }
      None => {
        cal.variants[SensorVariant::Standard.index()] = CalibrationVariant::parse(data.to_vec());
      }
    }
    cal.update_identity();
    cal
  }

  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
    let data = std::fs::read(path.as_ref())?;
    let mut cal = Self::from_bytes(&data);
    cal.path = Some(path.as_ref().to_path_buf());
    Ok(cal)
  }

  fn update_identity(&mut self) {
    if let Some(first) = self.variants.iter().find(|v| v.is_valid()) {
      self.serial = first.serial.clone();
      self.endian = first.endian;
    }
    if self.variants.iter().all(|v| v.is_valid()) && self.variants[0].serial != self.variants[1].serial {
      warn!(
        "Sensor+ variants disagree on serial: '{}' vs '{}'",
        self.variants[0].serial, self.variants[1].serial
      );
    }
  }

  pub fn serial(&self) -> &str {
    &self.serial
  }

  pub fn endian(&self) -> Endian {
    self.endian
  }

  pub fn path(&self) -> Option<&Path> {
    self.path.as_deref()
  }

  pub fn set_path<P: AsRef<Path>>(&mut self, path: P) {
    self.path = Some(path.as_ref().to_path_buf());
  }

  pub fn has_sensor_plus(&self) -> bool {
    self.sensor_plus
  }

  pub fn variant(&self, variant: SensorVariant) -> &CalibrationVariant {
    &self.variants[variant.index()]
  }

  pub fn is_variant_valid(&self, variant: SensorVariant) -> bool {
    self.variant(variant).is_valid()
  }

  /// At least one variant was parsed.
  pub fn is_valid(&self) -> bool {
    self.variants.iter().any(|v| v.is_valid())
  }

  /// Both sensor variants are present.
  pub fn is_fully_valid(&self) -> bool {
    self.variants.iter().all(|v| v.is_valid())
  }

  pub fn has_unsaved_changes(&self) -> bool {
    self.variants.iter().any(|v| v.is_dirty())
  }

  pub fn defects(&self, variant: SensorVariant) -> &DefectSet {
    &self.variant(variant).defects
  }

  /// Raw directory entries of `variant` with their payload bytes.
  pub fn tags(&self, variant: SensorVariant) -> impl Iterator<Item = (TagEntry, Option<&[u8]>)> + '_ {
    let v = self.variant(variant);
    v.entries().into_iter().map(move |entry| (entry, entry.payload(&v.data)))
  }

  pub fn is_pixel(&self, variant: SensorVariant, col: u16, row: u16) -> bool {
    self.defects(variant).is_pixel(col, row)
  }

  pub fn is_column(&self, variant: SensorVariant, col: u16) -> bool {
    self.defects(variant).is_column(col)
  }

  fn editable(&mut self, variant: SensorVariant) -> Option<&mut CalibrationVariant> {
    let v = &mut self.variants[variant.index()];
    if v.is_valid() { Some(v) } else { None }
  }

  pub fn add_pixel(&mut self, variant: SensorVariant, col: u16, row: u16) -> bool {
    self.editable(variant).is_some_and(|v| {
      let changed = v.defects.add_pixel(col, row);
      v.mark(changed)
    })
  }

  /// Add several pixels, returns the number of new defects.
  pub fn add_pixels<I: IntoIterator<Item = (u16, u16)>>(&mut self, variant: SensorVariant, pixels: I) -> usize {
    pixels.into_iter().filter(|(col, row)| self.add_pixel(variant, *col, *row)).count()
  }

  pub fn add_column(&mut self, variant: SensorVariant, col: u16) -> bool {
    self.editable(variant).is_some_and(|v| {
      let changed = v.defects.add_column(col);
      v.mark(changed)
    })
  }

  /// See [`DefectSet::remove_pixel`] for the meaning of negative values.
  pub fn remove_pixel(&mut self, variant: SensorVariant, col: i32, row: i32) -> bool {
    self.editable(variant).is_some_and(|v| {
      let changed = v.defects.remove_pixel(col, row);
      v.mark(changed)
    })
  }

  pub fn remove_column(&mut self, variant: SensorVariant, col: i32) -> bool {
    self.editable(variant).is_some_and(|v| {
      let changed = v.defects.remove_column(col);
      v.mark(changed)
    })
  }

  /// Discard unsaved edits.
  pub fn reset(&mut self) {
    self.variants.iter_mut().for_each(|v| v.reparse());
  }

  /// Blob the correction engine should replay for `variant`.
  pub fn correction_data(&self, variant: SensorVariant, apply_defects: bool) -> Result<Vec<u8>> {
    let v = self.variant(variant);
    if !v.is_valid() {
      return Err(CalError::InvalidFormat(format!("{:?} calibration is not available", variant)));
    }
    if apply_defects && v.is_dirty() {
      v.rebuild(now_timestamp())
    } else {
      Ok(v.data.clone())
    }
  }

  fn serialize(&self, timestamp: u32) -> Result<([Option<Vec<u8>>; 2], Vec<u8>)> {
    let mut rebuilt = [None, None];
    for variant in SensorVariant::ALL {
      let v = self.variant(variant);
      if v.is_valid() && v.is_dirty() {
        rebuilt[variant.index()] = Some(v.rebuild(timestamp)?);
      }
    }
    let out = if self.sensor_plus {
      let blobs = [
        self.blob_for(&rebuilt, SensorVariant::Standard),
        self.blob_for(&rebuilt, SensorVariant::SensorPlus),
      ];
      sensorplus::compose(self.endian, blobs, timestamp)
    } else {
      self.blob_for(&rebuilt, SensorVariant::Standard).map(<[u8]>::to_vec).unwrap_or_default()
    };
    Ok((rebuilt, out))
  }

  fn blob_for<'a>(&'a self, rebuilt: &'a [Option<Vec<u8>>; 2], variant: SensorVariant) -> Option<&'a [u8]> {
    let v = self.variant(variant);
    if !v.is_valid() {
      return None;
    }
    Some(rebuilt[variant.index()].as_deref().unwrap_or(&v.data[..]))
  }

  /// Complete file image including Sensor+ footer.
  pub fn to_bytes(&self) -> Result<Vec<u8>> {
    if !self.is_valid() {
      return Err(CalError::InvalidFormat("Calibration is not valid".into()));
    }
    Ok(self.serialize(now_timestamp())?.1)
  }

  /// Write the file image to `path` regardless of pending changes.
  pub fn write_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
    std::fs::write(path.as_ref(), self.to_bytes()?)?;
    info!("Calibration {} written to {}", self.serial, path.as_ref().display());
    Ok(())
  }

  /// Save pending changes back to the file this calibration was loaded from.
  ///
  /// Returns `Ok(false)` without touching the file if there is nothing to
  /// save or no path is known.
  pub fn save(&mut self) -> Result<bool> {
    if !self.is_valid() || !self.has_unsaved_changes() {
      return Ok(false);
    }
    let Some(path) = self.path.clone() else {
      warn!("Calibration {} has no file path, not saved", self.serial);
      return Ok(false);
    };
    for v in self.variants.iter_mut().filter(|v| v.is_valid()) {
      let changed = v.defects.drop_subsumed_pixels();
      v.mark(changed);
    }
    let (rebuilt, out) = self.serialize(now_timestamp())?;
    std::fs::write(&path, &out)?;
    for (v, data) in self.variants.iter_mut().zip(rebuilt) {
      if let Some(data) = data {
        v.commit(data);
      }
    }
    info!("Calibration {} saved to {}", self.serial, path.display());
    Ok(true)
  }

  /// Two Sensor+ calibrations of the same body, each holding the
  /// variant the other lacks.
  pub fn is_mergeable(&self, other: &Self) -> bool {
    if self.serial != other.serial || !self.sensor_plus || !other.sensor_plus {
      return false;
    }
    let only = |cal: &Self| -> Option<SensorVariant> {
      match (cal.is_variant_valid(SensorVariant::Standard), cal.is_variant_valid(SensorVariant::SensorPlus)) {
        (true, false) => Some(SensorVariant::Standard),
        (false, true) => Some(SensorVariant::SensorPlus),
        _ => None,
      }
    };
    matches!((only(self), only(other)), (Some(a), Some(b)) if a.other() == b)
  }

  /// Take over the variant `other` provides. Returns false and leaves
  /// both containers untouched if they are not mergeable.
  pub fn merge(&mut self, mut other: Self) -> bool {
    if !self.is_mergeable(&other) {
      warn!("Calibrations '{}' and '{}' can not be merged", self.serial, other.serial);
      return false;
    }
    let Some(variant) = SensorVariant::ALL.into_iter().find(|v| other.is_variant_valid(*v)) else {
      return false;
    };
    self.swap_variant(&mut other, variant);
    self.variants[variant.index()].dirty = true;
    debug!("Merged {:?} calibration into {}", variant, self.serial);
    true
  }

  /// Exchange one variant with another container of the same body.
  pub fn swap_variant(&mut self, other: &mut Self, variant: SensorVariant) -> bool {
    if self.serial != other.serial {
      return false;
    }
    std::mem::swap(&mut self.variants[variant.index()], &mut other.variants[variant.index()]);
    self.update_identity();
    other.update_identity();
    true
  }
}

pub(crate) fn now_timestamp() -> u32 {
  chrono::Utc::now().timestamp() as u32
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Little-endian blob with a serial and the given defect records.
  fn blob(serial: &str, defects: &[DefectEntry]) -> Vec<u8> {
    let e = Endian::Little;
    let mut buf = b"IIII".to_vec();
    e.push_u32(&mut buf, 1);
    e.push_u32(&mut buf, 0);
    let serial_pos = buf.len();
    buf.extend_from_slice(serial.as_bytes());
    buf.push(0);
    while buf.len() % 4 != 0 {
      buf.push(0);
    }
    let defect_pos = buf.len();
    defects.iter().for_each(|d| d.write(e, &mut buf));
    let dir = buf.len();
    e.write_u32(&mut buf, 8, dir as u32);
    e.push_u32(&mut buf, 3);
    e.push_u32(&mut buf, 0);
    for (tag, size, value) in [
      (0x407, serial.len() as u32 + 1, serial_pos as u32),
      (0x400, (defects.len() * 8) as u32, defect_pos as u32),
      (0x402, 0, 1_600_000_000),
    ] {
      e.push_u32(&mut buf, tag);
      e.push_u32(&mut buf, size);
      e.push_u32(&mut buf, value);
    }
    buf
  }

  #[test]
  fn parse_routes_defects() {
    crate::init_test_logger();
    let data = blob("EF012345", &[DefectEntry::column(100), DefectEntry::pixel(5, 6), DefectEntry { col: 1, row: 1, typ: 139, extra: 0 }]);
    let cal = CalibrationFile::from_bytes(&data);
    assert!(cal.is_valid());
    assert!(!cal.is_fully_valid());
    assert!(!cal.has_sensor_plus());
    assert_eq!(cal.serial(), "EF012345");
    assert!(cal.is_column(SensorVariant::Standard, 100));
    assert!(cal.is_pixel(SensorVariant::Standard, 5, 6));
    assert!(!cal.is_pixel(SensorVariant::Standard, 1, 1));
    assert_eq!(cal.variant(SensorVariant::Standard).tags().len(), 3);
  }

  #[test]
  fn out_of_range_payload_skips_only_its_entry() {
    crate::init_test_logger();
    let mut data = blob("EF000001", &[DefectEntry::column(3)]);
    let e = Endian::Little;
    let dir = e.read_u32(&data, 8) as usize;
    let len = data.len() as u32;
    // value field of the defect entry, the second one
    e.write_u32(&mut data, dir + DIR_HEADER_SIZE + ENTRY_SIZE + 8, len);
    let cal = CalibrationFile::from_bytes(&data);
    assert!(cal.is_valid());
    assert_eq!(cal.serial(), "EF000001");
    assert!(cal.defects(SensorVariant::Standard).columns().is_empty());
    assert!(cal.variant(SensorVariant::Standard).tags().contains(&0x402));
  }

  #[test]
  fn short_buffers_are_invalid() {
    assert!(!CalibrationFile::from_bytes(&[]).is_valid());
    assert!(!CalibrationFile::from_bytes(b"IIII\x01\0\0\0").is_valid());
    let mut data = blob("X", &[]);
    // directory count far beyond the buffer
    let dir = Endian::Little.read_u32(&data, 8) as usize;
    Endian::Little.write_u32(&mut data, dir, 1000);
    assert!(!CalibrationFile::from_bytes(&data).is_valid());
  }

  #[test]
  fn edits_mark_dirty() {
    let mut cal = CalibrationFile::from_bytes(&blob("S1", &[]));
    assert!(!cal.has_unsaved_changes());
    assert!(cal.add_column(SensorVariant::Standard, 3));
    assert!(cal.has_unsaved_changes());
    cal.reset();
    assert!(!cal.has_unsaved_changes());
    assert!(!cal.is_column(SensorVariant::Standard, 3));
    // the missing variant is not editable
    assert!(!cal.add_pixel(SensorVariant::SensorPlus, 1, 1));
  }

  #[test]
  fn equality_by_serial() {
    let a = CalibrationFile::from_bytes(&blob("S1", &[DefectEntry::column(1)]));
    let b = CalibrationFile::from_bytes(&blob("S1", &[]));
    let c = CalibrationFile::from_bytes(&blob("S2", &[]));
    assert!(a == b);
    assert!(a != c);
  }
}
