// SPDX-License-Identifier: LGPL-2.1

//! IIQ raw file container.
//!
//! An IIQ file is a classic TIFF file. The EXIF directory holds a
//! MakerNote that starts straight after the 8 byte TIFF header. The
//! MakerNote has its own header `{magic, raw_magic, dir_offset}` and a
//! directory of 16 byte entries `{tag, type, size, data}`. All MakerNote
//! offsets are relative to the MakerNote start. Values of up to 4 bytes
//! are stored inline in the data field.

use std::collections::HashSet;
use std::ops::Range;
use std::path::Path;

use log::{debug, info, warn};

use crate::bits::Endian;
use crate::formats::calib::sensorplus;
use crate::formats::calib::{CalibrationFile, SensorVariant};
use crate::rawimage::{BlackLevels, SensorLayout};
use crate::tags::{IiqTag, TagType, TiffTag};
use crate::{CalError, Result};

pub const TIFF_HEADER_SIZE: usize = 8;
const TIFF_ENTRY_SIZE: usize = 12;
const MAKERNOTE_ENTRY_SIZE: usize = 16;
/// "Raw" in the upper three bytes of the second header word.
const RAW_MAGIC: u32 = 0x0052_6177;
const INVALID_MAGIC: u32 = 0x0bad_0bad;
const MAX_CHAINED_IFDS: usize = 16;

/// Entry of a classic TIFF directory.
#[derive(Debug, Clone, Copy)]
struct TiffEntry {
  tag: u16,
  typ: u16,
  count: u32,
  value: u32,
  entry_offset: usize,
}

impl TiffEntry {
  fn data_size(&self) -> usize {
    let elem = TagType::from_tiff(self.typ as u32).map(|t| t.size()).unwrap_or(1);
    elem.saturating_mul(self.count as usize)
  }

  fn is_offset(&self) -> bool {
    self.data_size() > 4
  }
}

#[derive(Debug, Clone)]
struct TiffIfd {
  offset: usize,
  entries: Vec<TiffEntry>,
  next: u32,
}

fn read_tiff_ifd(buf: &[u8], endian: Endian, offset: usize) -> Result<TiffIfd> {
  if offset.checked_add(2).is_none_or(|end| end > buf.len()) {
    return Err(CalError::InvalidFormat(format!("TIFF directory offset {} out of range", offset)));
  }
  let count = endian.read_u16(buf, offset) as usize;
  let first = offset + 2;
  let next_pos = first + count * TIFF_ENTRY_SIZE;
  if next_pos + 4 > buf.len() {
    return Err(CalError::InvalidFormat(format!("TIFF directory at {} exceeds file", offset)));
  }
  let entries = (0..count)
    .map(|i| {
      let pos = first + i * TIFF_ENTRY_SIZE;
      TiffEntry {
        tag: endian.read_u16(buf, pos),
        typ: endian.read_u16(buf, pos + 2),
        count: endian.read_u32(buf, pos + 4),
        value: endian.read_u32(buf, pos + 8),
        entry_offset: pos,
      }
    })
    .collect();
  Ok(TiffIfd {
    offset,
    entries,
    next: endian.read_u32(buf, next_pos),
  })
}

/// Entry of the MakerNote directory. `entry_offset` is absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MakerNoteEntry {
  pub tag: u32,
  pub typ: u32,
  pub size: u32,
  pub value: u32,
  pub entry_offset: usize,
}

impl MakerNoteEntry {
  pub fn is_inline(&self) -> bool {
    self.size <= 4
  }

  /// Absolute byte range of the payload.
  pub fn payload_range(&self, base: usize) -> Range<usize> {
    let start = if self.is_inline() {
      self.entry_offset + 12
    } else {
      base.saturating_add(self.value as usize)
    };
    start..start.saturating_add(self.size as usize)
  }
}

/// A 32 bit field holding an offset that has to follow the calibration
/// data when it grows.
#[derive(Debug, Clone, Copy)]
struct OffsetField {
  pos: usize,
  base: usize,
  endian: Endian,
  wide: bool,
}

pub struct IiqFile {
  data: Vec<u8>,
  tiff_endian: Endian,
  endian: Endian,
  ifds: Vec<TiffIfd>,
  makernote_entry: TiffEntry,
  makernote_dir: usize,
  entries: Vec<MakerNoteEntry>,
  serial: String,
}

impl IiqFile {
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
    Self::new(std::fs::read(path)?)
  }

  pub fn new(data: Vec<u8>) -> Result<Self> {
    if data.len() < TIFF_HEADER_SIZE + 12 {
      return Err(CalError::InvalidFormat("File too short for an IIQ header".into()));
    }
    let tiff_endian = Endian::from_tiff_magic(&data).ok_or_else(|| CalError::InvalidFormat("Not a TIFF file".into()))?;
    if tiff_endian.read_u16(&data, 2) != 42 {
      return Err(CalError::InvalidFormat("Unsupported TIFF version".into()));
    }

    let mut ifds = Vec::new();
    let mut visited = HashSet::new();
    let mut next = tiff_endian.read_u32(&data, 4) as usize;
    while next != 0 && ifds.len() < MAX_CHAINED_IFDS && visited.insert(next) {
      let ifd = read_tiff_ifd(&data, tiff_endian, next)?;
      next = ifd.next as usize;
      ifds.push(ifd);
    }
    let exif_pos = ifds
      .iter()
      .flat_map(|ifd| ifd.entries.iter())
      .find(|e| e.tag == TiffTag::ExifIfdPointer as u16)
      .map(|e| e.value as usize)
      .ok_or_else(|| CalError::InvalidFormat("No EXIF directory".into()))?;
    let exif = read_tiff_ifd(&data, tiff_endian, exif_pos)?;
    let makernote_entry = *exif
      .entries
      .iter()
      .find(|e| e.tag == TiffTag::MakerNote as u16)
      .ok_or_else(|| CalError::InvalidFormat("No MakerNote in EXIF directory".into()))?;
    ifds.push(exif);
    if makernote_entry.value as usize != TIFF_HEADER_SIZE {
      return Err(CalError::InvalidFormat(format!(
        "MakerNote at {} does not follow the TIFF header",
        makernote_entry.value
      )));
    }

    let base = TIFF_HEADER_SIZE;
    let endian = Endian::from_magic(&data[base..]).ok_or_else(|| CalError::InvalidFormat("Unknown IIQ magic".into()))?;
    let raw_magic = endian.read_u32(&data, base + 4);
    if raw_magic >> 8 != RAW_MAGIC || raw_magic == INVALID_MAGIC {
      return Err(CalError::InvalidFormat(format!("Invalid IIQ raw magic 0x{:x}", raw_magic)));
    }
    let makernote_dir = base + endian.read_u32(&data, base + 8) as usize;
    if makernote_dir.checked_add(8).is_none_or(|end| end > data.len()) {
      return Err(CalError::InvalidFormat("MakerNote directory out of range".into()));
    }
    let count = endian.read_u32(&data, makernote_dir) as usize;
    let first = makernote_dir + 8;
    if count.saturating_mul(MAKERNOTE_ENTRY_SIZE).saturating_add(first) > data.len() {
      return Err(CalError::InvalidFormat("MakerNote directory exceeds file".into()));
    }
    let entries: Vec<MakerNoteEntry> = (0..count)
      .map(|i| {
        let pos = first + i * MAKERNOTE_ENTRY_SIZE;
        MakerNoteEntry {
          tag: endian.read_u32(&data, pos),
          typ: endian.read_u32(&data, pos + 4),
          size: endian.read_u32(&data, pos + 8),
          value: endian.read_u32(&data, pos + 12),
          entry_offset: pos,
        }
      })
      .collect();

    let mut file = Self {
      data,
      tiff_endian,
      endian,
      ifds,
      makernote_entry,
      makernote_dir,
      entries,
      serial: String::new(),
    };
    file.serial = file
      .payload(IiqTag::BodySerial)
      .map(|p| {
        let end = p.iter().position(|b| *b == 0).unwrap_or(p.len());
        String::from_utf8_lossy(&p[..end]).into_owned()
      })
      .unwrap_or_default();
    debug!("IIQ file {}: {} MakerNote entries, endian {:?}", file.serial, file.entries.len(), file.endian);
    Ok(file)
  }

  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn serial(&self) -> &str {
    &self.serial
  }

  pub fn endian(&self) -> Endian {
    self.endian
  }

  pub fn makernote_entries(&self) -> &[MakerNoteEntry] {
    &self.entries
  }

  pub fn entry(&self, tag: IiqTag) -> Option<&MakerNoteEntry> {
    self.entries.iter().find(|e| e.tag == tag as u32)
  }

  /// Payload of a MakerNote entry, `None` if missing or out of range.
  pub fn entry_payload(&self, entry: &MakerNoteEntry) -> Option<&[u8]> {
    self.data.get(entry.payload_range(TIFF_HEADER_SIZE))
  }

  fn payload(&self, tag: IiqTag) -> Option<&[u8]> {
    self.entry(tag).and_then(|e| self.entry_payload(e))
  }

  pub fn get_u32(&self, tag: IiqTag) -> Option<u32> {
    self.payload(tag).filter(|p| p.len() >= 4).map(|p| self.endian.read_u32(p, 0))
  }

  pub fn get_f32(&self, tag: IiqTag) -> Option<f32> {
    self.get_u32(tag).map(f32::from_bits)
  }

  /// Byte range of the embedded calibration blob.
  pub fn calibration_range(&self) -> Option<Range<usize>> {
    let range = self.entry(IiqTag::CalibrationData)?.payload_range(TIFF_HEADER_SIZE);
    if range.end > self.data.len() {
      warn!("Calibration data {:?} exceeds file size {}", range, self.data.len());
      return None;
    }
    Some(range)
  }

  pub fn extract_calibration(&self) -> Option<&[u8]> {
    self.calibration_range().map(|range| &self.data[range])
  }

  /// Parsed embedded calibration.
  pub fn calibration(&self) -> Option<CalibrationFile> {
    self.extract_calibration().map(CalibrationFile::from_bytes)
  }

  /// True if the image was taken in Sensor+ mode.
  pub fn is_sensor_plus(&self) -> bool {
    self
      .extract_calibration()
      .and_then(sensorplus::detect)
      .is_some_and(|layout| layout.blobs[SensorVariant::SensorPlus.index()].is_some() && layout.footer.total_cals == 1)
  }

  pub fn sensor_variant(&self) -> SensorVariant {
    if self.is_sensor_plus() { SensorVariant::SensorPlus } else { SensorVariant::Standard }
  }

  pub fn sensor_layout(&self) -> Result<SensorLayout> {
    let get = |tag: IiqTag| {
      self
        .get_u32(tag)
        .map(|v| v as usize)
        .ok_or_else(|| CalError::InvalidFormat(format!("MakerNote tag {:?} missing", tag)))
    };
    let raw_width = get(IiqTag::RawWidth)?;
    let raw_height = get(IiqTag::RawHeight)?;
    Ok(SensorLayout {
      raw_width,
      raw_height,
      left_margin: get(IiqTag::LeftMargin).unwrap_or(0),
      top_margin: get(IiqTag::TopMargin).unwrap_or(0),
      split_col: get(IiqTag::SplitColumn).unwrap_or(raw_width),
      split_row: get(IiqTag::SplitRow).unwrap_or(raw_height),
      sensor_temperature: self.get_f32(IiqTag::SensorTemperatureMax).unwrap_or(0.0),
    })
  }

  /// Global black level and the per-row/per-column quadrant offsets.
  pub fn black_levels(&self) -> Option<BlackLevels> {
    let black = self.get_u32(IiqTag::BlackData)? as u16;
    let read = |tag: IiqTag| -> Option<Vec<i16>> {
      let payload = self.payload(tag)?;
      Some(payload.chunks_exact(2).map(|c| self.endian.read_i16(c, 0)).collect())
    };
    // black columns give one offset pair per row, black rows one per column
    let rows = read(IiqTag::BlackColumns)?;
    let cols = read(IiqTag::BlackRows)?;
    Some(BlackLevels { black, rows, cols })
  }

  /// Write `cal` back into this file. The calibration must belong to
  /// the same camera body. Returns the new file content.
  pub fn write_calibration(&self, cal: &CalibrationFile) -> Result<Vec<u8>> {
    if cal.serial() != self.serial {
      return Err(CalError::SerialMismatch {
        expected: self.serial.clone(),
        found: cal.serial().to_string(),
      });
    }
    self.replace_calibration(&cal.to_bytes()?)
  }

  /// Replace the calibration blob with `blob`.
  ///
  /// A blob that fits is written in place. A larger blob moves all data
  /// behind the calibration, so every offset pointing there is shifted.
  pub fn replace_calibration(&self, blob: &[u8]) -> Result<Vec<u8>> {
    let entry = *self
      .entry(IiqTag::CalibrationData)
      .ok_or_else(|| CalError::InvalidFormat("No calibration data in MakerNote".into()))?;
    let old = self.calibration_range().ok_or_else(|| CalError::InvalidFormat("Calibration data out of range".into()))?;
    if entry.is_inline() || blob.len() <= 4 {
      return Err(CalError::InvalidFormat("Calibration data too small to relocate".into()));
    }

    if blob.len() <= old.len() {
      let mut out = self.data.clone();
      out[old.start..old.start + blob.len()].copy_from_slice(blob);
      out[old.start + blob.len()..old.end].fill(0);
      self.endian.write_u32(&mut out, entry.entry_offset + 8, blob.len() as u32);
      info!("Calibration replaced in place ({} -> {} bytes)", old.len(), blob.len());
      return Ok(out);
    }

    let grow = (blob.len() - old.len() + 3) & !3;
    let moved = |pos: usize| if pos >= old.end { pos + grow } else { pos };

    let fields = self.offset_fields()?;
    let mut out = Vec::with_capacity(self.data.len() + grow);
    out.extend_from_slice(&self.data[..old.start]);
    out.extend_from_slice(blob);
    out.resize(old.end + grow, 0);
    out.extend_from_slice(&self.data[old.end..]);

    let mut shifted = 0;
    for field in fields {
      let value = if field.wide {
        field.endian.read_u32(&self.data, field.pos) as usize
      } else {
        field.endian.read_u16(&self.data, field.pos) as usize
      };
      if value + field.base <= old.start {
        continue;
      }
      let new_value = value + grow;
      if field.wide {
        let new_value = u32::try_from(new_value).map_err(|_| CalError::InvalidFormat("Shifted offset exceeds 32 bit".into()))?;
        field.endian.write_u32(&mut out, moved(field.pos), new_value);
      } else {
        let new_value = u16::try_from(new_value).map_err(|_| CalError::InvalidFormat("Shifted strip offset exceeds 16 bit".into()))?;
        field.endian.write_u16(&mut out, moved(field.pos), new_value);
      }
      shifted += 1;
    }

    self.endian.write_u32(&mut out, moved(entry.entry_offset + 8), blob.len() as u32);
    let mn = self.makernote_entry;
    let mn_range = TIFF_HEADER_SIZE..TIFF_HEADER_SIZE.saturating_add(mn.count as usize);
    if mn_range.contains(&old.start) {
      let new_count = mn.count.saturating_add(grow as u32);
      self.tiff_endian.write_u32(&mut out, moved(mn.entry_offset + 4), new_count);
    }
    info!(
      "Calibration grown {} -> {} bytes, {} offsets shifted by {}",
      old.len(),
      blob.len(),
      shifted,
      grow
    );
    Ok(out)
  }

  /// Collect every offset field of the TIFF, EXIF and MakerNote directories.
  fn offset_fields(&self) -> Result<Vec<OffsetField>> {
    let tiff = |pos: usize, wide: bool| OffsetField {
      pos,
      base: 0,
      endian: self.tiff_endian,
      wide,
    };
    let mut fields = vec![tiff(4, true)];
    for ifd in &self.ifds {
      for e in &ifd.entries {
        let value_pos = e.entry_offset + 8;
        if TiffTag::is_pointer(e.tag) {
          let bytes = (e.count as usize).saturating_mul(4);
          if bytes > 4 {
            fields.push(tiff(value_pos, true));
            let start = e.value as usize;
            if start.saturating_add(bytes) > self.data.len() {
              return Err(CalError::InvalidFormat("IFD pointers exceed file".into()));
            }
            fields.extend((0..e.count as usize).map(|i| tiff(start + i * 4, true)));
          } else {
            fields.extend((0..e.count as usize).map(|i| tiff(value_pos + i * 4, true)));
          }
        } else if e.tag == TiffTag::StripOffsets as u16 {
          let wide = e.typ != 3;
          let elem = if wide { 4 } else { 2 };
          if e.is_offset() {
            fields.push(tiff(value_pos, true));
            let start = e.value as usize;
            if start + e.data_size() > self.data.len() {
              return Err(CalError::InvalidFormat("Strip offsets exceed file".into()));
            }
            fields.extend((0..e.count as usize).map(|i| tiff(start + i * elem, wide)));
          } else {
            fields.extend((0..e.count as usize).map(|i| tiff(value_pos + i * elem, wide)));
          }
        } else if e.tag != TiffTag::MakerNote as u16 && e.is_offset() {
          fields.push(tiff(value_pos, true));
        }
      }
      let next_pos = ifd.offset + 2 + ifd.entries.len() * TIFF_ENTRY_SIZE;
      fields.push(tiff(next_pos, true));
    }
    let note = |pos: usize| OffsetField {
      pos,
      base: TIFF_HEADER_SIZE,
      endian: self.endian,
      wide: true,
    };
    fields.push(note(TIFF_HEADER_SIZE + 8));
    for e in self.entries.iter().filter(|e| !e.is_inline() && e.tag != IiqTag::CalibrationData as u32) {
      fields.push(note(e.entry_offset + 12));
    }
    debug!("{} offset fields, MakerNote directory at {}", fields.len(), self.makernote_dir);
    Ok(fields)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  /// Minimal IIQ: TIFF header, MakerNote, calibration, IFD0, EXIF, strip.
  fn build(cal: &[u8]) -> Vec<u8> {
    let t = Endian::Little;
    let mut buf = b"II".to_vec();
    t.push_u16(&mut buf, 42);
    t.push_u32(&mut buf, 0);
    // MakerNote header
    buf.extend_from_slice(b"IIII");
    t.push_u32(&mut buf, 0x5261_7730);
    t.push_u32(&mut buf, 0);
    let serial_rel = buf.len() - 8;
    buf.extend_from_slice(b"AB12345\0");
    let cal_rel = buf.len() - 8;
    buf.extend_from_slice(cal);
    while buf.len() % 4 != 0 {
      buf.push(0);
    }
    let dir_rel = buf.len() - 8;
    t.write_u32(&mut buf, 16, dir_rel as u32);
    t.push_u32(&mut buf, 3);
    t.push_u32(&mut buf, 0);
    for (tag, typ, size, value) in [
      (0x102, 1, 8, serial_rel as u32),
      (0x110, 1, cal.len() as u32, cal_rel as u32),
      (0x108, 4, 4, 640),
    ] {
      for v in [tag, typ, size, value] {
        t.push_u32(&mut buf, v);
      }
    }
    let mn_len = buf.len() - 8;
    // strip data after the MakerNote
    let strip = buf.len();
    buf.extend_from_slice(&[9; 16]);
    // IFD0 with one strip, EXIF pointer and a thumbnail pointer into the strip
    let ifd0 = buf.len();
    t.write_u32(&mut buf, 4, ifd0 as u32);
    t.push_u16(&mut buf, 3);
    let exif_entry = buf.len();
    for (tag, typ, count, value) in [(273_u16, 4_u16, 1_u32, strip as u32), (34665, 4, 1, 0), (513, 4, 1, strip as u32 + 4)] {
      t.push_u16(&mut buf, tag);
      t.push_u16(&mut buf, typ);
      t.push_u32(&mut buf, count);
      t.push_u32(&mut buf, value);
    }
    t.push_u32(&mut buf, 0);
    let exif = buf.len();
    t.write_u32(&mut buf, exif_entry + 12 + 8, exif as u32);
    t.push_u16(&mut buf, 1);
    t.push_u16(&mut buf, 37500);
    t.push_u16(&mut buf, 7);
    t.push_u32(&mut buf, mn_len as u32);
    t.push_u32(&mut buf, 8);
    t.push_u32(&mut buf, 0);
    buf
  }

  #[test]
  fn parse_and_extract() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let file = IiqFile::new(build(&[1, 2, 3, 4, 5, 6, 7, 8]))?;
    assert_eq!(file.serial(), "AB12345");
    assert_eq!(file.extract_calibration(), Some(&[1_u8, 2, 3, 4, 5, 6, 7, 8][..]));
    assert_eq!(file.get_u32(IiqTag::RawWidth), Some(640));
    assert!(!file.is_sensor_plus());
    Ok(())
  }

  #[test]
  fn replace_in_place() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let file = IiqFile::new(build(&[1; 12]))?;
    let out = file.replace_calibration(&[2; 8])?;
    assert_eq!(out.len(), file.data().len());
    let reparsed = IiqFile::new(out)?;
    assert_eq!(reparsed.extract_calibration(), Some(&[2_u8; 8][..]));
    Ok(())
  }

  #[test]
  fn replace_grows_and_shifts() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let file = IiqFile::new(build(&[1; 8]))?;
    let out = file.replace_calibration(&[3; 21])?;
    assert_eq!(out.len(), file.data().len() + 16);
    let reparsed = IiqFile::new(out)?;
    assert_eq!(reparsed.serial(), "AB12345");
    assert_eq!(reparsed.extract_calibration(), Some(&[3_u8; 21][..]));
    assert_eq!(reparsed.get_u32(IiqTag::RawWidth), Some(640));
    // the strip moved along with everything behind the calibration
    let strip = reparsed.ifds[0].entries[0].value as usize;
    assert_eq!(&reparsed.data()[strip..strip + 16], &[9; 16]);
    assert_eq!(reparsed.ifds[0].entries[2].value as usize, strip + 4);
    Ok(())
  }

  #[test]
  fn rejects_non_adjacent_makernote() {
    let mut data = build(&[0; 8]);
    let len = data.len();
    // MakerNote value field of the EXIF entry
    Endian::Little.write_u32(&mut data, len - 8, 12);
    assert!(matches!(IiqFile::new(data), Err(CalError::InvalidFormat(_))));
  }

  #[test]
  fn serial_mismatch_aborts_write() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let file = IiqFile::new(build(&[0; 8]))?;
    let cal = CalibrationFile::new();
    assert!(matches!(file.write_calibration(&cal), Err(CalError::SerialMismatch { .. })));
    Ok(())
  }
}
