// SPDX-License-Identifier: LGPL-2.1

//! Sensor+ container codec.
//!
//! A Sensor+ capable body keeps one calibration for the native sensor
//! readout and one for the binned Sensor+ mode. Both blobs are stored
//! back to back, followed by an optional table of contents and a fixed
//! footer:
//!
//! ```text
//! [blob 0][blob 1][toc: size0 size1 total=2][footer]
//! [blob][footer]
//! footer: offset=0 size number(1|2) total(1|2) timestamp magic
//! ```
//!
//! All values use the byte order of the first blob header.

use std::ops::Range;

use log::debug;

use super::SensorVariant;
use crate::bits::Endian;

/// Footer magic ("SPLS" in the blob byte order).
pub const SENSOR_PLUS_MAGIC: u32 = 0x5350_4c53;
pub const FOOTER_SIZE: usize = 24;
pub const TOC_SIZE: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorPlusFooter {
  pub cal_data_offset: u32,
  pub cal_size: u32,
  pub cal_number: u32,
  pub total_cals: u32,
  pub mod_timestamp: u32,
  pub magic: u32,
}

impl SensorPlusFooter {
  pub fn read(endian: Endian, buf: &[u8], offset: usize) -> Self {
    Self {
      cal_data_offset: endian.read_u32(buf, offset),
      cal_size: endian.read_u32(buf, offset + 4),
      cal_number: endian.read_u32(buf, offset + 8),
      total_cals: endian.read_u32(buf, offset + 12),
      mod_timestamp: endian.read_u32(buf, offset + 16),
      magic: endian.read_u32(buf, offset + 20),
    }
  }

  pub fn write(&self, endian: Endian, buf: &mut Vec<u8>) {
    for value in [self.cal_data_offset, self.cal_size, self.cal_number, self.total_cals, self.mod_timestamp, self.magic] {
      endian.push_u32(buf, value);
    }
  }
}

/// Location of the variant blobs inside a Sensor+ container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorPlusLayout {
  pub blobs: [Option<Range<usize>>; 2],
  pub footer: SensorPlusFooter,
}

fn variant_of(cal_number: u32) -> Option<SensorVariant> {
  match cal_number {
    1 => Some(SensorVariant::Standard),
    2 => Some(SensorVariant::SensorPlus),
    _ => None,
  }
}

/// Look for a Sensor+ footer at the end of `buf`.
pub fn detect(buf: &[u8]) -> Option<SensorPlusLayout> {
  let endian = Endian::from_magic(buf)?;
  if buf.len() < FOOTER_SIZE + 12 {
    return None;
  }
  let footer_pos = buf.len() - FOOTER_SIZE;
  let footer = SensorPlusFooter::read(endian, buf, footer_pos);
  if footer.magic != SENSOR_PLUS_MAGIC || footer.cal_data_offset != 0 {
    return None;
  }
  let mut blobs = [None, None];
  match footer.total_cals {
    1 => {
      let variant = variant_of(footer.cal_number)?;
      let size = footer.cal_size as usize;
      if size == 0 || size > footer_pos {
        return None;
      }
      blobs[variant as usize] = Some(0..size);
    }
    2 => {
      let toc_pos = footer_pos.checked_sub(TOC_SIZE)?;
      let size0 = endian.read_u32(buf, toc_pos) as usize;
      let size1 = endian.read_u32(buf, toc_pos + 4) as usize;
      if endian.read_u32(buf, toc_pos + 8) != 2 || size0.checked_add(size1)? > toc_pos {
        return None;
      }
      if size0 > 0 {
        blobs[SensorVariant::Standard as usize] = Some(0..size0);
      }
      if size1 > 0 {
        blobs[SensorVariant::SensorPlus as usize] = Some(size0..size0 + size1);
      }
    }
    _ => return None,
  }
  debug!("Found Sensor+ footer: {:?}", footer);
  Some(SensorPlusLayout { blobs, footer })
}

/// Concatenate the variant blobs and append TOC and footer.
pub fn compose(endian: Endian, blobs: [Option<&[u8]>; 2], timestamp: u32) -> Vec<u8> {
  let mut out = Vec::new();
  let footer = match blobs {
    [Some(standard), Some(plus)] => {
      out.extend_from_slice(standard);
      out.extend_from_slice(plus);
      endian.push_u32(&mut out, standard.len() as u32);
      endian.push_u32(&mut out, plus.len() as u32);
      endian.push_u32(&mut out, 2);
      SensorPlusFooter {
        cal_data_offset: 0,
        cal_size: (standard.len() + plus.len()) as u32,
        cal_number: 2,
        total_cals: 2,
        mod_timestamp: timestamp,
        magic: SENSOR_PLUS_MAGIC,
      }
    }
    [single, other] => {
      let (blob, number) = match (single, other) {
        (Some(blob), None) => (blob, 1),
        (None, Some(blob)) => (blob, 2),
        _ => (&[][..], 1),
      };
      out.extend_from_slice(blob);
      SensorPlusFooter {
        cal_data_offset: 0,
        cal_size: blob.len() as u32,
        cal_number: number,
        total_cals: 1,
        mod_timestamp: timestamp,
        magic: SENSOR_PLUS_MAGIC,
      }
    }
  };
  footer.write(endian, &mut out);
  out
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fake_blob(len: usize, fill: u8) -> Vec<u8> {
    let mut blob = b"IIII".to_vec();
    blob.resize(len, fill);
    blob
  }

  #[test]
  fn single_blob_roundtrip() {
    let blob = fake_blob(64, 1);
    let data = compose(Endian::Little, [None, Some(&blob)], 1234);
    assert_eq!(data.len(), 64 + FOOTER_SIZE);
    let layout = detect(&data).expect("footer");
    assert_eq!(layout.blobs, [None, Some(0..64)]);
    assert_eq!(layout.footer.mod_timestamp, 1234);
    assert_eq!(layout.footer.total_cals, 1);
  }

  #[test]
  fn dual_blob_layout() {
    let a = fake_blob(40, 2);
    let b = fake_blob(52, 3);
    let data = compose(Endian::Little, [Some(&a), Some(&b)], 0);
    let layout = detect(&data).expect("footer");
    assert_eq!(layout.blobs, [Some(0..40), Some(40..92)]);
    assert_eq!(&data[40..92], &b[..]);
  }

  #[test]
  fn plain_blob_is_not_sensor_plus() {
    assert!(detect(&fake_blob(128, 0)).is_none());
    assert!(detect(&[]).is_none());
    let mut data = compose(Endian::Little, [Some(&fake_blob(40, 0)), None], 0);
    let len = data.len();
    data[len - 1] ^= 0xff;
    assert!(detect(&data).is_none());
  }
}
