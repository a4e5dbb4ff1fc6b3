// SPDX-License-Identifier: LGPL-2.1

//! Sequential reader over a calibration byte stream.
//!
//! Values are read in host order and swapped when the stream was
//! written in the other byte order. Any read past the end of the
//! buffer fails with [`CalError::CorruptData`].

use crate::bits::{Endian, conv_endian16, conv_endian32};
use crate::{CalError, Result};

pub struct DataCursor<'a> {
  data: &'a [u8],
  pos: usize,
  convert: bool,
}

impl<'a> DataCursor<'a> {
  pub fn new(data: &'a [u8], endian: Endian) -> Self {
    Self {
      data,
      pos: 0,
      convert: endian.needs_conversion(),
    }
  }

  /// Switch byte order, e.g. after the header magic was inspected.
  pub fn set_endian(&mut self, endian: Endian) {
    self.convert = endian.needs_conversion();
  }

  pub fn position(&self) -> usize {
    self.pos
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  /// Move to `offset`, either absolute or relative to the current position.
  /// Positions beyond the end are clamped to the end.
  pub fn set_position(&mut self, offset: usize, relative: bool) {
    let base = if relative { self.pos } else { 0 };
    self.pos = base.saturating_add(offset).min(self.data.len());
  }

  #[inline]
  fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
    let end = self.pos.checked_add(N).filter(|end| *end <= self.data.len());
    match end {
      Some(end) => {
        let mut bytes = [0; N];
        bytes.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(bytes)
      }
      None => Err(CalError::CorruptData {
        offset: self.pos,
        wanted: N,
      }),
    }
  }

  pub fn get16(&mut self) -> Result<u16> {
    Ok(conv_endian16(u16::from_ne_bytes(self.take::<2>()?), self.convert))
  }

  pub fn get32(&mut self) -> Result<u32> {
    Ok(conv_endian32(u32::from_ne_bytes(self.take::<4>()?), self.convert))
  }

  /// Read a 32 bit IEEE-754 float by its bit pattern.
  pub fn get_float(&mut self) -> Result<f32> {
    Ok(f32::from_bits(self.get32()?))
  }

  /// Bulk read of `count` shorts.
  pub fn get_shorts(&mut self, count: usize) -> Result<Vec<u16>> {
    let bytes = count.checked_mul(2).ok_or(CalError::CorruptData {
      offset: self.pos,
      wanted: usize::MAX,
    })?;
    if self.data.len() - self.pos < bytes {
      return Err(CalError::CorruptData {
        offset: self.pos,
        wanted: bytes,
      });
    }
    let shorts = self.data[self.pos..self.pos + bytes]
      .chunks_exact(2)
      .map(|c| conv_endian16(u16::from_ne_bytes([c[0], c[1]]), self.convert))
      .collect();
    self.pos += bytes;
    Ok(shorts)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn typed_reads_big_endian() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let mut data = vec![0x12, 0x34, 0xde, 0xad, 0xbe, 0xef];
    data.extend_from_slice(&2.5_f32.to_bits().to_be_bytes());
    data.extend_from_slice(&[0, 1, 0, 2]);
    let mut cursor = DataCursor::new(&data, Endian::Big);
    assert_eq!(cursor.get16()?, 0x1234);
    assert_eq!(cursor.get32()?, 0xdead_beef);
    assert_eq!(cursor.get_float()?, 2.5);
    assert_eq!(cursor.get_shorts(2)?, vec![1, 2]);
    assert_eq!(cursor.position(), data.len());
    Ok(())
  }

  #[test]
  fn overrun_is_corrupt_data() {
    let data = [1_u8, 0, 0];
    let mut cursor = DataCursor::new(&data, Endian::Little);
    assert_eq!(cursor.get16().ok(), Some(1));
    assert!(matches!(cursor.get32(), Err(CalError::CorruptData { offset: 2, wanted: 4 })));
    // failed reads keep the position
    assert_eq!(cursor.position(), 2);
    assert!(cursor.get_shorts(1).is_err());
  }

  #[test]
  fn set_position_clamps() {
    let data = [0_u8; 16];
    let mut cursor = DataCursor::new(&data, Endian::Little);
    cursor.set_position(8, false);
    cursor.set_position(4, true);
    assert_eq!(cursor.position(), 12);
    cursor.set_position(usize::MAX, true);
    assert_eq!(cursor.position(), 16);
    cursor.set_position(100, false);
    assert_eq!(cursor.position(), 16);
  }
}
