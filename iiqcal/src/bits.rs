// SPDX-License-Identifier: LGPL-2.1

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

/// Magic of a little-endian IIQ or calibration header ("IIII").
pub const IIQ_LITTLEENDIAN: u32 = 0x4949_4949;
/// Magic of a big-endian IIQ or calibration header ("MMMM").
pub const IIQ_BIGENDIAN: u32 = 0x4d4d_4d4d;

pub fn clamp(val: i32, min: i32, max: i32) -> i32 {
  let mut res = val;
  if res < min {
    res = min;
  }
  if res > max {
    res = max;
  }
  res
}

/// Clamp a float to the 16 bit pixel range.
#[inline(always)]
pub fn clamp_pixel(val: f32) -> u16 {
  clamp(val as i32, 0, 0xffff) as u16
}

#[inline(always)]
pub fn conv_endian16(value: u16, convert: bool) -> u16 {
  if convert { value.swap_bytes() } else { value }
}

#[inline(always)]
pub fn conv_endian32(value: u32, convert: bool) -> u32 {
  if convert { value.swap_bytes() } else { value }
}

#[inline(always)]
pub fn conv_endian64(value: u64, convert: bool) -> u64 {
  if convert { value.swap_bytes() } else { value }
}

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endian {
  Big,
  #[default]
  Little,
}

impl Endian {
  /// Detect byte order from the 32 bit magic at the start of a calibration
  /// or IIQ header. The big-endian sentinel reads the same in both byte orders.
  pub fn from_magic(buf: &[u8]) -> Option<Self> {
    if buf.len() < 4 {
      return None;
    }
    match LittleEndian::read_u32(buf) {
      IIQ_BIGENDIAN => Some(Self::Big),
      IIQ_LITTLEENDIAN => Some(Self::Little),
      _ => None,
    }
  }

  /// Byte order of a classic TIFF header ("II" or "MM").
  pub fn from_tiff_magic(buf: &[u8]) -> Option<Self> {
    match buf.get(0..2) {
      Some(b"II") => Some(Self::Little),
      Some(b"MM") => Some(Self::Big),
      _ => None,
    }
  }

  #[inline]
  pub fn big(&self) -> bool {
    matches!(*self, Self::Big)
  }

  /// True if values in this byte order must be swapped to become native.
  #[inline]
  pub fn needs_conversion(&self) -> bool {
    self.big() != cfg!(target_endian = "big")
  }

  #[inline]
  pub fn read_u16(&self, buf: &[u8], offset: usize) -> u16 {
    match *self {
      Self::Big => BigEndian::read_u16(&buf[offset..]),
      Self::Little => LittleEndian::read_u16(&buf[offset..]),
    }
  }

  #[inline]
  pub fn read_u32(&self, buf: &[u8], offset: usize) -> u32 {
    match *self {
      Self::Big => BigEndian::read_u32(&buf[offset..]),
      Self::Little => LittleEndian::read_u32(&buf[offset..]),
    }
  }

  #[inline]
  pub fn read_i16(&self, buf: &[u8], offset: usize) -> i16 {
    self.read_u16(buf, offset) as i16
  }

  #[inline]
  pub fn read_f32(&self, buf: &[u8], offset: usize) -> f32 {
    f32::from_bits(self.read_u32(buf, offset))
  }

  #[inline]
  pub fn read_f64(&self, buf: &[u8], offset: usize) -> f64 {
    match *self {
      Self::Big => BigEndian::read_f64(&buf[offset..]),
      Self::Little => LittleEndian::read_f64(&buf[offset..]),
    }
  }

  #[inline]
  pub fn write_u16(&self, buf: &mut [u8], offset: usize, value: u16) {
    match *self {
      Self::Big => BigEndian::write_u16(&mut buf[offset..], value),
      Self::Little => LittleEndian::write_u16(&mut buf[offset..], value),
    }
  }

  #[inline]
  pub fn write_u32(&self, buf: &mut [u8], offset: usize, value: u32) {
    match *self {
      Self::Big => BigEndian::write_u32(&mut buf[offset..], value),
      Self::Little => LittleEndian::write_u32(&mut buf[offset..], value),
    }
  }

  /// Append a value to a growing buffer.
  pub fn push_u16(&self, buf: &mut Vec<u8>, value: u16) {
    let pos = buf.len();
    buf.resize(pos + 2, 0);
    self.write_u16(buf, pos, value);
  }

  pub fn push_u32(&self, buf: &mut Vec<u8>, value: u32) {
    let pos = buf.len();
    buf.resize(pos + 4, 0);
    self.write_u32(buf, pos, value);
  }
}
