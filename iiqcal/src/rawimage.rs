// SPDX-License-Identifier: LGPL-2.1

use serde::{Deserialize, Serialize};

use crate::cfa::{CfaPattern, Channel};
use crate::pixarray::PixU16;
use crate::{CalError, Result};

/// Geometry and readout parameters of a Phase One sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorLayout {
  pub raw_width: usize,
  pub raw_height: usize,
  pub left_margin: usize,
  pub top_margin: usize,
  /// First column read out by the second output amplifier
  pub split_col: usize,
  pub split_row: usize,
  pub sensor_temperature: f32,
}

impl SensorLayout {
  /// Layout without margins and with a single readout quadrant.
  pub fn plain(width: usize, height: usize) -> Self {
    Self {
      raw_width: width,
      raw_height: height,
      split_col: width,
      split_row: height,
      ..Default::default()
    }
  }

  pub fn width(&self) -> usize {
    self.raw_width.saturating_sub(self.left_margin)
  }

  pub fn height(&self) -> usize {
    self.raw_height.saturating_sub(self.top_margin)
  }
}

/// Black level data of a raw file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackLevels {
  pub black: u16,
  /// Two offsets per row, left and right of the split column
  pub rows: Vec<i16>,
  /// Two offsets per column, above and below the split row
  pub cols: Vec<i16>,
}

/// Decoded raw pixel buffer as seen by the correction engine.
///
/// Implement this for any decoder output. Channel lookups use coordinates
/// relative to the visible area, pixel access uses sensor coordinates.
pub trait SensorImage {
  fn raw_width(&self) -> usize;
  fn raw_height(&self) -> usize;
  fn top_margin(&self) -> usize;
  fn left_margin(&self) -> usize;
  fn channel_at(&self, row: usize, col: usize) -> Channel;
  fn split_col(&self) -> usize;
  fn split_row(&self) -> usize;
  fn sensor_temperature(&self) -> f32;
  fn pixels(&self) -> &[u16];
  fn pixels_mut(&mut self) -> &mut [u16];

  /// Black levels still to be subtracted from the pixels.
  fn black_levels(&self) -> Option<&BlackLevels> {
    None
  }

  fn mark_black_subtracted(&mut self) {}

  /// Channel of a sensor coordinate. Margin pixels wrap around the
  /// pattern like the visible ones.
  #[inline(always)]
  fn raw_channel(&self, row: usize, col: usize) -> Channel {
    self.channel_at(row.wrapping_sub(self.top_margin()), col.wrapping_sub(self.left_margin()))
  }
}

#[derive(Debug, Clone)]
pub struct RawImage {
  pub pixels: PixU16,
  pub layout: SensorLayout,
  pub cfa: CfaPattern,
  pub black: Option<BlackLevels>,
  pub black_subtracted: bool,
}

impl RawImage {
  /// Wrap a buffer that is already black-subtracted.
  pub fn new(pixels: PixU16, cfa: CfaPattern) -> Self {
    let layout = SensorLayout::plain(pixels.width, pixels.height);
    Self {
      pixels,
      layout,
      cfa,
      black: None,
      black_subtracted: true,
    }
  }

  pub fn with_layout(pixels: PixU16, layout: SensorLayout, cfa: CfaPattern) -> Result<Self> {
    if pixels.width != layout.raw_width || pixels.height != layout.raw_height {
      return Err(CalError::InvalidParam(format!(
        "Pixel buffer {}x{} does not match sensor {}x{}",
        pixels.width, pixels.height, layout.raw_width, layout.raw_height
      )));
    }
    if layout.left_margin > layout.raw_width || layout.top_margin > layout.raw_height {
      return Err(CalError::InvalidParam("Margins exceed sensor size".into()));
    }
    Ok(Self {
      pixels,
      layout,
      cfa,
      black: None,
      black_subtracted: true,
    })
  }

  /// Attach black level data. The buffer is then treated as not yet
  /// black-subtracted.
  pub fn set_black_levels(&mut self, black: BlackLevels) {
    self.black = Some(black);
    self.black_subtracted = false;
  }

  pub fn width(&self) -> usize {
    self.layout.width()
  }

  pub fn height(&self) -> usize {
    self.layout.height()
  }

  /// Pixel at visible coordinates.
  pub fn visible(&self, row: usize, col: usize) -> u16 {
    *self.pixels.at(row + self.layout.top_margin, col + self.layout.left_margin)
  }
}

impl SensorImage for RawImage {
  fn raw_width(&self) -> usize {
    self.layout.raw_width
  }

  fn raw_height(&self) -> usize {
    self.layout.raw_height
  }

  fn top_margin(&self) -> usize {
    self.layout.top_margin
  }

  fn left_margin(&self) -> usize {
    self.layout.left_margin
  }

  fn channel_at(&self, row: usize, col: usize) -> Channel {
    self.cfa.channel_at(row, col)
  }

  fn split_col(&self) -> usize {
    self.layout.split_col
  }

  fn split_row(&self) -> usize {
    self.layout.split_row
  }

  fn sensor_temperature(&self) -> f32 {
    self.layout.sensor_temperature
  }

  fn pixels(&self) -> &[u16] {
    self.pixels.pixels()
  }

  fn pixels_mut(&mut self) -> &mut [u16] {
    self.pixels.pixels_mut()
  }

  fn black_levels(&self) -> Option<&BlackLevels> {
    self.black.as_ref().filter(|_| !self.black_subtracted)
  }

  fn mark_black_subtracted(&mut self) {
    self.black_subtracted = true;
  }
}

/// 16 bit binary PGM, the interchange format for decoded raw dumps.
pub mod pgm {
  use std::io::{BufRead, Read, Write};

  use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

  use crate::pixarray::PixU16;
  use crate::{CalError, Result};

  /// Largest accepted sample count, well above any Phase One back.
  const MAX_PGM_PIXELS: usize = 1 << 28;

  pub fn raw_as_pgm(width: usize, height: usize, buf: &[u16], writer: &mut dyn Write) -> std::io::Result<()> {
    let header = format!("P5 {} {} {}\n", width, height, 65535);
    writer.write_all(header.as_bytes())?;
    for px in buf {
      writer.write_u16::<BigEndian>(*px)?;
    }
    Ok(())
  }

  fn header_token<R: BufRead>(reader: &mut R) -> Result<String> {
    let mut token = String::new();
    loop {
      let mut byte = [0_u8; 1];
      reader.read_exact(&mut byte)?;
      match byte[0] {
        b'#' if token.is_empty() => {
          let mut comment = Vec::new();
          reader.read_until(b'\n', &mut comment)?;
        }
        b if b.is_ascii_whitespace() => {
          if !token.is_empty() {
            return Ok(token);
          }
        }
        b => token.push(b as char),
      }
    }
  }

  pub fn read_pgm<R: BufRead>(reader: &mut R) -> Result<PixU16> {
    if header_token(reader)? != "P5" {
      return Err(CalError::InvalidFormat("Not a binary PGM file".into()));
    }
    let mut values = [0_usize; 3];
    for v in values.iter_mut() {
      *v = header_token(reader)?
        .parse()
        .map_err(|_| CalError::InvalidFormat("Invalid PGM header".into()))?;
    }
    let [width, height, maxval] = values;
    if maxval < 256 {
      return Err(CalError::InvalidFormat("Only 16 bit PGM files are supported".into()));
    }
    let len = width
      .checked_mul(height)
      .filter(|len| *len > 0 && *len <= MAX_PGM_PIXELS)
      .ok_or_else(|| CalError::InvalidFormat(format!("Invalid PGM dimensions {}x{}", width, height)))?;
    let mut data = vec![0_u16; len];
    reader.read_u16_into::<BigEndian>(&mut data)?;
    Ok(PixU16::new_with(data, width, height))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn margins_and_channels() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let layout = SensorLayout {
      left_margin: 1,
      top_margin: 1,
      ..SensorLayout::plain(5, 4)
    };
    let img = RawImage::with_layout(PixU16::new_with((0..20).collect(), 5, 4), layout, CfaPattern::default())?;
    assert_eq!(img.width(), 4);
    assert_eq!(img.height(), 3);
    assert_eq!(img.visible(0, 0), 6);
    assert_eq!(img.raw_channel(1, 1), Channel::Red);
    assert_eq!(img.raw_channel(0, 0), Channel::Blue);
    assert_eq!(img.raw_channel(0, 1), Channel::Green2);
    assert!(RawImage::with_layout(PixU16::new(4, 4), layout, CfaPattern::default()).is_err());
    Ok(())
  }

  #[test]
  fn pgm_roundtrip() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let mut buf = Vec::new();
    pgm::raw_as_pgm(3, 2, &[0, 1, 256, 1000, 65535, 7], &mut buf)?;
    let mut with_comment = b"P5\n# dump\n".to_vec();
    with_comment.extend_from_slice(&buf[3..]);
    for data in [buf, with_comment] {
      let img = pgm::read_pgm(&mut std::io::Cursor::new(data))?;
      assert_eq!((img.width, img.height), (3, 2));
      assert_eq!(img.pixels(), &[0, 1, 256, 1000, 65535, 7]);
    }
    Ok(())
  }

  #[test]
  fn pgm_rejects_bad_dimensions() {
    let huge = format!("P5 {} {} 65535\n", usize::MAX, 2);
    for header in [huge.as_str(), "P5 0 4 65535\n", "P5 100000 100000 65535\n"] {
      let result = pgm::read_pgm(&mut std::io::Cursor::new(header.as_bytes().to_vec()));
      assert!(matches!(result, Err(CalError::InvalidFormat(_))), "{}", header);
    }
  }
}
