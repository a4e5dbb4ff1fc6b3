// SPDX-License-Identifier: LGPL-2.1

//! Tag numbers of the Phase One calibration and MakerNote directories.
//!
//! Phase One IFD entries carry no reliable type information, so the data
//! types used for inspection are kept in static lookup tables.

use std::collections::HashMap;

use lazy_static::lazy_static;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// Tags of the calibration IFD.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum CalTag {
  DefectCorrection = 0x0400,
  LumaAllColourFlatField = 0x0401,
  TimeCreated = 0x0402,
  TimeModified = 0x0403,
  SerialNumber = 0x0407,
  BlackGain = 0x0408,
  ChromaRedBlue = 0x040b,
  Luma = 0x0410,
  XyzCorrection = 0x0412,
  LumaFlatField2 = 0x0416,
  DualOutputPoly = 0x0419,
  PolynomialCurve = 0x041a,
  OutputOffsetCorrection = 0x041b,
  KelvinCorrection = 0x041c,
  FourTileOutput = 0x041e,
  FourTileLinearisation = 0x041f,
  OutputCorrectCurve = 0x0423,
  FourTileTracking = 0x042c,
  FourTileGainLut = 0x0431,
}

/// Tags of the IIQ MakerNote IFD.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum IiqTag {
  Flip = 0x0100,
  BodySerial = 0x0102,
  RommMatrix = 0x0106,
  CamWhite = 0x0107,
  RawWidth = 0x0108,
  RawHeight = 0x0109,
  LeftMargin = 0x010a,
  TopMargin = 0x010b,
  Width = 0x010c,
  Height = 0x010d,
  Format = 0x010e,
  RawData = 0x010f,
  CalibrationData = 0x0110,
  KeyOffset = 0x0112,
  Software = 0x0203,
  SystemType = 0x0204,
  SensorTemperatureMax = 0x0210,
  SensorTemperatureMin = 0x0211,
  Tag21a = 0x021a,
  StripOffset = 0x021c,
  BlackData = 0x021d,
  SplitColumn = 0x0222,
  BlackColumns = 0x0223,
  SplitRow = 0x0224,
  BlackRows = 0x0225,
  RommThumbMatrix = 0x0226,
  FirmwareString = 0x0301,
  Aperture = 0x0401,
  FocalLength = 0x0403,
  Body = 0x0410,
  Lens = 0x0412,
  MaxAperture = 0x0414,
  MinAperture = 0x0415,
  MinFocalLength = 0x0416,
  MaxFocalLength = 0x0417,
}

/// The few classic TIFF tags needed to reach the MakerNote.
#[derive(Debug, Copy, Clone, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum TiffTag {
  StripOffsets = 273,
  SubIFDs = 330,
  JpegInterchangeFormat = 513,
  ExifIfdPointer = 34665,
  MakerNote = 37500,
  InteropIfdPointer = 40965,
}

impl TiffTag {
  /// Tags whose values are file offsets stored as 32 bit integers.
  pub fn is_pointer(tag: u16) -> bool {
    matches!(
      Self::try_from(tag),
      Ok(Self::SubIFDs | Self::JpegInterchangeFormat | Self::ExifIfdPointer | Self::InteropIfdPointer)
    )
  }
}

/// Defect type codes of the 8 byte defect records.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, IntoPrimitive, TryFromPrimitive, Serialize, Deserialize)]
#[repr(u16)]
pub enum DefectType {
  Pixel = 129,
  Column = 131,
  PixelRow = 132,
  PixelIso = 134,
  Column2 = 137,
  Column3 = 138,
  Other = 139,
  Column4 = 140,
}

impl DefectType {
  /// All codes that mark an entire bad column.
  pub fn is_column(code: u16) -> bool {
    matches!(Self::try_from(code), Ok(Self::Column | Self::Column2 | Self::Column3 | Self::Column4))
  }

  /// Column codes the correction pass repairs. The other two are
  /// tracked and edited but left alone by the replay.
  pub fn is_repaired_column(code: u16) -> bool {
    matches!(Self::try_from(code), Ok(Self::Column | Self::Column2))
  }

  pub fn is_pixel(code: u16) -> bool {
    code == Self::Pixel as u16
  }
}

/// Data types used for tag inspection. Codes follow TIFF, with an
/// extra pseudo type for Unix timestamps.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TagType {
  Byte,
  Ascii,
  Short,
  Long,
  Rational,
  SByte,
  Undefined,
  SShort,
  SLong,
  SRational,
  Float,
  Double,
  Timestamp,
}

impl TagType {
  pub fn from_tiff(code: u32) -> Option<Self> {
    Some(match code {
      1 => Self::Byte,
      2 => Self::Ascii,
      3 => Self::Short,
      4 => Self::Long,
      5 => Self::Rational,
      6 => Self::SByte,
      7 => Self::Undefined,
      8 => Self::SShort,
      9 => Self::SLong,
      10 => Self::SRational,
      11 => Self::Float,
      12 => Self::Double,
      _ => return None,
    })
  }

  /// Size of a single element in bytes.
  pub fn size(&self) -> usize {
    match self {
      Self::Byte | Self::Ascii | Self::SByte | Self::Undefined => 1,
      Self::Short | Self::SShort => 2,
      Self::Long | Self::SLong | Self::Float | Self::Timestamp => 4,
      Self::Rational | Self::SRational | Self::Double => 8,
    }
  }

  pub fn name(&self) -> &'static str {
    match self {
      Self::Byte => "Byte",
      Self::Ascii => "ASCII",
      Self::Short => "Short",
      Self::Long => "Long",
      Self::Rational => "Rational",
      Self::SByte => "Signed byte",
      Self::Undefined => "Undefined",
      Self::SShort => "Signed short",
      Self::SLong => "Signed long",
      Self::SRational => "Signed rational",
      Self::Float => "Float",
      Self::Double => "Double",
      Self::Timestamp => "Timestamp",
    }
  }
}

lazy_static! {
  static ref CAL_TAG_NAMES: HashMap<u32, &'static str> = HashMap::from([
    (0x0400, "DefectCorrection"),
    (0x0401, "LumaAllColourFlatField"),
    (0x0402, "TimeCreated"),
    (0x0403, "TimeModified"),
    (0x0407, "SerialNumber"),
    (0x0408, "BlackGain"),
    (0x040b, "ChromaRedBlue"),
    (0x0410, "Luma"),
    (0x0412, "XYZCorrection"),
    (0x0416, "LumaFlatField2"),
    (0x0419, "DualOutputPoly"),
    (0x041a, "PolynomialCurve"),
    (0x041b, "OutputOffsetCorrection"),
    (0x041c, "KelvinCorrection"),
    (0x041e, "FourTileOutput"),
    (0x041f, "FourTileLinearisation"),
    (0x0423, "OutputCorrectCurve"),
    (0x042c, "FourTileTracking"),
    (0x0431, "FourTileGainLUT"),
  ]);

  static ref CAL_TAG_TYPES: HashMap<u32, TagType> = HashMap::from([
    (0x0404, TagType::Ascii),
    (0x0405, TagType::Ascii),
    (0x0406, TagType::Ascii),
    (0x0407, TagType::Ascii),
    (0x0402, TagType::Timestamp),
    (0x0403, TagType::Timestamp),
    (0x040f, TagType::Short),
    (0x0418, TagType::Short),
    (0x0400, TagType::Short),
    (0x0416, TagType::Short),
    (0x0410, TagType::Short),
    (0x040b, TagType::Short),
    (0x041c, TagType::Float),
    (0x0408, TagType::Double),
    (0x0413, TagType::Double),
  ]);

  static ref IIQ_TAG_NAMES: HashMap<u32, &'static str> = HashMap::from([
    (0x0100, "Flip"),
    (0x0102, "BodySerial"),
    (0x0106, "RommMatrix"),
    (0x0107, "CamWhite"),
    (0x0108, "RawWidth"),
    (0x0109, "RawHeight"),
    (0x010a, "LeftMargin"),
    (0x010b, "TopMargin"),
    (0x010c, "Width"),
    (0x010d, "Height"),
    (0x010e, "Format"),
    (0x010f, "RawData"),
    (0x0110, "CalibrationData"),
    (0x0112, "KeyOffset"),
    (0x0203, "Software"),
    (0x0204, "SystemType"),
    (0x0210, "SensorTemperatureMax"),
    (0x0211, "SensorTemperatureMin"),
    (0x021a, "Tag21a"),
    (0x021c, "StripOffset"),
    (0x021d, "BlackData"),
    (0x0222, "SplitColumn"),
    (0x0223, "BlackColumns"),
    (0x0224, "SplitRow"),
    (0x0225, "BlackRows"),
    (0x0226, "RommThumbMatrix"),
    (0x0301, "FirmwareString"),
    (0x0401, "Aperture"),
    (0x0403, "FocalLength"),
    (0x0410, "Body"),
    (0x0412, "Lens"),
    (0x0414, "MaxAperture"),
    (0x0415, "MinAperture"),
    (0x0416, "MinFocalLength"),
    (0x0417, "MaxFocalLength"),
  ]);

  // MakerNote type fields are unreliable, these override them.
  static ref IIQ_TAG_TYPES: HashMap<u32, TagType> = {
    let mut map = HashMap::new();
    for tag in [
      0x100, 0x101, 0x103, 0x104, 0x105, 0x108, 0x109, 0x10a, 0x10b, 0x10c, 0x10d, 0x10e, 0x10f, 0x110, 0x112, 0x113, 0x202, 0x20a, 0x20b,
      0x20c, 0x20d, 0x20e, 0x212, 0x213, 0x214, 0x215, 0x217, 0x218, 0x21a, 0x21c, 0x21d, 0x21e, 0x21f, 0x220, 0x222, 0x223, 0x224, 0x225,
      0x227, 0x242, 0x243, 0x246, 0x247, 0x248, 0x249, 0x24a, 0x24b, 0x24c, 0x24d, 0x24e, 0x24f, 0x250, 0x251, 0x253, 0x254, 0x255, 0x256,
      0x258, 0x259, 0x25a, 0x25b, 0x25c, 0x25d, 0x260, 0x261, 0x263, 0x264, 0x265, 0x26a, 0x26b, 0x300, 0x304, 0x311, 0x404, 0x406, 0x407,
      0x408, 0x409, 0x411, 0x413, 0x420, 0x450, 0x451, 0x452, 0x460, 0x463, 0x536, 0x537, 0x53e, 0x540, 0x541, 0x542, 0x543, 0x547,
    ] {
      map.insert(tag, TagType::Long);
    }
    for tag in [
      0x102, 0x200, 0x201, 0x203, 0x204, 0x262, 0x301, 0x310, 0x312, 0x410, 0x412, 0x530, 0x531, 0x532, 0x533, 0x534, 0x535, 0x548, 0x549,
    ] {
      map.insert(tag, TagType::Ascii);
    }
    for tag in [
      0x106, 0x107, 0x205, 0x216, 0x226, 0x53d, 0x20f, 0x210, 0x211, 0x21b, 0x221, 0x22a, 0x22b, 0x22c, 0x22f, 0x244, 0x245, 0x252, 0x257,
      0x269, 0x320, 0x321, 0x322, 0x400, 0x401, 0x402, 0x403, 0x414, 0x415, 0x416, 0x417, 0x461, 0x462, 0x538, 0x539, 0x53a, 0x53f,
    ] {
      map.insert(tag, TagType::Float);
    }
    map.insert(0x111, TagType::Undefined);
    map.insert(0x219, TagType::Undefined);
    map
  };
}

pub fn cal_tag_name(tag: u32) -> Option<&'static str> {
  CAL_TAG_NAMES.get(&tag).copied()
}

pub fn cal_tag_type(tag: u32) -> Option<TagType> {
  CAL_TAG_TYPES.get(&tag).copied()
}

pub fn iiq_tag_name(tag: u32) -> Option<&'static str> {
  IIQ_TAG_NAMES.get(&tag).copied()
}

pub fn iiq_tag_type(tag: u32) -> Option<TagType> {
  IIQ_TAG_TYPES.get(&tag).copied()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn lookup_tables() {
    assert_eq!(cal_tag_name(CalTag::DefectCorrection.into()), Some("DefectCorrection"));
    assert_eq!(cal_tag_type(CalTag::TimeModified.into()), Some(TagType::Timestamp));
    assert_eq!(cal_tag_type(CalTag::KelvinCorrection.into()), Some(TagType::Float));
    assert_eq!(cal_tag_name(0x0999), None);
    assert_eq!(iiq_tag_name(IiqTag::CalibrationData.into()), Some("CalibrationData"));
    assert_eq!(iiq_tag_type(IiqTag::BodySerial.into()), Some(TagType::Ascii));
    assert_eq!(iiq_tag_type(IiqTag::SensorTemperatureMax.into()), Some(TagType::Float));
  }

  #[test]
  fn column_codes() {
    for code in [131, 137, 138, 140] {
      assert!(DefectType::is_column(code));
      assert!(!DefectType::is_pixel(code));
    }
    assert!(DefectType::is_pixel(129));
    assert!(!DefectType::is_column(129));
    assert!(!DefectType::is_column(139));
    assert!(!DefectType::is_column(7));
    assert!(DefectType::is_repaired_column(131) && DefectType::is_repaired_column(137));
    assert!(!DefectType::is_repaired_column(138) && !DefectType::is_repaired_column(140));
  }
}
