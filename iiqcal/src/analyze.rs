// SPDX-License-Identifier: LGPL-2.1

//! Serializable dumps of calibration and IIQ files for inspection.

use hex::FromHex;
use itertools::Itertools;
use md5::Digest;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::bits::Endian;
use crate::formats::calib::{CalibrationFile, DefectEntry, SensorVariant, defect_entries};
use crate::formats::iiq::IiqFile;
use crate::tags::{CalTag, DefectType, TagType, cal_tag_name, cal_tag_type, iiq_tag_name, iiq_tag_type};

/// Payloads with more elements are only listed by size.
const MAX_DECODED_VALUES: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct Md5Digest {
  digest: md5::Digest,
}

impl From<md5::Digest> for Md5Digest {
  fn from(digest: md5::Digest) -> Self {
    Self { digest }
  }
}

impl Serialize for Md5Digest {
  fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
  where
    S: Serializer,
  {
    let s = format!("{:x}", self.digest);
    serializer.serialize_str(&s)
  }
}

impl<'de> Deserialize<'de> for Md5Digest {
  fn deserialize<D>(deserializer: D) -> std::result::Result<Md5Digest, D::Error>
  where
    D: Deserializer<'de>,
  {
    use serde::de::Error;
    let s = String::deserialize(deserializer)?;
    if s.len() != 32 {
      Err(D::Error::custom(format!("Invalid digest value: {}", s)))
    } else {
      Ok(Md5Digest {
        digest: Digest(<[u8; 16]>::from_hex(s).map_err(D::Error::custom)?),
      })
    }
  }
}

/// Decoded value of a short tag payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
  Text(String),
  Integers(Vec<u32>),
  Floats(Vec<f64>),
}

/// Decode a payload according to `typ`. Returns `None` for opaque or
/// oversized payloads.
pub fn decode_value(endian: Endian, typ: TagType, payload: &[u8]) -> Option<TagValue> {
  let count = payload.len() / typ.size();
  if typ != TagType::Ascii && (count == 0 || count > MAX_DECODED_VALUES) {
    return None;
  }
  let values = |f: &dyn Fn(usize) -> u32| (0..count).map(|i| f(i * typ.size())).collect::<Vec<u32>>();
  Some(match typ {
    TagType::Ascii => {
      let end = payload.iter().position(|b| *b == 0).unwrap_or(payload.len());
      TagValue::Text(String::from_utf8_lossy(&payload[..end]).into_owned())
    }
    TagType::Timestamp => {
      let secs = endian.read_u32(payload, 0) as i64;
      TagValue::Text(chrono::DateTime::from_timestamp(secs, 0)?.to_rfc3339())
    }
    TagType::Byte | TagType::SByte => TagValue::Integers(values(&|pos| payload[pos] as u32)),
    TagType::Short | TagType::SShort => TagValue::Integers(values(&|pos| endian.read_u16(payload, pos) as u32)),
    TagType::Long | TagType::SLong => TagValue::Integers(values(&|pos| endian.read_u32(payload, pos))),
    TagType::Float => TagValue::Floats((0..count).map(|i| endian.read_f32(payload, i * 4) as f64).collect()),
    TagType::Double => TagValue::Floats((0..count).map(|i| endian.read_f64(payload, i * 8)).collect()),
    TagType::Rational | TagType::SRational | TagType::Undefined => return None,
  })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagDump {
  pub tag: u32,
  pub name: Option<String>,
  pub typ: Option<TagType>,
  pub size: u32,
  pub inline: bool,
  /// Payload offset, `None` for inline values
  pub offset: Option<u32>,
  pub value: Option<TagValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectCounts {
  pub pixels: usize,
  pub columns: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantDump {
  pub variant: SensorVariant,
  pub endian: Endian,
  pub serial: String,
  pub size: usize,
  pub digest: Md5Digest,
  pub defects: DefectCounts,
  pub tags: Vec<TagDump>,
}

/// Inspection dump of a calibration container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationDump {
  pub serial: String,
  pub sensor_plus: bool,
  pub variants: Vec<VariantDump>,
}

impl CalibrationDump {
  pub fn new(cal: &CalibrationFile) -> Self {
    let variants = SensorVariant::ALL
      .into_iter()
      .filter(|v| cal.is_variant_valid(*v))
      .map(|variant| {
        let v = cal.variant(variant);
        let tags = cal
          .tags(variant)
          .map(|(entry, payload)| {
            let typ = cal_tag_type(entry.tag);
            TagDump {
              tag: entry.tag,
              name: cal_tag_name(entry.tag).map(String::from),
              typ,
              size: entry.size,
              inline: entry.is_inline(),
              offset: if entry.is_inline() { None } else { Some(entry.value) },
              value: typ.zip(payload).and_then(|(typ, payload)| decode_value(v.endian(), typ, payload)),
            }
          })
          .collect();
        VariantDump {
          variant,
          endian: v.endian(),
          serial: v.serial().to_string(),
          size: v.data().len(),
          digest: md5::compute(v.data()).into(),
          defects: DefectCounts {
            pixels: v.defects().pixels().len(),
            columns: v.defects().columns().len(),
          },
          tags,
        }
      })
      .collect();
    Self {
      serial: cal.serial().to_string(),
      sensor_plus: cal.has_sensor_plus(),
      variants,
    }
  }
}

/// Defect records sharing one type code.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectGroup {
  pub code: u16,
  pub name: Option<String>,
  pub count: usize,
  pub entries: Vec<DefectEntry>,
}

/// Raw defect records of a variant grouped by type code. Unlike
/// [`crate::formats::calib::DefectSet`] this keeps every record as
/// stored, including unknown codes and duplicates.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefectListing {
  pub variant: SensorVariant,
  pub total: usize,
  pub groups: Vec<DefectGroup>,
}

impl DefectListing {
  pub fn new(cal: &CalibrationFile, variant: SensorVariant) -> Self {
    let endian = cal.variant(variant).endian();
    let records: Vec<DefectEntry> = cal
      .tags(variant)
      .filter(|(entry, _)| entry.tag == u32::from(CalTag::DefectCorrection))
      .filter_map(|(_, payload)| payload)
      .flat_map(|payload| defect_entries(endian, payload))
      .collect();
    let total = records.len();
    let chunks = records.into_iter().sorted_by_key(|e| e.typ).chunk_by(|e| e.typ);
    let mut groups = Vec::new();
    for (code, group) in &chunks {
      let entries: Vec<DefectEntry> = group.collect();
      groups.push(DefectGroup {
        code,
        name: DefectType::try_from(code).ok().map(|t| format!("{:?}", t)),
        count: entries.len(),
        entries,
      });
    }
    Self { variant, total, groups }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MakerNoteDump {
  pub tag: u32,
  pub name: Option<String>,
  pub typ: Option<TagType>,
  pub size: u32,
  pub value: Option<TagValue>,
}

/// Inspection dump of an IIQ raw file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IiqDump {
  pub serial: String,
  pub endian: Endian,
  pub sensor_variant: SensorVariant,
  pub makernote: Vec<MakerNoteDump>,
  pub calibration: Option<CalibrationDump>,
}

impl IiqDump {
  pub fn new(iiq: &IiqFile) -> Self {
    let makernote = iiq
      .makernote_entries()
      .iter()
      .map(|entry| {
        let typ = iiq_tag_type(entry.tag).or_else(|| TagType::from_tiff(entry.typ));
        MakerNoteDump {
          tag: entry.tag,
          name: iiq_tag_name(entry.tag).map(String::from),
          typ,
          size: entry.size,
          value: typ.zip(iiq.entry_payload(entry)).and_then(|(typ, payload)| decode_value(iiq.endian(), typ, payload)),
        }
      })
      .collect();
    Self {
      serial: iiq.serial().to_string(),
      endian: iiq.endian(),
      sensor_variant: iiq.sensor_variant(),
      makernote,
      calibration: iiq.calibration().map(|cal| CalibrationDump::new(&cal)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn blob(e: Endian) -> Vec<u8> {
    let mut buf = Vec::new();
    e.push_u32(&mut buf, if e.big() { crate::bits::IIQ_BIGENDIAN } else { crate::bits::IIQ_LITTLEENDIAN });
    e.push_u32(&mut buf, 1);
    e.push_u32(&mut buf, 0);
    let serial_pos = buf.len() as u32;
    buf.extend_from_slice(b"EB012345\0\0\0\0");
    let defect_pos = buf.len() as u32;
    for (col, row, typ) in [(10, 0, 131), (3, 7, 129), (4, 9, 129), (1, 1, 777)] {
      DefectEntry { col, row, typ, extra: 0 }.write(e, &mut buf);
    }
    let dir = buf.len() as u32;
    e.write_u32(&mut buf, 8, dir);
    e.push_u32(&mut buf, 3);
    e.push_u32(&mut buf, 0);
    for (tag, size, data) in [(0x0407, 12, serial_pos), (0x0400, 32, defect_pos), (0x0402, 0, 1_000_000_000)] {
      e.push_u32(&mut buf, tag);
      e.push_u32(&mut buf, size);
      e.push_u32(&mut buf, data);
    }
    buf
  }

  #[test]
  fn calibration_dump_decodes_scalars() -> std::result::Result<(), Box<dyn std::error::Error>> {
    crate::init_test_logger();
    let data = blob(Endian::Big);
    let cal = CalibrationFile::from_bytes(&data);
    let dump = CalibrationDump::new(&cal);
    assert_eq!(dump.serial, "EB012345");
    assert!(!dump.sensor_plus);
    assert_eq!(dump.variants.len(), 1);
    let v = &dump.variants[0];
    assert_eq!(v.digest, Md5Digest::from(md5::compute(&data)));
    assert_eq!(v.defects, DefectCounts { pixels: 2, columns: 1 });
    assert_eq!(v.tags[0].value, Some(TagValue::Text("EB012345".into())));
    assert_eq!(v.tags[1].name.as_deref(), Some("DefectCorrection"));
    // 16 shorts are still decoded
    assert!(matches!(v.tags[1].value, Some(TagValue::Integers(ref ints)) if ints.len() == 16));
    assert!(v.tags[2].inline);
    assert_eq!(v.tags[2].value, Some(TagValue::Text("2001-09-09T01:46:40+00:00".into())));
    Ok(())
  }

  #[test]
  fn defect_listing_groups_codes() {
    crate::init_test_logger();
    let cal = CalibrationFile::from_bytes(&blob(Endian::Little));
    let listing = DefectListing::new(&cal, SensorVariant::Standard);
    assert_eq!(listing.total, 4);
    let codes: Vec<(u16, usize)> = listing.groups.iter().map(|g| (g.code, g.count)).collect();
    assert_eq!(codes, vec![(129, 2), (131, 1), (777, 1)]);
    assert_eq!(listing.groups[0].name.as_deref(), Some("Pixel"));
    assert_eq!(listing.groups[2].name, None);
  }

  #[test]
  fn digest_serializes_as_hex() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let digest = Md5Digest::from(md5::compute(b"abc"));
    let s = format!("{:x}", digest.digest);
    assert_eq!(s, "900150983cd24fb0d6963f7d28e17f72");
    assert_eq!(hex::encode(digest.digest.0), s);
    Ok(())
  }
}
