// SPDX-License-Identifier: LGPL-2.1

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use iiqcal::bits::{Endian, IIQ_BIGENDIAN, IIQ_LITTLEENDIAN};
use iiqcal::formats::calib::DefectEntry;
use iiqcal::formats::calib::sensorplus;

pub(crate) fn init_logger() {
  let _ = env_logger::builder().is_test(true).try_init();
}

/// Fresh scratch directory below the system temp dir.
pub(crate) fn temp_dir(label: &str) -> PathBuf {
  let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
  let dir = std::env::temp_dir().join(format!("iiqcal-{}-{}-{}", label, std::process::id(), nanos));
  std::fs::create_dir_all(&dir).expect("Create temp dir");
  dir
}

fn align4(buf: &mut Vec<u8>) {
  while buf.len() % 4 != 0 {
    buf.push(0);
  }
}

/// Calibration blob with serial, defect records, a creation time and a
/// float payload that has to survive rebuilds unchanged.
pub(crate) fn calibration_blob(e: Endian, serial: &str, defects: &[DefectEntry]) -> Vec<u8> {
  let mut buf = Vec::new();
  e.push_u32(&mut buf, if e.big() { IIQ_BIGENDIAN } else { IIQ_LITTLEENDIAN });
  e.push_u32(&mut buf, 1);
  e.push_u32(&mut buf, 0);
  let serial_pos = buf.len();
  buf.extend_from_slice(serial.as_bytes());
  buf.push(0);
  align4(&mut buf);
  let defect_pos = buf.len();
  defects.iter().for_each(|d| d.write(e, &mut buf));
  let kelvin_pos = buf.len();
  for v in [5200.0_f32, 0.25, -1.5] {
    e.push_u32(&mut buf, v.to_bits());
  }
  let dir = buf.len();
  e.write_u32(&mut buf, 8, dir as u32);
  let entries = [
    (0x0407, serial.len() as u32 + 1, serial_pos as u32),
    (0x0400, (defects.len() * 8) as u32, defect_pos as u32),
    (0x041c, 12, kelvin_pos as u32),
    (0x0402, 0, 1_500_000_000),
  ];
  e.push_u32(&mut buf, entries.len() as u32);
  e.push_u32(&mut buf, 0);
  for (tag, size, value) in entries {
    e.push_u32(&mut buf, tag);
    e.push_u32(&mut buf, size);
    e.push_u32(&mut buf, value);
  }
  buf
}

/// Sensor+ container around one or two variant blobs.
pub(crate) fn sensor_plus_blob(e: Endian, standard: Option<&[u8]>, plus: Option<&[u8]>) -> Vec<u8> {
  sensorplus::compose(e, [standard, plus], 1_500_000_000)
}

/// Minimal little-endian IIQ file: TIFF header, MakerNote with serial,
/// calibration and raw width, strip data, IFD0 and EXIF directory.
pub(crate) fn iiq_file(serial: &str, cal: &[u8]) -> Vec<u8> {
  let t = Endian::Little;
  let mut buf = b"II".to_vec();
  t.push_u16(&mut buf, 42);
  t.push_u32(&mut buf, 0);
  buf.extend_from_slice(b"IIII");
  t.push_u32(&mut buf, 0x5261_7730);
  t.push_u32(&mut buf, 0);
  let serial_rel = buf.len() - 8;
  buf.extend_from_slice(serial.as_bytes());
  buf.push(0);
  align4(&mut buf);
  let cal_rel = buf.len() - 8;
  buf.extend_from_slice(cal);
  align4(&mut buf);
  let dir_rel = buf.len() - 8;
  t.write_u32(&mut buf, 16, dir_rel as u32);
  t.push_u32(&mut buf, 3);
  t.push_u32(&mut buf, 0);
  for (tag, typ, size, value) in [
    (0x102, 1, serial.len() as u32 + 1, serial_rel as u32),
    (0x110, 1, cal.len() as u32, cal_rel as u32),
    (0x108, 4, 4, 8280),
  ] {
    for v in [tag, typ, size, value] {
      t.push_u32(&mut buf, v);
    }
  }
  let mn_len = buf.len() - 8;
  let strip = buf.len();
  buf.extend_from_slice(&[0x5a; 32]);
  let ifd0 = buf.len();
  t.write_u32(&mut buf, 4, ifd0 as u32);
  t.push_u16(&mut buf, 2);
  let exif_entry = buf.len() + 12;
  for (tag, typ, count, value) in [(273_u16, 4_u16, 1_u32, strip as u32), (34665, 4, 1, 0)] {
    t.push_u16(&mut buf, tag);
    t.push_u16(&mut buf, typ);
    t.push_u32(&mut buf, count);
    t.push_u32(&mut buf, value);
  }
  t.push_u32(&mut buf, 0);
  let exif = buf.len();
  t.write_u32(&mut buf, exif_entry + 8, exif as u32);
  t.push_u16(&mut buf, 1);
  t.push_u16(&mut buf, 37500);
  t.push_u16(&mut buf, 7);
  t.push_u32(&mut buf, mn_len as u32);
  t.push_u32(&mut buf, 8);
  t.push_u32(&mut buf, 0);
  buf
}

/// Strip offset of IFD0 in a file built by [`iiq_file`].
pub(crate) fn strip_offset(data: &[u8]) -> usize {
  let t = Endian::Little;
  let ifd0 = t.read_u32(data, 4) as usize;
  t.read_u32(data, ifd0 + 2 + 8) as usize
}
