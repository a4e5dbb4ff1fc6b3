// SPDX-License-Identifier: LGPL-2.1

mod common;

use iiqcal::analyze::DefectListing;
use iiqcal::bits::Endian;
use iiqcal::formats::calib::{CalibrationFile, DefectEntry, SensorVariant};
use iiqcal::pixarray::PixU16;
use iiqcal::{CancelToken, CorrectionParams, RawImage, cfa::CfaPattern, correct::correct};

use common::{calibration_blob, init_logger, sensor_plus_blob, temp_dir};

const STD: SensorVariant = SensorVariant::Standard;

fn sample_defects() -> Vec<DefectEntry> {
  vec![
    DefectEntry::column(100),
    DefectEntry::pixel(5, 6),
    DefectEntry::pixel(100, 3),
    DefectEntry { col: 1, row: 1, typ: 139, extra: 7 },
  ]
}

#[test]
fn save_and_reload_keeps_edits_and_other_tags() -> anyhow::Result<()> {
  init_logger();
  let dir = temp_dir("save");
  let path = dir.join("EB012345.cal");
  let original = calibration_blob(Endian::Big, "EB012345", &sample_defects());
  std::fs::write(&path, &original)?;

  let mut cal = CalibrationFile::load(&path)?;
  assert!(cal.is_pixel(STD, 100, 3));
  assert!(cal.add_pixel(STD, 7, 8));
  assert!(cal.add_column(STD, 200));
  assert!(!cal.add_column(STD, 200));
  assert!(cal.save()?);
  assert!(!cal.has_unsaved_changes());
  // Nothing left to write
  assert!(!cal.save()?);

  let reloaded = CalibrationFile::load(&path)?;
  assert_eq!(reloaded.serial(), "EB012345");
  assert_eq!(reloaded.endian(), Endian::Big);
  let defects = reloaded.defects(STD);
  assert_eq!(defects.columns().iter().copied().collect::<Vec<_>>(), vec![100, 200]);
  assert_eq!(defects.pixels().iter().copied().collect::<Vec<_>>(), vec![(5, 6), (7, 8)]);

  let kelvin = reloaded.tags(STD).find(|(entry, _)| entry.tag == 0x041c).and_then(|(_, payload)| payload);
  let expected: Vec<u8> = [5200.0_f32, 0.25, -1.5].iter().flat_map(|v| v.to_bits().to_be_bytes()).collect();
  assert_eq!(kelvin, Some(&expected[..]));

  let created = reloaded.tags(STD).find(|(entry, _)| entry.tag == 0x0402).map(|(entry, _)| entry);
  assert!(created.is_some_and(|entry| entry.is_inline() && entry.value != 1_500_000_000));

  std::fs::remove_dir_all(dir)?;
  Ok(())
}

#[test]
fn subsumed_pixels_are_not_written() -> anyhow::Result<()> {
  init_logger();
  let dir = temp_dir("subsume");
  let path = dir.join("cal.cal");
  std::fs::write(&path, calibration_blob(Endian::Little, "EB000001", &sample_defects()))?;

  let mut cal = CalibrationFile::load(&path)?;
  assert!(cal.add_pixel(STD, 100, 9));
  assert!(cal.save()?);
  assert!(!cal.is_pixel(STD, 100, 9));

  let listing = DefectListing::new(&CalibrationFile::load(&path)?, STD);
  let counts: Vec<(u16, usize)> = listing.groups.iter().map(|g| (g.code, g.count)).collect();
  // One column, one surviving pixel and the untouched record of another type
  assert_eq!(counts, vec![(129, 1), (131, 1), (139, 1)]);
  assert_eq!(listing.groups[2].entries[0].extra, 7);

  std::fs::remove_dir_all(dir)?;
  Ok(())
}

#[test]
fn reset_discards_edits() {
  init_logger();
  let mut cal = CalibrationFile::from_bytes(&calibration_blob(Endian::Little, "EB000002", &sample_defects()));
  assert!(cal.remove_column(STD, -1));
  assert!(cal.remove_pixel(STD, 5, -1));
  assert!(cal.defects(STD).columns().is_empty());
  cal.reset();
  assert!(cal.is_column(STD, 100));
  assert!(cal.is_pixel(STD, 5, 6));
  assert!(!cal.has_unsaved_changes());
}

#[test]
fn sensor_plus_halves_merge() -> anyhow::Result<()> {
  init_logger();
  let e = Endian::Little;
  let standard = calibration_blob(e, "EB777777", &[DefectEntry::column(10)]);
  let plus = calibration_blob(e, "EB777777", &[DefectEntry::pixel(3, 4)]);

  let mut a = CalibrationFile::from_bytes(&sensor_plus_blob(e, Some(&standard), None));
  let b = CalibrationFile::from_bytes(&sensor_plus_blob(e, None, Some(&plus)));
  assert!(a.has_sensor_plus() && b.has_sensor_plus());
  assert!(a.is_variant_valid(SensorVariant::Standard) && !a.is_variant_valid(SensorVariant::SensorPlus));
  assert!(b.is_variant_valid(SensorVariant::SensorPlus));

  // A plain calibration never merges
  let plain = CalibrationFile::from_bytes(&plus);
  assert!(!a.is_mergeable(&plain));
  // Neither does a calibration of another body
  let other = CalibrationFile::from_bytes(&sensor_plus_blob(e, None, Some(&calibration_blob(e, "EB000000", &[]))));
  assert!(!a.merge(other));
  assert!(!a.is_fully_valid());

  assert!(a.is_mergeable(&b));
  assert!(a.merge(b));
  assert!(a.is_fully_valid());

  let merged = CalibrationFile::from_bytes(&a.to_bytes()?);
  assert!(merged.has_sensor_plus());
  assert!(merged.is_fully_valid());
  assert!(merged.is_column(SensorVariant::Standard, 10));
  assert!(merged.is_pixel(SensorVariant::SensorPlus, 3, 4));
  assert!(!merged.is_pixel(SensorVariant::Standard, 3, 4));
  Ok(())
}

#[test]
fn swap_moves_variant_between_files() {
  init_logger();
  let e = Endian::Big;
  let mut a = CalibrationFile::from_bytes(&sensor_plus_blob(e, Some(&calibration_blob(e, "EB555555", &[DefectEntry::column(10)])), None));
  let mut b = CalibrationFile::from_bytes(&sensor_plus_blob(
    e,
    Some(&calibration_blob(e, "EB555555", &[DefectEntry::pixel(3, 4)])),
    Some(&calibration_blob(e, "EB555555", &[DefectEntry::column(20)])),
  ));

  assert!(a.swap_variant(&mut b, STD));
  assert_eq!((a.serial(), b.serial()), ("EB555555", "EB555555"));
  assert!(a.is_pixel(STD, 3, 4) && !a.is_column(STD, 10));
  assert!(b.is_column(STD, 10) && !b.is_pixel(STD, 3, 4));
  // The other variant stays where it was
  assert!(b.is_column(SensorVariant::SensorPlus, 20));
  assert!(!a.is_variant_valid(SensorVariant::SensorPlus));

  let mut other = CalibrationFile::from_bytes(&calibration_blob(e, "EB000000", &[DefectEntry::column(30)]));
  assert!(!a.swap_variant(&mut other, STD));
  assert!(a.is_pixel(STD, 3, 4));
  assert!(other.is_column(STD, 30));
}

#[test]
fn out_of_range_payload_does_not_block_save() -> anyhow::Result<()> {
  init_logger();
  let e = Endian::Big;
  let mut data = calibration_blob(e, "EB123123", &[DefectEntry::pixel(1, 2)]);
  let dir = e.read_u32(&data, 8) as usize;
  let count = e.read_u32(&data, dir) as usize;
  let len = data.len() as u32;
  let kelvin = (0..count).map(|i| dir + 8 + i * 12).find(|pos| e.read_u32(&data, *pos) == 0x041c).ok_or_else(|| anyhow::anyhow!("no 0x41c"))?;
  e.write_u32(&mut data, kelvin + 8, len + 100);

  let mut cal = CalibrationFile::from_bytes(&data);
  assert!(cal.is_valid());
  assert!(cal.add_pixel(STD, 5, 5));
  let rebuilt = CalibrationFile::from_bytes(&cal.to_bytes()?);
  assert!(rebuilt.is_pixel(STD, 1, 2) && rebuilt.is_pixel(STD, 5, 5));
  assert_eq!(rebuilt.serial(), "EB123123");
  assert!(rebuilt.tags(STD).all(|(entry, _)| entry.tag != 0x041c));
  cal.correction_data(STD, true)?;
  Ok(())
}

#[test]
fn truncated_blobs_never_panic() -> anyhow::Result<()> {
  init_logger();
  let e = Endian::Big;
  let data = sensor_plus_blob(
    e,
    Some(&calibration_blob(e, "EB123123", &sample_defects())),
    Some(&calibration_blob(e, "EB123123", &[DefectEntry::pixel(1, 2)])),
  );
  assert!(CalibrationFile::from_bytes(&data).is_fully_valid());
  for len in 0..data.len() {
    let cal = CalibrationFile::from_bytes(&data[..len]);
    if cal.is_valid() {
      cal.to_bytes()?;
    }
    let mut img = RawImage::new(PixU16::new_with(vec![500; 64], 8, 8), CfaPattern::default());
    correct(&mut img, &data[..len], &CorrectionParams::default(), &CancelToken::new())?;
  }
  Ok(())
}

#[test]
fn edited_defects_reach_the_correction() -> anyhow::Result<()> {
  init_logger();
  let mut cal = CalibrationFile::from_bytes(&calibration_blob(Endian::Little, "EB000003", &[]));
  let mut pixels = vec![1000; 64];
  pixels[4 * 8 + 4] = 0;
  let mut img = RawImage::new(PixU16::new_with(pixels, 8, 8), CfaPattern::default());

  let params = CorrectionParams::default();
  correct(&mut img, &cal.correction_data(STD, true)?, &params, &CancelToken::new())?;
  assert_eq!(*img.pixels.at(4, 4), 0);

  assert!(cal.add_pixel(STD, 4, 4));
  assert!(correct(&mut img, &cal.correction_data(STD, true)?, &params, &CancelToken::new())?.is_completed());
  assert_eq!(*img.pixels.at(4, 4), 1000);
  assert!(cal.correction_data(SensorVariant::SensorPlus, true).is_err());
  Ok(())
}
