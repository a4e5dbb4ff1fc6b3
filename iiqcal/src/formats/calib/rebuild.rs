// SPDX-License-Identifier: LGPL-2.1

use log::{debug, warn};

use super::defects::{DefectEntry, DefectSet, defect_entries};
use super::{DIR_HEADER_SIZE, Directory, HEADER_SIZE};
use crate::tags::{CalTag, DefectType};
use crate::{CalError, Result};

fn align4(buf: &mut Vec<u8>) {
  let padded = (buf.len() + 3) & !3;
  buf.resize(padded, 0);
}

/// Write a new blob from `data` with the defect tag replaced by `defects`.
///
/// Payloads are copied in directory order and 4 byte aligned, the new
/// directory is appended at the end and the header is patched to point to it.
pub(super) fn rebuild(data: &[u8], defects: &DefectSet, timestamp: u32) -> Result<Vec<u8>> {
  let dir = Directory::read(data).ok_or_else(|| CalError::InvalidFormat("Calibration blob has no valid directory".into()))?;
  let endian = dir.endian;

  let mut fresh = Vec::new();
  for col in defects.columns() {
    DefectEntry::column(*col).write(endian, &mut fresh);
  }
  for (col, row) in defects.effective_pixels() {
    DefectEntry::pixel(col, row).write(endian, &mut fresh);
  }

  let mut out = data[..HEADER_SIZE].to_vec();
  out.resize(HEADER_SIZE + DIR_HEADER_SIZE, 0);

  let mut entries: Vec<(u32, u32, u32)> = Vec::with_capacity(dir.entries.len() + 2);
  let mut has_created = false;
  let mut has_defects = false;

  for entry in &dir.entries {
    let tag = entry.tag;
    let is_time = tag == CalTag::TimeCreated as u32 || tag == CalTag::TimeModified as u32;

    if tag == CalTag::DefectCorrection as u32 {
      has_defects = true;
      let mut payload = fresh.clone();
      if !entry.is_inline() {
        match entry.payload(data) {
          Some(old) => defect_entries(endian, old)
            .filter(|e| !DefectType::is_column(e.typ) && !DefectType::is_pixel(e.typ))
            .for_each(|e| e.write(endian, &mut payload)),
          None => warn!("Defect payload exceeds buffer, other defect types are dropped"),
        }
      }
      entries.push(push_payload(&mut out, tag, &payload));
    } else if entry.is_inline() {
      has_created |= tag == CalTag::TimeCreated as u32;
      entries.push((tag, 0, if is_time { timestamp } else { entry.value }));
    } else {
      let Some(payload) = entry.payload(data) else {
        warn!(
          "Tag 0x{:04x}: {} bytes at offset {} exceed buffer, entry dropped",
          tag, entry.size, entry.value
        );
        continue;
      };
      has_created |= tag == CalTag::TimeCreated as u32;
      let (tag, size, offset) = push_payload(&mut out, tag, payload);
      if is_time && size >= 4 {
        endian.write_u32(&mut out, offset as usize, timestamp);
      }
      entries.push((tag, size, offset));
    }
  }

  if !has_created {
    entries.push((CalTag::TimeCreated.into(), 0, timestamp));
  }
  if !has_defects {
    entries.push(push_payload(&mut out, CalTag::DefectCorrection.into(), &fresh));
  }

  align4(&mut out);
  let dir_offset = out.len();
  endian.push_u32(&mut out, entries.len() as u32);
  endian.push_u32(&mut out, 0);
  for (tag, size, value) in &entries {
    endian.push_u32(&mut out, *tag);
    endian.push_u32(&mut out, *size);
    endian.push_u32(&mut out, *value);
  }
  endian.write_u32(&mut out, 8, dir_offset as u32);

  debug!(
    "Rebuilt calibration: {} entries, {} defect records, {} bytes",
    entries.len(),
    fresh.len() / 8,
    out.len()
  );
  Ok(out)
}

/// Append an aligned payload and return the entry. Empty payloads
/// become a zero inline value.
fn push_payload(out: &mut Vec<u8>, tag: u32, payload: &[u8]) -> (u32, u32, u32) {
  if payload.is_empty() {
    return (tag, 0, 0);
  }
  align4(out);
  let offset = out.len();
  out.extend_from_slice(payload);
  align4(out);
  (tag, payload.len() as u32, offset as u32)
}
