// SPDX-License-Identifier: LGPL-2.1

//! Automatic detection of hot and dead pixels.
//!
//! Works on a dark or evenly lit frame (or the median of several). A pixel
//! is a defect candidate if it deviates from its channel's mean, or from
//! the channel median of its surrounding tile, by more than a threshold
//! derived from the channel's standard deviation.

use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::cfa::Channel;
use crate::envparams;
use crate::pixarray::PixU16;
use crate::rawimage::SensorImage;
use crate::{CalError, Result};

pub const DEFAULT_SIGMA: f32 = 10.0;
pub const DEFAULT_BLOCK: usize = 16;
pub const MIN_BLOCK: usize = 4;
pub const MAX_BLOCK: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemapParams {
  /// Threshold as multiple of the channel standard deviation
  pub sigma: f32,
  /// Use tile medians instead of the global mean
  pub adaptive: bool,
  pub block: usize,
  /// Channels to inspect, indexed by [`Channel::index`]
  pub channels: [bool; 4],
  pub count_only: bool,
}

impl Default for RemapParams {
  fn default() -> Self {
    Self {
      sigma: DEFAULT_SIGMA,
      adaptive: false,
      block: DEFAULT_BLOCK,
      channels: [true; 4],
      count_only: false,
    }
  }
}

impl RemapParams {
  pub fn from_env() -> Self {
    Self {
      sigma: envparams::remap_sigma().unwrap_or(DEFAULT_SIGMA),
      ..Default::default()
    }
  }

  pub fn validate(&self) -> Result<()> {
    if self.adaptive && (self.block % 2 != 0 || !(MIN_BLOCK..=MAX_BLOCK).contains(&self.block)) {
      return Err(CalError::InvalidParam(format!(
        "Block size must be even and between {} and {}, got {}",
        MIN_BLOCK, MAX_BLOCK, self.block
      )));
    }
    if !(self.sigma > 0.0) {
      return Err(CalError::InvalidParam(format!("Invalid sigma {}", self.sigma)));
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChannelStat {
  pub count: u64,
  pub min: u16,
  pub max: u16,
  pub mean: f64,
  pub stddev: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChannelStats {
  pub red: ChannelStat,
  pub green: ChannelStat,
  pub blue: ChannelStat,
  pub green2: ChannelStat,
}

#[derive(Clone, Copy)]
struct Accumulator {
  count: [u64; 4],
  min: [u16; 4],
  max: [u16; 4],
  sum: [f64; 4],
  sum_sq: [f64; 4],
}

impl Default for Accumulator {
  fn default() -> Self {
    Self {
      count: [0; 4],
      min: [u16::MAX; 4],
      max: [0; 4],
      sum: [0.0; 4],
      sum_sq: [0.0; 4],
    }
  }
}

impl Accumulator {
  fn add(mut self, ch: usize, v: u16) -> Self {
    self.count[ch] += 1;
    self.min[ch] = self.min[ch].min(v);
    self.max[ch] = self.max[ch].max(v);
    self.sum[ch] += v as f64;
    self.sum_sq[ch] += v as f64 * v as f64;
    self
  }

  fn merge(mut self, other: Self) -> Self {
    for ch in 0..4 {
      self.count[ch] += other.count[ch];
      self.min[ch] = self.min[ch].min(other.min[ch]);
      self.max[ch] = self.max[ch].max(other.max[ch]);
      self.sum[ch] += other.sum[ch];
      self.sum_sq[ch] += other.sum_sq[ch];
    }
    self
  }

  fn stat(&self, ch: usize) -> ChannelStat {
    let n = self.count[ch];
    if n == 0 {
      return ChannelStat::default();
    }
    let mean = self.sum[ch] / n as f64;
    let stddev = if n > 1 {
      ((self.sum_sq[ch] - self.sum[ch] * self.sum[ch] / n as f64) / (n - 1) as f64).max(0.0).sqrt()
    } else {
      0.0
    };
    ChannelStat {
      count: n,
      min: self.min[ch],
      max: self.max[ch],
      mean,
      stddev,
    }
  }
}

impl ChannelStats {
  /// Gather statistics over the visible area of `image`.
  pub fn collect<I: SensorImage + Sync + ?Sized>(image: &I) -> Self {
    let view = Visible::new(image);
    let acc = (0..view.height)
      .into_par_iter()
      .fold(Accumulator::default, |acc, row| {
        (0..view.width).fold(acc, |acc, col| acc.add(image.channel_at(row, col).index(), view.get(row, col)))
      })
      .reduce(Accumulator::default, Accumulator::merge);
    let stats = Self {
      red: acc.stat(Channel::Red.index()),
      green: acc.stat(Channel::Green.index()),
      blue: acc.stat(Channel::Blue.index()),
      green2: acc.stat(Channel::Green2.index()),
    };
    debug!("Channel stats: {:?}", stats);
    stats
  }

  pub fn get(&self, ch: Channel) -> &ChannelStat {
    match ch {
      Channel::Red => &self.red,
      Channel::Green => &self.green,
      Channel::Blue => &self.blue,
      Channel::Green2 => &self.green2,
    }
  }

  /// Per channel thresholds, `sigma` times the standard deviation.
  pub fn thresholds(&self, sigma: f32) -> [f32; 4] {
    Channel::ALL.map(|ch| (self.get(ch).stddev * sigma as f64) as f32)
  }
}

/// Visible area of a sensor image.
struct Visible<'a> {
  pixels: &'a [u16],
  raw_width: usize,
  top: usize,
  left: usize,
  width: usize,
  height: usize,
}

impl<'a> Visible<'a> {
  fn new<I: SensorImage + ?Sized>(image: &'a I) -> Self {
    let (top, left) = (image.top_margin(), image.left_margin());
    let raw_width = image.raw_width();
    let raw_height = if raw_width == 0 { 0 } else { image.raw_height().min(image.pixels().len() / raw_width) };
    Self {
      pixels: image.pixels(),
      raw_width,
      top,
      left,
      width: raw_width.saturating_sub(left),
      height: raw_height.saturating_sub(top),
    }
  }

  #[inline(always)]
  fn get(&self, row: usize, col: usize) -> u16 {
    self.pixels[(row + self.top) * self.raw_width + col + self.left]
  }

  /// Sensor coordinates of a visible pixel as `(col, row)`.
  #[inline(always)]
  fn sensor(&self, row: usize, col: usize) -> (u16, u16) {
    ((col + self.left) as u16, (row + self.top) as u16)
  }
}

/// Pixels deviating from the channel mean by more than the channel's threshold.
///
/// Returns sensor coordinates `(col, row)`.
pub fn average_remap<I: SensorImage + Sync + ?Sized>(image: &I, stats: &ChannelStats, thresholds: &[f32; 4], channels: &[bool; 4]) -> Vec<(u16, u16)> {
  let view = Visible::new(image);
  let candidates: Vec<(u16, u16)> = (0..view.height)
    .into_par_iter()
    .flat_map_iter(|row| {
      let view = &view;
      (0..view.width).filter_map(move |col| {
        let ch = image.channel_at(row, col);
        let thr = thresholds[ch.index()];
        let hit = channels[ch.index()] && thr > 0.0 && (stats.get(ch).mean - view.get(row, col) as f64).abs() > thr as f64;
        hit.then(|| view.sensor(row, col))
      })
    })
    .collect();
  debug!("Average remap found {} candidates", candidates.len());
  candidates
}

/// Result of an adaptive remap pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RemapResult {
  /// Sensor coordinates `(col, row)`, empty when only counting
  pub candidates: Vec<(u16, u16)>,
  /// Candidates per channel
  pub counts: [u64; 4],
}

/// Tile origins along one axis with the position candidates are marked
/// from. The last tile is moved back to end at the image border, so its
/// overlap with the previous tile is not marked twice.
fn tiles(len: usize, block: usize) -> impl Iterator<Item = (usize, usize)> {
  (0..len).step_by(block).map(move |start| (start.min(len - block), start))
}

/// Pixels deviating from the channel median of their `block x block` tile.
pub fn adaptive_remap<I: SensorImage + Sync + ?Sized>(
  image: &I,
  thresholds: &[f32; 4],
  block: usize,
  channels: &[bool; 4],
  count_only: bool,
) -> Result<RemapResult> {
  let view = Visible::new(image);
  if block % 2 != 0 || !(MIN_BLOCK..=MAX_BLOCK).contains(&block) {
    return Err(CalError::InvalidParam(format!("Invalid block size {}", block)));
  }
  if block > view.width || block > view.height {
    return Err(CalError::InvalidParam(format!(
      "Block size {} exceeds visible area {}x{}",
      block, view.width, view.height
    )));
  }

  let tile_rows: Vec<(usize, usize)> = tiles(view.height, block).collect();
  let result = tile_rows
    .par_iter()
    .map(|(row0, mark_row)| {
      let mut result = RemapResult::default();
      let mut values: Vec<Vec<u16>> = vec![Vec::with_capacity(block * block / 4); 4];
      for (col0, mark_col) in tiles(view.width, block) {
        values.iter_mut().for_each(Vec::clear);
        for row in *row0..row0 + block {
          for col in col0..col0 + block {
            values[image.channel_at(row, col).index()].push(view.get(row, col));
          }
        }
        let medians: Vec<i32> = values.iter_mut().map(|v| median(v) as i32).collect();
        for row in *mark_row..row0 + block {
          for col in mark_col..col0 + block {
            let ch = image.channel_at(row, col).index();
            let thr = thresholds[ch];
            if channels[ch] && thr > 0.0 && (medians[ch] - view.get(row, col) as i32).abs() as f32 > thr {
              result.counts[ch] += 1;
              if !count_only {
                result.candidates.push(view.sensor(row, col));
              }
            }
          }
        }
      }
      result
    })
    .reduce(RemapResult::default, |mut a, b| {
      a.candidates.extend(b.candidates);
      (0..4).for_each(|ch| a.counts[ch] += b.counts[ch]);
      a
    });
  debug!("Adaptive remap with block {}: {:?} candidates per channel", block, result.counts);
  Ok(result)
}

/// Median of `values`, the mean of both middle values rounded half up for
/// an even count. Reorders `values`.
pub fn median(values: &mut [u16]) -> u16 {
  let count = values.len();
  if count == 0 {
    return 0;
  }
  let middle = count >> 1;
  let (lower, upper, _) = values.select_nth_unstable(middle);
  let upper = *upper;
  if count & 1 == 1 {
    return upper;
  }
  let lower = lower.iter().copied().max().unwrap_or(upper);
  ((upper as u32 + lower as u32 + 1) >> 1) as u16
}

/// Per pixel median of equally sized frames.
pub fn median_stack(frames: &[PixU16]) -> Result<PixU16> {
  let first = frames.first().ok_or_else(|| CalError::InvalidParam("No frames to stack".into()))?;
  let (width, height) = (first.width, first.height);
  if frames.iter().any(|f| f.width != width || f.height != height) {
    return Err(CalError::InvalidParam("Frames differ in size".into()));
  }
  let mut out = PixU16::new(width, height);
  if width == 0 {
    return Ok(out);
  }
  out.pixels_mut().par_chunks_mut(width).enumerate().for_each(|(row, line)| {
    let mut stack = vec![0_u16; frames.len()];
    for (col, pix) in line.iter_mut().enumerate() {
      for (s, frame) in stack.iter_mut().zip(frames) {
        *s = *frame.at(row, col);
      }
      *pix = median(&mut stack);
    }
  });
  debug!("Stacked {} frames of {}x{}", frames.len(), width, height);
  Ok(out)
}
