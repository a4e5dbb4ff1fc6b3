// SPDX-License-Identifier: LGPL-2.1

use std::fmt;

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};

/// Colour channel of a 2x2 Bayer cell. The green on odd rows is `Green2`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash, TryFromPrimitive, Serialize, Deserialize)]
#[repr(usize)]
pub enum Channel {
  Red = 0,
  Green = 1,
  Blue = 2,
  Green2 = 3,
}

impl Channel {
  pub const ALL: [Self; 4] = [Self::Red, Self::Green, Self::Blue, Self::Green2];

  pub fn index(self) -> usize {
    self as usize
  }
}

/// Repeating 2x2 colour filter pattern.
///
/// # Example
/// ```
/// use iiqcal::cfa::{CfaPattern, Channel};
/// let cfa = CfaPattern::new("RGGB").unwrap();
/// assert_eq!(cfa.channel_at(0, 0), Channel::Red);
/// assert_eq!(cfa.channel_at(0, 1), Channel::Green);
/// assert_eq!(cfa.channel_at(1, 0), Channel::Green2);
/// assert_eq!(cfa.channel_at(3, 3), Channel::Blue);
/// ```
#[derive(Clone, Copy, Eq, PartialEq)]
pub struct CfaPattern {
  pattern: [[Channel; 2]; 2],
}

impl Default for CfaPattern {
  fn default() -> Self {
    Self {
      pattern: [[Channel::Red, Channel::Green], [Channel::Green2, Channel::Blue]],
    }
  }
}

impl CfaPattern {
  /// Parse a 4 letter pattern like `RGGB`. Returns `None` for anything
  /// that is not a Bayer arrangement.
  pub fn new(name: &str) -> Option<Self> {
    let chars: Vec<char> = name.chars().collect();
    if chars.len() != 4 {
      return None;
    }
    let mut pattern = [[Channel::Red; 2]; 2];
    let mut greens = 0;
    for (i, c) in chars.iter().enumerate() {
      let (row, col) = (i / 2, i % 2);
      pattern[row][col] = match c {
        'R' => Channel::Red,
        'B' => Channel::Blue,
        'G' => {
          greens += 1;
          if row == 0 { Channel::Green } else { Channel::Green2 }
        }
        _ => return None,
      };
    }
    let is_green = |c: Channel| matches!(c, Channel::Green | Channel::Green2);
    let diagonal = (is_green(pattern[0][0]) && is_green(pattern[1][1])) || (is_green(pattern[0][1]) && is_green(pattern[1][0]));
    if greens != 2 || !diagonal || chars.iter().filter(|c| **c == 'R').count() != 1 {
      return None;
    }
    Some(Self { pattern })
  }

  #[inline(always)]
  pub fn channel_at(&self, row: usize, col: usize) -> Channel {
    self.pattern[row & 1][col & 1]
  }
}

impl fmt::Debug for CfaPattern {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name: String = self
      .pattern
      .iter()
      .flatten()
      .map(|c| match c {
        Channel::Red => 'R',
        Channel::Green | Channel::Green2 => 'G',
        Channel::Blue => 'B',
      })
      .collect();
    write!(f, "CfaPattern({})", name)
  }
}
