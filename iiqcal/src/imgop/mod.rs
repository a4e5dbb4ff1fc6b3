// SPDX-License-Identifier: LGPL-2.1

pub mod spline;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Point {
  pub x: usize,
  pub y: usize,
}

impl Point {
  pub fn new(x: usize, y: usize) -> Self {
    Self { x, y }
  }
}
