// SPDX-License-Identifier: LGPL-2.1

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pix2D<T> {
  pub width: usize,
  pub height: usize,
  pub data: Vec<T>,
}

pub type PixU16 = Pix2D<u16>;

impl<T> Pix2D<T>
where
  T: Copy + Default + Send + Sync,
{
  pub fn new_with(data: Vec<T>, width: usize, height: usize) -> Self {
    assert_eq!(data.len(), height * width);
    Self { data, width, height }
  }

  pub fn new(width: usize, height: usize) -> Self {
    let data = vec![T::default(); width * height];
    Self { data, width, height }
  }

  pub fn pixels(&self) -> &[T] {
    &self.data
  }

  pub fn pixels_mut(&mut self) -> &mut [T] {
    &mut self.data
  }

  pub fn pixel_rows(&self) -> std::slice::ChunksExact<'_, T> {
    self.data.chunks_exact(self.width)
  }

  #[inline(always)]
  pub fn at(&self, row: usize, col: usize) -> &T {
    &self.data[row * self.width + col]
  }

  #[inline(always)]
  pub fn at_mut(&mut self, row: usize, col: usize) -> &mut T {
    &mut self.data[row * self.width + col]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn row_major_access() {
    let mut img = PixU16::new_with((0..12).collect(), 4, 3);
    assert_eq!(*img.at(1, 2), 6);
    *img.at_mut(2, 3) = 99;
    assert_eq!(img.pixels()[11], 99);
    assert_eq!(img.pixel_rows().nth(1), Some(&[4_u16, 5, 6, 7][..]));
    assert_eq!(PixU16::new(3, 2).pixels(), &[0; 6]);
  }
}
