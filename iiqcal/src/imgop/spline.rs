// SPDX-License-Identifier: LGPL-2.1

use super::Point;
use crate::{CalError, Result};

// These are the constant factors for each segment of the curve.
// Each segment i will have the formula:
// f(x) = a[i] + b[i]*(x - x[i]) + c[i]*(x - x[i])^2 + d[i]*(x - x[i])^3
#[derive(Clone, Debug, Default)]
struct Segment {
  a: f64,
  b: f64,
  c: f64,
  d: f64,
}

// This is a Natural Cubic Spline. The second derivative at curve ends are zero.
// See https://en.wikipedia.org/wiki/Spline_(mathematics)
// section "Algorithm for computing natural cubic splines"
#[derive(Debug, Clone)]
pub struct Spline {
  xcp: Vec<usize>,
  segments: Vec<Segment>,
}

impl Spline {
  fn prepare(&mut self) {
    let num_segments = self.xcp.len() - 1;
    let h: Vec<f64> = self.xcp.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
    let mut alpha = vec![0.0; num_segments];
    let mut mu = vec![0.0; num_segments + 1];
    let mut z = vec![0.0; num_segments + 1];

    for i in 1..num_segments {
      let (ap, a, an) = (self.segments[i - 1].a, self.segments[i].a, self.segments[i + 1].a);
      alpha[i] = (3. / h[i]) * (an - a) - (3. / h[i - 1]) * (a - ap);
    }

    // Forward elimination of the tridiagonal system, l[0] = 1
    for i in 1..num_segments {
      let l = 2. * (self.xcp[i + 1] - self.xcp[i - 1]) as f64 - h[i - 1] * mu[i - 1];
      mu[i] = h[i] / l;
      z[i] = (alpha[i] - h[i - 1] * z[i - 1]) / l;
    }

    for i in (0..num_segments).rev() {
      let sn_a = self.segments[i + 1].a;
      let sn_c = self.segments[i + 1].c;
      let s = &mut self.segments[i];
      s.c = z[i] - mu[i] * sn_c;
      s.b = (sn_a - s.a) / h[i] - h[i] * (sn_c + 2. * s.c) / 3.;
      s.d = (sn_c - s.c) / (3. * h[i]);
    }

    // The last segment only stored a and c of the end point
    self.segments.pop();
  }

  /// Build a spline through `control_points`.
  ///
  /// Points must be given in ascending x order. Points that do not
  /// advance x are dropped, x is limited to the 16 bit range.
  pub fn new(control_points: &[Point]) -> Result<Self> {
    let mut xcp = Vec::with_capacity(control_points.len());
    let mut segments = Vec::with_capacity(control_points.len());
    for p in control_points {
      let x = p.x.min(u16::MAX as usize);
      if xcp.last().is_some_and(|prev| x <= *prev) {
        continue;
      }
      xcp.push(x);
      segments.push(Segment {
        a: p.y as f64,
        ..Default::default()
      });
    }
    if xcp.len() < 2 {
      return Err(CalError::InvalidParam("Need at least two points to interpolate between".into()));
    }
    let mut val = Self { xcp, segments };
    val.prepare();
    Ok(val)
  }

  /// Evaluate the spline for every 16 bit input value.
  pub fn calculate_curve(&self) -> Vec<u16> {
    let mut curve = vec![0; u16::MAX as usize + 1];
    let clip = |v: f64| (v + 0.5).clamp(0.0, u16::MAX as f64) as u16;

    for (i, s) in self.segments.iter().enumerate() {
      for x in self.xcp[i]..=self.xcp[i + 1] {
        let diff = (x - self.xcp[i]) as f64;
        let interpolated = s.a + s.b * diff + s.c * diff * diff + s.d * diff * diff * diff;
        curve[x] = clip(interpolated);
      }
    }

    // Outside of the control points the curve stays flat
    let first = self.xcp[0];
    let start = curve[first];
    curve[..first].iter_mut().for_each(|v| *v = start);
    let last = self.xcp[self.xcp.len() - 1];
    let end = curve[last];
    curve[last..].iter_mut().for_each(|v| *v = end);

    curve
  }
}
