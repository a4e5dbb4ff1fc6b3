// SPDX-License-Identifier: LGPL-2.1

use log::warn;

fn flag(name: &str) -> Option<bool> {
  match std::env::var(name).map(|val| val.parse::<u32>()) {
    Ok(Ok(value)) => Some(value == 1),
    Ok(Err(_)) => {
      warn!("Invalid value for {}", name);
      None
    }
    Err(_) => None,
  }
}

pub(crate) fn skip_flatfield() -> Option<bool> {
  flag("IIQCAL_SKIP_FLATFIELD")
}

pub(crate) fn skip_curves() -> Option<bool> {
  flag("IIQCAL_SKIP_CURVES")
}

pub(crate) fn skip_quadrants() -> Option<bool> {
  flag("IIQCAL_SKIP_QUADRANTS")
}

pub(crate) fn remap_sigma() -> Option<f32> {
  match std::env::var("IIQCAL_REMAP_SIGMA").map(|val| val.parse::<f32>()) {
    Ok(Ok(value)) if value > 0.0 => Some(value),
    Ok(_) => {
      warn!("Invalid value for IIQCAL_REMAP_SIGMA");
      None
    }
    Err(_) => None,
  }
}
