// SPDX-License-Identifier: LGPL-2.1

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared flag to stop a running correction from another thread.
///
/// Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
  flag: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.flag.store(true, Ordering::Relaxed);
  }

  #[inline(always)]
  pub fn is_cancelled(&self) -> bool {
    self.flag.load(Ordering::Relaxed)
  }
}
