//! Time source for cache expiry decisions.
//!
//! Caches never call `Instant::now()` directly; they ask the session's clock.
//! Tests swap in a [`ManualClock`] and advance it by hand.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub trait Clock: Send + Sync {
  fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> Instant {
    Instant::now()
  }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock {
  base: Instant,
  offset: Arc<Mutex<Duration>>,
}

impl ManualClock {
  pub fn new() -> Self {
    Self {
      base: Instant::now(),
      offset: Arc::new(Mutex::new(Duration::ZERO)),
    }
  }

  pub fn advance(&self, by: Duration) {
    *self.offset.lock() += by;
  }

  pub fn elapsed(&self) -> Duration {
    *self.offset.lock()
  }
}

impl Default for ManualClock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock for ManualClock {
  fn now(&self) -> Instant {
    self.base + *self.offset.lock()
  }
}

pub type SharedClock = Arc<dyn Clock>;
