//! Cache entry types

use std::time::{Duration, Instant};

/// A value stored in the TTL cache.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
  pub data: T,
  pub stored_at: Instant,
  pub ttl: Duration,
}

impl<T> CacheEntry<T> {
  pub fn new(data: T, stored_at: Instant, ttl: Duration) -> Self {
    Self {
      data,
      stored_at,
      ttl,
    }
  }

  pub fn age(&self, now: Instant) -> Duration {
    now.saturating_duration_since(self.stored_at)
  }

  /// An entry is expired once its age strictly exceeds its ttl.
  pub fn is_expired(&self, now: Instant) -> bool {
    self.age(now) > self.ttl
  }

  pub fn ttl_remaining(&self, now: Instant) -> Option<Duration> {
    self.ttl.checked_sub(self.age(now))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_entry_expiry_boundary() {
    let start = Instant::now();
    let entry = CacheEntry::new("v", start, Duration::from_millis(10));

    assert!(!entry.is_expired(start));
    assert!(!entry.is_expired(start + Duration::from_millis(10)));
    assert!(entry.is_expired(start + Duration::from_millis(11)));
    assert_eq!(
      entry.ttl_remaining(start + Duration::from_millis(4)),
      Some(Duration::from_millis(6))
    );
    assert_eq!(entry.ttl_remaining(start + Duration::from_millis(20)), None);
  }
}
