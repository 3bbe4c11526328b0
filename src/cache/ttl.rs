//! Flat key/value cache with per-entry time-to-live.
//!
//! Expiry is lazy: an expired entry stays in memory until the next read of
//! its key removes it. Nothing sweeps in the background.

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::entry::CacheEntry;
use crate::clock::SharedClock;

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
  pub keys: usize,
  pub hits: u64,
  pub misses: u64,
  pub expired: u64,
  pub invalidated: u64,
}

impl CacheStats {
  pub fn hit_rate(&self) -> f64 {
    let total = self.hits + self.misses;
    if total == 0 {
      0.0
    } else {
      self.hits as f64 / total as f64
    }
  }
}

pub struct TtlCache<T> {
  data: RwLock<HashMap<String, CacheEntry<T>>>,
  clock: SharedClock,
  hits: AtomicU64,
  misses: AtomicU64,
  expired: AtomicU64,
  invalidated: AtomicU64,
}

impl<T: Clone> TtlCache<T> {
  pub fn new(clock: SharedClock) -> Self {
    Self {
      data: RwLock::new(HashMap::new()),
      clock,
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
      expired: AtomicU64::new(0),
      invalidated: AtomicU64::new(0),
    }
  }

  pub fn set(&self, key: impl Into<String>, data: T, ttl: Duration) {
    let entry = CacheEntry::new(data, self.clock.now(), ttl);
    self.data.write().insert(key.into(), entry);
  }

  pub fn get(&self, key: &str) -> Option<T> {
    let now = self.clock.now();
    let mut data = self.data.write();

    match data.get(key) {
      Some(entry) if entry.is_expired(now) => {
        data.remove(key);
        self.expired.fetch_add(1, Ordering::Relaxed);
        self.misses.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("ttl cache: {} expired on read", key);
        None
      }
      Some(entry) => {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(entry.data.clone())
      }
      None => {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  pub fn has(&self, key: &str) -> bool {
    self.get(key).is_some()
  }

  /// Remove one key, or every key when `key` is `None`.
  pub fn clear(&self, key: Option<&str>) {
    let mut data = self.data.write();
    match key {
      Some(k) => {
        data.remove(k);
      }
      None => data.clear(),
    }
  }

  /// Delete every key matching `pattern`. Returns the number removed.
  pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
    let mut data = self.data.write();
    let before = data.len();
    data.retain(|key, _| !pattern.is_match(key));
    let removed = before - data.len();
    if removed > 0 {
      self
        .invalidated
        .fetch_add(removed as u64, Ordering::Relaxed);
      tracing::debug!("ttl cache: pattern {} removed {} keys", pattern, removed);
    }
    removed
  }

  /// Raw entry count, including expired entries nobody has read yet.
  pub fn len(&self) -> usize {
    self.data.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.read().is_empty()
  }

  pub fn keys(&self) -> Vec<String> {
    let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn ttl_remaining(&self, key: &str) -> Option<Duration> {
    let now = self.clock.now();
    self
      .data
      .read()
      .get(key)
      .and_then(|entry| entry.ttl_remaining(now))
  }

  pub fn stats(&self) -> CacheStats {
    CacheStats {
      keys: self.len(),
      hits: self.hits.load(Ordering::Relaxed),
      misses: self.misses.load(Ordering::Relaxed),
      expired: self.expired.load(Ordering::Relaxed),
      invalidated: self.invalidated.load(Ordering::Relaxed),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::clock::ManualClock;
  use std::sync::Arc;

  fn cache() -> (TtlCache<String>, ManualClock) {
    let clock = ManualClock::new();
    (TtlCache::new(Arc::new(clock.clone())), clock)
  }

  #[test]
  fn test_expired_entry_removed_on_read() {
    let (cache, clock) = cache();
    cache.set("k", "v".to_string(), Duration::from_millis(10));

    clock.advance(Duration::from_millis(15));
    assert_eq!(cache.len(), 1, "expiry is lazy until the key is read");
    assert_eq!(cache.get("k"), None);
    assert_eq!(cache.len(), 0);
    assert_eq!(cache.stats().expired, 1);
  }

  #[test]
  fn test_fresh_entry_served() {
    let (cache, clock) = cache();
    cache.set("k", "v".to_string(), Duration::from_millis(10));
    clock.advance(Duration::from_millis(5));
    assert_eq!(cache.get("k").as_deref(), Some("v"));
    assert!(cache.has("k"));
    assert_eq!(cache.stats().hits, 2);
  }

  #[test]
  fn test_set_overwrites_and_resets_age() {
    let (cache, clock) = cache();
    cache.set("k", "old".to_string(), Duration::from_millis(10));
    clock.advance(Duration::from_millis(8));
    cache.set("k", "new".to_string(), Duration::from_millis(10));
    clock.advance(Duration::from_millis(8));
    assert_eq!(cache.get("k").as_deref(), Some("new"));
  }

  #[test]
  fn test_clear_single_and_all() {
    let (cache, _) = cache();
    cache.set("a", "1".to_string(), Duration::from_secs(1));
    cache.set("b", "2".to_string(), Duration::from_secs(1));

    cache.clear(Some("a"));
    assert!(!cache.has("a"));
    assert!(cache.has("b"));

    cache.clear(None);
    assert!(cache.is_empty());
  }

  #[test]
  fn test_invalidate_pattern() {
    let (cache, _) = cache();
    let ttl = Duration::from_secs(60);
    cache.set("predictions:a", "1".to_string(), ttl);
    cache.set("predictions:b", "2".to_string(), ttl);
    cache.set("wallet:x", "3".to_string(), ttl);

    let removed = cache.invalidate_pattern(&Regex::new("^predictions").unwrap());
    assert_eq!(removed, 2);
    assert_eq!(cache.keys(), vec!["wallet:x".to_string()]);
  }

  #[test]
  fn test_invalidate_pattern_no_match_is_noop() {
    let (cache, _) = cache();
    cache.set("wallet:x", "3".to_string(), Duration::from_secs(60));
    assert_eq!(cache.invalidate_pattern(&Regex::new("comments").unwrap()), 0);
    assert_eq!(cache.len(), 1);
  }
}
