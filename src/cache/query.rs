//! Key-space query cache.
//!
//! Entries are addressed by hierarchical [`QueryKey`]s and carry two timers:
//! a staleness window (reads report `Stale` past it but still return data)
//! and a garbage-collection window (unobserved entries are dropped by
//! [`QueryCache::collect_garbage`] once it elapses).
//!
//! Staleness alone never causes a refetch. Only [`QueryCache::invalidate_prefix`]
//! does, and only for entries somebody is observing; those keys are announced
//! on the refetch channel for the session to pick up.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use super::key::QueryKey;
use super::value::CachedValue;
use crate::clock::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
  /// Younger than the staleness window.
  Fresh,
  /// Older than the staleness window; still served.
  Stale,
  /// Explicitly invalidated; the next read should go to the network.
  Invalidated,
}

#[derive(Debug, Clone)]
pub struct QueryRead {
  pub value: CachedValue,
  pub freshness: Freshness,
  pub updated_at: Instant,
}

impl QueryRead {
  pub fn needs_refetch(&self) -> bool {
    self.freshness == Freshness::Invalidated
  }
}

#[derive(Debug, Clone)]
struct QueryEntry {
  value: CachedValue,
  updated_at: Instant,
  invalidated: bool,
  /// Set while nobody observes the key; drives garbage collection.
  unobserved_since: Option<Instant>,
}

pub struct QueryCache {
  entries: RwLock<HashMap<QueryKey, QueryEntry>>,
  observers: Mutex<HashMap<QueryKey, usize>>,
  refetch_tx: broadcast::Sender<QueryKey>,
  clock: SharedClock,
  stale_time: Duration,
  gc_time: Duration,
}

impl QueryCache {
  pub fn new(clock: SharedClock, stale_time: Duration, gc_time: Duration) -> Self {
    let (refetch_tx, _) = broadcast::channel(1024);
    Self {
      entries: RwLock::new(HashMap::new()),
      observers: Mutex::new(HashMap::new()),
      refetch_tx,
      clock,
      stale_time,
      gc_time,
    }
  }

  /// Keys that were invalidated while observed.
  pub fn subscribe_refetch(&self) -> broadcast::Receiver<QueryKey> {
    self.refetch_tx.subscribe()
  }

  pub fn get(&self, key: &QueryKey) -> Option<QueryRead> {
    let now = self.clock.now();
    let entries = self.entries.read();
    let entry = entries.get(key)?;
    let freshness = if entry.invalidated {
      Freshness::Invalidated
    } else if now.saturating_duration_since(entry.updated_at) > self.stale_time {
      Freshness::Stale
    } else {
      Freshness::Fresh
    };
    Some(QueryRead {
      value: entry.value.clone(),
      freshness,
      updated_at: entry.updated_at,
    })
  }

  /// Store a value fetched from the server. Clears any invalidation mark.
  pub fn set(&self, key: QueryKey, value: CachedValue) {
    let now = self.clock.now();
    // Lock order: observers, then entries.
    let observers = self.observers.lock();
    let observed = observers.get(&key).copied().unwrap_or(0) > 0;
    let mut entries = self.entries.write();
    let unobserved_since = match entries.get(&key) {
      _ if observed => None,
      Some(old) => old.unobserved_since.or(Some(now)),
      None => Some(now),
    };
    entries.insert(
      key,
      QueryEntry {
        value,
        updated_at: now,
        invalidated: false,
        unobserved_since,
      },
    );
  }

  /// Optimistic write: compute the new value from the current one without a
  /// round trip. Returning `None` from `updater` leaves the cache untouched.
  pub fn set_query_data<F>(&self, key: QueryKey, updater: F) -> bool
  where
    F: FnOnce(Option<&CachedValue>) -> Option<CachedValue>,
  {
    let current = self.entries.read().get(&key).map(|e| e.value.clone());
    match updater(current.as_ref()) {
      Some(value) => {
        tracing::debug!("query cache: optimistic write to {}", key);
        self.set(key, value);
        true
      }
      None => false,
    }
  }

  /// Mutate a cached value in place. Returns `None` when the key is not
  /// cached, otherwise whether `f` reported a change. The timestamp only
  /// moves on a change, so repeating a no-op edit leaves the entry as it was.
  pub fn modify<F>(&self, key: &QueryKey, f: F) -> Option<bool>
  where
    F: FnOnce(&mut CachedValue) -> bool,
  {
    let now = self.clock.now();
    let mut entries = self.entries.write();
    let entry = entries.get_mut(key)?;
    let changed = f(&mut entry.value);
    if changed {
      entry.updated_at = now;
    }
    Some(changed)
  }

  /// Mark every entry under `prefix` as invalidated. Observed entries are
  /// announced for refetch. Returns how many entries changed state, so a
  /// repeated call reports 0.
  pub fn invalidate_prefix(&self, prefix: &QueryKey) -> usize {
    let mut newly_invalidated = Vec::new();
    {
      let mut entries = self.entries.write();
      for (key, entry) in entries.iter_mut() {
        if !entry.invalidated && key.starts_with(prefix) {
          entry.invalidated = true;
          newly_invalidated.push(key.clone());
        }
      }
    }

    if !newly_invalidated.is_empty() {
      tracing::debug!(
        "query cache: invalidated {} entries under {}",
        newly_invalidated.len(),
        prefix
      );
    }

    let observers = self.observers.lock();
    for key in &newly_invalidated {
      if observers.get(key).copied().unwrap_or(0) > 0 {
        let _ = self.refetch_tx.send(key.clone());
      }
    }
    newly_invalidated.len()
  }

  pub fn remove(&self, key: &QueryKey) -> bool {
    self.entries.write().remove(key).is_some()
  }

  pub fn clear(&self) {
    self.entries.write().clear();
  }

  /// Register interest in a key. The returned guard counts as one observer
  /// until dropped.
  pub fn observe(self: &Arc<Self>, key: QueryKey) -> QueryObserver {
    let mut observers = self.observers.lock();
    let count = observers.entry(key.clone()).or_insert(0);
    *count += 1;
    if *count == 1 {
      if let Some(entry) = self.entries.write().get_mut(&key) {
        entry.unobserved_since = None;
      }
    }
    drop(observers);
    QueryObserver {
      cache: Arc::clone(self),
      key,
    }
  }

  fn release(&self, key: &QueryKey) {
    let mut observers = self.observers.lock();
    let last = match observers.get_mut(key) {
      Some(count) if *count > 1 => {
        *count -= 1;
        false
      }
      Some(_) => {
        observers.remove(key);
        true
      }
      None => false,
    };
    if last {
      let now = self.clock.now();
      if let Some(entry) = self.entries.write().get_mut(key) {
        entry.unobserved_since = Some(now);
      }
    }
  }

  pub fn observer_count(&self, key: &QueryKey) -> usize {
    self.observers.lock().get(key).copied().unwrap_or(0)
  }

  /// Evict entries that have had no observers for longer than the GC window.
  pub fn collect_garbage(&self) -> usize {
    let now = self.clock.now();
    let gc_time = self.gc_time;
    let mut entries = self.entries.write();
    let before = entries.len();
    entries.retain(|_, entry| match entry.unobserved_since {
      Some(since) => now.saturating_duration_since(since) <= gc_time,
      None => true,
    });
    let evicted = before - entries.len();
    if evicted > 0 {
      tracing::debug!("query cache: gc evicted {} entries", evicted);
    }
    evicted
  }

  pub fn len(&self) -> usize {
    self.entries.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.read().is_empty()
  }

  pub fn keys(&self) -> Vec<QueryKey> {
    let mut keys: Vec<QueryKey> = self.entries.read().keys().cloned().collect();
    keys.sort();
    keys
  }

  /// Values and invalidation marks, ordered by key. Timestamps are left out
  /// so two snapshots compare equal when the logical state matches.
  pub fn snapshot(&self) -> BTreeMap<QueryKey, (CachedValue, bool)> {
    self
      .entries
      .read()
      .iter()
      .map(|(k, e)| (k.clone(), (e.value.clone(), e.invalidated)))
      .collect()
  }
}

/// RAII observer registration. Dropping it releases the observation.
pub struct QueryObserver {
  cache: Arc<QueryCache>,
  key: QueryKey,
}

impl QueryObserver {
  pub fn key(&self) -> &QueryKey {
    &self.key
  }

  pub fn read(&self) -> Option<QueryRead> {
    self.cache.get(&self.key)
  }
}

impl Drop for QueryObserver {
  fn drop(&mut self) {
    self.cache.release(&self.key);
  }
}
