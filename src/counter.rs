//! Unread-count badges.
//!
//! A [`HybridCounter`] is fed from three directions: a periodic poll driven
//! by the session scheduler, push events that ask for an immediate refresh,
//! and local increments for instant feedback. Whichever fetch completes last
//! sets the value; local adjustments only last until then.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::api::Method;
use crate::cache::QueryKey;
use crate::coalescer::RequestCoalescer;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterKind {
  UnreadMessages,
  UnreadNotifications,
}

impl CounterKind {
  pub const ALL: [CounterKind; 2] = [CounterKind::UnreadMessages, CounterKind::UnreadNotifications];

  pub fn resource(&self) -> &'static str {
    match self {
      Self::UnreadMessages => "/conversations/unread-count",
      Self::UnreadNotifications => "/notifications/unread-count",
    }
  }

  pub fn key(&self) -> QueryKey {
    match self {
      Self::UnreadMessages => QueryKey::new(["conversations", "unread"]),
      Self::UnreadNotifications => QueryKey::new(["notifications", "unread"]),
    }
  }
}

impl std::fmt::Display for CounterKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::UnreadMessages => write!(f, "unread messages"),
      Self::UnreadNotifications => write!(f, "unread notifications"),
    }
  }
}

/// Where authoritative counts come from.
#[async_trait]
pub trait CountSource: Send + Sync {
  async fn fetch_count(&self, kind: CounterKind) -> Result<i64, ApiError>;
}

/// Reads counts through the coalescer. Accepts either a bare number or an
/// object with a `count` field.
pub struct CoalescedCountSource {
  coalescer: RequestCoalescer,
}

impl CoalescedCountSource {
  pub fn new(coalescer: RequestCoalescer) -> Self {
    Self { coalescer }
  }
}

#[async_trait]
impl CountSource for CoalescedCountSource {
  async fn fetch_count(&self, kind: CounterKind) -> Result<i64, ApiError> {
    let body = self.coalescer.enqueue(Method::Get, kind.resource(), None).await?;
    parse_count(&body)
  }
}

fn parse_count(body: &serde_json::Value) -> Result<i64, ApiError> {
  body
    .as_i64()
    .or_else(|| body.get("count").and_then(|v| v.as_i64()))
    .ok_or_else(|| ApiError::Decode(format!("expected a count, got {}", body)))
}

pub struct HybridCounter {
  kind: CounterKind,
  source: Arc<dyn CountSource>,
  value: watch::Sender<i64>,
  fetches: AtomicU64,
  /// Bumped by `reset`; fetches started under an older generation are dropped.
  generation: AtomicU64,
}

impl HybridCounter {
  pub fn new(kind: CounterKind, source: Arc<dyn CountSource>) -> Self {
    let (value, _) = watch::channel(0);
    Self {
      kind,
      source,
      value,
      fetches: AtomicU64::new(0),
      generation: AtomicU64::new(0),
    }
  }

  pub fn kind(&self) -> CounterKind {
    self.kind
  }

  /// Fetch the authoritative count and overwrite the local value with it.
  /// On failure the current value is kept. Returns `None` when the counter
  /// was reset while the fetch was in flight; that count is discarded.
  pub async fn refresh(&self) -> Result<Option<i64>, ApiError> {
    let generation = self.generation.load(Ordering::SeqCst);
    let count = self.source.fetch_count(self.kind).await?;
    self.fetches.fetch_add(1, Ordering::Relaxed);

    let mut committed = false;
    self.value.send_if_modified(|value| {
      if self.generation.load(Ordering::SeqCst) != generation {
        return false;
      }
      committed = true;
      let previous = std::mem::replace(value, count);
      if previous != count {
        tracing::debug!("{}: {} -> {}", self.kind, previous, count);
      }
      previous != count
    });

    if committed {
      Ok(Some(count))
    } else {
      tracing::debug!("{}: dropping count fetched before reset", self.kind);
      Ok(None)
    }
  }

  pub fn increment(&self, by: i64) -> i64 {
    self.adjust(by)
  }

  pub fn decrement(&self, by: i64) -> i64 {
    self.adjust(-by)
  }

  fn adjust(&self, delta: i64) -> i64 {
    let mut next = 0;
    self.value.send_modify(|v| {
      *v = (*v + delta).max(0);
      next = *v;
    });
    next
  }

  pub fn value(&self) -> i64 {
    *self.value.borrow()
  }

  pub fn watch(&self) -> watch::Receiver<i64> {
    self.value.subscribe()
  }

  /// Zero the count and discard fetches already in flight.
  pub fn reset(&self) {
    self.value.send_modify(|value| {
      self.generation.fetch_add(1, Ordering::SeqCst);
      *value = 0;
    });
  }

  /// Completed fetches since creation.
  pub fn fetches(&self) -> u64 {
    self.fetches.load(Ordering::Relaxed)
  }
}
