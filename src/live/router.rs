//! Push event to cache action mapping.
//!
//! [`EventRouter::actions`] is the whole event table. Every action it emits
//! is idempotent, so a redelivered event leaves the caches as they were
//! after the first delivery.

use std::time::Duration;
use types::{PushEvent, ResourceKind};

use crate::cache::{CachedValue, QueryCache, QueryKey, TtlCache};
use crate::counter::CounterKind;

#[derive(Debug, Clone, PartialEq)]
pub enum CacheAction {
  /// Invalidate a key prefix in both caches.
  Invalidate(QueryKey),
  /// Replace the cached value outright.
  Overwrite(QueryKey, CachedValue),
  /// Append a message to a cached thread, skipping ids already present.
  AppendMessage { thread: QueryKey, message: types::Message },
  RefreshCounter(CounterKind),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EventRouter {
  append_messages_locally: bool,
}

impl EventRouter {
  pub fn new(append_messages_locally: bool) -> Self {
    Self {
      append_messages_locally,
    }
  }

  pub fn actions(&self, event: &PushEvent) -> Vec<CacheAction> {
    use CacheAction::*;

    match event {
      PushEvent::ResourceCreated { kind, .. } => vec![Invalidate(QueryKey::lists(*kind))],
      PushEvent::ResourceUpdated { kind, id } => vec![
        Invalidate(QueryKey::detail(*kind, id)),
        Invalidate(QueryKey::lists(*kind)),
      ],
      PushEvent::ResourceResolved { kind, id, balance } => {
        let wallet = match balance {
          Some(balance) => Overwrite(QueryKey::balance(), CachedValue::Balance(balance.clone())),
          None => Invalidate(QueryKey::balance()),
        };
        vec![
          Invalidate(QueryKey::detail(*kind, id)),
          Invalidate(QueryKey::lists(*kind)),
          wallet,
        ]
      }
      PushEvent::MessageArrived {
        conversation_id,
        message,
      } => {
        let thread = QueryKey::detail(ResourceKind::Conversation, conversation_id);
        let thread_action = if self.append_messages_locally {
          AppendMessage {
            thread,
            message: message.clone(),
          }
        } else {
          Invalidate(thread)
        };
        vec![
          thread_action,
          Invalidate(QueryKey::lists(ResourceKind::Conversation)),
          RefreshCounter(CounterKind::UnreadMessages),
        ]
      }
      PushEvent::NotificationArrived { .. } => vec![
        Invalidate(QueryKey::lists(ResourceKind::Notification)),
        RefreshCounter(CounterKind::UnreadNotifications),
      ],
      PushEvent::BalanceUpdated { balance } => vec![Overwrite(
        QueryKey::balance(),
        CachedValue::Balance(balance.clone()),
      )],
      PushEvent::LeaderboardUpdated { entries } => vec![Overwrite(
        QueryKey::leaderboard(),
        CachedValue::Leaderboard(entries.clone()),
      )],
      PushEvent::PresenceChanged { user_id, .. } => {
        vec![Invalidate(QueryKey::detail(ResourceKind::Profile, user_id))]
      }
    }
  }

  /// Apply an event's cache actions. Counter refreshes need the network and
  /// are returned for the caller to run.
  pub fn apply(
    &self,
    event: &PushEvent,
    ttl: &TtlCache<CachedValue>,
    queries: &QueryCache,
    ttl_duration: Duration,
  ) -> Vec<CounterKind> {
    let mut counters = Vec::new();
    for action in self.actions(event) {
      match action {
        CacheAction::Invalidate(prefix) => {
          let marked = queries.invalidate_prefix(&prefix);
          let dropped = ttl.invalidate_pattern(&prefix.prefix_pattern());
          tracing::debug!(
            "{}: invalidated {} ({} queries, {} ttl entries)",
            event.name(),
            prefix,
            marked,
            dropped
          );
        }
        CacheAction::Overwrite(key, value) => {
          ttl.set(key.flat(), value.clone(), ttl_duration);
          queries.set(key, value);
        }
        CacheAction::AppendMessage { thread, message } => {
          match queries.modify(&thread, |value| value.append_message(message)) {
            Some(true) => ttl.clear(Some(&thread.flat())),
            Some(false) => {}
            None => {
              // Nothing live to append to; a copy left in the TTL cache is
              // missing this message.
              queries.invalidate_prefix(&thread);
              ttl.invalidate_pattern(&thread.prefix_pattern());
            }
          }
        }
        CacheAction::RefreshCounter(kind) => counters.push(kind),
      }
    }
    counters
  }
}
