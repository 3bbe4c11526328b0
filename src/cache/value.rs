//! Typed cache payloads, one variant per resource shape.

use serde::{Deserialize, Serialize};
use types::{Balance, ConversationThread, LeaderboardEntry, Message, Record, ResourceKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum CachedValue {
  PredictionList(Vec<Record>),
  Prediction(Record),
  CommentList(Vec<Record>),
  ConversationList(Vec<Record>),
  Conversation(ConversationThread),
  NotificationList(Vec<Record>),
  Profile(Record),
  Balance(Balance),
  Leaderboard(Vec<LeaderboardEntry>),
  UnreadCount(i64),
}

impl CachedValue {
  pub fn resource_kind(&self) -> ResourceKind {
    match self {
      Self::PredictionList(_) | Self::Prediction(_) => ResourceKind::Prediction,
      Self::CommentList(_) => ResourceKind::Comment,
      Self::ConversationList(_) | Self::Conversation(_) => ResourceKind::Conversation,
      Self::NotificationList(_) | Self::UnreadCount(_) => ResourceKind::Notification,
      Self::Profile(_) => ResourceKind::Profile,
      Self::Balance(_) => ResourceKind::Wallet,
      Self::Leaderboard(_) => ResourceKind::Leaderboard,
    }
  }

  /// Short human description, used by the CLI.
  pub fn summary(&self) -> String {
    match self {
      Self::PredictionList(items)
      | Self::CommentList(items)
      | Self::ConversationList(items)
      | Self::NotificationList(items) => format!("{} items", items.len()),
      Self::Prediction(r) | Self::Profile(r) => format!("id {}", r.id),
      Self::Conversation(thread) => {
        format!("conversation {} ({} messages)", thread.id, thread.messages.len())
      }
      Self::Balance(b) => match &b.currency {
        Some(currency) => format!("{} {}", b.amount, currency),
        None => b.amount.to_string(),
      },
      Self::Leaderboard(entries) => format!("{} ranked users", entries.len()),
      Self::UnreadCount(n) => format!("{} unread", n),
    }
  }

  /// Add a record to the front of a list value. Returns false when the value
  /// is not a list or already holds a record with the same id.
  pub fn prepend_record(&mut self, record: Record) -> bool {
    let items = match self {
      Self::PredictionList(items)
      | Self::CommentList(items)
      | Self::ConversationList(items)
      | Self::NotificationList(items) => items,
      _ => return false,
    };
    if items.iter().any(|r| r.id == record.id) {
      return false;
    }
    items.insert(0, record);
    true
  }

  /// Append a message to a cached thread unless it is already there.
  pub fn append_message(&mut self, message: Message) -> bool {
    match self {
      Self::Conversation(thread) if !thread.contains(&message.id) => {
        thread.messages.push(message);
        true
      }
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::Utc;

  fn message(id: &str) -> Message {
    Message {
      id: id.into(),
      conversation_id: "c1".into(),
      sender_id: "u1".into(),
      body: "hello".into(),
      sent_at: Utc::now(),
    }
  }

  #[test]
  fn test_append_message_is_idempotent() {
    let mut value = CachedValue::Conversation(ConversationThread {
      id: "c1".into(),
      messages: vec![],
      fields: Default::default(),
    });
    assert!(value.append_message(message("m1")));
    assert!(!value.append_message(message("m1")));
    let CachedValue::Conversation(thread) = &value else {
      panic!("variant changed");
    };
    assert_eq!(thread.messages.len(), 1);
  }

  #[test]
  fn test_prepend_record_skips_duplicates_and_non_lists() {
    let mut list = CachedValue::PredictionList(vec![Record::new("1")]);
    assert!(list.prepend_record(Record::new("2")));
    assert!(!list.prepend_record(Record::new("2")));
    assert_eq!(list.summary(), "2 items");

    let mut count = CachedValue::UnreadCount(3);
    assert!(!count.prepend_record(Record::new("9")));
  }

  #[test]
  fn test_tagged_serialization() {
    let value = CachedValue::UnreadCount(4);
    assert_eq!(
      serde_json::to_value(&value).unwrap(),
      serde_json::json!({"kind": "unread_count", "data": 4})
    );
  }
}
