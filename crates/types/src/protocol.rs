use serde::{Deserialize, Serialize};

use super::resource::{deserialize_id, Balance, LeaderboardEntry, Message, PresenceStatus, Record, ResourceKind};

/// Server-pushed events. Delivery is at-least-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum PushEvent {
  #[serde(rename = "resource:created")]
  ResourceCreated {
    kind: ResourceKind,
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
  },
  #[serde(rename = "resource:updated")]
  ResourceUpdated {
    kind: ResourceKind,
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
  },
  #[serde(rename = "resource:resolved")]
  ResourceResolved {
    kind: ResourceKind,
    #[serde(deserialize_with = "deserialize_id")]
    id: String,
    #[serde(default)]
    balance: Option<Balance>,
  },
  #[serde(rename = "message:new")]
  MessageArrived {
    #[serde(deserialize_with = "deserialize_id")]
    conversation_id: String,
    message: Message,
  },
  #[serde(rename = "notification:new")]
  NotificationArrived { notification: Record },
  #[serde(rename = "balance:updated")]
  BalanceUpdated { balance: Balance },
  #[serde(rename = "leaderboard:updated")]
  LeaderboardUpdated { entries: Vec<LeaderboardEntry> },
  #[serde(rename = "presence:changed")]
  PresenceChanged {
    #[serde(deserialize_with = "deserialize_id")]
    user_id: String,
    status: PresenceStatus,
  },
}

impl PushEvent {
  pub fn name(&self) -> &'static str {
    match self {
      Self::ResourceCreated { .. } => "resource:created",
      Self::ResourceUpdated { .. } => "resource:updated",
      Self::ResourceResolved { .. } => "resource:resolved",
      Self::MessageArrived { .. } => "message:new",
      Self::NotificationArrived { .. } => "notification:new",
      Self::BalanceUpdated { .. } => "balance:updated",
      Self::LeaderboardUpdated { .. } => "leaderboard:updated",
      Self::PresenceChanged { .. } => "presence:changed",
    }
  }

  /// The topic this event was scoped to on the server.
  pub fn topic(&self) -> Topic {
    match self {
      Self::ResourceCreated { .. }
      | Self::ResourceUpdated { .. }
      | Self::ResourceResolved { .. }
      | Self::PresenceChanged { .. } => Topic::Global(GlobalTopic::Resources),
      Self::MessageArrived {
        conversation_id, ..
      } => Topic::Room(RoomId::conversation(conversation_id)),
      Self::NotificationArrived { .. } => Topic::Global(GlobalTopic::Notifications),
      Self::BalanceUpdated { .. } => Topic::Global(GlobalTopic::Balance),
      Self::LeaderboardUpdated { .. } => Topic::Global(GlobalTopic::Leaderboard),
    }
  }
}

/// Topics that stay subscribed for the whole connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalTopic {
  Balance,
  Notifications,
  Leaderboard,
  Resources,
}

impl GlobalTopic {
  pub const ALL: [GlobalTopic; 4] = [
    GlobalTopic::Balance,
    GlobalTopic::Notifications,
    GlobalTopic::Leaderboard,
    GlobalTopic::Resources,
  ];
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
  pub fn new(id: impl Into<String>) -> Self {
    Self(id.into())
  }

  pub fn conversation(conversation_id: &str) -> Self {
    Self(format!("conversation:{}", conversation_id))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl std::fmt::Display for RoomId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
  Global(GlobalTopic),
  Room(RoomId),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
  Subscribe { topic: GlobalTopic },
  Join { room: RoomId },
  Leave { room: RoomId },
  Ping,
}
