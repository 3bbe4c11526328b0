use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Resource families exposed by the market API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
  Prediction,
  Comment,
  Conversation,
  Notification,
  Profile,
  Wallet,
  Leaderboard,
}

impl ResourceKind {
  /// Cache namespace and REST collection segment for this kind.
  pub fn namespace(&self) -> &'static str {
    match self {
      Self::Prediction => "predictions",
      Self::Comment => "comments",
      Self::Conversation => "conversations",
      Self::Notification => "notifications",
      Self::Profile => "profiles",
      Self::Wallet => "wallet",
      Self::Leaderboard => "leaderboard",
    }
  }
}

impl std::fmt::Display for ResourceKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.namespace())
  }
}

impl std::str::FromStr for ResourceKind {
  type Err = String;
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "prediction" | "predictions" => Ok(Self::Prediction),
      "comment" | "comments" => Ok(Self::Comment),
      "conversation" | "conversations" => Ok(Self::Conversation),
      "notification" | "notifications" => Ok(Self::Notification),
      "profile" | "profiles" => Ok(Self::Profile),
      "wallet" => Ok(Self::Wallet),
      "leaderboard" => Ok(Self::Leaderboard),
      _ => Err(format!("Unknown resource kind: {}", s)),
    }
  }
}

/// A JSON object with a stable identifier field. Everything else is kept as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(flatten)]
  pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Record {
  pub fn new(id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      fields: serde_json::Map::new(),
    }
  }

  pub fn with_field(mut self, name: &str, value: serde_json::Value) -> Self {
    self.fields.insert(name.to_string(), value);
    self
  }

  pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
    self.fields.get(name)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
  pub amount: f64,
  #[serde(default)]
  pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
  #[serde(deserialize_with = "deserialize_id")]
  pub user_id: String,
  pub rank: u32,
  pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(deserialize_with = "deserialize_id")]
  pub conversation_id: String,
  #[serde(deserialize_with = "deserialize_id")]
  pub sender_id: String,
  pub body: String,
  pub sent_at: DateTime<Utc>,
}

/// A conversation with its loaded messages, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationThread {
  #[serde(deserialize_with = "deserialize_id")]
  pub id: String,
  #[serde(default)]
  pub messages: Vec<Message>,
  #[serde(flatten)]
  pub fields: serde_json::Map<String, serde_json::Value>,
}

impl ConversationThread {
  pub fn contains(&self, message_id: &str) -> bool {
    self.messages.iter().any(|m| m.id == message_id)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
  Online,
  Away,
  Offline,
}

/// Accepts `"42"` and `42` alike; servers are not consistent about id types.
pub fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum RawId {
    Text(String),
    Int(i64),
    Unsigned(u64),
  }

  Ok(match RawId::deserialize(deserializer)? {
    RawId::Text(s) => s,
    RawId::Int(i) => i.to_string(),
    RawId::Unsigned(u) => u.to_string(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_record_accepts_numeric_id() {
    let record: Record = serde_json::from_value(json!({"id": 42, "title": "Rain tomorrow?"})).unwrap();
    assert_eq!(record.id, "42");
    assert_eq!(record.field("title"), Some(&json!("Rain tomorrow?")));
  }

  #[test]
  fn test_resource_kind_parse() {
    assert_eq!("predictions".parse::<ResourceKind>().unwrap(), ResourceKind::Prediction);
    assert_eq!("Wallet".parse::<ResourceKind>().unwrap(), ResourceKind::Wallet);
    assert!("markets".parse::<ResourceKind>().is_err());
  }
}
