//! Read descriptors: what to fetch, where it is cached, how to decode it.

use serde::de::DeserializeOwned;
use serde_json::Value;
use types::{Balance, ConversationThread, LeaderboardEntry, Record, ResourceKind};

use crate::cache::{CachedValue, QueryKey};

#[derive(Debug, Clone, PartialEq)]
pub enum Query {
  Predictions { filter: Option<Value> },
  Prediction { id: String },
  Comments { prediction_id: String },
  Conversations,
  Conversation { id: String },
  Notifications,
  Profile { user_id: String },
  Balance,
  Leaderboard,
}

impl Query {
  pub fn key(&self) -> QueryKey {
    match self {
      Self::Predictions { filter } => QueryKey::list(ResourceKind::Prediction, filter.as_ref()),
      Self::Prediction { id } => QueryKey::detail(ResourceKind::Prediction, id),
      Self::Comments { prediction_id } => QueryKey::list(
        ResourceKind::Comment,
        Some(&serde_json::json!({ "prediction_id": prediction_id })),
      ),
      Self::Conversations => QueryKey::list(ResourceKind::Conversation, None),
      Self::Conversation { id } => QueryKey::detail(ResourceKind::Conversation, id),
      Self::Notifications => QueryKey::list(ResourceKind::Notification, None),
      Self::Profile { user_id } => QueryKey::detail(ResourceKind::Profile, user_id),
      Self::Balance => QueryKey::balance(),
      Self::Leaderboard => QueryKey::leaderboard(),
    }
  }

  /// API path, relative to the configured base url.
  pub fn resource(&self) -> String {
    match self {
      Self::Predictions { .. } => "/predictions".into(),
      Self::Prediction { id } => format!("/predictions/{}", id),
      Self::Comments { prediction_id } => format!("/predictions/{}/comments", prediction_id),
      Self::Conversations => "/conversations".into(),
      Self::Conversation { id } => format!("/conversations/{}", id),
      Self::Notifications => "/notifications".into(),
      Self::Profile { user_id } => format!("/profiles/{}", user_id),
      Self::Balance => "/wallet/balance".into(),
      Self::Leaderboard => "/leaderboard".into(),
    }
  }

  /// Query-string parameters, if any.
  pub fn params(&self) -> Option<Value> {
    match self {
      Self::Predictions { filter } => filter.clone(),
      _ => None,
    }
  }

  pub fn decode(&self, body: Value) -> Result<CachedValue, serde_json::Error> {
    Ok(match self {
      Self::Predictions { .. } => CachedValue::PredictionList(list::<Record>(body)?),
      Self::Prediction { .. } => CachedValue::Prediction(serde_json::from_value(body)?),
      Self::Comments { .. } => CachedValue::CommentList(list::<Record>(body)?),
      Self::Conversations => CachedValue::ConversationList(list::<Record>(body)?),
      Self::Conversation { .. } => {
        CachedValue::Conversation(serde_json::from_value::<ConversationThread>(body)?)
      }
      Self::Notifications => CachedValue::NotificationList(list::<Record>(body)?),
      Self::Profile { .. } => CachedValue::Profile(serde_json::from_value(body)?),
      Self::Balance => CachedValue::Balance(serde_json::from_value::<Balance>(body)?),
      Self::Leaderboard => CachedValue::Leaderboard(list::<LeaderboardEntry>(body)?),
    })
  }
}

/// List endpoints answer either with a bare array or with the array under
/// `items` or `data`.
fn list<T: DeserializeOwned>(body: Value) -> Result<Vec<T>, serde_json::Error> {
  let items = match body {
    Value::Object(mut map) => match map.remove("items").or_else(|| map.remove("data")) {
      Some(items) => items,
      None => Value::Object(map),
    },
    other => other,
  };
  serde_json::from_value(items)
}

impl std::str::FromStr for Query {
  type Err = String;

  /// Parses `predictions [key=value ...]`, `prediction <id>`, `comments <id>`,
  /// `conversations`, `conversation <id>`, `notifications`, `profile <id>`,
  /// `balance`, `leaderboard`.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut parts = s.split_whitespace();
    let name = parts.next().ok_or("Empty query")?;
    let rest: Vec<&str> = parts.collect();
    let id = || -> Result<String, String> {
      match rest.as_slice() {
        [id] => Ok((*id).to_string()),
        _ => Err(format!("{} expects exactly one id", name)),
      }
    };

    match name.to_lowercase().as_str() {
      "predictions" => {
        if rest.is_empty() {
          return Ok(Self::Predictions { filter: None });
        }
        let mut filter = serde_json::Map::new();
        for pair in &rest {
          let (k, v) = pair
            .split_once('=')
            .ok_or_else(|| format!("Expected key=value, got {}", pair))?;
          filter.insert(k.to_string(), Value::String(v.to_string()));
        }
        Ok(Self::Predictions {
          filter: Some(Value::Object(filter)),
        })
      }
      "prediction" => Ok(Self::Prediction { id: id()? }),
      "comments" => Ok(Self::Comments { prediction_id: id()? }),
      "conversations" => Ok(Self::Conversations),
      "conversation" => Ok(Self::Conversation { id: id()? }),
      "notifications" => Ok(Self::Notifications),
      "profile" => Ok(Self::Profile { user_id: id()? }),
      "balance" => Ok(Self::Balance),
      "leaderboard" => Ok(Self::Leaderboard),
      other => Err(format!("Unknown query: {}", other)),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_keys_nest_under_their_namespace() {
    let list = Query::Predictions {
      filter: Some(json!({"status": "open"})),
    }
    .key();
    assert!(list.starts_with(&QueryKey::lists(ResourceKind::Prediction)));
    assert_eq!(list.segments().len(), 3);

    let comments = Query::Comments {
      prediction_id: "7".into(),
    }
    .key();
    assert!(comments.starts_with(&QueryKey::lists(ResourceKind::Comment)));
    assert_eq!(Query::Balance.key(), QueryKey::balance());
  }

  #[test]
  fn test_decode_wrapped_and_bare_lists() {
    let q = Query::Predictions { filter: None };
    let wrapped = q.decode(json!({"items": [{"id": 1, "title": "Rain"}]})).unwrap();
    let bare = q.decode(json!([{"id": 1, "title": "Rain"}])).unwrap();
    assert_eq!(wrapped, bare);
    match bare {
      CachedValue::PredictionList(items) => assert_eq!(items[0].id, "1"),
      other => panic!("unexpected {:?}", other),
    }
  }

  #[test]
  fn test_decode_rejects_wrong_shape() {
    assert!(Query::Balance.decode(json!({"total": "lots"})).is_err());
    assert!(Query::Leaderboard.decode(json!({"rank": 1})).is_err());
  }

  #[test]
  fn test_parse() {
    assert_eq!(
      "prediction 42".parse::<Query>().unwrap(),
      Query::Prediction { id: "42".into() }
    );
    assert_eq!(
      "predictions status=open".parse::<Query>().unwrap(),
      Query::Predictions {
        filter: Some(json!({"status": "open"}))
      }
    );
    assert!("profile".parse::<Query>().is_err());
    assert!("markets".parse::<Query>().is_err());
  }
}
