//! Write descriptors.
//!
//! A mutation names the request to send, the key prefixes it affects, and
//! optional optimistic edits. The affected prefixes are invalidated when the
//! request settles, whether it succeeded or not; there is no rollback of
//! optimistic edits beyond that.

use serde_json::{json, Value};
use types::{Balance, ResourceKind};

use crate::api::Method;
use crate::cache::{CachedValue, QueryKey};
use crate::counter::CounterKind;

type Updater = Box<dyn FnOnce(Option<&CachedValue>) -> Option<CachedValue> + Send>;

pub struct OptimisticUpdate {
  pub key: QueryKey,
  pub update: Updater,
}

pub struct Mutation {
  pub method: Method,
  pub resource: String,
  pub payload: Option<Value>,
  pub affects: Vec<QueryKey>,
  pub optimistic: Vec<OptimisticUpdate>,
  pub counters: Vec<CounterKind>,
}

impl Mutation {
  pub fn new(method: Method, resource: impl Into<String>) -> Self {
    Self {
      method,
      resource: resource.into(),
      payload: None,
      affects: Vec::new(),
      optimistic: Vec::new(),
      counters: Vec::new(),
    }
  }

  pub fn payload(mut self, payload: Value) -> Self {
    self.payload = Some(payload);
    self
  }

  pub fn affects(mut self, prefix: QueryKey) -> Self {
    self.affects.push(prefix);
    self
  }

  pub fn optimistic<F>(mut self, key: QueryKey, update: F) -> Self
  where
    F: FnOnce(Option<&CachedValue>) -> Option<CachedValue> + Send + 'static,
  {
    self.optimistic.push(OptimisticUpdate {
      key,
      update: Box::new(update),
    });
    self
  }

  /// Counters to refresh once the request settles.
  pub fn refreshes(mut self, counter: CounterKind) -> Self {
    self.counters.push(counter);
    self
  }

  pub fn create_prediction(payload: Value) -> Self {
    Self::new(Method::Post, "/predictions")
      .payload(payload)
      .affects(QueryKey::lists(ResourceKind::Prediction))
  }

  /// Stake on an outcome. The cached balance drops immediately.
  pub fn place_stake(prediction_id: &str, outcome: &str, amount: f64) -> Self {
    Self::new(Method::Post, format!("/predictions/{}/stakes", prediction_id))
      .payload(json!({ "outcome": outcome, "amount": amount }))
      .affects(QueryKey::detail(ResourceKind::Prediction, prediction_id))
      .affects(QueryKey::lists(ResourceKind::Prediction))
      .affects(QueryKey::balance())
      .optimistic(QueryKey::balance(), move |current| match current {
        Some(CachedValue::Balance(b)) => Some(CachedValue::Balance(Balance {
          amount: b.amount - amount,
          currency: b.currency.clone(),
        })),
        _ => None,
      })
  }

  pub fn post_comment(prediction_id: &str, body: &str) -> Self {
    Self::new(Method::Post, format!("/predictions/{}/comments", prediction_id))
      .payload(json!({ "body": body }))
      .affects(QueryKey::lists(ResourceKind::Comment))
      .affects(QueryKey::detail(ResourceKind::Prediction, prediction_id))
  }

  pub fn send_message(conversation_id: &str, body: &str) -> Self {
    Self::new(Method::Post, format!("/conversations/{}/messages", conversation_id))
      .payload(json!({ "body": body }))
      .affects(QueryKey::detail(ResourceKind::Conversation, conversation_id))
      .affects(QueryKey::lists(ResourceKind::Conversation))
  }

  pub fn mark_conversation_read(conversation_id: &str) -> Self {
    Self::new(Method::Post, format!("/conversations/{}/read", conversation_id))
      .affects(QueryKey::lists(ResourceKind::Conversation))
      .refreshes(CounterKind::UnreadMessages)
  }

  pub fn mark_notifications_read() -> Self {
    Self::new(Method::Post, "/notifications/read")
      .affects(QueryKey::lists(ResourceKind::Notification))
      .refreshes(CounterKind::UnreadNotifications)
  }

  pub fn update_profile(user_id: &str, changes: Value) -> Self {
    Self::new(Method::Patch, format!("/profiles/{}", user_id))
      .payload(changes)
      .affects(QueryKey::detail(ResourceKind::Profile, user_id))
  }
}

impl std::fmt::Debug for Mutation {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Mutation")
      .field("method", &self.method)
      .field("resource", &self.resource)
      .field("affects", &self.affects)
      .field("optimistic", &self.optimistic.len())
      .finish()
  }
}
