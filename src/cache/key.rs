//! Hierarchical query keys.
//!
//! A key is an ordered tuple of segments, typically
//! `(namespace, resource, id?, filter_hash?)`. Prefix matching is by whole
//! segments, so `(predictions,)` covers `(predictions, detail, 42)` but
//! `(pred,)` covers nothing.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

use types::ResourceKind;

const FILTER_HASH_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
  pub fn new<I, S>(segments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self(segments.into_iter().map(Into::into).collect())
  }

  /// Everything cached about one resource kind.
  pub fn namespace(kind: ResourceKind) -> Self {
    Self::new([kind.namespace()])
  }

  /// Every list query for a kind, regardless of filters.
  pub fn lists(kind: ResourceKind) -> Self {
    Self::new([kind.namespace(), "list"])
  }

  /// One list query. Filters are folded into a stable hash segment.
  pub fn list(kind: ResourceKind, filter: Option<&serde_json::Value>) -> Self {
    let mut key = Self::lists(kind);
    if let Some(filter) = filter {
      key.0.push(filter_hash(filter));
    }
    key
  }

  pub fn detail(kind: ResourceKind, id: &str) -> Self {
    Self::new([kind.namespace(), "detail", id])
  }

  pub fn balance() -> Self {
    Self::new([ResourceKind::Wallet.namespace(), "balance"])
  }

  pub fn leaderboard() -> Self {
    Self::new([ResourceKind::Leaderboard.namespace(), "list"])
  }

  pub fn segments(&self) -> &[String] {
    &self.0
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn child(&self, segment: impl Into<String>) -> Self {
    let mut segments = self.0.clone();
    segments.push(segment.into());
    Self(segments)
  }

  /// True when `prefix` matches this key segment-for-segment. The empty key
  /// is a prefix of everything.
  pub fn starts_with(&self, prefix: &QueryKey) -> bool {
    self.0.len() >= prefix.0.len() && self.0.iter().zip(&prefix.0).all(|(a, b)| a == b)
  }

  /// Flat form used as the TTL cache key, e.g. `predictions:detail:42`.
  /// A `:` inside a segment is written as `%3A` (and `%` as `%25`), so one
  /// flat key never reads as a prefix of another.
  pub fn flat(&self) -> String {
    self
      .0
      .iter()
      .map(|seg| escape_segment(seg))
      .collect::<Vec<_>>()
      .join(":")
  }

  /// Regex over flat keys equivalent to [`QueryKey::starts_with`].
  pub fn prefix_pattern(&self) -> Regex {
    if self.0.is_empty() {
      return match_all();
    }
    let pattern = format!("^{}(:|$)", regex::escape(&self.flat()));
    Regex::new(&pattern).unwrap_or_else(|_| match_all())
  }
}

impl std::fmt::Display for QueryKey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "({})", self.0.join(", "))
  }
}

impl std::str::FromStr for QueryKey {
  type Err = String;

  /// Parses the flat form (`predictions:detail:42`).
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let s = s.trim();
    if s.is_empty() {
      return Ok(Self(Vec::new()));
    }
    if s.split(':').any(|seg| seg.is_empty()) {
      return Err(format!("Empty segment in key: {}", s));
    }
    Ok(Self::new(s.split(':').map(unescape_segment)))
  }
}

fn escape_segment(segment: &str) -> Cow<'_, str> {
  if segment.contains([':', '%']) {
    Cow::Owned(segment.replace('%', "%25").replace(':', "%3A"))
  } else {
    Cow::Borrowed(segment)
  }
}

fn unescape_segment(segment: &str) -> String {
  segment.replace("%3A", ":").replace("%25", "%")
}

fn match_all() -> Regex {
  Regex::new("").expect("empty regex is valid")
}

/// Deterministic hash of filter parameters. Object keys are sorted first so
/// `{a, b}` and `{b, a}` hash identically.
pub fn filter_hash(filter: &serde_json::Value) -> String {
  let canonical = canonicalize(filter).to_string();
  let digest = Sha256::digest(canonical.as_bytes());
  let mut hash = hex::encode(digest);
  hash.truncate(FILTER_HASH_LEN);
  hash
}

fn canonicalize(value: &serde_json::Value) -> serde_json::Value {
  match value {
    serde_json::Value::Object(map) => {
      let mut entries: Vec<_> = map.iter().collect();
      entries.sort_by(|a, b| a.0.cmp(b.0));
      serde_json::Value::Object(
        entries
          .into_iter()
          .map(|(k, v)| (k.clone(), canonicalize(v)))
          .collect(),
      )
    }
    serde_json::Value::Array(items) => {
      serde_json::Value::Array(items.iter().map(canonicalize).collect())
    }
    other => other.clone(),
  }
}
