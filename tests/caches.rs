//! Cache behavior through the public API, driven by a manual clock.

use marketsync::cache::{filter_hash, CachedValue, Freshness, QueryCache, QueryKey, TtlCache};
use marketsync::clock::{ManualClock, SharedClock};
use regex::Regex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use types::{Record, ResourceKind};

fn clock() -> (ManualClock, SharedClock) {
  let clock = ManualClock::new();
  let shared: SharedClock = Arc::new(clock.clone());
  (clock, shared)
}

// =============================================================================
// TTL cache
// =============================================================================

#[test]
fn test_entry_expires_between_ten_and_fifteen_ms() {
  let (clock, shared) = clock();
  let cache: TtlCache<&str> = TtlCache::new(shared);
  cache.set("predictions:1", "open", Duration::from_millis(10));

  clock.advance(Duration::from_millis(10));
  assert_eq!(cache.get("predictions:1"), Some("open"));

  clock.advance(Duration::from_millis(5));
  assert_eq!(cache.get("predictions:1"), None);
  assert_eq!(cache.len(), 0);
  assert_eq!(cache.stats().expired, 1);
}

#[test]
fn test_expired_entries_linger_until_read() {
  let (clock, shared) = clock();
  let cache: TtlCache<u32> = TtlCache::new(shared);
  cache.set("a", 1, Duration::from_millis(1));
  cache.set("b", 2, Duration::from_millis(1));
  clock.advance(Duration::from_millis(2));

  assert_eq!(cache.len(), 2);
  assert!(!cache.has("a"));
  assert_eq!(cache.len(), 1);
}

#[test]
fn test_pattern_invalidation_spares_other_namespaces() {
  let (_, shared) = clock();
  let cache: TtlCache<u32> = TtlCache::new(shared);
  cache.set("predictions:a", 1, Duration::from_secs(60));
  cache.set("predictions:b", 2, Duration::from_secs(60));
  cache.set("wallet:x", 3, Duration::from_secs(60));

  let removed = cache.invalidate_pattern(&Regex::new("^predictions").unwrap());
  assert_eq!(removed, 2);
  assert_eq!(cache.keys(), vec!["wallet:x".to_string()]);
  assert_eq!(cache.invalidate_pattern(&Regex::new("^predictions").unwrap()), 0);
}

#[test]
fn test_clear_single_and_all() {
  let (_, shared) = clock();
  let cache: TtlCache<u32> = TtlCache::new(shared);
  cache.set("a", 1, Duration::from_secs(1));
  cache.set("b", 2, Duration::from_secs(1));
  cache.clear(Some("a"));
  assert_eq!(cache.keys(), vec!["b".to_string()]);
  cache.clear(None);
  assert!(cache.is_empty());
}

// =============================================================================
// Query cache
// =============================================================================

fn query_cache(shared: SharedClock) -> Arc<QueryCache> {
  Arc::new(QueryCache::new(
    shared,
    Duration::from_secs(30),
    Duration::from_secs(300),
  ))
}

#[test]
fn test_namespace_prefix_cascades_to_lists_and_details() {
  let (_, shared) = clock();
  let cache = query_cache(shared);
  let list = QueryKey::list(ResourceKind::Prediction, Some(&json!({"status": "open"})));
  let detail = QueryKey::detail(ResourceKind::Prediction, "42");
  let wallet = QueryKey::balance();

  cache.set(list.clone(), CachedValue::PredictionList(vec![]));
  cache.set(detail.clone(), CachedValue::Prediction(Record::new("42")));
  cache.set(
    wallet.clone(),
    CachedValue::Balance(types::Balance {
      amount: 1.0,
      currency: None,
    }),
  );

  assert_eq!(cache.invalidate_prefix(&QueryKey::namespace(ResourceKind::Prediction)), 2);
  assert_eq!(cache.get(&list).unwrap().freshness, Freshness::Invalidated);
  assert_eq!(cache.get(&detail).unwrap().freshness, Freshness::Invalidated);
  assert_eq!(cache.get(&wallet).unwrap().freshness, Freshness::Fresh);
}

#[test]
fn test_filters_hash_independent_of_key_order() {
  let a = json!({"status": "open", "tag": "sports"});
  let b = json!({"tag": "sports", "status": "open"});
  assert_eq!(filter_hash(&a), filter_hash(&b));
  assert_eq!(
    QueryKey::list(ResourceKind::Prediction, Some(&a)),
    QueryKey::list(ResourceKind::Prediction, Some(&b))
  );
  assert_ne!(filter_hash(&a), filter_hash(&json!({"status": "closed"})));
}

#[test]
fn test_staleness_and_gc_windows() {
  let (clock, shared) = clock();
  let cache = query_cache(shared);
  let key = QueryKey::detail(ResourceKind::Profile, "3");
  cache.set(key.clone(), CachedValue::Profile(Record::new("3")));

  clock.advance(Duration::from_secs(31));
  let read = cache.get(&key).unwrap();
  assert_eq!(read.freshness, Freshness::Stale);
  assert!(!read.needs_refetch());

  clock.advance(Duration::from_secs(270));
  assert_eq!(cache.collect_garbage(), 1);
  assert!(cache.get(&key).is_none());
}

#[test]
fn test_observed_entries_survive_gc() {
  let (clock, shared) = clock();
  let cache = query_cache(shared);
  let key = QueryKey::balance();
  let observer = cache.observe(key.clone());
  cache.set(key.clone(), CachedValue::UnreadCount(1));

  clock.advance(Duration::from_secs(600));
  assert_eq!(cache.collect_garbage(), 0);

  drop(observer);
  assert_eq!(cache.collect_garbage(), 0);
  clock.advance(Duration::from_secs(301));
  assert_eq!(cache.collect_garbage(), 1);
}

#[tokio::test]
async fn test_only_observed_invalidations_are_announced() {
  let (_, shared) = clock();
  let cache = query_cache(shared);
  let mut refetch = cache.subscribe_refetch();
  let watched = QueryKey::detail(ResourceKind::Prediction, "1");
  let ignored = QueryKey::detail(ResourceKind::Prediction, "2");
  cache.set(watched.clone(), CachedValue::Prediction(Record::new("1")));
  cache.set(ignored.clone(), CachedValue::Prediction(Record::new("2")));
  let _observer = cache.observe(watched.clone());

  cache.invalidate_prefix(&QueryKey::lists(ResourceKind::Prediction));
  cache.invalidate_prefix(&QueryKey::namespace(ResourceKind::Prediction));
  cache.invalidate_prefix(&QueryKey::namespace(ResourceKind::Prediction));

  assert_eq!(refetch.recv().await.unwrap(), watched);
  assert!(refetch.try_recv().is_err());
}

#[test]
fn test_optimistic_write_without_rollback() {
  let (_, shared) = clock();
  let cache = query_cache(shared);
  let key = QueryKey::list(ResourceKind::Comment, None);
  cache.set(key.clone(), CachedValue::CommentList(vec![Record::new("c1")]));

  let written = cache.set_query_data(key.clone(), |current| {
    let mut next = current?.clone();
    next.prepend_record(Record::new("pending").with_field("body", json!("hi")));
    Some(next)
  });
  assert!(written);
  cache.invalidate_prefix(&key);

  let read = cache.get(&key).unwrap();
  assert!(read.needs_refetch());
  match read.value {
    CachedValue::CommentList(items) => assert_eq!(items[0].id, "pending"),
    other => panic!("unexpected {:?}", other),
  }
}
