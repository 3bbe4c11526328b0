//! Cache hot-path benchmarks.
//!
//! Run with: cargo bench --bench cache

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use marketsync::cache::{filter_hash, CachedValue, QueryCache, QueryKey, TtlCache};
use marketsync::clock::{SharedClock, SystemClock};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use types::{Record, ResourceKind};

fn clock() -> SharedClock {
  Arc::new(SystemClock)
}

fn bench_ttl(c: &mut Criterion) {
  let mut group = c.benchmark_group("ttl_cache");
  group.throughput(Throughput::Elements(1));

  let cache: TtlCache<CachedValue> = TtlCache::new(clock());
  for i in 0..1000 {
    cache.set(
      format!("predictions:detail:{}", i),
      CachedValue::Prediction(Record::new(i.to_string())),
      Duration::from_secs(600),
    );
  }

  group.bench_function("get_hit", |b| {
    b.iter(|| black_box(cache.get("predictions:detail:500")));
  });

  group.bench_function("get_miss", |b| {
    b.iter(|| black_box(cache.get("wallet:balance")));
  });

  group.finish();
}

fn bench_invalidation(c: &mut Criterion) {
  let mut group = c.benchmark_group("invalidation");

  for size in [100, 1000, 10000] {
    group.bench_with_input(BenchmarkId::new("query_prefix", size), &size, |b, &size| {
      let cache = QueryCache::new(clock(), Duration::from_secs(30), Duration::from_secs(300));
      let prefix = QueryKey::namespace(ResourceKind::Prediction);
      b.iter(|| {
        for i in 0..size {
          cache.set(
            QueryKey::detail(ResourceKind::Prediction, &i.to_string()),
            CachedValue::UnreadCount(i as i64),
          );
        }
        black_box(cache.invalidate_prefix(&prefix));
      });
    });

    group.bench_with_input(BenchmarkId::new("ttl_pattern", size), &size, |b, &size| {
      let cache: TtlCache<i64> = TtlCache::new(clock());
      let pattern = QueryKey::namespace(ResourceKind::Prediction).prefix_pattern();
      b.iter(|| {
        for i in 0..size {
          cache.set(format!("predictions:detail:{}", i), i as i64, Duration::from_secs(60));
        }
        black_box(cache.invalidate_pattern(&pattern));
      });
    });
  }

  group.finish();
}

fn bench_keys(c: &mut Criterion) {
  let filter = json!({"status": "open", "tag": "sports", "page": 3, "sort": {"by": "volume"}});
  c.bench_function("filter_hash", |b| b.iter(|| black_box(filter_hash(&filter))));
  c.bench_function("list_key", |b| {
    b.iter(|| black_box(QueryKey::list(ResourceKind::Prediction, Some(&filter))))
  });
}

criterion_group!(benches, bench_ttl, bench_invalidation, bench_keys);
criterion_main!(benches);
