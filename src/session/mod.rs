//! The per-user sync session.
//!
//! A session owns one of everything: the TTL cache, the query cache, the
//! request coalescer, the live channel, the unread counters, and the
//! scheduler that drives polling and GC. Reads go cache first; writes go
//! through the coalescer and invalidate what they declare on settle; pushed
//! events are routed into cache actions by a background pump.

mod mutation;
mod query;

pub use mutation::{Mutation, OptimisticUpdate};
pub use query::Query;

use futures_util::future::join_all;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use types::{PushEvent, RoomId};

use crate::api::{HttpApi, Method, RequestExecutor};
use crate::auth::CredentialStore;
use crate::cache::{CacheStats, CachedValue, QueryCache, QueryKey, QueryObserver, QueryRead, TtlCache};
use crate::clock::{SharedClock, SystemClock};
use crate::coalescer::{CoalescerStats, RequestCoalescer};
use crate::config::SyncConfig;
use crate::counter::{CoalescedCountSource, CounterKind, HybridCounter};
use crate::error::{ApiError, SyncError};
use crate::live::{ConnectionState, Connector, EventRouter, LiveChannel, ReconnectPolicy, Subscription, WsConnector};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Serialize)]
pub struct SessionStats {
  pub ttl: CacheStats,
  pub queries: usize,
  pub coalescer: CoalescerStats,
  pub live: ConnectionState,
  pub unread: BTreeMap<CounterKind, i64>,
}

pub struct SyncSession {
  config: SyncConfig,
  credentials: CredentialStore,
  ttl: TtlCache<CachedValue>,
  queries: Arc<QueryCache>,
  coalescer: RequestCoalescer,
  live: LiveChannel,
  router: EventRouter,
  counters: BTreeMap<CounterKind, Arc<HybridCounter>>,
  scheduler: Scheduler,
  /// Every query read so far, so invalidated keys can be refetched.
  known: Mutex<HashMap<QueryKey, Query>>,
  background: Mutex<Vec<JoinHandle<()>>>,
  started: AtomicBool,
  /// Bumped on every reset; fetches that began before a reset are dropped.
  epoch: AtomicU64,
}

impl SyncSession {
  pub fn new(
    config: SyncConfig,
    executor: Arc<dyn RequestExecutor>,
    connector: Arc<dyn Connector>,
    credentials: CredentialStore,
    clock: SharedClock,
  ) -> Arc<Self> {
    let coalescer = RequestCoalescer::new(
      executor,
      config.coalesce_delay(),
      config.coalescer.max_batch_size,
    );
    let source = Arc::new(CoalescedCountSource::new(coalescer.clone()));
    let counters = CounterKind::ALL
      .into_iter()
      .map(|kind| (kind, Arc::new(HybridCounter::new(kind, source.clone()))))
      .collect();
    let live = LiveChannel::new(
      connector,
      credentials.clone(),
      ReconnectPolicy {
        max_attempts: config.live.max_reconnect_attempts,
        delay: config.reconnect_delay(),
      },
    );

    Arc::new(Self {
      ttl: TtlCache::new(clock.clone()),
      queries: Arc::new(QueryCache::new(clock, config.stale_time(), config.gc_time())),
      router: EventRouter::new(config.live.append_messages_locally),
      coalescer,
      live,
      counters,
      credentials,
      scheduler: Scheduler::new(),
      known: Mutex::new(HashMap::new()),
      background: Mutex::new(Vec::new()),
      started: AtomicBool::new(false),
      epoch: AtomicU64::new(0),
      config,
    })
  }

  /// Session over HTTP and WebSocket, using the token from the config.
  pub fn connect(config: SyncConfig) -> Result<Arc<Self>, SyncError> {
    let credentials = CredentialStore::new(config.token.clone().filter(|t| !t.is_empty()));
    let api = HttpApi::new(&config.api, credentials.clone())?;
    let connector = WsConnector::new(&config.live.url);
    Ok(Self::new(
      config,
      Arc::new(api),
      Arc::new(connector),
      credentials,
      Arc::new(SystemClock),
    ))
  }

  /// Start background work: the live channel, counter polling, query GC,
  /// and the push, refetch, and credential listeners.
  pub fn start(self: &Arc<Self>) -> bool {
    if self.started.swap(true, Ordering::SeqCst) {
      return false;
    }
    tracing::info!("session: starting");

    if self.config.live.enabled && self.credentials.is_authenticated() {
      self.live.start();
    }

    let queries = Arc::clone(&self.queries);
    self.scheduler.every("query-gc", self.config.gc_interval(), move || {
      let queries = Arc::clone(&queries);
      async move {
        let evicted = queries.collect_garbage();
        if evicted > 0 {
          tracing::debug!("query cache: collected {} entries", evicted);
        }
      }
    });

    for kind in CounterKind::ALL {
      let weak = Arc::downgrade(self);
      self
        .scheduler
        .every(format!("poll:{:?}", kind), self.config.poll_interval(), move || {
          let weak = weak.clone();
          async move {
            if let Some(session) = weak.upgrade() {
              session.refresh_counter(kind).await;
            }
          }
        });
      self.spawn_counter_refresh(kind);
    }

    let handles = vec![
      self.spawn_event_pump(),
      self.spawn_refetch_listener(),
      self.spawn_credential_watcher(),
    ];
    self.background.lock().extend(handles);
    true
  }

  /// Stop background work. Caches are kept.
  pub fn stop(&self) {
    if !self.started.swap(false, Ordering::SeqCst) {
      return;
    }
    tracing::info!("session: stopping");
    self.scheduler.stop_all();
    self.live.stop();
    for handle in self.background.lock().drain(..) {
      handle.abort();
    }
  }

  /// Read through the caches. Fresh and stale values are served from the
  /// query cache; a value evicted there but still alive in the TTL cache is
  /// restored from it; everything else goes to the network.
  pub async fn query(&self, query: Query) -> Result<CachedValue, SyncError> {
    let key = query.key();
    self.known.lock().insert(key.clone(), query.clone());

    match self.queries.get(&key) {
      Some(read) if !read.needs_refetch() => return Ok(read.value),
      Some(_) => {}
      None => {
        if let Some(value) = self.ttl.get(&key.flat()) {
          tracing::debug!("session: restored {} from ttl cache", key);
          self.queries.set(key, value.clone());
          return Ok(value);
        }
      }
    }
    self.fetch(&query).await
  }

  /// Cache-only read with freshness information.
  pub fn peek(&self, query: &Query) -> Option<QueryRead> {
    self.queries.get(&query.key())
  }

  /// Keep a query's key observed. Invalidations of observed keys are
  /// refetched in the background.
  pub fn observe(&self, query: Query) -> QueryObserver {
    let key = query.key();
    self.known.lock().insert(key.clone(), query);
    self.queries.observe(key)
  }

  /// Fetch from the network and write the result to both caches.
  pub async fn fetch(&self, query: &Query) -> Result<CachedValue, SyncError> {
    let key = query.key();
    let epoch = self.epoch.load(Ordering::SeqCst);
    let body = self
      .coalescer
      .enqueue(Method::Get, query.resource(), query.params())
      .await
      .map_err(|e| self.on_api_error(e))?;
    let value = query.decode(body).map_err(|e| SyncError::Shape {
      key: key.clone(),
      reason: e.to_string(),
    })?;

    if self.epoch.load(Ordering::SeqCst) == epoch {
      self.store(key, value.clone());
    } else {
      tracing::debug!("session: dropping {} fetched before reset", key);
    }
    Ok(value)
  }

  fn store(&self, key: QueryKey, value: CachedValue) {
    self.ttl.set(key.flat(), value.clone(), self.config.default_ttl());
    self.queries.set(key, value);
  }

  /// Send a write. Optimistic edits land first; the declared prefixes are
  /// invalidated once the request settles, success or not.
  pub async fn mutate(self: &Arc<Self>, mutation: Mutation) -> Result<serde_json::Value, SyncError> {
    let Mutation {
      method,
      resource,
      payload,
      affects,
      optimistic,
      counters,
    } = mutation;

    for update in optimistic {
      self.queries.set_query_data(update.key, update.update);
    }

    tracing::debug!("session: {} {}", method, resource);
    let result = self.coalescer.enqueue(method, resource, payload).await;

    for prefix in &affects {
      self.invalidate(prefix);
    }
    for kind in counters {
      self.spawn_counter_refresh(kind);
    }
    result.map_err(|e| self.on_api_error(e))
  }

  /// Invalidate a prefix in both caches. Returns the number of query
  /// entries that changed state.
  pub fn invalidate(&self, prefix: &QueryKey) -> usize {
    self.ttl.invalidate_pattern(&prefix.prefix_pattern());
    self.queries.invalidate_prefix(prefix)
  }

  /// Apply one pushed event to the caches.
  pub fn apply_event(self: &Arc<Self>, event: &PushEvent) {
    let refresh = self
      .router
      .apply(event, &self.ttl, &self.queries, self.config.default_ttl());
    for kind in refresh {
      self.spawn_counter_refresh(kind);
    }
  }

  pub fn join_conversation(&self, conversation_id: &str) -> Subscription {
    self.live.join_room(RoomId::conversation(conversation_id))
  }

  /// Drop all cached data, refresh the counters, and refetch whatever is
  /// still observed.
  pub async fn sync_all(&self) -> Result<(), SyncError> {
    tracing::info!("session: full resync");
    self.ttl.clear(None);
    self.queries.clear();

    let observed: Vec<Query> = self
      .known
      .lock()
      .iter()
      .filter(|(key, _)| self.queries.observer_count(key) > 0)
      .map(|(_, query)| query.clone())
      .collect();

    for kind in CounterKind::ALL {
      self.refresh_counter(kind).await;
    }
    let results = join_all(observed.iter().map(|q| self.fetch(q))).await;
    results.into_iter().find_map(Result::err).map_or(Ok(()), Err)
  }

  pub fn login(&self, token: impl Into<String>) {
    tracing::info!("session: credential set");
    self.credentials.set_token(token);
  }

  pub fn logout(&self) {
    tracing::info!("session: logging out");
    self.credentials.clear();
    self.reset("logout");
    self.stop();
  }

  /// Wipe all session state after losing the credential.
  fn reset(&self, reason: &str) {
    tracing::warn!("session: resetting ({})", reason);
    self.epoch.fetch_add(1, Ordering::SeqCst);
    self.ttl.clear(None);
    self.queries.clear();
    self.known.lock().clear();
    let cancelled = self.coalescer.cancel_pending();
    if cancelled > 0 {
      tracing::debug!("session: cancelled {} queued requests", cancelled);
    }
    for counter in self.counters.values() {
      counter.reset();
    }
    self.live.stop();
  }

  fn on_api_error(&self, err: ApiError) -> SyncError {
    if err.is_unauthorized() {
      self.credentials.clear();
      self.reset("unauthorized");
    }
    err.into()
  }

  /// Refresh one counter and mirror it into the query cache. Errors are
  /// logged; an auth failure resets the session.
  pub async fn refresh_counter(&self, kind: CounterKind) -> Option<i64> {
    let counter = self.counters.get(&kind)?;
    let epoch = self.epoch.load(Ordering::SeqCst);
    match counter.refresh().await {
      Ok(Some(count)) => {
        if self.epoch.load(Ordering::SeqCst) == epoch {
          self.queries.set(kind.key(), CachedValue::UnreadCount(count));
        }
        Some(count)
      }
      Ok(None) => None,
      Err(e) => {
        if e.is_unauthorized() {
          self.on_api_error(e);
        } else {
          tracing::warn!("{} refresh failed: {}", kind, e);
        }
        None
      }
    }
  }

  fn spawn_counter_refresh(self: &Arc<Self>, kind: CounterKind) {
    let weak = Arc::downgrade(self);
    tokio::spawn(async move {
      if let Some(session) = weak.upgrade() {
        session.refresh_counter(kind).await;
      }
    });
  }

  fn spawn_event_pump(self: &Arc<Self>) -> JoinHandle<()> {
    let mut events = self.live.subscribe();
    let weak = Arc::downgrade(self);
    tokio::spawn(async move {
      loop {
        let event = events.recv().await;
        let Some(session) = weak.upgrade() else {
          break;
        };
        match event {
          Ok(event) => session.apply_event(&event),
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            tracing::warn!("session: missed {} push events, invalidating everything", missed);
            session.invalidate(&QueryKey::new(Vec::<String>::new()));
            for kind in CounterKind::ALL {
              session.spawn_counter_refresh(kind);
            }
          }
          Err(broadcast::error::RecvError::Closed) => break,
        }
      }
    })
  }

  fn spawn_refetch_listener(self: &Arc<Self>) -> JoinHandle<()> {
    let mut keys = self.queries.subscribe_refetch();
    let weak = Arc::downgrade(self);
    tokio::spawn(async move {
      loop {
        let key = match keys.recv().await {
          Ok(key) => key,
          Err(broadcast::error::RecvError::Lagged(missed)) => {
            tracing::warn!("session: refetch listener lagged by {}", missed);
            continue;
          }
          Err(broadcast::error::RecvError::Closed) => break,
        };
        let Some(session) = weak.upgrade() else {
          break;
        };
        let query = session.known.lock().get(&key).cloned();
        if let Some(query) = query {
          tokio::spawn(async move {
            if let Err(e) = session.fetch(&query).await {
              tracing::debug!("session: background refetch of {} failed: {}", key, e);
            }
          });
        }
      }
    })
  }

  fn spawn_credential_watcher(self: &Arc<Self>) -> JoinHandle<()> {
    let mut credential = self.credentials.watch();
    let weak: Weak<Self> = Arc::downgrade(self);
    tokio::spawn(async move {
      let mut had_token = credential.borrow_and_update().is_some();
      while credential.changed().await.is_ok() {
        let present = credential.borrow_and_update().is_some();
        let Some(session) = weak.upgrade() else {
          break;
        };
        if !present {
          if had_token {
            session.reset("credential cleared");
          }
        } else if session.config.live.enabled && !session.live.state().is_active() {
          session.live.start();
        }
        had_token = present;
      }
    })
  }

  pub fn stats(&self) -> SessionStats {
    SessionStats {
      ttl: self.ttl.stats(),
      queries: self.queries.len(),
      coalescer: self.coalescer.stats(),
      live: self.live.state(),
      unread: self
        .counters
        .iter()
        .map(|(kind, counter)| (*kind, counter.value()))
        .collect(),
    }
  }

  pub fn counter(&self, kind: CounterKind) -> Option<&Arc<HybridCounter>> {
    self.counters.get(&kind)
  }

  pub fn credentials(&self) -> &CredentialStore {
    &self.credentials
  }

  pub fn live(&self) -> &LiveChannel {
    &self.live
  }

  pub fn ttl_cache(&self) -> &TtlCache<CachedValue> {
    &self.ttl
  }

  pub fn query_cache(&self) -> &Arc<QueryCache> {
    &self.queries
  }

  pub fn config(&self) -> &SyncConfig {
    &self.config
  }

  pub fn is_started(&self) -> bool {
    self.started.load(Ordering::SeqCst)
  }
}

impl Drop for SyncSession {
  fn drop(&mut self) {
    for handle in self.background.get_mut().drain(..) {
      handle.abort();
    }
  }
}
