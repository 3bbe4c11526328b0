//! Request coalescing queue.
//!
//! Calls that arrive close together are grouped into one execution "wave".
//! There is no batch endpoint: a wave still issues every request on its own,
//! concurrently, and hands each caller its own result. The only thing the
//! grouping buys is fewer timer wakeups and bookkeeping passes on the client.
//!
//! Every enqueue restarts the delay timer, so a steady trickle of requests
//! keeps pushing the wave back until the queue hits `max_batch_size`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::{Method, QueuedRequest, RequestExecutor};
use crate::error::ApiError;

type Reply = oneshot::Sender<Result<serde_json::Value, ApiError>>;

struct Pending {
  request: QueuedRequest,
  reply: Reply,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoalescerStats {
  pub waves: u64,
  pub requests: u64,
  pub pending: usize,
}

struct Inner {
  executor: Arc<dyn RequestExecutor>,
  delay: Duration,
  max_batch_size: usize,
  queue: Mutex<Vec<Pending>>,
  timer: Mutex<Option<JoinHandle<()>>>,
  waves: AtomicU64,
  requests: AtomicU64,
}

#[derive(Clone)]
pub struct RequestCoalescer {
  inner: Arc<Inner>,
}

impl RequestCoalescer {
  pub fn new(executor: Arc<dyn RequestExecutor>, delay: Duration, max_batch_size: usize) -> Self {
    Self {
      inner: Arc::new(Inner {
        executor,
        delay,
        max_batch_size: max_batch_size.max(1),
        queue: Mutex::new(Vec::new()),
        timer: Mutex::new(None),
        waves: AtomicU64::new(0),
        requests: AtomicU64::new(0),
      }),
    }
  }

  /// Queue a request and wait for its own result.
  pub async fn enqueue(
    &self,
    method: Method,
    resource: impl Into<String>,
    payload: Option<serde_json::Value>,
  ) -> Result<serde_json::Value, ApiError> {
    let rx = self.submit(QueuedRequest::new(method, resource, payload));
    rx.await.unwrap_or(Err(ApiError::Closed))
  }

  fn submit(&self, request: QueuedRequest) -> oneshot::Receiver<Result<serde_json::Value, ApiError>> {
    let (reply, rx) = oneshot::channel();
    let full = {
      let mut queue = self.inner.queue.lock();
      queue.push(Pending { request, reply });
      queue.len() >= self.inner.max_batch_size
    };

    if full {
      if let Some(timer) = self.inner.timer.lock().take() {
        timer.abort();
      }
      Inner::run_wave(&self.inner);
    } else {
      self.restart_timer();
    }
    rx
  }

  fn restart_timer(&self) {
    let inner = Arc::clone(&self.inner);
    let delay = self.inner.delay;
    let mut timer = self.inner.timer.lock();
    if let Some(previous) = timer.take() {
      previous.abort();
    }
    *timer = Some(tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      Inner::run_wave(&inner);
    }));
  }

  pub fn pending(&self) -> usize {
    self.inner.queue.lock().len()
  }

  pub fn stats(&self) -> CoalescerStats {
    CoalescerStats {
      waves: self.inner.waves.load(Ordering::Relaxed),
      requests: self.inner.requests.load(Ordering::Relaxed),
      pending: self.pending(),
    }
  }

  /// Fail every queued request and stop the timer. Used on session reset.
  pub fn cancel_pending(&self) -> usize {
    if let Some(timer) = self.inner.timer.lock().take() {
      timer.abort();
    }
    let drained: Vec<Pending> = std::mem::take(&mut *self.inner.queue.lock());
    let count = drained.len();
    for pending in drained {
      let _ = pending.reply.send(Err(ApiError::Closed));
    }
    count
  }
}

impl Inner {
  fn run_wave(inner: &Arc<Inner>) {
    let batch: Vec<Pending> = std::mem::take(&mut *inner.queue.lock());
    if batch.is_empty() {
      return;
    }
    let wave = inner.waves.fetch_add(1, Ordering::Relaxed) + 1;
    inner
      .requests
      .fetch_add(batch.len() as u64, Ordering::Relaxed);
    tracing::debug!("coalescer: wave {} issuing {} requests", wave, batch.len());

    for Pending { request, reply } in batch {
      let executor = Arc::clone(&inner.executor);
      tokio::spawn(async move {
        let result = executor.execute(&request).await;
        if let Err(e) = &result {
          tracing::debug!(
            "coalescer: wave {} {} {} failed: {}",
            wave,
            request.method,
            request.resource,
            e
          );
        }
        // The caller may have gone away; that is fine.
        let _ = reply.send(result);
      });
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use serde_json::json;

  #[derive(Default)]
  struct EchoExecutor {
    calls: Mutex<Vec<String>>,
  }

  #[async_trait]
  impl RequestExecutor for EchoExecutor {
    async fn execute(&self, request: &QueuedRequest) -> Result<serde_json::Value, ApiError> {
      self.calls.lock().push(request.resource.clone());
      if request.resource == "/fail" {
        return Err(ApiError::Status {
          status: 500,
          message: "boom".into(),
        });
      }
      Ok(json!({"resource": request.resource}))
    }
  }

  fn coalescer(max: usize) -> (RequestCoalescer, Arc<EchoExecutor>) {
    let executor = Arc::new(EchoExecutor::default());
    let coalescer = RequestCoalescer::new(executor.clone(), Duration::from_millis(50), max);
    (coalescer, executor)
  }

  #[tokio::test(start_paused = true)]
  async fn test_enqueues_within_window_share_a_wave() {
    let (c, _) = coalescer(10);
    let (a, b, d) = tokio::join!(
      c.enqueue(Method::Get, "/a", None),
      c.enqueue(Method::Get, "/b", None),
      c.enqueue(Method::Get, "/c", None),
    );
    assert_eq!(a.unwrap(), json!({"resource": "/a"}));
    assert_eq!(b.unwrap(), json!({"resource": "/b"}));
    assert_eq!(d.unwrap(), json!({"resource": "/c"}));
    assert_eq!(c.stats().waves, 1);

    tokio::time::sleep(Duration::from_millis(100)).await;
    c.enqueue(Method::Get, "/d", None).await.unwrap();
    assert_eq!(c.stats().waves, 2);
    assert_eq!(c.stats().requests, 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failure_is_isolated_per_request() {
    let (c, executor) = coalescer(10);
    let (ok1, failed, ok2) = tokio::join!(
      c.enqueue(Method::Get, "/a", None),
      c.enqueue(Method::Post, "/fail", Some(json!({"x": 1}))),
      c.enqueue(Method::Get, "/b", None),
    );
    assert!(ok1.is_ok());
    assert!(matches!(failed, Err(ApiError::Status { status: 500, .. })));
    assert!(ok2.is_ok());
    assert_eq!(executor.calls.lock().len(), 3);
    assert_eq!(c.stats().waves, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_each_enqueue_restarts_the_timer() {
    let (c, _) = coalescer(10);
    let first = tokio::spawn({
      let c = c.clone();
      async move { c.enqueue(Method::Get, "/a", None).await }
    });

    tokio::time::sleep(Duration::from_millis(40)).await;
    let second = tokio::spawn({
      let c = c.clone();
      async move { c.enqueue(Method::Get, "/b", None).await }
    });

    // 80ms after the first enqueue, 40ms after the second: nothing has run.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(c.stats().waves, 0);
    assert_eq!(c.pending(), 2);

    assert!(first.await.unwrap().is_ok());
    assert!(second.await.unwrap().is_ok());
    assert_eq!(c.stats().waves, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_full_queue_runs_without_waiting() {
    let (c, _) = coalescer(3);
    let start = tokio::time::Instant::now();
    let (a, b, d) = tokio::join!(
      c.enqueue(Method::Get, "/a", None),
      c.enqueue(Method::Get, "/b", None),
      c.enqueue(Method::Get, "/c", None),
    );
    assert!(a.is_ok() && b.is_ok() && d.is_ok());
    assert_eq!(tokio::time::Instant::now(), start);
    assert_eq!(c.stats().waves, 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_identical_requests_are_not_deduplicated() {
    let (c, executor) = coalescer(10);
    let _ = tokio::join!(
      c.enqueue(Method::Get, "/same", None),
      c.enqueue(Method::Get, "/same", None),
    );
    assert_eq!(executor.calls.lock().len(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_cancel_pending_fails_queued_requests() {
    let (c, executor) = coalescer(10);
    let waiting = tokio::spawn({
      let c = c.clone();
      async move { c.enqueue(Method::Get, "/a", None).await }
    });
    tokio::task::yield_now().await;
    assert_eq!(c.cancel_pending(), 1);
    assert!(matches!(waiting.await.unwrap(), Err(ApiError::Closed)));
    assert!(executor.calls.lock().is_empty());
  }
}
