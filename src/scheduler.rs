//! Named periodic background tasks owned by a session.

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Default)]
pub struct Scheduler {
  tasks: Mutex<Vec<(String, JoinHandle<()>)>>,
}

impl Scheduler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Run `job` every `period`, first after one full period. A task with the
  /// same name is replaced.
  pub fn every<F, Fut>(&self, name: impl Into<String>, period: Duration, job: F)
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let name = name.into();
    let handle = tokio::spawn({
      let name = name.clone();
      async move {
        tracing::debug!("scheduler: {} every {:?}", name, period);
        loop {
          tokio::time::sleep(period).await;
          job().await;
        }
      }
    });

    let mut tasks = self.tasks.lock();
    if let Some(pos) = tasks.iter().position(|(n, _)| *n == name) {
      let (_, old) = tasks.remove(pos);
      old.abort();
    }
    tasks.push((name, handle));
  }

  pub fn is_running(&self, name: &str) -> bool {
    self
      .tasks
      .lock()
      .iter()
      .any(|(n, handle)| n == name && !handle.is_finished())
  }

  pub fn names(&self) -> Vec<String> {
    self.tasks.lock().iter().map(|(n, _)| n.clone()).collect()
  }

  pub fn stop_all(&self) -> usize {
    let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
    let count = tasks.len();
    for (name, handle) in tasks {
      tracing::debug!("scheduler: stopping {}", name);
      handle.abort();
    }
    count
  }
}

impl Drop for Scheduler {
  fn drop(&mut self) {
    for (_, handle) in self.tasks.get_mut().drain(..) {
      handle.abort();
    }
  }
}
