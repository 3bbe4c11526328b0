//! Push channel client.
//!
//! One background task owns the connection. It subscribes the global topics
//! on every successful connect, replays joined rooms, decodes frames into
//! [`PushEvent`]s and broadcasts them. Failures are logged and fed into the
//! [`StateMachine`]; callers only ever see the state.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use types::{ClientMessage, GlobalTopic, PushEvent, RoomId, Topic};

use super::connector::{Connector, FrameSink, PushConnection};
use super::state::{ConnectionState, ReconnectPolicy, StateMachine};
use crate::auth::CredentialStore;
use crate::error::LiveError;

struct Shared {
  state_tx: watch::Sender<ConnectionState>,
  events_tx: broadcast::Sender<PushEvent>,
  /// Joined rooms with the number of live guards per room.
  rooms: Mutex<HashMap<RoomId, usize>>,
  commands: Mutex<Option<mpsc::UnboundedSender<ClientMessage>>>,
  connects: AtomicU64,
}

impl Shared {
  fn set_state(&self, next: ConnectionState) {
    let mut previous = next;
    let changed = self.state_tx.send_if_modified(|state| {
      if *state == next {
        return false;
      }
      previous = std::mem::replace(state, next);
      true
    });
    if changed {
      tracing::info!("live channel: {} -> {}", previous, next);
    }
  }

  fn command(&self, msg: ClientMessage) {
    if let Some(tx) = self.commands.lock().as_ref() {
      let _ = tx.send(msg);
    }
  }

  fn acquire_room(&self, room: &RoomId) {
    let first = {
      let mut rooms = self.rooms.lock();
      let count = rooms.entry(room.clone()).or_insert(0);
      *count += 1;
      *count == 1
    };
    if first {
      tracing::debug!("live channel: joining {}", room);
      self.command(ClientMessage::Join { room: room.clone() });
    }
  }

  fn release_room(&self, room: &RoomId) {
    let last = {
      let mut rooms = self.rooms.lock();
      match rooms.get_mut(room) {
        Some(count) if *count > 1 => {
          *count -= 1;
          false
        }
        Some(_) => {
          rooms.remove(room);
          true
        }
        None => false,
      }
    };
    if last {
      tracing::debug!("live channel: leaving {}", room);
      self.command(ClientMessage::Leave { room: room.clone() });
    }
  }

  fn dispatch(&self, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
      Ok(v) => v,
      Err(e) => {
        tracing::warn!("live channel: malformed frame: {}", e);
        return;
      }
    };
    let Some(name) = value.get("event").and_then(|v| v.as_str()).map(String::from) else {
      tracing::debug!("live channel: ignoring non-event frame");
      return;
    };
    match serde_json::from_value::<PushEvent>(value) {
      Ok(event) => {
        tracing::debug!("live channel: received {}", name);
        // No receivers is fine; nobody is listening yet.
        let _ = self.events_tx.send(event);
      }
      Err(e) => tracing::warn!("live channel: dropping {} event: {}", name, e),
    }
  }
}

enum Ended {
  Closed,
  Stopped,
}

pub struct LiveChannel {
  connector: Arc<dyn Connector>,
  credentials: CredentialStore,
  policy: ReconnectPolicy,
  shared: Arc<Shared>,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl LiveChannel {
  pub fn new(
    connector: Arc<dyn Connector>,
    credentials: CredentialStore,
    policy: ReconnectPolicy,
  ) -> Self {
    let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
    let (events_tx, _) = broadcast::channel(256);
    Self {
      connector,
      credentials,
      policy,
      shared: Arc::new(Shared {
        state_tx,
        events_tx,
        rooms: Mutex::new(HashMap::new()),
        commands: Mutex::new(None),
        connects: AtomicU64::new(0),
      }),
      task: Mutex::new(None),
    }
  }

  /// Start connecting. A no-op while a connection is active or being
  /// retried; from `Exhausted` this is the external restart.
  pub fn start(&self) -> bool {
    let mut task = self.task.lock();
    if self.state().is_active() {
      return false;
    }
    if let Some(old) = task.take() {
      old.abort();
    }

    let mut machine = StateMachine::new(self.policy);
    machine.start();
    let (tx, rx) = mpsc::unbounded_channel();
    *self.shared.commands.lock() = Some(tx);
    self.shared.set_state(machine.state());

    *task = Some(tokio::spawn(run(
      Arc::clone(&self.connector),
      self.credentials.clone(),
      Arc::clone(&self.shared),
      machine,
      rx,
    )));
    true
  }

  /// Tear the connection down and return to `Disconnected`. Joined rooms are
  /// remembered and replayed on the next start.
  pub fn stop(&self) {
    if let Some(task) = self.task.lock().take() {
      task.abort();
    }
    self.shared.commands.lock().take();
    self.shared.set_state(ConnectionState::Disconnected);
  }

  pub fn state(&self) -> ConnectionState {
    *self.shared.state_tx.borrow()
  }

  pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
    self.shared.state_tx.subscribe()
  }

  /// Every decoded event, whatever its topic.
  pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
    self.shared.events_tx.subscribe()
  }

  /// Events of one global topic.
  pub fn subscribe_topic(&self, topic: GlobalTopic) -> Subscription {
    Subscription {
      topic: Topic::Global(topic),
      events: self.subscribe(),
      shared: Arc::clone(&self.shared),
    }
  }

  /// Join a room for as long as the returned guard lives.
  pub fn join_room(&self, room: RoomId) -> Subscription {
    self.shared.acquire_room(&room);
    Subscription {
      topic: Topic::Room(room),
      events: self.subscribe(),
      shared: Arc::clone(&self.shared),
    }
  }

  pub fn joined_rooms(&self) -> Vec<RoomId> {
    let mut rooms: Vec<RoomId> = self.shared.rooms.lock().keys().cloned().collect();
    rooms.sort();
    rooms
  }

  /// Connect attempts made since the channel was created.
  pub fn connect_attempts(&self) -> u64 {
    self.shared.connects.load(Ordering::Relaxed)
  }
}

impl Drop for LiveChannel {
  fn drop(&mut self) {
    if let Some(task) = self.task.get_mut().take() {
      task.abort();
    }
  }
}

/// A topic subscription. Room subscriptions leave the room when the last
/// guard for it drops.
pub struct Subscription {
  topic: Topic,
  events: broadcast::Receiver<PushEvent>,
  shared: Arc<Shared>,
}

impl Subscription {
  pub fn topic(&self) -> &Topic {
    &self.topic
  }

  /// Next event for this topic. `None` once the channel is gone.
  pub async fn recv(&mut self) -> Option<PushEvent> {
    loop {
      match self.events.recv().await {
        Ok(event) if event.topic() == self.topic => return Some(event),
        Ok(_) => continue,
        Err(broadcast::error::RecvError::Lagged(n)) => {
          tracing::warn!("live channel: subscription lagged by {} events", n);
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    if let Topic::Room(room) = &self.topic {
      self.shared.release_room(room);
    }
  }
}

async fn run(
  connector: Arc<dyn Connector>,
  credentials: CredentialStore,
  shared: Arc<Shared>,
  mut machine: StateMachine,
  mut commands: mpsc::UnboundedReceiver<ClientMessage>,
) {
  loop {
    shared.connects.fetch_add(1, Ordering::Relaxed);
    let token = credentials.token();
    match connector.connect(token.as_deref()).await {
      Ok(connection) => {
        machine.on_connected();
        shared.set_state(machine.state());
        match serve(connection, &shared, &mut commands).await {
          Ok(Ended::Stopped) => return,
          Ok(Ended::Closed) => tracing::info!("live channel: closed by server"),
          Err(e) => tracing::warn!("live channel: connection lost: {}", e),
        }
        machine.on_dropped();
      }
      Err(e) => {
        tracing::warn!("live channel: connect failed: {}", e);
        machine.on_connect_failed();
      }
    }
    shared.set_state(machine.state());

    match machine.next_attempt() {
      Some(attempt) => {
        tracing::debug!(
          "live channel: reconnect attempt {} in {:?}",
          attempt,
          machine.delay()
        );
        tokio::time::sleep(machine.delay()).await;
      }
      None => {
        shared.set_state(machine.state());
        tracing::warn!(
          "live channel: giving up after {} reconnect attempts",
          machine.attempts()
        );
        return;
      }
    }
  }
}

async fn serve(
  connection: PushConnection,
  shared: &Shared,
  commands: &mut mpsc::UnboundedReceiver<ClientMessage>,
) -> Result<Ended, LiveError> {
  let PushConnection {
    mut sink,
    mut stream,
  } = connection;

  // Room commands queued while offline are superseded by the replay below.
  while commands.try_recv().is_ok() {}

  for topic in GlobalTopic::ALL {
    send(&mut sink, &ClientMessage::Subscribe { topic }).await?;
  }
  let rooms: Vec<RoomId> = shared.rooms.lock().keys().cloned().collect();
  for room in rooms {
    send(&mut sink, &ClientMessage::Join { room }).await?;
  }

  loop {
    tokio::select! {
      cmd = commands.recv() => match cmd {
        Some(msg) => send(&mut sink, &msg).await?,
        None => return Ok(Ended::Stopped),
      },
      frame = stream.next() => match frame {
        Some(Ok(text)) => shared.dispatch(&text),
        Some(Err(e)) => return Err(e),
        None => return Ok(Ended::Closed),
      },
    }
  }
}

async fn send(sink: &mut FrameSink, msg: &ClientMessage) -> Result<(), LiveError> {
  let text = serde_json::to_string(msg).map_err(|e| LiveError::Protocol(e.to_string()))?;
  sink.send(text).await
}
