//! Connection state machine for the push channel.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     |             |
//!                     v             v (drop)
//!                 Reconnecting <----+
//!                     |
//!                     v (max attempts)
//!                 Exhausted
//! ```
//!
//! Retries use a fixed delay. `Exhausted` is terminal until something outside
//! the channel (usually re-authentication) resets it to `Disconnected`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
  #[default]
  Disconnected,
  Connecting,
  Connected,
  Reconnecting,
  Exhausted,
}

impl ConnectionState {
  pub fn is_active(&self) -> bool {
    matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
  }
}

impl std::fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Disconnected => write!(f, "disconnected"),
      Self::Connecting => write!(f, "connecting"),
      Self::Connected => write!(f, "connected"),
      Self::Reconnecting => write!(f, "reconnecting"),
      Self::Exhausted => write!(f, "exhausted"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
  pub max_attempts: u32,
  pub delay: Duration,
}

impl Default for ReconnectPolicy {
  fn default() -> Self {
    Self {
      max_attempts: 5,
      delay: Duration::from_secs(1),
    }
  }
}

#[derive(Debug, Clone)]
pub struct StateMachine {
  state: ConnectionState,
  attempts: u32,
  policy: ReconnectPolicy,
}

impl StateMachine {
  pub fn new(policy: ReconnectPolicy) -> Self {
    Self {
      state: ConnectionState::Disconnected,
      attempts: 0,
      policy,
    }
  }

  pub fn state(&self) -> ConnectionState {
    self.state
  }

  /// Reconnection attempts made since the last successful connect.
  pub fn attempts(&self) -> u32 {
    self.attempts
  }

  /// `Disconnected -> Connecting`. Any other state is left alone.
  pub fn start(&mut self) -> bool {
    if self.state != ConnectionState::Disconnected {
      return false;
    }
    self.state = ConnectionState::Connecting;
    self.attempts = 0;
    true
  }

  pub fn on_connected(&mut self) {
    if matches!(
      self.state,
      ConnectionState::Connecting | ConnectionState::Reconnecting
    ) {
      self.state = ConnectionState::Connected;
      self.attempts = 0;
    }
  }

  pub fn on_dropped(&mut self) {
    if self.state == ConnectionState::Connected {
      self.state = ConnectionState::Reconnecting;
      self.attempts = 0;
    }
  }

  /// A connect attempt failed. The first failure moves `Connecting` into
  /// the retry loop; later failures are counted by [`StateMachine::next_attempt`].
  pub fn on_connect_failed(&mut self) {
    if self.state == ConnectionState::Connecting {
      self.state = ConnectionState::Reconnecting;
      self.attempts = 0;
    }
  }

  /// Claim the next retry. Returns the attempt number, or `None` after
  /// moving to `Exhausted` once the budget is spent.
  pub fn next_attempt(&mut self) -> Option<u32> {
    if self.state != ConnectionState::Reconnecting {
      return None;
    }
    if self.attempts >= self.policy.max_attempts {
      self.state = ConnectionState::Exhausted;
      return None;
    }
    self.attempts += 1;
    Some(self.attempts)
  }

  /// External reset, e.g. after logout or credential loss.
  pub fn reset(&mut self) {
    self.state = ConnectionState::Disconnected;
    self.attempts = 0;
  }

  pub fn delay(&self) -> Duration {
    self.policy.delay
  }
}
