//! Bearer token holder shared by the HTTP and push transports.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable handle to the session credential. Every clone sees the same
/// token; watchers are told when it changes or disappears.
#[derive(Clone)]
pub struct CredentialStore {
  tx: Arc<watch::Sender<Option<String>>>,
}

impl CredentialStore {
  pub fn new(token: Option<String>) -> Self {
    let (tx, _) = watch::channel(token);
    Self { tx: Arc::new(tx) }
  }

  pub fn token(&self) -> Option<String> {
    self.tx.borrow().clone()
  }

  pub fn is_authenticated(&self) -> bool {
    self.tx.borrow().is_some()
  }

  pub fn set_token(&self, token: impl Into<String>) {
    self.tx.send_replace(Some(token.into()));
  }

  /// Drop the credential. Returns true if one was present.
  pub fn clear(&self) -> bool {
    self.tx.send_replace(None).is_some()
  }

  pub fn watch(&self) -> watch::Receiver<Option<String>> {
    self.tx.subscribe()
  }
}

impl Default for CredentialStore {
  fn default() -> Self {
    Self::new(None)
  }
}

impl std::fmt::Debug for CredentialStore {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CredentialStore")
      .field("authenticated", &self.is_authenticated())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_clear_notifies_watchers() {
    let store = CredentialStore::new(Some("t0".into()));
    let mut rx = store.watch();
    assert!(store.clear());
    rx.changed().await.unwrap();
    assert!(rx.borrow().is_none());
    assert!(!store.clear());
  }

  #[test]
  fn test_clones_share_token() {
    let store = CredentialStore::default();
    let other = store.clone();
    store.set_token("abc");
    assert_eq!(other.token().as_deref(), Some("abc"));
    assert!(format!("{:?}", other).contains("authenticated: true"));
  }
}
