//! Error types for the sync layer.

use crate::cache::QueryKey;

/// Failures talking to the remote read/write API.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
  #[error("Not authenticated")]
  Unauthorized,
  #[error("HTTP {status}: {message}")]
  Status { status: u16, message: String },
  #[error("Transport error: {0}")]
  Transport(String),
  #[error("Unexpected response: {0}")]
  Decode(String),
  #[error("Request queue closed")]
  Closed,
}

impl ApiError {
  pub fn is_unauthorized(&self) -> bool {
    matches!(self, Self::Unauthorized)
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    match err.status() {
      Some(status) if status.as_u16() == 401 || status.as_u16() == 403 => Self::Unauthorized,
      Some(status) => Self::Status {
        status: status.as_u16(),
        message: err.to_string(),
      },
      None if err.is_decode() => Self::Decode(err.to_string()),
      None => Self::Transport(err.to_string()),
    }
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(err: serde_json::Error) -> Self {
    Self::Decode(err.to_string())
  }
}

/// Push channel failures. These drive reconnection and are only logged.
#[derive(Debug, thiserror::Error)]
pub enum LiveError {
  #[error("No credential available")]
  NoCredential,
  #[error("Connect failed: {0}")]
  Connect(String),
  #[error("WebSocket error: {0}")]
  Transport(String),
  #[error("Malformed frame: {0}")]
  Protocol(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for LiveError {
  fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
    Self::Transport(err.to_string())
  }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Failed to read config file: {0}")]
  Io(#[from] std::io::Error),
  #[error("Failed to parse config YAML: {0}")]
  Parse(#[from] serde_yaml::Error),
  #[error("Invalid config value for {field}: {reason}")]
  InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
  #[error(transparent)]
  Api(#[from] ApiError),
  #[error(transparent)]
  Live(#[from] LiveError),
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("Response for {key} did not match the expected shape: {reason}")]
  Shape { key: QueryKey, reason: String },
  #[error("Session is logged out")]
  LoggedOut,
}

impl SyncError {
  pub fn is_unauthorized(&self) -> bool {
    matches!(self, Self::Api(ApiError::Unauthorized))
  }
}
