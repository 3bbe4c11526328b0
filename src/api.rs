//! Remote read/write API.
//!
//! Requests are plain `(method, resource path, JSON payload)` triples; the
//! sync layer does not know endpoint semantics beyond that.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::auth::CredentialStore;
use crate::config::ApiSection;
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  pub fn is_read(&self) -> bool {
    matches!(self, Self::Get)
  }
}

impl std::fmt::Display for Method {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Method::Get => write!(f, "GET"),
      Method::Post => write!(f, "POST"),
      Method::Put => write!(f, "PUT"),
      Method::Patch => write!(f, "PATCH"),
      Method::Delete => write!(f, "DELETE"),
    }
  }
}

impl From<Method> for reqwest::Method {
  fn from(m: Method) -> Self {
    match m {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    }
  }
}

/// One caller's pending request. Identity is the generated id: two requests
/// for the same resource are two entries.
#[derive(Debug, Clone)]
pub struct QueuedRequest {
  pub id: Uuid,
  pub method: Method,
  pub resource: String,
  pub payload: Option<serde_json::Value>,
  pub created_at: Instant,
}

impl QueuedRequest {
  pub fn new(method: Method, resource: impl Into<String>, payload: Option<serde_json::Value>) -> Self {
    Self {
      id: Uuid::new_v4(),
      method,
      resource: resource.into(),
      payload,
      created_at: Instant::now(),
    }
  }
}

/// Issues a single request against the remote store.
#[async_trait]
pub trait RequestExecutor: Send + Sync {
  async fn execute(&self, request: &QueuedRequest) -> Result<serde_json::Value, ApiError>;
}

/// `reqwest`-backed executor. Attaches the session bearer token when one is
/// present and maps 401/403 to [`ApiError::Unauthorized`].
#[derive(Clone)]
pub struct HttpApi {
  client: reqwest::Client,
  base_url: String,
  credentials: CredentialStore,
}

impl HttpApi {
  pub fn new(config: &ApiSection, credentials: CredentialStore) -> Result<Self, ApiError> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.request_timeout_ms))
      .build()?;
    Ok(Self {
      client,
      base_url: config.base_url.trim_end_matches('/').to_string(),
      credentials,
    })
  }

  pub fn url(&self, resource: &str) -> String {
    if resource.starts_with('/') {
      format!("{}{}", self.base_url, resource)
    } else {
      format!("{}/{}", self.base_url, resource)
    }
  }
}

#[async_trait]
impl RequestExecutor for HttpApi {
  async fn execute(&self, request: &QueuedRequest) -> Result<serde_json::Value, ApiError> {
    let mut builder = self
      .client
      .request(request.method.into(), self.url(&request.resource));

    if let Some(token) = self.credentials.token() {
      builder = builder.bearer_auth(token);
    }

    if let Some(payload) = &request.payload {
      builder = if request.method.is_read() {
        builder.query(&query_pairs(payload))
      } else {
        builder.json(payload)
      };
    }

    let response = builder.send().await?;
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
      return Err(ApiError::Unauthorized);
    }
    if !status.is_success() {
      let message = response.text().await.unwrap_or_default();
      return Err(ApiError::Status {
        status: status.as_u16(),
        message,
      });
    }
    if status == StatusCode::NO_CONTENT {
      return Ok(serde_json::Value::Null);
    }
    Ok(response.json().await?)
  }
}

/// Flatten a JSON object into query-string pairs. Nested values are sent as
/// their JSON text.
fn query_pairs(payload: &serde_json::Value) -> Vec<(String, String)> {
  let Some(map) = payload.as_object() else {
    return Vec::new();
  };
  map
    .iter()
    .filter(|(_, v)| !v.is_null())
    .map(|(k, v)| {
      let value = match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
      };
      (k.clone(), value)
    })
    .collect()
}
