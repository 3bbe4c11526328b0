use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use crate::error::ConfigError;

static ENV_VAR: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r"\$(?:\{([^}]*)\}|([A-Za-z0-9_]+))").expect("env var pattern is valid")
});

/// Expand environment variables in a string.
/// Supports $VAR_NAME and ${VAR_NAME} syntax. Unset variables expand to
/// nothing; expanded values are not expanded again.
fn expand_env_vars(input: &str) -> String {
  ENV_VAR
    .replace_all(input, |caps: &Captures| {
      let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
      std::env::var(name).unwrap_or_default()
    })
    .into_owned()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
  #[serde(default)]
  pub api: ApiSection,
  #[serde(default)]
  pub live: LiveSection,
  #[serde(default)]
  pub cache: CacheSection,
  #[serde(default)]
  pub coalescer: CoalescerSection,
  #[serde(default)]
  pub counters: CountersSection,
  #[serde(default)]
  pub logging: LoggingSection,
  /// Bearer token, usually `${MARKETSYNC_TOKEN}`
  #[serde(default)]
  pub token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSection {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  /// Per-request transport timeout in milliseconds
  #[serde(default = "default_request_timeout_ms")]
  pub request_timeout_ms: u64,
}

fn default_base_url() -> String {
  "http://localhost:3000/api".into()
}

fn default_request_timeout_ms() -> u64 {
  30000
}

impl Default for ApiSection {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      request_timeout_ms: default_request_timeout_ms(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSection {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_live_url")]
  pub url: String,
  /// Reconnection attempts before giving up (state `exhausted`)
  #[serde(default = "default_max_reconnect_attempts")]
  pub max_reconnect_attempts: u32,
  /// Fixed delay between attempts, no backoff
  #[serde(default = "default_reconnect_delay_ms")]
  pub reconnect_delay_ms: u64,
  /// Append pushed chat messages to the cached thread instead of refetching it
  #[serde(default)]
  pub append_messages_locally: bool,
}

fn default_true() -> bool {
  true
}

fn default_live_url() -> String {
  "ws://localhost:3000/live".into()
}

fn default_max_reconnect_attempts() -> u32 {
  5
}

fn default_reconnect_delay_ms() -> u64 {
  1000
}

impl Default for LiveSection {
  fn default() -> Self {
    Self {
      enabled: true,
      url: default_live_url(),
      max_reconnect_attempts: default_max_reconnect_attempts(),
      reconnect_delay_ms: default_reconnect_delay_ms(),
      append_messages_locally: false,
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSection {
  /// TTL for entries in the flat cache
  #[serde(default = "default_ttl_ms")]
  pub default_ttl_ms: u64,
  /// Age after which query results are reported stale
  #[serde(default = "default_stale_time_ms")]
  pub stale_time_ms: u64,
  /// How long an unobserved query result survives
  #[serde(default = "default_gc_time_ms")]
  pub gc_time_ms: u64,
  /// Interval of the query cache GC sweep
  #[serde(default = "default_gc_interval_ms")]
  pub gc_interval_ms: u64,
}

fn default_ttl_ms() -> u64 {
  5 * 60 * 1000 // 5 minutes
}

fn default_stale_time_ms() -> u64 {
  30 * 1000
}

fn default_gc_time_ms() -> u64 {
  5 * 60 * 1000
}

fn default_gc_interval_ms() -> u64 {
  60 * 1000
}

impl Default for CacheSection {
  fn default() -> Self {
    Self {
      default_ttl_ms: default_ttl_ms(),
      stale_time_ms: default_stale_time_ms(),
      gc_time_ms: default_gc_time_ms(),
      gc_interval_ms: default_gc_interval_ms(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoalescerSection {
  /// Quiet period before a wave runs; restarted by every enqueue
  #[serde(default = "default_coalesce_delay_ms")]
  pub delay_ms: u64,
  /// Queue length that runs a wave immediately
  #[serde(default = "default_max_batch_size")]
  pub max_batch_size: usize,
}

fn default_coalesce_delay_ms() -> u64 {
  50
}

fn default_max_batch_size() -> usize {
  10
}

impl Default for CoalescerSection {
  fn default() -> Self {
    Self {
      delay_ms: default_coalesce_delay_ms(),
      max_batch_size: default_max_batch_size(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountersSection {
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
  30 * 1000
}

impl Default for CountersSection {
  fn default() -> Self {
    Self {
      poll_interval_ms: default_poll_interval_ms(),
    }
  }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
  #[serde(default = "default_level")]
  pub level: String,
}

fn default_level() -> String {
  "info".into()
}

impl Default for LoggingSection {
  fn default() -> Self {
    Self {
      level: default_level(),
    }
  }
}

impl SyncConfig {
  pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
    let expanded = expand_env_vars(content);
    let config: Self = serde_yaml::from_str(&expanded)?;
    config.validate()?;
    Ok(config)
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(&path)?;
    Self::from_yaml(&content)
  }

  pub fn find_and_load() -> Result<Option<Self>, ConfigError> {
    for p in ["marketsync.yaml", "marketsync.yml"] {
      if Path::new(p).exists() {
        tracing::info!("Loading config from {}", p);
        return Ok(Some(Self::from_file(p)?));
      }
    }
    Ok(None)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.coalescer.max_batch_size == 0 {
      return Err(ConfigError::InvalidValue {
        field: "coalescer.max_batch_size",
        reason: "must be at least 1".into(),
      });
    }
    let intervals = [
      ("counters.poll_interval_ms", self.counters.poll_interval_ms),
      ("cache.gc_interval_ms", self.cache.gc_interval_ms),
      ("cache.default_ttl_ms", self.cache.default_ttl_ms),
    ];
    for (field, value) in intervals {
      if value == 0 {
        return Err(ConfigError::InvalidValue {
          field,
          reason: "must be greater than zero".into(),
        });
      }
    }
    Ok(())
  }

  pub fn default_ttl(&self) -> Duration {
    Duration::from_millis(self.cache.default_ttl_ms)
  }

  pub fn stale_time(&self) -> Duration {
    Duration::from_millis(self.cache.stale_time_ms)
  }

  pub fn gc_time(&self) -> Duration {
    Duration::from_millis(self.cache.gc_time_ms)
  }

  pub fn gc_interval(&self) -> Duration {
    Duration::from_millis(self.cache.gc_interval_ms)
  }

  pub fn coalesce_delay(&self) -> Duration {
    Duration::from_millis(self.coalescer.delay_ms)
  }

  pub fn reconnect_delay(&self) -> Duration {
    Duration::from_millis(self.live.reconnect_delay_ms)
  }

  pub fn poll_interval(&self) -> Duration {
    Duration::from_millis(self.counters.poll_interval_ms)
  }
}
