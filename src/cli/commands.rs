use clap::{Parser, Subcommand};
use colored::Colorize;
use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use std::sync::Arc;

use crate::cache::{CachedValue, Freshness};
use crate::config::SyncConfig;
use crate::counter::CounterKind;
use crate::error::ConfigError;
use crate::session::{Query, SyncSession};

#[derive(Parser)]
#[command(name = "msync", about = "marketsync client", version)]
pub struct ClientArgs {
  #[arg(short, long)]
  pub config: Option<String>,
  #[arg(long, env = "MARKETSYNC_API_URL")]
  pub api_url: Option<String>,
  #[arg(long, env = "MARKETSYNC_LIVE_URL")]
  pub live_url: Option<String>,
  #[arg(long, env = "MARKETSYNC_TOKEN", hide_env_values = true)]
  pub token: Option<String>,
  /// Do not open the push channel
  #[arg(long)]
  pub no_live: bool,
  #[arg(long)]
  pub log_level: Option<String>,
  #[arg(long, default_value = "json")]
  pub format: OutputFormat,
  #[command(subcommand)]
  pub subcommand: Option<Commands>,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
  #[default]
  Json,
  Summary,
}

#[derive(Subcommand)]
pub enum Commands {
  /// Fetch one query and print it, e.g. `get prediction 42`
  Get { query: Vec<String> },
  /// Fetch the unread counters
  Unread,
  /// Print the effective configuration
  Config,
}

impl ClientArgs {
  /// Explicit path > auto-detect > defaults, then command-line overrides.
  pub fn load_config(&self) -> Result<SyncConfig, ConfigError> {
    let mut config = match &self.config {
      Some(path) => SyncConfig::from_file(path)?,
      None => SyncConfig::find_and_load()?.unwrap_or_default(),
    };
    if let Some(url) = &self.api_url {
      config.api.base_url = url.clone();
    }
    if let Some(url) = &self.live_url {
      config.live.url = url.clone();
    }
    if let Some(token) = &self.token {
      config.token = Some(token.clone());
    }
    if self.no_live {
      config.live.enabled = false;
    }
    if let Some(level) = &self.log_level {
      config.logging.level = level.clone();
    }
    config.validate()?;
    Ok(config)
  }
}

pub async fn run_get(
  session: &SyncSession,
  words: &[String],
  format: OutputFormat,
) -> Result<(), anyhow::Error> {
  let query: Query = words.join(" ").parse().map_err(anyhow::Error::msg)?;
  let value = session.query(query).await?;
  print_value(&value, format)
}

pub async fn run_unread(session: &Arc<SyncSession>) -> Result<(), anyhow::Error> {
  for kind in CounterKind::ALL {
    match session.refresh_counter(kind).await {
      Some(count) => println!("{:<22} {}", kind.to_string(), count.to_string().bold()),
      None => eprintln!("{}: could not fetch {}", "Error".red(), kind),
    }
  }
  Ok(())
}

pub fn run_config(config: &SyncConfig) -> Result<(), anyhow::Error> {
  let mut shown = config.clone();
  if shown.token.is_some() {
    shown.token = Some("<redacted>".into());
  }
  print!("{}", serde_yaml::to_string(&shown)?);
  Ok(())
}

pub fn print_value(value: &CachedValue, format: OutputFormat) -> Result<(), anyhow::Error> {
  match format {
    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
    OutputFormat::Summary => println!("{}", value.summary()),
  }
  Ok(())
}

/// Borderless table, one row per cached query.
pub fn cache_table(session: &SyncSession) -> Table {
  let mut table = Table::new();
  table
    .load_preset(presets::NOTHING)
    .set_content_arrangement(ContentArrangement::Dynamic)
    .set_header(
      ["key", "state", "value"]
        .iter()
        .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
    );

  let queries = session.query_cache();
  for key in queries.keys() {
    let Some(read) = queries.get(&key) else {
      continue;
    };
    let state = match read.freshness {
      Freshness::Fresh => "fresh",
      Freshness::Stale => "stale",
      Freshness::Invalidated => "invalidated",
    };
    table.add_row(vec![key.to_string(), state.to_string(), read.value.summary()]);
  }
  table
}
