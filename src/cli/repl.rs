use colored::Colorize;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::collections::HashMap;
use std::sync::Arc;

use super::commands::{cache_table, print_value, run_unread, OutputFormat};
use crate::cache::QueryKey;
use crate::live::Subscription;
use crate::session::{Query, SyncSession};

const HELP: &str = "Commands:
  .get <query>             read through the caches (also: a bare query)
  .invalidate <seg> ...    invalidate a key prefix, e.g. .invalidate predictions list
  .stats                   cache, coalescer and counter statistics
  .state                   live channel state
  .unread                  refresh and show unread counters
  .join <conversation>     join a conversation room
  .leave <conversation>    leave a conversation room
  .sync                    drop all cached data and refetch
  .quit

Queries: predictions [k=v ...] | prediction <id> | comments <id> | conversations
         conversation <id> | notifications | profile <id> | balance | leaderboard";

pub struct Repl {
  session: Arc<SyncSession>,
  editor: DefaultEditor,
  format: OutputFormat,
  rooms: HashMap<String, Subscription>,
}

impl Repl {
  pub fn new(session: Arc<SyncSession>, format: OutputFormat) -> Result<Self, anyhow::Error> {
    Ok(Self {
      session,
      editor: DefaultEditor::new()?,
      format,
      rooms: HashMap::new(),
    })
  }

  pub async fn run(&mut self) -> Result<(), anyhow::Error> {
    println!("{} v{}", "marketsync".green().bold(), env!("CARGO_PKG_VERSION"));
    println!("Type {} for help\n", ".help".cyan());

    loop {
      match self.editor.readline(&format!("{} ", "msync>".green())) {
        Ok(line) => {
          let line = line.trim();
          if line.is_empty() {
            continue;
          }
          let _ = self.editor.add_history_entry(line);
          if line.starts_with('.') {
            if !self.command(line).await {
              break;
            }
          } else {
            self.get(line).await;
          }
        }
        Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
        Err(e) => {
          eprintln!("Error: {:?}", e);
          break;
        }
      }
    }
    Ok(())
  }

  async fn command(&mut self, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let cmd = words.next().unwrap_or("");
    let args: Vec<&str> = words.collect();

    match cmd {
      ".help" => println!("{}", HELP),
      ".get" => self.get(&args.join(" ")).await,
      ".invalidate" => {
        let prefix = QueryKey::new(args.iter().copied());
        let count = self.session.invalidate(&prefix);
        println!("Invalidated {} entries under {}", count, prefix);
      }
      ".stats" => self.stats(),
      ".state" => println!("live channel: {}", self.session.live().state().to_string().bold()),
      ".unread" => {
        if let Err(e) = run_unread(&self.session).await {
          eprintln!("{}: {}", "Error".red(), e);
        }
      }
      ".join" => match args.as_slice() {
        [id] => {
          let sub = self.session.join_conversation(id);
          self.rooms.insert((*id).to_string(), sub);
          println!("Joined conversation {}", id);
        }
        _ => eprintln!("Usage: .join <conversation>"),
      },
      ".leave" => match args.as_slice() {
        [id] => match self.rooms.remove(*id) {
          Some(_) => println!("Left conversation {}", id),
          None => eprintln!("Not in conversation {}", id),
        },
        _ => eprintln!("Usage: .leave <conversation>"),
      },
      ".sync" => match self.session.sync_all().await {
        Ok(()) => println!("{}", "Resynced".green()),
        Err(e) => eprintln!("{}: {}", "Error".red(), e),
      },
      ".quit" | ".exit" => return false,
      _ => eprintln!("Unknown command, try .help"),
    }
    true
  }

  async fn get(&self, text: &str) {
    let query: Query = match text.parse() {
      Ok(q) => q,
      Err(e) => {
        eprintln!("{}: {}", "Error".red(), e);
        return;
      }
    };
    match self.session.query(query).await {
      Ok(value) => {
        if let Err(e) = print_value(&value, self.format) {
          eprintln!("{}: {}", "Error".red(), e);
        }
      }
      Err(e) => eprintln!("{}: {}", "Error".red(), e),
    }
  }

  fn stats(&self) {
    let stats = self.session.stats();
    println!(
      "ttl cache: {} keys, {} hits, {} misses, {} expired, {} invalidated ({:.0}% hit rate)",
      stats.ttl.keys,
      stats.ttl.hits,
      stats.ttl.misses,
      stats.ttl.expired,
      stats.ttl.invalidated,
      stats.ttl.hit_rate() * 100.0
    );
    println!(
      "coalescer: {} waves, {} requests, {} pending",
      stats.coalescer.waves, stats.coalescer.requests, stats.coalescer.pending
    );
    for (kind, count) in &stats.unread {
      println!("{}: {}", kind, count);
    }
    println!("live channel: {}", stats.live);
    if stats.queries == 0 {
      println!("No cached queries.");
    } else {
      println!("{} cached queries:\n{}", stats.queries.to_string().bold(), cache_table(&self.session));
    }
  }
}
