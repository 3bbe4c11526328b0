mod commands;
mod repl;

pub use commands::{
  cache_table, print_value, run_config, run_get, run_unread, ClientArgs, Commands, OutputFormat,
};
pub use repl::Repl;
