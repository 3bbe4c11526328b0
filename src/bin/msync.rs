use clap::Parser;
use marketsync::cli::{run_config, run_get, run_unread, ClientArgs, Commands, Repl};
use marketsync::SyncSession;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
  let args = ClientArgs::parse();
  let config = args.load_config()?;

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into()),
    )
    .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
    .init();

  if let Some(Commands::Config) = &args.subcommand {
    return run_config(&config);
  }

  let session = SyncSession::connect(config)?;

  let result = match &args.subcommand {
    Some(Commands::Get { query }) => run_get(&session, query, args.format).await,
    Some(Commands::Unread) => run_unread(&session).await,
    Some(Commands::Config) => Ok(()),
    None => {
      session.start();
      Repl::new(session.clone(), args.format)?.run().await
    }
  };

  session.stop();
  result
}
