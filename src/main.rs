use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;

use medbook::api::TokenStore;
use medbook::app::App;
use medbook::commands::{self, Command};
use medbook::config::Config;
use medbook::logging;

#[derive(Parser, Debug)]
#[command(name = "medbook")]
#[command(about = "Find doctors and manage your appointments from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/medbook/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Logging is best effort; the CLI works without it
  let _log_guard = match logging::init() {
    Ok(guard) => Some(guard),
    Err(e) => {
      eprintln!("warning: {}", e);
      None
    }
  };

  let tokens = Arc::new(TokenStore::open()?);

  // Session commands work before any backend is configured
  if args.command.is_session() {
    return commands::run_session(&tokens, &args.command);
  }

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Initialize and run the app
  let mut app = App::new(config, tokens)?;
  app.run(args.command).await?;

  Ok(())
}
