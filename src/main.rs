use boardsync::api::RestBackend;
use boardsync::app::App;
use boardsync::config::Config;
use boardsync::context::SyncContext;
use boardsync::logging;
use boardsync::notify::ChannelNotifier;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "boardsync")]
#[command(about = "A kanban board client with optimistic updates and offline cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/boardsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Board to open
  #[arg(short, long)]
  board: Option<String>,

  /// Don't read or write the on-disk cache snapshot
  #[arg(long)]
  no_cache: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  if args.no_cache {
    config.cache.persist = false;
  }
  let board_id = args
    .board
    .or_else(|| config.board.default_board.clone())
    .ok_or_else(|| eyre!("No board given. Pass --board or set board.default_board in the config."))?;

  let _log_guard = logging::init(&config.log_dir())?;
  info!(board = %board_id, api = %config.api.url, "starting");

  let backend = Arc::new(RestBackend::new(&config)?);
  let (notifier, ui_messages) = ChannelNotifier::new();
  let notifier = Arc::new(notifier);
  let ctx = Arc::new(SyncContext::new(
    &config,
    backend,
    notifier.clone(),
    notifier,
  )?);

  let mut app = App::new(Arc::clone(&ctx), board_id, config.api.url.clone());
  let result = app.run(ui_messages).await;

  ctx.shutdown();
  result
}
