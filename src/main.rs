mod config;
mod error;
mod gemini;
mod history;
mod logger;
mod models;
mod notifications;
mod router;
mod storage;
mod studio;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::sync::RwLock;

use config::load_or_init;
use gemini::GeminiClient;
use history::HistoryStore;
use notifications::NotificationBus;
use router::{run_router, RouterState};
use storage::SqliteStore;
use studio::Studio;

const DATA_DIR_ENV: &str = "AETHERLENS_DATA_DIR";

fn data_dir() -> anyhow::Result<PathBuf> {
  if let Some(dir) = std::env::var_os(DATA_DIR_ENV) {
    return Ok(PathBuf::from(dir));
  }
  let base = dirs::data_dir().context("missing app data dir")?;
  Ok(base.join("aetherlens"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let data_dir = data_dir()?;
  std::fs::create_dir_all(&data_dir)?;

  let config_path = data_dir.join("config.json");
  let db_path = data_dir.join("aetherlens.sqlite3");
  let log_path = data_dir.join("aetherlens.log");

  logger::init(&log_path)?;
  tracing::info!(data_dir = %data_dir.display(), "AetherLens starting up");

  let config = load_or_init(&config_path)
    .with_context(|| format!("failed to read {}", config_path.display()))?;
  let bus = NotificationBus::new(config.notification_lifetime());
  let listen_addr = config.listen_addr.clone();
  let history_key = config.history_key.clone();
  let draft = config.default_settings.clone();
  let config = Arc::new(RwLock::new(config));

  let kv = Arc::new(SqliteStore::open(&db_path)?);
  let history = HistoryStore::load(kv, history_key, bus.clone()).await;

  let client = Arc::new(GeminiClient::new(config.clone()));
  let studio = Arc::new(Studio::new(draft, history, client.clone(), client, bus));

  let listener = std::net::TcpListener::bind(&listen_addr)
    .with_context(|| format!("failed to bind {listen_addr}"))?;
  listener.set_nonblocking(true)?;
  let port = listener.local_addr()?.port();
  tracing::info!(port, "router listening");
  println!("AetherLens listening on http://{}", listener.local_addr()?);

  let state = RouterState {
    started_at: Instant::now(),
    config_path,
    config,
    studio,
  };

  if let Err(err) = run_router(listener, state).await {
    tracing::error!("router error: {err:#}");
    return Err(err);
  }
  Ok(())
}
