use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Sends all tracing output to an append-only log file in the data dir.
pub fn init(path: &Path) -> anyhow::Result<()> {
  let file = OpenOptions::new().create(true).append(true).open(path)?;
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(Mutex::new(file))
    .with_ansi(false)
    .with_target(false)
    .try_init()
    .map_err(|e| anyhow::anyhow!(e))?;
  Ok(())
}
