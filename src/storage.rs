use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;

/// Durable key/value collaborator backing the history store.
#[async_trait]
pub trait KvStore: Send + Sync {
  async fn read(&self, key: &str) -> anyhow::Result<Option<String>>;
  async fn write(&self, key: &str, value: &str) -> anyhow::Result<()>;
}

pub fn init_db(path: &Path) -> anyhow::Result<Connection> {
  let conn = Connection::open(path)?;
  create_schema(&conn)?;
  Ok(conn)
}

fn create_schema(conn: &Connection) -> anyhow::Result<()> {
  conn.execute_batch(
    "
    CREATE TABLE IF NOT EXISTS kv (
      key TEXT PRIMARY KEY,
      value TEXT NOT NULL,
      updated_at TEXT NOT NULL
    );
    ",
  )?;
  Ok(())
}

pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  pub fn open(path: &Path) -> anyhow::Result<Self> {
    Ok(Self::new(init_db(path)?))
  }

  #[cfg(test)]
  pub fn in_memory() -> anyhow::Result<Self> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(Self::new(conn))
  }

  fn new(conn: Connection) -> Self {
    Self {
      conn: Mutex::new(conn),
    }
  }
}

#[async_trait]
impl KvStore for SqliteStore {
  async fn read(&self, key: &str) -> anyhow::Result<Option<String>> {
    let conn = self.conn.lock().await;
    let value = conn
      .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
        row.get::<_, String>(0)
      })
      .optional()?;
    Ok(value)
  }

  async fn write(&self, key: &str, value: &str) -> anyhow::Result<()> {
    let updated_at = Utc::now().to_rfc3339();
    let conn = self.conn.lock().await;
    conn.execute(
      "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
       ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
      params![key, value, updated_at],
    )?;
    Ok(())
  }
}
