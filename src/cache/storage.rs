//! Cache store implementations: no-op and SQLite.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::traits::{CacheError, CacheStore};

/// Store that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStore;

#[async_trait]
impl CacheStore for NoopStore {
  fn name(&self) -> &'static str {
    "noop"
  }

  async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
    Ok(None) // Always miss
  }

  async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<(), CacheError> {
    Ok(()) // Discard
  }

  async fn delete(&self, _key: &str) -> Result<(), CacheError> {
    Ok(())
  }

  async fn delete_matching(&self, _pattern: &str) -> Result<u64, CacheError> {
    Ok(0)
  }
}

/// SQLite-based cache store.
///
/// Entries carry an absolute `expires_at` (unix seconds); expired rows are
/// ignored on read and purged lazily. Pattern deletion uses SQLite's `GLOB`,
/// which shares its wildcard syntax with Redis `SCAN MATCH`.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) a store at the default location.
  pub fn open_default() -> Result<Self> {
    let path = Self::default_path()?;
    Self::open(&path)
  }

  /// Open (or create) a store at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      if !parent.as_os_str().is_empty() {
        std::fs::create_dir_all(parent)
          .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
      }
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// Open a private in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("lpx").join("cache.db"))
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, CacheError> {
    self.conn.lock().map_err(|_| CacheError::Poisoned)
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    cache_key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_cache_entries_expires
    ON cache_entries(expires_at);
"#;

fn expiry_from_now(ttl: Duration) -> i64 {
  let ttl = i64::try_from(ttl.as_secs()).unwrap_or(i64::MAX);
  Utc::now().timestamp().saturating_add(ttl)
}

#[async_trait]
impl CacheStore for SqliteStore {
  fn name(&self) -> &'static str {
    "sqlite"
  }

  async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
    let conn = self.lock()?;
    let now = Utc::now().timestamp();

    let row: Option<(String, i64)> = conn
      .query_row(
        "SELECT value, expires_at FROM cache_entries WHERE cache_key = ?",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()?;

    match row {
      Some((value, expires_at)) if expires_at > now => Ok(Some(value)),
      Some(_) => {
        conn.execute("DELETE FROM cache_entries WHERE cache_key = ?", params![key])?;
        Ok(None)
      }
      None => Ok(None),
    }
  }

  async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
    let conn = self.lock()?;

    conn.execute(
      "INSERT OR REPLACE INTO cache_entries (cache_key, value, expires_at, cached_at)
       VALUES (?, ?, ?, datetime('now'))",
      params![key, value, expiry_from_now(ttl)],
    )?;

    // Opportunistic purge of anything already expired
    conn.execute(
      "DELETE FROM cache_entries WHERE expires_at <= ?",
      params![Utc::now().timestamp()],
    )?;

    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), CacheError> {
    let conn = self.lock()?;
    conn.execute("DELETE FROM cache_entries WHERE cache_key = ?", params![key])?;
    Ok(())
  }

  async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
    let conn = self.lock()?;
    let removed = conn.execute(
      "DELETE FROM cache_entries WHERE cache_key GLOB ?",
      params![pattern],
    )?;
    Ok(removed as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_noop_store_always_misses() {
    let store = NoopStore;
    store.set("k", "\"v\"", Duration::from_secs(60)).await.unwrap();
    assert_eq!(store.get("k").await.unwrap(), None);
    assert_eq!(store.delete_matching("*").await.unwrap(), 0);
  }

  #[tokio::test]
  async fn test_sqlite_set_get_delete() {
    let store = SqliteStore::open_in_memory().unwrap();

    store.set("lp:GET:a", "1", Duration::from_secs(60)).await.unwrap();
    assert_eq!(store.get("lp:GET:a").await.unwrap().as_deref(), Some("1"));

    store.delete("lp:GET:a").await.unwrap();
    assert_eq!(store.get("lp:GET:a").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_sqlite_zero_ttl_expires_immediately() {
    let store = SqliteStore::open_in_memory().unwrap();

    store.set("short", "1", Duration::ZERO).await.unwrap();
    assert_eq!(store.get("short").await.unwrap(), None);
  }

  #[tokio::test]
  async fn test_sqlite_delete_matching_glob() {
    let store = SqliteStore::open_in_memory().unwrap();
    let ttl = Duration::from_secs(60);

    store.set("lp:GET:https://x/tasks/1", "1", ttl).await.unwrap();
    store.set("lp:GET:https://x/tasks/1:include=notes", "2", ttl).await.unwrap();
    store.set("lp:GET:https://x/projects/1", "3", ttl).await.unwrap();

    let removed = store.delete_matching("lp:GET:*/tasks/1*").await.unwrap();
    assert_eq!(removed, 2);
    assert!(store.get("lp:GET:https://x/projects/1").await.unwrap().is_some());
  }

  #[tokio::test]
  async fn test_sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      store.set("key", "\"value\"", Duration::from_secs(600)).await.unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.get("key").await.unwrap().as_deref(), Some("\"value\""));
  }
}
