//! Redis-backed cache store.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tracing::info;

use super::traits::{CacheError, CacheStore};

/// Keys fetched per `SCAN` round trip during pattern deletion.
const SCAN_BATCH: usize = 200;

/// Cache store on an external Redis server.
///
/// Pattern deletion walks the keyspace with `SCAN MATCH` rather than `KEYS`
/// so a large cache never blocks the server.
#[derive(Clone)]
pub struct RedisStore {
  conn: MultiplexedConnection,
}

impl RedisStore {
  /// Connect and verify the server answers `PING` within `timeout`.
  pub async fn connect(url: &str, timeout: Duration) -> Result<Self, CacheError> {
    let client = redis::Client::open(url)?;

    let mut conn = tokio::time::timeout(timeout, client.get_multiplexed_async_connection())
      .await
      .map_err(|_| {
        redis::RedisError::from((redis::ErrorKind::IoError, "timed out connecting to redis"))
      })??;

    let _pong: String = redis::cmd("PING").query_async(&mut conn).await?;
    info!(url = %redact(url), "Connected to Redis cache");

    Ok(Self { conn })
  }
}

/// Strip credentials from a connection URL before logging it.
fn redact(url: &str) -> String {
  match url::Url::parse(url) {
    Ok(mut parsed) if parsed.password().is_some() => {
      let _ = parsed.set_password(Some("***"));
      parsed.to_string()
    }
    _ => url.to_string(),
  }
}

#[async_trait]
impl CacheStore for RedisStore {
  fn name(&self) -> &'static str {
    "redis"
  }

  async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
    let mut conn = self.conn.clone();
    let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
    Ok(value)
  }

  async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
    let mut conn = self.conn.clone();
    let _: () = redis::cmd("SET")
      .arg(key)
      .arg(value)
      .arg("EX")
      .arg(ttl.as_secs().max(1))
      .query_async(&mut conn)
      .await?;
    Ok(())
  }

  async fn delete(&self, key: &str) -> Result<(), CacheError> {
    let mut conn = self.conn.clone();
    let _: u64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
    Ok(())
  }

  async fn delete_matching(&self, pattern: &str) -> Result<u64, CacheError> {
    let mut conn = self.conn.clone();
    let mut cursor: u64 = 0;
    let mut removed = 0u64;

    loop {
      let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
        .arg(cursor)
        .arg("MATCH")
        .arg(pattern)
        .arg("COUNT")
        .arg(SCAN_BATCH)
        .query_async(&mut conn)
        .await?;

      if !keys.is_empty() {
        let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(&mut conn).await?;
        removed += deleted;
      }

      if next == 0 {
        break;
      }
      cursor = next;
    }

    Ok(removed)
  }
}
