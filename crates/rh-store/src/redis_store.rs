//! Redis-backed store.
//!
//! Every value is stored as its JSON text. Lists and sets map onto native
//! Redis lists and sets, so every operation is a single atomic command.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Cmd, FromRedisValue, RedisError};
use rh_types::{StoreError, StoreResult};
use serde_json::Value;
use std::time::Duration;

use crate::store::{BackendKind, KeyValueStore};

pub struct RedisStore {
    url: String,
    connection: MultiplexedConnection,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").field("url", &self.url).finish()
    }
}

/// Accept either a full `redis://` URL or a bare host name.
pub fn normalize_url(url: &str) -> String {
    if url.contains("://") {
        url.to_string()
    } else {
        format!("redis://{url}/")
    }
}

fn backend_error(e: RedisError) -> StoreError {
    StoreError::Backend {
        message: e.to_string(),
    }
}

fn decode(raw: &str) -> StoreResult<Value> {
    Ok(serde_json::from_str(raw)?)
}

fn decode_all(raw: Vec<String>) -> StoreResult<Vec<Value>> {
    raw.iter().map(|s| decode(s)).collect()
}

impl RedisStore {
    /// Connect and check the server answers `PING`.
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let url = normalize_url(url);
        let connection_error = |e: RedisError| StoreError::Connection {
            url: url.clone(),
            message: e.to_string(),
        };

        let client = redis::Client::open(url.as_str()).map_err(connection_error)?;
        let mut connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(connection_error)?;
        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(connection_error)?;

        Ok(Self { url, connection })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> StoreResult<T> {
        let mut connection = self.connection.clone();
        cmd.query_async(&mut connection).await.map_err(backend_error)
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn backend(&self) -> BackendKind {
        BackendKind::Redis
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Value>> {
        let raw: Option<String> = self.query(redis::cmd("GET").arg(key)).await?;
        raw.as_deref().map(decode).transpose()
    }

    async fn set(&self, key: &str, value: &Value) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        self.query(redis::cmd("SET").arg(key).arg(json)).await
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let count: i64 = self.query(redis::cmd("EXISTS").arg(key)).await?;
        Ok(count > 0)
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        let _: i64 = self.query(redis::cmd("DEL").arg(key)).await?;
        Ok(())
    }

    async fn increment(&self, key: &str, amount: i64) -> StoreResult<i64> {
        self.query(redis::cmd("INCRBY").arg(key).arg(amount)).await
    }

    async fn counter(&self, key: &str) -> StoreResult<i64> {
        let raw: Option<String> = self.query(redis::cmd("GET").arg(key)).await?;
        match raw {
            None => Ok(0),
            Some(text) => text.trim().parse().map_err(|_| StoreError::NotANumber {
                key: key.to_string(),
            }),
        }
    }

    async fn push_right(&self, key: &str, value: &Value) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        let _: i64 = self.query(redis::cmd("RPUSH").arg(key).arg(json)).await?;
        Ok(())
    }

    async fn push_left(&self, key: &str, value: &Value) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        let _: i64 = self.query(redis::cmd("LPUSH").arg(key).arg(json)).await?;
        Ok(())
    }

    async fn pop_right(&self, key: &str) -> StoreResult<Option<Value>> {
        let raw: Option<String> = self.query(redis::cmd("LPOP").arg(key)).await?;
        raw.as_deref().map(decode).transpose()
    }

    async fn pop_right_blocking(&self, key: &str, timeout: Duration) -> StoreResult<Option<Value>> {
        let popped: Option<(String, String)> = self
            .query(redis::cmd("BLPOP").arg(key).arg(timeout.as_secs_f64()))
            .await?;
        popped.map(|(_, raw)| decode(&raw)).transpose()
    }

    async fn remove_value(&self, key: &str, value: &Value) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        let _: i64 = self.query(redis::cmd("LREM").arg(key).arg(0).arg(json)).await?;
        Ok(())
    }

    async fn list_all(&self, key: &str) -> StoreResult<Vec<Value>> {
        let raw: Vec<String> = self.query(redis::cmd("LRANGE").arg(key).arg(0).arg(-1)).await?;
        decode_all(raw)
    }

    async fn length(&self, key: &str) -> StoreResult<usize> {
        self.query(redis::cmd("LLEN").arg(key)).await
    }

    async fn add_member(&self, key: &str, value: &Value) -> StoreResult<()> {
        let json = serde_json::to_string(value)?;
        let _: i64 = self.query(redis::cmd("SADD").arg(key).arg(json)).await?;
        Ok(())
    }

    async fn members(&self, key: &str) -> StoreResult<Vec<Value>> {
        let raw: Vec<String> = self.query(redis::cmd("SMEMBERS").arg(key)).await?;
        decode_all(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_host_becomes_url() {
        assert_eq!(normalize_url("cache-host"), "redis://cache-host/");
        assert_eq!(normalize_url("redis://10.0.0.5:6380/2"), "redis://10.0.0.5:6380/2");
    }

    /// Runs only when a redis server is available, e.g.
    /// `ROUNDHOUSE_TEST_REDIS_URL=redis://127.0.0.1/15`.
    #[tokio::test]
    async fn redis_store_matches_store_contract() {
        let Ok(url) = std::env::var("ROUNDHOUSE_TEST_REDIS_URL") else {
            return;
        };
        let store = RedisStore::connect(&url).await.unwrap();
        let prefix = format!("rh-test:{}", uuid::Uuid::new_v4().simple());
        let queue = format!("{prefix}:q");
        let counter = format!("{prefix}:c");
        let scalar = format!("{prefix}:s");

        store.set(&scalar, &json!({"a": [1, 2]})).await.unwrap();
        assert_eq!(store.get(&scalar).await.unwrap(), Some(json!({"a": [1, 2]})));

        for i in 1..=3 {
            store.push_right(&queue, &json!(i)).await.unwrap();
        }
        for i in 1..=3 {
            assert_eq!(store.pop_right(&queue).await.unwrap(), Some(json!(i)));
        }
        let empty = store
            .pop_right_blocking(&queue, Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(empty, None);

        assert_eq!(store.increment(&counter, 1).await.unwrap(), 1);
        assert_eq!(store.increment(&counter, 2).await.unwrap(), 3);
        assert_eq!(store.counter(&counter).await.unwrap(), 3);

        for key in [queue, counter, scalar] {
            store.delete(&key).await.unwrap();
        }
    }
}
