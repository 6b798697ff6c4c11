use async_trait::async_trait;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Opaque key-value store with TTL (spec.md §4.1). Implementations MAY
/// fail transiently; it is the *caller's* responsibility to treat a
/// `TransientKv` error as a miss on reads and as fire-and-forget on
/// writes — see [`get_or_miss`] and [`set_best_effort`].
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> AppResult<()>;
    async fn delete(&self, key: &str) -> AppResult<()>;
    async fn scan(&self, prefix: &str) -> AppResult<Vec<String>>;
    async fn close(&self) -> AppResult<()>;
}

/// Reads `key` and decodes it as JSON, collapsing any transient failure or
/// decode error into a plain cache miss rather than propagating the error.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Option<T> {
    match store.get(key).await {
        Ok(Some(bytes)) => match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(key, error = %err, "failed to decode cached value, treating as miss");
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            tracing::warn!(key, error = %err, "transient kv failure on read, treating as miss");
            None
        }
    }
}

/// Serializes `value` as JSON and writes it, swallowing transient
/// failures (fire-and-forget, per spec.md §4.1).
pub async fn set_json_best_effort<T: Serialize + Sync>(
    store: &dyn KvStore,
    key: &str,
    value: &T,
    ttl_seconds: u64,
) {
    let bytes = match serde_json::to_vec(value) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::error!(key, error = %err, "failed to serialize value for cache write");
            return;
        }
    };
    if let Err(err) = store.set(key, &bytes, ttl_seconds).await {
        tracing::warn!(key, error = %err, "transient kv failure on write, dropping");
    }
}

/// Thin async wrapper over a Redis-like store (spec.md §4.1), backed by
/// `redis`'s auto-reconnecting `ConnectionManager` so it is cheap to clone
/// and share behind `Arc` — the pattern the pack's Redis-backed services
/// (`ctaque-weather-app-challenge`, `darianrosebrook-agent-agency`,
/// `harborgrid-justin-caddy`) all use for a shared async cache client.
#[derive(Clone)]
pub struct RedisKvStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisKvStore {
    pub async fn connect(url: &str) -> AppResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| AppError::Internal(format!("invalid redis url: {e}")))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| AppError::TransientKv(e.to_string()))?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn
            .get(key)
            .await
            .map_err(|e| AppError::TransientKv(e.to_string()))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl_seconds)
            .await
            .map_err(|e| AppError::TransientKv(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| AppError::TransientKv(e.to_string()))?;
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> AppResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let pattern = format!("{prefix}*");
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(200)
                .query_async(&mut conn)
                .await
                .map_err(|e| AppError::TransientKv(e.to_string()))?;
            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }
        Ok(keys)
    }

    async fn close(&self) -> AppResult<()> {
        // ConnectionManager has no explicit close; dropping the last clone
        // tears down the connection. Nothing to do here but it keeps the
        // KvStore contract (spec.md §4.1) symmetric with in-memory stores.
        Ok(())
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::{Duration, Instant};

    struct Entry {
        value: Vec<u8>,
        expires_at: Instant,
    }

    /// In-memory `KvStore` test double (spec.md §8 — unit tests should not
    /// require a live Redis).
    #[derive(Default)]
    pub struct InMemoryKvStore {
        data: Mutex<HashMap<String, Entry>>,
    }

    impl InMemoryKvStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl KvStore for InMemoryKvStore {
        async fn get(&self, key: &str) -> AppResult<Option<Vec<u8>>> {
            let mut data = self.data.lock().unwrap();
            if let Some(entry) = data.get(key) {
                if entry.expires_at > Instant::now() {
                    return Ok(Some(entry.value.clone()));
                }
                data.remove(key);
            }
            Ok(None)
        }

        async fn set(&self, key: &str, value: &[u8], ttl_seconds: u64) -> AppResult<()> {
            let mut data = self.data.lock().unwrap();
            data.insert(
                key.to_string(),
                Entry {
                    value: value.to_vec(),
                    expires_at: Instant::now() + Duration::from_secs(ttl_seconds.max(1)),
                },
            );
            Ok(())
        }

        async fn delete(&self, key: &str) -> AppResult<()> {
            self.data.lock().unwrap().remove(key);
            Ok(())
        }

        async fn scan(&self, prefix: &str) -> AppResult<Vec<String>> {
            let data = self.data.lock().unwrap();
            Ok(data
                .keys()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect())
        }

        async fn close(&self) -> AppResult<()> {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::InMemoryKvStore;
    use super::*;

    #[tokio::test]
    async fn round_trip_within_ttl() {
        let store = InMemoryKvStore::new();
        store.set("k", b"v", 60).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let store = InMemoryKvStore::new();
        store.set("k", b"v", 60).await.unwrap();
        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn scan_matches_prefix() {
        let store = InMemoryKvStore::new();
        store.set("metadata:weather:city:warsaw", b"1", 60).await.unwrap();
        store.set("weather:city:warsaw", b"1", 60).await.unwrap();
        let keys = store.scan("metadata:weather:").await.unwrap();
        assert_eq!(keys, vec!["metadata:weather:city:warsaw".to_string()]);
    }

    #[tokio::test]
    async fn get_json_treats_transient_failure_as_miss() {
        struct AlwaysFails;
        #[async_trait]
        impl KvStore for AlwaysFails {
            async fn get(&self, _key: &str) -> AppResult<Option<Vec<u8>>> {
                Err(AppError::TransientKv("boom".into()))
            }
            async fn set(&self, _key: &str, _value: &[u8], _ttl_seconds: u64) -> AppResult<()> {
                Err(AppError::TransientKv("boom".into()))
            }
            async fn delete(&self, _key: &str) -> AppResult<()> {
                Ok(())
            }
            async fn scan(&self, _prefix: &str) -> AppResult<Vec<String>> {
                Ok(vec![])
            }
            async fn close(&self) -> AppResult<()> {
                Ok(())
            }
        }

        let store = AlwaysFails;
        let value: Option<String> = get_json(&store, "k").await;
        assert_eq!(value, None);
        // set_json_best_effort must not panic even though the write fails.
        set_json_best_effort(&store, "k", &"v".to_string(), 60).await;
    }
}
