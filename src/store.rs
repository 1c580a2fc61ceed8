use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::sync::Mutex;

use crate::error::Error;

/// TTL-bound key-value persistence for sessions and PKCE bindings.
///
/// The backend owns expiry; there is no sweeper on this side. A backend
/// failure is [`Error::StoreUnavailable`] and must never be reported as a
/// missing key — conflating the two would log users out on a Redis hiccup.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store `value` under `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error>;

    /// Look up `key`. `None` means absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, Error>;

    /// Atomic get-and-delete. Of two concurrent takes of the same key, at
    /// most one observes the value.
    async fn take(&self, key: &str) -> Result<Option<String>, Error>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), Error>;
}

/// Redis-backed store.
///
/// `ConnectionManager` handles reconnection and is cheap to clone per
/// operation. TTLs ride on `SET EX`; `take` maps to `GETDEL`, which is the
/// atomicity primitive the PKCE single-use contract needs.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreUnavailable`] if the URL is invalid or the
    /// server is unreachable.
    pub async fn connect(redis_url: &str) -> Result<Self, Error> {
        let client = redis::Client::open(redis_url).map_err(store_err)?;
        let conn = ConnectionManager::new(client).await.map_err(store_err)?;
        Ok(Self { conn })
    }
}

fn store_err(e: redis::RedisError) -> Error {
    Error::StoreUnavailable(e.to_string())
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn
            .set_ex(key, value, ttl.as_secs())
            .await
            .map_err(store_err)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(store_err)?;
        Ok(value)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, Error> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(store_err)?;
        Ok(())
    }
}

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory store for tests and local development.
///
/// Expiry is checked lazily on read; `take` removes under the map lock, so
/// single-use semantics match the Redis backend.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<(), Error> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, Error> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn take(&self, key: &str) -> Result<Option<String>, Error> {
        let mut entries = self.entries.lock().await;
        Ok(entries
            .remove(key)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.value))
    }

    async fn delete(&self, key: &str) -> Result<(), Error> {
        let mut entries = self.entries.lock().await;
        entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test]
    async fn put_get_delete() {
        let store = MemoryStore::new();
        store
            .put("session:a", "data", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get("session:a").await.unwrap(),
            Some("data".to_string())
        );
        store.delete("session:a").await.unwrap();
        assert_eq!(store.get("session:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn entries_expire() {
        let store = MemoryStore::new();
        store
            .put("pkce:s", "verifier", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(store.get("pkce:s").await.unwrap(), None);
        assert_eq!(store.take("pkce:s").await.unwrap(), None);
    }

    #[tokio::test]
    async fn take_is_single_use() {
        let store = MemoryStore::new();
        store
            .put("pkce:s", "verifier", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.take("pkce:s").await.unwrap(),
            Some("verifier".to_string())
        );
        assert_eq!(store.take("pkce:s").await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_takes_yield_one_winner() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("pkce:s", "verifier", Duration::from_secs(60))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(
                async move { store.take("pkce:s").await.unwrap() },
            ));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn delete_absent_key_is_ok() {
        let store = MemoryStore::new();
        store.delete("session:missing").await.unwrap();
    }
}
