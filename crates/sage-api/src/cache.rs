//! Answer cache for repeated questions.
//!
//! Redis when reachable, otherwise an in-process LRU with per-entry expiry.
//! Values are stored as serialized JSON so a hit returns exactly the bytes
//! that were written.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `REDIS_ENABLED`: Set to "false" to disable Redis (default: true)
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
//! - `REDIS_CACHE_TTL`: Cache TTL in seconds (default: 3600)
//! - `CACHE_LOCAL_CAPACITY`: Entries kept by the in-process fallback (default: 512)

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lru::LruCache;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use sage_core::defaults;

/// Response cache shared by all requests.
#[derive(Clone)]
pub struct ResponseCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    /// Redis connection manager (None if disabled or unreachable).
    connection: RwLock<Option<ConnectionManager>>,
    local: Mutex<LruCache<String, LocalEntry>>,
    ttl_seconds: u64,
    prefix: String,
}

struct LocalEntry {
    value: String,
    expires_at: Instant,
}

impl ResponseCache {
    /// Create a cache from environment configuration.
    pub async fn from_env() -> Self {
        let enabled = std::env::var("REDIS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let ttl_seconds: u64 = std::env::var("REDIS_CACHE_TTL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::CACHE_TTL_SECS);
        let capacity: usize = std::env::var("CACHE_LOCAL_CAPACITY")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::CACHE_LOCAL_CAPACITY);

        let connection = if enabled {
            match redis::Client::open(redis_url.as_str()) {
                Ok(client) => match ConnectionManager::new(client).await {
                    Ok(conn) => {
                        info!(
                            "Redis answer cache enabled (TTL: {}s, URL: {})",
                            ttl_seconds,
                            redis_url.replace(|c: char| c.is_ascii_alphanumeric(), "*")
                        );
                        Some(conn)
                    }
                    Err(e) => {
                        warn!("Failed to connect to Redis, using in-process cache: {}", e);
                        None
                    }
                },
                Err(e) => {
                    warn!("Invalid Redis URL, using in-process cache: {}", e);
                    None
                }
            }
        } else {
            info!("Redis disabled via REDIS_ENABLED=false, using in-process cache");
            None
        };

        Self::build(connection, capacity, ttl_seconds)
    }

    /// In-process cache only.
    pub fn local(capacity: usize, ttl: Duration) -> Self {
        Self::build(None, capacity, ttl.as_secs())
    }

    fn build(connection: Option<ConnectionManager>, capacity: usize, ttl_seconds: u64) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(CacheInner {
                connection: RwLock::new(connection),
                local: Mutex::new(LruCache::new(capacity)),
                ttl_seconds,
                prefix: defaults::CACHE_KEY_PREFIX.to_string(),
            }),
        }
    }

    pub async fn is_redis_connected(&self) -> bool {
        self.inner.connection.read().await.is_some()
    }

    /// Key for a question: sha256 of the normalized query plus sorted categories.
    pub fn cache_key(&self, query: &str, categories: &[String]) -> String {
        let mut hasher = Sha256::new();

        let normalized = query
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        hasher.update(normalized.as_bytes());

        let mut sorted: Vec<&String> = categories.iter().collect();
        sorted.sort();
        sorted.dedup();
        for category in sorted {
            hasher.update(b"\x1f");
            hasher.update(category.as_bytes());
        }

        let hash = hex::encode(hasher.finalize());
        format!("{}{}", self.inner.prefix, &hash[..16])
    }

    /// Raw cached JSON for `key`.
    pub async fn get_raw(&self, key: &str) -> Option<String> {
        {
            let mut conn_guard = self.inner.connection.write().await;
            if let Some(conn) = conn_guard.as_mut() {
                match conn.get::<_, Option<String>>(key).await {
                    Ok(Some(data)) => {
                        debug!("Cache HIT: {}", key);
                        return Some(data);
                    }
                    Ok(None) => {
                        debug!("Cache MISS: {}", key);
                        return None;
                    }
                    Err(e) => error!("Redis GET error: {}", e),
                }
            }
        }

        let mut local = self.inner.local.lock().await;
        match local.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => {
                debug!("Local cache HIT: {}", key);
                Some(entry.value.clone())
            }
            Some(_) => {
                local.pop(key);
                debug!("Local cache EXPIRED: {}", key);
                None
            }
            None => None,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let data = self.get_raw(key).await?;
        match serde_json::from_str(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Cache deserialization error: {}", e);
                None
            }
        }
    }

    /// Store raw JSON under `key` with the configured TTL.
    pub async fn set_raw(&self, key: &str, value: String) -> bool {
        {
            let mut conn_guard = self.inner.connection.write().await;
            if let Some(conn) = conn_guard.as_mut() {
                match conn
                    .set_ex::<_, _, ()>(key, value.as_str(), self.inner.ttl_seconds)
                    .await
                {
                    Ok(_) => {
                        debug!("Cache SET: {} (TTL: {}s)", key, self.inner.ttl_seconds);
                        return true;
                    }
                    Err(e) => error!("Redis SET error: {}", e),
                }
            }
        }

        let expires_at = Instant::now() + Duration::from_secs(self.inner.ttl_seconds);
        self.inner
            .local
            .lock()
            .await
            .put(key.to_string(), LocalEntry { value, expires_at });
        debug!("Local cache SET: {}", key);
        true
    }

    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> bool {
        match serde_json::to_string(value) {
            Ok(serialized) => self.set_raw(key, serialized).await,
            Err(e) => {
                error!("Cache serialization error: {}", e);
                false
            }
        }
    }

    /// Drop every cached answer.
    pub async fn invalidate_all(&self) -> bool {
        self.inner.local.lock().await.clear();

        let mut conn_guard = self.inner.connection.write().await;
        let Some(conn) = conn_guard.as_mut() else {
            return true;
        };

        let pattern = format!("{}*", self.inner.prefix);
        match redis::cmd("KEYS")
            .arg(&pattern)
            .query_async::<Vec<String>>(conn)
            .await
        {
            Ok(keys) if !keys.is_empty() => match conn.del::<_, ()>(&keys[..]).await {
                Ok(_) => {
                    info!("Cache FLUSH: removed {} keys", keys.len());
                    true
                }
                Err(e) => {
                    error!("Redis flush error: {}", e);
                    false
                }
            },
            Ok(_) => {
                debug!("Cache FLUSH: no keys to remove");
                true
            }
            Err(e) => {
                error!("Redis KEYS error: {}", e);
                false
            }
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.inner.ttl_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sage_core::{CachedAnswer, SourceKind, SourceRef};

    fn cache() -> ResponseCache {
        ResponseCache::local(8, Duration::from_secs(60))
    }

    #[test]
    fn test_cache_key_normalization() {
        let cache = cache();
        let cats = vec!["hr".to_string(), "finance".to_string()];
        let reversed = vec!["finance".to_string(), "hr".to_string()];

        let key = cache.cache_key("What is  the PTO policy?", &cats);
        assert!(key.starts_with("sage:answer:"));
        assert_eq!(key.len(), "sage:answer:".len() + 16);
        assert_eq!(key, cache.cache_key("  what is the pto policy? ", &reversed));
        assert_ne!(key, cache.cache_key("What is the PTO policy?", &[]));
        assert_ne!(key, cache.cache_key("What is the sick leave policy?", &cats));
    }

    #[tokio::test]
    async fn test_round_trip_is_byte_identical() {
        let cache = cache();
        let answer = CachedAnswer {
            content: "PTO accrues at 1.5 days per month.".into(),
            sources: vec![SourceRef {
                chunk_id: "handbook-chunk-3".into(),
                document_name: "handbook".into(),
                page_number: 4,
                source_kind: SourceKind::Global,
                score: 0.9,
            }],
            skills: vec!["hr-tone".into()],
            created_at: Utc::now(),
        };
        let key = cache.cache_key("pto", &[]);
        let written = serde_json::to_string(&answer).unwrap();

        assert!(cache.set_raw(&key, written.clone()).await);
        assert_eq!(cache.get_raw(&key).await.as_deref(), Some(written.as_str()));
        assert_eq!(cache.get::<CachedAnswer>(&key).await, Some(answer));
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let cache = ResponseCache::local(8, Duration::ZERO);
        cache.set_raw("sage:answer:k", "\"v\"".into()).await;
        assert_eq!(cache.get_raw("sage:answer:k").await, None);
    }

    #[tokio::test]
    async fn test_invalidate_all_clears_local() {
        let cache = cache();
        cache.set("sage:answer:a", &"one").await;
        cache.set("sage:answer:b", &"two").await;
        assert!(cache.invalidate_all().await);
        assert_eq!(cache.get::<String>("sage:answer:a").await, None);
        assert_eq!(cache.get::<String>("sage:answer:b").await, None);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let cache = ResponseCache::local(1, Duration::from_secs(60));
        cache.set("sage:answer:a", &1).await;
        cache.set("sage:answer:b", &2).await;
        assert_eq!(cache.get::<i32>("sage:answer:a").await, None);
        assert_eq!(cache.get::<i32>("sage:answer:b").await, Some(2));
    }
}
