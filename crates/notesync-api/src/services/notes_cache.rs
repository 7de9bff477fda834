//! Redis-based read-through cache for per-owner note lists.
//!
//! The cache holds one entry per owner: a serialized snapshot of that
//! owner's non-archived notes. It is derived data with a short TTL and is
//! never the source of truth for a version check.
//!
//! Read and populate errors degrade to a miss, so an unreachable Redis only
//! costs latency. Invalidation is different: a write that cannot invalidate
//! a connected cache must fail, or a subsequent list could observe the
//! pre-write snapshot inside the TTL window.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `REDIS_ENABLED`: Set to "false" to disable caching (default: true)
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)
//! - `CACHE_TTL_SECS`: Cache TTL in seconds (default: 60)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use notesync_core::{Error, Result};

/// Default cache TTL in seconds.
pub const DEFAULT_TTL_SECS: u64 = 60;

/// Per-owner note list cache.
#[derive(Clone)]
pub struct NotesCache {
    inner: Arc<NotesCacheInner>,
}

struct NotesCacheInner {
    backend: Backend,
    /// Time-to-live for cached snapshots.
    ttl: Duration,
    /// Cache key prefix.
    prefix: String,
}

enum Backend {
    /// Redis connection manager (None if disabled or unreachable).
    Redis(RwLock<Option<ConnectionManager>>),
    /// In-process map, used by tests and redis-less deployments.
    Memory(Mutex<HashMap<String, MemoryEntry>>),
}

struct MemoryEntry {
    payload: String,
    expires_at: Instant,
}

impl NotesCache {
    /// Create a new cache from environment configuration.
    ///
    /// Reads:
    /// - `REDIS_ENABLED` (default: true)
    /// - `REDIS_URL` (default: redis://localhost:6379)
    /// - `CACHE_TTL_SECS` (default: 60 seconds)
    pub async fn from_env() -> Self {
        let enabled = std::env::var("REDIS_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let ttl_seconds: u64 = std::env::var("CACHE_TTL_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TTL_SECS);

        let connection = if enabled {
            match redis::Client::open(redis_url.as_str()) {
                Ok(client) => match ConnectionManager::new(client).await {
                    Ok(conn) => {
                        info!(
                            subsystem = "cache",
                            component = "notes_cache",
                            ttl_secs = ttl_seconds,
                            "Redis notes cache enabled"
                        );
                        Some(conn)
                    }
                    Err(e) => {
                        warn!("Failed to connect to Redis, cache disabled: {}", e);
                        None
                    }
                },
                Err(e) => {
                    warn!("Invalid Redis URL, cache disabled: {}", e);
                    None
                }
            }
        } else {
            info!("Redis notes cache disabled via REDIS_ENABLED=false");
            None
        };

        Self {
            inner: Arc::new(NotesCacheInner {
                backend: Backend::Redis(RwLock::new(connection)),
                ttl: Duration::from_secs(ttl_seconds),
                prefix: "ns:notes:".to_string(),
            }),
        }
    }

    /// Create a disabled cache: every read is a miss, every write a no-op.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(NotesCacheInner {
                backend: Backend::Redis(RwLock::new(None)),
                ttl: Duration::from_secs(DEFAULT_TTL_SECS),
                prefix: "ns:notes:".to_string(),
            }),
        }
    }

    /// Create an in-process cache with the given TTL.
    pub fn memory(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(NotesCacheInner {
                backend: Backend::Memory(Mutex::new(HashMap::new())),
                ttl,
                prefix: "ns:notes:".to_string(),
            }),
        }
    }

    /// Check if the cache has a usable backend.
    pub async fn is_connected(&self) -> bool {
        match &self.inner.backend {
            Backend::Redis(conn) => conn.read().await.is_some(),
            Backend::Memory(_) => true,
        }
    }

    /// Cache key for an owner's note list.
    pub fn cache_key(&self, owner_id: Uuid) -> String {
        format!("{}{}", self.inner.prefix, owner_id)
    }

    /// Get the cached note list for an owner. Any failure is a miss.
    pub async fn get<T: DeserializeOwned>(&self, owner_id: Uuid) -> Option<T> {
        let key = self.cache_key(owner_id);

        let payload = match &self.inner.backend {
            Backend::Redis(conn) => {
                let mut guard = conn.write().await;
                let conn = guard.as_mut()?;
                match conn.get::<_, Option<String>>(&key).await {
                    Ok(data) => data,
                    Err(e) => {
                        error!("Redis GET error: {}", e);
                        None
                    }
                }
            }
            Backend::Memory(map) => {
                let mut map = map.lock().unwrap();
                match map.get(&key) {
                    Some(entry) if entry.expires_at > Instant::now() => {
                        Some(entry.payload.clone())
                    }
                    Some(_) => {
                        map.remove(&key);
                        None
                    }
                    None => None,
                }
            }
        };

        match payload {
            Some(data) => match serde_json::from_str(&data) {
                Ok(result) => {
                    debug!("Cache HIT: {}", key);
                    Some(result)
                }
                Err(e) => {
                    warn!("Cache deserialization error: {}", e);
                    None
                }
            },
            None => {
                debug!("Cache MISS: {}", key);
                None
            }
        }
    }

    /// Store an owner's note list. Best effort; returns whether it stuck.
    pub async fn set<T: Serialize>(&self, owner_id: Uuid, value: &T) -> bool {
        let key = self.cache_key(owner_id);

        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                error!("Cache serialization error: {}", e);
                return false;
            }
        };

        match &self.inner.backend {
            Backend::Redis(conn) => {
                let mut guard = conn.write().await;
                let conn = match guard.as_mut() {
                    Some(c) => c,
                    None => return false,
                };
                match conn
                    .set_ex::<_, _, ()>(&key, serialized, self.inner.ttl.as_secs())
                    .await
                {
                    Ok(_) => {
                        debug!("Cache SET: {} (TTL: {}s)", key, self.inner.ttl.as_secs());
                        true
                    }
                    Err(e) => {
                        error!("Redis SET error: {}", e);
                        false
                    }
                }
            }
            Backend::Memory(map) => {
                map.lock().unwrap().insert(
                    key,
                    MemoryEntry {
                        payload: serialized,
                        expires_at: Instant::now() + self.inner.ttl,
                    },
                );
                true
            }
        }
    }

    /// Drop the owner's cache entry.
    ///
    /// Errors only when a connected backend fails the delete; a disabled or
    /// never-connected cache has nothing stale to serve, so that is `Ok`.
    pub async fn invalidate(&self, owner_id: Uuid) -> Result<()> {
        let key = self.cache_key(owner_id);

        match &self.inner.backend {
            Backend::Redis(conn) => {
                let mut guard = conn.write().await;
                let conn = match guard.as_mut() {
                    Some(c) => c,
                    None => return Ok(()),
                };
                match conn.del::<_, ()>(&key).await {
                    Ok(_) => {
                        debug!("Cache INVALIDATE: {}", key);
                        Ok(())
                    }
                    Err(e) => {
                        error!("Redis DEL error: {}", e);
                        Err(Error::Cache(format!("failed to invalidate {}: {}", key, e)))
                    }
                }
            }
            Backend::Memory(map) => {
                map.lock().unwrap().remove(&key);
                debug!("Cache INVALIDATE: {}", key);
                Ok(())
            }
        }
    }

    /// Get cache TTL setting.
    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }
}
