//! Fixed-window request-rate limiter keyed by verified caller identity.
//!
//! One counter per identity, one window per period. The check is a single
//! atomic INCR followed by a compare against the threshold. The counter is
//! bumped even when the caller ends up limited, so a limited caller cannot
//! stall the window below the threshold and sneak through. The key's expiry
//! is set when the window opens (count 1) and is never extended, which makes
//! the window fixed rather than sliding.
//!
//! The limiter only ever sees identities that already passed authentication;
//! a caller-supplied label never reaches the counter.
//!
//! ## Configuration
//!
//! Environment variables:
//! - `RATE_LIMIT_ENABLED`: Set to "false" to admit everything (default: true)
//! - `RATE_LIMIT_REQUESTS`: requests per window (default: 60)
//! - `RATE_LIMIT_PERIOD_SECS`: window length in seconds (default: 60)
//! - `RATE_LIMIT_FAIL_OPEN`: admit requests when the counter store is
//!   unreachable (default: false, fail closed)
//! - `REDIS_URL`: Redis connection URL (default: redis://localhost:6379)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use notesync_core::{Error, Result};

/// Default requests allowed per window.
pub const DEFAULT_MAX_REQUESTS: u64 = 60;

/// Default window length in seconds.
pub const DEFAULT_PERIOD_SECS: u64 = 60;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// Under the threshold; `remaining` requests left in this window.
    Allowed { remaining: u64 },
    /// Over the threshold; retry after the window resets.
    Limited { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// Fixed-window counter limiter.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<RateLimiterInner>,
}

struct RateLimiterInner {
    backend: CounterBackend,
    max_requests: u64,
    period: Duration,
    /// Admit requests when the counter store is unreachable.
    fail_open: bool,
}

enum CounterBackend {
    /// Redis connection manager (None if unreachable at startup).
    Redis(RwLock<Option<ConnectionManager>>),
    /// In-process counters, used by tests and redis-less deployments.
    Memory(Mutex<HashMap<String, WindowCounter>>),
    /// Rate limiting switched off.
    Disabled,
}

struct WindowCounter {
    count: u64,
    window_ends_at: Instant,
}

impl RateLimiter {
    /// Create a limiter from environment configuration.
    pub async fn from_env() -> Self {
        let enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        if !enabled {
            info!("Rate limiting disabled via RATE_LIMIT_ENABLED=false");
            return Self::disabled();
        }

        let max_requests: u64 = std::env::var("RATE_LIMIT_REQUESTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_REQUESTS);
        let period_secs: u64 = std::env::var("RATE_LIMIT_PERIOD_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PERIOD_SECS);
        let fail_open = std::env::var("RATE_LIMIT_FAIL_OPEN")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());

        let connection = match redis::Client::open(redis_url.as_str()) {
            Ok(client) => match ConnectionManager::new(client).await {
                Ok(conn) => Some(conn),
                Err(e) => {
                    warn!("Failed to connect to Redis for rate limiting: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("Invalid Redis URL for rate limiting: {}", e);
                None
            }
        };

        info!(
            subsystem = "ratelimit",
            max_requests,
            period_secs,
            fail_open,
            connected = connection.is_some(),
            "Rate limiting enabled ({} requests per {} seconds)",
            max_requests,
            period_secs
        );

        Self {
            inner: Arc::new(RateLimiterInner {
                backend: CounterBackend::Redis(RwLock::new(connection)),
                max_requests,
                period: Duration::from_secs(period_secs),
                fail_open,
            }),
        }
    }

    /// Create a limiter that admits every request.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                backend: CounterBackend::Disabled,
                max_requests: DEFAULT_MAX_REQUESTS,
                period: Duration::from_secs(DEFAULT_PERIOD_SECS),
                fail_open: false,
            }),
        }
    }

    /// Create an in-process limiter with the given threshold and window.
    pub fn memory(max_requests: u64, period: Duration) -> Self {
        Self {
            inner: Arc::new(RateLimiterInner {
                backend: CounterBackend::Memory(Mutex::new(HashMap::new())),
                max_requests,
                period,
                fail_open: false,
            }),
        }
    }

    fn counter_key(&self, identity: Uuid) -> String {
        format!("ns:ratelimit:{}", identity)
    }

    /// Count this request against `identity`'s window and decide.
    ///
    /// `identity` must be the verified caller identity from authentication.
    /// Errors only when the counter store is unreachable and the limiter is
    /// configured to fail closed.
    pub async fn allow(&self, identity: Uuid) -> Result<RateDecision> {
        let max = self.inner.max_requests;
        let period_secs = self.inner.period.as_secs();

        let count = match &self.inner.backend {
            CounterBackend::Disabled => return Ok(RateDecision::Allowed { remaining: max }),
            CounterBackend::Redis(conn) => {
                let key = self.counter_key(identity);
                let mut guard = conn.write().await;
                let conn = match guard.as_mut() {
                    Some(c) => c,
                    None => return self.unavailable("no connection"),
                };

                let count: u64 = match conn.incr(&key, 1u64).await {
                    Ok(n) => n,
                    Err(e) => {
                        error!("Redis INCR error: {}", e);
                        return self.unavailable(&e.to_string());
                    }
                };
                // First increment opens the window; the expiry is never
                // touched again, so the window boundary stays fixed.
                if count == 1 {
                    if let Err(e) = conn.expire::<_, i64>(&key, period_secs as i64).await {
                        error!("Redis EXPIRE error: {}", e);
                        return self.unavailable(&e.to_string());
                    }
                }
                count
            }
            CounterBackend::Memory(map) => {
                let key = self.counter_key(identity);
                let now = Instant::now();
                let mut map = map.lock().unwrap();
                let counter = map
                    .entry(key)
                    .and_modify(|c| {
                        if c.window_ends_at <= now {
                            c.count = 0;
                            c.window_ends_at = now + self.inner.period;
                        }
                    })
                    .or_insert_with(|| WindowCounter {
                        count: 0,
                        window_ends_at: now + self.inner.period,
                    });
                counter.count += 1;
                counter.count
            }
        };

        if count > max {
            debug!(
                subsystem = "ratelimit",
                identity = %identity,
                window_count = count,
                "Rate limit exceeded"
            );
            Ok(RateDecision::Limited {
                retry_after_secs: period_secs,
            })
        } else {
            Ok(RateDecision::Allowed {
                remaining: max - count,
            })
        }
    }

    fn unavailable(&self, reason: &str) -> Result<RateDecision> {
        if self.inner.fail_open {
            warn!(
                subsystem = "ratelimit",
                "Counter store unavailable, failing open: {}", reason
            );
            Ok(RateDecision::Allowed {
                remaining: self.inner.max_requests,
            })
        } else {
            Err(Error::Cache(format!(
                "rate counter unavailable: {}",
                reason
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_threshold_allows_then_limits() {
        let limiter = RateLimiter::memory(60, Duration::from_secs(60));
        let identity = Uuid::new_v4();

        for i in 1..=60 {
            let decision = limiter.allow(identity).await.unwrap();
            assert!(decision.is_allowed(), "request {} should be allowed", i);
        }

        let decision = limiter.allow(identity).await.unwrap();
        assert_eq!(
            decision,
            RateDecision::Limited {
                retry_after_secs: 60
            }
        );
    }

    #[tokio::test]
    async fn test_remaining_counts_down() {
        let limiter = RateLimiter::memory(3, Duration::from_secs(60));
        let identity = Uuid::new_v4();

        assert_eq!(
            limiter.allow(identity).await.unwrap(),
            RateDecision::Allowed { remaining: 2 }
        );
        assert_eq!(
            limiter.allow(identity).await.unwrap(),
            RateDecision::Allowed { remaining: 1 }
        );
        assert_eq!(
            limiter.allow(identity).await.unwrap(),
            RateDecision::Allowed { remaining: 0 }
        );
        assert!(!limiter.allow(identity).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_window_reset_admits_again() {
        let limiter = RateLimiter::memory(2, Duration::from_millis(30));
        let identity = Uuid::new_v4();

        assert!(limiter.allow(identity).await.unwrap().is_allowed());
        assert!(limiter.allow(identity).await.unwrap().is_allowed());
        assert!(!limiter.allow(identity).await.unwrap().is_allowed());

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.allow(identity).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_identities_have_independent_windows() {
        let limiter = RateLimiter::memory(1, Duration::from_secs(60));
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        assert!(limiter.allow(alice).await.unwrap().is_allowed());
        assert!(!limiter.allow(alice).await.unwrap().is_allowed());
        // Alice being limited never frames or drains Bob's quota.
        assert!(limiter.allow(bob).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_limited_requests_still_count() {
        let limiter = RateLimiter::memory(1, Duration::from_millis(60));
        let identity = Uuid::new_v4();

        assert!(limiter.allow(identity).await.unwrap().is_allowed());
        // Hammering while limited keeps incrementing the same window
        // counter rather than resetting it below the threshold.
        for _ in 0..5 {
            assert!(!limiter.allow(identity).await.unwrap().is_allowed());
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(limiter.allow(identity).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_disabled_limiter_admits_everything() {
        let limiter = RateLimiter::disabled();
        let identity = Uuid::new_v4();

        for _ in 0..200 {
            assert!(limiter.allow(identity).await.unwrap().is_allowed());
        }
    }
}
