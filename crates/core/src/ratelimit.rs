//! Fixed-window request throttling over a shared counter store.
//!
//! The store performs increment-and-read as one atomic operation, so two concurrent
//! requests at the boundary cannot both observe a count under the limit. When the store
//! errors the limiter allows the request: throttling outages must not become service outages.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use crate::errors::CoreError;

/// Named throttling policy. These are fixed instances, not per-call configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub endpoint: &'static str,
    pub max_requests: u32,
    pub window_minutes: u32,
}

impl RateLimitPolicy {
    /// Keyed by user id.
    pub const AGENT_CREATION: Self =
        Self { endpoint: "agent_creation", max_requests: 10, window_minutes: 60 };
    /// Keyed by agent secret hash, or by dialled number on the voice path.
    pub const WEBHOOK_INGEST: Self =
        Self { endpoint: "webhook_ingest", max_requests: 100, window_minutes: 1 };
    /// Keyed by user id.
    pub const API: Self = Self { endpoint: "api", max_requests: 100, window_minutes: 15 };
    /// Keyed by client IP, counted on failed authentication.
    pub const AUTH: Self = Self { endpoint: "auth", max_requests: 5, window_minutes: 15 };
}

/// Count observed by the store after its atomic increment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowCount {
    pub count: u32,
    pub window_started_at: DateTime<Utc>,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Starts a fresh window at `now` with count 1 when none exists or the stored one has
    /// elapsed, otherwise increments it. Must be a single atomic operation per key.
    async fn increment(
        &self,
        identifier: &str,
        endpoint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, CoreError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: u32,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitDecision {
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        self.reset_at.signed_duration_since(now).num_seconds().max(0)
    }

    pub fn into_error(self) -> CoreError {
        CoreError::Throttled { limit: self.limit, remaining: self.remaining, reset_at: self.reset_at }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>) -> Self {
        Self { store }
    }

    pub async fn check_policy(&self, policy: RateLimitPolicy, identifier: &str) -> RateLimitDecision {
        self.check(identifier, policy.endpoint, policy.max_requests, policy.window_minutes).await
    }

    pub async fn check(
        &self,
        identifier: &str,
        endpoint: &str,
        max_requests: u32,
        window_minutes: u32,
    ) -> RateLimitDecision {
        self.check_at(identifier, endpoint, max_requests, window_minutes, Utc::now()).await
    }

    pub async fn check_at(
        &self,
        identifier: &str,
        endpoint: &str,
        max_requests: u32,
        window_minutes: u32,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        let window = Duration::minutes(i64::from(window_minutes.max(1)));

        match self.store.increment(identifier, endpoint, window, now).await {
            Ok(observed) => RateLimitDecision {
                allowed: observed.count <= max_requests,
                count: observed.count,
                limit: max_requests,
                remaining: max_requests.saturating_sub(observed.count),
                reset_at: observed.window_started_at + window,
            },
            Err(error) => {
                warn!(
                    event_name = "ratelimit.store_unavailable",
                    endpoint,
                    error = %error,
                    "rate limit store failed, allowing request"
                );
                RateLimitDecision {
                    allowed: true,
                    count: 0,
                    limit: max_requests,
                    remaining: max_requests,
                    reset_at: now + window,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tokio::sync::Mutex;

    use super::{RateLimitPolicy, RateLimitStore, RateLimiter, WindowCount};
    use crate::errors::CoreError;

    #[derive(Default)]
    struct CountingStore {
        windows: Mutex<HashMap<(String, String), WindowCount>>,
    }

    #[async_trait]
    impl RateLimitStore for CountingStore {
        async fn increment(
            &self,
            identifier: &str,
            endpoint: &str,
            window: Duration,
            now: DateTime<Utc>,
        ) -> Result<WindowCount, CoreError> {
            let mut windows = self.windows.lock().await;
            let entry = windows
                .entry((identifier.to_string(), endpoint.to_string()))
                .or_insert(WindowCount { count: 0, window_started_at: now });
            if now >= entry.window_started_at + window {
                *entry = WindowCount { count: 0, window_started_at: now };
            }
            entry.count += 1;
            Ok(*entry)
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl RateLimitStore for BrokenStore {
        async fn increment(
            &self,
            _identifier: &str,
            _endpoint: &str,
            _window: Duration,
            _now: DateTime<Utc>,
        ) -> Result<WindowCount, CoreError> {
            Err(CoreError::transient_store("database is locked"))
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).single().expect("valid timestamp")
    }

    #[tokio::test]
    async fn fifth_request_is_the_last_one_allowed() {
        let limiter = RateLimiter::new(Arc::new(CountingStore::default()));
        let now = start();

        let mut remaining = Vec::new();
        for _ in 0..5 {
            let decision = limiter.check_at("10.0.0.1", "auth", 5, 15, now).await;
            assert!(decision.allowed);
            remaining.push(decision.remaining);
        }
        let sixth = limiter.check_at("10.0.0.1", "auth", 5, 15, now).await;

        assert_eq!(remaining, vec![4, 3, 2, 1, 0]);
        assert!(!sixth.allowed);
        assert_eq!(sixth.remaining, 0);
        assert_eq!(sixth.reset_at, now + Duration::minutes(15));
    }

    #[tokio::test]
    async fn elapsed_window_starts_a_new_count() {
        let limiter = RateLimiter::new(Arc::new(CountingStore::default()));
        let now = start();
        for _ in 0..6 {
            limiter.check_at("user-1", "api", 5, 15, now).await;
        }

        let later = limiter.check_at("user-1", "api", 5, 15, now + Duration::minutes(15)).await;

        assert!(later.allowed);
        assert_eq!(later.count, 1);
    }

    #[tokio::test]
    async fn identifiers_and_endpoints_are_counted_separately() {
        let limiter = RateLimiter::new(Arc::new(CountingStore::default()));
        let now = start();
        for _ in 0..5 {
            limiter.check_at("user-1", "agent_creation", 5, 60, now).await;
        }

        assert!(limiter.check_at("user-2", "agent_creation", 5, 60, now).await.allowed);
        assert!(limiter.check_at("user-1", "api", 5, 60, now).await.allowed);
        assert!(!limiter.check_at("user-1", "agent_creation", 5, 60, now).await.allowed);
    }

    #[tokio::test]
    async fn store_failure_fails_open() {
        let limiter = RateLimiter::new(Arc::new(BrokenStore));

        let decision = limiter.check_policy(RateLimitPolicy::AUTH, "10.0.0.1").await;

        assert!(decision.allowed);
        assert_eq!(decision.remaining, RateLimitPolicy::AUTH.max_requests);
    }

    #[test]
    fn named_policies_carry_fixed_limits() {
        assert_eq!(RateLimitPolicy::AGENT_CREATION.max_requests, 10);
        assert_eq!(RateLimitPolicy::AGENT_CREATION.window_minutes, 60);
        assert_eq!(RateLimitPolicy::WEBHOOK_INGEST.window_minutes, 1);
        assert_eq!(RateLimitPolicy::API.max_requests, 100);
        assert_eq!(RateLimitPolicy::AUTH.max_requests, 5);
    }
}
