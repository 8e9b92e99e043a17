use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use tracing::{debug, warn};

use dialgate_core::errors::CoreError;
use dialgate_core::ratelimit::{RateLimitStore, WindowCount};

use super::rows::{from_millis, parse_u32};
use super::RepositoryError;
use crate::DbPool;

/// Expired windows are swept once per this many increments.
pub const PRUNE_EVERY: u64 = 256;

/// Counter store backing the rate limiter. Reset-or-increment is one upsert so concurrent
/// requests on the same key serialize on the row.
pub struct SqlRateLimitStore {
    pool: DbPool,
    increments: AtomicU64,
}

impl SqlRateLimitStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool, increments: AtomicU64::new(0) }
    }

    /// Deletes counters whose window has elapsed; an elapsed row would be reset on its next
    /// increment anyway, so dropping it changes no decision.
    pub async fn prune_expired(&self, now: DateTime<Utc>) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM rate_limit_counter WHERE reset_at_ms <= ?")
            .bind(now.timestamp_millis())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn maybe_prune(&self, now: DateTime<Utc>) {
        let seen = self.increments.fetch_add(1, Ordering::Relaxed) + 1;
        if seen % PRUNE_EVERY != 0 {
            return;
        }
        match self.prune_expired(now).await {
            Ok(removed) => {
                debug!(event_name = "ratelimit.pruned", removed, "expired rate limit windows removed");
            }
            Err(error) => warn!(
                event_name = "ratelimit.prune_failed",
                error = %error,
                "expired rate limit windows could not be removed"
            ),
        }
    }

    async fn increment_row(
        &self,
        identifier: &str,
        endpoint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, RepositoryError> {
        let now_ms = now.timestamp_millis();
        let row = sqlx::query(
            "INSERT INTO rate_limit_counter (identifier, endpoint, count, window_started_at_ms, reset_at_ms)
             VALUES (?1, ?2, 1, ?3, ?3 + ?4)
             ON CONFLICT(identifier, endpoint) DO UPDATE SET
                count = CASE
                    WHEN rate_limit_counter.reset_at_ms <= excluded.window_started_at_ms THEN 1
                    ELSE rate_limit_counter.count + 1
                END,
                window_started_at_ms = CASE
                    WHEN rate_limit_counter.reset_at_ms <= excluded.window_started_at_ms
                    THEN excluded.window_started_at_ms
                    ELSE rate_limit_counter.window_started_at_ms
                END,
                reset_at_ms = CASE
                    WHEN rate_limit_counter.reset_at_ms <= excluded.window_started_at_ms
                    THEN excluded.reset_at_ms
                    ELSE rate_limit_counter.reset_at_ms
                END
             RETURNING count, window_started_at_ms",
        )
        .bind(identifier)
        .bind(endpoint)
        .bind(now_ms)
        .bind(window.num_milliseconds())
        .fetch_one(&self.pool)
        .await?;

        Ok(WindowCount {
            count: parse_u32("count", row.try_get("count")?)?,
            window_started_at: from_millis(
                "window_started_at_ms",
                row.try_get("window_started_at_ms")?,
            )?,
        })
    }
}

#[async_trait::async_trait]
impl RateLimitStore for SqlRateLimitStore {
    async fn increment(
        &self,
        identifier: &str,
        endpoint: &str,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<WindowCount, CoreError> {
        let observed = self.increment_row(identifier, endpoint, window, now).await?;
        self.maybe_prune(now).await;
        Ok(observed)
    }
}
