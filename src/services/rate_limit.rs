//! Sliding-window rate governor for provider calls.
//!
//! Community-observed provider limits:
//! - hard cap around 200 requests/hour per identity
//! - safe rate of 2 requests/minute
//! - an ~11-minute sliding window of roughly 20 requests
//!
//! The governor is a local admission-control policy, not a guarantee
//! against the provider's true limits.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use rand::Rng;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

/// Sliding window length (11 minutes).
pub const WINDOW_SECONDS: f64 = 11.0 * 60.0;
/// Ceiling within the sliding window.
pub const MAX_REQUESTS_PER_WINDOW: u64 = 20;
/// Hourly ceiling, kept under the provider's 200/h hard cap.
pub const MAX_REQUESTS_PER_HOUR: u64 = 180;
/// First backoff penalty after an upstream rejection (seconds).
pub const INITIAL_BACKOFF_SECONDS: f64 = 300.0;
/// Backoff penalty cap (seconds).
pub const MAX_BACKOFF_SECONDS: f64 = 3600.0;

#[derive(Debug, thiserror::Error)]
pub enum RateLimitError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Allowed,
    Denied { wait_seconds: f64 },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed)
    }
}

/// Active exponential-backoff state for an identifier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackoffState {
    /// Absolute unix deadline until which admissions are denied.
    pub until: f64,
    /// Penalty that produced the deadline; doubled on the next violation.
    pub penalty_seconds: f64,
}

/// Per-identifier timestamp storage behind the governor.
///
/// Implementations must provide atomic add/prune/count semantics so that
/// concurrent admission checks from multiple in-flight jobs cannot corrupt
/// the window counts.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn add_request(&self, key: &str, timestamp: f64) -> Result<(), RateLimitError>;
    async fn prune_before(&self, key: &str, cutoff: f64) -> Result<(), RateLimitError>;
    async fn count_range(&self, key: &str, from: f64, to: f64) -> Result<u64, RateLimitError>;
    async fn oldest_in_range(
        &self,
        key: &str,
        from: f64,
        to: f64,
    ) -> Result<Option<f64>, RateLimitError>;
    async fn backoff(&self, key: &str) -> Result<Option<BackoffState>, RateLimitError>;
    async fn set_backoff(&self, key: &str, state: BackoffState) -> Result<(), RateLimitError>;
}

/// Redis-backed store using a sorted set per identifier plus a SETEX'd
/// backoff document.
pub struct RedisRateStore {
    client: redis::Client,
}

impl RedisRateStore {
    pub fn new(redis_url: &str) -> Result<Self, RateLimitError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self { client })
    }

    fn request_key(key: &str) -> String {
        format!("rate_limit:{key}")
    }

    fn backoff_key(key: &str) -> String {
        format!("backoff:{key}")
    }
}

#[async_trait]
impl RateLimitStore for RedisRateStore {
    async fn add_request(&self, key: &str, timestamp: f64) -> Result<(), RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let key = Self::request_key(key);
        conn.zadd::<_, _, _, ()>(&key, timestamp.to_string(), timestamp)
            .await?;
        conn.expire::<_, ()>(&key, 3600).await?;
        Ok(())
    }

    async fn prune_before(&self, key: &str, cutoff: f64) -> Result<(), RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        conn.zrembyscore::<_, _, _, ()>(Self::request_key(key), 0.0, cutoff)
            .await?;
        Ok(())
    }

    async fn count_range(&self, key: &str, from: f64, to: f64) -> Result<u64, RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: u64 = conn.zcount(Self::request_key(key), from, to).await?;
        Ok(count)
    }

    async fn oldest_in_range(
        &self,
        key: &str,
        from: f64,
        to: f64,
    ) -> Result<Option<f64>, RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let entries: Vec<(String, f64)> = redis::cmd("ZRANGEBYSCORE")
            .arg(Self::request_key(key))
            .arg(from)
            .arg(to)
            .arg("WITHSCORES")
            .arg("LIMIT")
            .arg(0)
            .arg(1)
            .query_async(&mut conn)
            .await?;
        Ok(entries.first().map(|(_, score)| *score))
    }

    async fn backoff(&self, key: &str) -> Result<Option<BackoffState>, RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.get(Self::backoff_key(key)).await?;
        match raw {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn set_backoff(&self, key: &str, state: BackoffState) -> Result<(), RateLimitError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(&state)?;
        conn.set_ex::<_, _, ()>(
            Self::backoff_key(key),
            payload,
            state.penalty_seconds.ceil() as u64,
        )
        .await?;
        Ok(())
    }
}

/// Admission-control policy over a [`RateLimitStore`].
///
/// Constructed once at process start and shared by reference; there is no
/// hidden global instance.
pub struct RateGovernor {
    store: Arc<dyn RateLimitStore>,
    requests_per_minute: u64,
    base_delay_seconds: u64,
    jitter_min_seconds: u64,
    jitter_max_seconds: u64,
}

impl RateGovernor {
    pub fn new(
        store: Arc<dyn RateLimitStore>,
        requests_per_minute: u64,
        base_delay_seconds: u64,
        jitter_min_seconds: u64,
        jitter_max_seconds: u64,
    ) -> Self {
        Self {
            store,
            requests_per_minute,
            base_delay_seconds,
            jitter_min_seconds,
            jitter_max_seconds,
        }
    }

    fn now() -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }

    /// Check whether a provider call may be made for `identifier` right now.
    ///
    /// Denials carry the wait until the oldest request in the violated
    /// sub-window ages out, floored at one second.
    pub async fn admit(&self, identifier: &str) -> Result<Admission, RateLimitError> {
        let now = Self::now();

        if let Some(backoff) = self.store.backoff(identifier).await? {
            if now < backoff.until {
                return Ok(Admission::Denied {
                    wait_seconds: backoff.until - now,
                });
            }
        }

        let window_start = now - WINDOW_SECONDS;
        let hour_start = now - 3600.0;
        let minute_start = now - 60.0;

        self.store.prune_before(identifier, window_start).await?;

        let window_count = self.store.count_range(identifier, window_start, now).await?;
        if window_count >= MAX_REQUESTS_PER_WINDOW {
            return self
                .denial_for(identifier, window_start, now, WINDOW_SECONDS)
                .await;
        }

        let hour_count = self.store.count_range(identifier, hour_start, now).await?;
        if hour_count >= MAX_REQUESTS_PER_HOUR {
            return self.denial_for(identifier, hour_start, now, 3600.0).await;
        }

        let minute_count = self.store.count_range(identifier, minute_start, now).await?;
        if minute_count >= self.requests_per_minute {
            return self.denial_for(identifier, minute_start, now, 60.0).await;
        }

        Ok(Admission::Allowed)
    }

    async fn denial_for(
        &self,
        identifier: &str,
        sub_window_start: f64,
        now: f64,
        sub_window_seconds: f64,
    ) -> Result<Admission, RateLimitError> {
        let wait_seconds = match self
            .store
            .oldest_in_range(identifier, sub_window_start, now)
            .await?
        {
            Some(oldest) => (oldest + sub_window_seconds - now).max(1.0),
            None => 60.0,
        };
        Ok(Admission::Denied { wait_seconds })
    }

    /// Record an admitted request.
    pub async fn record(&self, identifier: &str) -> Result<(), RateLimitError> {
        self.store.add_request(identifier, Self::now()).await
    }

    /// Record an upstream rejection (429 or equivalent).
    ///
    /// Doubles the previous penalty up to [`MAX_BACKOFF_SECONDS`], stores
    /// the absolute deadline, and returns the penalty applied.
    pub async fn record_violation(&self, identifier: &str) -> Result<f64, RateLimitError> {
        let now = Self::now();
        let penalty = match self.store.backoff(identifier).await? {
            Some(prior) => (prior.penalty_seconds * 2.0).min(MAX_BACKOFF_SECONDS),
            None => INITIAL_BACKOFF_SECONDS,
        };

        self.store
            .set_backoff(
                identifier,
                BackoffState {
                    until: now + penalty,
                    penalty_seconds: penalty,
                },
            )
            .await?;

        Ok(penalty)
    }

    /// Delay to apply between sequential provider calls within one job:
    /// a fixed base plus uniform jitter, independent of admission state.
    pub fn delay_with_jitter(&self) -> Duration {
        let jitter =
            rand::thread_rng().gen_range(self.jitter_min_seconds as f64..=self.jitter_max_seconds as f64);
        Duration::from_secs_f64(self.base_delay_seconds as f64 + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory store mirroring the Redis sorted-set semantics.
    #[derive(Default)]
    struct MemoryRateStore {
        requests: Mutex<HashMap<String, Vec<f64>>>,
        backoffs: Mutex<HashMap<String, BackoffState>>,
    }

    #[async_trait]
    impl RateLimitStore for MemoryRateStore {
        async fn add_request(&self, key: &str, timestamp: f64) -> Result<(), RateLimitError> {
            let mut map = self.requests.lock().unwrap();
            let entries = map.entry(key.to_string()).or_default();
            entries.push(timestamp);
            entries.sort_by(|a, b| a.partial_cmp(b).unwrap());
            Ok(())
        }

        async fn prune_before(&self, key: &str, cutoff: f64) -> Result<(), RateLimitError> {
            if let Some(entries) = self.requests.lock().unwrap().get_mut(key) {
                entries.retain(|ts| *ts > cutoff);
            }
            Ok(())
        }

        async fn count_range(&self, key: &str, from: f64, to: f64) -> Result<u64, RateLimitError> {
            Ok(self
                .requests
                .lock()
                .unwrap()
                .get(key)
                .map(|entries| entries.iter().filter(|ts| **ts >= from && **ts <= to).count() as u64)
                .unwrap_or(0))
        }

        async fn oldest_in_range(
            &self,
            key: &str,
            from: f64,
            to: f64,
        ) -> Result<Option<f64>, RateLimitError> {
            Ok(self
                .requests
                .lock()
                .unwrap()
                .get(key)
                .and_then(|entries| entries.iter().find(|ts| **ts >= from && **ts <= to).copied()))
        }

        async fn backoff(&self, key: &str) -> Result<Option<BackoffState>, RateLimitError> {
            Ok(self.backoffs.lock().unwrap().get(key).copied())
        }

        async fn set_backoff(&self, key: &str, state: BackoffState) -> Result<(), RateLimitError> {
            self.backoffs.lock().unwrap().insert(key.to_string(), state);
            Ok(())
        }
    }

    fn governor() -> RateGovernor {
        RateGovernor::new(Arc::new(MemoryRateStore::default()), 2, 30, 5, 15)
    }

    #[tokio::test]
    async fn test_allows_under_all_ceilings() {
        let governor = governor();
        assert!(governor.admit("acme").await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn test_per_minute_ceiling_denies_third_call() {
        let governor = governor();

        for _ in 0..2 {
            assert!(governor.admit("acme").await.unwrap().is_allowed());
            governor.record("acme").await.unwrap();
        }

        match governor.admit("acme").await.unwrap() {
            Admission::Denied { wait_seconds } => {
                assert!(wait_seconds > 0.0);
                assert!(wait_seconds <= 60.0);
            }
            Admission::Allowed => panic!("third admission within a minute must be denied"),
        }
    }

    #[tokio::test]
    async fn test_window_ceiling_never_exceeded() {
        let store = Arc::new(MemoryRateStore::default());
        let governor = RateGovernor::new(store.clone(), u64::MAX, 30, 5, 15);

        let mut admitted = 0u64;
        for _ in 0..40 {
            if governor.admit("acme").await.unwrap().is_allowed() {
                governor.record("acme").await.unwrap();
                admitted += 1;
            }
        }

        assert_eq!(admitted, MAX_REQUESTS_PER_WINDOW);
        let in_window = store
            .count_range("acme", RateGovernor::now() - WINDOW_SECONDS, RateGovernor::now())
            .await
            .unwrap();
        assert!(in_window <= MAX_REQUESTS_PER_WINDOW);
    }

    #[tokio::test]
    async fn test_window_denial_wait_from_oldest() {
        let store = Arc::new(MemoryRateStore::default());
        let governor = RateGovernor::new(store.clone(), u64::MAX, 30, 5, 15);

        let now = RateGovernor::now();
        // Fill the window with requests five minutes old.
        for i in 0..MAX_REQUESTS_PER_WINDOW {
            store.add_request("acme", now - 300.0 + i as f64).await.unwrap();
        }

        match governor.admit("acme").await.unwrap() {
            Admission::Denied { wait_seconds } => {
                // Oldest entry ages out of the 11-minute window in ~6 minutes.
                assert!(wait_seconds > 350.0 && wait_seconds <= WINDOW_SECONDS);
            }
            Admission::Allowed => panic!("full window must deny"),
        }
    }

    #[tokio::test]
    async fn test_violation_starts_at_floor_then_doubles() {
        let governor = governor();

        assert_eq!(governor.record_violation("acme").await.unwrap(), 300.0);
        assert_eq!(governor.record_violation("acme").await.unwrap(), 600.0);
        assert_eq!(governor.record_violation("acme").await.unwrap(), 1200.0);
    }

    #[tokio::test]
    async fn test_violation_penalty_caps_at_one_hour() {
        let governor = governor();

        let mut penalty = 0.0;
        for _ in 0..10 {
            penalty = governor.record_violation("acme").await.unwrap();
        }
        assert_eq!(penalty, MAX_BACKOFF_SECONDS);
    }

    #[tokio::test]
    async fn test_violation_deadline_monotonic() {
        let store = Arc::new(MemoryRateStore::default());
        let governor = RateGovernor::new(store.clone(), 2, 30, 5, 15);

        governor.record_violation("acme").await.unwrap();
        let first = store.backoff("acme").await.unwrap().unwrap().until;
        governor.record_violation("acme").await.unwrap();
        let second = store.backoff("acme").await.unwrap().unwrap().until;

        assert!(second >= first);
    }

    #[tokio::test]
    async fn test_backoff_denies_admission() {
        let governor = governor();

        governor.record_violation("acme").await.unwrap();
        match governor.admit("acme").await.unwrap() {
            Admission::Denied { wait_seconds } => {
                assert!(wait_seconds > 0.0 && wait_seconds <= 300.0);
            }
            Admission::Allowed => panic!("admission during backoff must be denied"),
        }
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let governor = governor();

        governor.record_violation("acme").await.unwrap();
        assert!(governor.admit("other").await.unwrap().is_allowed());
    }

    #[test]
    fn test_jitter_delay_within_bounds() {
        let governor = governor();

        for _ in 0..100 {
            let delay = governor.delay_with_jitter().as_secs_f64();
            assert!(delay >= 35.0);
            assert!(delay <= 45.0);
        }
    }
}
