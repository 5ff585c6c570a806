//! Per-provider token buckets throttling outbound API calls.
//!
//! Buckets refill continuously. A caller short of tokens sleeps exactly as
//! long as the deficit takes to refill, then re-checks; there is no queue, so
//! the first caller to re-check after a refill wins.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::types::RateLimitSetting;

/// Token bucket rate limiter.
#[derive(Debug)]
pub struct TokenBucket {
    capacity: f64,
    /// Tokens added per second.
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A full bucket holding `capacity` tokens, refilling at `refill_per_sec`.
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        let capacity = capacity.max(1.0);
        Self {
            capacity,
            refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A bucket allowing `requests` calls per `window`.
    pub fn per_window(requests: u32, window: Duration) -> Self {
        let requests = f64::from(requests.max(1));
        let secs = window.as_secs_f64().max(0.001);
        Self::new(requests, requests / secs)
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            state.last_refill = now;
        }
    }

    /// Deduct `cost` tokens, or return how long until they will be available.
    fn take_or_wait(&self, cost: f64) -> Option<Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        if state.tokens >= cost {
            state.tokens -= cost;
            None
        } else {
            let deficit = cost - state.tokens;
            Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
        }
    }

    /// Wait until `cost` tokens are available, then take them.
    ///
    /// A cost above capacity is clamped to capacity.
    pub async fn acquire(&self, cost: f64) {
        let cost = cost.clamp(0.0, self.capacity);
        while let Some(wait) = self.take_or_wait(cost) {
            tokio::time::sleep(wait).await;
        }
    }

    /// Take `cost` tokens only if available right now.
    pub fn try_acquire(&self, cost: f64) -> bool {
        let cost = cost.clamp(0.0, self.capacity);
        self.take_or_wait(cost).is_none()
    }

    /// Tokens available right now.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state, Instant::now());
        state.tokens
    }
}

/// Published quotas, tuned a little under the documented limits.
const DEFAULT_LIMITS: &[(&str, u32, u64)] = &[
    ("harvest", 100, 15),
    ("hubspot", 100, 10),
    ("sheets", 60, 60),
];

/// Fallback for providers without a tuned quota: 10 requests per second.
const FALLBACK_LIMIT: (u32, u64) = (10, 1);

/// One shared bucket per provider.
#[derive(Debug, Default)]
pub struct RateLimiters {
    buckets: DashMap<String, Arc<TokenBucket>>,
    overrides: HashMap<String, RateLimitSetting>,
}

impl RateLimiters {
    pub fn new(overrides: HashMap<String, RateLimitSetting>) -> Self {
        Self {
            buckets: DashMap::new(),
            overrides,
        }
    }

    /// The bucket for `provider`, created on first use.
    pub fn for_provider(&self, provider: &str) -> Arc<TokenBucket> {
        self.buckets
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(self.build(provider)))
            .clone()
    }

    fn build(&self, provider: &str) -> TokenBucket {
        if let Some(setting) = self.overrides.get(provider) {
            return TokenBucket::per_window(
                setting.requests,
                Duration::from_secs_f64(setting.window_secs.max(0.001)),
            );
        }
        let (requests, window_secs) = DEFAULT_LIMITS
            .iter()
            .find(|(name, _, _)| *name == provider)
            .map(|(_, r, w)| (*r, *w))
            .unwrap_or(FALLBACK_LIMIT);
        TokenBucket::per_window(requests, Duration::from_secs(window_secs))
    }
}
