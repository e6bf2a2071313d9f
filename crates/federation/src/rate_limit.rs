//! Per-host gating of proactive fetches.
//!
//! Protects remote hosts from being hit too often when this server pulls
//! supplementary data (like counts, reactions). Independent of the delivery
//! queue's own retry policy. Callers that are told to skip fall back to the
//! data they already have instead of waiting.
//!
//! State lives for the lifetime of the limiter and grows with the number of
//! distinct hosts contacted; entries are never evicted.

use fedigate_common::config::HostRateLimitConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Limiter settings.
#[derive(Debug, Clone)]
pub struct HostRateLimiterConfig {
    /// Minimum spacing between two requests to the same host.
    pub min_interval: Duration,
    /// Consecutive failures before cooldown kicks in.
    pub max_failures: u32,
    /// Cooldown applied at the first failure past the threshold, doubled per failure.
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl Default for HostRateLimiterConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(1_000),
            max_failures: 5,
            base_cooldown: Duration::from_millis(5_000),
            max_cooldown: Duration::from_millis(60_000),
        }
    }
}

impl From<&HostRateLimitConfig> for HostRateLimiterConfig {
    fn from(config: &HostRateLimitConfig) -> Self {
        Self {
            min_interval: Duration::from_millis(config.min_interval_ms),
            max_failures: config.max_failures,
            base_cooldown: Duration::from_millis(config.base_cooldown_ms),
            max_cooldown: Duration::from_millis(config.max_cooldown_ms),
        }
    }
}

#[derive(Debug, Clone)]
struct HostRateState {
    last_request_at: Instant,
    consecutive_failures: u32,
    cooldown_until: Option<Instant>,
}

/// Snapshot of one host's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRateStatus {
    pub consecutive_failures: u32,
    /// Time left in cooldown, if the host is cooling down.
    pub cooldown_remaining: Option<Duration>,
    pub since_last_request: Duration,
}

/// Per-host rate limiter. Clones share state.
#[derive(Clone)]
pub struct HostRateLimiter {
    config: HostRateLimiterConfig,
    states: Arc<RwLock<HashMap<String, HostRateState>>>,
}

impl HostRateLimiter {
    #[must_use]
    pub fn new(config: HostRateLimiterConfig) -> Self {
        Self {
            config,
            states: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Whether a fetch to `host` should be skipped right now.
    pub async fn should_skip(&self, host: &str) -> bool {
        let states = self.states.read().await;
        let Some(state) = states.get(host) else {
            return false;
        };
        let now = Instant::now();

        if state.cooldown_until.is_some_and(|until| now < until) {
            return true;
        }
        now.duration_since(state.last_request_at) < self.config.min_interval
    }

    /// Reset the failure streak and cooldown for `host`.
    pub async fn record_success(&self, host: &str) {
        let mut states = self.states.write().await;
        let now = Instant::now();
        let state = states.entry(host.to_string()).or_insert_with(|| HostRateState {
            last_request_at: now,
            consecutive_failures: 0,
            cooldown_until: None,
        });
        state.last_request_at = now;
        state.consecutive_failures = 0;
        state.cooldown_until = None;
    }

    /// Count a failure against `host`, entering cooldown past the threshold.
    pub async fn record_failure(&self, host: &str) {
        let mut states = self.states.write().await;
        let now = Instant::now();
        let state = states.entry(host.to_string()).or_insert_with(|| HostRateState {
            last_request_at: now,
            consecutive_failures: 0,
            cooldown_until: None,
        });
        state.last_request_at = now;
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);

        if state.consecutive_failures >= self.config.max_failures {
            let cooldown = self.cooldown_for(state.consecutive_failures);
            state.cooldown_until = Some(now + cooldown);
            tracing::warn!(
                host = %host,
                failures = state.consecutive_failures,
                cooldown_ms = u64::try_from(cooldown.as_millis()).unwrap_or(u64::MAX),
                "Host entered fetch cooldown"
            );
        }
    }

    /// `min(base * 2^(failures - 1), max)`
    fn cooldown_for(&self, failures: u32) -> Duration {
        let factor = 2u32.checked_pow(failures.saturating_sub(1)).unwrap_or(u32::MAX);
        self.config
            .base_cooldown
            .saturating_mul(factor)
            .min(self.config.max_cooldown)
    }

    pub async fn status(&self, host: &str) -> Option<HostRateStatus> {
        let states = self.states.read().await;
        let now = Instant::now();
        states.get(host).map(|state| HostRateStatus {
            consecutive_failures: state.consecutive_failures,
            cooldown_remaining: state
                .cooldown_until
                .filter(|until| now < *until)
                .map(|until| until - now),
            since_last_request: now.duration_since(state.last_request_at),
        })
    }

    /// Number of hosts with recorded state.
    pub async fn tracked_hosts(&self) -> usize {
        self.states.read().await.len()
    }
}

impl Default for HostRateLimiter {
    fn default() -> Self {
        Self::new(HostRateLimiterConfig::default())
    }
}
