use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::types::StoreKind;

/// Exponential backoff with jitter for one store kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts allowed, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub base_delay_ms: u64,
    /// Upper bound on any delay, before jitter.
    pub max_delay_ms: u64,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Relative jitter in `[0, 1]`; the delay is scaled by `1 ± jitter`.
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
        jitter: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            multiplier,
            jitter: jitter.clamp(0.0, 1.0),
        }
    }

    /// Doubling backoff with 10% jitter, capped at 30 seconds.
    pub fn exponential(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self::new(max_attempts, base_delay_ms, 30_000, 2.0, 0.1)
    }

    /// Constant delay without jitter.
    pub fn fixed(max_attempts: u32, interval_ms: u64) -> Self {
        Self::new(max_attempts, interval_ms, interval_ms, 1.0, 0.0)
    }

    /// True when a sub-task that made `attempts_made` attempts may try again.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Un-jittered delay after the `attempts_made`-th failed attempt.
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_wrap,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    pub fn base_delay_after(&self, attempts_made: u32) -> Duration {
        if attempts_made == 0 {
            return Duration::ZERO;
        }
        let exponent = attempts_made.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay_ms as f64 * self.multiplier.powi(exponent);
        let clamped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(clamped.round() as u64)
    }

    /// Jittered delay after the `attempts_made`-th failed attempt.
    pub fn delay_after<R: Rng + ?Sized>(&self, attempts_made: u32, rng: &mut R) -> Duration {
        let base = self.base_delay_after(attempts_made);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let factor = rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        base.mul_f64(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(5, 100)
    }
}

/// Retry policies keyed by store kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Per-kind overrides.
    pub policies: BTreeMap<StoreKind, RetryPolicy>,
    /// Policy for kinds without an override.
    pub fallback: RetryPolicy,
}

impl RetryConfig {
    /// Same policy for every store kind.
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            policies: BTreeMap::new(),
            fallback: policy,
        }
    }

    /// Replaces the policy of one kind.
    pub fn with_policy(mut self, kind: StoreKind, policy: RetryPolicy) -> Self {
        self.policies.insert(kind, policy);
        self
    }

    pub fn policy_for(&self, kind: StoreKind) -> &RetryPolicy {
        self.policies.get(&kind).unwrap_or(&self.fallback)
    }
}

impl Default for RetryConfig {
    /// Network-bound stores retry fast and often; stores with strict
    /// uniqueness constraints back off longer and give up sooner.
    fn default() -> Self {
        Self::uniform(RetryPolicy::default())
            .with_policy(StoreKind::Cache, RetryPolicy::exponential(8, 10))
            .with_policy(StoreKind::TimeSeries, RetryPolicy::exponential(6, 50))
            .with_policy(StoreKind::Document, RetryPolicy::exponential(5, 100))
            .with_policy(StoreKind::WideColumn, RetryPolicy::exponential(5, 100))
            .with_policy(StoreKind::SearchIndex, RetryPolicy::exponential(5, 100))
            .with_policy(StoreKind::Relational, RetryPolicy::exponential(4, 250))
    }
}
