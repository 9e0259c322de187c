// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rate limit algorithms
//!
//! Two interchangeable per-key algorithms:
//!
//! | Algorithm | State | Denial `retry_after` |
//! |-----------|-------|----------------------|
//! | [`TokenBucket`] | fractional token count + last refill | time until `cost` tokens have refilled |
//! | [`SlidingWindow`] | ring of sub-bucket counters | time until enough of the oldest sub-buckets expire |
//!
//! Both take `now` explicitly so they stay deterministic; the keyed store in
//! `infrastructure::rate_limiter` supplies the clock and the per-key lock.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::deadline::deadline_after;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    #[default]
    SlidingWindow,
    TokenBucket,
}

impl std::str::FromStr for RateLimitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sliding_window" | "sliding-window" => Ok(Self::SlidingWindow),
            "token_bucket" | "token-bucket" => Ok(Self::TokenBucket),
            other => Err(format!(
                "unknown rate limit strategy '{}', expected sliding_window or token_bucket",
                other
            )),
        }
    }
}

/// Which request identity a limit applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitScope {
    Ip,
    User,
    ApiKey,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::User => "user",
            Self::ApiKey => "api_key",
        }
    }
}

impl fmt::Display for RateLimitScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Limits shared by every key of one scope.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitPolicy {
    pub strategy: RateLimitStrategy,
    /// Requests admitted per window.
    pub capacity: u32,
    pub window: Duration,
    /// Extra tokens on top of `capacity` (token bucket only).
    pub burst: u32,
    /// Number of sub-buckets the window is divided into (sliding window only).
    pub sub_buckets: u32,
}

impl RateLimitPolicy {
    /// Largest cost a single key can ever have admitted at once.
    pub fn max_admissible(&self) -> u32 {
        match self.strategy {
            RateLimitStrategy::TokenBucket => self.capacity.saturating_add(self.burst),
            RateLimitStrategy::SlidingWindow => self.capacity,
        }
    }

    fn refill_per_sec(&self) -> f64 {
        self.capacity as f64 / self.window.as_secs_f64().max(f64::EPSILON)
    }
}

/// Result of one admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Allowed {
        /// Cost still admissible right now for this key.
        remaining: u32,
    },
    Denied {
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

/// Observable state of one key, for metrics and debugging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenState {
    pub tokens_remaining: f64,
    pub window_start: Instant,
    pub window_size: Duration,
    pub capacity: u32,
    pub burst_allowance: u32,
}

/// Per-key limiter state for either algorithm.
#[derive(Debug, Clone)]
pub enum KeyLimiter {
    TokenBucket(TokenBucket),
    SlidingWindow(SlidingWindow),
}

impl KeyLimiter {
    pub fn new(policy: &RateLimitPolicy, now: Instant) -> Self {
        match policy.strategy {
            RateLimitStrategy::TokenBucket => Self::TokenBucket(TokenBucket::new(policy, now)),
            RateLimitStrategy::SlidingWindow => {
                Self::SlidingWindow(SlidingWindow::new(policy, now))
            }
        }
    }

    pub fn admit(&mut self, policy: &RateLimitPolicy, cost: u32, now: Instant) -> Decision {
        match self {
            Self::TokenBucket(bucket) => bucket.admit(policy, cost, now),
            Self::SlidingWindow(window) => window.admit(policy, cost, now),
        }
    }

    pub fn state(&self, policy: &RateLimitPolicy, now: Instant) -> TokenState {
        match self {
            Self::TokenBucket(bucket) => bucket.state(policy, now),
            Self::SlidingWindow(window) => window.state(policy, now),
        }
    }

    pub fn last_seen(&self) -> Instant {
        match self {
            Self::TokenBucket(bucket) => bucket.last_seen,
            Self::SlidingWindow(window) => window.last_seen,
        }
    }
}

// ===== Token bucket =====

/// Refills at `capacity / window` tokens per second up to `capacity + burst`.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
    created_at: Instant,
    last_seen: Instant,
}

impl TokenBucket {
    pub fn new(policy: &RateLimitPolicy, now: Instant) -> Self {
        Self {
            tokens: policy.max_admissible() as f64,
            last_refill: now,
            created_at: now,
            last_seen: now,
        }
    }

    fn refill(&mut self, policy: &RateLimitPolicy, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        let ceiling = policy.max_admissible() as f64;
        self.tokens = (self.tokens + elapsed * policy.refill_per_sec()).clamp(0.0, ceiling);
        self.last_refill = now;
    }

    pub fn admit(&mut self, policy: &RateLimitPolicy, cost: u32, now: Instant) -> Decision {
        self.refill(policy, now);
        self.last_seen = now;

        if cost > policy.max_admissible() {
            return Decision::Denied {
                retry_after: policy.window,
            };
        }

        let cost = cost as f64;
        if self.tokens >= cost {
            self.tokens -= cost;
            return Decision::Allowed {
                remaining: self.tokens.floor() as u32,
            };
        }

        let missing = cost - self.tokens;
        Decision::Denied {
            retry_after: Duration::from_secs_f64(missing / policy.refill_per_sec()),
        }
    }

    pub fn state(&self, policy: &RateLimitPolicy, now: Instant) -> TokenState {
        let mut projected = self.clone();
        projected.refill(policy, now);
        TokenState {
            tokens_remaining: projected.tokens,
            window_start: self.created_at,
            window_size: policy.window,
            capacity: policy.capacity,
            burst_allowance: policy.burst,
        }
    }
}

// ===== Sliding window counter =====

/// Window divided into `sub_buckets` slices; the admitted total is the sum of
/// the slices that still overlap the window, so capacity is reclaimed one
/// slice at a time instead of all at once.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    epoch: Instant,
    /// `(slice index since epoch, admitted cost)`, oldest first.
    slices: VecDeque<(u64, u32)>,
    last_seen: Instant,
}

impl SlidingWindow {
    pub fn new(_policy: &RateLimitPolicy, now: Instant) -> Self {
        Self {
            epoch: now,
            slices: VecDeque::new(),
            last_seen: now,
        }
    }

    fn slice_width(policy: &RateLimitPolicy) -> Duration {
        policy.window / policy.sub_buckets.max(1)
    }

    fn slice_index(&self, policy: &RateLimitPolicy, now: Instant) -> u64 {
        let width = Self::slice_width(policy).as_nanos().max(1);
        u64::try_from(now.saturating_duration_since(self.epoch).as_nanos() / width)
            .unwrap_or(u64::MAX)
    }

    /// Instant at which the slice with `index` starts counting.
    fn start_of(&self, policy: &RateLimitPolicy, index: u64) -> Instant {
        let offset = Self::slice_width(policy)
            .as_nanos()
            .saturating_mul(u128::from(index));
        deadline_after(
            self.epoch,
            Duration::from_nanos(u64::try_from(offset).unwrap_or(u64::MAX)),
        )
    }

    /// Instant at which the slice with `index` stops counting.
    fn expiry_of(&self, policy: &RateLimitPolicy, index: u64) -> Instant {
        let slices = u64::from(policy.sub_buckets.max(1));
        self.start_of(policy, index.saturating_add(slices))
    }

    fn expire(&mut self, policy: &RateLimitPolicy, now: Instant) {
        let current = self.slice_index(policy, now);
        let span = policy.sub_buckets.max(1) as u64;
        while let Some(&(index, _)) = self.slices.front() {
            if index.saturating_add(span) <= current {
                self.slices.pop_front();
            } else {
                break;
            }
        }
    }

    fn used(&self) -> u64 {
        self.slices.iter().map(|&(_, count)| count as u64).sum()
    }

    pub fn admit(&mut self, policy: &RateLimitPolicy, cost: u32, now: Instant) -> Decision {
        self.expire(policy, now);
        self.last_seen = now;

        if cost > policy.capacity {
            return Decision::Denied {
                retry_after: policy.window,
            };
        }

        let used = self.used();
        let capacity = policy.capacity as u64;
        if used + cost as u64 <= capacity {
            let current = self.slice_index(policy, now);
            match self.slices.back_mut() {
                Some((index, count)) if *index == current => *count += cost,
                _ => self.slices.push_back((current, cost)),
            }
            return Decision::Allowed {
                remaining: (capacity - used - cost as u64) as u32,
            };
        }

        // Walk the oldest slices until enough capacity would be freed.
        let mut still_used = used;
        for &(index, count) in &self.slices {
            still_used -= count as u64;
            if still_used + cost as u64 <= capacity {
                let expiry = self.expiry_of(policy, index);
                return Decision::Denied {
                    retry_after: expiry.saturating_duration_since(now),
                };
            }
        }

        Decision::Denied {
            retry_after: policy.window,
        }
    }

    pub fn state(&self, policy: &RateLimitPolicy, now: Instant) -> TokenState {
        let mut projected = self.clone();
        projected.expire(policy, now);
        let window_start = projected
            .slices
            .front()
            .map(|&(index, _)| self.start_of(policy, index))
            .unwrap_or(now);
        TokenState {
            tokens_remaining: (policy.capacity as f64 - projected.used() as f64).max(0.0),
            window_start,
            window_size: policy.window,
            capacity: policy.capacity,
            burst_allowance: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: RateLimitStrategy, capacity: u32, window_secs: u64, burst: u32) -> RateLimitPolicy {
        RateLimitPolicy {
            strategy,
            capacity,
            window: Duration::from_secs(window_secs),
            burst,
            sub_buckets: 10,
        }
    }

    #[test]
    fn test_window_start_survives_large_slice_index() {
        // 1ns slices, so five seconds is well past u32::MAX slices.
        let p = RateLimitPolicy {
            strategy: RateLimitStrategy::SlidingWindow,
            capacity: 3,
            window: Duration::from_nanos(10),
            burst: 0,
            sub_buckets: 10,
        };
        let t0 = Instant::now();
        let later = t0 + Duration::from_secs(5);
        let mut limiter = KeyLimiter::new(&p, t0);

        assert!(limiter.admit(&p, 1, later).is_allowed());
        let state = limiter.state(&p, later);
        assert_eq!(state.window_start, later);
        assert_eq!(state.tokens_remaining, 2.0);
    }

    #[test]
    fn test_sliding_window_sixth_request_is_denied() {
        let p = policy(RateLimitStrategy::SlidingWindow, 5, 30, 0);
        let t0 = Instant::now();
        let mut limiter = KeyLimiter::new(&p, t0);

        for i in 0..5 {
            let decision = limiter.admit(&p, 1, t0 + Duration::from_millis(i * 10));
            assert_eq!(decision, Decision::Allowed { remaining: 4 - i as u32 });
        }

        match limiter.admit(&p, 1, t0 + Duration::from_millis(100)) {
            Decision::Denied { retry_after } => {
                // All five landed in the first 3s slice, which expires at t0 + 30s.
                let expected = Duration::from_secs(30) - Duration::from_millis(100);
                assert_eq!(retry_after, expected);
            }
            other => panic!("expected denial, got {:?}", other),
        }
    }

    #[test]
    fn test_sliding_window_reclaims_gradually() {
        let p = policy(RateLimitStrategy::SlidingWindow, 3, 5, 0);
        let t0 = Instant::now();
        let mut limiter = KeyLimiter::new(&p, t0);

        for i in 0..3 {
            assert!(limiter.admit(&p, 1, t0 + Duration::from_secs(i)).is_allowed());
        }
        assert!(!limiter.admit(&p, 1, t0 + Duration::from_secs(3)).is_allowed());

        // The t0 slice expires at t0+5s; the others are still counted.
        assert_eq!(
            limiter.admit(&p, 1, t0 + Duration::from_secs(5)),
            Decision::Allowed { remaining: 0 }
        );
        assert!(!limiter.admit(&p, 1, t0 + Duration::from_millis(5500)).is_allowed());

        // After a full quiet window the key is back to full capacity.
        assert_eq!(
            limiter.admit(&p, 1, t0 + Duration::from_secs(20)),
            Decision::Allowed { remaining: 2 }
        );
    }

    #[test]
    fn test_sliding_window_never_exceeds_capacity_in_any_window() {
        let p = policy(RateLimitStrategy::SlidingWindow, 4, 2, 0);
        let t0 = Instant::now();
        let mut limiter = KeyLimiter::new(&p, t0);
        let mut admitted: Vec<Instant> = Vec::new();

        for step in 0..400u64 {
            let now = t0 + Duration::from_millis(step * 37);
            if limiter.admit(&p, 1, now).is_allowed() {
                admitted.push(now);
            }
        }

        // Counting is per sub-bucket, so the guarantee holds for any span that
        // fits inside the window minus one sub-bucket.
        let span = p.window - p.window / p.sub_buckets;
        for (i, start) in admitted.iter().enumerate() {
            let in_window = admitted[i..]
                .iter()
                .take_while(|t| t.duration_since(*start) < span)
                .count();
            assert!(in_window <= p.capacity as usize, "window starting at #{} admitted {}", i, in_window);
        }
    }

    #[test]
    fn test_token_bucket_burst_then_recovery() {
        let p = policy(RateLimitStrategy::TokenBucket, 5, 10, 2);
        let t0 = Instant::now();
        let mut limiter = KeyLimiter::new(&p, t0);

        for _ in 0..7 {
            assert!(limiter.admit(&p, 1, t0).is_allowed());
        }
        let retry_after = match limiter.admit(&p, 1, t0) {
            Decision::Denied { retry_after } => retry_after,
            other => panic!("expected denial, got {:?}", other),
        };
        // One token refills every 2s at 5 tokens / 10s.
        assert_eq!(retry_after, Duration::from_secs(2));

        assert!(limiter.admit(&p, 1, t0 + retry_after).is_allowed());
    }

    #[test]
    fn test_token_bucket_tokens_stay_within_bounds() {
        let p = policy(RateLimitStrategy::TokenBucket, 3, 1, 1);
        let t0 = Instant::now();
        let mut limiter = KeyLimiter::new(&p, t0);

        let state = limiter.state(&p, t0 + Duration::from_secs(3600));
        assert_eq!(state.tokens_remaining, 4.0);

        let mut admitted = 0;
        for _ in 0..10 {
            if limiter.admit(&p, 1, t0).is_allowed() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 4);
        assert!(limiter.state(&p, t0).tokens_remaining >= 0.0);
    }

    #[test]
    fn test_cost_above_capacity_is_always_denied() {
        let t0 = Instant::now();
        for strategy in [RateLimitStrategy::TokenBucket, RateLimitStrategy::SlidingWindow] {
            let p = policy(strategy, 2, 60, 0);
            let mut limiter = KeyLimiter::new(&p, t0);
            assert_eq!(
                limiter.admit(&p, 3, t0),
                Decision::Denied { retry_after: Duration::from_secs(60) }
            );
        }
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("token_bucket".parse::<RateLimitStrategy>().unwrap(), RateLimitStrategy::TokenBucket);
        assert_eq!("Sliding_Window".parse::<RateLimitStrategy>().unwrap(), RateLimitStrategy::SlidingWindow);
        assert!("leaky".parse::<RateLimitStrategy>().is_err());
    }
}
