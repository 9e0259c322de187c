// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Circuit Breaker
//!
//! Per-agent state machine that stops calling a failing agent for a cooldown
//! period.
//!
//! ```text
//!            failure_rate > threshold
//!            (samples >= minimum_volume)
//!   ┌────────┐ ───────────────────────▶ ┌──────┐
//!   │ Closed │                          │ Open │ ◀──┐
//!   └────────┘ ◀──┐                     └──────┘    │ any probe fails
//!                 │ all probes succeed     │        │
//!                 │                        │ open_duration elapsed
//!                 │                        ▼        │
//!                 └──────────────── ┌──────────┐ ───┘
//!                                   │ HalfOpen │
//!                                   └──────────┘
//! ```
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Pure transition logic. Time is passed in; the breaker
//!   registry in `infrastructure::breaker_registry` owns one instance per
//!   agent behind a mutex and publishes the returned [`Transition`]s.
//!
//! Every [`Permit`] carries the generation it was issued in. The generation
//! advances on each transition, and outcomes reported against an older
//! generation are discarded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }

    /// Gauge encoding used by `mesh_breaker_state`.
    pub fn gauge_value(&self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::HalfOpen => 1.0,
            Self::Open => 2.0,
        }
    }
}

impl fmt::Display for BreakerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the rolling window of outcomes is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    /// Last `window_size` outcomes.
    #[default]
    Count,
    /// Tumbling window of `window_size` seconds.
    Time,
}

impl std::str::FromStr for WindowKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "time" => Ok(Self::Time),
            other => Err(format!("unknown window kind '{}', expected count or time", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerPolicy {
    /// Percent in `(0, 100]`. The breaker opens when the failure rate is
    /// strictly greater.
    pub failure_rate_threshold: f64,
    pub window_kind: WindowKind,
    pub window_size: u32,
    pub minimum_volume: u32,
    pub open_duration: Duration,
    pub half_open_probes: u32,
}

/// Authorisation for one agent call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Permit {
    generation: u64,
    probe: bool,
}

impl Permit {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

/// Call refused without reaching the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerRejection {
    pub state: BreakerState,
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transition {
    pub from: BreakerState,
    pub to: BreakerState,
    pub generation: u64,
    pub reason: TransitionReason,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionReason {
    FailureRateExceeded { failure_rate: f64, samples: u32 },
    CooldownElapsed,
    ProbeFailed,
    ProbesSucceeded,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailureRateExceeded { .. } => "failure_rate_exceeded",
            Self::CooldownElapsed => "cooldown_elapsed",
            Self::ProbeFailed => "probe_failed",
            Self::ProbesSucceeded => "probes_succeeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,
    pub success_count: u32,
    pub failure_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde")]
    pub remaining_cooldown: Option<Duration>,
    pub generation: u64,
}

#[derive(Debug, Clone)]
enum RollingWindow {
    Count {
        outcomes: VecDeque<bool>,
        size: usize,
    },
    Time {
        success_count: u32,
        failure_count: u32,
        window_start: Instant,
        size: Duration,
    },
}

impl RollingWindow {
    fn new(policy: &BreakerPolicy, now: Instant) -> Self {
        match policy.window_kind {
            WindowKind::Count => Self::Count {
                outcomes: VecDeque::with_capacity(policy.window_size as usize),
                size: policy.window_size.max(1) as usize,
            },
            WindowKind::Time => Self::Time {
                success_count: 0,
                failure_count: 0,
                window_start: now,
                size: Duration::from_secs(policy.window_size.max(1) as u64),
            },
        }
    }

    fn roll(&mut self, now: Instant) {
        if let Self::Time {
            success_count,
            failure_count,
            window_start,
            size,
        } = self
        {
            if now.saturating_duration_since(*window_start) >= *size {
                *success_count = 0;
                *failure_count = 0;
                *window_start = now;
            }
        }
    }

    fn push(&mut self, success: bool, now: Instant) {
        self.roll(now);
        match self {
            Self::Count { outcomes, size } => {
                if outcomes.len() == *size {
                    outcomes.pop_front();
                }
                outcomes.push_back(success);
            }
            Self::Time {
                success_count,
                failure_count,
                ..
            } => {
                if success {
                    *success_count += 1;
                } else {
                    *failure_count += 1;
                }
            }
        }
    }

    /// `(successes, failures)`
    fn counts(&self) -> (u32, u32) {
        match self {
            Self::Count { outcomes, .. } => {
                let failures = outcomes.iter().filter(|ok| !**ok).count() as u32;
                (outcomes.len() as u32 - failures, failures)
            }
            Self::Time {
                success_count,
                failure_count,
                ..
            } => (*success_count, *failure_count),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    policy: BreakerPolicy,
    state: BreakerState,
    window: RollingWindow,
    generation: u64,
    opened_at: Option<Instant>,
    opened_at_wall: Option<DateTime<Utc>>,
    probes_issued: u32,
    probes_succeeded: u32,
}

impl CircuitBreaker {
    pub fn new(policy: BreakerPolicy, now: Instant) -> Self {
        Self {
            window: RollingWindow::new(&policy, now),
            policy,
            state: BreakerState::Closed,
            generation: 0,
            opened_at: None,
            opened_at_wall: None,
            probes_issued: 0,
            probes_succeeded: 0,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn policy(&self) -> &BreakerPolicy {
        &self.policy
    }

    /// Move Open to HalfOpen once the cooldown has elapsed.
    pub fn poll(&mut self, now: Instant) -> Option<Transition> {
        if self.state != BreakerState::Open {
            return None;
        }
        let opened_at = self.opened_at?;
        if now.saturating_duration_since(opened_at) < self.policy.open_duration {
            return None;
        }
        self.probes_issued = 0;
        self.probes_succeeded = 0;
        Some(self.transition(BreakerState::HalfOpen, TransitionReason::CooldownElapsed))
    }

    /// Ask to call the agent. Returns any transition the check caused.
    pub fn try_acquire(
        &mut self,
        now: Instant,
    ) -> (Result<Permit, BreakerRejection>, Option<Transition>) {
        let transition = self.poll(now);
        let result = match self.state {
            BreakerState::Closed => Ok(Permit {
                generation: self.generation,
                probe: false,
            }),
            BreakerState::Open => Err(BreakerRejection {
                state: BreakerState::Open,
                retry_after: self.remaining_cooldown(now).unwrap_or_default(),
            }),
            BreakerState::HalfOpen => {
                if self.probes_issued < self.policy.half_open_probes {
                    self.probes_issued += 1;
                    Ok(Permit {
                        generation: self.generation,
                        probe: true,
                    })
                } else {
                    Err(BreakerRejection {
                        state: BreakerState::HalfOpen,
                        retry_after: self.policy.open_duration,
                    })
                }
            }
        };
        (result, transition)
    }

    /// Re-check before a retry of the same logical call. A permit that is
    /// still current is reused.
    pub fn recheck(
        &mut self,
        permit: Permit,
        now: Instant,
    ) -> (Result<Permit, BreakerRejection>, Option<Transition>) {
        let transition = self.poll(now);
        if transition.is_none() && permit.generation == self.generation {
            return (Ok(permit), None);
        }
        let (result, later) = self.try_acquire(now);
        (result, transition.or(later))
    }

    /// Record the final outcome of a logical call.
    pub fn record(&mut self, permit: Permit, success: bool, now: Instant) -> Option<Transition> {
        if permit.generation != self.generation {
            return None;
        }

        match self.state {
            BreakerState::Closed => {
                self.window.push(success, now);
                let (successes, failures) = self.window.counts();
                let samples = successes + failures;
                if samples == 0 || samples < self.policy.minimum_volume {
                    return None;
                }
                let failure_rate = failures as f64 / samples as f64 * 100.0;
                if failure_rate > self.policy.failure_rate_threshold {
                    return Some(self.open(
                        TransitionReason::FailureRateExceeded {
                            failure_rate,
                            samples,
                        },
                        now,
                    ));
                }
                None
            }
            BreakerState::HalfOpen if permit.probe => {
                if !success {
                    return Some(self.open(TransitionReason::ProbeFailed, now));
                }
                self.probes_succeeded += 1;
                if self.probes_succeeded >= self.policy.half_open_probes {
                    self.window = RollingWindow::new(&self.policy, now);
                    self.opened_at = None;
                    self.opened_at_wall = None;
                    return Some(
                        self.transition(BreakerState::Closed, TransitionReason::ProbesSucceeded),
                    );
                }
                None
            }
            _ => None,
        }
    }

    /// Give back a permit that never reached the agent.
    pub fn abandon(&mut self, permit: Permit) {
        if permit.probe
            && permit.generation == self.generation
            && self.state == BreakerState::HalfOpen
        {
            self.probes_issued = self.probes_issued.saturating_sub(1);
        }
    }

    pub fn remaining_cooldown(&self, now: Instant) -> Option<Duration> {
        if self.state != BreakerState::Open {
            return None;
        }
        let opened_at = self.opened_at?;
        Some(
            self.policy
                .open_duration
                .saturating_sub(now.saturating_duration_since(opened_at)),
        )
    }

    pub fn snapshot(&self, now: Instant) -> BreakerSnapshot {
        let mut window = self.window.clone();
        window.roll(now);
        let (success_count, failure_count) = window.counts();
        BreakerSnapshot {
            state: self.state,
            success_count,
            failure_count,
            opened_at: self.opened_at_wall,
            remaining_cooldown: self.remaining_cooldown(now),
            generation: self.generation,
        }
    }

    fn open(&mut self, reason: TransitionReason, now: Instant) -> Transition {
        self.opened_at = Some(now);
        self.opened_at_wall = Some(Utc::now());
        self.transition(BreakerState::Open, reason)
    }

    fn transition(&mut self, to: BreakerState, reason: TransitionReason) -> Transition {
        let from = self.state;
        self.state = to;
        self.generation += 1;
        Transition {
            from,
            to,
            generation: self.generation,
            reason,
        }
    }
}
