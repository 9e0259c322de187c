// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Health and readiness
//!
//! Liveness only says the process is serving. Readiness aggregates breaker
//! and bulkhead state across the enabled agents:
//!
//! | overall     | when                                             |
//! |-------------|--------------------------------------------------|
//! | `starting`  | inside `startup_grace_period`                    |
//! | `unhealthy` | no enabled agents, or every breaker open         |
//! | `degraded`  | any breaker open or half-open, or any pool full  |
//! | `healthy`   | otherwise                                        |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::domain::bulkhead::BulkheadSnapshot;
use crate::domain::circuit_breaker::{BreakerSnapshot, BreakerState};
use crate::infrastructure::agent_registry::AgentRegistry;
use crate::infrastructure::breaker_registry::BreakerRegistry;
use crate::infrastructure::bulkhead::BulkheadRegistry;

pub const SERVICE_NAME: &str = "mesh-gateway";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Starting,
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessReport {
    pub status: String,
    pub service: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub agents: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub breaker: BreakerState,
    pub in_flight: u32,
    pub queued: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessReport {
    pub status: HealthStatus,
    pub agents: Vec<ComponentHealth>,
    pub checked_at: DateTime<Utc>,
}

impl ReadinessReport {
    /// Whether `/ready` should answer 200.
    pub fn is_ready(&self) -> bool {
        matches!(self.status, HealthStatus::Healthy | HealthStatus::Degraded)
    }
}

/// One row of `GET /v1/agents`.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub name: String,
    pub url: String,
    pub enabled: bool,
    pub breaker: BreakerSnapshot,
    pub bulkhead: BulkheadSnapshot,
}

pub struct HealthService {
    registry: Arc<AgentRegistry>,
    breakers: Arc<BreakerRegistry>,
    bulkheads: Arc<BulkheadRegistry>,
    started: Instant,
    grace_period: Duration,
}

impl HealthService {
    pub fn new(
        registry: Arc<AgentRegistry>,
        breakers: Arc<BreakerRegistry>,
        bulkheads: Arc<BulkheadRegistry>,
        grace_period: Duration,
    ) -> Self {
        Self {
            registry,
            breakers,
            bulkheads,
            started: Instant::now(),
            grace_period,
        }
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn liveness(&self) -> LivenessReport {
        LivenessReport {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime().as_secs(),
            agents: self.registry.snapshot().len(),
        }
    }

    pub fn readiness(&self) -> ReadinessReport {
        let snapshot = self.registry.snapshot();
        let agents: Vec<ComponentHealth> = snapshot
            .agents()
            .filter(|agent| agent.enabled)
            .map(|agent| {
                let breaker = self.breakers.state(&agent.name);
                let pool = self.bulkheads.snapshot(&agent.name);
                ComponentHealth {
                    name: agent.name.to_string(),
                    status: component_status(breaker, &pool),
                    breaker,
                    in_flight: pool.in_flight,
                    queued: pool.queued,
                }
            })
            .collect();

        let status = if self.uptime() < self.grace_period {
            HealthStatus::Starting
        } else {
            overall_status(&agents)
        };

        ReadinessReport {
            status,
            agents,
            checked_at: Utc::now(),
        }
    }

    pub fn agents(&self) -> Vec<AgentStatus> {
        self.registry
            .snapshot()
            .agents()
            .map(|agent| AgentStatus {
                name: agent.name.to_string(),
                url: agent.url.clone(),
                enabled: agent.enabled,
                breaker: self.breakers.snapshot(&agent.name),
                bulkhead: self.bulkheads.snapshot(&agent.name),
            })
            .collect()
    }
}

fn component_status(breaker: BreakerState, pool: &BulkheadSnapshot) -> HealthStatus {
    match breaker {
        BreakerState::Open => HealthStatus::Unhealthy,
        BreakerState::HalfOpen => HealthStatus::Degraded,
        BreakerState::Closed if pool.is_saturated() => HealthStatus::Degraded,
        BreakerState::Closed => HealthStatus::Healthy,
    }
}

fn overall_status(agents: &[ComponentHealth]) -> HealthStatus {
    if agents.is_empty() || agents.iter().all(|a| a.breaker == BreakerState::Open) {
        HealthStatus::Unhealthy
    } else if agents.iter().all(|a| a.status == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}
