// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Metrics
//!
//! Series emitted through the `metrics` facade. Nothing here depends on a
//! recorder being installed; the binary installs the Prometheus one and the
//! `/metrics` route renders it through [`MetricsHandle`].

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

use crate::domain::agent::AgentName;
use crate::domain::bulkhead::BulkheadSnapshot;
use crate::domain::circuit_breaker::BreakerState;
use crate::domain::rate_limit::RateLimitScope;

pub const RATE_LIMIT_DECISIONS: &str = "mesh_rate_limit_decisions_total";
pub const RATE_LIMIT_TOKENS_REMAINING: &str = "mesh_rate_limit_tokens_remaining";
pub const BREAKER_STATE: &str = "mesh_breaker_state";
pub const BREAKER_TRANSITIONS: &str = "mesh_breaker_transitions_total";
pub const BULKHEAD_IN_FLIGHT: &str = "mesh_bulkhead_in_flight";
pub const BULKHEAD_QUEUED: &str = "mesh_bulkhead_queued";
pub const BULKHEAD_REJECTIONS: &str = "mesh_bulkhead_rejections_total";
pub const RETRIES: &str = "mesh_retries_total";
pub const DISPATCH: &str = "mesh_dispatch_total";
pub const DISPATCH_LATENCY: &str = "mesh_dispatch_latency_seconds";

/// Renders whatever recorder the process installed.
#[derive(Clone)]
pub struct MetricsHandle {
    handle: PrometheusHandle,
}

impl MetricsHandle {
    /// Install the global Prometheus recorder.
    pub fn install() -> anyhow::Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))?;
        Ok(Self { handle })
    }

    /// A recorder that is not installed globally; only series recorded
    /// through it explicitly show up. Used by tests and embedders.
    pub fn detached() -> Self {
        let recorder = PrometheusBuilder::new().build_recorder();
        Self {
            handle: recorder.handle(),
        }
    }

    pub fn render(&self) -> String {
        self.handle.render()
    }
}

pub fn record_rate_limit(scope: RateLimitScope, allowed: bool, remaining: Option<u32>) {
    let decision = if allowed { "allowed" } else { "denied" };
    counter!(RATE_LIMIT_DECISIONS, "scope" => scope.as_str(), "decision" => decision).increment(1);
    if let Some(remaining) = remaining {
        gauge!(RATE_LIMIT_TOKENS_REMAINING, "scope" => scope.as_str()).set(remaining as f64);
    }
}

pub fn record_breaker_state(agent: &AgentName, state: BreakerState) {
    gauge!(BREAKER_STATE, "agent" => agent.to_string()).set(state.gauge_value());
}

pub fn record_breaker_transition(agent: &AgentName, to: BreakerState) {
    counter!(BREAKER_TRANSITIONS, "agent" => agent.to_string(), "to" => to.as_str()).increment(1);
    record_breaker_state(agent, to);
}

pub fn record_bulkhead(agent: &AgentName, snapshot: &BulkheadSnapshot) {
    gauge!(BULKHEAD_IN_FLIGHT, "agent" => agent.to_string()).set(snapshot.in_flight as f64);
    gauge!(BULKHEAD_QUEUED, "agent" => agent.to_string()).set(snapshot.queued as f64);
}

pub fn record_bulkhead_rejection(agent: &AgentName, reason: &'static str) {
    counter!(BULKHEAD_REJECTIONS, "agent" => agent.to_string(), "reason" => reason).increment(1);
}

pub fn record_retry(agent: &AgentName) {
    counter!(RETRIES, "agent" => agent.to_string()).increment(1);
}

pub fn record_dispatch(agent: &AgentName, outcome: &'static str, latency: Duration) {
    counter!(DISPATCH, "agent" => agent.to_string(), "outcome" => outcome).increment(1);
    histogram!(DISPATCH_LATENCY, "agent" => agent.to_string()).record(latency.as_secs_f64());
}
