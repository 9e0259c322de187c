// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Circuit Breaker Registry
//!
//! One [`CircuitBreaker`] per agent, created lazily. Each breaker sits behind
//! its own mutex, which is the only place its state is mutated; transitions
//! are published to the audit sink and metrics while that lock is held so
//! `breaker_state_changed` events are emitted in transition order.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::agent::AgentName;
use crate::domain::circuit_breaker::{
    BreakerPolicy, BreakerRejection, BreakerSnapshot, BreakerState, CircuitBreaker, Permit,
    Transition, TransitionReason,
};
use crate::domain::envelope::RequestId;
use crate::domain::events::{AuditEvent, AuditEventType, AuditSink};
use crate::infrastructure::metrics;

pub struct BreakerRegistry {
    policy: BreakerPolicy,
    breakers: DashMap<AgentName, Arc<Mutex<CircuitBreaker>>>,
    audit: Arc<dyn AuditSink>,
}

impl BreakerRegistry {
    pub fn new(policy: BreakerPolicy, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            policy,
            breakers: DashMap::new(),
            audit,
        }
    }

    fn breaker(&self, agent: &AgentName) -> Arc<Mutex<CircuitBreaker>> {
        if let Some(existing) = self.breakers.get(agent) {
            return existing.value().clone();
        }
        self.breakers
            .entry(agent.clone())
            .or_insert_with(|| {
                metrics::record_breaker_state(agent, BreakerState::Closed);
                Arc::new(Mutex::new(CircuitBreaker::new(self.policy, Instant::now())))
            })
            .value()
            .clone()
    }

    /// Ask for permission to call `agent`.
    pub fn before_call(
        &self,
        agent: &AgentName,
        request_id: Option<&RequestId>,
    ) -> Result<Permit, BreakerRejection> {
        let breaker = self.breaker(agent);
        let mut guard = breaker.lock();
        let (result, transition) = guard.try_acquire(Instant::now());
        if let Some(transition) = transition {
            self.publish(agent, &transition, request_id);
        }
        if let Err(rejection) = &result {
            self.publish_rejection(agent, rejection, request_id);
        }
        result
    }

    /// Re-check before a retry. A still-current permit is returned as is.
    pub fn recheck(
        &self,
        agent: &AgentName,
        permit: Permit,
        request_id: Option<&RequestId>,
    ) -> Result<Permit, BreakerRejection> {
        let breaker = self.breaker(agent);
        let mut guard = breaker.lock();
        let (result, transition) = guard.recheck(permit, Instant::now());
        if let Some(transition) = transition {
            self.publish(agent, &transition, request_id);
        }
        if let Err(rejection) = &result {
            self.publish_rejection(agent, rejection, request_id);
        }
        result
    }

    /// Record the final outcome of one logical call.
    pub fn record_outcome(
        &self,
        agent: &AgentName,
        permit: Permit,
        success: bool,
        request_id: Option<&RequestId>,
    ) {
        let breaker = self.breaker(agent);
        let mut guard = breaker.lock();
        if permit.generation() != guard.generation() {
            tracing::debug!(
                agent = %agent,
                permit_generation = permit.generation(),
                current_generation = guard.generation(),
                "Discarding outcome from a previous breaker generation"
            );
            return;
        }
        if let Some(transition) = guard.record(permit, success, Instant::now()) {
            self.publish(agent, &transition, request_id);
        }
    }

    /// Return a permit that never reached the agent.
    pub fn abandon(&self, agent: &AgentName, permit: Permit) {
        self.breaker(agent).lock().abandon(permit);
    }

    pub fn snapshot(&self, agent: &AgentName) -> BreakerSnapshot {
        let breaker = self.breaker(agent);
        let mut guard = breaker.lock();
        let now = Instant::now();
        if let Some(transition) = guard.poll(now) {
            self.publish(agent, &transition, None);
        }
        guard.snapshot(now)
    }

    pub fn state(&self, agent: &AgentName) -> BreakerState {
        self.snapshot(agent).state
    }

    fn publish(&self, agent: &AgentName, transition: &Transition, request_id: Option<&RequestId>) {
        match (transition.to, transition.reason) {
            (BreakerState::Open, TransitionReason::FailureRateExceeded { failure_rate, samples }) => {
                warn!(
                    agent = %agent,
                    failure_rate = %format!("{:.1}%", failure_rate),
                    samples,
                    "Circuit opened"
                );
            }
            (BreakerState::Open, _) => {
                warn!(agent = %agent, reason = transition.reason.as_str(), "Circuit re-opened");
            }
            (to, reason) => {
                info!(agent = %agent, from = %transition.from, to = %to, reason = reason.as_str(), "Circuit state changed");
            }
        }

        metrics::record_breaker_transition(agent, transition.to);

        let mut event = AuditEvent::new(
            AuditEventType::BreakerStateChanged,
            format!("{}->{}", transition.from, transition.to),
        )
        .with_agent(agent);
        if let Some(id) = request_id {
            event = event.with_request_id(id);
        }
        self.audit.emit(event);
    }

    fn publish_rejection(
        &self,
        agent: &AgentName,
        rejection: &BreakerRejection,
        request_id: Option<&RequestId>,
    ) {
        let mut event =
            AuditEvent::new(AuditEventType::BreakerRejected, rejection.state.as_str()).with_agent(agent);
        if let Some(id) = request_id {
            event = event.with_request_id(id);
        }
        self.audit.emit(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::circuit_breaker::WindowKind;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<AuditEvent>>);

    impl AuditSink for RecordingSink {
        fn emit(&self, event: AuditEvent) {
            self.0.lock().push(event);
        }
    }

    fn policy() -> BreakerPolicy {
        BreakerPolicy {
            failure_rate_threshold: 50.0,
            window_kind: WindowKind::Count,
            window_size: 10,
            minimum_volume: 5,
            open_duration: Duration::from_secs(30),
            half_open_probes: 1,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_breakers_are_isolated_per_agent() {
        let registry = BreakerRegistry::new(policy(), Arc::new(RecordingSink::default()));
        let osteon = AgentName::new("osteon");
        let nucleus = AgentName::new("nucleus");

        for _ in 0..5 {
            let permit = registry.before_call(&osteon, None).unwrap();
            registry.record_outcome(&osteon, permit, false, None);
        }
        assert_eq!(registry.state(&osteon), BreakerState::Open);
        assert_eq!(registry.state(&nucleus), BreakerState::Closed);
        assert!(registry.before_call(&nucleus, None).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_are_audited_in_order() {
        let sink = Arc::new(RecordingSink::default());
        let registry = BreakerRegistry::new(policy(), sink.clone());
        let agent = AgentName::new("synapse");

        for _ in 0..5 {
            let permit = registry.before_call(&agent, None).unwrap();
            registry.record_outcome(&agent, permit, false, None);
        }
        assert!(registry.before_call(&agent, None).is_err());

        tokio::time::advance(Duration::from_secs(30)).await;
        let probe = registry.before_call(&agent, None).unwrap();
        registry.record_outcome(&agent, probe, true, None);
        assert_eq!(registry.state(&agent), BreakerState::Closed);

        let events = sink.0.lock();
        let transitions: Vec<&str> = events
            .iter()
            .filter(|e| e.event_type == AuditEventType::BreakerStateChanged)
            .map(|e| e.outcome.as_str())
            .collect();
        assert_eq!(
            transitions,
            vec!["closed->open", "open->half_open", "half_open->closed"]
        );
        assert_eq!(
            events
                .iter()
                .filter(|e| e.event_type == AuditEventType::BreakerRejected)
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_outcomes_open_exactly_once() {
        let sink = Arc::new(RecordingSink::default());
        let registry = Arc::new(BreakerRegistry::new(policy(), sink.clone()));
        let agent = AgentName::new("myocyte");

        let permits: Vec<Permit> = (0..10)
            .map(|_| registry.before_call(&agent, None).unwrap())
            .collect();
        let handles: Vec<_> = permits
            .into_iter()
            .map(|permit| {
                let registry = Arc::clone(&registry);
                let agent = agent.clone();
                tokio::spawn(async move { registry.record_outcome(&agent, permit, false, None) })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let opened = sink
            .0
            .lock()
            .iter()
            .filter(|e| e.outcome == "closed->open")
            .count();
        assert_eq!(opened, 1);
    }
}
