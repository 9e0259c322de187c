// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Retry Executor
//!
//! Runs one logical call against an agent: breaker check, bulkhead slot,
//! agent call, classification, backoff, repeat.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Apply [`RetryPolicy`] on top of the breaker and bulkhead
//!
//! Each attempt takes a fresh bulkhead slot and gives it back before backing
//! off. The breaker is consulted before every attempt but hears about the
//! logical call exactly once, when it ends. A failed half-open probe ends the
//! call on the spot so the breaker reopens without further agent calls. An
//! attempt that never produced an answer from the agent (bulkhead rejection,
//! caller deadline) is not evidence about the agent; it only turns into a
//! failure when an earlier attempt already failed.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::agent::{AgentCallError, AgentDescriptor, AgentName, AgentTransport};
use crate::domain::bulkhead::BulkheadRejection;
use crate::domain::circuit_breaker::Permit;
use crate::domain::deadline::deadline_after;
use crate::domain::envelope::{AgentReply, Envelope, Reply, RequestId};
use crate::domain::error::GatewayError;
use crate::domain::events::{AttemptOutcome, AuditEvent, AuditEventType, AuditSink, DispatchAttempt};
use crate::domain::retry::RetryPolicy;
use crate::infrastructure::breaker_registry::BreakerRegistry;
use crate::infrastructure::bulkhead::BulkheadRegistry;
use crate::infrastructure::metrics;

/// A successful logical call.
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    pub reply: Reply,
    pub attempts: u32,
}

pub struct RetryExecutor {
    policy: RetryPolicy,
    agent_timeout: Duration,
    breakers: Arc<BreakerRegistry>,
    bulkheads: Arc<BulkheadRegistry>,
    transport: Arc<dyn AgentTransport>,
    audit: Arc<dyn AuditSink>,
}

impl RetryExecutor {
    pub fn new(
        policy: RetryPolicy,
        agent_timeout: Duration,
        breakers: Arc<BreakerRegistry>,
        bulkheads: Arc<BulkheadRegistry>,
        transport: Arc<dyn AgentTransport>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            policy,
            agent_timeout,
            breakers,
            bulkheads,
            transport,
            audit,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn execute(
        &self,
        agent: &AgentDescriptor,
        envelope: &Envelope,
        deadline: Instant,
    ) -> Result<Dispatched, GatewayError> {
        let name = &agent.name;
        let request_id = envelope.request_id();
        let attempt_timeout = agent.timeout.unwrap_or(self.agent_timeout);

        let mut outcome = PendingOutcome::new(&self.breakers, name, request_id);
        let mut last_error: Option<AgentCallError> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let checked = match outcome.take() {
                None => self.breakers.before_call(name, Some(request_id)),
                Some(previous) => self.breakers.recheck(name, previous, Some(request_id)),
            };
            let permit = match checked {
                Ok(permit) => permit,
                Err(rejection) => {
                    // Only a stale permit can be refused on recheck; there is
                    // nothing left to record against.
                    debug!(agent = %name, attempt, state = %rejection.state, "Breaker refused attempt");
                    return Err(GatewayError::CircuitOpen {
                        agent: name.clone(),
                        retry_after: rejection.retry_after,
                    });
                }
            };
            outcome.hold(permit);

            let slot = match self.bulkheads.acquire(name, Some(deadline)).await {
                Ok(slot) => slot,
                Err(rejection) => {
                    self.audit.emit(
                        AuditEvent::new(AuditEventType::BulkheadRejected, rejection.reason())
                            .with_agent(name)
                            .with_request_id(request_id),
                    );
                    outcome.inconclusive(last_error.is_some());
                    return Err(match rejection {
                        BulkheadRejection::DeadlineExceeded => GatewayError::DeadlineExceeded {
                            attempts: attempt - 1,
                        },
                        rejection => GatewayError::BulkheadSaturated {
                            agent: name.clone(),
                            rejection,
                        },
                    });
                }
            };

            if attempt > 1 {
                metrics::record_retry(name);
            }

            let started_at = Utc::now();
            let started = Instant::now();
            let agent_limit = deadline_after(started, attempt_timeout);
            let cut_by_deadline = deadline <= agent_limit;
            let called = tokio::time::timeout_at(
                agent_limit.min(deadline),
                self.transport.call(agent, envelope, attempt),
            )
            .await;
            let latency = started.elapsed();
            self.bulkheads.release(name, slot);

            let result = match called {
                Ok(result) => result,
                Err(_elapsed) if cut_by_deadline => {
                    self.record_attempt(name, request_id, attempt, started_at, AttemptOutcome::Timeout, latency);
                    warn!(agent = %name, request_id = %request_id, attempt, "Caller deadline passed during agent call");
                    outcome.inconclusive(last_error.is_some());
                    return Err(GatewayError::DeadlineExceeded { attempts: attempt });
                }
                Err(_elapsed) => Err(AgentCallError::Timeout(attempt_timeout)),
            };

            self.record_attempt(name, request_id, attempt, started_at, attempt_outcome(&result), latency);

            let error = match result {
                Ok(reply) => {
                    outcome.record(true);
                    if attempt > 1 {
                        info!(agent = %name, request_id = %request_id, attempts = attempt, "Agent call succeeded after retry");
                    }
                    return Ok(Dispatched {
                        reply: Reply::from_agent(request_id.clone(), name.clone(), reply),
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                outcome.record(!error.is_health_failure());
                return Err(GatewayError::AgentFailed {
                    agent: name.clone(),
                    attempts: attempt,
                    error,
                });
            }

            if outcome.is_probe() {
                warn!(agent = %name, request_id = %request_id, attempts = attempt, error = %error, "Half-open probe failed");
                outcome.record(false);
                return Err(GatewayError::RetryExhausted {
                    agent: name.clone(),
                    attempts: attempt,
                    last: error,
                });
            }

            if !self.policy.has_attempts_left(attempt) {
                warn!(agent = %name, request_id = %request_id, attempts = attempt, error = %error, "Retries exhausted");
                outcome.record(false);
                return Err(GatewayError::RetryExhausted {
                    agent: name.clone(),
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.policy.backoff(attempt);
            if deadline_after(Instant::now(), delay) >= deadline {
                warn!(agent = %name, request_id = %request_id, attempts = attempt, "Caller deadline leaves no room for another attempt");
                outcome.record(false);
                return Err(GatewayError::DeadlineExceeded { attempts: attempt });
            }

            debug!(
                agent = %name,
                request_id = %request_id,
                attempt,
                kind = error.kind(),
                delay_ms = delay.as_millis() as u64,
                "Retrying agent call"
            );
            last_error = Some(error);
            tokio::time::sleep(delay).await;
        }
    }

    fn record_attempt(
        &self,
        agent: &AgentName,
        request_id: &RequestId,
        attempt_number: u32,
        started_at: chrono::DateTime<Utc>,
        outcome: AttemptOutcome,
        latency: Duration,
    ) {
        let attempt = DispatchAttempt {
            agent: agent.clone(),
            attempt_number,
            started_at,
            outcome,
            latency,
        };
        self.audit.emit(
            AuditEvent::new(AuditEventType::DispatchAttempt, outcome.as_str())
                .with_request_id(request_id)
                .with_attempt(attempt),
        );
    }
}

fn attempt_outcome(result: &Result<AgentReply, AgentCallError>) -> AttemptOutcome {
    match result {
        Ok(_) => AttemptOutcome::Success,
        Err(AgentCallError::Timeout(_)) => AttemptOutcome::Timeout,
        Err(AgentCallError::Connect(_)) => AttemptOutcome::ConnectError,
        Err(AgentCallError::Upstream { .. }) => AttemptOutcome::UpstreamError,
        Err(AgentCallError::Rejected { .. }) => AttemptOutcome::Rejected,
        Err(AgentCallError::InvalidResponse(_)) => AttemptOutcome::InvalidResponse,
    }
}

/// The breaker permit of an in-progress logical call. Whatever path ends
/// the call, including the future being dropped, the permit is either
/// recorded once or handed back.
struct PendingOutcome<'a> {
    breakers: &'a BreakerRegistry,
    agent: &'a AgentName,
    request_id: &'a RequestId,
    permit: Option<Permit>,
}

impl<'a> PendingOutcome<'a> {
    fn new(breakers: &'a BreakerRegistry, agent: &'a AgentName, request_id: &'a RequestId) -> Self {
        Self {
            breakers,
            agent,
            request_id,
            permit: None,
        }
    }

    fn hold(&mut self, permit: Permit) {
        self.permit = Some(permit);
    }

    fn take(&mut self) -> Option<Permit> {
        self.permit.take()
    }

    fn is_probe(&self) -> bool {
        self.permit.is_some_and(|permit| permit.is_probe())
    }

    fn record(&mut self, success: bool) {
        if let Some(permit) = self.permit.take() {
            self.breakers
                .record_outcome(self.agent, permit, success, Some(self.request_id));
        }
    }

    /// The current attempt says nothing about the agent.
    fn inconclusive(&mut self, earlier_failures: bool) {
        if earlier_failures {
            self.record(false);
        } else if let Some(permit) = self.permit.take() {
            self.breakers.abandon(self.agent, permit);
        }
    }
}

impl Drop for PendingOutcome<'_> {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            self.breakers.abandon(self.agent, permit);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::bulkhead::BulkheadPolicy;
    use crate::domain::circuit_breaker::{BreakerPolicy, BreakerState, WindowKind};
    use crate::domain::envelope::EnvelopeRequest;
    use crate::domain::events::NoopAuditSink;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};

    enum Step {
        Reply,
        Fail(AgentCallError),
        Hang,
    }

    struct ScriptedTransport {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicU32,
        attempts_seen: Mutex<Vec<u32>>,
        bulkheads: Option<Arc<BulkheadRegistry>>,
        in_flight_seen: Mutex<Vec<u32>>,
    }

    impl ScriptedTransport {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                calls: AtomicU32::new(0),
                attempts_seen: Mutex::new(Vec::new()),
                bulkheads: None,
                in_flight_seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AgentTransport for ScriptedTransport {
        async fn call(
            &self,
            agent: &AgentDescriptor,
            _envelope: &Envelope,
            attempt: u32,
        ) -> Result<AgentReply, AgentCallError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.attempts_seen.lock().push(attempt);
            if let Some(bulkheads) = &self.bulkheads {
                self.in_flight_seen
                    .lock()
                    .push(bulkheads.snapshot(&agent.name).in_flight);
            }
            let step = self.steps.lock().pop_front().unwrap_or(Step::Reply);
            match step {
                Step::Reply => Ok(serde_json::from_value(json!({"output": {"done": true}})).unwrap()),
                Step::Fail(error) => Err(error),
                Step::Hang => std::future::pending().await,
            }
        }
    }

    fn upstream_500() -> AgentCallError {
        AgentCallError::Upstream {
            status: 500,
            body: "boom".into(),
        }
    }

    fn breaker_policy(half_open_probes: u32) -> BreakerPolicy {
        BreakerPolicy {
            failure_rate_threshold: 50.0,
            window_kind: WindowKind::Count,
            window_size: 10,
            minimum_volume: 5,
            open_duration: Duration::from_secs(30),
            half_open_probes,
        }
    }

    fn retry_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: 0.0,
        }
    }

    struct Harness {
        executor: RetryExecutor,
        breakers: Arc<BreakerRegistry>,
        bulkheads: Arc<BulkheadRegistry>,
    }

    fn harness(max_attempts: u32, transport: Arc<dyn AgentTransport>) -> Harness {
        harness_with(max_attempts, transport, None)
    }

    fn harness_with(
        max_attempts: u32,
        transport: Arc<dyn AgentTransport>,
        bulkheads: Option<Arc<BulkheadRegistry>>,
    ) -> Harness {
        let breakers = Arc::new(BreakerRegistry::new(breaker_policy(1), Arc::new(NoopAuditSink)));
        let bulkheads = bulkheads.unwrap_or_else(|| {
            Arc::new(BulkheadRegistry::new(BulkheadPolicy {
                max_concurrent: 2,
                queue_capacity: 1,
                queue_wait_timeout: Duration::from_secs(5),
            }))
        });
        Harness {
            executor: RetryExecutor::new(
                retry_policy(max_attempts),
                Duration::from_secs(10),
                Arc::clone(&breakers),
                Arc::clone(&bulkheads),
                transport,
                Arc::new(NoopAuditSink),
            ),
            breakers,
            bulkheads,
        }
    }

    fn agent() -> AgentDescriptor {
        AgentDescriptor::new("nucleus", "http://nucleus:8005")
    }

    fn envelope() -> Envelope {
        serde_json::from_value::<EnvelopeRequest>(json!({"origin": "ui", "input": {}}))
            .unwrap()
            .validate_for_route("nucleus", "plan")
            .unwrap()
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_third_attempt_records_one_success() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(upstream_500()),
            Step::Fail(AgentCallError::Connect("refused".into())),
            Step::Reply,
        ]);
        let h = harness(3, transport.clone());

        let dispatched = h
            .executor
            .execute(&agent(), &envelope(), far_deadline())
            .await
            .unwrap();

        assert_eq!(dispatched.attempts, 3);
        assert_eq!(dispatched.reply.output, json!({"done": true}));
        assert_eq!(*transport.attempts_seen.lock(), vec![1, 2, 3]);
        let snapshot = h.breakers.snapshot(&agent().name);
        assert_eq!(snapshot.success_count, 1);
        assert_eq!(snapshot.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_record_one_failure() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(upstream_500()),
            Step::Fail(upstream_500()),
            Step::Fail(upstream_500()),
            Step::Fail(upstream_500()),
        ]);
        let h = harness(3, transport.clone());

        let err = h
            .executor
            .execute(&agent(), &envelope(), far_deadline())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::RetryExhausted { attempts: 3, .. }));
        assert_eq!(transport.calls(), 3);
        let snapshot = h.breakers.snapshot(&agent().name);
        assert_eq!(snapshot.failure_count, 1);
        assert_eq!(snapshot.success_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried_and_counts_as_healthy() {
        let transport = ScriptedTransport::new(vec![Step::Fail(AgentCallError::Rejected {
            status: 422,
            body: "bad input".into(),
        })]);
        let h = harness(3, transport.clone());

        let err = h
            .executor
            .execute(&agent(), &envelope(), far_deadline())
            .await
            .unwrap_err();

        assert_eq!(err.http_status(), 422);
        assert_eq!(transport.calls(), 1);
        assert_eq!(h.breakers.snapshot(&agent().name).success_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_past_deadline_gives_up() {
        let transport = ScriptedTransport::new(vec![Step::Fail(upstream_500()), Step::Reply]);
        let h = harness(3, transport.clone());

        let deadline = Instant::now() + Duration::from_millis(50);
        let err = h
            .executor
            .execute(&agent(), &envelope(), deadline)
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::DeadlineExceeded { attempts: 1 });
        assert_eq!(transport.calls(), 1);
        assert_eq!(h.breakers.snapshot(&agent().name).failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_first_call_leaves_breaker_untouched() {
        let transport = ScriptedTransport::new(vec![Step::Hang]);
        let h = harness(3, transport.clone());

        let deadline = Instant::now() + Duration::from_millis(500);
        let err = h
            .executor
            .execute(&agent(), &envelope(), deadline)
            .await
            .unwrap_err();

        assert_eq!(err, GatewayError::DeadlineExceeded { attempts: 1 });
        let snapshot = h.breakers.snapshot(&agent().name);
        assert_eq!(snapshot.success_count + snapshot.failure_count, 0);
        assert_eq!(h.bulkheads.snapshot(&agent().name).in_flight, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_agent_timeout_is_retryable() {
        let transport = ScriptedTransport::new(vec![Step::Hang, Step::Reply]);
        let h = harness(2, transport.clone());
        let mut agent = agent();
        agent.timeout = Some(Duration::from_secs(1));

        let dispatched = h
            .executor
            .execute(&agent, &envelope(), far_deadline())
            .await
            .unwrap();
        assert_eq!(dispatched.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_is_held_per_attempt_only() {
        let bulkheads = Arc::new(BulkheadRegistry::new(BulkheadPolicy {
            max_concurrent: 1,
            queue_capacity: 0,
            queue_wait_timeout: Duration::from_secs(1),
        }));
        let transport = Arc::new(ScriptedTransport {
            steps: Mutex::new(vec![Step::Fail(upstream_500()), Step::Reply].into()),
            calls: AtomicU32::new(0),
            attempts_seen: Mutex::new(Vec::new()),
            bulkheads: Some(Arc::clone(&bulkheads)),
            in_flight_seen: Mutex::new(Vec::new()),
        });
        let h = harness_with(3, transport.clone(), Some(bulkheads));

        h.executor
            .execute(&agent(), &envelope(), far_deadline())
            .await
            .unwrap();

        assert_eq!(*transport.in_flight_seen.lock(), vec![1, 1]);
        assert_eq!(h.bulkheads.snapshot(&agent().name).in_flight, 0);
    }

    async fn open_then_cool_down(breakers: &BreakerRegistry) {
        let name = agent().name;
        for _ in 0..5 {
            let permit = breakers.before_call(&name, None).unwrap();
            breakers.record_outcome(&name, permit, false, None);
        }
        assert_eq!(breakers.state(&name), BreakerState::Open);
        tokio::time::advance(Duration::from_secs(30)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_probe_reopens_without_retry() {
        let transport = ScriptedTransport::new(vec![
            Step::Fail(upstream_500()),
            Step::Fail(upstream_500()),
            Step::Fail(upstream_500()),
        ]);
        let h = harness(3, transport.clone());
        open_then_cool_down(&h.breakers).await;

        let err = h
            .executor
            .execute(&agent(), &envelope(), far_deadline())
            .await
            .unwrap_err();

        assert!(matches!(err, GatewayError::RetryExhausted { attempts: 1, .. }));
        assert_eq!(transport.calls(), 1);
        let snapshot = h.breakers.snapshot(&agent().name);
        assert_eq!(snapshot.state, BreakerState::Open);
        assert_eq!(snapshot.remaining_cooldown, Some(Duration::from_secs(30)));

        let err = h
            .executor
            .execute(&agent(), &envelope(), far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_probe_closes_breaker() {
        let transport = ScriptedTransport::new(vec![Step::Reply]);
        let h = harness(3, transport.clone());
        open_then_cool_down(&h.breakers).await;

        let dispatched = h
            .executor
            .execute(&agent(), &envelope(), far_deadline())
            .await
            .unwrap();

        assert_eq!(dispatched.attempts, 1);
        assert_eq!(h.breakers.state(&agent().name), BreakerState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_call_returns_probe_slot() {
        let transport = ScriptedTransport::new(vec![Step::Hang]);
        let h = Arc::new(harness(1, transport.clone()));
        open_then_cool_down(&h.breakers).await;

        let running = {
            let h = Arc::clone(&h);
            tokio::spawn(async move {
                let _ = h.executor.execute(&agent(), &envelope(), far_deadline()).await;
            })
        };
        while transport.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(h.breakers.before_call(&agent().name, None).is_err());

        running.abort();
        let _ = running.await;

        assert!(h.breakers.before_call(&agent().name, None).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_breaker_short_circuits() {
        let transport = ScriptedTransport::new(vec![]);
        let h = harness(3, transport.clone());
        let name = agent().name;
        for _ in 0..5 {
            let permit = h.breakers.before_call(&name, None).unwrap();
            h.breakers.record_outcome(&name, permit, false, None);
        }

        let err = h
            .executor
            .execute(&agent(), &envelope(), far_deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CircuitOpen { .. }));
        assert_eq!(transport.calls(), 0);
    }
}
