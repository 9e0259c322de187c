// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! End-to-end scenarios for the dispatch pipeline.
//!
//! Each test builds a full set of gateway services around a scripted agent
//! transport and drives them through the dispatcher, the same entry point
//! the HTTP routes use. Time is paused so windows and cooldowns are exact.

use async_trait::async_trait;
use mesh_gateway_core::application::dispatcher::DispatchRequest;
use mesh_gateway_core::application::services::GatewayServices;
use mesh_gateway_core::domain::agent::{AgentCallError, AgentDescriptor, AgentName, AgentTransport};
use mesh_gateway_core::domain::bulkhead::BulkheadRejection;
use mesh_gateway_core::domain::circuit_breaker::BreakerState;
use mesh_gateway_core::domain::envelope::{AgentReply, Envelope, EnvelopeRequest};
use mesh_gateway_core::domain::error::GatewayError;
use mesh_gateway_core::domain::events::{AuditEventType, NoopAuditSink};
use mesh_gateway_core::domain::gateway_config::GatewayConfigSpec;
use mesh_gateway_core::domain::rate_limit::RateLimitStrategy;
use mesh_gateway_core::infrastructure::event_bus::EventBus;
use mesh_gateway_core::infrastructure::rate_limiter::ClientIdentity;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// Agent double: plays back scripted failures, then succeeds. Calls can be
/// held at a gate until the test opens it.
struct ScriptedAgent {
    failures: Mutex<VecDeque<AgentCallError>>,
    always_fail: bool,
    gate: Option<Arc<Semaphore>>,
    calls: AtomicU32,
}

impl ScriptedAgent {
    fn healthy() -> Self {
        Self {
            failures: Mutex::new(VecDeque::new()),
            always_fail: false,
            gate: None,
            calls: AtomicU32::new(0),
        }
    }

    fn failing_first(failures: Vec<AgentCallError>) -> Self {
        Self {
            failures: Mutex::new(failures.into()),
            ..Self::healthy()
        }
    }

    fn broken() -> Self {
        Self {
            always_fail: true,
            ..Self::healthy()
        }
    }

    fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::healthy()
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentTransport for ScriptedAgent {
    async fn call(
        &self,
        agent: &AgentDescriptor,
        envelope: &Envelope,
        _attempt: u32,
    ) -> Result<AgentReply, AgentCallError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let _pass = gate.acquire().await.map_err(|e| AgentCallError::Connect(e.to_string()))?;
        }
        if self.always_fail {
            return Err(AgentCallError::Upstream {
                status: 500,
                body: "internal error".into(),
            });
        }
        if let Some(error) = self.failures.lock().pop_front() {
            return Err(error);
        }
        Ok(serde_json::from_value(json!({
            "agent": agent.name.as_str(),
            "output": {"intent": envelope.intent()}
        }))
        .unwrap())
    }
}

fn base_spec() -> GatewayConfigSpec {
    let mut spec = GatewayConfigSpec::default();
    spec.agents = vec![AgentDescriptor::new("nucleus", "http://nucleus:8005")];
    spec.rate_limit.enabled = false;
    spec.retry.base_delay = Duration::from_millis(100);
    spec.retry.jitter = 0.0;
    spec
}

fn request() -> DispatchRequest {
    let body: EnvelopeRequest = serde_json::from_value(json!({"origin": "scheduler"})).unwrap();
    DispatchRequest::routed("nucleus", "plan", body)
}

fn nucleus() -> AgentName {
    AgentName::new("nucleus")
}

#[tokio::test(start_paused = true)]
async fn test_sixth_request_in_window_is_rate_limited() {
    let mut spec = base_spec();
    spec.rate_limit.enabled = true;
    spec.rate_limit.strategy = RateLimitStrategy::SlidingWindow;
    spec.rate_limit.requests = 5;
    spec.rate_limit.window = Duration::from_secs(30);
    let agent = Arc::new(ScriptedAgent::healthy());
    let gateway = GatewayServices::build(&spec, agent.clone(), Arc::new(NoopAuditSink));
    let identity = ClientIdentity {
        ip: Some("192.0.2.10".into()),
        ..Default::default()
    };

    for i in 0..5 {
        let response = gateway
            .dispatcher
            .handle(request().with_identity(identity.clone()))
            .await;
        assert!(response.result.is_ok(), "request {} should be admitted", i + 1);
        tokio::time::advance(Duration::from_millis(10)).await;
    }

    let denied = gateway
        .dispatcher
        .handle(request().with_identity(identity.clone()))
        .await;
    match denied.result {
        Err(GatewayError::AdmissionDenied { retry_after, limit, .. }) => {
            assert_eq!(limit, 5);
            // The first request's sub-bucket frees up one window after it
            // was filled.
            assert!(retry_after > Duration::from_secs(27), "{:?}", retry_after);
            assert!(retry_after <= Duration::from_secs(30), "{:?}", retry_after);
        }
        other => panic!("expected admission denial, got {:?}", other),
    }
    assert_eq!(agent.calls(), 5);

    // A different client is unaffected.
    let other = ClientIdentity {
        ip: Some("192.0.2.11".into()),
        ..Default::default()
    };
    assert!(gateway.dispatcher.handle(request().with_identity(other)).await.result.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_breaker_opens_after_fifth_failure() {
    let mut spec = base_spec();
    spec.retry.max_attempts = 1;
    spec.circuit_breaker.failure_rate_threshold = 50.0;
    spec.circuit_breaker.minimum_volume = 5;
    let agent = Arc::new(ScriptedAgent::broken());
    let bus = EventBus::new(256);
    let mut events = bus.subscribe();
    let gateway = GatewayServices::build(&spec, agent.clone(), Arc::new(bus.clone()));

    let mut outcomes = Vec::new();
    for _ in 0..10 {
        outcomes.push(gateway.dispatcher.handle(request()).await.result);
    }

    for (i, outcome) in outcomes.iter().enumerate().take(5) {
        assert!(
            matches!(outcome, Err(GatewayError::RetryExhausted { .. })),
            "call {} should reach the agent: {:?}",
            i + 1,
            outcome
        );
    }
    for outcome in &outcomes[5..] {
        assert!(matches!(outcome, Err(GatewayError::CircuitOpen { .. })));
    }
    assert_eq!(agent.calls(), 5);
    assert_eq!(gateway.breakers.state(&nucleus()), BreakerState::Open);

    let audit = events.drain();
    let transitions = audit
        .iter()
        .filter(|e| e.event_type == AuditEventType::BreakerStateChanged)
        .count();
    let rejections = audit
        .iter()
        .filter(|e| e.event_type == AuditEventType::BreakerRejected)
        .count();
    assert_eq!(transitions, 1);
    assert_eq!(rejections, 5);
}

#[tokio::test(start_paused = true)]
async fn test_open_breaker_recovers_through_probe() {
    let mut spec = base_spec();
    spec.retry.max_attempts = 1;
    spec.circuit_breaker.open_duration = Duration::from_secs(30);
    let agent = Arc::new(ScriptedAgent::failing_first(
        (0..5)
            .map(|_| AgentCallError::Connect("refused".into()))
            .collect(),
    ));
    let gateway = GatewayServices::build(&spec, agent.clone(), Arc::new(NoopAuditSink));

    for _ in 0..5 {
        let _ = gateway.dispatcher.handle(request()).await;
    }
    assert_eq!(gateway.breakers.state(&nucleus()), BreakerState::Open);

    tokio::time::advance(Duration::from_secs(29)).await;
    assert!(matches!(
        gateway.dispatcher.handle(request()).await.result,
        Err(GatewayError::CircuitOpen { .. })
    ));
    assert_eq!(agent.calls(), 5);

    tokio::time::advance(Duration::from_secs(1)).await;
    assert!(gateway.dispatcher.handle(request()).await.result.is_ok());
    assert_eq!(gateway.breakers.state(&nucleus()), BreakerState::Closed);
}

#[tokio::test(start_paused = true)]
async fn test_bulkhead_admits_two_queues_one_rejects_one() {
    let mut spec = base_spec();
    spec.bulkhead.max_concurrent = 2;
    spec.bulkhead.queue_size = 1;
    spec.bulkhead.queue_wait_timeout = Duration::from_secs(10);
    let gate = Arc::new(Semaphore::new(0));
    let agent = Arc::new(ScriptedAgent::gated(Arc::clone(&gate)));
    let gateway = GatewayServices::build(&spec, agent.clone(), Arc::new(NoopAuditSink));

    let mut running = Vec::new();
    for _ in 0..3 {
        let dispatcher = Arc::clone(&gateway.dispatcher);
        running.push(tokio::spawn(async move { dispatcher.handle(request()).await }));
        tokio::task::yield_now().await;
    }
    while agent.calls() < 2 || gateway.bulkheads.snapshot(&nucleus()).queued < 1 {
        tokio::task::yield_now().await;
    }
    let pool = gateway.bulkheads.snapshot(&nucleus());
    assert_eq!((pool.in_flight, pool.queued), (2, 1));

    let fourth = gateway.dispatcher.handle(request()).await;
    assert!(matches!(
        fourth.result,
        Err(GatewayError::BulkheadSaturated {
            rejection: BulkheadRejection::Saturated { .. },
            ..
        })
    ));
    assert_eq!(agent.calls(), 2);

    gate.add_permits(3);
    for handle in running {
        assert!(handle.await.unwrap().result.is_ok());
    }
    assert_eq!(agent.calls(), 3);
    let pool = gateway.bulkheads.snapshot(&nucleus());
    assert_eq!((pool.in_flight, pool.queued), (0, 0));
}

#[tokio::test(start_paused = true)]
async fn test_success_on_third_attempt_counts_once() {
    let mut spec = base_spec();
    spec.retry.max_attempts = 3;
    let agent = Arc::new(ScriptedAgent::failing_first(vec![
        AgentCallError::Timeout(Duration::from_secs(1)),
        AgentCallError::Upstream {
            status: 502,
            body: String::new(),
        },
    ]));
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let gateway = GatewayServices::build(&spec, agent.clone(), Arc::new(bus.clone()));

    let response = gateway.dispatcher.handle(request()).await;
    let dispatched = response.result.unwrap();
    assert_eq!(dispatched.attempts, 3);
    assert_eq!(dispatched.reply.output, json!({"intent": "plan"}));

    let breaker = gateway.breakers.snapshot(&nucleus());
    assert_eq!(breaker.success_count, 1);
    assert_eq!(breaker.failure_count, 0);

    let attempts: Vec<u32> = events
        .drain()
        .into_iter()
        .filter_map(|e| e.attempt)
        .map(|a| a.attempt_number)
        .collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bulkhead_bound_holds_under_load() {
    let mut spec = base_spec();
    spec.bulkhead.max_concurrent = 3;
    spec.bulkhead.queue_size = 4;
    spec.bulkhead.queue_wait_timeout = Duration::from_millis(50);
    let gateway = GatewayServices::build(&spec, Arc::new(ScriptedAgent::healthy()), Arc::new(NoopAuditSink));
    let bulkheads = Arc::clone(&gateway.bulkheads);

    let active = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));
    let mut workers = Vec::new();
    for i in 0..64u64 {
        let bulkheads = Arc::clone(&bulkheads);
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        workers.push(tokio::spawn(async move {
            if let Ok(slot) = bulkheads.acquire(&nucleus(), None).await {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1 + i % 5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                bulkheads.release(&nucleus(), slot);
            }
        }));
    }

    let monitor = {
        let bulkheads = Arc::clone(&bulkheads);
        tokio::spawn(async move {
            for _ in 0..200 {
                let pool = bulkheads.snapshot(&nucleus());
                assert!(pool.in_flight <= 3, "in_flight {}", pool.in_flight);
                assert!(pool.queued <= 4, "queued {}", pool.queued);
                assert!(pool.in_flight + pool.queued <= 7);
                tokio::task::yield_now().await;
            }
        })
    };

    for worker in workers {
        worker.await.unwrap();
    }
    monitor.await.unwrap();
    assert!(peak.load(Ordering::SeqCst) <= 3);
    let pool = bulkheads.snapshot(&nucleus());
    assert_eq!((pool.in_flight, pool.queued), (0, 0));
}
