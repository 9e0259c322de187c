// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Wires the resilience components for one gateway process from its config.

use std::sync::Arc;

use crate::application::dispatcher::Dispatcher;
use crate::application::health::HealthService;
use crate::application::retry_executor::RetryExecutor;
use crate::domain::agent::AgentTransport;
use crate::domain::events::AuditSink;
use crate::domain::gateway_config::GatewayConfigSpec;
use crate::infrastructure::agent_registry::AgentRegistry;
use crate::infrastructure::breaker_registry::BreakerRegistry;
use crate::infrastructure::bulkhead::BulkheadRegistry;
use crate::infrastructure::rate_limiter::AdmissionController;

/// Every long-lived component of a gateway, sharing one set of per-key and
/// per-agent state.
#[derive(Clone)]
pub struct GatewayServices {
    pub admission: Arc<AdmissionController>,
    pub registry: Arc<AgentRegistry>,
    pub breakers: Arc<BreakerRegistry>,
    pub bulkheads: Arc<BulkheadRegistry>,
    pub executor: Arc<RetryExecutor>,
    pub dispatcher: Arc<Dispatcher>,
    pub health: Arc<HealthService>,
}

impl GatewayServices {
    pub fn build(
        spec: &GatewayConfigSpec,
        transport: Arc<dyn AgentTransport>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let admission = Arc::new(AdmissionController::in_memory(
            spec.rate_limit.clone(),
            Arc::clone(&audit),
        ));
        let registry = Arc::new(AgentRegistry::new(spec.agents.clone()));
        let breakers = Arc::new(BreakerRegistry::new(
            spec.circuit_breaker.policy(),
            Arc::clone(&audit),
        ));
        let bulkheads = Arc::new(BulkheadRegistry::new(spec.bulkhead.policy()));
        let executor = Arc::new(RetryExecutor::new(
            spec.retry.policy(),
            spec.dispatch.agent_timeout,
            Arc::clone(&breakers),
            Arc::clone(&bulkheads),
            transport,
            Arc::clone(&audit),
        ));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&admission),
            Arc::clone(&registry),
            Arc::clone(&executor),
            audit,
            spec.dispatch.request_timeout,
        ));
        let health = Arc::new(HealthService::new(
            Arc::clone(&registry),
            Arc::clone(&breakers),
            Arc::clone(&bulkheads),
            spec.health.startup_grace_period,
        ));

        Self {
            admission,
            registry,
            breakers,
            bulkheads,
            executor,
            dispatcher,
            health,
        }
    }
}
