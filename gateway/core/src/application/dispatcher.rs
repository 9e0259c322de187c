// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dispatcher
//!
//! The request pipeline behind every dispatch route:
//!
//! ```text
//! admission ─▶ validation ─▶ registry ─▶ retry executor (breaker ─▶ bulkhead ─▶ agent)*
//! ```
//!
//! Each stage returns a sum type and the pipeline is a chain of early
//! returns: once a stage rejects, later stages are never consulted.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Orchestrate the resilience stages for one inbound request
//!   and turn every outcome into a typed result

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::application::retry_executor::{Dispatched, RetryExecutor};
use crate::domain::deadline::deadline_after;
use crate::domain::envelope::{EnvelopeError, EnvelopeRequest, RequestId};
use crate::domain::error::GatewayError;
use crate::domain::events::{AuditEvent, AuditEventType, AuditSink};
use crate::infrastructure::agent_registry::AgentRegistry;
use crate::infrastructure::metrics;
use crate::infrastructure::rate_limiter::{Admission, AdmissionController, ClientIdentity};

/// One inbound dispatch as the HTTP layer hands it over.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub body: EnvelopeRequest,
    /// Set when the raw body could not be decoded; reported after admission.
    pub decode_error: Option<EnvelopeError>,
    /// `{agent}/{intent}` path segments, when the route carries them.
    pub route: Option<(String, String)>,
    pub identity: ClientIdentity,
    pub path: String,
    /// Caller-requested deadline, relative to arrival.
    pub timeout: Option<Duration>,
}

impl DispatchRequest {
    pub fn new(body: EnvelopeRequest) -> Self {
        Self {
            body,
            decode_error: None,
            route: None,
            identity: ClientIdentity::default(),
            path: "/v1/dispatch".to_string(),
            timeout: None,
        }
    }

    pub fn routed(agent: impl Into<String>, intent: impl Into<String>, body: EnvelopeRequest) -> Self {
        let agent = agent.into();
        let intent = intent.into();
        Self {
            path: format!("/v1/{}/{}", agent, intent),
            route: Some((agent, intent)),
            ..Self::new(body)
        }
    }

    /// A request whose body failed to decode.
    pub fn undecodable(error: EnvelopeError) -> Self {
        Self {
            decode_error: Some(error),
            ..Self::new(EnvelopeRequest::default())
        }
    }

    pub fn with_route(mut self, agent: impl Into<String>, intent: impl Into<String>) -> Self {
        self.route = Some((agent.into(), intent.into()));
        self
    }

    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Rate-limit figures reported back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitStatus {
    pub limit: u32,
    pub remaining: u32,
}

#[derive(Debug)]
pub struct DispatchResponse {
    pub request_id: Option<String>,
    pub rate_limit: Option<RateLimitStatus>,
    pub result: Result<Dispatched, GatewayError>,
}

pub struct Dispatcher {
    admission: Arc<AdmissionController>,
    registry: Arc<AgentRegistry>,
    executor: Arc<RetryExecutor>,
    audit: Arc<dyn AuditSink>,
    request_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        admission: Arc<AdmissionController>,
        registry: Arc<AgentRegistry>,
        executor: Arc<RetryExecutor>,
        audit: Arc<dyn AuditSink>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            admission,
            registry,
            executor,
            audit,
            request_timeout,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Run the full pipeline for one request. Never panics: a panic inside
    /// the pipeline fails this request with an internal error.
    pub async fn handle(&self, mut request: DispatchRequest) -> DispatchResponse {
        let raw_id = request
            .body
            .request_id
            .get_or_insert_with(|| RequestId::new().to_string())
            .clone();

        match AssertUnwindSafe(self.pipeline(request)).catch_unwind().await {
            Ok(response) => response,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(request_id = %raw_id, "Dispatch panicked: {}", reason);
                DispatchResponse {
                    request_id: Some(raw_id),
                    rate_limit: None,
                    result: Err(GatewayError::Internal("dispatch aborted unexpectedly".to_string())),
                }
            }
        }
    }

    async fn pipeline(&self, request: DispatchRequest) -> DispatchResponse {
        let started = Instant::now();
        let timeout = request
            .timeout
            .map_or(self.request_timeout, |t| t.min(self.request_timeout));
        let deadline = deadline_after(started, timeout);

        let raw_id = request.body.request_id.clone();
        // An unusable id is reported by validation below.
        let audit_id = raw_id.as_deref().and_then(|id| RequestId::parse(id).ok());

        let mut response = DispatchResponse {
            request_id: raw_id,
            rate_limit: None,
            result: Err(GatewayError::Internal("dispatch did not complete".to_string())),
        };

        // 1. Admission
        let admission = self
            .admission
            .admit(&request.path, &request.identity, audit_id.as_ref(), Some(deadline))
            .await;
        match admission {
            Admission::Denied {
                scope,
                limit,
                retry_after,
                ..
            } => {
                response.rate_limit = Some(RateLimitStatus {
                    limit,
                    remaining: 0,
                });
                response.result = Err(GatewayError::AdmissionDenied {
                    scope,
                    retry_after,
                    limit,
                });
                return response;
            }
            Admission::Allowed { limit, remaining } => {
                response.rate_limit = Some(RateLimitStatus { limit, remaining });
                self.emit(audit_id.as_ref(), AuditEvent::new(AuditEventType::AdmissionAllowed, "allowed"));
            }
            Admission::Bypassed => {
                self.emit(audit_id.as_ref(), AuditEvent::new(AuditEventType::AdmissionAllowed, "bypassed"));
            }
        }

        // 2. Validation
        let validated = match (request.decode_error, &request.route) {
            (Some(e), _) => Err(e),
            (None, Some((agent, intent))) => request.body.validate_for_route(agent, intent),
            (None, None) => request.body.validate(),
        };
        let envelope = match validated {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(path = %request.path, "Rejected envelope: {}", e);
                self.emit(
                    audit_id.as_ref(),
                    AuditEvent::new(AuditEventType::ValidationFailed, e.to_string()),
                );
                response.result = Err(GatewayError::Validation(e));
                return response;
            }
        };
        let request_id = envelope.request_id().clone();

        // 3. Routing
        let snapshot = self.registry.snapshot();
        let agent = match snapshot.resolve(envelope.target_agent()) {
            Ok(agent) => agent,
            Err(e) => {
                warn!(request_id = %request_id, "{}", e);
                self.emit(
                    Some(&request_id),
                    AuditEvent::new(AuditEventType::DispatchFailed, e.code()),
                );
                response.result = Err(e);
                return response;
            }
        };

        // 4. Breaker, bulkhead and retries
        let result = self.executor.execute(agent, &envelope, deadline).await;
        let latency = started.elapsed();

        match &result {
            Ok(dispatched) => {
                debug!(
                    agent = %agent.name,
                    intent = envelope.intent(),
                    request_id = %request_id,
                    attempts = dispatched.attempts,
                    latency_ms = latency.as_millis() as u64,
                    "Dispatch completed"
                );
                metrics::record_dispatch(&agent.name, "success", latency);
                self.emit(
                    Some(&request_id),
                    AuditEvent::new(AuditEventType::DispatchCompleted, "success").with_agent(&agent.name),
                );
            }
            Err(e) => {
                info!(
                    agent = %agent.name,
                    intent = envelope.intent(),
                    request_id = %request_id,
                    code = e.code(),
                    "Dispatch failed: {}",
                    e
                );
                metrics::record_dispatch(&agent.name, e.code(), latency);
                self.emit(
                    Some(&request_id),
                    AuditEvent::new(AuditEventType::DispatchFailed, e.code()).with_agent(&agent.name),
                );
            }
        }

        response.request_id = Some(request_id.to_string());
        response.result = result;
        response
    }

    fn emit(&self, request_id: Option<&RequestId>, event: AuditEvent) {
        let event = match request_id {
            Some(id) => event.with_request_id(id),
            None => event,
        };
        self.audit.emit(event);
    }
}
