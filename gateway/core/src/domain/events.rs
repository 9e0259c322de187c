// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::agent::AgentName;
use crate::domain::envelope::RequestId;

/// Decision points that produce an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    AdmissionAllowed,
    RateLimitHit,
    BreakerRejected,
    BreakerStateChanged,
    BulkheadRejected,
    DispatchAttempt,
    DispatchCompleted,
    DispatchFailed,
    ValidationFailed,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdmissionAllowed => "admission_allowed",
            Self::RateLimitHit => "rate_limit_hit",
            Self::BreakerRejected => "breaker_rejected",
            Self::BreakerStateChanged => "breaker_state_changed",
            Self::BulkheadRejected => "bulkhead_rejected",
            Self::DispatchAttempt => "dispatch_attempt",
            Self::DispatchCompleted => "dispatch_completed",
            Self::DispatchFailed => "dispatch_failed",
            Self::ValidationFailed => "validation_failed",
        }
    }
}

/// Write-once audit record. `key` is always a hashed rate-limit key, never a
/// raw client identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentName>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub outcome: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<DispatchAttempt>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, outcome: impl Into<String>) -> Self {
        Self {
            event_type,
            agent: None,
            key: None,
            outcome: outcome.into(),
            timestamp: Utc::now(),
            request_id: None,
            attempt: None,
        }
    }

    pub fn with_agent(mut self, agent: &AgentName) -> Self {
        self.agent = Some(agent.clone());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_request_id(mut self, request_id: &RequestId) -> Self {
        self.request_id = Some(request_id.clone());
        self
    }

    pub fn with_attempt(mut self, attempt: DispatchAttempt) -> Self {
        self.agent = Some(attempt.agent.clone());
        self.attempt = Some(attempt);
        self
    }
}

/// One attempt within a logical call. Only lives as long as the call and the
/// audit record it ends up in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchAttempt {
    pub agent: AgentName,
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Timeout,
    ConnectError,
    UpstreamError,
    Rejected,
    InvalidResponse,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Timeout => "timeout",
            Self::ConnectError => "connect",
            Self::UpstreamError => "upstream",
            Self::Rejected => "rejected",
            Self::InvalidResponse => "invalid_response",
        }
    }
}

/// Outbound port to the external audit collaborator. Implementations must not
/// block: events are emitted from the request path.
pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}
