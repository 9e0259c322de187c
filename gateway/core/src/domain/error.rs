// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway error taxonomy.
//!
//! Every stage rejection and agent failure ends up as one of these; the
//! presentation layer turns them into a [`ResponseEnvelope`] with the
//! matching HTTP status.

use std::time::Duration;

use crate::domain::agent::{AgentCallError, AgentName};
use crate::domain::bulkhead::BulkheadRejection;
use crate::domain::envelope::{EnvelopeError, ErrorBody, ResponseEnvelope};
use crate::domain::rate_limit::RateLimitScope;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid envelope: {0}")]
    Validation(#[from] EnvelopeError),

    #[error("unknown agent '{0}'")]
    UnknownAgent(AgentName),

    #[error("agent '{0}' is disabled")]
    AgentDisabled(AgentName),

    #[error("rate limit exceeded for {scope} key, retry after {retry_after:?}")]
    AdmissionDenied {
        scope: RateLimitScope,
        retry_after: Duration,
        limit: u32,
    },

    #[error("circuit for agent '{agent}' is open, retry after {retry_after:?}")]
    CircuitOpen {
        agent: AgentName,
        retry_after: Duration,
    },

    #[error("agent '{agent}' is saturated: {rejection}")]
    BulkheadSaturated {
        agent: AgentName,
        rejection: BulkheadRejection,
    },

    #[error("agent '{agent}' failed after {attempts} attempts: {last}")]
    RetryExhausted {
        agent: AgentName,
        attempts: u32,
        last: AgentCallError,
    },

    #[error("agent '{agent}' call failed: {error}")]
    AgentFailed {
        agent: AgentName,
        attempts: u32,
        error: AgentCallError,
    },

    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::UnknownAgent(_) => "unknown_agent",
            Self::AgentDisabled(_) => "agent_disabled",
            Self::AdmissionDenied { .. } => "rate_limited",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::BulkheadSaturated { .. } => "bulkhead_saturated",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::AgentFailed { .. } => "agent_error",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::UnknownAgent(_) => 404,
            Self::AdmissionDenied { .. } => 429,
            Self::AgentDisabled(_) | Self::CircuitOpen { .. } | Self::BulkheadSaturated { .. } => {
                503
            }
            Self::RetryExhausted {
                last: AgentCallError::Timeout(_),
                ..
            } => 504,
            Self::RetryExhausted { .. } => 502,
            Self::AgentFailed {
                error: AgentCallError::Rejected { status, .. },
                ..
            } => *status,
            Self::AgentFailed {
                error: AgentCallError::Timeout(_),
                ..
            } => 504,
            Self::AgentFailed { .. } => 502,
            Self::DeadlineExceeded { .. } => 504,
            Self::Internal(_) => 500,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::AdmissionDenied { retry_after, .. } | Self::CircuitOpen { retry_after, .. } => {
                Some(*retry_after)
            }
            Self::BulkheadSaturated { .. } => Some(Duration::from_secs(1)),
            _ => None,
        }
    }

    pub fn agent(&self) -> Option<&AgentName> {
        match self {
            Self::UnknownAgent(agent)
            | Self::AgentDisabled(agent)
            | Self::CircuitOpen { agent, .. }
            | Self::BulkheadSaturated { agent, .. }
            | Self::RetryExhausted { agent, .. }
            | Self::AgentFailed { agent, .. } => Some(agent),
            _ => None,
        }
    }

    pub fn to_response(&self, request_id: Option<&str>) -> ResponseEnvelope {
        ResponseEnvelope {
            ok: false,
            agent: self.agent().map(|a| a.to_string()).unwrap_or_default(),
            request_id: request_id.map(str::to_string),
            state_hash: None,
            output: None,
            error: Some(ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
                retry_after: self.retry_after().map(retry_after_secs),
            }),
        }
    }
}

/// Whole seconds for `Retry-After`, rounded up and never zero.
pub fn retry_after_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}
