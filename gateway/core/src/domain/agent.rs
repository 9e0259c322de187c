// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent
//!
//! Backend agents as seen from the gateway, and the transport port used to
//! reach them.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Agent identity, descriptors and the `AgentTransport`
//!   anti-corruption interface (implemented in `infrastructure::http_agent_client`)

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::domain::envelope::{AgentReply, Envelope};

/// Routing name of a backend agent (`osteon`, `nucleus`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentName(String);

impl AgentName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentName {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A known agent and the address it is reachable on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: AgentName,

    /// Base URL; the intent is appended as the last path segment.
    pub url: String,

    /// Disabled agents stay listed but are never dispatched to.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Per-attempt call timeout; falls back to `spec.dispatch.agent_timeout`.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

impl AgentDescriptor {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: AgentName::new(name),
            url: url.into(),
            enabled: true,
            timeout: None,
        }
    }

    pub fn endpoint(&self, intent: &str) -> String {
        format!("{}/{}", self.url.trim_end_matches('/'), intent)
    }
}

fn default_true() -> bool {
    true
}

/// Failure of a single attempt against an agent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AgentCallError {
    #[error("agent call timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection to agent failed: {0}")]
    Connect(String),

    #[error("agent returned HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("agent rejected the request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("agent reply could not be decoded: {0}")]
    InvalidResponse(String),
}

impl AgentCallError {
    /// Classify a non-success HTTP status returned by an agent.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            408 | 429 => Self::Upstream { status, body },
            400..=499 => Self::Rejected { status, body },
            _ => Self::Upstream { status, body },
        }
    }

    /// Timeouts, connection errors and 5xx-equivalents are transient.
    /// 4xx-equivalents are the caller's problem and never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Whether this outcome says the agent is unhealthy. An agent that
    /// correctly rejects a bad request is healthy.
    pub fn is_health_failure(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Connect(_) => "connect",
            Self::Upstream { .. } => "upstream",
            Self::Rejected { .. } => "rejected",
            Self::InvalidResponse(_) => "invalid_response",
        }
    }
}

/// Outbound port to the backend agents.
///
/// `attempt` starts at 1 and lets agents de-duplicate retried deliveries of
/// the same `request_id`.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    async fn call(
        &self,
        agent: &AgentDescriptor,
        envelope: &Envelope,
        attempt: u32,
    ) -> Result<AgentReply, AgentCallError>;
}
