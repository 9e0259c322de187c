// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Envelope
//!
//! The uniform request/response wrapper exchanged between callers, the
//! gateway and the backend agents.
//!
//! ```text
//! caller ──EnvelopeRequest──▶ gateway ──AgentMessage──▶ agent
//! caller ◀─ResponseEnvelope── gateway ◀──AgentReply──── agent
//! ```
//!
//! An [`Envelope`] only exists after validation and is immutable from then
//! on; its `request_id` correlates audit events and lets agents de-duplicate
//! retried attempts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

use crate::domain::agent::AgentName;

pub const MAX_REQUEST_ID_LEN: usize = 128;

/// Correlation id of one inbound call. Stable across retries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, EnvelopeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EnvelopeError::MissingField("request_id"));
        }
        if trimmed.len() > MAX_REQUEST_ID_LEN {
            return Err(EnvelopeError::RequestIdTooLong(trimmed.len()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Envelope validation failures. Always surfaced as 400 and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has invalid value '{value}'")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("field 'input' must be a JSON object")]
    InputNotObject,

    #[error("body {field} '{body}' does not match path '{path}'")]
    PathMismatch {
        field: &'static str,
        path: String,
        body: String,
    },

    #[error("request_id is {0} characters long (max {MAX_REQUEST_ID_LEN})")]
    RequestIdTooLong(usize),

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

/// Raw inbound body. Every field is optional so that validation can report
/// which one is wrong instead of surfacing a serde error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvelopeRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl EnvelopeRequest {
    /// Validate the body on its own (`POST /dispatch`).
    pub fn validate(self) -> Result<Envelope, EnvelopeError> {
        self.validate_inner(None)
    }

    /// Validate the body against the `{agent}/{intent}` path segments. Body
    /// values, when present, must agree with the path; absent ones are filled
    /// from it.
    pub fn validate_for_route(self, agent: &str, intent: &str) -> Result<Envelope, EnvelopeError> {
        self.validate_inner(Some((agent, intent)))
    }

    fn validate_inner(self, route: Option<(&str, &str)>) -> Result<Envelope, EnvelopeError> {
        let origin = self
            .origin
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .ok_or(EnvelopeError::MissingField("origin"))?;

        let target = resolve_segment("target", self.target, route.map(|(a, _)| a))?;
        let intent = resolve_segment("intent", self.intent, route.map(|(_, i)| i))?;

        let input = match self.input {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(EnvelopeError::InputNotObject),
        };

        let request_id = match self.request_id {
            Some(raw) => RequestId::parse(&raw)?,
            None => RequestId::new(),
        };

        Ok(Envelope {
            origin,
            target_agent: AgentName::new(target),
            intent,
            input,
            request_id,
            received_at: Utc::now(),
        })
    }
}

fn resolve_segment(
    field: &'static str,
    body: Option<String>,
    path: Option<&str>,
) -> Result<String, EnvelopeError> {
    let body = body.map(|b| b.trim().to_string()).filter(|b| !b.is_empty());
    let value = match (body, path) {
        (Some(b), Some(p)) if b != p => {
            return Err(EnvelopeError::PathMismatch {
                field,
                path: p.to_string(),
                body: b,
            })
        }
        (Some(b), _) => b,
        (None, Some(p)) => p.to_string(),
        (None, None) => return Err(EnvelopeError::MissingField(field)),
    };

    if !is_valid_identifier(&value) {
        return Err(EnvelopeError::InvalidIdentifier { field, value });
    }
    Ok(value)
}

/// Agent names and intents end up in outbound URL paths.
fn is_valid_identifier(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 64
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Validated request envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    origin: String,
    target_agent: AgentName,
    intent: String,
    input: Map<String, Value>,
    request_id: RequestId,
    received_at: DateTime<Utc>,
}

impl Envelope {
    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn target_agent(&self) -> &AgentName {
        &self.target_agent
    }

    pub fn intent(&self) -> &str {
        &self.intent
    }

    pub fn input(&self) -> &Map<String, Value> {
        &self.input
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn received_at(&self) -> DateTime<Utc> {
        self.received_at
    }

    /// The message body agents expect on their `/{intent}` endpoint.
    pub fn wire_message(&self) -> AgentMessage<'_> {
        AgentMessage {
            id: self.request_id.as_str(),
            ts: self.received_at.timestamp_millis() as f64 / 1000.0,
            origin: &self.origin,
            target: self.target_agent.as_str(),
            intent: &self.intent,
            input: &self.input,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AgentMessage<'a> {
    pub id: &'a str,
    pub ts: f64,
    pub origin: &'a str,
    pub target: &'a str,
    pub intent: &'a str,
    pub input: &'a Map<String, Value>,
}

/// Body returned by a backend agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentReply {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub ts: Option<f64>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default = "default_ok")]
    pub ok: bool,
    #[serde(default = "empty_object")]
    pub output: Value,
    #[serde(default)]
    pub state_hash: Option<String>,
}

fn default_ok() -> bool {
    true
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

/// Successful outcome of one logical dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub request_id: RequestId,
    pub agent: AgentName,
    pub ok: bool,
    pub output: Value,
    pub state_hash: String,
}

impl Reply {
    pub fn from_agent(request_id: RequestId, agent: AgentName, reply: AgentReply) -> Self {
        let state_hash = reply
            .state_hash
            .filter(|h| !h.is_empty())
            .unwrap_or_else(|| state_hash(&reply.output));
        Self {
            request_id,
            agent,
            ok: reply.ok,
            output: reply.output,
            state_hash,
        }
    }
}

/// Response body sent back to the caller for every outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub ok: bool,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    /// Whole seconds, rounded up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl From<Reply> for ResponseEnvelope {
    fn from(reply: Reply) -> Self {
        Self {
            ok: reply.ok,
            agent: reply.agent.to_string(),
            request_id: Some(reply.request_id.to_string()),
            state_hash: Some(reply.state_hash),
            output: Some(reply.output),
            error: None,
        }
    }
}

/// SHA-256 of the canonical (key-sorted, compact) JSON encoding.
pub fn state_hash(value: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(value, &mut canonical);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
