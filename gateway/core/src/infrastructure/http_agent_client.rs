// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// HTTP Agent Client
//
// Anti-Corruption Layer for the backend agents' HTTP API. Each agent exposes
// `POST {url}/{intent}` taking the wire message and answering with an
// `AgentReply`. Transport failures are translated into `AgentCallError` so
// the retry loop never sees a reqwest type.

use crate::domain::agent::{AgentCallError, AgentDescriptor, AgentTransport};
use crate::domain::envelope::{AgentReply, Envelope};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const ATTEMPT_HEADER: &str = "X-Attempt";

/// Longest upstream error body kept in an `AgentCallError`.
const MAX_ERROR_BODY: usize = 512;

/// Largest successful agent reply accepted.
pub const MAX_REPLY_BYTES: usize = 4 * 1024 * 1024;

pub struct HttpAgentClient {
    client: reqwest::Client,
    default_timeout: Duration,
    max_reply_bytes: usize,
}

impl HttpAgentClient {
    pub fn new(default_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build agent HTTP client: {}", e))?;
        Ok(Self::with_client(client, default_timeout))
    }

    pub fn with_client(client: reqwest::Client, default_timeout: Duration) -> Self {
        Self {
            client,
            default_timeout,
            max_reply_bytes: MAX_REPLY_BYTES,
        }
    }

    pub fn with_max_reply_bytes(mut self, max_reply_bytes: usize) -> Self {
        self.max_reply_bytes = max_reply_bytes;
        self
    }

    pub fn timeout_for(&self, agent: &AgentDescriptor) -> Duration {
        agent.timeout.unwrap_or(self.default_timeout)
    }

    fn translate(&self, error: reqwest::Error, timeout: Duration) -> AgentCallError {
        if error.is_timeout() {
            AgentCallError::Timeout(timeout)
        } else if error.is_connect() {
            AgentCallError::Connect(error.to_string())
        } else if error.is_decode() || error.is_body() {
            AgentCallError::InvalidResponse(error.to_string())
        } else {
            AgentCallError::Connect(error.to_string())
        }
    }
}

#[async_trait]
impl AgentTransport for HttpAgentClient {
    async fn call(
        &self,
        agent: &AgentDescriptor,
        envelope: &Envelope,
        attempt: u32,
    ) -> Result<AgentReply, AgentCallError> {
        let url = agent.endpoint(envelope.intent());
        let timeout = self.timeout_for(agent);
        let request_id = envelope.request_id().as_str();

        debug!(agent = %agent.name, url = %url, attempt, "Calling agent");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .header(REQUEST_ID_HEADER, request_id)
            .header(IDEMPOTENCY_KEY_HEADER, request_id)
            .header(ATTEMPT_HEADER, attempt.to_string())
            .json(&envelope.wire_message())
            .send()
            .await
            .map_err(|e| self.translate(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = read_limited(response, MAX_ERROR_BODY)
                .await
                .map(|(bytes, _)| String::from_utf8_lossy(&bytes).into_owned())
                .unwrap_or_default();
            return Err(AgentCallError::from_status(status.as_u16(), body));
        }

        let too_large = || {
            AgentCallError::InvalidResponse(format!(
                "Agent reply exceeds {} bytes",
                self.max_reply_bytes
            ))
        };
        if response
            .content_length()
            .is_some_and(|len| len > self.max_reply_bytes as u64)
        {
            return Err(too_large());
        }
        let (bytes, truncated) = read_limited(response, self.max_reply_bytes)
            .await
            .map_err(|e| self.translate(e, timeout))?;
        if truncated {
            return Err(too_large());
        }
        serde_json::from_slice::<AgentReply>(&bytes)
            .map_err(|e| AgentCallError::InvalidResponse(format!("Failed to parse agent reply: {}", e)))
    }
}

/// Read at most `limit` bytes of the body. The flag is set when the body
/// was longer.
async fn read_limited(
    mut response: reqwest::Response,
    limit: usize,
) -> Result<(Vec<u8>, bool), reqwest::Error> {
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - buf.len();
        if chunk.len() > room {
            buf.extend_from_slice(&chunk[..room]);
            return Ok((buf, true));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok((buf, false))
}
