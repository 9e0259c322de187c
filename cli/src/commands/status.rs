// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `mesh status` - query a running gateway
//!
//! Reads `/health` and `/ready` and prints the per-agent breaker and
//! bulkhead state.

use anyhow::Result;
use colored::Colorize;
use reqwest::Client;
use std::time::Duration;

use mesh_gateway_core::application::health::{HealthStatus, LivenessReport, ReadinessReport};
use mesh_gateway_core::domain::circuit_breaker::BreakerState;

#[derive(Debug, thiserror::Error)]
pub enum StatusError {
    #[error("gateway at {url} is not reachable: {reason}")]
    Unreachable { url: String, reason: String },

    #[error("unexpected response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("gateway is {0}")]
    NotReady(&'static str),
}

/// Snapshot of a running gateway.
#[derive(Debug)]
pub struct GatewayStatus {
    pub liveness: LivenessReport,
    pub readiness: ReadinessReport,
}

#[derive(Debug, Clone)]
pub struct StatusClient {
    client: Client,
    base_url: String,
}

impl StatusClient {
    pub fn new(host: &str, port: u16) -> Result<Self, StatusError> {
        let base_url = if host.starts_with("http://") || host.starts_with("https://") {
            format!("{}:{}", host, port)
        } else {
            format!("http://{}:{}", host, port)
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StatusError::Unreachable {
                url: base_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { client, base_url })
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }

    pub async fn fetch(&self) -> Result<GatewayStatus, StatusError> {
        Ok(GatewayStatus {
            liveness: self.get_json("/health").await?,
            readiness: self.get_json("/ready").await?,
        })
    }

    /// `/ready` answers 503 with a full report, so the body is decoded
    /// regardless of status.
    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, StatusError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| StatusError::Unreachable {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        response
            .json::<T>()
            .await
            .map_err(|e| StatusError::InvalidResponse {
                url,
                reason: e.to_string(),
            })
    }
}

pub async fn run(host: &str, port: u16, json: bool) -> Result<()> {
    let status = StatusClient::new(host, port)?.fetch().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status.readiness)?);
    } else {
        print_status(&status);
    }

    if status.readiness.is_ready() {
        Ok(())
    } else {
        Err(StatusError::NotReady(status.readiness.status.as_str()).into())
    }
}

fn print_status(status: &GatewayStatus) {
    let live = &status.liveness;
    println!(
        "{} {} (uptime {}s, {} agents)",
        live.service.bold(),
        live.version,
        live.uptime_seconds,
        live.agents
    );
    println!("Readiness: {}", paint(status.readiness.status));
    println!();

    if status.readiness.agents.is_empty() {
        println!("{}", "No enabled agents.".yellow());
        return;
    }

    println!(
        "  {:<16} {:<10} {:<10} {:>9} {:>7}",
        "AGENT".bold(),
        "STATUS".bold(),
        "BREAKER".bold(),
        "IN-FLIGHT".bold(),
        "QUEUED".bold()
    );
    for agent in &status.readiness.agents {
        let breaker = match agent.breaker {
            BreakerState::Closed => agent.breaker.as_str().green(),
            BreakerState::HalfOpen => agent.breaker.as_str().yellow(),
            BreakerState::Open => agent.breaker.as_str().red(),
        };
        println!(
            "  {:<16} {:<10} {:<10} {:>9} {:>7}",
            agent.name,
            paint(agent.status),
            breaker,
            agent.in_flight,
            agent.queued
        );
    }
}

fn paint(status: HealthStatus) -> colored::ColoredString {
    match status {
        HealthStatus::Healthy => status.as_str().green(),
        HealthStatus::Degraded | HealthStatus::Starting => status.as_str().yellow(),
        HealthStatus::Unhealthy => status.as_str().red(),
    }
}
