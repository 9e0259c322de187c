// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Infrastructure layer
//!
//! Shared-state owners and adapters: per-key limiter store, per-agent breaker
//! and bulkhead registries, the agent registry, the HTTP agent transport,
//! the audit event bus and metrics.

pub mod agent_registry;
pub mod breaker_registry;
pub mod bulkhead;
pub mod event_bus;
pub mod http_agent_client;
pub mod metrics;
pub mod rate_limiter;
