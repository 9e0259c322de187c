// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer
//!
//! Pure types and state machines. Nothing in here performs I/O or owns shared
//! state; infrastructure adapters wrap these types behind their own locks.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Envelope model, resilience algorithms, error taxonomy, config

pub mod agent;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod deadline;
pub mod envelope;
pub mod error;
pub mod events;
pub mod gateway_config;
pub mod rate_limit;
pub mod retry;
