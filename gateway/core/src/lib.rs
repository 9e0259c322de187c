// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mesh Gateway core
//!
//! Admission control, routing and failure isolation for the agent mesh.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Rate limiting, circuit breaking, bulkheads and retries in
//!   front of independently deployed backend agents

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
