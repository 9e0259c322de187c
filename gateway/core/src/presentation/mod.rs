// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Presentation layer
//!
//! # Architecture
//!
//! - **Layer:** Presentation Layer
//! - **Purpose:** Expose the dispatcher, health and metrics over HTTP

pub mod api;
