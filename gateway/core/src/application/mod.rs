// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Application layer
//!
//! Use cases built on the domain and infrastructure layers: the dispatch
//! pipeline, the retry loop it runs per agent, and health reporting.

pub mod dispatcher;
pub mod health;
pub mod retry_executor;
pub mod services;
