// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Mesh gateway CLI library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Process wiring for the `mesh` binary: server bootstrap and
//!   the operator commands

pub mod commands;
pub mod server;
