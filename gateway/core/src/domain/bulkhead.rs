// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bulkhead value types. The pools live in `infrastructure::bulkhead`.

use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkheadPolicy {
    pub max_concurrent: u32,
    pub queue_capacity: u32,
    pub queue_wait_timeout: Duration,
}

/// How a slot was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Slot,
    QueuedThenSlot { waited: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BulkheadRejection {
    #[error("all {max_concurrent} slots busy and {queue_capacity} queued callers waiting")]
    Saturated {
        max_concurrent: u32,
        queue_capacity: u32,
    },

    #[error("no slot freed up within {0:?}")]
    QueueTimeout(Duration),

    #[error("caller deadline passed while queued")]
    DeadlineExceeded,
}

impl BulkheadRejection {
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Saturated { .. } => "saturated",
            Self::QueueTimeout(_) => "queue_timeout",
            Self::DeadlineExceeded => "deadline",
        }
    }
}

/// Point-in-time counters for one agent's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BulkheadSnapshot {
    pub max_concurrent: u32,
    pub in_flight: u32,
    pub queue_capacity: u32,
    pub queued: u32,
}

impl BulkheadSnapshot {
    pub fn is_saturated(&self) -> bool {
        self.in_flight >= self.max_concurrent && self.queued >= self.queue_capacity
    }
}
