// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bulkhead
//!
//! Per-agent concurrency pool with a bounded FIFO wait queue.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Keep one slow agent from consuming the gateway's capacity
//!
//! A tokio [`Semaphore`] holds `max_concurrent` permits and hands them out in
//! arrival order. The queue length is an atomic counter that is only ever
//! incremented by compare-and-swap below `queue_capacity`, so in-flight plus
//! queued callers never exceed `max_concurrent + queue_capacity`.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::agent::AgentName;
use crate::domain::bulkhead::{Admission, BulkheadPolicy, BulkheadRejection, BulkheadSnapshot};
use crate::domain::deadline::deadline_after;
use crate::infrastructure::metrics;

/// Concurrency pool for a single agent.
pub struct Bulkhead {
    agent: AgentName,
    policy: BulkheadPolicy,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<AtomicU32>,
    queued: AtomicU32,
}

/// A held slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct Slot {
    admission: Admission,
    in_flight: Arc<AtomicU32>,
    _permit: OwnedSemaphorePermit,
}

impl Slot {
    pub fn admission(&self) -> Admission {
        self.admission
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Decrements the queue counter however the wait ends.
struct QueueTicket<'a>(&'a AtomicU32);

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Bulkhead {
    pub fn new(agent: AgentName, policy: BulkheadPolicy) -> Self {
        Self {
            agent,
            semaphore: Arc::new(Semaphore::new(policy.max_concurrent as usize)),
            policy,
            in_flight: Arc::new(AtomicU32::new(0)),
            queued: AtomicU32::new(0),
        }
    }

    pub fn policy(&self) -> &BulkheadPolicy {
        &self.policy
    }

    /// Take a slot now, wait in the queue for one, or be rejected.
    /// `deadline` is the caller's; the wait ends at whichever of it and
    /// `queue_wait_timeout` comes first.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<Slot, BulkheadRejection> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(self.grant(permit, Admission::Slot)),
            Err(TryAcquireError::NoPermits) => {}
            Err(TryAcquireError::Closed) => return Err(self.saturated()),
        }

        let ticket = self.enqueue().ok_or_else(|| self.saturated())?;
        metrics::record_bulkhead(&self.agent, &self.snapshot());

        let started = Instant::now();
        let queue_limit = deadline_after(started, self.policy.queue_wait_timeout);
        let (wait_until, deadline_bound) = match deadline {
            Some(deadline) if deadline < queue_limit => (deadline, true),
            _ => (queue_limit, false),
        };

        let acquired = tokio::time::timeout_at(
            wait_until,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await;
        drop(ticket);

        match acquired {
            Ok(Ok(permit)) => {
                let waited = started.elapsed();
                debug!(agent = %self.agent, waited_ms = waited.as_millis() as u64, "Bulkhead slot granted after queueing");
                Ok(self.grant(permit, Admission::QueuedThenSlot { waited }))
            }
            Ok(Err(_closed)) => Err(self.saturated()),
            Err(_elapsed) => {
                metrics::record_bulkhead(&self.agent, &self.snapshot());
                if deadline_bound {
                    Err(BulkheadRejection::DeadlineExceeded)
                } else {
                    Err(BulkheadRejection::QueueTimeout(self.policy.queue_wait_timeout))
                }
            }
        }
    }

    /// Release a slot. Equivalent to dropping it.
    pub fn release(&self, slot: Slot) {
        drop(slot);
        metrics::record_bulkhead(&self.agent, &self.snapshot());
    }

    pub fn snapshot(&self) -> BulkheadSnapshot {
        BulkheadSnapshot {
            max_concurrent: self.policy.max_concurrent,
            in_flight: self.in_flight.load(Ordering::Acquire),
            queue_capacity: self.policy.queue_capacity,
            queued: self.queued.load(Ordering::Acquire),
        }
    }

    fn enqueue(&self) -> Option<QueueTicket<'_>> {
        let capacity = self.policy.queue_capacity;
        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < capacity).then_some(queued + 1)
            })
            .ok()
            .map(|_| QueueTicket(&self.queued))
    }

    fn grant(&self, permit: OwnedSemaphorePermit, admission: Admission) -> Slot {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let slot = Slot {
            admission,
            in_flight: Arc::clone(&self.in_flight),
            _permit: permit,
        };
        metrics::record_bulkhead(&self.agent, &self.snapshot());
        slot
    }

    fn saturated(&self) -> BulkheadRejection {
        BulkheadRejection::Saturated {
            max_concurrent: self.policy.max_concurrent,
            queue_capacity: self.policy.queue_capacity,
        }
    }
}

/// All agent pools, created lazily with the shared policy.
pub struct BulkheadRegistry {
    policy: BulkheadPolicy,
    pools: DashMap<AgentName, Arc<Bulkhead>>,
}

impl BulkheadRegistry {
    pub fn new(policy: BulkheadPolicy) -> Self {
        Self {
            policy,
            pools: DashMap::new(),
        }
    }

    pub fn get(&self, agent: &AgentName) -> Arc<Bulkhead> {
        if let Some(pool) = self.pools.get(agent) {
            return pool.value().clone();
        }
        self.pools
            .entry(agent.clone())
            .or_insert_with(|| Arc::new(Bulkhead::new(agent.clone(), self.policy)))
            .value()
            .clone()
    }

    pub async fn acquire(
        &self,
        agent: &AgentName,
        deadline: Option<Instant>,
    ) -> Result<Slot, BulkheadRejection> {
        let pool = self.get(agent);
        let result = pool.acquire(deadline).await;
        if let Err(rejection) = &result {
            metrics::record_bulkhead_rejection(agent, rejection.reason());
        }
        result
    }

    pub fn release(&self, agent: &AgentName, slot: Slot) {
        self.get(agent).release(slot);
    }

    pub fn snapshot(&self, agent: &AgentName) -> BulkheadSnapshot {
        match self.pools.get(agent) {
            Some(pool) => pool.snapshot(),
            None => BulkheadSnapshot {
                max_concurrent: self.policy.max_concurrent,
                in_flight: 0,
                queue_capacity: self.policy.queue_capacity,
                queued: 0,
            },
        }
    }
}
