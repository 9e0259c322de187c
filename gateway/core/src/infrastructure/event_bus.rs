// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
// Event Bus Implementation - Pub/Sub for Audit Events
//
// In-memory audit stream on a tokio broadcast channel. The gateway publishes
// every decision point here; an external collector (or the tests) subscribes.
// Events are lost on restart and slow receivers lag rather than block the
// request path.

use crate::domain::events::{AuditEvent, AuditSink};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Event bus for publishing and subscribing to audit events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<AuditEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity.
    /// Receivers more than `capacity` events behind lose the oldest ones.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Publish an audit event to all subscribers
    pub fn publish(&self, event: AuditEvent) {
        debug!(
            event_type = event.event_type.as_str(),
            agent = event.agent.as_ref().map(|a| a.as_str()).unwrap_or(""),
            outcome = %event.outcome,
            "Audit event"
        );

        let receiver_count = self.sender.send(event).unwrap_or(0);
        if receiver_count == 0 {
            debug!("No subscribers listening to audit events");
        }
    }

    /// Subscribe to all audit events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

}

impl AuditSink for EventBus {
    fn emit(&self, event: AuditEvent) {
        self.publish(event);
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Audit receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all audit events
pub struct EventReceiver {
    receiver: broadcast::Receiver<AuditEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<AuditEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<AuditEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Audit receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Everything currently buffered, stopping at the first empty read.
    pub fn drain(&mut self) -> Vec<AuditEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(event) => events.push(event),
                Err(EventBusError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}
