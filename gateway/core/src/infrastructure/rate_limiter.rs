// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Rate Limiter
//!
//! Keyed admission control in front of the dispatcher.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Own per-key limiter state and decide admission per scope
//!
//! State lives behind the [`RateLimitStore`] seam. The shipped
//! [`InMemoryRateLimitStore`] keeps one `Mutex<KeyLimiter>` per key inside a
//! `DashMap`, so consumption within a key is serialised while different keys
//! never contend. State is per process and resets on restart; a store shared
//! between replicas would implement the same trait.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::domain::deadline::deadline_after;
use crate::domain::envelope::RequestId;
use crate::domain::events::{AuditEvent, AuditEventType, AuditSink};
use crate::domain::gateway_config::RateLimitConfig;
use crate::domain::rate_limit::{Decision, KeyLimiter, RateLimitPolicy, RateLimitScope, TokenState};
use crate::infrastructure::metrics;

/// Storage for per-key limiter state.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Consume `cost` for `key`, creating its state on first use.
    async fn admit(&self, key: &str, policy: &RateLimitPolicy, cost: u32) -> Decision;

    async fn state(&self, key: &str, policy: &RateLimitPolicy) -> Option<TokenState>;

    /// Drop keys that have not been touched for `idle_ttl`. Returns how many
    /// were removed.
    async fn evict_idle(&self, idle_ttl: Duration) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct InMemoryRateLimitStore {
    entries: DashMap<String, Arc<Mutex<KeyLimiter>>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str, policy: &RateLimitPolicy, now: Instant) -> Arc<Mutex<KeyLimiter>> {
        if let Some(existing) = self.entries.get(key) {
            return existing.value().clone();
        }
        self.entries
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(KeyLimiter::new(policy, now))))
            .value()
            .clone()
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn admit(&self, key: &str, policy: &RateLimitPolicy, cost: u32) -> Decision {
        let now = Instant::now();
        let limiter = self.entry(key, policy, now);
        let mut guard = limiter.lock();
        guard.admit(policy, cost, now)
    }

    async fn state(&self, key: &str, policy: &RateLimitPolicy) -> Option<TokenState> {
        let limiter = self.entries.get(key)?.value().clone();
        let guard = limiter.lock();
        Some(guard.state(policy, Instant::now()))
    }

    async fn evict_idle(&self, idle_ttl: Duration) -> usize {
        if idle_ttl.is_zero() {
            return 0;
        }
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, limiter| {
            // A request holding a clone is about to use this entry.
            if Arc::strong_count(limiter) > 1 {
                return true;
            }
            now.saturating_duration_since(limiter.lock().last_seen()) < idle_ttl
        });
        before.saturating_sub(self.entries.len())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Raw client identifiers extracted from request metadata. Never logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    pub ip: Option<String>,
    pub user_id: Option<String>,
    pub api_key: Option<String>,
}

impl ClientIdentity {
    fn identifier(&self, scope: RateLimitScope) -> Option<&str> {
        let value = match scope {
            RateLimitScope::Ip => self.ip.as_deref(),
            RateLimitScope::User => self.user_id.as_deref(),
            RateLimitScope::ApiKey => self.api_key.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// `"{scope}:{first 16 hex chars of sha256(identifier)}"`
pub fn hashed_key(scope: RateLimitScope, identifier: &str) -> String {
    let digest = hex::encode(Sha256::digest(identifier.as_bytes()));
    format!("{}:{}", scope.as_str(), &digest[..16])
}

#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Excluded path or identifier, or limiting disabled.
    Bypassed,
    Allowed { limit: u32, remaining: u32 },
    Denied {
        scope: RateLimitScope,
        key: String,
        limit: u32,
        retry_after: Duration,
    },
}

pub struct AdmissionController {
    config: RateLimitConfig,
    policy: RateLimitPolicy,
    store: Arc<dyn RateLimitStore>,
    audit: Arc<dyn AuditSink>,
}

impl AdmissionController {
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            policy: config.policy(),
            config,
            store,
            audit,
        }
    }

    pub fn in_memory(config: RateLimitConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self::new(config, Arc::new(InMemoryRateLimitStore::new()), audit)
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    fn scopes(&self) -> impl Iterator<Item = RateLimitScope> + '_ {
        [
            (RateLimitScope::Ip, self.config.per_ip),
            (RateLimitScope::User, self.config.per_user),
            (RateLimitScope::ApiKey, self.config.per_api_key),
        ]
        .into_iter()
        .filter_map(|(scope, enabled)| enabled.then_some(scope))
    }

    fn is_exempt(&self, path: &str, identity: &ClientIdentity) -> bool {
        if !self.config.enabled || self.config.is_excluded(path) {
            return true;
        }
        [&identity.ip, &identity.user_id, &identity.api_key]
            .into_iter()
            .flatten()
            .any(|id| self.config.exclude_identifiers.iter().any(|ex| ex == id))
    }

    /// Check every enabled scope in order (ip, user, api key). The first
    /// denial ends the check. `deadline` bounds the optional wait configured
    /// with `max_wait`.
    pub async fn admit(
        &self,
        path: &str,
        identity: &ClientIdentity,
        request_id: Option<&RequestId>,
        deadline: Option<Instant>,
    ) -> Admission {
        if self.is_exempt(path, identity) {
            return Admission::Bypassed;
        }

        let limit = self.policy.capacity;
        let mut remaining: Option<u32> = None;

        for scope in self.scopes() {
            let Some(identifier) = identity.identifier(scope) else {
                continue;
            };
            let key = hashed_key(scope, identifier);

            let mut decision = self.store.admit(&key, &self.policy, 1).await;
            if let Decision::Denied { retry_after } = decision {
                if self.can_wait(retry_after, deadline) {
                    debug!(key = %key, wait_ms = retry_after.as_millis() as u64, "Waiting for rate limit capacity");
                    tokio::time::sleep(retry_after).await;
                    decision = self.store.admit(&key, &self.policy, 1).await;
                }
            }

            match decision {
                Decision::Allowed { remaining: left } => {
                    metrics::record_rate_limit(scope, true, Some(left));
                    remaining = Some(remaining.map_or(left, |r| r.min(left)));
                }
                Decision::Denied { retry_after } => {
                    warn!("Rate limit exceeded for {}", key);
                    metrics::record_rate_limit(scope, false, Some(0));
                    let mut event = AuditEvent::new(AuditEventType::RateLimitHit, "denied")
                        .with_key(key.clone());
                    if let Some(id) = request_id {
                        event = event.with_request_id(id);
                    }
                    self.audit.emit(event);
                    return Admission::Denied {
                        scope,
                        key,
                        limit,
                        retry_after,
                    };
                }
            }
        }

        match remaining {
            Some(remaining) => Admission::Allowed { limit, remaining },
            // No identifier for any enabled scope.
            None => Admission::Bypassed,
        }
    }

    fn can_wait(&self, retry_after: Duration, deadline: Option<Instant>) -> bool {
        if self.config.max_wait.is_zero() || retry_after > self.config.max_wait {
            return false;
        }
        match deadline {
            Some(deadline) => deadline_after(Instant::now(), retry_after) < deadline,
            None => true,
        }
    }

    pub async fn evict_idle(&self) -> usize {
        let removed = self.store.evict_idle(self.config.effective_idle_ttl()).await;
        if removed > 0 {
            debug!(removed, remaining = self.store.len(), "Evicted idle rate limit keys");
        }
        removed
    }

    /// Periodically evict idle keys until the returned handle is aborted.
    pub fn spawn_eviction_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                controller.evict_idle().await;
            }
        })
    }
}
