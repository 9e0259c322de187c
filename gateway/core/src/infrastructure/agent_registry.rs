// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Agent Registry
//!
//! Known agents and their addresses. Readers take an `Arc` to the current
//! immutable [`RegistrySnapshot`] once per request; a refresh builds a new
//! snapshot and swaps the pointer, so no request ever sees a half-updated
//! agent list.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::agent::{AgentDescriptor, AgentName};
use crate::domain::error::GatewayError;
use crate::domain::gateway_config::GatewayConfigManifest;

#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    agents: BTreeMap<AgentName, AgentDescriptor>,
    version: u64,
    loaded_at: DateTime<Utc>,
}

impl RegistrySnapshot {
    fn new(agents: Vec<AgentDescriptor>, version: u64) -> Self {
        Self {
            agents: agents
                .into_iter()
                .map(|agent| (agent.name.clone(), agent))
                .collect(),
            version,
            loaded_at: Utc::now(),
        }
    }

    pub fn get(&self, name: &AgentName) -> Option<&AgentDescriptor> {
        self.agents.get(name)
    }

    /// Look up an agent that can be dispatched to.
    pub fn resolve(&self, name: &AgentName) -> Result<&AgentDescriptor, GatewayError> {
        match self.agents.get(name) {
            Some(agent) if agent.enabled => Ok(agent),
            Some(_) => Err(GatewayError::AgentDisabled(name.clone())),
            None => Err(GatewayError::UnknownAgent(name.clone())),
        }
    }

    pub fn agents(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.values()
    }

    pub fn names(&self) -> Vec<AgentName> {
        self.agents.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    fn same_agents(&self, agents: &[AgentDescriptor]) -> bool {
        agents.len() == self.agents.len()
            && agents
                .iter()
                .all(|agent| self.agents.get(&agent.name) == Some(agent))
    }
}

pub struct AgentRegistry {
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl AgentRegistry {
    pub fn new(agents: Vec<AgentDescriptor>) -> Self {
        Self {
            current: RwLock::new(Arc::new(RegistrySnapshot::new(agents, 1))),
        }
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Swap in a new agent list. Returns `false` when nothing changed.
    pub fn replace(&self, agents: Vec<AgentDescriptor>) -> bool {
        let mut current = self.current.write();
        if current.same_agents(&agents) {
            return false;
        }
        let next = RegistrySnapshot::new(agents, current.version + 1);
        info!(
            version = next.version,
            agents = next.len(),
            "Agent registry updated"
        );
        *current = Arc::new(next);
        true
    }

    /// Re-read `path` every `interval` and swap the snapshot when the agent
    /// list changed. Read or validation errors keep the current snapshot.
    pub fn spawn_refresh_task(
        self: &Arc<Self>,
        path: PathBuf,
        interval: Duration,
    ) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let path = path.clone();
                let loaded = tokio::task::spawn_blocking(move || load_agents(&path)).await;
                match loaded {
                    Ok(Ok(agents)) => {
                        if !registry.replace(agents) {
                            debug!("Agent registry unchanged");
                        }
                    }
                    Ok(Err(e)) => warn!("Agent registry refresh failed: {:#}", e),
                    Err(e) => warn!("Agent registry refresh task panicked: {}", e),
                }
            }
        })
    }
}

fn load_agents(path: &Path) -> anyhow::Result<Vec<AgentDescriptor>> {
    let mut manifest = GatewayConfigManifest::from_yaml_file(path)?;
    manifest.apply_env_overrides();
    manifest.validate()?;
    Ok(manifest.spec.agents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::gateway_config::default_agents;

    #[test]
    fn test_resolve_known_unknown_and_disabled() {
        let mut agents = default_agents();
        agents[1].enabled = false;
        let registry = AgentRegistry::new(agents);
        let snapshot = registry.snapshot();

        assert_eq!(
            snapshot.resolve(&AgentName::new("osteon")).unwrap().url,
            "http://osteon:8001"
        );
        assert!(matches!(
            snapshot.resolve(&AgentName::new("myocyte")),
            Err(GatewayError::AgentDisabled(_))
        ));
        assert!(matches!(
            snapshot.resolve(&AgentName::new("ghost")),
            Err(GatewayError::UnknownAgent(_))
        ));
    }

    #[test]
    fn test_replace_swaps_without_disturbing_held_snapshots() {
        let registry = AgentRegistry::new(default_agents());
        let before = registry.snapshot();

        assert!(!registry.replace(default_agents()));
        assert_eq!(registry.snapshot().version(), 1);

        let agents = vec![AgentDescriptor::new("osteon", "http://10.0.0.1:8001")];
        assert!(registry.replace(agents));

        let after = registry.snapshot();
        assert_eq!(after.version(), 2);
        assert_eq!(after.len(), 1);
        // A request that already took the old snapshot keeps a consistent view.
        assert_eq!(before.len(), 6);
        assert_eq!(
            before.get(&AgentName::new("osteon")).unwrap().url,
            "http://osteon:8001"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_task_picks_up_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gateway.yaml");
        let write = |url: &str| {
            let yaml = format!(
                "apiVersion: mesh-gateway/v1\nkind: GatewayConfig\nmetadata:\n  name: t\nspec:\n  agents:\n    - name: nucleus\n      url: {}\n",
                url
            );
            std::fs::write(&path, yaml).unwrap();
        };
        write("http://a:1");

        let registry = Arc::new(AgentRegistry::new(load_agents(&path).unwrap()));
        let task = registry.spawn_refresh_task(path.clone(), Duration::from_secs(5));

        write("http://b:2");
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_secs(1)).await;
            if registry.snapshot().version() > 1 {
                break;
            }
        }
        task.abort();

        let snapshot = registry.snapshot();
        assert_eq!(
            snapshot.get(&AgentName::new("nucleus")).unwrap().url,
            "http://b:2"
        );
    }
}
