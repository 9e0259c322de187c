// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! `mesh serve`

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::info;

use crate::server::start_server;
use mesh_gateway_core::domain::gateway_config::{GatewayConfigManifest, NetworkConfig};

pub async fn run(
    manifest: GatewayConfigManifest,
    config_override: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    let bind = resolve_bind(&manifest.spec.network, host, port).await?;

    // Registry refresh re-reads whichever file the configuration came from.
    let config_path = config_override.or_else(GatewayConfigManifest::discover_config);
    if let Some(path) = &config_path {
        info!("Using configuration file {:?}", path);
    }

    start_server(manifest, bind, config_path).await
}

/// Command-line host and port take precedence over `spec.network`.
pub async fn resolve_bind(
    network: &NetworkConfig,
    host: Option<String>,
    port: Option<u16>,
) -> Result<SocketAddr> {
    let host = host.unwrap_or_else(|| network.bind_address.clone());
    let port = port.unwrap_or(network.port);
    let target = format!("{}:{}", host, port);

    let addr = tokio::net::lookup_host(&target)
        .await
        .with_context(|| format!("Failed to resolve bind address {}", target))?
        .next()
        .with_context(|| format!("No address found for {}", target));
    addr
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_flags_override_network_config() {
        let network = NetworkConfig {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        };

        let defaults = resolve_bind(&network, None, None).await.unwrap();
        assert_eq!(defaults, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());

        let overridden = resolve_bind(&network, Some("127.0.0.1".into()), Some(9090))
            .await
            .unwrap();
        assert_eq!(overridden, "127.0.0.1:9090".parse::<SocketAddr>().unwrap());
    }
}
