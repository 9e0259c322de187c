// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Gateway HTTP server bootstrap
//!
//! Wires the core services to the HTTP agent client, the Prometheus
//! recorder and the audit log, starts the background maintenance tasks and
//! serves the router until a shutdown signal arrives.

use anyhow::{Context, Result};
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use mesh_gateway_core::{
    application::services::GatewayServices,
    domain::gateway_config::{GatewayConfigManifest, GatewayConfigSpec},
    infrastructure::{
        event_bus::{EventBus, EventBusError},
        http_agent_client::HttpAgentClient,
        metrics::MetricsHandle,
    },
    presentation::api::{app, AppState},
};

/// Audit events buffered per subscriber before the log consumer lags.
const AUDIT_CHANNEL_CAPACITY: usize = 4096;

/// Router plus the services behind it and the tasks that keep them tidy.
pub struct Gateway {
    pub router: Router,
    pub services: GatewayServices,
    pub event_bus: EventBus,
    background: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Build the services for `spec`. `config_path` enables registry refresh
    /// when `spec.registry.refresh_interval` is set.
    pub fn build(
        spec: &GatewayConfigSpec,
        metrics: Option<MetricsHandle>,
        config_path: Option<PathBuf>,
    ) -> Result<Self> {
        let transport = HttpAgentClient::new(spec.dispatch.agent_timeout)
            .context("Failed to initialize agent client")?;
        let event_bus = EventBus::new(AUDIT_CHANNEL_CAPACITY);
        let services =
            GatewayServices::build(spec, Arc::new(transport), Arc::new(event_bus.clone()));

        let mut background = vec![spawn_audit_log(&event_bus)];
        if spec.rate_limit.enabled {
            let every = spec.rate_limit.window.max(Duration::from_secs(1));
            background.push(services.admission.spawn_eviction_task(every));
        }
        match (spec.registry.refresh_interval, config_path) {
            (Some(interval), Some(path)) => {
                info!("Refreshing agent registry from {:?} every {:?}", path, interval);
                background.push(services.registry.spawn_refresh_task(path, interval));
            }
            (Some(_), None) => {
                warn!("registry.refresh_interval is set but no configuration file was loaded");
            }
            _ => {}
        }

        let state = Arc::new(AppState {
            services: services.clone(),
            metrics,
        });
        let router = app(state, &spec.observability.metrics.path);

        Ok(Self {
            router,
            services,
            event_bus,
            background,
        })
    }

    /// Serve on `listener` until `shutdown` resolves, then stop the
    /// background tasks.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let result = axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .context("HTTP server failed");

        for task in self.background {
            task.abort();
        }
        result
    }
}

pub async fn start_server(
    manifest: GatewayConfigManifest,
    bind: SocketAddr,
    config_path: Option<PathBuf>,
) -> Result<()> {
    manifest
        .validate()
        .context("Configuration validation failed")?;
    let spec = &manifest.spec;

    info!(
        "Configuration loaded: name={} agents={}",
        manifest.metadata.name,
        spec.agents.len()
    );

    let metrics = if spec.observability.metrics.enabled {
        Some(MetricsHandle::install()?)
    } else {
        None
    };

    let gateway = Gateway::build(spec, metrics, config_path)?;

    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {}", bind))?;

    info!("Gateway listening on {}", bind);

    gateway.serve(listener, shutdown_signal()).await?;

    info!("Gateway shut down");

    Ok(())
}

/// Write every audit event to the log under the `audit` target.
fn spawn_audit_log(bus: &EventBus) -> JoinHandle<()> {
    let mut receiver = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let agent = event.agent.as_ref().map(|a| a.as_str()).unwrap_or("-");
                    let request_id = event
                        .request_id
                        .as_ref()
                        .map(|r| r.as_str())
                        .unwrap_or("-");
                    info!(
                        target: "audit",
                        event = event.event_type.as_str(),
                        outcome = %event.outcome,
                        agent,
                        request_id,
                        key = event.key.as_deref().unwrap_or("-"),
                        attempt = event.attempt.as_ref().map(|a| a.attempt_number).unwrap_or(0),
                    );
                }
                Err(EventBusError::Lagged(skipped)) => {
                    warn!("Audit log fell behind, {} events dropped", skipped);
                }
                Err(EventBusError::Closed) => {
                    debug!("Audit channel closed");
                    break;
                }
                Err(e) => {
                    error!("Audit log receive failed: {}", e);
                    break;
                }
            }
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mesh_gateway_core::domain::agent::AgentDescriptor;
    use mesh_gateway_core::domain::events::AuditEventType;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_serves_dispatch_and_stops_on_shutdown() {
        let mut agent = mockito::Server::new_async().await;
        let mock = agent
            .mock("POST", "/heartbeat")
            .with_status(200)
            .with_body(r#"{"output":{"beat":1}}"#)
            .create_async()
            .await;

        let mut spec = GatewayConfigSpec::default();
        spec.agents = vec![AgentDescriptor::new("circadian", agent.url())];
        let gateway = Gateway::build(&spec, None, None).unwrap();
        let mut audit = gateway.event_bus.subscribe();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(gateway.serve(listener, async move {
            let _ = stopped.await;
        }));

        let response = reqwest::Client::new()
            .post(format!("http://{}/circadian/heartbeat", addr))
            .json(&json!({"origin": "cron"}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["output"], json!({"beat": 1}));
        mock.assert_async().await;

        let completed = audit
            .drain()
            .into_iter()
            .any(|e| e.event_type == AuditEventType::DispatchCompleted);
        assert!(completed);

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_metrics_route_follows_config() {
        let mut spec = GatewayConfigSpec::default();
        spec.observability.metrics.path = "/internal/metrics".to_string();
        let gateway = Gateway::build(&spec, Some(MetricsHandle::detached()), None).unwrap();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();
        let server = tokio::spawn(gateway.serve(listener, async move {
            let _ = stopped.await;
        }));

        let client = reqwest::Client::new();
        let moved = client
            .get(format!("http://{}/internal/metrics", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(moved.status(), 200);
        let old = client
            .get(format!("http://{}/metrics", addr))
            .send()
            .await
            .unwrap();
        assert_ne!(old.status(), 200);

        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
