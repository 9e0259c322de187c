// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Mesh Gateway CLI
//!
//! The `mesh` binary runs the gateway in front of the backend agents and
//! inspects a running instance.
//!
//! ## Commands
//!
//! - `mesh serve` - Run the gateway until Ctrl+C or SIGTERM
//! - `mesh status` - Show readiness and per-agent state of a running gateway
//! - `mesh config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use mesh_gateway::commands::{self, ConfigCommand};
use mesh_gateway_core::domain::gateway_config::GatewayConfigManifest;

/// Mesh Gateway - resilient routing to backend agents
#[derive(Parser)]
#[command(name = "mesh")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "MESH_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "MESH_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (compact, json)
    #[arg(long, global = true, env = "MESH_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway
    #[command(name = "serve")]
    Serve {
        /// Bind address (default: spec.network.bind_address)
        #[arg(long, env = "MESH_HOST")]
        host: Option<String>,

        /// HTTP port (default: spec.network.port)
        #[arg(long, env = "MESH_PORT")]
        port: Option<u16>,
    },

    /// Show the state of a running gateway
    #[command(name = "status")]
    Status {
        /// Gateway host
        #[arg(long, env = "MESH_HOST", default_value = "127.0.0.1")]
        host: String,

        /// Gateway port
        #[arg(long, env = "MESH_PORT", default_value = "8080")]
        port: u16,

        /// Print the raw readiness report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is not an error.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve { host, port }) => {
            let manifest = load_manifest(
                cli.config.clone(),
                cli.log_level.as_deref(),
                std::io::stderr,
            )?;
            let logging = &manifest.spec.observability.logging;
            init_logging(
                cli.log_level.as_deref().unwrap_or(&logging.level),
                cli.log_format.as_deref().unwrap_or(&logging.format),
            )?;
            commands::serve::run(manifest, cli.config, host, port).await
        }
        Some(Commands::Status { host, port, json }) => {
            init_logging(
                cli.log_level.as_deref().unwrap_or("warn"),
                cli.log_format.as_deref().unwrap_or("compact"),
            )?;
            commands::status::run(&host, port, json).await
        }
        Some(Commands::Config { command }) => {
            init_logging(
                cli.log_level.as_deref().unwrap_or("warn"),
                cli.log_format.as_deref().unwrap_or("compact"),
            )?;
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Load the manifest under a temporary subscriber. The configured one needs
/// the manifest's logging section, so it can only be installed afterwards.
fn load_manifest<W>(
    path: Option<PathBuf>,
    level: Option<&str>,
    writer: W,
) -> Result<GatewayConfigManifest>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let bootstrap = tracing_subscriber::fmt()
        .with_env_filter(log_filter(level.unwrap_or("info"))?)
        .with_writer(writer)
        .with_target(false)
        .compact()
        .finish();

    tracing::subscriber::with_default(bootstrap, || {
        GatewayConfigManifest::load_or_default(path)
    })
    .context("Failed to load configuration")
}

fn log_filter(level: &str) -> Result<EnvFilter> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to create log filter")
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(log_filter(level)?)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format.eq_ignore_ascii_case("json") {
        builder.json().with_current_span(false).init();
    } else {
        builder.with_target(false).compact().init();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_config_loading_is_logged_before_logging_is_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mesh-gateway.yaml");
        std::fs::write(
            &path,
            "apiVersion: mesh-gateway/v1\nkind: GatewayConfig\nmetadata:\n  name: edge\nspec:\n  observability:\n    logging:\n      level: warn\n",
        )
        .unwrap();

        let captured = Captured::default();
        let writer = captured.clone();
        let manifest = load_manifest(Some(path), Some("info"), move || writer.clone()).unwrap();

        assert_eq!(manifest.metadata.name, "edge");
        assert_eq!(manifest.spec.observability.logging.level, "warn");
        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("Loading configuration from explicit path"));
    }
}
