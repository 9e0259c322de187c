// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use mesh_gateway_core::domain::gateway_config::{
    agent_url_env, GatewayConfigManifest, CONFIG_PATH_ENV,
};

const MINIMAL_TEMPLATE: &str = include_str!("../../templates/gateway-minimal.yaml");
const EXAMPLES_TEMPLATE: &str = include_str!("../../templates/gateway-with-examples.yaml");

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the effective configuration (file, defaults and env overrides)
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,

        /// Print the effective manifest as YAML
        #[arg(long)]
        yaml: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./mesh-gateway.yaml)
        #[arg(short, long, default_value = "./mesh-gateway.yaml")]
        output: PathBuf,

        /// Include examples and comments
        #[arg(long)]
        examples: bool,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths, yaml } => show(config_override, paths, yaml).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate {
            output,
            examples,
            force,
        } => generate(output, examples, force).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool, as_yaml: bool) -> Result<()> {
    let config = GatewayConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        match &config_override {
            Some(path) => println!("  --config flag: {}", path.display()),
            None => println!("  --config flag: {}", "(not set)".dimmed()),
        }
        if std::env::var(CONFIG_PATH_ENV).is_err() {
            println!("  {}: {}", CONFIG_PATH_ENV, "(not set)".dimmed());
        }
        for path in GatewayConfigManifest::search_paths() {
            let marker = if path.exists() { "found".green() } else { "missing".dimmed() };
            println!("  {} ({})", path.display(), marker);
        }
        println!();
    }

    if as_yaml {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let spec = &config.spec;
    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!(
        "  Listen: {}:{}",
        spec.network.bind_address, spec.network.port
    );
    println!();

    println!("{}", "Rate Limit:".bold());
    if spec.rate_limit.enabled {
        println!(
            "  {:?}: {} requests / {:?} (burst {})",
            spec.rate_limit.strategy,
            spec.rate_limit.requests,
            spec.rate_limit.window,
            spec.rate_limit.burst
        );
        println!(
            "  Scopes: ip={} user={} api_key={}",
            spec.rate_limit.per_ip, spec.rate_limit.per_user, spec.rate_limit.per_api_key
        );
        println!("  Excluded paths: {}", spec.rate_limit.exclude_paths.join(", "));
    } else {
        println!("  {}", "disabled".dimmed());
    }
    println!();

    let cb = &spec.circuit_breaker;
    println!("{}", "Circuit Breaker:".bold());
    println!(
        "  Opens at {}% failures over {} {:?} (minimum {} calls)",
        cb.failure_rate_threshold, cb.window_size, cb.window_kind, cb.minimum_volume
    );
    println!(
        "  Open for {:?}, {} half-open probe(s)",
        cb.open_duration, cb.half_open_probes
    );
    println!();

    println!("{}", "Bulkhead:".bold());
    println!(
        "  {} concurrent, {} queued, queue wait {:?}",
        spec.bulkhead.max_concurrent, spec.bulkhead.queue_size, spec.bulkhead.queue_wait_timeout
    );
    println!();

    println!("{}", "Retry:".bold());
    println!(
        "  {} attempts, backoff {:?}..{:?}, jitter {}",
        spec.retry.max_attempts, spec.retry.base_delay, spec.retry.max_delay, spec.retry.jitter
    );
    println!(
        "  Request timeout {:?}, agent timeout {:?}",
        spec.dispatch.request_timeout, spec.dispatch.agent_timeout
    );
    println!();

    println!("{}", "Agents:".bold());
    for agent in &spec.agents {
        let state = if agent.enabled {
            "enabled".green()
        } else {
            "disabled".dimmed()
        };
        println!("  {} {} ({})", agent.name.as_str().bold(), agent.url, state);
        println!(
            "    {}: {}",
            agent_url_env(agent.name.as_str()).dimmed(),
            if std::env::var(agent_url_env(agent.name.as_str())).is_ok() {
                "set"
            } else {
                "not set"
            }
        );
    }
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = GatewayConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, with_examples: bool, force: bool) -> Result<()> {
    if output.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            output.display()
        );
    }

    let sample = if with_examples {
        EXAMPLES_TEMPLATE
    } else {
        MINIMAL_TEMPLATE
    };

    std::fs::write(&output, sample)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_templates_are_valid_manifests() {
        for template in [MINIMAL_TEMPLATE, EXAMPLES_TEMPLATE] {
            let manifest = GatewayConfigManifest::from_yaml_str(template).unwrap();
            manifest.validate().unwrap();
        }
    }

    #[test]
    fn test_examples_template_lists_reference_agents() {
        let manifest = GatewayConfigManifest::from_yaml_str(EXAMPLES_TEMPLATE).unwrap();
        let names: Vec<&str> = manifest.spec.agents.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["osteon", "myocyte", "synapse", "circadian", "nucleus", "chaperone"]
        );
    }

    #[tokio::test]
    async fn test_generate_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("mesh-gateway.yaml");

        generate(output.clone(), false, false).await.unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), MINIMAL_TEMPLATE);

        assert!(generate(output.clone(), true, false).await.is_err());
        generate(output.clone(), true, true).await.unwrap();
        assert_eq!(std::fs::read_to_string(&output).unwrap(), EXAMPLES_TEMPLATE);
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(
            &path,
            "apiVersion: mesh-gateway/v1\nkind: GatewayConfig\nmetadata:\n  name: bad\nspec:\n  bulkhead:\n    max_concurrent: 0\n",
        )
        .unwrap();

        assert!(validate(Some(path)).await.is_err());
    }
}
