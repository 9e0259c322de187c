// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Gateway Configuration Types
//
// Defines the configuration schema for a mesh gateway instance:
// - Kubernetes-style manifest format (apiVersion/kind/metadata/spec)
// - Rate limiting, circuit breaker, bulkhead and retry settings
// - The static agent registry
// - Network, health and observability settings
//
// Every recognised option can be overridden from the environment using its
// upper-cased name (RATE_LIMIT_REQUESTS, BULKHEAD_QUEUE_SIZE, ...).

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::domain::agent::AgentDescriptor;
use crate::domain::bulkhead::BulkheadPolicy;
use crate::domain::circuit_breaker::{BreakerPolicy, WindowKind};
use crate::domain::rate_limit::{RateLimitPolicy, RateLimitStrategy};
use crate::domain::retry::RetryPolicy;

pub const API_VERSION: &str = "mesh-gateway/v1";
pub const KIND: &str = "GatewayConfig";
pub const CONFIG_PATH_ENV: &str = "MESH_CONFIG_PATH";

/// Agents of the reference deployment, in port order starting at 8001.
pub const DEFAULT_AGENTS: [&str; 6] = [
    "osteon",
    "myocyte",
    "synapse",
    "circadian",
    "nucleus",
    "chaperone",
];

/// Top-level Kubernetes-style gateway configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigManifest {
    /// API version (must be "mesh-gateway/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "GatewayConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    #[serde(default)]
    pub spec: GatewayConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable gateway instance name
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

/// Gateway configuration specification (content under spec:)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfigSpec {
    #[serde(default)]
    pub network: NetworkConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub bulkhead: BulkheadConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Known agents. Defaults to the reference deployment.
    #[serde(default = "default_agents")]
    pub agents: Vec<AgentDescriptor>,

    #[serde(default)]
    pub registry: RegistryConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network bind address (e.g. "0.0.0.0" or "127.0.0.1")
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP API port
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub strategy: RateLimitStrategy,

    /// Requests admitted per window and key
    #[serde(default = "default_rate_limit_requests")]
    pub requests: u32,

    #[serde(default = "default_rate_limit_window", with = "humantime_serde")]
    pub window: Duration,

    /// Extra burst tokens (token bucket only)
    #[serde(default)]
    pub burst: u32,

    /// Sub-buckets per window (sliding window only)
    #[serde(default = "default_sub_buckets")]
    pub sub_buckets: u32,

    #[serde(default = "default_true")]
    pub per_ip: bool,

    #[serde(default = "default_true")]
    pub per_user: bool,

    #[serde(default)]
    pub per_api_key: bool,

    /// Path prefixes that bypass the limiter entirely
    #[serde(default = "default_exclude_paths")]
    pub exclude_paths: Vec<String>,

    /// Client identifiers (IPs, user ids) that are never limited
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_identifiers: Vec<String>,

    /// Idle keys are evicted after this long. Defaults to twice the window.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub idle_ttl: Option<Duration>,

    /// Wait up to this long for capacity instead of rejecting. Zero rejects.
    #[serde(default, with = "humantime_serde")]
    pub max_wait: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Percent in (0, 100]
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,

    #[serde(default)]
    pub window_kind: WindowKind,

    /// Outcomes (count window) or seconds (time window)
    #[serde(default = "default_breaker_window_size")]
    pub window_size: u32,

    #[serde(default = "default_minimum_volume")]
    pub minimum_volume: u32,

    #[serde(default = "default_open_duration", with = "humantime_serde")]
    pub open_duration: Duration,

    #[serde(default = "default_half_open_probes")]
    pub half_open_probes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkheadConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,

    #[serde(default = "default_queue_size")]
    pub queue_size: u32,

    #[serde(default = "default_queue_wait_timeout", with = "humantime_serde")]
    pub queue_wait_timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay", with = "humantime_serde")]
    pub base_delay: Duration,

    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    /// Jitter band half-width in [0, 1]
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Upper bound on a caller deadline
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Per-attempt timeout unless the agent sets its own
    #[serde(default = "default_agent_timeout", with = "humantime_serde")]
    pub agent_timeout: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Re-read the agent list from the config file at this interval
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub refresh_interval: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    /// `/ready` reports 503 until this much time has passed since start
    #[serde(default = "default_startup_grace_period", with = "humantime_serde")]
    pub startup_grace_period: Duration,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "trace")
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format ("compact" or "json")
    #[serde(default = "default_log_format")]
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_metrics_path")]
    pub path: String,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_rate_limit_requests() -> u32 {
    100
}

fn default_rate_limit_window() -> Duration {
    Duration::from_secs(60)
}

fn default_sub_buckets() -> u32 {
    10
}

fn default_exclude_paths() -> Vec<String> {
    vec!["/health".to_string(), "/ready".to_string(), "/metrics".to_string()]
}

fn default_failure_rate_threshold() -> f64 {
    50.0
}

fn default_breaker_window_size() -> u32 {
    20
}

fn default_minimum_volume() -> u32 {
    5
}

fn default_open_duration() -> Duration {
    Duration::from_secs(30)
}

fn default_half_open_probes() -> u32 {
    1
}

fn default_max_concurrent() -> u32 {
    10
}

fn default_queue_size() -> u32 {
    20
}

fn default_queue_wait_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_jitter() -> f64 {
    0.5
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_agent_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_startup_grace_period() -> Duration {
    Duration::from_secs(5)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "compact".to_string()
}

fn default_metrics_path() -> String {
    "/metrics".to_string()
}

pub fn default_agents() -> Vec<AgentDescriptor> {
    DEFAULT_AGENTS
        .iter()
        .enumerate()
        .map(|(i, name)| AgentDescriptor::new(*name, format!("http://{}:{}", name, 8001 + i)))
        .collect()
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RateLimitStrategy::default(),
            requests: default_rate_limit_requests(),
            window: default_rate_limit_window(),
            burst: 0,
            sub_buckets: default_sub_buckets(),
            per_ip: true,
            per_user: true,
            per_api_key: false,
            exclude_paths: default_exclude_paths(),
            exclude_identifiers: Vec::new(),
            idle_ttl: None,
            max_wait: Duration::ZERO,
        }
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_rate_threshold: default_failure_rate_threshold(),
            window_kind: WindowKind::default(),
            window_size: default_breaker_window_size(),
            minimum_volume: default_minimum_volume(),
            open_duration: default_open_duration(),
            half_open_probes: default_half_open_probes(),
        }
    }
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            queue_size: default_queue_size(),
            queue_wait_timeout: default_queue_wait_timeout(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: default_jitter(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout: default_request_timeout(),
            agent_timeout: default_agent_timeout(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            startup_grace_period: default_startup_grace_period(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_metrics_path(),
        }
    }
}

impl Default for GatewayConfigSpec {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            rate_limit: RateLimitConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            bulkhead: BulkheadConfig::default(),
            retry: RetryConfig::default(),
            dispatch: DispatchConfig::default(),
            agents: default_agents(),
            registry: RegistryConfig::default(),
            health: HealthConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl Default for GatewayConfigManifest {
    fn default() -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "mesh-gateway".to_string());

        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: hostname,
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: GatewayConfigSpec::default(),
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            strategy: self.strategy,
            capacity: self.requests,
            window: self.window,
            burst: self.burst,
            sub_buckets: self.sub_buckets,
        }
    }

    pub fn effective_idle_ttl(&self) -> Duration {
        self.idle_ttl.unwrap_or(self.window * 2)
    }

    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_paths
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }
}

impl CircuitBreakerConfig {
    pub fn policy(&self) -> BreakerPolicy {
        BreakerPolicy {
            failure_rate_threshold: self.failure_rate_threshold,
            window_kind: self.window_kind,
            window_size: self.window_size,
            minimum_volume: self.minimum_volume,
            open_duration: self.open_duration,
            half_open_probes: self.half_open_probes,
        }
    }
}

impl BulkheadConfig {
    pub fn policy(&self) -> BulkheadPolicy {
        BulkheadPolicy {
            max_concurrent: self.max_concurrent,
            queue_capacity: self.queue_size,
            queue_wait_timeout: self.queue_wait_timeout,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            jitter: self.jitter,
        }
    }
}

impl GatewayConfigManifest {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_yaml_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    /// Ordered list of locations searched by [`Self::discover_config`].
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            paths.push(PathBuf::from(path));
        }
        paths.push(PathBuf::from("./mesh-gateway.yaml"));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".mesh").join("gateway.yaml"));
        }
        #[cfg(unix)]
        paths.push(PathBuf::from("/etc/mesh/gateway.yaml"));
        #[cfg(windows)]
        paths.push(PathBuf::from("C:\\ProgramData\\Mesh\\gateway.yaml"));
        paths
    }

    /// Discover configuration file using precedence order
    /// 1. MESH_CONFIG_PATH environment variable
    /// 2. ./mesh-gateway.yaml (working directory)
    /// 3. ~/.mesh/gateway.yaml (user home)
    /// 4. /etc/mesh/gateway.yaml (system)
    pub fn discover_config() -> Option<PathBuf> {
        Self::search_paths().into_iter().find(|p| p.exists())
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        if let Some(path) = cli_path {
            tracing::info!("Loading configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", path, e)
            })?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(&config_path).map_err(|e| {
                anyhow::anyhow!("Failed to load config at {:?}: {}", config_path, e)
            })?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Same as [`Self::apply_env_overrides`] with an injectable lookup.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let rl = &mut self.spec.rate_limit;
        override_value(&lookup, "RATE_LIMIT_REQUESTS", parse_from_str, &mut rl.requests);
        override_value(&lookup, "RATE_LIMIT_WINDOW", parse_duration, &mut rl.window);
        override_value(&lookup, "RATE_LIMIT_STRATEGY", parse_from_str, &mut rl.strategy);
        override_value(&lookup, "RATE_LIMIT_BURST", parse_from_str, &mut rl.burst);
        override_value(&lookup, "RATE_LIMIT_PER_IP", parse_bool, &mut rl.per_ip);
        override_value(&lookup, "RATE_LIMIT_PER_USER", parse_bool, &mut rl.per_user);
        override_value(&lookup, "RATE_LIMIT_PER_API_KEY", parse_bool, &mut rl.per_api_key);
        override_value(&lookup, "RATE_LIMIT_EXCLUDE_PATHS", parse_list, &mut rl.exclude_paths);

        let cb = &mut self.spec.circuit_breaker;
        override_value(
            &lookup,
            "CIRCUIT_BREAKER_FAILURE_RATE_THRESHOLD",
            parse_from_str,
            &mut cb.failure_rate_threshold,
        );
        override_value(&lookup, "CIRCUIT_BREAKER_WINDOW_SIZE", parse_from_str, &mut cb.window_size);
        override_value(&lookup, "CIRCUIT_BREAKER_OPEN_DURATION", parse_duration, &mut cb.open_duration);
        override_value(
            &lookup,
            "CIRCUIT_BREAKER_HALF_OPEN_PROBES",
            parse_from_str,
            &mut cb.half_open_probes,
        );

        let bh = &mut self.spec.bulkhead;
        override_value(&lookup, "BULKHEAD_MAX_CONCURRENT", parse_from_str, &mut bh.max_concurrent);
        override_value(&lookup, "BULKHEAD_QUEUE_SIZE", parse_from_str, &mut bh.queue_size);
        override_value(
            &lookup,
            "BULKHEAD_QUEUE_WAIT_TIMEOUT",
            parse_duration,
            &mut bh.queue_wait_timeout,
        );

        let retry = &mut self.spec.retry;
        override_value(&lookup, "RETRY_MAX_ATTEMPTS", parse_from_str, &mut retry.max_attempts);
        override_value(&lookup, "RETRY_BASE_DELAY", parse_duration, &mut retry.base_delay);

        for agent in &mut self.spec.agents {
            let name = agent_url_env(agent.name.as_str());
            override_value(&lookup, &name, parse_from_str, &mut agent.url);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!(
                "Invalid apiVersion: '{}'. Must be '{}'",
                self.api_version,
                API_VERSION
            );
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let rl = &self.spec.rate_limit;
        if rl.enabled {
            if rl.requests == 0 {
                anyhow::bail!("spec.rate_limit.requests must be greater than 0");
            }
            if rl.window.is_zero() {
                anyhow::bail!("spec.rate_limit.window must be greater than 0");
            }
            if rl.sub_buckets == 0 {
                anyhow::bail!("spec.rate_limit.sub_buckets must be greater than 0");
            }
        }

        let cb = &self.spec.circuit_breaker;
        if !(cb.failure_rate_threshold > 0.0 && cb.failure_rate_threshold <= 100.0) {
            anyhow::bail!(
                "spec.circuit_breaker.failure_rate_threshold must be in (0, 100], got {}",
                cb.failure_rate_threshold
            );
        }
        if cb.window_size == 0 {
            anyhow::bail!("spec.circuit_breaker.window_size must be greater than 0");
        }
        if cb.half_open_probes == 0 {
            anyhow::bail!("spec.circuit_breaker.half_open_probes must be greater than 0");
        }
        if cb.window_kind == WindowKind::Count && cb.minimum_volume > cb.window_size {
            anyhow::bail!(
                "spec.circuit_breaker.minimum_volume ({}) cannot exceed a count window of {}",
                cb.minimum_volume,
                cb.window_size
            );
        }

        if self.spec.bulkhead.max_concurrent == 0 {
            anyhow::bail!("spec.bulkhead.max_concurrent must be greater than 0");
        }

        let retry = &self.spec.retry;
        if retry.max_attempts == 0 {
            anyhow::bail!("spec.retry.max_attempts must be greater than 0");
        }
        if !(0.0..=1.0).contains(&retry.jitter) {
            anyhow::bail!("spec.retry.jitter must be in [0, 1], got {}", retry.jitter);
        }

        if self.spec.dispatch.request_timeout.is_zero() {
            anyhow::bail!("spec.dispatch.request_timeout must be greater than 0");
        }

        let mut seen = HashSet::new();
        for agent in &self.spec.agents {
            let name = agent.name.as_str();
            if name.is_empty() {
                anyhow::bail!("Agent name cannot be empty");
            }
            if !seen.insert(name) {
                anyhow::bail!("Duplicate agent name: {}", name);
            }
            let url = reqwest::Url::parse(&agent.url)
                .map_err(|e| anyhow::anyhow!("Invalid URL for agent {}: {}", name, e))?;
            if !matches!(url.scheme(), "http" | "https") {
                anyhow::bail!("Agent {} URL must be http or https: {}", name, agent.url);
            }
        }

        Ok(())
    }
}

/// `AGENT_<NAME>_URL`, with `-` and `.` mapped to `_`.
pub fn agent_url_env(agent: &str) -> String {
    let normalized: String = agent
        .chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect();
    format!("AGENT_{}_URL", normalized)
}

fn override_value<T, F, P>(lookup: &F, name: &str, parse: P, target: &mut T)
where
    F: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Result<T, String>,
{
    let Some(raw) = lookup(name) else {
        return;
    };
    match parse(raw.trim()) {
        Ok(value) => {
            tracing::info!("Environment override: {}={}", name, raw);
            *target = value;
        }
        Err(e) => {
            tracing::warn!("Invalid value for {}: '{}' ({}). Ignoring.", name, raw, e);
        }
    }
}

fn parse_from_str<T>(raw: &str) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>().map_err(|e| e.to_string())
}

fn parse_bool(raw: &str) -> Result<bool, String> {
    match raw.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err("expected true/false".to_string()),
    }
}

/// Plain numbers are seconds; anything else goes through humantime.
fn parse_duration(raw: &str) -> Result<Duration, String> {
    if let Ok(secs) = raw.parse::<f64>() {
        return Duration::try_from_secs_f64(secs).map_err(|e| e.to_string());
    }
    humantime::parse_duration(raw).map_err(|e| e.to_string())
}

fn parse_list(raw: &str) -> Result<Vec<String>, String> {
    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}
