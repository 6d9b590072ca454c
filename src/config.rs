//! Configuration management for Ratewarden.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{Result, WardenError};
use crate::ratelimit::{LimitConfig, Preset, SweepConfig};

/// Prefix for environment variable overrides, e.g.
/// `RATEWARDEN_SERVER__HTTP_ADDR`.
pub const ENV_PREFIX: &str = "RATEWARDEN";

/// Main configuration for the Ratewarden service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server address
    #[serde(default = "default_http_addr")]
    pub http_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

fn default_http_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Seconds between idle-client sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Seconds of inactivity before a client is evicted
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,

    /// Identify clients by the first `X-Forwarded-For` address
    #[serde(default)]
    pub trust_forwarded_for: bool,

    /// Per-preset replacements for the built-in limits
    #[serde(default)]
    pub presets: HashMap<Preset, LimitConfig>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            idle_threshold_secs: default_idle_threshold(),
            trust_forwarded_for: false,
            presets: HashMap::new(),
        }
    }
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_idle_threshold() -> u64 {
    300
}

impl RateLimitingConfig {
    /// Sweeper timing derived from this configuration.
    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: Duration::from_secs(self.sweep_interval_secs),
            idle_threshold: Duration::from_secs(self.idle_threshold_secs),
        }
    }

    /// The effective limit for a preset.
    pub fn limit_for(&self, preset: Preset) -> LimitConfig {
        self.presets
            .get(&preset)
            .cloned()
            .unwrap_or_else(|| preset.limit())
    }
}

impl WardenConfig {
    /// Load configuration from an optional YAML file, overridden by
    /// `RATEWARDEN_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: WardenConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file path, without environment
    /// overrides.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: WardenConfig =
            serde_yaml::from_str(yaml).map_err(|e| WardenError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the limiters cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rate_limiting.sweep_interval_secs == 0 {
            return Err(WardenError::Config(
                "sweep_interval_secs must be greater than zero".to_string(),
            ));
        }
        for (preset, limit) in &self.rate_limiting.presets {
            limit
                .validate()
                .map_err(|e| WardenError::Config(format!("preset {}: {}", preset, e)))?;
        }
        Ok(())
    }
}
