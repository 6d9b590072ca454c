//! Named limiter presets and the factory that builds them.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::limiter::{LimitConfig, RateLimiter, SweepConfig};
use crate::error::Result;

/// The built-in limiter profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Public-facing APIs: 5000 req/s, burst 100
    Public,
    /// Service-to-service traffic: 10000 req/s, burst 200
    Internal,
    /// User-facing web APIs: 300 req/s, burst 30
    Web,
    /// Sensitive endpoints such as login or payments: 100 req/s, burst 10
    Strict,
}

impl Preset {
    /// Every preset, in declaration order.
    pub const ALL: [Preset; 4] = [Preset::Public, Preset::Internal, Preset::Web, Preset::Strict];

    /// The preset's default bucket parameters.
    pub fn limit(&self) -> LimitConfig {
        let (capacity, refill_per_second) = match self {
            Preset::Public => (100, 5000.0),
            Preset::Internal => (200, 10000.0),
            Preset::Web => (30, 300.0),
            Preset::Strict => (10, 100.0),
        };
        LimitConfig {
            capacity,
            refill_per_second,
        }
    }

    /// Lowercase name, as used in configuration and routes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Preset::Public => "public",
            Preset::Internal => "internal",
            Preset::Web => "web",
            Preset::Strict => "strict",
        }
    }
}

impl std::fmt::Display for Preset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One independent limiter per preset.
///
/// Built once at startup and handed to whatever needs it; each limiter has
/// its own registry and sweeper.
#[derive(Debug, Clone)]
pub struct PresetLimiters {
    pub public: Arc<RateLimiter>,
    pub internal: Arc<RateLimiter>,
    pub web: Arc<RateLimiter>,
    pub strict: Arc<RateLimiter>,
}

impl PresetLimiters {
    /// Build all four limiters, applying any per-preset overrides.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(sweep: SweepConfig, overrides: &HashMap<Preset, LimitConfig>) -> Result<Self> {
        let build = |preset: Preset| -> Result<Arc<RateLimiter>> {
            let limit = overrides
                .get(&preset)
                .cloned()
                .unwrap_or_else(|| preset.limit());
            RateLimiter::new(preset.as_str(), limit, sweep).map(Arc::new)
        };

        let limiters = Self {
            public: build(Preset::Public)?,
            internal: build(Preset::Internal)?,
            web: build(Preset::Web)?,
            strict: build(Preset::Strict)?,
        };

        info!(
            overrides = overrides.len(),
            "Preset rate limiters initialized"
        );

        Ok(limiters)
    }

    /// Build all four limiters with their default parameters.
    pub fn with_defaults(sweep: SweepConfig) -> Result<Self> {
        Self::new(sweep, &HashMap::new())
    }

    /// The limiter for a preset.
    pub fn get(&self, preset: Preset) -> &Arc<RateLimiter> {
        match preset {
            Preset::Public => &self.public,
            Preset::Internal => &self.internal,
            Preset::Web => &self.web,
            Preset::Strict => &self.strict,
        }
    }

    /// Stop every sweeper.
    pub async fn shutdown(&self) {
        for preset in Preset::ALL {
            self.get(preset).shutdown().await;
        }
    }
}
