//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::clock::{Clock, SystemClock};
use super::identity::ClientIdentity;
use super::registry::{ClientRegistry, Decision};
use super::sweeper::{
    Sweep, Sweeper, SweeperHandle, DEFAULT_IDLE_THRESHOLD, DEFAULT_SWEEP_INTERVAL,
};
use crate::error::{Result, WardenError};

/// Bucket parameters for a limiter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitConfig {
    /// Maximum requests a client may issue at once
    pub capacity: u32,
    /// Sustained requests per second
    pub refill_per_second: f64,
}

impl LimitConfig {
    /// Create a validated limit.
    pub fn new(capacity: u32, refill_per_second: f64) -> Result<Self> {
        let limit = Self {
            capacity,
            refill_per_second,
        };
        limit.validate()?;
        Ok(limit)
    }

    /// Check that capacity is at least one and the rate is finite and
    /// non-negative.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(WardenError::InvalidLimit(
                "capacity must be at least 1".to_string(),
            ));
        }
        if !self.refill_per_second.is_finite() || self.refill_per_second < 0.0 {
            return Err(WardenError::InvalidLimit(format!(
                "refill rate must be a non-negative number, got {}",
                self.refill_per_second
            )));
        }
        Ok(())
    }
}

/// Sweeper timing for a limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepConfig {
    /// Time between sweeps
    pub interval: Duration,
    /// Inactivity after which a client is evicted
    pub idle_threshold: Duration,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            idle_threshold: DEFAULT_IDLE_THRESHOLD,
        }
    }
}

/// State shared between the request path and the sweeper task.
#[derive(Debug)]
struct LimiterState {
    name: String,
    registry: ClientRegistry,
    clock: Arc<dyn Clock>,
    idle_threshold: Duration,
}

impl Sweep for LimiterState {
    fn sweep(&self) -> usize {
        self.registry
            .evict_idle_since(self.idle_threshold, self.clock.now())
    }
}

/// A per-client token bucket rate limiter.
///
/// Each limiter owns its own registry and, when started with a sweeper, its
/// own background eviction task. Limiters never share state.
pub struct RateLimiter {
    state: Arc<LimiterState>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl RateLimiter {
    /// Create a limiter on the system clock and start its sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(name: &str, limit: LimitConfig, sweep: SweepConfig) -> Result<Self> {
        Self::with_clock(name, limit, sweep, Arc::new(SystemClock))
    }

    /// Create a limiter on the given clock and start its sweeper.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_clock(
        name: &str,
        limit: LimitConfig,
        sweep: SweepConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        if sweep.interval.is_zero() {
            return Err(WardenError::Config(
                "sweep interval must be greater than zero".to_string(),
            ));
        }

        let limiter = Self::unswept(name, limit, sweep.idle_threshold, clock)?;
        let handle = Sweeper::spawn(name, Arc::clone(&limiter.state), sweep.interval);
        *limiter.sweeper.lock() = Some(handle);

        info!(
            limiter = %name,
            capacity = limiter.limit().capacity,
            refill_per_second = limiter.limit().refill_per_second,
            sweep_interval = ?sweep.interval,
            idle_threshold = ?sweep.idle_threshold,
            "Rate limiter initialized"
        );

        Ok(limiter)
    }

    /// Create a limiter with no background sweeper.
    ///
    /// Idle clients are only evicted by explicit calls to [`sweep_now`].
    ///
    /// [`sweep_now`]: RateLimiter::sweep_now
    pub fn unswept(
        name: &str,
        limit: LimitConfig,
        idle_threshold: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        limit.validate()?;

        Ok(Self {
            state: Arc::new(LimiterState {
                name: name.to_string(),
                registry: ClientRegistry::new(limit),
                clock,
                idle_threshold,
            }),
            sweeper: Mutex::new(None),
        })
    }

    /// Check whether a request from `identity` may proceed.
    ///
    /// Both admitted and rejected checks count as client activity.
    pub fn check(&self, identity: &ClientIdentity) -> Decision {
        let now = self.state.clock.now();
        let decision = self.state.registry.check(identity, now);

        if !decision.allowed {
            debug!(
                limiter = %self.state.name,
                identity = %identity,
                retry_after = ?decision.retry_after,
                "Rate limit exceeded"
            );
        }

        decision
    }

    /// Evict idle clients immediately.
    pub fn sweep_now(&self) -> usize {
        self.state.sweep()
    }

    /// Stop the background sweeper, if running, and wait for it to exit.
    pub async fn shutdown(&self) {
        let handle = self.sweeper.lock().take();
        if let Some(handle) = handle {
            handle.shutdown().await;
        }
    }

    /// Whether a background sweeper is attached and running.
    pub fn is_sweeping(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Limiter name, used in logs.
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Bucket parameters.
    pub fn limit(&self) -> &LimitConfig {
        self.state.registry.limit()
    }

    /// The client registry.
    pub fn registry(&self) -> &ClientRegistry {
        &self.state.registry
    }

    /// Number of tracked clients.
    pub fn client_count(&self) -> usize {
        self.state.registry.len()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("name", &self.state.name)
            .field("limit", self.limit())
            .field("clients", &self.client_count())
            .finish()
    }
}
