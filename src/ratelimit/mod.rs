//! Rate limiting logic and state management.

mod bucket;
mod clock;
mod identity;
mod limiter;
mod presets;
mod registry;
mod sweeper;

pub use bucket::TokenBucket;
pub use clock::{Clock, ManualClock, SystemClock};
pub use identity::ClientIdentity;
pub use limiter::{LimitConfig, RateLimiter, SweepConfig};
pub use presets::{Preset, PresetLimiters};
pub use registry::{BucketHandle, ClientRegistry, Decision};
pub use sweeper::{Sweep, Sweeper, SweeperHandle, DEFAULT_IDLE_THRESHOLD, DEFAULT_SWEEP_INTERVAL};
