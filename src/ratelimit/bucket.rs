//! Continuous-refill token bucket.

use std::time::{Duration, Instant};

/// Slack applied when comparing fractional token counts, so that a refill
/// of exactly `1 / rate` seconds always yields a whole token.
const TOKEN_EPSILON: f64 = 1e-9;

/// A single client's admission counter.
///
/// The bucket starts full, refills at `refill_per_second` up to `capacity`,
/// and spends one token per admitted request.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    /// Maximum burst size
    capacity: u32,
    /// Sustained refill rate in tokens per second
    refill_per_second: f64,
    /// Tokens currently available
    tokens: f64,
    /// When tokens were last credited
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u32, refill_per_second: f64, now: Instant) -> Self {
        Self {
            capacity,
            refill_per_second,
            tokens: f64::from(capacity),
            last_refill: now,
        }
    }

    /// Refill for the time elapsed since the last refill, then try to spend
    /// one token.
    ///
    /// Returns `true` if the request is admitted. A rejected request leaves
    /// the token count as refilled.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);

        if self.tokens + TOKEN_EPSILON >= 1.0 {
            self.tokens = (self.tokens - 1.0).max(0.0);
            true
        } else {
            false
        }
    }

    /// Credit tokens for elapsed time, capped at capacity.
    ///
    /// An instant earlier than the last refill credits nothing and does not
    /// move the refill point backwards.
    pub fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let credited = elapsed.as_secs_f64() * self.refill_per_second;
        self.tokens = (self.tokens + credited).min(f64::from(self.capacity));
        self.last_refill = now;
    }

    /// Whole tokens currently available, as of the last refill.
    pub fn remaining(&self) -> u32 {
        (self.tokens + TOKEN_EPSILON).floor() as u32
    }

    /// Fractional tokens currently available, as of the last refill.
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    /// Time until one whole token is available.
    ///
    /// `None` when the bucket never refills.
    pub fn retry_after(&self) -> Option<Duration> {
        let missing = 1.0 - self.tokens;
        if missing <= TOKEN_EPSILON {
            return Some(Duration::ZERO);
        }
        if self.refill_per_second <= 0.0 {
            return None;
        }
        Some(ceil_duration(missing / self.refill_per_second))
    }

    /// Maximum burst size.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Sustained refill rate in tokens per second.
    pub fn refill_per_second(&self) -> f64 {
        self.refill_per_second
    }
}

/// Seconds to a duration, rounded up to the next nanosecond.
pub(crate) fn ceil_duration(secs: f64) -> Duration {
    Duration::from_nanos((secs * 1e9).ceil() as u64)
}
