//! Concurrent map from client identity to token bucket.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use super::identity::ClientIdentity;
use super::limiter::LimitConfig;

/// Shared handle to a client's bucket.
pub type BucketHandle = Arc<Mutex<TokenBucket>>;

/// Tracked state for one client.
#[derive(Debug)]
struct ClientEntry {
    bucket: BucketHandle,
    /// Last admission check, accepted or rejected
    last_seen: Instant,
}

/// The outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Whole tokens left after this check
    pub remaining: u32,
    /// Time until the next token, when rejected; `None` if it never refills
    pub retry_after: Option<Duration>,
}

/// Registry of per-client buckets.
///
/// Entries live in a sharded map. Every operation on an identity holds that
/// identity's shard lock, so creation is never duplicated and an eviction
/// never interleaves with a check on the same entry.
#[derive(Debug)]
pub struct ClientRegistry {
    /// Bucket parameters for new clients
    limit: LimitConfig,
    /// Tracked clients indexed by identity
    clients: DashMap<ClientIdentity, ClientEntry>,
    /// Buckets created over the registry's lifetime
    created: AtomicU64,
}

impl ClientRegistry {
    /// Create an empty registry whose buckets use `limit`.
    pub fn new(limit: LimitConfig) -> Self {
        Self {
            limit,
            clients: DashMap::new(),
            created: AtomicU64::new(0),
        }
    }

    /// Get the bucket for an identity, creating a full one on first sight.
    ///
    /// Concurrent callers with the same identity all receive the same bucket.
    pub fn get_or_create(&self, identity: &ClientIdentity, now: Instant) -> BucketHandle {
        let entry = self
            .clients
            .entry(identity.clone())
            .or_insert_with(|| self.new_entry(identity, now));
        Arc::clone(&entry.bucket)
    }

    /// Record activity for an identity.
    ///
    /// Returns `false` if the identity is not tracked.
    pub fn touch(&self, identity: &ClientIdentity, now: Instant) -> bool {
        match self.clients.get_mut(identity) {
            Some(mut entry) => {
                entry.last_seen = entry.last_seen.max(now);
                true
            }
            None => false,
        }
    }

    /// Get or create the bucket, record activity, and try to spend a token,
    /// all under the identity's shard lock.
    pub fn check(&self, identity: &ClientIdentity, now: Instant) -> Decision {
        let mut entry = self
            .clients
            .entry(identity.clone())
            .or_insert_with(|| self.new_entry(identity, now));
        entry.last_seen = entry.last_seen.max(now);

        let mut bucket = entry.bucket.lock();
        let allowed = bucket.try_acquire(now);
        let remaining = bucket.remaining();
        let retry_after = if allowed {
            Some(Duration::ZERO)
        } else {
            bucket.retry_after()
        };

        trace!(
            identity = %identity,
            allowed,
            remaining,
            "Checked client bucket"
        );

        Decision {
            allowed,
            remaining,
            retry_after,
        }
    }

    /// Remove every client whose last activity is more than `threshold`
    /// before `now`.
    ///
    /// Returns the number of clients removed.
    pub fn evict_idle_since(&self, threshold: Duration, now: Instant) -> usize {
        let mut removed = 0;
        self.clients.retain(|identity, entry| {
            let idle = now.saturating_duration_since(entry.last_seen) > threshold;
            if idle {
                trace!(identity = %identity, "Evicting idle client");
                removed += 1;
            }
            !idle
        });
        removed
    }

    /// When an identity was last seen.
    pub fn last_seen(&self, identity: &ClientIdentity) -> Option<Instant> {
        self.clients.get(identity).map(|entry| entry.last_seen)
    }

    /// Whether an identity is tracked.
    pub fn contains(&self, identity: &ClientIdentity) -> bool {
        self.clients.contains_key(identity)
    }

    /// Number of tracked clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no clients are tracked.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Total buckets created, including ones since evicted.
    pub fn buckets_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Bucket parameters for new clients.
    pub fn limit(&self) -> &LimitConfig {
        &self.limit
    }

    fn new_entry(&self, identity: &ClientIdentity, now: Instant) -> ClientEntry {
        debug!(
            identity = %identity,
            capacity = self.limit.capacity,
            refill_per_second = self.limit.refill_per_second,
            "Creating new client bucket"
        );
        self.created.fetch_add(1, Ordering::Relaxed);
        ClientEntry {
            bucket: Arc::new(Mutex::new(TokenBucket::new(
                self.limit.capacity,
                self.limit.refill_per_second,
                now,
            ))),
            last_seen: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::Preset;
    use std::sync::atomic::AtomicUsize;

    fn identity(ip: &str) -> ClientIdentity {
        ClientIdentity::from_ip_str(ip).unwrap()
    }

    #[test]
    fn test_registry_creation() {
        let registry = ClientRegistry::new(Preset::Strict.limit());
        assert!(registry.is_empty());
        assert_eq!(registry.buckets_created(), 0);
    }

    #[test]
    fn test_get_or_create_returns_same_bucket() {
        let registry = ClientRegistry::new(Preset::Strict.limit());
        let now = Instant::now();
        let client = identity("10.0.0.1");

        let first = registry.get_or_create(&client, now);
        let second = registry.get_or_create(&client, now + Duration::from_secs(1));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.buckets_created(), 1);
    }

    #[test]
    fn test_touch_updates_last_seen() {
        let registry = ClientRegistry::new(Preset::Strict.limit());
        let now = Instant::now();
        let client = identity("10.0.0.1");

        assert!(!registry.touch(&client, now));

        registry.get_or_create(&client, now);
        let later = now + Duration::from_secs(30);
        assert!(registry.touch(&client, later));
        assert_eq!(registry.last_seen(&client), Some(later));
    }

    #[test]
    fn test_check_burst_then_reject() {
        let registry = ClientRegistry::new(Preset::Strict.limit());
        let now = Instant::now();
        let client = identity("9.9.9.9");

        for _ in 0..10 {
            assert!(registry.check(&client, now).allowed);
        }

        let decision = registry.check(&client, now);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after, Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_rejected_checks_count_as_activity() {
        let registry = ClientRegistry::new(LimitConfig::new(1, 0.0).unwrap());
        let start = Instant::now();
        let client = identity("10.0.0.9");

        assert!(registry.check(&client, start).allowed);

        let later = start + Duration::from_secs(240);
        assert!(!registry.check(&client, later).allowed);
        assert_eq!(registry.last_seen(&client), Some(later));

        // Idle for 4 minutes since the rejection, so it survives a 5 minute threshold
        let removed =
            registry.evict_idle_since(Duration::from_secs(300), later + Duration::from_secs(240));
        assert_eq!(removed, 0);
    }

    #[test]
    fn test_clients_do_not_interfere() {
        let registry = ClientRegistry::new(Preset::Strict.limit());
        let now = Instant::now();
        let noisy = identity("10.0.0.1");
        let quiet = identity("10.0.0.2");

        for _ in 0..20 {
            registry.check(&noisy, now);
        }
        assert!(!registry.check(&noisy, now).allowed);

        for _ in 0..10 {
            assert!(registry.check(&quiet, now).allowed);
        }
    }

    #[test]
    fn test_evict_idle_clients() {
        let registry = ClientRegistry::new(Preset::Strict.limit());
        let start = Instant::now();
        let idle = identity("1.2.3.4");
        let active = identity("5.6.7.8");

        registry.check(&idle, start);
        registry.check(&active, start);
        registry.touch(&active, start + Duration::from_secs(240));

        // Exactly at the threshold is not yet idle
        let removed =
            registry.evict_idle_since(Duration::from_secs(300), start + Duration::from_secs(300));
        assert_eq!(removed, 0);

        let removed =
            registry.evict_idle_since(Duration::from_secs(300), start + Duration::from_secs(360));
        assert_eq!(removed, 1);
        assert!(!registry.contains(&idle));
        assert!(registry.contains(&active));
    }

    #[test]
    fn test_evicted_client_returns_with_full_burst() {
        let registry = ClientRegistry::new(Preset::Strict.limit());
        let start = Instant::now();
        let client = identity("1.2.3.4");

        for _ in 0..10 {
            registry.check(&client, start);
        }
        assert!(!registry.check(&client, start).allowed);

        let later = start + Duration::from_secs(360);
        assert_eq!(registry.evict_idle_since(Duration::from_secs(300), later), 1);

        for _ in 0..10 {
            assert!(registry.check(&client, later).allowed);
        }
        assert!(!registry.check(&client, later).allowed);
        assert_eq!(registry.buckets_created(), 2);
    }

    #[test]
    fn test_concurrent_first_requests_create_one_bucket() {
        let limit = Preset::Strict.limit();
        let registry = ClientRegistry::new(limit.clone());
        let now = Instant::now();
        let client = identity("9.9.9.9");
        let admitted = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..64 {
                scope.spawn(|| {
                    if registry.check(&client, now).allowed {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(registry.buckets_created(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(admitted.load(Ordering::SeqCst), limit.capacity as usize);
    }

    #[test]
    fn test_concurrent_get_or_create_shares_bucket() {
        let registry = ClientRegistry::new(Preset::Web.limit());
        let now = Instant::now();
        let client = identity("192.0.2.10");

        let handles: Vec<BucketHandle> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..16)
                .map(|_| scope.spawn(|| registry.get_or_create(&client, now)))
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert!(handles.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
        assert_eq!(registry.buckets_created(), 1);
    }

    #[test]
    fn test_eviction_concurrent_with_checks() {
        let registry = ClientRegistry::new(Preset::Public.limit());
        let start = Instant::now();
        let clients: Vec<ClientIdentity> = (0..32)
            .map(|i| identity(&format!("10.1.0.{i}")))
            .collect();

        std::thread::scope(|scope| {
            for client in &clients {
                let registry = &registry;
                scope.spawn(move || {
                    for _ in 0..50 {
                        registry.check(client, start);
                    }
                });
            }
            scope.spawn(|| {
                for _ in 0..50 {
                    registry.evict_idle_since(Duration::ZERO, start + Duration::from_secs(1));
                }
            });
        });

        // Whatever survived is a consistent, single entry per identity
        assert!(registry.len() <= clients.len());
        for client in &clients {
            if registry.contains(client) {
                assert_eq!(registry.last_seen(client), Some(start));
            }
        }
    }
}
