//! Background eviction of idle clients.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::error::WardenError;

/// Default time between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
/// Default inactivity after which a client is evicted.
pub const DEFAULT_IDLE_THRESHOLD: Duration = Duration::from_secs(300);

/// Something the sweeper can periodically clean up.
pub trait Sweep: Send + Sync + 'static {
    /// Run one eviction pass and return the number of entries removed.
    fn sweep(&self) -> usize;
}

/// Handle to a running sweeper task.
///
/// Dropping the handle also stops the sweeper, at its next wake-up.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Signal the sweeper to stop and wait for it to exit.
    pub async fn shutdown(self) {
        // A send error means the task already exited.
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Sweeper task ended abnormally");
        }
    }

    /// Whether the sweeper task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Periodic sweeper loop.
pub struct Sweeper;

impl Sweeper {
    /// Spawn a sweeper on the current tokio runtime.
    ///
    /// The first sweep runs one `interval` after spawning, then every
    /// `interval` until shutdown. Must be called from within a runtime.
    pub fn spawn<T: Sweep>(name: &str, target: Arc<T>, interval: Duration) -> SweeperHandle {
        let (shutdown, mut signal) = watch::channel(false);
        let name = name.to_string();

        let task = tokio::spawn(async move {
            let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            debug!(limiter = %name, interval = ?interval, "Sweeper started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::run_once(&name, target.as_ref());
                    }
                    changed = signal.changed() => {
                        if changed.is_err() || *signal.borrow() {
                            break;
                        }
                    }
                }
            }

            info!(limiter = %name, "Sweeper stopped");
        });

        SweeperHandle { shutdown, task }
    }

    /// Run a single sweep, containing any panic so the loop keeps going.
    ///
    /// Returns the number of entries removed, or `None` if the sweep failed.
    pub fn run_once<T: Sweep + ?Sized>(name: &str, target: &T) -> Option<usize> {
        match panic::catch_unwind(AssertUnwindSafe(|| target.sweep())) {
            Ok(removed) => {
                if removed > 0 {
                    debug!(limiter = %name, removed, "Evicted idle clients");
                }
                Some(removed)
            }
            Err(payload) => {
                let failure = WardenError::SweepFailure(panic_message(payload.as_ref()));
                error!(limiter = %name, error = %failure, "Sweep failed, retrying next interval");
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
