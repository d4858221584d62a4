//! Periodic expiry of pending negotiations.
//!
//! The orchestrators themselves never spawn anything; an embedder that runs
//! a tokio runtime can attach a sweeper to either of them.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::initiator::InitiatorOrchestrator;
use crate::responder::ResponderOrchestrator;

/// Something with pending state that can be aged out.
pub trait ExpireStale: Send + Sync + 'static {
    fn expire_stale(&self, now: Instant) -> usize;
}

impl ExpireStale for InitiatorOrchestrator {
    fn expire_stale(&self, now: Instant) -> usize {
        InitiatorOrchestrator::expire_stale(self, now)
    }
}

impl ExpireStale for ResponderOrchestrator {
    fn expire_stale(&self, now: Instant) -> usize {
        ResponderOrchestrator::expire_stale(self, now)
    }
}

/// Run `expire_stale` on `target` every `interval`.
///
/// The task holds only a weak reference and exits once the target is
/// dropped. Abort the returned handle to stop it earlier.
pub fn spawn_expiry_sweeper<T: ExpireStale>(target: &Arc<T>, interval: Duration) -> JoinHandle<()> {
    let target: Weak<T> = Arc::downgrade(target);
    let period = interval.max(Duration::from_millis(1));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately

        loop {
            ticker.tick().await;
            let Some(target) = target.upgrade() else {
                debug!("expiry sweeper target dropped, stopping");
                break;
            };
            // tokio's clock, so paused-time tests see the advance.
            let expired = target.expire_stale(tokio::time::Instant::now().into_std());
            if expired > 0 {
                debug!(expired, "expiry sweep");
            }
        }
    })
}
