//! Ingestion: the per-document pipeline and the batch orchestrator on top of
//! it, plus the cancellation and throttling primitives they share.

pub mod batch;
pub mod pipeline;

use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

pub use batch::{BatchIngestor, BatchOptions, IngestReport, UrlOutcome, UrlReport};
pub use pipeline::DocumentIngestor;

/// Cooperative cancellation handle threaded through every pipeline stage.
///
/// Cloning is cheap; any clone can cancel and every clone observes it.
#[derive(Clone, Debug)]
pub struct CancelToken {
    sender: std::sync::Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: std::sync::Arc::new(sender),
            receiver,
        }
    }

    /// Requests cancellation; idempotent.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // An error here means the sender is gone, which cannot happen while
        // any token clone is alive; treat it as "never cancelled".
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimum-interval rate limiter.
///
/// Callers `wait()` before each guarded operation; the throttle spaces those
/// operations at least `min_interval` apart. The origin delay between batches
/// and any embedding-provider pacing use separate instances so the two can be
/// tuned independently.
#[derive(Debug)]
pub struct Throttle {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    /// Sleeps until the configured interval has passed since the previous
    /// `wait` returned. Waiters queue fairly on the internal lock.
    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            let now = Instant::now();
            if ready_at > now {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}
