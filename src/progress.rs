//! Live progress counters and periodic reporting.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Records processed out of an expected total, shared between stages.
///
/// A total of zero means unknown (for example a target read from stdin).
#[derive(Debug, Default)]
pub struct Progress {
    done: AtomicU64,
    total: AtomicU64,
}

impl Progress {
    /// Create counters with an expected total.
    #[must_use]
    pub fn new(total: u64) -> Self {
        Self {
            done: AtomicU64::new(0),
            total: AtomicU64::new(total),
        }
    }

    /// Count one processed record.
    pub fn inc(&self) {
        self.add(1);
    }

    /// Count `n` processed records.
    pub fn add(&self, n: u64) {
        self.done.fetch_add(n, Ordering::Relaxed);
    }

    /// Replace the expected total.
    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    /// Records processed so far.
    #[must_use]
    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    /// Expected total, 0 if unknown.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// Completion percentage, if the total is known.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.done() as f64 * 100.0 / total as f64),
        }
    }

    fn log(&self, label: &str) {
        match self.percent() {
            Some(pct) => info!(
                stage = label,
                done = self.done(),
                total = self.total(),
                "{pct:.1}% complete"
            ),
            None => info!(stage = label, done = self.done(), "progress"),
        }
    }
}

/// Background task logging a [`Progress`] once per second.
#[derive(Debug)]
pub struct ProgressReporter {
    label: &'static str,
    progress: Arc<Progress>,
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Reporting period.
    pub const PERIOD: Duration = Duration::from_secs(1);

    /// Start reporting if `enabled`; otherwise the reporter is inert.
    #[must_use]
    pub fn spawn(label: &'static str, progress: Arc<Progress>, enabled: bool) -> Self {
        let stop = CancellationToken::new();
        let handle = enabled.then(|| {
            let progress = Arc::clone(&progress);
            let stop = stop.clone();
            tokio::spawn(async move {
                let mut tick = interval(Self::PERIOD);
                tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
                // First tick completes immediately.
                tick.tick().await;
                loop {
                    tokio::select! {
                        _ = tick.tick() => progress.log(label),
                        () = stop.cancelled() => break,
                    }
                }
            })
        });
        Self {
            label,
            progress,
            stop,
            handle,
        }
    }

    /// Stop reporting and log the final count once.
    pub async fn finish(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
            self.progress.log(self.label);
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}
