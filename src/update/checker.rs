//! Periodic background update checks.
//!
//! [`UpdateChecker`] runs [`Updater::update`] every `interval`, skipping a
//! tick when the configuration says a check already happened within the last
//! interval (for instance, one triggered by the user). Runs never overlap:
//! the next tick is only scheduled after the previous run has finished.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::context::Context;
use super::updater::Updater;

/// Runs update checks on a fixed interval until cancelled.
pub struct UpdateChecker {
    updater: Arc<Updater>,
    ctx: Arc<dyn Context>,
    cancel: CancellationToken,
    interval: Duration,
    runs: AtomicUsize,
}

impl UpdateChecker {
    /// Create a checker. Call [`run`](Self::run) to start it.
    pub fn new(
        updater: Arc<Updater>,
        ctx: Arc<dyn Context>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            updater,
            ctx,
            cancel,
            interval,
            runs: AtomicUsize::new(0),
        }
    }

    /// Number of update runs performed so far (skipped ticks excluded).
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::Relaxed)
    }

    /// One tick: run an update unless a check happened within the interval.
    /// Returns `true` if an update run happened.
    pub async fn check(&self) -> bool {
        let config = self.updater.config();
        if config.is_last_update_check_time_recent(self.interval) {
            debug!("update checked recently, skipping");
            return false;
        }

        self.runs.fetch_add(1, Ordering::Relaxed);
        match self.updater.update(self.ctx.as_ref()).await {
            Ok(Some(update)) => info!(version = %update.version, "update check finished"),
            Ok(None) => debug!("update check found nothing"),
            Err(e) if e.is_cancel() => debug!(error = %e, "update declined"),
            Err(e) => warn!(error = %e, "update check failed"),
        }
        config.set_last_update_check_time();
        true
    }

    /// Check every interval until the cancellation token fires.
    ///
    /// ```rust,ignore
    /// let checker = Arc::new(UpdateChecker::new(updater, ctx, interval, cancel.child_token()));
    /// tokio::spawn(checker.clone().run());
    /// ```
    pub async fn run(self: Arc<Self>) {
        info!(interval = ?self.interval, "update checker started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("update checker cancelled");
                    break;
                }
                _ = tokio::time::sleep(self.interval) => {
                    self.check().await;
                }
            }
        }
    }
}
