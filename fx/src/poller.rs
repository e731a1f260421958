//! Background polling loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::cache::{RateCache, RefreshOutcome};
use crate::config::EffectiveConfig;
use crate::error::FxResult;
use crate::provider::DataFeed;
use crate::readiness::await_all_ready;
use crate::report::ReportOnce;

/// Report latches shared by every run of one engine.
#[derive(Debug, Default)]
pub struct PollReports {
    /// Feed readiness timeouts.
    pub ready_timeout: ReportOnce,
    /// Configured assets missing from their feed.
    pub lookup_miss: ReportOnce,
    /// Conversions that could not start polling.
    pub lazy_start: ReportOnce,
}

/// State the polling loop reads on every cycle.
pub(crate) struct Poller {
    pub(crate) cache: Arc<RateCache>,
    pub(crate) feeds: Arc<RwLock<Vec<Arc<dyn DataFeed>>>>,
    pub(crate) config: Arc<RwLock<Arc<EffectiveConfig>>>,
    pub(crate) update_interval: Arc<RwLock<Duration>>,
    pub(crate) feed_ready_timeout: Duration,
    pub(crate) reports: Arc<PollReports>,
    pub(crate) ready: Arc<watch::Sender<bool>>,
}

impl Poller {
    /// Run cycles until the task is aborted.
    pub(crate) async fn run(self) {
        loop {
            match AssertUnwindSafe(self.run_cycle()).catch_unwind().await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(error = %e, "Error updating exchange rates"),
                Err(panic) => error!(
                    panic = panic_message(panic.as_ref()),
                    "Exchange rate refresh panicked"
                ),
            }

            let interval = *self.update_interval.read();
            tokio::time::sleep(interval).await;
        }
    }

    /// Wait for feeds, refresh the cache and signal readiness.
    pub(crate) async fn run_cycle(&self) -> FxResult<RefreshOutcome> {
        let feeds = self.feeds.read().clone();
        let config = self.config.read().clone();

        await_all_ready(&feeds, self.feed_ready_timeout, &self.reports.ready_timeout).await;

        let outcome = self.cache.refresh(&feeds, &config).await?;

        if outcome.has_errors() {
            if self.reports.lookup_miss.is_armed() {
                for miss in &outcome.missing {
                    warn!(
                        asset = %miss.asset,
                        feed = %miss.feed,
                        "No data found for asset in data feed, check the exchange rate config"
                    );
                }
            }
            self.reports.lookup_miss.disarm();
        }

        debug!(
            updated = outcome.updated,
            missing = outcome.missing.len(),
            failed_feeds = outcome.failed_feeds.len(),
            "Exchange rates refreshed"
        );

        self.ready.send_replace(true);
        Ok(outcome)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}
