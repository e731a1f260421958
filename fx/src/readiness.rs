//! Feed readiness gate.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::provider::DataFeed;
use crate::report::ReportOnce;

/// Wait for each feed in turn, giving each up to `timeout_per_feed`.
///
/// A feed that times out is treated as not yet ready and the gate moves on
/// to the next one. Only the first timeout ever seen through `report` is
/// logged. Returns the number of feeds that timed out.
pub async fn await_all_ready(
    feeds: &[Arc<dyn DataFeed>],
    timeout_per_feed: Duration,
    report: &ReportOnce,
) -> usize {
    let mut timed_out = 0;

    for feed in feeds {
        match tokio::time::timeout(timeout_per_feed, feed.get_ready()).await {
            Ok(()) => debug!(feed = feed.name(), "Data feed ready"),
            Err(_) => {
                timed_out += 1;
                if report.first() {
                    warn!(
                        feed = feed.name(),
                        timeout_secs = timeout_per_feed.as_secs_f64(),
                        "Error initializing data feed"
                    );
                }
            }
        }
    }

    timed_out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::MockDataFeed;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    /// Counts warnings emitted from this module.
    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            let meta = event.metadata();
            if *meta.level() == Level::WARN && meta.target() == "ratefeed_fx::readiness" {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ready_feeds_pass() {
        let report = ReportOnce::new();
        let feeds: Vec<Arc<dyn DataFeed>> = vec![
            Arc::new(MockDataFeed::new("a")),
            Arc::new(MockDataFeed::new("b")),
        ];

        let timed_out = await_all_ready(&feeds, Duration::from_secs(30), &report).await;

        assert_eq!(timed_out, 0);
        assert!(report.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_feed_times_out_and_reports_once() {
        let report = ReportOnce::new();
        let feeds: Vec<Arc<dyn DataFeed>> = vec![
            Arc::new(MockDataFeed::unready("stuck")),
            Arc::new(MockDataFeed::new("ok")),
            Arc::new(MockDataFeed::unready("also_stuck")),
        ];

        let started = tokio::time::Instant::now();
        let timed_out = await_all_ready(&feeds, Duration::from_secs(30), &report).await;

        assert_eq!(timed_out, 2);
        assert!(started.elapsed() >= Duration::from_secs(60));
        assert!(!report.is_armed());

        // Later timeouts do not re-arm the report.
        let timed_out = await_all_ready(&feeds, Duration::from_secs(30), &report).await;
        assert_eq!(timed_out, 2);
        assert!(!report.first());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_log_a_single_warning() {
        let warnings = Arc::new(AtomicUsize::new(0));
        let subscriber =
            tracing_subscriber::registry().with(WarnCounter(Arc::clone(&warnings)));
        let _guard = tracing::subscriber::set_default(subscriber);

        let report = ReportOnce::new();
        let feeds: Vec<Arc<dyn DataFeed>> = vec![
            Arc::new(MockDataFeed::unready("stuck")),
            Arc::new(MockDataFeed::unready("also_stuck")),
        ];

        for _ in 0..3 {
            await_all_ready(&feeds, Duration::from_secs(30), &report).await;
        }

        assert_eq!(warnings.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_becoming_ready_mid_wait() {
        let report = ReportOnce::new();
        let feed = Arc::new(MockDataFeed::unready("late"));
        let feeds: Vec<Arc<dyn DataFeed>> = vec![feed.clone()];

        let signal = feed.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            signal.set_ready();
        });

        let timed_out = await_all_ready(&feeds, Duration::from_secs(30), &report).await;
        assert_eq!(timed_out, 0);
        assert!(report.is_armed());
    }
}
