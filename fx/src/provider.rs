//! Data feed trait and test implementation.

use async_trait::async_trait;
use ratefeed_common::{AssetSymbol, RateTable};

use crate::error::FxResult;

/// A source of USD prices, polled independently of the engine.
///
/// Implementations run their own fetch activity between `start` and `stop`
/// and expose the latest full price map.
#[async_trait]
pub trait DataFeed: Send + Sync {
    /// Stable feed name, matched case-insensitively against asset sources.
    fn name(&self) -> &str;

    /// Current full price snapshot.
    async fn price_dict(&self) -> FxResult<RateTable>;

    /// Price of a single asset.
    async fn get_price(&self, asset: &AssetSymbol) -> Option<f64> {
        self.price_dict().await.ok()?.get(asset).copied()
    }

    /// Whether the feed's own fetch activity is running.
    fn started(&self) -> bool;

    fn start(&self);

    fn stop(&self);

    /// Resolves once the feed completed its first successful fetch.
    async fn get_ready(&self);
}

#[cfg(any(test, feature = "test-utils"))]
pub use mock::MockDataFeed;

#[cfg(any(test, feature = "test-utils"))]
mod mock {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use async_trait::async_trait;
    use dashmap::DashMap;
    use ratefeed_common::{AssetSymbol, RateTable};
    use tokio::sync::watch;

    use super::DataFeed;
    use crate::error::{FxError, FxResult};

    /// Mock data feed for testing.
    pub struct MockDataFeed {
        name: String,
        prices: DashMap<AssetSymbol, f64>,
        started: AtomicBool,
        failing: AtomicBool,
        start_calls: AtomicUsize,
        stop_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
        ready: watch::Sender<bool>,
    }

    impl MockDataFeed {
        /// Create a new mock feed that is immediately ready.
        pub fn new(name: impl Into<String>) -> Self {
            let (ready, _) = watch::channel(true);
            Self {
                name: name.into(),
                prices: DashMap::new(),
                started: AtomicBool::new(false),
                failing: AtomicBool::new(false),
                start_calls: AtomicUsize::new(0),
                stop_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
                ready,
            }
        }

        /// Feed that never becomes ready until [`MockDataFeed::set_ready`].
        pub fn unready(name: impl Into<String>) -> Self {
            let feed = Self::new(name);
            feed.ready.send_replace(false);
            feed
        }

        pub fn with_price(self, asset: &str, price: f64) -> Self {
            self.set_price(asset, price);
            self
        }

        pub fn set_price(&self, asset: &str, price: f64) {
            self.prices.insert(AssetSymbol::new(asset), price);
        }

        pub fn remove_price(&self, asset: &str) {
            self.prices.remove(asset);
        }

        pub fn set_ready(&self) {
            self.ready.send_replace(true);
        }

        /// Make `price_dict` fail until reset.
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn start_calls(&self) -> usize {
            self.start_calls.load(Ordering::SeqCst)
        }

        pub fn stop_calls(&self) -> usize {
            self.stop_calls.load(Ordering::SeqCst)
        }

        /// Number of `price_dict` calls so far.
        pub fn fetch_calls(&self) -> usize {
            self.fetch_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl DataFeed for MockDataFeed {
        fn name(&self) -> &str {
            &self.name
        }

        async fn price_dict(&self) -> FxResult<RateTable> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(FxError::FeedUnavailable {
                    feed: self.name.clone(),
                    reason: "mock failure".to_string(),
                });
            }
            Ok(self
                .prices
                .iter()
                .map(|entry| (entry.key().clone(), *entry.value()))
                .collect())
        }

        fn started(&self) -> bool {
            self.started.load(Ordering::SeqCst)
        }

        fn start(&self) {
            self.start_calls.fetch_add(1, Ordering::SeqCst);
            self.started.store(true, Ordering::SeqCst);
        }

        fn stop(&self) {
            self.stop_calls.fetch_add(1, Ordering::SeqCst);
            self.started.store(false, Ordering::SeqCst);
        }

        async fn get_ready(&self) {
            let mut ready = self.ready.subscribe();
            // Sender lives as long as `self`, so this only ends once ready.
            let _ = ready.wait_for(|ready| *ready).await;
        }
    }
}
