//! Exchange rate conversion engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use ratefeed_common::{AssetSymbol, RateTable};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::cache::RateCache;
use crate::config::{resolve, ConfigSource, EffectiveConfig, RateConfigOverride};
use crate::error::{FxError, FxResult};
use crate::poller::{PollReports, Poller};
use crate::provider::DataFeed;
use crate::settings::FxEngineConfig;

/// Rate source returning the merged rate table.
pub const CONFIG_SOURCE: &str = "config";
/// Rate source returning the default feed's snapshot.
pub const DEFAULT_SOURCE: &str = "default";

/// Converts token amounts using rates polled from a set of data feeds.
///
/// Holds the resolved rate configuration, the rate cache and the handle of
/// the background polling task. Conversion calls start polling on first use.
pub struct ExchangeRateConversion {
    settings: FxEngineConfig,
    config_source: Arc<dyn ConfigSource>,
    config_override: RwLock<Option<RateConfigOverride>>,
    config: Arc<RwLock<Arc<EffectiveConfig>>>,
    feeds: Arc<RwLock<Vec<Arc<dyn DataFeed>>>>,
    cache: Arc<RateCache>,
    update_interval: Arc<RwLock<Duration>>,
    reports: Arc<PollReports>,
    ready: RwLock<Arc<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
}

impl ExchangeRateConversion {
    /// Create a new engine and resolve its initial configuration.
    pub fn new(
        settings: FxEngineConfig,
        config_source: Arc<dyn ConfigSource>,
        feeds: Vec<Arc<dyn DataFeed>>,
    ) -> Self {
        let (ready, _) = watch::channel(false);
        let engine = Self {
            update_interval: Arc::new(RwLock::new(settings.update_interval)),
            settings,
            config_source,
            config_override: RwLock::new(None),
            config: Arc::new(RwLock::new(Arc::new(EffectiveConfig::default()))),
            feeds: Arc::new(RwLock::new(feeds)),
            cache: Arc::new(RateCache::new()),
            reports: Arc::new(PollReports::default()),
            ready: RwLock::new(Arc::new(ready)),
            task: Mutex::new(None),
            started: AtomicBool::new(false),
        };
        engine.init_config();
        engine
    }

    /// Re-resolve configuration and reset merged rates to their defaults.
    ///
    /// On failure the error is logged and the previous configuration is kept.
    pub fn init_config(&self) {
        let resolved = {
            let override_config = self.config_override.read();
            match override_config.as_ref() {
                Some(override_config) => resolve(&Default::default(), Some(override_config)),
                None => self
                    .config_source
                    .load()
                    .and_then(|raw| resolve(&raw, None)),
            }
        };

        match resolved {
            Ok(config) => {
                self.cache.init_from_config(&config);
                debug!(
                    global = config.global_config.len(),
                    conversion_required = config.conversion_required.len(),
                    "Exchange rate config initialized"
                );
                *self.config.write() = Arc::new(config);
            }
            Err(e) => {
                error!(error = %e, "Error initiating config for exchange rate conversion");
            }
        }
    }

    /// Install a resolved configuration in place of the raw lists.
    pub fn set_global_exchange_rate_config(&self, config: RateConfigOverride) {
        *self.config_override.write() = Some(config);
        self.init_config();
    }

    /// Drop a previously installed configuration override.
    pub fn clear_global_exchange_rate_config(&self) {
        *self.config_override.write() = None;
        self.init_config();
    }

    /// Replace the set of data feeds.
    pub fn set_data_feeds(&self, feeds: Vec<Arc<dyn DataFeed>>) {
        *self.feeds.write() = feeds;
        self.init_config();
    }

    /// Change the sleep between refresh cycles. Applies from the next sleep.
    pub fn set_update_interval(&self, interval: Duration) {
        *self.update_interval.write() = interval;
    }

    pub fn update_interval(&self) -> Duration {
        *self.update_interval.read()
    }

    /// Currently resolved configuration.
    pub fn effective_config(&self) -> Arc<EffectiveConfig> {
        self.config.read().clone()
    }

    pub fn data_feeds(&self) -> Vec<Arc<dyn DataFeed>> {
        self.feeds.read().clone()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Receiver that turns `true` after the first successful refresh of the
    /// current run.
    pub fn ready_notifier(&self) -> watch::Receiver<bool> {
        self.ready.read().subscribe()
    }

    /// Wait until the current run completed a refresh.
    pub async fn wait_till_ready(&self) {
        let mut ready = self.ready_notifier();
        // Ends early if a restart replaces the notifier.
        let _ = ready.wait_for(|ready| *ready).await;
    }

    /// Latest prices of every feed, keyed by feed name.
    pub fn all_exchange_rate(&self) -> HashMap<String, RateTable> {
        self.cache.all_snapshots()
    }

    /// Copy of the merged rate table.
    pub fn exchange_rate(&self) -> RateTable {
        self.cache.merged_rates()
    }

    /// Access the underlying rate cache.
    pub fn cache(&self) -> &RateCache {
        &self.cache
    }

    /// Report latches of the polling loop.
    pub fn reports(&self) -> &PollReports {
        &self.reports
    }

    /// Rate table for a source: `default`, a feed name, or `config`.
    pub fn get_exchange_rate(&self, source: &str) -> FxResult<RateTable> {
        if source == DEFAULT_SOURCE {
            let feed_name = &self.settings.default_feed_name;
            return self.cache.snapshot(feed_name).ok_or_else(|| {
                let known_feeds: Vec<String> = self.cache.all_snapshots().into_keys().collect();
                error!(feed = %feed_name, ?known_feeds, "Default data feed has no rates");
                FxError::InvalidSource(feed_name.clone())
            });
        }

        if let Some(snapshot) = self.cache.snapshot(source) {
            return Ok(snapshot);
        }

        if source == CONFIG_SOURCE {
            return Ok(self.cache.merged_rates());
        }

        Err(FxError::InvalidSource(source.to_string()))
    }

    /// USD value of `price` units of `asset`.
    ///
    /// Assets outside the conversion-required config pass through unchanged.
    pub fn adjust_token_rate(
        &self,
        asset: &str,
        price: f64,
        source: Option<&str>,
    ) -> FxResult<f64> {
        let asset = AssetSymbol::new(asset);
        self.ensure_started();

        let rates = self.get_exchange_rate(source.unwrap_or(CONFIG_SOURCE))?;
        let config = self.effective_config();

        match rates.get(&asset) {
            Some(rate) if config.requires_conversion(&asset) => Ok(rate * price),
            _ => Ok(price),
        }
    }

    /// Convert `amount` of `from_asset` into an equal value of `to_asset`.
    pub fn convert_token_value(
        &self,
        amount: f64,
        from_asset: &str,
        to_asset: &str,
        source: Option<&str>,
    ) -> FxResult<f64> {
        self.ensure_started();

        let rates = self.get_exchange_rate(source.unwrap_or(CONFIG_SOURCE))?;

        let from = AssetSymbol::new(from_asset);
        let to = AssetSymbol::new(to_asset);
        if from.is_wrapped_pair(&to) {
            return Ok(amount);
        }

        let from_rate = rates.get(&from).copied().unwrap_or(f64::NAN);
        let to_rate = rates.get(&to).copied().unwrap_or(f64::NAN);
        if from_rate.is_nan() || to_rate.is_nan() {
            return Err(FxError::UnresolvableRate { from, to });
        }

        Ok(amount * from_rate / to_rate)
    }

    /// Start every feed and a fresh polling task, stopping any previous run.
    #[instrument(skip(self))]
    pub fn start(&self) -> FxResult<()> {
        let mut task = self.task.lock();
        self.start_locked(&mut task)
    }

    /// Stop every feed and cancel the polling task. Safe to call when idle.
    #[instrument(skip(self))]
    pub fn stop(&self) {
        let mut task = self.task.lock();
        self.stop_locked(&mut task);
    }

    fn start_locked(&self, task: &mut Option<JoinHandle<()>>) -> FxResult<()> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| FxError::RuntimeUnavailable)?;

        self.stop_locked(task);

        let feeds = self.data_feeds();
        for feed in &feeds {
            if !feed.started() {
                feed.start();
            }
        }

        let (ready, _) = watch::channel(false);
        let ready = Arc::new(ready);
        *self.ready.write() = Arc::clone(&ready);

        let poller = Poller {
            cache: Arc::clone(&self.cache),
            feeds: Arc::clone(&self.feeds),
            config: Arc::clone(&self.config),
            update_interval: Arc::clone(&self.update_interval),
            feed_ready_timeout: self.settings.feed_ready_timeout,
            reports: Arc::clone(&self.reports),
            ready,
        };
        *task = Some(runtime.spawn(poller.run()));
        self.started.store(true, Ordering::SeqCst);

        info!(feeds = feeds.len(), "Exchange rate polling started");
        Ok(())
    }

    fn stop_locked(&self, task: &mut Option<JoinHandle<()>>) {
        for feed in self.data_feeds() {
            feed.stop();
        }

        if let Some(task) = task.take() {
            if !task.is_finished() {
                task.abort();
                debug!("Exchange rate polling task cancelled");
            }
        }
        self.started.store(false, Ordering::SeqCst);
    }

    /// Start polling unless a run is active. Conversions keep serving the
    /// cache when polling cannot start.
    fn ensure_started(&self) {
        if self.is_started() {
            return;
        }

        let mut task = self.task.lock();
        if self.is_started() {
            return;
        }
        if let Err(e) = self.start_locked(&mut task) {
            if self.reports.lazy_start.first() {
                warn!(error = %e, "Exchange rate polling not started, serving cached rates");
            }
        }
    }
}

impl Drop for ExchangeRateConversion {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RawRateConfig, StaticConfigSource};
    use crate::provider::MockDataFeed;
    use ratefeed_common::SourceConfig;

    fn feed_x_source() -> Arc<dyn ConfigSource> {
        Arc::new(StaticConfigSource::from_entries(
            &[&["BTC", "feedX"], &["ETH", "feedX"]],
            &[&["USDT", "1.0", "feedX"], &["DAI", "1.0", "feedX"]],
        ))
    }

    fn setup_engine(feed: Arc<MockDataFeed>) -> ExchangeRateConversion {
        let feeds: Vec<Arc<dyn DataFeed>> = vec![feed];
        ExchangeRateConversion::new(FxEngineConfig::default(), feed_x_source(), feeds)
    }

    fn sym(s: &str) -> AssetSymbol {
        AssetSymbol::new(s)
    }

    #[test]
    fn test_new_engine_uses_default_rates() {
        let engine = setup_engine(Arc::new(MockDataFeed::new("feedX")));

        let rates = engine.exchange_rate();
        assert_eq!(rates.len(), 4);
        assert!(rates[&sym("BTC")].is_nan());
        assert_eq!(rates[&sym("USDT")], 1.0);
        assert!(!engine.is_started());
    }

    #[test]
    fn test_get_exchange_rate_sources() {
        let engine = setup_engine(Arc::new(MockDataFeed::new("feedX")));

        assert_eq!(engine.get_exchange_rate("config").unwrap().len(), 4);
        assert_eq!(
            engine.get_exchange_rate("unknownSource").unwrap_err(),
            FxError::InvalidSource("unknownSource".to_string())
        );
        assert_eq!(
            engine.get_exchange_rate("default").unwrap_err(),
            FxError::InvalidSource("coin_gecko_api".to_string())
        );
    }

    #[test]
    fn test_conversion_outside_runtime_serves_cache() {
        let engine = setup_engine(Arc::new(MockDataFeed::new("feedX")));

        assert_eq!(engine.adjust_token_rate("XYZ", 3.0, None).unwrap(), 3.0);
        assert_eq!(engine.adjust_token_rate("USDT", 2.0, None).unwrap(), 2.0);
        assert_eq!(
            engine.convert_token_value(5.0, "ETH", "WETH", None).unwrap(),
            5.0
        );
        assert_eq!(
            engine.convert_token_value(4.0, "DAI", "USDT", None).unwrap(),
            4.0
        );
        assert!(!engine.is_started());
        assert!(!engine.reports().lazy_start.is_armed());

        // An explicit start still reports the missing runtime.
        assert_eq!(engine.start().unwrap_err(), FxError::RuntimeUnavailable);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_lazy_start_leaves_no_orphan_task() {
        let feed = Arc::new(MockDataFeed::new("feedX").with_price("USDT", 1.0));
        let settings = FxEngineConfig {
            update_interval: Duration::from_millis(5),
            ..FxEngineConfig::default()
        };
        let feeds: Vec<Arc<dyn DataFeed>> = vec![feed.clone()];
        let engine = Arc::new(ExchangeRateConversion::new(settings, feed_x_source(), feeds));

        let calls: Vec<_> = (0..8)
            .map(|_| {
                let engine = Arc::clone(&engine);
                tokio::spawn(async move { engine.convert_token_value(1.0, "DAI", "USDT", None) })
            })
            .collect();
        for call in calls {
            assert_eq!(call.await.unwrap().unwrap(), 1.0);
        }

        assert_eq!(feed.start_calls(), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(feed.fetch_calls() > 0);

        engine.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let fetched = feed.fetch_calls();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(feed.fetch_calls(), fetched);
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_sources_after_refresh() {
        let feed = Arc::new(MockDataFeed::new("feedX").with_price("BTC", 50_000.0));
        let engine = setup_engine(feed);

        engine.start().unwrap();
        engine.wait_till_ready().await;

        let snapshot = engine.get_exchange_rate("feedX").unwrap();
        assert_eq!(snapshot[&sym("BTC")], 50_000.0);
        assert_eq!(engine.all_exchange_rate().len(), 1);
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_source_uses_default_feed() {
        let feed = Arc::new(MockDataFeed::new("coin_gecko_api").with_price("ETH", 3_000.0));
        let feeds: Vec<Arc<dyn DataFeed>> = vec![feed];
        let engine =
            ExchangeRateConversion::new(FxEngineConfig::default(), feed_x_source(), feeds);

        engine.start().unwrap();
        engine.wait_till_ready().await;

        assert_eq!(engine.get_exchange_rate("default").unwrap()[&sym("ETH")], 3_000.0);
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_adjust_token_rate() {
        let feed = Arc::new(
            MockDataFeed::new("feedX")
                .with_price("USDT", 0.99)
                .with_price("BTC", 50_000.0),
        );
        let engine = setup_engine(feed);

        // Defaults apply before the first refresh.
        assert_eq!(engine.adjust_token_rate("usdt", 10.0, None).unwrap(), 10.0);
        assert!(engine.is_started());

        engine.wait_till_ready().await;
        assert!((engine.adjust_token_rate("usdt", 10.0, None).unwrap() - 9.9).abs() < 1e-9);

        // BTC is fetched but not conversion-required.
        assert_eq!(engine.adjust_token_rate("BTC", 2.0, None).unwrap(), 2.0);
        assert_eq!(engine.adjust_token_rate("XYZ", 3.0, None).unwrap(), 3.0);
        assert!(matches!(
            engine.adjust_token_rate("USDT", 1.0, Some("nowhere")),
            Err(FxError::InvalidSource(_))
        ));
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_convert_token_value() {
        let feed = Arc::new(
            MockDataFeed::new("feedX")
                .with_price("ETH", 3_000.0)
                .with_price("DAI", 1.0)
                .with_price("USDT", 1.0),
        );
        let engine = setup_engine(feed);
        engine.start().unwrap();
        engine.wait_till_ready().await;

        assert_eq!(
            engine.convert_token_value(2.0, "eth", "dai", None).unwrap(),
            6_000.0
        );
        assert_eq!(
            engine.convert_token_value(3_000.0, "DAI", "ETH", None).unwrap(),
            1.0
        );
        assert_eq!(
            engine.convert_token_value(5.0, "ETH", "weth", None).unwrap(),
            5.0
        );
        assert_eq!(
            engine.convert_token_value(5.0, "weth", "eth", None).unwrap(),
            5.0
        );

        // BTC is configured but the feed never had a price for it.
        assert_eq!(
            engine.convert_token_value(1.0, "BTC", "DAI", None).unwrap_err(),
            FxError::UnresolvableRate {
                from: sym("BTC"),
                to: sym("DAI")
            }
        );
        assert!(matches!(
            engine.convert_token_value(1.0, "DAI", "XYZ", None),
            Err(FxError::UnresolvableRate { .. })
        ));
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_stop_stops_feeds() {
        let feed = Arc::new(MockDataFeed::new("feedX"));
        let engine = setup_engine(feed.clone());

        engine.stop();
        assert!(!engine.is_started());

        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_started());
        assert!(feed.started());
        // The second start stopped the feed first, so it was started twice.
        assert_eq!(feed.start_calls(), 2);

        engine.stop();
        assert!(!engine.is_started());
        assert!(!feed.started());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_creates_new_notifier() {
        let feed = Arc::new(MockDataFeed::new("feedX"));
        let engine = setup_engine(feed);

        engine.start().unwrap();
        engine.wait_till_ready().await;
        assert!(*engine.ready_notifier().borrow());

        engine.stop();
        engine.start().unwrap();
        assert!(!*engine.ready_notifier().borrow());

        engine.wait_till_ready().await;
        assert!(*engine.ready_notifier().borrow());
        engine.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_and_feed_replacement_reinitialize() {
        let engine = setup_engine(Arc::new(MockDataFeed::new("feedX")));

        let mut override_config = RateConfigOverride::default();
        override_config
            .conversion_required
            .insert(sym("usdc"), SourceConfig::new(1.0, "feedY"));
        engine.set_global_exchange_rate_config(override_config);

        let rates = engine.exchange_rate();
        assert_eq!(rates.len(), 1);
        assert_eq!(rates[&sym("USDC")], 1.0);

        let feed_y = Arc::new(MockDataFeed::new("feedY").with_price("USDC", 0.98));
        let feeds: Vec<Arc<dyn DataFeed>> = vec![feed_y];
        engine.set_data_feeds(feeds);
        assert_eq!(engine.data_feeds().len(), 1);

        engine.start().unwrap();
        engine.wait_till_ready().await;
        assert_eq!(engine.exchange_rate()[&sym("USDC")], 0.98);

        engine.stop();
        engine.clear_global_exchange_rate_config();
        assert_eq!(engine.exchange_rate().len(), 4);
    }

    #[test]
    fn test_bad_config_keeps_previous() {
        struct FlakySource {
            broken: AtomicBool,
        }

        impl ConfigSource for FlakySource {
            fn load(&self) -> FxResult<RawRateConfig> {
                if self.broken.load(Ordering::SeqCst) {
                    return Err(FxError::InvalidConfig("unreadable".to_string()));
                }
                feed_x_source().load()
            }
        }

        let source = Arc::new(FlakySource {
            broken: AtomicBool::new(false),
        });
        let engine =
            ExchangeRateConversion::new(FxEngineConfig::default(), source.clone(), Vec::new());
        let before = engine.effective_config();
        assert_eq!(before.global_config.len(), 4);

        source.broken.store(true, Ordering::SeqCst);
        engine.init_config();
        assert_eq!(*engine.effective_config(), *before);
        assert_eq!(engine.exchange_rate().len(), 4);
    }

    #[test]
    fn test_malformed_entries_leave_config_empty() {
        let source = Arc::new(StaticConfigSource::from_entries(
            &[&["BTC"]],
            &[&["USDT", "one", "feedX"]],
        ));
        let engine = ExchangeRateConversion::new(FxEngineConfig::default(), source, Vec::new());

        assert!(engine.effective_config().is_empty());
        assert!(engine.exchange_rate().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_interval_change() {
        let engine = setup_engine(Arc::new(MockDataFeed::new("feedX")));
        assert_eq!(engine.update_interval(), Duration::from_secs(5));

        engine.set_update_interval(Duration::from_millis(250));
        assert_eq!(engine.update_interval(), Duration::from_millis(250));
    }
}
