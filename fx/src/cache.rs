//! Per-feed snapshots and the merged rate table.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use ratefeed_common::{AssetSymbol, RateTable};
use tracing::{debug, warn};

use crate::config::EffectiveConfig;
use crate::error::{FxError, FxResult};
use crate::provider::DataFeed;

/// Full price map of one feed, as captured during a refresh.
#[derive(Debug, Clone)]
pub struct RateSnapshot {
    pub prices: RateTable,
    pub captured_at: DateTime<Utc>,
}

impl RateSnapshot {
    fn new(prices: RateTable) -> Self {
        Self {
            prices,
            captured_at: Utc::now(),
        }
    }

    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.captured_at)
    }
}

/// An asset whose configured feed had no usable price.
#[derive(Debug, Clone, PartialEq)]
pub struct MissingRate {
    pub asset: AssetSymbol,
    pub feed: String,
}

/// Result of one refresh pass.
#[derive(Debug, Clone, Default)]
pub struct RefreshOutcome {
    /// Number of merged rates overwritten.
    pub updated: usize,
    /// Lookups that found nothing in their feed's snapshot.
    pub missing: Vec<MissingRate>,
    /// Feeds that failed to return prices this pass.
    pub failed_feeds: Vec<String>,
}

impl RefreshOutcome {
    pub fn has_errors(&self) -> bool {
        !self.missing.is_empty()
    }
}

/// Rate cache holding the latest snapshot of every feed and the merged
/// asset to USD table.
///
/// Writes happen per key without a table-wide lock; readers may observe a
/// refresh half applied.
#[derive(Debug, Default)]
pub struct RateCache {
    snapshots: DashMap<String, RateSnapshot>,
    merged: DashMap<AssetSymbol, f64>,
}

impl RateCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the merged table with the configured default rates.
    pub fn init_from_config(&self, config: &EffectiveConfig) {
        self.merged.clear();
        for (asset, rate) in config.default_rates() {
            self.merged.insert(asset, rate);
        }
        debug!(assets = self.merged.len(), "Merged rates reset to defaults");
    }

    /// Pull every feed's prices concurrently, then update merged rates
    /// from them.
    ///
    /// All snapshots are captured before any merged rate is written. Feeds
    /// that fail keep their previous snapshot and are skipped for the
    /// merge. Fails only when every feed failed.
    pub async fn refresh(
        &self,
        feeds: &[Arc<dyn DataFeed>],
        config: &EffectiveConfig,
    ) -> FxResult<RefreshOutcome> {
        let mut outcome = RefreshOutcome::default();
        let mut answered: Vec<&str> = Vec::with_capacity(feeds.len());

        let results = join_all(feeds.iter().map(|feed| feed.price_dict())).await;

        for (feed, result) in feeds.iter().zip(results) {
            match result {
                Ok(prices) => {
                    self.snapshots
                        .insert(feed.name().to_string(), RateSnapshot::new(prices));
                    answered.push(feed.name());
                }
                Err(e) => {
                    warn!(feed = feed.name(), error = %e, "Data feed failed to return prices");
                    outcome.failed_feeds.push(feed.name().to_string());
                }
            }
        }

        if !feeds.is_empty() && answered.is_empty() {
            return Err(FxError::NoFeedsResponded);
        }

        for feed_name in answered {
            let Some(snapshot) = self.snapshots.get(feed_name) else {
                continue;
            };

            for (asset, source) in &config.global_config {
                if !source.is_sourced_from(feed_name) {
                    continue;
                }

                match snapshot.prices.get(asset).copied().filter(|p| is_usable(*p)) {
                    Some(price) => {
                        self.merged.insert(asset.clone(), price);
                        outcome.updated += 1;
                    }
                    None => outcome.missing.push(MissingRate {
                        asset: asset.clone(),
                        feed: feed_name.to_string(),
                    }),
                }
            }
        }

        Ok(outcome)
    }

    /// Copy of the merged rate table.
    pub fn merged_rates(&self) -> RateTable {
        self.merged
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Merged rate of one asset.
    pub fn rate(&self, asset: &AssetSymbol) -> Option<f64> {
        self.merged.get(asset).map(|rate| *rate)
    }

    /// Copy of one feed's latest prices.
    pub fn snapshot(&self, feed_name: &str) -> Option<RateTable> {
        self.snapshots.get(feed_name).map(|s| s.prices.clone())
    }

    /// Copy of every feed's latest prices, keyed by feed name.
    pub fn all_snapshots(&self) -> HashMap<String, RateTable> {
        self.snapshots
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().prices.clone()))
            .collect()
    }

    /// How long ago the feed's snapshot was captured.
    pub fn snapshot_age(&self, feed_name: &str) -> Option<Duration> {
        self.snapshots.get(feed_name).map(|s| s.age())
    }

    /// Capture time of the most recent snapshot across feeds.
    pub fn last_refreshed_at(&self) -> Option<DateTime<Utc>> {
        self.snapshots.iter().map(|s| s.captured_at).max()
    }
}

/// Zero and non-finite prices count as missing.
fn is_usable(price: f64) -> bool {
    price.is_finite() && price > 0.0
}
