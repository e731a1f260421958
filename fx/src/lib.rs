//! Ratefeed FX Engine
//!
//! Aggregates USD exchange rates from independently polled data feeds and
//! converts token amounts with them.
//!
//! # Features
//!
//! - Declarative per-asset source configuration with conversion overrides
//! - Per-feed snapshots merged into one effective rate table
//! - Background polling gated on feed readiness, tolerant of feed outages
//! - Conversion queries that start polling lazily
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ratefeed_fx::{ExchangeRateConversion, FxEngineConfig, StaticConfigSource};
//!
//! let config = StaticConfigSource::from_entries(
//!     &[&["BTC", "coin_gecko_api"]],
//!     &[&["USDT", "1.0", "coin_gecko_api"]],
//! );
//! let engine = ExchangeRateConversion::new(FxEngineConfig::default(), Arc::new(config), feeds);
//!
//! engine.start()?;
//! engine.wait_till_ready().await;
//! let usdt = engine.convert_token_value(0.5, "BTC", "USDT", None)?;
//! ```

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod poller;
pub mod provider;
pub mod readiness;
pub mod report;
pub mod settings;
pub mod shared;

pub use cache::{RateCache, RateSnapshot, RefreshOutcome};
pub use config::{
    ConfigSource, EffectiveConfig, EnvConfigSource, RateConfigOverride, RawRateConfig,
    StaticConfigSource,
};
pub use engine::ExchangeRateConversion;
pub use error::{FxError, FxResult};
pub use provider::DataFeed;
pub use settings::{FxEngineConfig, DEFAULT_DATA_FEED_NAME};

#[cfg(any(test, feature = "test-utils"))]
pub use provider::MockDataFeed;
