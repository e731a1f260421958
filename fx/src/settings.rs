//! Engine settings.

use std::time::Duration;

/// Feed whose snapshot is returned for the `default` rate source.
pub const DEFAULT_DATA_FEED_NAME: &str = "coin_gecko_api";

/// Configuration for the exchange rate engine.
#[derive(Debug, Clone)]
pub struct FxEngineConfig {
    /// Sleep between two refresh cycles.
    pub update_interval: Duration,
    /// How long to wait for each feed to become ready.
    pub feed_ready_timeout: Duration,
    /// Feed used for the `default` rate source.
    pub default_feed_name: String,
}

impl Default for FxEngineConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(5),
            feed_ready_timeout: Duration::from_secs(30),
            default_feed_name: DEFAULT_DATA_FEED_NAME.to_string(),
        }
    }
}

impl FxEngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(secs) = std::env::var("FX_UPDATE_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse::<f64>() {
                if secs.is_finite() && secs >= 0.0 {
                    config.update_interval = Duration::from_secs_f64(secs);
                }
            }
        }

        if let Ok(secs) = std::env::var("FX_FEED_READY_TIMEOUT_SECS") {
            if let Ok(secs) = secs.parse::<f64>() {
                if secs.is_finite() && secs >= 0.0 {
                    config.feed_ready_timeout = Duration::from_secs_f64(secs);
                }
            }
        }

        if let Ok(name) = std::env::var("FX_DEFAULT_FEED_NAME") {
            config.default_feed_name = name;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.update_interval.is_zero() {
            return Err("Update interval cannot be 0".to_string());
        }

        if self.feed_ready_timeout.is_zero() {
            return Err("Feed ready timeout cannot be 0".to_string());
        }

        if self.default_feed_name.is_empty() {
            return Err("Default feed name cannot be empty".to_string());
        }

        Ok(())
    }
}
