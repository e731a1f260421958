//! Simulation scenarios.

use std::collections::HashMap;
use std::path::Path;

use ratefeed_fx::RawRateConfig;
use serde::{Deserialize, Serialize};

/// A simulation scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Scenario name.
    pub name: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Raw exchange rate configuration lists.
    #[serde(flatten)]
    pub rates: RawRateConfig,
    /// Simulated feeds.
    pub feeds: Vec<FeedProfile>,
    /// Conversions evaluated on every report tick.
    #[serde(default)]
    pub conversions: Vec<ConversionProbe>,
}

/// A simulated data feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedProfile {
    /// Feed name.
    pub name: String,
    /// Starting USD prices.
    pub prices: HashMap<String, f64>,
    /// Maximum relative move per tick.
    #[serde(default = "default_volatility")]
    pub volatility: f64,
    /// Delay before the first successful fetch.
    #[serde(default)]
    pub warmup_ms: u64,
    /// Interval between fetches.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Start failing after this many fetches.
    #[serde(default)]
    pub fail_after_ticks: Option<u64>,
}

/// A conversion to evaluate periodically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionProbe {
    pub amount: f64,
    pub from: String,
    pub to: String,
    /// Rate source; merged rates when absent.
    #[serde(default)]
    pub source: Option<String>,
}

fn default_volatility() -> f64 {
    0.005
}

fn default_tick_ms() -> u64 {
    1000
}

impl Scenario {
    /// Load a built-in scenario by name, or a JSON scenario file.
    pub fn load(name: &str) -> anyhow::Result<Self> {
        match name {
            "basic" => Ok(Self::basic()),
            "feed-outage" => Ok(Self::feed_outage()),
            "slow-start" => Ok(Self::slow_start()),
            path if path.ends_with(".json") => Self::from_file(path),
            _ => Err(anyhow::anyhow!("Unknown scenario: {}", name)),
        }
    }

    /// Read a scenario from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Two healthy feeds with a stablecoin and two volatile assets.
    fn basic() -> Self {
        Self {
            name: "basic".to_string(),
            description: "Two healthy feeds".to_string(),
            rates: RawRateConfig {
                exchange_rate_fetcher: entries(&[&["BTC", "sim_gecko"], &["SOL", "sim_cap"]]),
                exchange_rate_conversion: entries(&[
                    &["USDT", "1.0", "sim_gecko"],
                    &["DAI", "1.0", "sim_cap"],
                    &["ETH", "3000", "sim_gecko"],
                ]),
            },
            feeds: vec![
                feed("sim_gecko", &[("BTC", 50_000.0), ("ETH", 3_000.0), ("USDT", 1.0)]),
                feed("sim_cap", &[("SOL", 100.0), ("DAI", 1.0), ("ETH", 3_010.0)]),
            ],
            conversions: vec![
                probe(1.0, "BTC", "USDT", None),
                probe(10.0, "ETH", "DAI", None),
                probe(2.0, "ETH", "WETH", None),
                probe(1.0, "ETH", "DAI", Some("sim_cap")),
            ],
        }
    }

    /// One feed stops answering after a few fetches.
    fn feed_outage() -> Self {
        let mut scenario = Self::basic();
        scenario.name = "feed-outage".to_string();
        scenario.description = "sim_cap fails after five fetches".to_string();
        scenario.feeds[1].fail_after_ticks = Some(5);
        scenario
    }

    /// One feed takes longer to warm up than the readiness timeout.
    fn slow_start() -> Self {
        let mut scenario = Self::basic();
        scenario.name = "slow-start".to_string();
        scenario.description = "sim_cap needs 10s before its first fetch".to_string();
        scenario.feeds[1].warmup_ms = 10_000;
        scenario
    }
}

fn entries(raw: &[&[&str]]) -> Vec<Vec<String>> {
    raw.iter()
        .map(|entry| entry.iter().map(|field| field.to_string()).collect())
        .collect()
}

fn feed(name: &str, prices: &[(&str, f64)]) -> FeedProfile {
    FeedProfile {
        name: name.to_string(),
        prices: prices
            .iter()
            .map(|(asset, price)| (asset.to_string(), *price))
            .collect(),
        volatility: default_volatility(),
        warmup_ms: 500,
        tick_ms: default_tick_ms(),
        fail_after_ticks: None,
    }
}

fn probe(amount: f64, from: &str, to: &str, source: Option<&str>) -> ConversionProbe {
    ConversionProbe {
        amount,
        from: from.to_string(),
        to: to.to_string(),
        source: source.map(str::to_string),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_scenarios() {
        for name in ["basic", "feed-outage", "slow-start"] {
            let scenario = Scenario::load(name).unwrap();
            assert_eq!(scenario.name, name);
            assert_eq!(scenario.feeds.len(), 2);
        }
        assert!(Scenario::load("nope").is_err());
    }

    #[test]
    fn test_scenario_from_json() {
        let scenario: Scenario = serde_json::from_str(
            r#"{
                "name": "file",
                "exchange_rate_fetcher": [["BTC", "feedX"]],
                "exchange_rate_conversion": [["USDT", "1.0", "feedX"]],
                "feeds": [{"name": "feedX", "prices": {"BTC": 50000.0, "USDT": 1.0}}],
                "conversions": [{"amount": 1.0, "from": "BTC", "to": "USDT"}]
            }"#,
        )
        .unwrap();

        assert_eq!(scenario.rates.exchange_rate_fetcher.len(), 1);
        assert_eq!(scenario.rates.exchange_rate_conversion[0][1], "1.0");
        assert_eq!(scenario.feeds[0].tick_ms, 1000);
        assert_eq!(scenario.feeds[0].fail_after_ticks, None);
        assert!(scenario.conversions[0].source.is_none());
    }
}
