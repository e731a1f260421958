//! Rate tables and per-asset source configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::AssetSymbol;

/// Asset to USD rate mapping. `NaN` marks a rate that is not known.
pub type RateTable = HashMap<AssetSymbol, f64>;

fn unknown_rate() -> f64 {
    f64::NAN
}

/// Where an asset's rate comes from and what to use until it arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Rate used until the first successful feed update (`NaN` if unknown).
    #[serde(rename = "default", default = "unknown_rate")]
    pub default_rate: f64,
    /// Name of the data feed that is authoritative for this asset.
    pub source: String,
}

impl SourceConfig {
    /// Create a new source config.
    pub fn new(default_rate: f64, source: impl Into<String>) -> Self {
        Self {
            default_rate,
            source: source.into(),
        }
    }

    /// Source config without a known default rate.
    pub fn fetch_only(source: impl Into<String>) -> Self {
        Self::new(unknown_rate(), source)
    }

    /// Whether this config names the given feed (case-insensitive).
    pub fn is_sourced_from(&self, feed_name: &str) -> bool {
        self.source.eq_ignore_ascii_case(feed_name)
    }

    /// Parse an `[asset, source]` fetcher entry.
    pub fn from_fetcher_entry<S: AsRef<str>>(
        entry: &[S],
    ) -> Result<(AssetSymbol, Self), ConfigEntryError> {
        match entry {
            [asset, source] => Ok((
                AssetSymbol::new(asset.as_ref()),
                Self::fetch_only(source.as_ref()),
            )),
            _ => Err(ConfigEntryError::Arity {
                expected: 2,
                actual: entry.len(),
            }),
        }
    }

    /// Parse an `[asset, default_rate, source]` conversion entry.
    pub fn from_conversion_entry<S: AsRef<str>>(
        entry: &[S],
    ) -> Result<(AssetSymbol, Self), ConfigEntryError> {
        match entry {
            [asset, default_rate, source] => {
                let raw = default_rate.as_ref().trim();
                let rate = raw
                    .parse::<f64>()
                    .map_err(|_| ConfigEntryError::InvalidRate(raw.to_string()))?;
                Ok((AssetSymbol::new(asset.as_ref()), Self::new(rate, source.as_ref())))
            }
            _ => Err(ConfigEntryError::Arity {
                expected: 3,
                actual: entry.len(),
            }),
        }
    }
}

impl PartialEq for SourceConfig {
    fn eq(&self, other: &Self) -> bool {
        let same_rate = self.default_rate == other.default_rate
            || (self.default_rate.is_nan() && other.default_rate.is_nan());
        same_rate && self.source == other.source
    }
}

/// Error parsing a raw configuration entry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigEntryError {
    /// Entry has the wrong number of fields.
    #[error("expected {expected} fields, got {actual}")]
    Arity { expected: usize, actual: usize },

    /// Default rate is not a number.
    #[error("default rate {0:?} is not a number")]
    InvalidRate(String),
}
