//! Exchange rate configuration resolution.
//!
//! Raw configuration comes in two lists: assets that are only fetched
//! (`[asset, source]`) and assets that require conversion
//! (`[asset, default_rate, source]`). Both are merged into an
//! [`EffectiveConfig`] in which conversion entries take precedence.

use std::collections::HashMap;

use ratefeed_common::{AssetSymbol, RateTable, SourceConfig};
use serde::{Deserialize, Serialize};

use crate::error::{FxError, FxResult};

/// Raw rate configuration lists, as supplied by the host application.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRateConfig {
    /// `[asset, source]` pairs fetched for informational purposes.
    #[serde(default)]
    pub exchange_rate_fetcher: Vec<Vec<String>>,
    /// `[asset, default_rate, source]` triples the application converts with.
    #[serde(default)]
    pub exchange_rate_conversion: Vec<Vec<String>>,
}

/// Supplies raw rate configuration.
pub trait ConfigSource: Send + Sync {
    /// Load the current raw configuration.
    fn load(&self) -> FxResult<RawRateConfig>;
}

/// In-memory configuration source.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    config: RawRateConfig,
}

impl StaticConfigSource {
    pub fn new(config: RawRateConfig) -> Self {
        Self { config }
    }

    /// Build from plain string slices.
    pub fn from_entries(fetcher: &[&[&str]], conversion: &[&[&str]]) -> Self {
        let to_owned = |entries: &[&[&str]]| -> Vec<Vec<String>> {
            entries
                .iter()
                .map(|entry| entry.iter().map(|field| field.to_string()).collect())
                .collect()
        };

        Self::new(RawRateConfig {
            exchange_rate_fetcher: to_owned(fetcher),
            exchange_rate_conversion: to_owned(conversion),
        })
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> FxResult<RawRateConfig> {
        Ok(self.config.clone())
    }
}

/// Reads JSON encoded lists from `EXCHANGE_RATE_FETCHER` and
/// `EXCHANGE_RATE_CONVERSION`. Unset variables yield empty lists.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvConfigSource;

impl EnvConfigSource {
    pub const FETCHER_VAR: &'static str = "EXCHANGE_RATE_FETCHER";
    pub const CONVERSION_VAR: &'static str = "EXCHANGE_RATE_CONVERSION";

    fn read_list(var: &str) -> FxResult<Vec<Vec<String>>> {
        match std::env::var(var) {
            Ok(value) if !value.trim().is_empty() => serde_json::from_str(&value)
                .map_err(|e| FxError::InvalidConfig(format!("{var}: {e}"))),
            _ => Ok(Vec::new()),
        }
    }
}

impl ConfigSource for EnvConfigSource {
    fn load(&self) -> FxResult<RawRateConfig> {
        Ok(RawRateConfig {
            exchange_rate_fetcher: Self::read_list(Self::FETCHER_VAR)?,
            exchange_rate_conversion: Self::read_list(Self::CONVERSION_VAR)?,
        })
    }
}

/// Resolved configuration installed directly, bypassing the raw lists.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateConfigOverride {
    #[serde(default)]
    pub conversion_required: HashMap<AssetSymbol, SourceConfig>,
    #[serde(default)]
    pub global_config: HashMap<AssetSymbol, SourceConfig>,
}

/// Effective per-asset configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EffectiveConfig {
    /// Assets the application converts with.
    pub conversion_required: HashMap<AssetSymbol, SourceConfig>,
    /// Every asset with a declared source; superset of `conversion_required`.
    pub global_config: HashMap<AssetSymbol, SourceConfig>,
}

impl EffectiveConfig {
    /// Merge the two mappings, letting conversion entries win.
    pub fn merge(
        mut global_config: HashMap<AssetSymbol, SourceConfig>,
        conversion_required: HashMap<AssetSymbol, SourceConfig>,
    ) -> Self {
        global_config.extend(
            conversion_required
                .iter()
                .map(|(asset, config)| (asset.clone(), config.clone())),
        );

        Self {
            conversion_required,
            global_config,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.global_config.is_empty()
    }

    pub fn requires_conversion(&self, asset: &AssetSymbol) -> bool {
        self.conversion_required.contains_key(asset)
    }

    /// Default rate of every configured asset.
    pub fn default_rates(&self) -> RateTable {
        self.global_config
            .iter()
            .map(|(asset, config)| (asset.clone(), config.default_rate))
            .collect()
    }
}

/// Resolve raw lists, or an override, into an effective configuration.
pub fn resolve(
    raw: &RawRateConfig,
    override_config: Option<&RateConfigOverride>,
) -> FxResult<EffectiveConfig> {
    if let Some(override_config) = override_config {
        let normalize = |entries: &HashMap<AssetSymbol, SourceConfig>| {
            entries
                .iter()
                .map(|(asset, config)| (AssetSymbol::new(asset.as_str()), config.clone()))
                .collect::<HashMap<_, _>>()
        };
        return Ok(EffectiveConfig::merge(
            normalize(&override_config.global_config),
            normalize(&override_config.conversion_required),
        ));
    }

    let global_config = raw
        .exchange_rate_fetcher
        .iter()
        .map(|entry| {
            SourceConfig::from_fetcher_entry(entry.as_slice())
                .map_err(|e| FxError::InvalidConfig(format!("fetcher entry {entry:?}: {e}")))
        })
        .collect::<FxResult<HashMap<_, _>>>()?;

    let conversion_required = raw
        .exchange_rate_conversion
        .iter()
        .map(|entry| {
            SourceConfig::from_conversion_entry(entry.as_slice())
                .map_err(|e| FxError::InvalidConfig(format!("conversion entry {entry:?}: {e}")))
        })
        .collect::<FxResult<HashMap<_, _>>>()?;

    Ok(EffectiveConfig::merge(global_config, conversion_required))
}
