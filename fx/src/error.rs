//! FX engine error types.

use ratefeed_common::AssetSymbol;
use thiserror::Error;

/// Errors that can occur in the FX engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FxError {
    /// Rate source name is not `default`, `config` or a known feed.
    #[error("Source name for exchange rate is not valid: {0}")]
    InvalidSource(String),

    /// One side of a conversion has no known rate.
    #[error("Unable to convert '{from}' to '{to}'")]
    UnresolvableRate { from: AssetSymbol, to: AssetSymbol },

    /// Raw rate configuration could not be resolved.
    #[error("Invalid exchange rate config: {0}")]
    InvalidConfig(String),

    /// A data feed failed to return its prices.
    #[error("Data feed {feed} unavailable: {reason}")]
    FeedUnavailable { feed: String, reason: String },

    /// Every registered data feed failed during one refresh cycle.
    #[error("No data feed returned prices")]
    NoFeedsResponded,

    /// Polling was requested outside of a tokio runtime.
    #[error("No tokio runtime available to run the polling loop")]
    RuntimeUnavailable,
}

/// Result type for FX operations.
pub type FxResult<T> = Result<T, FxError>;
