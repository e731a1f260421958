//! Asset symbol type.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Symbol of a tradable asset (token or currency).
///
/// Always stored uppercased, so equality and hashing are case-insensitive
/// with respect to the input it was built from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct AssetSymbol(String);

impl AssetSymbol {
    /// Create a new symbol, normalizing to uppercase.
    pub fn new(symbol: impl AsRef<str>) -> Self {
        Self(symbol.as_ref().trim().to_uppercase())
    }

    /// Get the normalized symbol.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn eth() -> Self {
        Self::new("ETH")
    }

    pub fn weth() -> Self {
        Self::new("WETH")
    }

    pub fn usd() -> Self {
        Self::new("USD")
    }

    /// Whether `self` and `other` form the ETH/WETH pair, in either order.
    ///
    /// Wrapped ether is redeemable 1:1, so the two are treated as the same
    /// value regardless of quoted rates.
    pub fn is_wrapped_pair(&self, other: &AssetSymbol) -> bool {
        matches!(
            (self.as_str(), other.as_str()),
            ("ETH", "WETH") | ("WETH", "ETH")
        )
    }
}

impl fmt::Display for AssetSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AssetSymbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for AssetSymbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl From<AssetSymbol> for String {
    fn from(symbol: AssetSymbol) -> Self {
        symbol.0
    }
}

impl Borrow<str> for AssetSymbol {
    fn borrow(&self) -> &str {
        &self.0
    }
}
