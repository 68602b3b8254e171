//! Collateral kinds accepted by the protocol.
//!
//! Kinds are a closed enum: the health math is identical for all of them and
//! only the token decimals and the oracle price differ.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A collateral asset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollateralKind {
    /// Native SOL (9 decimals)
    Sol,
    /// Wrapped bitcoin (8 decimals)
    Btc,
    /// Wrapped ether (8 decimals)
    Eth,
}

impl CollateralKind {
    /// Every supported kind, in storage order
    pub const ALL: [CollateralKind; 3] = [CollateralKind::Sol, CollateralKind::Btc, CollateralKind::Eth];

    /// Token decimals of the smallest unit
    pub const fn decimals(self) -> u32 {
        match self {
            CollateralKind::Sol => 9,
            CollateralKind::Btc => 8,
            CollateralKind::Eth => 8,
        }
    }

    /// Ticker symbol
    pub const fn symbol(self) -> &'static str {
        match self {
            CollateralKind::Sol => "SOL",
            CollateralKind::Btc => "BTC",
            CollateralKind::Eth => "ETH",
        }
    }

    /// Single byte tag used in storage keys
    pub const fn tag(self) -> u8 {
        match self {
            CollateralKind::Sol => 0,
            CollateralKind::Btc => 1,
            CollateralKind::Eth => 2,
        }
    }
}

impl fmt::Display for CollateralKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for CollateralKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sol" => Ok(CollateralKind::Sol),
            "btc" => Ok(CollateralKind::Btc),
            "eth" => Ok(CollateralKind::Eth),
            other => Err(Error::InvalidParameter {
                name: "collateral_kind".into(),
                reason: format!("unknown collateral '{}'", other),
            }),
        }
    }
}
