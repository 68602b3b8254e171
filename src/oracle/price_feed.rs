//! Price oracle collaborator and quote validation.
//!
//! This module provides:
//! - `PriceQuote`: a Pyth-style quote (price, confidence, exponent, publish time)
//! - `PriceOracle`: the seam to the external oracle
//! - `ManualPriceFeed`: admin-set quotes for tests and the operator CLI
//! - `PriceBook`: the quotes one operation is allowed to use, validated once

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::core::collateral::CollateralKind;
use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::crypto::Address;
use crate::utils::math::*;
use crate::utils::validation::*;

// ═══════════════════════════════════════════════════════════════════════════════
// ORACLE CONFIG
// ═══════════════════════════════════════════════════════════════════════════════

/// Acceptance policy for oracle quotes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Maximum age of a quote in seconds
    pub max_age_secs: u64,
    /// Widest accepted confidence interval in basis points of price
    pub max_confidence_bps: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            max_age_secs: DEFAULT_MAX_PRICE_AGE_SECS,
            max_confidence_bps: DEFAULT_MAX_CONFIDENCE_BPS,
        }
    }
}

impl OracleConfig {
    /// Validate the policy itself
    pub fn validate(&self) -> Result<()> {
        if self.max_age_secs == 0 {
            return Err(Error::InvalidParameter {
                name: "max_age_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.max_confidence_bps > BPS_DIVISOR {
            return Err(Error::InvalidParameter {
                name: "max_confidence_bps".into(),
                reason: format!("cannot exceed {}", BPS_DIVISOR),
            });
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE QUOTE
// ═══════════════════════════════════════════════════════════════════════════════

/// A USD price quote: `price * 10^exponent` dollars per whole token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceQuote {
    /// Raw price mantissa
    pub price: i64,
    /// Confidence interval, same units as `price`
    pub confidence: u64,
    /// Decimal exponent applied to `price` and `confidence`
    pub exponent: i32,
    /// Unix timestamp the quote was published
    pub publish_time: u64,
}

impl PriceQuote {
    /// Create a new quote
    pub fn new(price: i64, confidence: u64, exponent: i32, publish_time: u64) -> Self {
        Self {
            price,
            confidence,
            exponent,
            publish_time,
        }
    }

    /// Convenience constructor for a whole-dollar price with 8 decimals
    pub fn from_dollars(dollars: i64, publish_time: u64) -> Self {
        Self::new(dollars.saturating_mul(100_000_000), 0, -8, publish_time)
    }

    /// Age of the quote in seconds
    pub fn age(&self, current_time: u64) -> u64 {
        current_time.saturating_sub(self.publish_time)
    }

    /// Reject non-positive, stale or low-confidence quotes
    pub fn validate(&self, kind: CollateralKind, current_time: u64, config: &OracleConfig) -> Result<()> {
        if self.price <= 0 {
            return Err(Error::InvalidPrice {
                asset: kind.symbol().into(),
                price: self.price,
            });
        }
        validate_price_freshness(self.publish_time, current_time, config.max_age_secs)?;
        validate_price_confidence(self.price, self.confidence, config.max_confidence_bps)?;
        Ok(())
    }

    /// Decimal shift from one smallest collateral unit to aUSD base units
    fn unit_shift(&self, kind: CollateralKind) -> i64 {
        AUSD_DECIMALS as i64 + self.exponent as i64 - kind.decimals() as i64
    }

    fn positive_price(&self, kind: CollateralKind) -> Result<u128> {
        if self.price <= 0 {
            return Err(Error::InvalidPrice {
                asset: kind.symbol().into(),
                price: self.price,
            });
        }
        Ok(self.price as u128)
    }

    /// Value of `amount` smallest units of `kind`, in aUSD base units (floored)
    pub fn value_of(&self, kind: CollateralKind, amount: u128) -> Result<u128> {
        let price = self.positive_price(kind)?;
        let shift = self.unit_shift(kind);
        if shift >= 0 {
            let per_unit = safe_mul(price, pow10(shift as u32)?)?;
            safe_mul(amount, per_unit)
        } else {
            mul_div(amount, price, pow10(shift.unsigned_abs() as u32)?)
        }
    }

    /// Smallest units of `kind` worth `debt` aUSD base units at face value (floored)
    pub fn collateral_for(&self, kind: CollateralKind, debt: u128) -> Result<u128> {
        let price = self.positive_price(kind)?;
        let shift = self.unit_shift(kind);
        if shift >= 0 {
            let per_unit = safe_mul(price, pow10(shift as u32)?)?;
            safe_div(debt, per_unit)
        } else {
            mul_div(debt, pow10(shift.unsigned_abs() as u32)?, price)
        }
    }

    /// Format price for display
    pub fn format_price(&self) -> String {
        if self.exponent >= 0 {
            return format!("${}", (self.price as i128) * 10i128.pow(self.exponent as u32));
        }
        let scale = 10i128.pow(self.exponent.unsigned_abs());
        let whole = self.price as i128 / scale;
        let frac = (self.price as i128 % scale).abs();
        format!("${}.{:0width$}", whole, frac, width = self.exponent.unsigned_abs() as usize)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ORACLE COLLABORATOR
// ═══════════════════════════════════════════════════════════════════════════════

/// External price source
pub trait PriceOracle {
    /// Latest quote for a collateral kind
    fn get_price(&self, kind: CollateralKind) -> Result<PriceQuote>;
}

/// Oracle whose quotes are set by an admin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualPriceFeed {
    /// Account allowed to set prices
    admin: Address,
    /// Latest quote per kind
    prices: BTreeMap<CollateralKind, PriceQuote>,
}

impl ManualPriceFeed {
    /// Create an empty feed controlled by `admin`
    pub fn new(admin: Address) -> Self {
        Self {
            admin,
            prices: BTreeMap::new(),
        }
    }

    fn ensure_admin(&self, caller: &Address) -> Result<()> {
        if caller != &self.admin {
            return Err(Error::Unauthorized(format!("{} is not the oracle admin", caller.short())));
        }
        Ok(())
    }

    /// Set or replace the quote for a kind
    pub fn set_price(&mut self, caller: &Address, kind: CollateralKind, quote: PriceQuote) -> Result<()> {
        self.ensure_admin(caller)?;
        debug!(%kind, price = quote.price, exponent = quote.exponent, "Price set");
        self.prices.insert(kind, quote);
        Ok(())
    }

    /// Remove the quote for a kind
    pub fn remove_price(&mut self, caller: &Address, kind: CollateralKind) -> Result<()> {
        self.ensure_admin(caller)?;
        self.prices
            .remove(&kind)
            .map(|_| ())
            .ok_or_else(|| Error::PriceUnavailable(kind.symbol().into()))
    }

    /// Kinds with a quote
    pub fn kinds(&self) -> Vec<CollateralKind> {
        self.prices.keys().copied().collect()
    }

    /// Oracle admin
    pub fn admin(&self) -> &Address {
        &self.admin
    }
}

impl PriceOracle for ManualPriceFeed {
    fn get_price(&self, kind: CollateralKind) -> Result<PriceQuote> {
        self.prices
            .get(&kind)
            .copied()
            .ok_or_else(|| Error::PriceUnavailable(kind.symbol().into()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE BOOK
// ═══════════════════════════════════════════════════════════════════════════════

/// Quotes read once at the start of an operation.
///
/// A kind whose quote failed validation keeps the failure, so an operation
/// only errors when it actually needs that price.
#[derive(Debug, Clone, Default)]
pub struct PriceBook {
    quotes: BTreeMap<CollateralKind, std::result::Result<PriceQuote, Error>>,
}

impl PriceBook {
    /// Read and validate every kind from the oracle
    pub fn fetch<O: PriceOracle + ?Sized>(oracle: &O, current_time: u64, config: &OracleConfig) -> Self {
        let quotes = CollateralKind::ALL
            .iter()
            .map(|&kind| {
                let checked = oracle
                    .get_price(kind)
                    .and_then(|quote| quote.validate(kind, current_time, config).map(|_| quote));
                (kind, checked)
            })
            .collect();
        Self { quotes }
    }

    /// Book built from already-trusted quotes
    pub fn from_quotes(quotes: impl IntoIterator<Item = (CollateralKind, PriceQuote)>) -> Self {
        Self {
            quotes: quotes.into_iter().map(|(k, q)| (k, Ok(q))).collect(),
        }
    }

    /// Validated quote for `kind`, or the reason it was rejected
    pub fn quote(&self, kind: CollateralKind) -> Result<&PriceQuote> {
        match self.quotes.get(&kind) {
            Some(Ok(quote)) => Ok(quote),
            Some(Err(e)) => Err(e.clone()),
            None => Err(Error::PriceUnavailable(kind.symbol().into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_quote_validation() {
        let config = OracleConfig::default();
        let good = PriceQuote::new(100_00000000, 1_000000, -8, NOW - 5);
        assert!(good.validate(CollateralKind::Sol, NOW, &config).is_ok());

        let zero = PriceQuote::new(0, 0, -8, NOW);
        assert!(matches!(
            zero.validate(CollateralKind::Sol, NOW, &config),
            Err(Error::InvalidPrice { .. })
        ));

        let negative = PriceQuote::new(-5, 0, -8, NOW);
        assert!(negative.validate(CollateralKind::Sol, NOW, &config).is_err());

        let stale = PriceQuote::new(100_00000000, 0, -8, NOW - 61);
        assert!(matches!(
            stale.validate(CollateralKind::Sol, NOW, &config),
            Err(Error::StalePrice { .. })
        ));

        // 3% interval against a 2% ceiling
        let wide = PriceQuote::new(100_00000000, 3_00000000, -8, NOW);
        assert!(matches!(
            wide.validate(CollateralKind::Sol, NOW, &config),
            Err(Error::LowConfidence { .. })
        ));
    }

    #[test]
    fn test_value_of_sol() {
        // 10 SOL at $100 = 1000 aUSD
        let quote = PriceQuote::from_dollars(100, NOW);
        let value = quote.value_of(CollateralKind::Sol, 10 * 1_000_000_000).unwrap();
        assert_eq!(value, 1_000 * AUSD_UNIT);
    }

    #[test]
    fn test_value_with_negative_shift() {
        // $100 with exponent -12: shift for SOL is 18 - 12 - 9 = -3
        let quote = PriceQuote::new(100 * 10i64.pow(12), 0, -12, NOW);
        let value = quote.value_of(CollateralKind::Sol, 1_000_000_000).unwrap();
        assert_eq!(value, 100 * AUSD_UNIT);
        assert_eq!(quote.collateral_for(CollateralKind::Sol, 100 * AUSD_UNIT).unwrap(), 1_000_000_000);
    }

    #[test]
    fn test_collateral_for_debt() {
        let quote = PriceQuote::from_dollars(100, NOW);
        // 500 aUSD of SOL at $100 = 5 SOL
        let coll = quote.collateral_for(CollateralKind::Sol, 500 * AUSD_UNIT).unwrap();
        assert_eq!(coll, 5_000_000_000);

        // BTC at $50,000: 1000 aUSD = 0.02 BTC = 2,000,000 sats
        let btc = PriceQuote::from_dollars(50_000, NOW);
        assert_eq!(btc.collateral_for(CollateralKind::Btc, 1_000 * AUSD_UNIT).unwrap(), 2_000_000);
    }

    #[test]
    fn test_format_price() {
        assert_eq!(PriceQuote::from_dollars(57, NOW).format_price(), "$57.00000000");
        assert_eq!(PriceQuote::new(12345, 0, -2, NOW).format_price(), "$123.45");
    }

    #[test]
    fn test_manual_feed_admin_only() {
        let admin = Address::derive("admin");
        let mut feed = ManualPriceFeed::new(admin);

        let err = feed.set_price(&Address::derive("mallory"), CollateralKind::Sol, PriceQuote::from_dollars(1, NOW));
        assert!(matches!(err, Err(Error::Unauthorized(_))));

        feed.set_price(&admin, CollateralKind::Sol, PriceQuote::from_dollars(100, NOW)).unwrap();
        assert_eq!(feed.get_price(CollateralKind::Sol).unwrap().price, 100_00000000);
        assert!(matches!(feed.get_price(CollateralKind::Btc), Err(Error::PriceUnavailable(_))));

        feed.remove_price(&admin, CollateralKind::Sol).unwrap();
        assert!(feed.get_price(CollateralKind::Sol).is_err());
    }

    #[test]
    fn test_price_book_keeps_rejections_per_kind() {
        let admin = Address::derive("admin");
        let mut feed = ManualPriceFeed::new(admin);
        feed.set_price(&admin, CollateralKind::Sol, PriceQuote::from_dollars(100, NOW)).unwrap();
        feed.set_price(&admin, CollateralKind::Btc, PriceQuote::from_dollars(60_000, NOW - 3600)).unwrap();

        let book = PriceBook::fetch(&feed, NOW, &OracleConfig::default());
        assert!(book.quote(CollateralKind::Sol).is_ok());
        assert!(matches!(book.quote(CollateralKind::Btc), Err(Error::StalePrice { .. })));
        assert!(matches!(book.quote(CollateralKind::Eth), Err(Error::PriceUnavailable(_))));
    }
}
