//! Health index: collateral value, ICR and TCR.
//!
//! Ratios are expressed in micro-percent (`1_000_000` = 1%). Every quotient
//! is computed as a 256-bit multiply followed by one division, so
//! precision is only lost in the final floor.

use serde::{Deserialize, Serialize};

use crate::core::position::{CollateralMap, Position, PositionStore};
use crate::core::sorted::IcrSource;
use crate::error::{Error, Result};
use crate::oracle::price_feed::PriceBook;
use crate::utils::constants::*;
use crate::utils::crypto::Address;
use crate::utils::math::*;

/// USD value of a collateral map in aUSD base units.
///
/// Kinds held at zero never need a price.
pub fn collateral_value(collateral: &CollateralMap, prices: &PriceBook) -> Result<u128> {
    collateral
        .iter()
        .filter(|(_, &amount)| amount > 0)
        .try_fold(0u128, |acc, (&kind, &amount)| {
            let quote = prices.quote(kind)?;
            safe_add(acc, quote.value_of(kind, amount)?)
        })
}

/// Ratio of `value` to `debt` in micro-percent.
///
/// Zero debt and ratios too large for `u64` both yield `INFINITE_ICR`.
pub fn ratio_from_value(value: u128, debt: u128) -> Result<u64> {
    if debt == 0 {
        return Ok(INFINITE_ICR);
    }
    match mul_div(value, ONE_HUNDRED_PERCENT as u128, debt) {
        Ok(ratio) => Ok(u64::try_from(ratio).unwrap_or(INFINITE_ICR)),
        Err(Error::Overflow { .. }) => Ok(INFINITE_ICR),
        Err(e) => Err(e),
    }
}

/// Individual collateralization ratio of a position
pub fn compute_icr(position: &Position, prices: &PriceBook) -> Result<u64> {
    ratio_from_value(collateral_value(&position.collateral, prices)?, position.debt)
}

/// Largest debt `value` can back at ratio `mcr`
pub fn max_debt_for_value(value: u128, mcr: u64) -> Result<u128> {
    mul_div(value, ONE_HUNDRED_PERCENT as u128, mcr as u128)
}

/// Total collateralization ratio across all open positions
pub fn total_collateral_ratio(store: &PositionStore, prices: &PriceBook) -> Result<u64> {
    let mut value = 0u128;
    let mut debt = 0u128;
    for position in store.active() {
        value = safe_add(value, collateral_value(&position.collateral, prices)?)?;
        debt = safe_add(debt, position.debt)?;
    }
    ratio_from_value(value, debt)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HEALTH SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Health of one position at current prices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionHealth {
    /// ICR in micro-percent
    pub icr: u64,
    /// Collateral value in aUSD base units
    pub collateral_value: u128,
    /// Current debt
    pub debt: u128,
    /// Additional debt allowed before hitting the MCR
    pub max_additional_debt: u128,
    /// ICR below the MCR
    pub liquidatable: bool,
}

impl PositionHealth {
    /// Assess a position against the MCR
    pub fn assess(position: &Position, prices: &PriceBook, mcr: u64) -> Result<Self> {
        let value = collateral_value(&position.collateral, prices)?;
        let icr = ratio_from_value(value, position.debt)?;
        let max_debt = max_debt_for_value(value, mcr)?;
        Ok(Self {
            icr,
            collateral_value: value,
            debt: position.debt,
            max_additional_debt: max_debt.saturating_sub(position.debt),
            liquidatable: position.debt > 0 && icr < mcr,
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIVE ICR VIEW
// ═══════════════════════════════════════════════════════════════════════════════

/// ICRs of stored positions priced from one book
pub struct HealthView<'a> {
    positions: &'a PositionStore,
    prices: &'a PriceBook,
}

impl<'a> HealthView<'a> {
    /// Create a view
    pub fn new(positions: &'a PositionStore, prices: &'a PriceBook) -> Self {
        Self { positions, prices }
    }
}

impl IcrSource for HealthView<'_> {
    fn icr(&self, owner: &Address) -> Result<u64> {
        compute_icr(self.positions.get_active(owner)?, self.prices)
    }
}
