//! Input validation utilities for the aUSD protocol.
//!
//! Validation runs before any state is touched, so a rejected call never
//! leaves partial effects behind.

use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// AMOUNT VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate that an amount is non-zero
pub fn validate_non_zero(amount: u128) -> Result<()> {
    if amount == 0 {
        return Err(Error::ZeroAmount);
    }
    Ok(())
}

/// Validate a new loan meets the minimum
pub fn validate_loan_amount(amount: u128, minimum: u128) -> Result<()> {
    validate_non_zero(amount)?;

    if amount < minimum {
        return Err(Error::DebtBelowMinimum { amount, minimum });
    }

    Ok(())
}

/// Validate debt left on an open position: zero (closed) or at least the minimum
pub fn validate_remaining_debt(debt: u128, minimum: u128) -> Result<()> {
    if debt != 0 && debt < minimum {
        return Err(Error::DebtBelowMinimum {
            amount: debt,
            minimum,
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// RATIO VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate collateralization ratio (both in micro-percent)
pub fn validate_collateral_ratio(ratio: u64, minimum: u64) -> Result<()> {
    if ratio < minimum {
        return Err(Error::CollateralizationRatioTooLow {
            current: ratio,
            minimum,
        });
    }
    Ok(())
}

/// Validate an MCR value an admin wants to configure
pub fn validate_mcr(ratio: u64) -> Result<()> {
    if !(MIN_CONFIGURABLE_MCR..=MAX_CONFIGURABLE_MCR).contains(&ratio) {
        return Err(Error::InvalidParameter {
            name: "minimum_collateral_ratio".into(),
            reason: format!(
                "{} outside [{}, {}] micro-percent",
                ratio, MIN_CONFIGURABLE_MCR, MAX_CONFIGURABLE_MCR
            ),
        });
    }
    Ok(())
}

/// Validate a protocol fee in basis points
pub fn validate_fee_bps(fee_bps: u64) -> Result<()> {
    if fee_bps > MAX_PROTOCOL_FEE_BPS {
        return Err(Error::InvalidParameter {
            name: "protocol_fee".into(),
            reason: format!("{} bps exceeds maximum {} bps", fee_bps, MAX_PROTOCOL_FEE_BPS),
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate a quote's publish time against the freshness window
pub fn validate_price_freshness(publish_time: u64, current_time: u64, max_age: u64) -> Result<()> {
    if current_time < publish_time {
        return Err(Error::PriceFromFuture {
            publish_time,
            now: current_time,
        });
    }

    let age = current_time - publish_time;
    if age > max_age {
        return Err(Error::StalePrice { age, max_age });
    }

    Ok(())
}

/// Validate that a confidence interval is narrow enough relative to price.
///
/// `price` must already be known positive.
pub fn validate_price_confidence(price: i64, confidence: u64, max_bps: u64) -> Result<()> {
    let limit = (price.unsigned_abs() as u128) * (max_bps as u128);
    if (confidence as u128) * (BPS_DIVISOR as u128) > limit {
        return Err(Error::LowConfidence {
            confidence,
            price,
            max_bps,
        });
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADDRESS VALIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Validate that `caller` acts on its own record
pub fn validate_owner(caller: &Address, owner: &Address, record: &str) -> Result<()> {
    if caller != owner {
        return Err(Error::Unauthorized(format!(
            "{} is not the {} owner",
            caller.short(),
            record
        )));
    }
    Ok(())
}

/// Validate that two recipient addresses differ
pub fn validate_distinct_addresses(first: &Address, second: &Address) -> Result<()> {
    if first == second {
        return Err(Error::InvalidParameter {
            name: "fee_addresses".into(),
            reason: "fee addresses must be different".into(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_loan_amount() {
        assert!(validate_loan_amount(MINIMUM_LOAN_AMOUNT, MINIMUM_LOAN_AMOUNT).is_ok());
        assert_eq!(validate_loan_amount(0, MINIMUM_LOAN_AMOUNT), Err(Error::ZeroAmount));
        assert!(matches!(
            validate_loan_amount(MINIMUM_LOAN_AMOUNT - 1, MINIMUM_LOAN_AMOUNT),
            Err(Error::DebtBelowMinimum { .. })
        ));
    }

    #[test]
    fn test_validate_remaining_debt() {
        assert!(validate_remaining_debt(0, MINIMUM_LOAN_AMOUNT).is_ok());
        assert!(validate_remaining_debt(MINIMUM_LOAN_AMOUNT, MINIMUM_LOAN_AMOUNT).is_ok());
        assert!(validate_remaining_debt(1, MINIMUM_LOAN_AMOUNT).is_err());
    }

    #[test]
    fn test_validate_price_freshness() {
        let current = 1_000_000;

        assert!(validate_price_freshness(current - 10, current, 60).is_ok());
        assert!(validate_price_freshness(current - 60, current, 60).is_ok());
        assert_eq!(
            validate_price_freshness(current - 61, current, 60),
            Err(Error::StalePrice { age: 61, max_age: 60 })
        );
        assert!(matches!(
            validate_price_freshness(current + 1, current, 60),
            Err(Error::PriceFromFuture { .. })
        ));
    }

    #[test]
    fn test_validate_price_confidence() {
        // 2% of 10_000 = 200
        assert!(validate_price_confidence(10_000, 200, 200).is_ok());
        assert!(validate_price_confidence(10_000, 201, 200).is_err());
        assert!(validate_price_confidence(10_000, 0, 200).is_ok());
    }

    #[test]
    fn test_validate_collateral_ratio() {
        assert!(validate_collateral_ratio(150_000_000, 115_000_000).is_ok());
        assert!(validate_collateral_ratio(115_000_000, 115_000_000).is_ok());
        assert!(validate_collateral_ratio(114_999_999, 115_000_000).is_err());
    }

    #[test]
    fn test_validate_admin_params() {
        assert!(validate_mcr(DEFAULT_MINIMUM_COLLATERAL_RATIO).is_ok());
        assert!(validate_mcr(MIN_CONFIGURABLE_MCR - 1).is_err());
        assert!(validate_fee_bps(MAX_PROTOCOL_FEE_BPS).is_ok());
        assert!(validate_fee_bps(MAX_PROTOCOL_FEE_BPS + 1).is_err());
    }

    #[test]
    fn test_validate_owner() {
        let alice = Address::derive("alice");
        let bob = Address::derive("bob");
        assert!(validate_owner(&alice, &alice, "position").is_ok());
        assert!(matches!(
            validate_owner(&bob, &alice, "position"),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_validate_distinct_addresses() {
        let a = Address::derive("fee-1");
        let b = Address::derive("fee-2");
        assert!(validate_distinct_addresses(&a, &b).is_ok());
        assert!(validate_distinct_addresses(&a, &a).is_err());
    }
}
