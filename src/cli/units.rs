//! Decimal amounts at the CLI boundary.
//!
//! Operators type human amounts ("10.5" SOL, "500" aUSD); the protocol works in
//! smallest units. Conversion goes through `rust_decimal` so no float rounding
//! ever touches an amount.

use num_traits::ToPrimitive;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::cli::CliError;
use crate::core::collateral::CollateralKind;
use crate::utils::constants::{AUSD_DECIMALS, MICRO_PERCENT};

/// Parse a decimal string into smallest units with `decimals` places
pub fn parse_units(input: &str, decimals: u32) -> Result<u128, CliError> {
    let invalid = |reason: &str| CliError::InvalidArgument(format!("amount '{}': {}", input, reason));

    let value = Decimal::from_str(input.trim()).map_err(|e| invalid(&e.to_string()))?;
    if value.is_sign_negative() {
        return Err(invalid("must not be negative"));
    }

    let scale = 10u64
        .checked_pow(decimals)
        .ok_or_else(|| invalid("unsupported precision"))?;
    let scaled = value
        .checked_mul(Decimal::from(scale))
        .ok_or_else(|| invalid("too large"))?;
    if !scaled.fract().is_zero() {
        return Err(invalid(&format!("more than {} decimal places", decimals)));
    }

    scaled.trunc().to_u128().ok_or_else(|| invalid("too large"))
}

/// Render smallest units as a decimal string without trailing zeros
pub fn format_units(amount: u128, decimals: u32) -> String {
    match i128::try_from(amount)
        .ok()
        .and_then(|mantissa| Decimal::try_from_i128_with_scale(mantissa, decimals).ok())
    {
        Some(value) => value.normalize().to_string(),
        None => format!("{}e-{}", amount, decimals),
    }
}

/// Parse an aUSD amount
pub fn parse_ausd(input: &str) -> Result<u128, CliError> {
    parse_units(input, AUSD_DECIMALS)
}

/// Render an aUSD amount
pub fn format_ausd(amount: u128) -> String {
    format!("{} aUSD", format_units(amount, AUSD_DECIMALS))
}

/// Parse a collateral amount of `kind`
pub fn parse_collateral(input: &str, kind: CollateralKind) -> Result<u128, CliError> {
    parse_units(input, kind.decimals())
}

/// Render a collateral amount of `kind`
pub fn format_collateral(amount: u128, kind: CollateralKind) -> String {
    format!("{} {}", format_units(amount, kind.decimals()), kind)
}

/// Decimal places kept for operator-set prices
pub const PRICE_DECIMALS: u32 = 8;

/// Parse a USD price into a mantissa with exponent `-PRICE_DECIMALS`
pub fn parse_price(input: &str) -> Result<i64, CliError> {
    let mantissa = parse_units(input, PRICE_DECIMALS)?;
    if mantissa == 0 {
        return Err(CliError::InvalidArgument(format!("price '{}' must be positive", input)));
    }
    i64::try_from(mantissa).map_err(|_| CliError::InvalidArgument(format!("price '{}' too large", input)))
}

/// Parse a percentage such as "115" or "112.5" into micro-percent
pub fn parse_percent(input: &str) -> Result<u64, CliError> {
    let micro = parse_units(input, 6)?;
    u64::try_from(micro).map_err(|_| CliError::InvalidArgument(format!("percentage '{}' too large", input)))
}

/// Render a micro-percent ratio
pub fn format_ratio(icr: u64) -> String {
    if icr == u64::MAX {
        return "∞".into();
    }
    let whole = icr / MICRO_PERCENT;
    let frac = (icr % MICRO_PERCENT) / 10_000;
    format!("{}.{:02}%", whole, frac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::AUSD_UNIT;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse_ausd("500").unwrap(), 500 * AUSD_UNIT);
        assert_eq!(parse_ausd("0.5").unwrap(), AUSD_UNIT / 2);
        assert_eq!(parse_collateral("10", CollateralKind::Sol).unwrap(), 10_000_000_000);
        assert_eq!(parse_collateral("0.00000001", CollateralKind::Btc).unwrap(), 1);
    }

    #[test]
    fn test_parse_units_rejects_bad_input() {
        assert!(parse_collateral("0.000000001", CollateralKind::Btc).is_err());
        assert!(parse_ausd("-1").is_err());
        assert!(parse_ausd("ten").is_err());
    }

    #[test]
    fn test_format_units() {
        assert_eq!(format_ausd(475 * AUSD_UNIT), "475 aUSD");
        assert_eq!(format_collateral(1_500_000_000, CollateralKind::Sol), "1.5 SOL");
        assert_eq!(format_units(0, 8), "0");
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("57").unwrap(), 5_700_000_000);
        assert_eq!(parse_price("0.25").unwrap(), 25_000_000);
        assert!(parse_price("0").is_err());
    }

    #[test]
    fn test_percent() {
        assert_eq!(parse_percent("115").unwrap(), 115 * MICRO_PERCENT);
        assert_eq!(parse_percent("112.5").unwrap(), 112_500_000);
        assert_eq!(format_ratio(200 * MICRO_PERCENT), "200.00%");
        assert_eq!(format_ratio(114_285_714), "114.28%");
        assert_eq!(format_ratio(u64::MAX), "∞");
    }
}
