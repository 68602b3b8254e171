//! Checked integer arithmetic for fixed-point amounts.
//!
//! Amounts are `u128` fixed-point integers. Every operation either returns an
//! exact result or a distinct arithmetic error; nothing wraps. `mul_div`
//! keeps a 256-bit intermediate so `a * b / c` never overflows as long as the
//! quotient itself fits in 128 bits.

use crate::error::{Error, Result};
use crate::utils::constants::BPS_DIVISOR;

const LOW_MASK: u128 = u64::MAX as u128;

// ═══════════════════════════════════════════════════════════════════════════════
// SAFE ARITHMETIC OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Safe addition with overflow check
pub fn safe_add(a: u128, b: u128) -> Result<u128> {
    a.checked_add(b).ok_or(Error::Overflow {
        operation: format!("{} + {}", a, b),
    })
}

/// Safe subtraction with underflow check
pub fn safe_sub(a: u128, b: u128) -> Result<u128> {
    a.checked_sub(b).ok_or(Error::Underflow {
        operation: format!("{} - {}", a, b),
    })
}

/// Safe multiplication with overflow check
pub fn safe_mul(a: u128, b: u128) -> Result<u128> {
    a.checked_mul(b).ok_or(Error::Overflow {
        operation: format!("{} * {}", a, b),
    })
}

/// Safe division with zero check
pub fn safe_div(a: u128, b: u128) -> Result<u128> {
    if b == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("{} / 0", a),
        });
    }
    Ok(a / b)
}

/// `10^exp` as a checked `u128`
pub fn pow10(exp: u32) -> Result<u128> {
    10u128.checked_pow(exp).ok_or(Error::Overflow {
        operation: format!("10^{}", exp),
    })
}

// ═══════════════════════════════════════════════════════════════════════════════
// WIDE MULTIPLY-DIVIDE
// ═══════════════════════════════════════════════════════════════════════════════

/// Full 256-bit product of two `u128`s as `(high, low)` words
pub fn widening_mul(a: u128, b: u128) -> (u128, u128) {
    let (a1, a0) = (a >> 64, a & LOW_MASK);
    let (b1, b0) = (b >> 64, b & LOW_MASK);

    let p00 = a0 * b0;
    let p01 = a0 * b1;
    let p10 = a1 * b0;
    let p11 = a1 * b1;

    // Each term is below 2^64, so the sum fits comfortably.
    let mid = (p00 >> 64) + (p01 & LOW_MASK) + (p10 & LOW_MASK);
    let low = (p00 & LOW_MASK) | (mid << 64);
    let high = p11 + (p01 >> 64) + (p10 >> 64) + (mid >> 64);
    (high, low)
}

/// Divide a 256-bit value by `divisor`, returning `(quotient, remainder)`.
///
/// Returns `None` if the quotient does not fit in 128 bits.
fn div_wide(high: u128, low: u128, divisor: u128) -> Option<(u128, u128)> {
    if high >= divisor {
        return None;
    }
    if high == 0 {
        return Some((low / divisor, low % divisor));
    }

    let mut rem = high;
    let mut quo: u128 = 0;
    for bit in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((low >> bit) & 1);
        quo <<= 1;
        if carry == 1 || rem >= divisor {
            rem = rem.wrapping_sub(divisor);
            quo |= 1;
        }
    }
    Some((quo, rem))
}

/// Compute `floor(a * b / c)` with a 256-bit intermediate
pub fn mul_div(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("({} * {}) / 0", a, b),
        });
    }
    let (high, low) = widening_mul(a, b);
    div_wide(high, low, c)
        .map(|(quo, _)| quo)
        .ok_or(Error::Overflow {
            operation: format!("({} * {}) / {}", a, b, c),
        })
}

/// Compute `ceil(a * b / c)` with a 256-bit intermediate
pub fn mul_div_up(a: u128, b: u128, c: u128) -> Result<u128> {
    if c == 0 {
        return Err(Error::DivisionByZero {
            operation: format!("ceil(({} * {}) / 0)", a, b),
        });
    }
    let (high, low) = widening_mul(a, b);
    let (quo, rem) = div_wide(high, low, c).ok_or(Error::Overflow {
        operation: format!("ceil(({} * {}) / {})", a, b, c),
    })?;
    if rem == 0 {
        Ok(quo)
    } else {
        safe_add(quo, 1)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEE AND SHARE CALCULATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Calculate a fee given in basis points
pub fn calculate_fee_bps(amount: u128, fee_bps: u64) -> Result<u128> {
    mul_div(amount, fee_bps as u128, BPS_DIVISOR as u128)
}

/// Calculate amount after fee deduction, returning `(net, fee)`
pub fn amount_after_fee(amount: u128, fee_bps: u64) -> Result<(u128, u128)> {
    let fee = calculate_fee_bps(amount, fee_bps)?;
    Ok((safe_sub(amount, fee)?, fee))
}

/// Split an amount in two halves; an odd unit goes to the second half
pub fn split_half(amount: u128) -> (u128, u128) {
    let first = amount / 2;
    (first, amount - first)
}
