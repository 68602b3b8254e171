//! Protocol constants and magic numbers.
//!
//! All protocol-wide constants are defined here for easy auditing and modification.

// ═══════════════════════════════════════════════════════════════════════════════
// AUSD CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// aUSD decimals (debt and stake amounts are 18-decimal fixed point)
pub const AUSD_DECIMALS: u32 = 18;

/// Base unit for aUSD (1 aUSD = 10^18 units)
pub const AUSD_UNIT: u128 = 1_000_000_000_000_000_000;

/// Minimum debt per open position - 10 aUSD
pub const MINIMUM_LOAN_AMOUNT: u128 = 10 * AUSD_UNIT;

// ═══════════════════════════════════════════════════════════════════════════════
// COLLATERALIZATION CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// One percent in micro-percent units
pub const MICRO_PERCENT: u64 = 1_000_000;

/// 100% in micro-percent units
pub const ONE_HUNDRED_PERCENT: u64 = 100 * MICRO_PERCENT;

/// Minimum Collateralization Ratio (MCR) - 115%
/// Below this ratio a position can be liquidated
pub const DEFAULT_MINIMUM_COLLATERAL_RATIO: u64 = 115 * MICRO_PERCENT;

/// Lowest MCR an admin may configure - 100%
pub const MIN_CONFIGURABLE_MCR: u64 = ONE_HUNDRED_PERCENT;

/// Highest MCR an admin may configure - 1000%
pub const MAX_CONFIGURABLE_MCR: u64 = 1_000 * MICRO_PERCENT;

/// ICR reported for a position with zero debt
pub const INFINITE_ICR: u64 = u64::MAX;

// ═══════════════════════════════════════════════════════════════════════════════
// FEE CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Basis points divisor (10000 = 100%)
pub const BPS_DIVISOR: u64 = 10_000;

/// Protocol fee skimmed from borrows and redemptions - 5%
pub const DEFAULT_PROTOCOL_FEE_BPS: u64 = 500;

/// Highest protocol fee an admin may configure - 50%
pub const MAX_PROTOCOL_FEE_BPS: u64 = 5_000;

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum number of positions in one liquidation batch
pub const MAX_LIQUIDATION_BATCH_SIZE: usize = 50;

// ═══════════════════════════════════════════════════════════════════════════════
// ORACLE CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Maximum price age in seconds
pub const DEFAULT_MAX_PRICE_AGE_SECS: u64 = 60;

/// Widest accepted confidence interval, in basis points of price - 2%
pub const DEFAULT_MAX_CONFIDENCE_BPS: u64 = 200;

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Scale factor for stability pool calculations (initial P)
pub const SP_SCALE_FACTOR: u128 = 1_000_000_000_000_000_000; // 10^18

/// Factor applied to P on a scale change, and the P floor that triggers it
pub const SP_RESCALE_FACTOR: u128 = 1_000_000_000; // 10^9

// ═══════════════════════════════════════════════════════════════════════════════
// IDENTIFIER CONSTANTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Length of an owner address in bytes
pub const ADDRESS_LENGTH: usize = 32;

/// Length of a hash in bytes (SHA256)
pub const HASH_LENGTH: usize = 32;
