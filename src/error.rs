//! Error types for the aUSD protocol core.
//!
//! Every failure is a distinct, structured variant so callers can tell
//! a stale hint from a bad amount without parsing messages.

use thiserror::Error;

/// Result type alias for aUSD operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the aUSD protocol
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ═══════════════════════════════════════════════════════════════════
    // Position Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Position not found in the store
    #[error("Position not found: {0}")]
    PositionNotFound(String),

    /// Owner already has an open position
    #[error("Position already exists: {0}")]
    PositionAlreadyExists(String),

    /// Position is not active
    #[error("Position is not active: {0}")]
    PositionNotActive(String),

    /// Insufficient collateral for the requested operation
    #[error("Insufficient collateral: required {required}, available {available}")]
    InsufficientCollateral {
        /// Required collateral amount
        required: u128,
        /// Available collateral amount
        available: u128,
    },

    /// Collateralization ratio below minimum
    #[error("Collateralization ratio {current} below minimum {minimum} (micro-percent)")]
    CollateralizationRatioTooLow {
        /// Current ratio in micro-percent
        current: u64,
        /// Minimum required ratio in micro-percent
        minimum: u64,
    },

    /// Debt amount below protocol minimum
    #[error("Debt amount {amount} below minimum {minimum}")]
    DebtBelowMinimum {
        /// Resulting debt amount
        amount: u128,
        /// Protocol minimum loan
        minimum: u128,
    },

    /// Repayment larger than the outstanding debt
    #[error("Repayment {amount} exceeds outstanding debt {debt}")]
    RepaymentExceedsDebt {
        /// Requested repayment
        amount: u128,
        /// Outstanding debt
        debt: u128,
    },

    /// Nothing to claim for this owner
    #[error("Nothing to claim for {0}")]
    NothingToClaim(String),

    // ═══════════════════════════════════════════════════════════════════
    // Liquidation and Capacity Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Position is healthy and cannot be liquidated
    #[error("Position {0} is healthy and cannot be liquidated")]
    PositionHealthy(String),

    /// Insufficient funds in the stability pool
    #[error("Insufficient stability pool balance: required {required}, available {available}")]
    InsufficientStabilityPool {
        /// Required amount
        required: u128,
        /// Available amount
        available: u128,
    },

    /// No stability pool deposit for this owner
    #[error("No stability pool deposit for {0}")]
    DepositNotFound(String),

    /// Not enough redeemable debt across open positions
    #[error("Insufficient redemption capacity: requested {requested}, redeemable {redeemable}")]
    InsufficientRedemptionCapacity {
        /// Net amount requested
        requested: u128,
        /// Amount that could be redeemed
        redeemable: u128,
    },

    /// Liquidation batch exceeds the configured cap
    #[error("Liquidation batch of {size} exceeds maximum {max}")]
    BatchTooLarge {
        /// Requested batch size
        size: usize,
        /// Maximum batch size
        max: usize,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Oracle Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Price is stale (not updated recently)
    #[error("Price is stale: published {age}s ago, max allowed {max_age}s")]
    StalePrice {
        /// Seconds since publication
        age: u64,
        /// Maximum allowed age in seconds
        max_age: u64,
    },

    /// Price published in the future relative to the current block
    #[error("Price timestamp {publish_time} is ahead of current time {now}")]
    PriceFromFuture {
        /// Quote publish time
        publish_time: u64,
        /// Current block timestamp
        now: u64,
    },

    /// Zero or negative price
    #[error("Invalid price {price} for {asset}")]
    InvalidPrice {
        /// Asset symbol
        asset: String,
        /// Quoted price
        price: i64,
    },

    /// Confidence interval too wide relative to price
    #[error("Price confidence {confidence} too wide for price {price} (max {max_bps} bps)")]
    LowConfidence {
        /// Confidence interval
        confidence: u64,
        /// Quoted price
        price: i64,
        /// Maximum interval in basis points of price
        max_bps: u64,
    },

    /// Oracle has no price for an asset
    #[error("No price available for {0}")]
    PriceUnavailable(String),

    // ═══════════════════════════════════════════════════════════════════
    // Authorization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Not authorized to perform this action
    #[error("Not authorized: {0}")]
    Unauthorized(String),

    // ═══════════════════════════════════════════════════════════════════
    // Validation Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Invalid input parameter
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Amount is zero
    #[error("Amount cannot be zero")]
    ZeroAmount,

    // ═══════════════════════════════════════════════════════════════════
    // Arithmetic Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Overflow in calculation
    #[error("Arithmetic overflow in {operation}")]
    Overflow {
        /// Operation that overflowed
        operation: String,
    },

    /// Underflow in calculation
    #[error("Arithmetic underflow in {operation}")]
    Underflow {
        /// Operation that underflowed
        operation: String,
    },

    /// Division by a zero denominator
    #[error("Division by zero in {operation}")]
    DivisionByZero {
        /// Operation that divided
        operation: String,
    },

    // ═══════════════════════════════════════════════════════════════════
    // Protocol Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Neighbor hint no longer brackets the position
    #[error("Stale hint: {0}")]
    StaleHint(String),

    /// Owner listed twice in one batch
    #[error("Duplicate target in batch: {0}")]
    DuplicateTarget(String),

    /// Invariant violation detected
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    // ═══════════════════════════════════════════════════════════════════
    // Serialization Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    // ═══════════════════════════════════════════════════════════════════
    // Internal Errors
    // ═══════════════════════════════════════════════════════════════════

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl Error {
    /// Returns true if the caller can fix the input and retry
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::InsufficientCollateral { .. }
                | Error::CollateralizationRatioTooLow { .. }
                | Error::DebtBelowMinimum { .. }
                | Error::InsufficientStabilityPool { .. }
                | Error::InsufficientRedemptionCapacity { .. }
        ) || self.is_stale()
    }

    /// Returns true if the error means the caller acted on outdated state
    pub fn is_stale(&self) -> bool {
        matches!(
            self,
            Error::StaleHint(_)
                | Error::StalePrice { .. }
                | Error::PriceFromFuture { .. }
                | Error::LowConfidence { .. }
        )
    }

    /// Returns true if this is a critical error requiring immediate attention
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::InvariantViolation(_)
                | Error::Internal(_)
                | Error::Overflow { .. }
                | Error::Underflow { .. }
                | Error::DivisionByZero { .. }
        )
    }

    /// Returns the error code for external systems
    pub fn code(&self) -> u32 {
        match self {
            // Position errors: 1xxx
            Error::PositionNotFound(_) => 1001,
            Error::PositionAlreadyExists(_) => 1002,
            Error::PositionNotActive(_) => 1003,
            Error::InsufficientCollateral { .. } => 1004,
            Error::CollateralizationRatioTooLow { .. } => 1005,
            Error::DebtBelowMinimum { .. } => 1006,
            Error::RepaymentExceedsDebt { .. } => 1007,
            Error::NothingToClaim(_) => 1008,

            // Liquidation and capacity errors: 2xxx
            Error::PositionHealthy(_) => 2001,
            Error::InsufficientStabilityPool { .. } => 2002,
            Error::DepositNotFound(_) => 2003,
            Error::InsufficientRedemptionCapacity { .. } => 2004,
            Error::BatchTooLarge { .. } => 2005,

            // Oracle errors: 3xxx
            Error::StalePrice { .. } => 3001,
            Error::PriceFromFuture { .. } => 3002,
            Error::InvalidPrice { .. } => 3003,
            Error::LowConfidence { .. } => 3004,
            Error::PriceUnavailable(_) => 3005,

            // Authorization errors: 4xxx
            Error::Unauthorized(_) => 4001,

            // Validation errors: 5xxx
            Error::InvalidParameter { .. } => 5001,
            Error::ZeroAmount => 5002,

            // Protocol errors: 6xxx
            Error::StaleHint(_) => 6001,
            Error::DuplicateTarget(_) => 6002,
            Error::InvariantViolation(_) => 6003,

            // Serialization errors: 7xxx
            Error::Serialization(_) => 7001,
            Error::Deserialization(_) => 7002,

            // Arithmetic errors: 8xxx
            Error::Overflow { .. } => 8001,
            Error::Underflow { .. } => 8002,
            Error::DivisionByZero { .. } => 8003,

            // Internal errors: 9xxx
            Error::Internal(_) => 9001,
            Error::Storage(_) => 9002,
        }
    }
}
