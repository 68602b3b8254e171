//! Protocol operations - atomic state changes.
//!
//! Each operation is a plain serializable request. The state machine runs it
//! against a working copy of the state and commits only on success.

use serde::{Deserialize, Serialize};

use crate::core::collateral::CollateralKind;
use crate::core::config::RedistributionPolicy;
use crate::core::position::CollateralMap;
use crate::core::sorted::NeighborHint;
use crate::liquidation::engine::LiquidationOutcome;
use crate::redemption::engine::RedemptionOutcome;
use crate::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Open a position with initial collateral and a loan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenPositionOp {
    /// Account submitting the operation, must be the owner
    pub caller: Address,
    /// Owner of the new position
    pub owner: Address,
    /// Initial collateral per kind
    pub collateral: CollateralMap,
    /// Gross loan, recorded as debt
    pub loan: u128,
    /// Registry hint for the new position
    pub hint: Option<NeighborHint>,
}

/// Add or remove collateral of one kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustCollateralOp {
    /// Account submitting the operation, must be the owner
    pub caller: Address,
    /// Position owner
    pub owner: Address,
    /// Kind
    pub kind: CollateralKind,
    /// Amount
    pub amount: u128,
    /// Registry hint for the updated position
    pub hint: Option<NeighborHint>,
}

/// Borrow or repay aUSD
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustDebtOp {
    /// Account submitting the operation, must be the owner
    pub caller: Address,
    /// Position owner
    pub owner: Address,
    /// Amount
    pub amount: u128,
    /// Registry hint for the updated position
    pub hint: Option<NeighborHint>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// POOL, LIQUIDATION AND REDEMPTION OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Stake or unstake aUSD in the stability pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeOp {
    /// Account submitting the operation, must be the owner
    pub caller: Address,
    /// Depositor
    pub owner: Address,
    /// Amount
    pub amount: u128,
}

/// Liquidate a batch of positions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidateOp {
    /// Targets in processing order
    pub targets: Vec<Address>,
}

/// Redeem aUSD for collateral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemOp {
    /// Redeemer
    pub redeemer: Address,
    /// Gross aUSD supplied
    pub amount: u128,
    /// Kind to receive
    pub kind: CollateralKind,
    /// Hint for the last, partially redeemed position
    pub hint: Option<NeighborHint>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADMIN OPERATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Admin parameter change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum AdminAction {
    /// New MCR in micro-percent
    SetMinimumCollateralRatio {
        /// Ratio
        mcr: u64,
    },
    /// New protocol fee in basis points
    SetProtocolFee {
        /// Fee
        fee_bps: u64,
    },
    /// New redistribution weighting
    SetRedistributionPolicy {
        /// Policy
        policy: RedistributionPolicy,
    },
    /// Hand over the admin role
    TransferAdmin {
        /// New admin
        new_admin: Address,
    },
}

/// Admin operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminOp {
    /// Caller, must be the current admin
    pub caller: Address,
    /// Change to apply
    pub action: AdminAction,
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPERATION ENUM
// ═══════════════════════════════════════════════════════════════════════════════

/// Any operation the state machine accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolOperation {
    /// Open a position
    OpenPosition(OpenPositionOp),
    /// Add collateral
    AddCollateral(AdjustCollateralOp),
    /// Remove collateral
    RemoveCollateral(AdjustCollateralOp),
    /// Borrow
    Borrow(AdjustDebtOp),
    /// Repay
    Repay(AdjustDebtOp),
    /// Close a position
    ClosePosition {
        /// Submitting account
        caller: Address,
        /// Owner
        owner: Address,
    },
    /// Claim redemption surplus
    ClaimSurplus {
        /// Submitting account
        caller: Address,
        /// Owner
        owner: Address,
    },
    /// Stake into the pool
    Stake(StakeOp),
    /// Unstake from the pool
    Unstake(StakeOp),
    /// Withdraw pool gains
    WithdrawGains {
        /// Submitting account
        caller: Address,
        /// Depositor
        owner: Address,
    },
    /// Batch liquidation
    Liquidate(LiquidateOp),
    /// Redemption
    Redeem(RedeemOp),
    /// Admin change
    Admin(AdminOp),
}

impl ProtocolOperation {
    /// Get the operation type name
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::OpenPosition(_) => "OpenPosition",
            Self::AddCollateral(_) => "AddCollateral",
            Self::RemoveCollateral(_) => "RemoveCollateral",
            Self::Borrow(_) => "Borrow",
            Self::Repay(_) => "Repay",
            Self::ClosePosition { .. } => "ClosePosition",
            Self::ClaimSurplus { .. } => "ClaimSurplus",
            Self::Stake(_) => "Stake",
            Self::Unstake(_) => "Unstake",
            Self::WithdrawGains { .. } => "WithdrawGains",
            Self::Liquidate(_) => "Liquidate",
            Self::Redeem(_) => "Redeem",
            Self::Admin(_) => "Admin",
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of opening a position or borrowing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowResult {
    /// Debt after the operation
    pub debt: u128,
    /// Fee skimmed from the loan
    pub fee: u128,
    /// aUSD handed to the borrower
    pub net_proceeds: u128,
    /// ICR after the operation
    pub icr: u64,
}

/// Result of a collateral change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralResult {
    /// Balance of the kind afterwards
    pub balance: u128,
    /// ICR afterwards
    pub icr: u64,
}

/// Result of a repayment or close
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepayResult {
    /// Debt repaid
    pub repaid: u128,
    /// Debt left
    pub remaining_debt: u128,
    /// Collateral returned when the position closed
    pub collateral_returned: CollateralMap,
}

impl RepayResult {
    /// Whether the repayment closed the position
    pub fn closed(&self) -> bool {
        self.remaining_debt == 0
    }
}

/// Result of any operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationResult {
    /// Position opened or debt borrowed
    Borrow(BorrowResult),
    /// Collateral changed
    Collateral(CollateralResult),
    /// Debt repaid or position closed
    Repay(RepayResult),
    /// Collateral paid out (surplus or pool gains)
    Payout {
        /// Collateral per kind
        collateral: CollateralMap,
    },
    /// Stake changed
    Stake {
        /// Compounded stake afterwards
        balance: u128,
    },
    /// Liquidation batch processed
    Liquidation(LiquidationOutcome),
    /// Redemption processed
    Redemption(RedemptionOutcome),
    /// Admin change applied
    Admin,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_type() {
        let op = ProtocolOperation::ClosePosition {
            caller: Address::derive("alice"),
            owner: Address::derive("alice"),
        };
        assert_eq!(op.operation_type(), "ClosePosition");
    }

    #[test]
    fn test_operation_json_shape() {
        let op = ProtocolOperation::Admin(AdminOp {
            caller: Address::derive("admin"),
            action: AdminAction::SetProtocolFee { fee_bps: 100 },
        });
        let json = serde_json::to_string(&op).unwrap();
        assert!(json.starts_with("{\"admin\":"));
        assert!(json.contains("\"action\":\"set_protocol_fee\""));
        let back: ProtocolOperation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_repay_result_closed() {
        let result = RepayResult {
            repaid: 10,
            remaining_debt: 0,
            collateral_returned: CollateralMap::new(),
        };
        assert!(result.closed());
    }
}
