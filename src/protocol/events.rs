//! Protocol events for state change notifications.
//!
//! Events are recorded only for committed operations, so a client reading
//! the log never sees effects of a rejected call.

use serde::{Deserialize, Serialize};

use crate::core::collateral::CollateralKind;
use crate::core::position::CollateralMap;
use crate::liquidation::engine::SkipReason;
use crate::liquidation::stability_pool::PoolTransition;
use crate::utils::crypto::{Address, Hash};

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

/// All protocol event types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolEvent {
    // Position events
    /// Position was opened
    PositionOpened(PositionOpenedEvent),
    /// Collateral was added
    CollateralAdded(CollateralChangedEvent),
    /// Collateral was removed
    CollateralRemoved(CollateralChangedEvent),
    /// Debt was borrowed
    DebtBorrowed(DebtBorrowedEvent),
    /// Debt was repaid
    DebtRepaid(DebtRepaidEvent),
    /// Position was closed by its owner
    PositionClosed(PositionClosedEvent),
    /// Redemption surplus was claimed
    SurplusClaimed(SurplusClaimedEvent),

    // Stability pool events
    /// aUSD staked
    Staked(StakeEvent),
    /// aUSD unstaked
    Unstaked(StakeEvent),
    /// Collateral gains withdrawn
    GainsWithdrawn(GainsWithdrawnEvent),

    // Liquidation events
    /// Position liquidated
    PositionLiquidated(PositionLiquidatedEvent),
    /// Target skipped by a liquidation batch
    LiquidationSkipped(LiquidationSkippedEvent),

    // Redemption events
    /// aUSD redeemed for collateral
    Redemption(RedemptionEvent),

    // Admin events
    /// Protocol parameter changed
    ParameterChanged(ParameterChangedEvent),
    /// Admin role transferred
    AdminTransferred(AdminTransferredEvent),
}

impl ProtocolEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PositionOpened(_) => "PositionOpened",
            Self::CollateralAdded(_) => "CollateralAdded",
            Self::CollateralRemoved(_) => "CollateralRemoved",
            Self::DebtBorrowed(_) => "DebtBorrowed",
            Self::DebtRepaid(_) => "DebtRepaid",
            Self::PositionClosed(_) => "PositionClosed",
            Self::SurplusClaimed(_) => "SurplusClaimed",
            Self::Staked(_) => "Staked",
            Self::Unstaked(_) => "Unstaked",
            Self::GainsWithdrawn(_) => "GainsWithdrawn",
            Self::PositionLiquidated(_) => "PositionLiquidated",
            Self::LiquidationSkipped(_) => "LiquidationSkipped",
            Self::Redemption(_) => "Redemption",
            Self::ParameterChanged(_) => "ParameterChanged",
            Self::AdminTransferred(_) => "AdminTransferred",
        }
    }

    /// Compute event hash
    pub fn hash(&self) -> Hash {
        let data = bincode::serialize(self).unwrap_or_default();
        Hash::sha256(&data)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Event emitted when a position is opened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    /// Owner
    pub owner: Address,
    /// Initial collateral
    pub collateral: CollateralMap,
    /// Initial debt
    pub debt: u128,
    /// Fee skimmed from the loan
    pub fee: u128,
    /// ICR after opening
    pub icr: u64,
}

/// Event emitted when collateral is added or removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralChangedEvent {
    /// Owner
    pub owner: Address,
    /// Kind
    pub kind: CollateralKind,
    /// Amount moved
    pub amount: u128,
    /// ICR afterwards
    pub icr: u64,
}

/// Event emitted when debt is borrowed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtBorrowedEvent {
    /// Owner
    pub owner: Address,
    /// Gross amount added to debt
    pub amount: u128,
    /// Fee skimmed
    pub fee: u128,
    /// ICR afterwards
    pub icr: u64,
}

/// Event emitted when debt is repaid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtRepaidEvent {
    /// Owner
    pub owner: Address,
    /// Amount repaid
    pub amount: u128,
    /// Debt left
    pub remaining_debt: u128,
}

/// Event emitted when a position is closed by its owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionClosedEvent {
    /// Owner
    pub owner: Address,
    /// Collateral returned
    pub collateral_returned: CollateralMap,
}

/// Event emitted when redemption surplus is claimed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurplusClaimedEvent {
    /// Owner
    pub owner: Address,
    /// Collateral paid out
    pub collateral: CollateralMap,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Event emitted on stake and unstake
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeEvent {
    /// Depositor
    pub owner: Address,
    /// Amount moved
    pub amount: u128,
    /// Compounded stake afterwards
    pub balance: u128,
}

/// Event emitted when gains are withdrawn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GainsWithdrawnEvent {
    /// Depositor
    pub owner: Address,
    /// Collateral paid out
    pub gains: CollateralMap,
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Event emitted when a position is liquidated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    /// Owner
    pub owner: Address,
    /// ICR at liquidation
    pub icr: u64,
    /// Debt closed
    pub debt: u128,
    /// Debt burned against the pool
    pub debt_offset: u128,
    /// Debt spread across positions
    pub debt_redistributed: u128,
    /// Collateral seized
    pub collateral: CollateralMap,
    /// Pool factor transition
    pub transition: Option<PoolTransition>,
}

/// Event emitted when a liquidation target is skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationSkippedEvent {
    /// Target
    pub owner: Address,
    /// Reason
    pub reason: SkipReason,
}

// ═══════════════════════════════════════════════════════════════════════════════
// REDEMPTION EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Event emitted on redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionEvent {
    /// Redeemer
    pub redeemer: Address,
    /// Kind paid out
    pub kind: CollateralKind,
    /// Gross aUSD supplied
    pub amount: u128,
    /// Fee skimmed
    pub fee: u128,
    /// Collateral paid out
    pub collateral_out: u128,
    /// Positions drawn from
    pub positions_touched: u32,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ADMIN EVENTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Event emitted when a parameter changes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterChangedEvent {
    /// Parameter name
    pub name: String,
    /// New value, rendered
    pub value: String,
}

/// Event emitted when the admin role moves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminTransferredEvent {
    /// Previous admin
    pub from: Address,
    /// New admin
    pub to: Address,
}

// ═══════════════════════════════════════════════════════════════════════════════
// EVENT LOG
// ═══════════════════════════════════════════════════════════════════════════════

/// An event stamped with the block it was committed in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Block height
    pub block_height: u64,
    /// Block timestamp
    pub timestamp: u64,
    /// The event
    pub event: ProtocolEvent,
}

/// Collection of committed events
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLog {
    records: Vec<EventRecord>,
}

impl EventLog {
    /// Create a new empty event log
    pub fn new() -> Self {
        Self { records: Vec::new() }
    }

    /// Add an event to the log
    pub fn push(&mut self, block_height: u64, timestamp: u64, event: ProtocolEvent) {
        self.records.push(EventRecord {
            block_height,
            timestamp,
            event,
        });
    }

    /// Get all records
    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    /// Get events of a specific type
    pub fn filter_by_type(&self, event_type: &str) -> Vec<&ProtocolEvent> {
        self.records
            .iter()
            .map(|r| &r.event)
            .filter(|e| e.event_type() == event_type)
            .collect()
    }

    /// Get the number of events
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Merge another event log into this one
    pub fn merge(&mut self, other: EventLog) {
        self.records.extend(other.records);
    }

    /// Remove and return every record
    pub fn drain(&mut self) -> Vec<EventRecord> {
        std::mem::take(&mut self.records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> ProtocolEvent {
        ProtocolEvent::PositionOpened(PositionOpenedEvent {
            owner: Address::derive("alice"),
            collateral: CollateralMap::new(),
            debt: 100,
            fee: 5,
            icr: 200_000_000,
        })
    }

    #[test]
    fn test_event_types() {
        assert_eq!(opened().event_type(), "PositionOpened");
        let skipped = ProtocolEvent::LiquidationSkipped(LiquidationSkippedEvent {
            owner: Address::derive("bob"),
            reason: SkipReason::NotFound,
        });
        assert_eq!(skipped.event_type(), "LiquidationSkipped");
    }

    #[test]
    fn test_event_log() {
        let mut log = EventLog::new();
        assert!(log.is_empty());

        log.push(100, 1_700_000_000, opened());
        log.push(
            101,
            1_700_000_010,
            ProtocolEvent::Staked(StakeEvent {
                owner: Address::derive("carol"),
                amount: 10,
                balance: 10,
            }),
        );

        assert_eq!(log.len(), 2);
        assert_eq!(log.filter_by_type("Staked").len(), 1);
        assert_eq!(log.records()[0].block_height, 100);

        let drained = log.drain();
        assert_eq!(drained.len(), 2);
        assert!(log.is_empty());
    }

    #[test]
    fn test_event_hash() {
        assert_eq!(opened().hash(), opened().hash());
        assert_ne!(opened().hash(), Hash::zero());
    }
}
