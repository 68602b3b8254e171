//! Position store.
//!
//! This module implements borrower positions and their container:
//! - Per-kind collateral and debt bookkeeping
//! - Position lifecycle (active, closed, liquidated, redeemed)
//! - Claimable collateral surplus left by full redemptions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::collateral::CollateralKind;
use crate::error::{Error, Result};
use crate::utils::crypto::{Address, Hash};
use crate::utils::math::*;
use crate::utils::validation::*;

/// Per-kind collateral amounts in smallest units
pub type CollateralMap = BTreeMap<CollateralKind, u128>;

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION STATUS
// ═══════════════════════════════════════════════════════════════════════════════

/// Lifecycle status of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    /// Open and linked in the sorted registry
    Active,
    /// Closed by its owner after full repayment
    Closed,
    /// Closed by liquidation
    Liquidated,
    /// Closed because redemption consumed all of its debt
    Redeemed,
}

impl PositionStatus {
    /// Check if the position is closed for good
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionStatus::Active)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION
// ═══════════════════════════════════════════════════════════════════════════════

/// A collateralized debt position ("trove"), one per owner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    /// Owner, also the registry key
    pub owner: Address,
    /// Collateral held, per kind
    pub collateral: CollateralMap,
    /// Debt in aUSD base units
    pub debt: u128,
    /// Current status
    pub status: PositionStatus,
    /// Block height when opened
    pub created_at: u64,
    /// Block height of last modification
    pub last_updated: u64,
}

impl Position {
    /// Create an empty active position
    pub fn new(owner: Address, block_height: u64) -> Self {
        Self {
            owner,
            collateral: BTreeMap::new(),
            debt: 0,
            status: PositionStatus::Active,
            created_at: block_height,
            last_updated: block_height,
        }
    }

    /// Collateral of one kind
    pub fn collateral_of(&self, kind: CollateralKind) -> u128 {
        self.collateral.get(&kind).copied().unwrap_or(0)
    }

    /// Check if any collateral is held
    pub fn has_collateral(&self) -> bool {
        self.collateral.values().any(|&amount| amount > 0)
    }

    /// Check if the position is open
    pub fn is_active(&self) -> bool {
        self.status == PositionStatus::Active
    }

    /// Fail unless the position is open
    pub fn ensure_active(&self) -> Result<()> {
        if !self.is_active() {
            return Err(Error::PositionNotActive(self.owner.short()));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATE MUTATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Deposit collateral of one kind
    pub fn deposit_collateral(&mut self, kind: CollateralKind, amount: u128, block_height: u64) -> Result<()> {
        self.ensure_active()?;
        validate_non_zero(amount)?;

        let entry = self.collateral.entry(kind).or_insert(0);
        *entry = safe_add(*entry, amount)?;
        self.last_updated = block_height;
        Ok(())
    }

    /// Withdraw collateral of one kind. Health is checked by the caller.
    pub fn withdraw_collateral(&mut self, kind: CollateralKind, amount: u128, block_height: u64) -> Result<()> {
        self.ensure_active()?;
        validate_non_zero(amount)?;

        let available = self.collateral_of(kind);
        if amount > available {
            return Err(Error::InsufficientCollateral {
                required: amount,
                available,
            });
        }

        if available == amount {
            self.collateral.remove(&kind);
        } else {
            self.collateral.insert(kind, available - amount);
        }
        self.last_updated = block_height;
        Ok(())
    }

    /// Add debt
    pub fn add_debt(&mut self, amount: u128, block_height: u64) -> Result<()> {
        self.ensure_active()?;
        self.debt = safe_add(self.debt, amount)?;
        self.last_updated = block_height;
        Ok(())
    }

    /// Reduce debt, never below zero
    pub fn reduce_debt(&mut self, amount: u128, block_height: u64) -> Result<()> {
        self.ensure_active()?;
        if amount > self.debt {
            return Err(Error::RepaymentExceedsDebt {
                amount,
                debt: self.debt,
            });
        }
        self.debt -= amount;
        self.last_updated = block_height;
        Ok(())
    }

    /// Remove and return every collateral balance
    pub fn take_collateral(&mut self) -> CollateralMap {
        std::mem::take(&mut self.collateral)
    }

    /// Close the position with a terminal status
    pub fn close(&mut self, status: PositionStatus, block_height: u64) {
        self.status = status;
        self.last_updated = block_height;
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Serialize position to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize position from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Hash of the position state
    pub fn state_hash(&self) -> Hash {
        Hash::sha256(&self.to_bytes().unwrap_or_default())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// All positions keyed by owner, plus claimable surplus.
///
/// Ordered maps keep iteration deterministic, which redistribution relies on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionStore {
    positions: BTreeMap<Address, Position>,
    surplus: BTreeMap<Address, CollateralMap>,
}

impl PositionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new position. A terminal record for the same owner is replaced.
    pub fn insert(&mut self, position: Position) -> Result<()> {
        if let Some(existing) = self.positions.get(&position.owner) {
            if existing.is_active() {
                return Err(Error::PositionAlreadyExists(position.owner.short()));
            }
        }
        self.positions.insert(position.owner, position);
        Ok(())
    }

    /// Get a position in any status
    pub fn get(&self, owner: &Address) -> Option<&Position> {
        self.positions.get(owner)
    }

    /// Get an open position
    pub fn get_active(&self, owner: &Address) -> Result<&Position> {
        let position = self
            .positions
            .get(owner)
            .ok_or_else(|| Error::PositionNotFound(owner.short()))?;
        position.ensure_active()?;
        Ok(position)
    }

    /// Get an open position mutably
    pub fn get_active_mut(&mut self, owner: &Address) -> Result<&mut Position> {
        let position = self
            .positions
            .get_mut(owner)
            .ok_or_else(|| Error::PositionNotFound(owner.short()))?;
        position.ensure_active()?;
        Ok(position)
    }

    /// Iterate over open positions in owner order
    pub fn active(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| p.is_active())
    }

    /// Iterate over every stored position
    pub fn iter(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Number of open positions
    pub fn active_count(&self) -> usize {
        self.active().count()
    }

    /// Number of stored records, including closed ones
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Check if the store holds no records
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Sum of debt over open positions
    pub fn total_debt(&self) -> Result<u128> {
        self.active().try_fold(0u128, |acc, p| safe_add(acc, p.debt))
    }

    /// Sum of one collateral kind over open positions
    pub fn total_collateral(&self, kind: CollateralKind) -> Result<u128> {
        self.active()
            .try_fold(0u128, |acc, p| safe_add(acc, p.collateral_of(kind)))
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SURPLUS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Credit claimable collateral to an owner
    pub fn add_surplus(&mut self, owner: Address, collateral: CollateralMap) -> Result<()> {
        let entry = self.surplus.entry(owner).or_default();
        for (kind, amount) in collateral {
            if amount == 0 {
                continue;
            }
            let slot = entry.entry(kind).or_insert(0);
            *slot = safe_add(*slot, amount)?;
        }
        if entry.is_empty() {
            self.surplus.remove(&owner);
        }
        Ok(())
    }

    /// Claimable collateral of an owner
    pub fn surplus_of(&self, owner: &Address) -> CollateralMap {
        self.surplus.get(owner).cloned().unwrap_or_default()
    }

    /// Remove and return an owner's claimable collateral
    pub fn take_surplus(&mut self, owner: &Address) -> Result<CollateralMap> {
        self.surplus
            .remove(owner)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::NothingToClaim(owner.short()))
    }

    /// Owners with claimable collateral
    pub fn surplus_entries(&self) -> impl Iterator<Item = (&Address, &CollateralMap)> {
        self.surplus.iter()
    }

    /// Aggregate statistics
    pub fn statistics(&self) -> PositionStatistics {
        let mut stats = PositionStatistics::default();
        for position in self.positions.values() {
            match position.status {
                PositionStatus::Active => {
                    stats.active_positions += 1;
                    stats.total_debt = stats.total_debt.saturating_add(position.debt);
                }
                PositionStatus::Closed => stats.closed_positions += 1,
                PositionStatus::Liquidated => stats.liquidated_positions += 1,
                PositionStatus::Redeemed => stats.redeemed_positions += 1,
            }
        }
        stats.owners_with_surplus = self.surplus.len() as u64;
        stats
    }
}

/// Aggregate position statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionStatistics {
    /// Open positions
    pub active_positions: u64,
    /// Positions closed by their owner
    pub closed_positions: u64,
    /// Positions closed by liquidation
    pub liquidated_positions: u64,
    /// Positions closed by redemption
    pub redeemed_positions: u64,
    /// Debt across open positions
    pub total_debt: u128,
    /// Owners with unclaimed surplus
    pub owners_with_surplus: u64,
}
