//! Stability Pool implementation (Liquity-style).
//!
//! Depositors stake aUSD that is burned against liquidated debt. In return
//! they receive the liquidated collateral, pro rata to their compounded stake.
//!
//! Bookkeeping is O(1) per liquidation: a running product `P` tracks how much
//! of every deposit survives, and running sums `S[epoch][scale][kind]` track
//! collateral earned per unit staked. When `P` gets too small it is rescaled
//! (`scale + 1`); when the pool is wiped out a new epoch starts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::core::collateral::CollateralKind;
use crate::core::position::CollateralMap;
use crate::error::{Error, Result};
use crate::utils::constants::*;
use crate::utils::crypto::{Address, Hash};
use crate::utils::math::*;
use crate::utils::validation::validate_non_zero;

// ═══════════════════════════════════════════════════════════════════════════════
// DEPOSIT SNAPSHOT
// ═══════════════════════════════════════════════════════════════════════════════

/// Pool factors recorded when a deposit was last touched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositSnapshot {
    /// Product factor
    pub p: u128,
    /// Sum factor per collateral kind, for the snapshot's epoch and scale
    pub s: CollateralMap,
    /// Epoch at snapshot time
    pub epoch: u64,
    /// Scale at snapshot time
    pub scale: u64,
}

/// A single deposit in the stability pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Depositor
    pub owner: Address,
    /// Amount at snapshot time
    pub amount: u128,
    /// Snapshot the amount is compounded from
    pub snapshot: DepositSnapshot,
    /// Block height of the last stake
    pub deposited_at: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TRANSITIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// How `P`, the scale and the epoch move after an offset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolTransition {
    /// `P` shrinks within the current scale
    Compound {
        /// New product factor
        p: u128,
    },
    /// `P` fell below `1e9` and was multiplied back up
    Rescale {
        /// New product factor
        p: u128,
        /// New scale
        scale: u64,
    },
    /// The pool was emptied: a new epoch starts with `P = 1e18`
    Rollover {
        /// New epoch
        epoch: u64,
    },
}

impl PoolTransition {
    /// Decide the transition for an offset of `debt` against `total` staked
    pub fn compute(p: u128, scale: u64, epoch: u64, debt: u128, total: u128) -> Result<Self> {
        if debt >= total {
            return Ok(PoolTransition::Rollover { epoch: epoch + 1 });
        }

        // Loss rounded up so the pool never reports more than it holds
        let loss = mul_div_up(debt, SP_SCALE_FACTOR, total)?;
        if loss >= SP_SCALE_FACTOR {
            return Ok(PoolTransition::Rollover { epoch: epoch + 1 });
        }
        let factor = SP_SCALE_FACTOR - loss;

        let candidate = mul_div(p, factor, SP_SCALE_FACTOR)?;
        if candidate < SP_RESCALE_FACTOR {
            let p = mul_div(p, safe_mul(factor, SP_RESCALE_FACTOR)?, SP_SCALE_FACTOR)?;
            // Below one unit of precision even after rescaling: treat as a wipe
            if p == 0 {
                return Ok(PoolTransition::Rollover { epoch: epoch + 1 });
            }
            Ok(PoolTransition::Rescale { p, scale: scale + 1 })
        } else {
            Ok(PoolTransition::Compound { p: candidate })
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL
// ═══════════════════════════════════════════════════════════════════════════════

/// The Stability Pool for absorbing liquidations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityPool {
    /// aUSD currently staked
    total_staked: u128,
    /// Product factor
    p: u128,
    /// Current epoch
    epoch: u64,
    /// Current scale
    scale: u64,
    /// `S` per epoch, per scale, per kind
    sums: BTreeMap<u64, BTreeMap<u64, CollateralMap>>,
    /// Individual deposits
    deposits: BTreeMap<Address, Deposit>,
    /// Gains harvested but not yet withdrawn
    pending_gains: BTreeMap<Address, CollateralMap>,
    /// Collateral held for depositors
    total_gains: CollateralMap,
    /// Debt ever absorbed
    total_debt_absorbed: u128,
    /// Stake left behind by rollovers that closed an epoch early
    total_forfeited: u128,
    /// Number of offsets applied
    total_offsets: u64,
}

impl Default for StabilityPool {
    fn default() -> Self {
        Self::new()
    }
}

impl StabilityPool {
    /// Create an empty pool
    pub fn new() -> Self {
        Self {
            total_staked: 0,
            p: SP_SCALE_FACTOR,
            epoch: 0,
            scale: 0,
            sums: BTreeMap::new(),
            deposits: BTreeMap::new(),
            pending_gains: BTreeMap::new(),
            total_gains: CollateralMap::new(),
            total_debt_absorbed: 0,
            total_forfeited: 0,
            total_offsets: 0,
        }
    }

    fn sum_at(&self, epoch: u64, scale: u64, kind: CollateralKind) -> u128 {
        self.sums
            .get(&epoch)
            .and_then(|scales| scales.get(&scale))
            .and_then(|s| s.get(&kind))
            .copied()
            .unwrap_or(0)
    }

    fn current_snapshot(&self) -> DepositSnapshot {
        let s = CollateralKind::ALL
            .iter()
            .map(|&kind| (kind, self.sum_at(self.epoch, self.scale, kind)))
            .filter(|(_, sum)| *sum > 0)
            .collect();
        DepositSnapshot {
            p: self.p,
            s,
            epoch: self.epoch,
            scale: self.scale,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // COMPOUNDING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Current value of a deposit after all offsets since its snapshot
    fn compounded(&self, deposit: &Deposit) -> Result<u128> {
        let snap = &deposit.snapshot;
        if snap.epoch < self.epoch {
            return Ok(0);
        }
        match self.scale - snap.scale {
            0 => mul_div(deposit.amount, self.p, snap.p),
            1 => Ok(mul_div(deposit.amount, self.p, snap.p)? / SP_RESCALE_FACTOR),
            _ => Ok(0),
        }
    }

    /// Collateral earned by a deposit since its snapshot
    fn accrued_gains(&self, deposit: &Deposit) -> Result<CollateralMap> {
        let snap = &deposit.snapshot;
        let mut gains = CollateralMap::new();
        for kind in CollateralKind::ALL {
            let at_snapshot = snap.s.get(&kind).copied().unwrap_or(0);
            let first = safe_sub(self.sum_at(snap.epoch, snap.scale, kind), at_snapshot)?;
            let second = self.sum_at(snap.epoch, snap.scale + 1, kind) / SP_RESCALE_FACTOR;
            let delta = safe_add(first, second)?;
            if delta == 0 {
                continue;
            }
            let gain = mul_div(deposit.amount, delta, safe_mul(snap.p, SP_SCALE_FACTOR)?)?;
            if gain > 0 {
                gains.insert(kind, gain);
            }
        }
        Ok(gains)
    }

    fn add_pending(&mut self, owner: Address, gains: CollateralMap) -> Result<()> {
        if gains.is_empty() {
            return Ok(());
        }
        let pending = self.pending_gains.entry(owner).or_default();
        for (kind, amount) in gains {
            let slot = pending.entry(kind).or_insert(0);
            *slot = safe_add(*slot, amount)?;
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // DEPOSITS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Stake aUSD. Gains accrued so far are harvested into the pending balance.
    pub fn stake(&mut self, owner: Address, amount: u128, block_height: u64) -> Result<u128> {
        validate_non_zero(amount)?;

        let compounded = match self.deposits.get(&owner) {
            Some(existing) => {
                let compounded = self.compounded(existing)?;
                let gains = self.accrued_gains(existing)?;
                self.add_pending(owner, gains)?;
                compounded
            }
            None => 0,
        };

        let new_amount = safe_add(compounded, amount)?;
        let deposit = Deposit {
            owner,
            amount: new_amount,
            snapshot: self.current_snapshot(),
            deposited_at: block_height,
        };
        self.deposits.insert(owner, deposit);
        self.total_staked = safe_add(self.total_staked, amount)?;

        debug!(owner = %owner.short(), amount, balance = new_amount, "Stake recorded");
        Ok(new_amount)
    }

    /// Withdraw part or all of a compounded stake
    pub fn unstake(&mut self, owner: &Address, amount: u128) -> Result<u128> {
        validate_non_zero(amount)?;

        let deposit = self
            .deposits
            .get(owner)
            .ok_or_else(|| Error::DepositNotFound(owner.short()))?;
        let compounded = self.compounded(deposit)?;
        if amount > compounded {
            return Err(Error::InsufficientStabilityPool {
                required: amount,
                available: compounded,
            });
        }
        let gains = self.accrued_gains(deposit)?;
        let deposited_at = deposit.deposited_at;
        self.add_pending(*owner, gains)?;

        let remaining = compounded - amount;
        if remaining == 0 {
            self.deposits.remove(owner);
        } else {
            let deposit = Deposit {
                owner: *owner,
                amount: remaining,
                snapshot: self.current_snapshot(),
                deposited_at,
            };
            self.deposits.insert(*owner, deposit);
        }
        self.total_staked = safe_sub(self.total_staked, amount)?;

        debug!(owner = %owner.short(), amount, remaining, "Unstake recorded");
        Ok(remaining)
    }

    /// Pay out every collateral gain of a depositor
    pub fn withdraw_gains(&mut self, owner: &Address) -> Result<CollateralMap> {
        let pending = self.pending_gains.remove(owner);
        let Some(deposit) = self.deposits.get(owner) else {
            let gains = pending.ok_or_else(|| Error::DepositNotFound(owner.short()))?;
            self.release_gains(&gains);
            return Ok(gains);
        };

        let mut gains = pending.unwrap_or_default();
        for (kind, amount) in self.accrued_gains(deposit)? {
            let slot = gains.entry(kind).or_insert(0);
            *slot = safe_add(*slot, amount)?;
        }

        let compounded = self.compounded(deposit)?;
        if compounded == 0 {
            self.deposits.remove(owner);
        } else {
            let refreshed = Deposit {
                owner: *owner,
                amount: compounded,
                snapshot: self.current_snapshot(),
                deposited_at: deposit.deposited_at,
            };
            self.deposits.insert(*owner, refreshed);
        }

        self.release_gains(&gains);
        Ok(gains)
    }

    fn release_gains(&mut self, gains: &CollateralMap) {
        for (kind, amount) in gains {
            if let Some(held) = self.total_gains.get_mut(kind) {
                *held = held.saturating_sub(*amount);
            }
        }
        self.total_gains.retain(|_, held| *held > 0);
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION ABSORPTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Burn `debt` from the pool and credit `collateral` to depositors.
    ///
    /// Called by the liquidation engine only, with `debt <= total_staked`.
    pub fn apply_offset(&mut self, debt: u128, collateral: &CollateralMap) -> Result<PoolTransition> {
        validate_non_zero(debt)?;
        if debt > self.total_staked {
            return Err(Error::InsufficientStabilityPool {
                required: debt,
                available: self.total_staked,
            });
        }

        let total = self.total_staked;
        let scaled_p = safe_mul(self.p, SP_SCALE_FACTOR)?;
        let mut sums = self
            .sums
            .get(&self.epoch)
            .and_then(|scales| scales.get(&self.scale))
            .cloned()
            .unwrap_or_default();
        for (&kind, &amount) in collateral.iter().filter(|(_, a)| **a > 0) {
            let marginal = mul_div(amount, scaled_p, total)?;
            let slot = sums.entry(kind).or_insert(0);
            *slot = safe_add(*slot, marginal)?;

            let held = self.total_gains.entry(kind).or_insert(0);
            *held = safe_add(*held, amount)?;
        }
        self.sums.entry(self.epoch).or_default().insert(self.scale, sums);

        let transition = PoolTransition::compute(self.p, self.scale, self.epoch, debt, total)?;
        match transition {
            PoolTransition::Compound { p } => {
                self.p = p;
                self.total_staked = total - debt;
            }
            PoolTransition::Rescale { p, scale } => {
                self.p = p;
                self.scale = scale;
                self.total_staked = total - debt;
            }
            PoolTransition::Rollover { epoch } => {
                self.p = SP_SCALE_FACTOR;
                self.scale = 0;
                self.epoch = epoch;
                // Residue below the pool's precision is forfeited with the epoch
                let residue = total - debt;
                if residue > 0 {
                    self.total_forfeited = safe_add(self.total_forfeited, residue)?;
                    warn!(residue, epoch, "Pool residue forfeited on rollover");
                }
                self.total_staked = 0;
            }
        }

        self.total_debt_absorbed = safe_add(self.total_debt_absorbed, debt)?;
        self.total_offsets += 1;

        info!(debt, p = self.p, epoch = self.epoch, scale = self.scale, ?transition, "Offset applied");
        Ok(transition)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Total aUSD staked
    pub fn total_staked(&self) -> u128 {
        self.total_staked
    }

    /// Compounded stake of a depositor (zero if none)
    pub fn compounded_deposit(&self, owner: &Address) -> Result<u128> {
        match self.deposits.get(owner) {
            Some(deposit) => self.compounded(deposit),
            None => Ok(0),
        }
    }

    /// Withdrawable gains of a depositor: harvested plus accrued
    pub fn pending_gains(&self, owner: &Address) -> Result<CollateralMap> {
        let mut gains = self.pending_gains.get(owner).cloned().unwrap_or_default();
        if let Some(deposit) = self.deposits.get(owner) {
            for (kind, amount) in self.accrued_gains(deposit)? {
                let slot = gains.entry(kind).or_insert(0);
                *slot = safe_add(*slot, amount)?;
            }
        }
        Ok(gains)
    }

    /// Depositor's fraction of the pool, scaled by `1e18`
    pub fn stake_share(&self, owner: &Address) -> Result<u128> {
        if self.total_staked == 0 {
            return Ok(0);
        }
        let compounded = self.compounded_deposit(owner)?;
        mul_div(compounded, SP_SCALE_FACTOR, self.total_staked)
    }

    /// Raw deposit record
    pub fn deposit(&self, owner: &Address) -> Option<&Deposit> {
        self.deposits.get(owner)
    }

    /// Iterate over deposits
    pub fn deposits(&self) -> impl Iterator<Item = &Deposit> {
        self.deposits.values()
    }

    /// Harvested gains per depositor
    pub fn pending_entries(&self) -> impl Iterator<Item = (&Address, &CollateralMap)> {
        self.pending_gains.iter()
    }

    /// Number of depositors
    pub fn depositor_count(&self) -> usize {
        self.deposits.len()
    }

    /// Current product factor
    pub fn p(&self) -> u128 {
        self.p
    }

    /// Current epoch
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Current scale
    pub fn scale(&self) -> u64 {
        self.scale
    }

    /// Collateral held for depositors
    pub fn total_gains(&self) -> &CollateralMap {
        &self.total_gains
    }

    /// Stake forfeited by early rollovers
    pub fn total_forfeited(&self) -> u128 {
        self.total_forfeited
    }

    /// Pool statistics
    pub fn statistics(&self) -> PoolStatistics {
        PoolStatistics {
            total_staked: self.total_staked,
            depositor_count: self.deposits.len(),
            total_gains: self.total_gains.clone(),
            total_debt_absorbed: self.total_debt_absorbed,
            total_forfeited: self.total_forfeited,
            total_offsets: self.total_offsets,
            p: self.p,
            epoch: self.epoch,
            scale: self.scale,
        }
    }

    /// Detach the deposit records, leaving the pool-wide factors
    pub fn take_deposits(&mut self) -> Vec<Deposit> {
        std::mem::take(&mut self.deposits).into_values().collect()
    }

    /// Re-attach deposit records detached by `take_deposits`
    pub fn restore_deposits(&mut self, deposits: impl IntoIterator<Item = Deposit>) {
        self.deposits.extend(deposits.into_iter().map(|d| (d.owner, d)));
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SERIALIZATION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Serialize pool to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize pool from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Hash of the pool state
    pub fn state_hash(&self) -> Hash {
        Hash::sha256(&self.to_bytes().unwrap_or_default())
    }
}

/// Stability pool statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatistics {
    /// aUSD staked
    pub total_staked: u128,
    /// Number of depositors
    pub depositor_count: usize,
    /// Collateral held for depositors
    pub total_gains: CollateralMap,
    /// Debt ever absorbed
    pub total_debt_absorbed: u128,
    /// Stake forfeited by early rollovers
    pub total_forfeited: u128,
    /// Offsets applied
    pub total_offsets: u64,
    /// Product factor
    pub p: u128,
    /// Epoch
    pub epoch: u64,
    /// Scale
    pub scale: u64,
}
