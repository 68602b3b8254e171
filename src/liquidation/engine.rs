//! Liquidation engine for the aUSD protocol.
//!
//! This module handles the liquidation of undercollateralized positions:
//! - Detection of liquidatable positions from the registry head
//! - Offset of debt against the stability pool
//! - Redistribution of the remainder across open positions

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

use crate::core::config::RedistributionPolicy;
use crate::core::health::{collateral_value, compute_icr, HealthView};
use crate::core::position::{CollateralMap, Position, PositionStatus};
use crate::core::sorted::IcrSource;
use crate::error::{Error, Result};
use crate::liquidation::stability_pool::PoolTransition;
use crate::oracle::price_feed::PriceBook;
use crate::protocol::state::ProtocolState;
use crate::utils::crypto::Address;
use crate::utils::math::*;

// ═══════════════════════════════════════════════════════════════════════════════
// RESULTS
// ═══════════════════════════════════════════════════════════════════════════════

/// Why a liquidation target was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    /// No position for this owner
    NotFound,
    /// The position is already closed
    NotActive,
    /// ICR is at or above the MCR
    Healthy {
        /// Live ICR
        icr: u64,
    },
    /// The pool cannot absorb the debt and no other position can take the rest
    NoRedistributionCapacity,
}

/// A target that was skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedTarget {
    /// Target owner
    pub owner: Address,
    /// Reason
    pub reason: SkipReason,
}

/// A position that was liquidated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidatedPosition {
    /// Owner of the liquidated position
    pub owner: Address,
    /// ICR at liquidation
    pub icr: u64,
    /// Debt closed
    pub debt: u128,
    /// Collateral seized
    pub collateral: CollateralMap,
    /// Debt burned against the stability pool
    pub debt_offset: u128,
    /// Collateral sent to the stability pool
    pub collateral_to_pool: CollateralMap,
    /// Debt spread across other positions
    pub debt_redistributed: u128,
    /// Collateral spread across other positions
    pub collateral_redistributed: CollateralMap,
    /// Pool factor transition, when the pool took part
    pub transition: Option<PoolTransition>,
}

/// Result of a batch liquidation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationOutcome {
    /// Liquidated positions in request order
    pub liquidated: Vec<LiquidatedPosition>,
    /// Skipped targets in request order
    pub skipped: Vec<SkippedTarget>,
    /// Debt burned against the pool
    pub total_debt_offset: u128,
    /// Debt spread across positions
    pub total_debt_redistributed: u128,
}

// ═══════════════════════════════════════════════════════════════════════════════
// DETECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Positions with ICR below `threshold`, riskiest first, at most `max_count`.
///
/// Positions mix collateral kinds, so a move in one asset's price can leave
/// the registry out of live order. The scan therefore visits every open
/// position instead of stopping at the first healthy one; ties keep registry
/// order.
pub fn query_liquidatable(
    state: &ProtocolState,
    prices: &PriceBook,
    threshold: u64,
    max_count: usize,
) -> Result<Vec<(Address, u64)>> {
    let view = state.health_view(prices);
    let mut found = Vec::new();
    for owner in state.sorted.iter() {
        let icr = view.icr(&owner)?;
        if icr < threshold {
            found.push((owner, icr));
        }
    }
    found.sort_by_key(|(_, icr)| *icr);
    found.truncate(max_count);
    Ok(found)
}

// ═══════════════════════════════════════════════════════════════════════════════
// LIQUIDATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Liquidate a batch of targets.
///
/// Missing and healthy targets are reported, never fatal. Any other error
/// aborts the batch; the caller discards the working state.
pub fn liquidate(
    state: &mut ProtocolState,
    prices: &PriceBook,
    targets: &[Address],
    block_height: u64,
) -> Result<LiquidationOutcome> {
    let max = state.global.params.max_liquidation_batch;
    if targets.is_empty() {
        return Err(Error::InvalidParameter {
            name: "targets".into(),
            reason: "no liquidation targets".into(),
        });
    }
    if targets.len() > max {
        return Err(Error::BatchTooLarge {
            size: targets.len(),
            max,
        });
    }
    let mut seen = BTreeSet::new();
    for owner in targets {
        if !seen.insert(*owner) {
            return Err(Error::DuplicateTarget(owner.short()));
        }
    }

    let mut outcome = LiquidationOutcome::default();
    for owner in targets {
        match liquidate_one(state, prices, owner, block_height)? {
            Ok(liquidated) => {
                outcome.total_debt_offset = safe_add(outcome.total_debt_offset, liquidated.debt_offset)?;
                outcome.total_debt_redistributed =
                    safe_add(outcome.total_debt_redistributed, liquidated.debt_redistributed)?;
                outcome.liquidated.push(liquidated);
            }
            Err(reason) => {
                warn!(owner = %owner.short(), ?reason, "Liquidation target skipped");
                outcome.skipped.push(SkippedTarget { owner: *owner, reason });
            }
        }
    }

    info!(
        liquidated = outcome.liquidated.len(),
        skipped = outcome.skipped.len(),
        offset = outcome.total_debt_offset,
        redistributed = outcome.total_debt_redistributed,
        "Liquidation batch processed"
    );
    Ok(outcome)
}

/// Liquidate one target. The inner result carries a skip reason.
fn liquidate_one(
    state: &mut ProtocolState,
    prices: &PriceBook,
    owner: &Address,
    block_height: u64,
) -> Result<std::result::Result<LiquidatedPosition, SkipReason>> {
    let target = match state.positions.get(owner) {
        None => return Ok(Err(SkipReason::NotFound)),
        Some(p) if !p.is_active() => return Ok(Err(SkipReason::NotActive)),
        Some(p) => p.clone(),
    };

    let icr = compute_icr(&target, prices)?;
    if icr >= state.global.params.minimum_collateral_ratio {
        return Ok(Err(SkipReason::Healthy { icr }));
    }

    let debt = target.debt;
    let debt_offset = debt.min(state.pool.total_staked());
    let debt_redistributed = debt - debt_offset;

    let mut collateral_to_pool = CollateralMap::new();
    let mut collateral_redistributed = CollateralMap::new();
    for (&kind, &amount) in &target.collateral {
        let to_pool = mul_div(amount, debt_offset, debt)?;
        if to_pool > 0 {
            collateral_to_pool.insert(kind, to_pool);
        }
        if amount > to_pool {
            collateral_redistributed.insert(kind, amount - to_pool);
        }
    }

    // Plan redistribution before touching anything, so a skip leaves no trace
    let shares = if debt_redistributed > 0 || !collateral_redistributed.is_empty() {
        let recipients = redistribution_weights(state, prices, owner)?;
        if recipients.is_empty() {
            return Ok(Err(SkipReason::NoRedistributionCapacity));
        }
        plan_shares(&recipients, debt_redistributed, &collateral_redistributed)?
    } else {
        Vec::new()
    };

    // Pool offset
    let transition = if debt_offset > 0 {
        let transition = state.pool.apply_offset(debt_offset, &collateral_to_pool)?;
        state.global.record_absorbed(debt_offset)?;
        for (&kind, &amount) in &collateral_to_pool {
            state.global.remove_collateral(kind, amount)?;
        }
        Some(transition)
    } else {
        None
    };

    // Redistribution: debt and collateral move between positions, totals stay
    for share in &shares {
        let recipient = state.positions.get_active_mut(&share.owner)?;
        if share.debt > 0 {
            recipient.add_debt(share.debt, block_height)?;
        }
        for (&kind, &amount) in &share.collateral {
            recipient.deposit_collateral(kind, amount, block_height)?;
        }
    }

    // Close the target
    let closed = state.positions.get_active_mut(owner)?;
    let collateral = closed.take_collateral();
    closed.reduce_debt(debt, block_height)?;
    closed.close(PositionStatus::Liquidated, block_height);
    state.sorted.remove(owner)?;

    if !shares.is_empty() {
        let touched: BTreeSet<Address> = shares.iter().map(|s| s.owner).collect();
        let order: Vec<Address> = state.sorted.iter().filter(|a| touched.contains(a)).collect();
        let view = HealthView::new(&state.positions, prices);
        for recipient in order {
            state.sorted.resettle(recipient, &view)?;
        }
    }

    debug!(
        owner = %owner.short(),
        icr,
        debt,
        debt_offset,
        debt_redistributed,
        "Position liquidated"
    );

    Ok(Ok(LiquidatedPosition {
        owner: *owner,
        icr,
        debt,
        collateral,
        debt_offset,
        collateral_to_pool,
        debt_redistributed,
        collateral_redistributed,
        transition,
    }))
}

// ═══════════════════════════════════════════════════════════════════════════════
// REDISTRIBUTION
// ═══════════════════════════════════════════════════════════════════════════════

/// What one recipient takes on
#[derive(Debug, Clone, PartialEq, Eq)]
struct Share {
    owner: Address,
    debt: u128,
    collateral: CollateralMap,
}

/// Non-zero weights of every open position except `exclude`
fn redistribution_weights(
    state: &ProtocolState,
    prices: &PriceBook,
    exclude: &Address,
) -> Result<Vec<(Address, u128)>> {
    let policy = state.global.params.redistribution_policy;
    let mut weights = Vec::new();
    for position in state.positions.active().filter(|p| &p.owner != exclude) {
        let weight = weight_of(position, policy, prices)?;
        if weight > 0 {
            weights.push((position.owner, weight));
        }
    }
    Ok(weights)
}

fn weight_of(position: &Position, policy: RedistributionPolicy, prices: &PriceBook) -> Result<u128> {
    match policy {
        RedistributionPolicy::CollateralShare => collateral_value(&position.collateral, prices),
        RedistributionPolicy::DebtShare => Ok(position.debt),
    }
}

/// Split debt and each collateral kind by weight; rounding dust goes to the
/// heaviest recipient so the parts add up exactly.
fn plan_shares(weights: &[(Address, u128)], debt: u128, collateral: &CollateralMap) -> Result<Vec<Share>> {
    let total_weight = weights
        .iter()
        .try_fold(0u128, |acc, (_, w)| safe_add(acc, *w))?;
    let heaviest = weights
        .iter()
        .enumerate()
        .max_by(|(ia, (_, wa)), (ib, (_, wb))| wa.cmp(wb).then(ib.cmp(ia)))
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut shares: Vec<Share> = weights
        .iter()
        .map(|(owner, _)| Share {
            owner: *owner,
            debt: 0,
            collateral: CollateralMap::new(),
        })
        .collect();

    let split = |amount: u128| -> Result<Vec<u128>> {
        let mut parts = weights
            .iter()
            .map(|(_, w)| mul_div(amount, *w, total_weight))
            .collect::<Result<Vec<u128>>>()?;
        let assigned = parts.iter().try_fold(0u128, |acc, p| safe_add(acc, *p))?;
        parts[heaviest] = safe_add(parts[heaviest], safe_sub(amount, assigned)?)?;
        Ok(parts)
    };

    if debt > 0 {
        for (share, part) in shares.iter_mut().zip(split(debt)?) {
            share.debt = part;
        }
    }
    for (&kind, &amount) in collateral {
        for (share, part) in shares.iter_mut().zip(split(amount)?) {
            if part > 0 {
                share.collateral.insert(kind, part);
            }
        }
    }

    Ok(shares.into_iter().filter(|s| s.debt > 0 || !s.collateral.is_empty()).collect())
}
