//! Redemption engine.
//!
//! aUSD is exchanged for collateral at face value, drawn from the riskiest
//! positions that are still above the MCR. The call is all-or-nothing.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::collateral::CollateralKind;
use crate::core::health::{compute_icr, HealthView};
use crate::core::position::PositionStatus;
use crate::core::sorted::NeighborHint;
use crate::error::{Error, Result};
use crate::oracle::price_feed::PriceBook;
use crate::protocol::state::ProtocolState;
use crate::utils::crypto::Address;
use crate::utils::math::*;

/// Debt drawn from one position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemedPosition {
    /// Position owner
    pub owner: Address,
    /// Debt cancelled
    pub debt_redeemed: u128,
    /// Collateral taken
    pub collateral_taken: u128,
    /// Whether the position was closed
    pub closed: bool,
}

/// Result of a redemption
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionOutcome {
    /// Redeemer
    pub redeemer: Address,
    /// Collateral kind paid out
    pub kind: CollateralKind,
    /// Gross aUSD supplied
    pub amount: u128,
    /// Protocol fee skimmed from `amount`
    pub fee: u128,
    /// aUSD burned against debt
    pub net_amount: u128,
    /// Collateral paid to the redeemer
    pub collateral_out: u128,
    /// Positions drawn from, in walk order
    pub positions: Vec<RedeemedPosition>,
}

/// Redeem `amount` aUSD for collateral of `kind`.
///
/// `hint` re-threads the last, partially redeemed position. Without one the
/// position is re-settled by walking from where it sits.
pub fn redeem(
    state: &mut ProtocolState,
    prices: &PriceBook,
    redeemer: Address,
    amount: u128,
    kind: CollateralKind,
    hint: Option<NeighborHint>,
    block_height: u64,
) -> Result<RedemptionOutcome> {
    let params = state.global.params.clone();
    if amount < params.minimum_loan_amount {
        return Err(Error::InvalidParameter {
            name: "amount".into(),
            reason: format!("redemption below minimum of {}", params.minimum_loan_amount),
        });
    }
    if amount > state.global.total_debt {
        return Err(Error::InsufficientRedemptionCapacity {
            requested: amount,
            redeemable: state.global.total_debt,
        });
    }

    let (net_amount, fee) = amount_after_fee(amount, params.protocol_fee_bps)?;
    let quote = *prices.quote(kind)?;

    let mut remaining = net_amount;
    let mut collateral_out = 0u128;
    let mut drawn = Vec::new();
    let mut cursor = state.sorted.head();

    while let Some(owner) = cursor {
        if remaining == 0 {
            break;
        }
        cursor = state.sorted.next_of(&owner);

        let position = state.positions.get_active(&owner)?;
        let held = position.collateral_of(kind);
        if held == 0 {
            continue;
        }
        let icr = compute_icr(position, prices)?;
        if icr < params.minimum_collateral_ratio {
            debug!(owner = %owner.short(), icr, "Skipping position below MCR");
            continue;
        }

        let held_value = quote.value_of(kind, held)?;
        let take = remaining.min(position.debt).min(held_value);
        if take == 0 {
            continue;
        }
        let collateral_taken = quote.collateral_for(kind, take)?.min(held);
        let new_debt = position.debt - take;
        if new_debt > 0 && new_debt < params.minimum_loan_amount {
            return Err(Error::DebtBelowMinimum {
                amount: new_debt,
                minimum: params.minimum_loan_amount,
            });
        }

        let position = state.positions.get_active_mut(&owner)?;
        position.reduce_debt(take, block_height)?;
        if collateral_taken > 0 {
            position.withdraw_collateral(kind, collateral_taken, block_height)?;
        }
        state.global.record_redeemed(take)?;
        state.global.remove_collateral(kind, collateral_taken)?;
        remaining -= take;
        collateral_out = safe_add(collateral_out, collateral_taken)?;

        let closed = new_debt == 0;
        if closed {
            let position = state.positions.get_active_mut(&owner)?;
            let leftover = position.take_collateral();
            position.close(PositionStatus::Redeemed, block_height);
            for (&k, &a) in &leftover {
                state.global.remove_collateral(k, a)?;
            }
            state.positions.add_surplus(owner, leftover)?;
            state.sorted.remove(&owner)?;
        } else {
            let view = HealthView::new(&state.positions, prices);
            match hint {
                Some(h) if remaining == 0 => state.sorted.reinsert_on_update(owner, Some(h), &view)?,
                _ => state.sorted.resettle(owner, &view)?,
            }
        }

        debug!(owner = %owner.short(), take, collateral_taken, closed, "Redeemed from position");
        drawn.push(RedeemedPosition {
            owner,
            debt_redeemed: take,
            collateral_taken,
            closed,
        });
    }

    if remaining > 0 {
        return Err(Error::InsufficientRedemptionCapacity {
            requested: net_amount,
            redeemable: net_amount - remaining,
        });
    }

    info!(
        redeemer = %redeemer.short(),
        %kind,
        amount,
        fee,
        collateral_out,
        positions = drawn.len(),
        "Redemption processed"
    );

    Ok(RedemptionOutcome {
        redeemer,
        kind,
        amount,
        fee,
        net_amount,
        collateral_out,
        positions: drawn,
    })
}
