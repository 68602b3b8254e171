//! Protocol State Machine - Core orchestration engine.
//!
//! The state machine is the single entry point for every protocol
//! operation. Each operation reads one validated `PriceBook`, runs on a
//! working copy of the state and is committed whole: a failure at any step
//! leaves positions, registry, pool and totals exactly as they were, emits no
//! events and routes no fees.

use tracing::{debug, info};

use crate::core::collateral::CollateralKind;
use crate::core::config::{ProtocolParams, RedistributionPolicy};
use crate::core::fees::FeeRouter;
use crate::core::health::{collateral_value, compute_icr, ratio_from_value, total_collateral_ratio, HealthView};
use crate::core::position::{CollateralMap, Position, PositionStatus};
use crate::core::sorted::NeighborHint;
use crate::error::{Error, Result};
use crate::liquidation::engine::{self, LiquidationOutcome};
use crate::oracle::price_feed::{PriceBook, PriceOracle};
use crate::protocol::events::*;
use crate::protocol::operations::*;
use crate::protocol::state::ProtocolState;
use crate::redemption::engine::{self as redemption, RedemptionOutcome};
use crate::utils::crypto::Address;
use crate::utils::math::*;
use crate::utils::validation::*;

// ═══════════════════════════════════════════════════════════════════════════════
// WORKING COPY
// ═══════════════════════════════════════════════════════════════════════════════

/// Uncommitted effects of one operation
struct Pending {
    state: ProtocolState,
    events: Vec<ProtocolEvent>,
    fee: u128,
    block_height: u64,
}

impl Pending {
    fn emit(&mut self, event: ProtocolEvent) {
        self.events.push(event);
    }

    fn icr(&self, owner: &Address, prices: &PriceBook) -> Result<u64> {
        compute_icr(self.state.positions.get_active(owner)?, prices)
    }

    /// Re-thread `owner` after its ICR changed
    fn rethread(&mut self, owner: Address, hint: Option<NeighborHint>, prices: &PriceBook) -> Result<()> {
        let view = HealthView::new(&self.state.positions, prices);
        self.state.sorted.reinsert_on_update(owner, hint, &view)
    }

    /// Refuse a position that would sit below the MCR
    fn ensure_healthy(&self, owner: &Address, prices: &PriceBook) -> Result<u64> {
        let icr = self.icr(owner, prices)?;
        validate_collateral_ratio(icr, self.state.global.params.minimum_collateral_ratio)?;
        Ok(icr)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Protocol state machine - orchestrates all operations
pub struct ProtocolStateMachine<O: PriceOracle, F: FeeRouter> {
    /// Committed state
    state: ProtocolState,
    /// Price source
    oracle: O,
    /// Fee destination
    fee_router: F,
    /// Current block height
    block_height: u64,
    /// Current timestamp, used for price freshness
    timestamp: u64,
    /// Events of committed operations
    event_log: EventLog,
}

impl<O: PriceOracle, F: FeeRouter> ProtocolStateMachine<O, F> {
    /// Create a state machine over fresh state
    pub fn new(admin: Address, params: ProtocolParams, oracle: O, fee_router: F) -> Result<Self> {
        Ok(Self::from_state(ProtocolState::new(admin, params)?, oracle, fee_router))
    }

    /// Wrap existing state, for example one loaded from storage
    pub fn from_state(state: ProtocolState, oracle: O, fee_router: F) -> Self {
        Self {
            state,
            oracle,
            fee_router,
            block_height: 0,
            timestamp: 0,
            event_log: EventLog::new(),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // BLOCK PROCESSING
    // ═══════════════════════════════════════════════════════════════════════════

    /// Begin a new block
    pub fn begin_block(&mut self, height: u64, timestamp: u64) -> Result<()> {
        if height < self.block_height || timestamp < self.timestamp {
            return Err(Error::InvalidParameter {
                name: "block".into(),
                reason: format!(
                    "block {}@{} is behind current {}@{}",
                    height, timestamp, self.block_height, self.timestamp
                ),
            });
        }
        self.block_height = height;
        self.timestamp = timestamp;
        debug!(height, timestamp, "Block started");
        Ok(())
    }

    /// End the current block, returning its events
    pub fn end_block(&mut self) -> Vec<EventRecord> {
        self.drain_events()
    }

    /// Remove and return every recorded event
    pub fn drain_events(&mut self) -> Vec<EventRecord> {
        self.event_log.drain()
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TRANSACTION CORE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Prices for one operation
    fn price_book(&self) -> PriceBook {
        PriceBook::fetch(&self.oracle, self.timestamp, &self.state.global.params.oracle)
    }

    /// Run `body` on a working copy and commit it if it succeeds
    fn transact<T>(&mut self, body: impl FnOnce(&mut Pending, &PriceBook) -> Result<T>) -> Result<T> {
        let prices = self.price_book();
        let mut pending = Pending {
            state: self.state.clone(),
            events: Vec::new(),
            fee: 0,
            block_height: self.block_height,
        };

        let value = body(&mut pending, &prices)?;
        pending.state.check_invariants()?;

        self.state = pending.state;
        for event in pending.events {
            self.event_log.push(self.block_height, self.timestamp, event);
        }
        if pending.fee > 0 {
            self.fee_router.distribute(pending.fee);
        }
        Ok(value)
    }

    /// Execute a protocol operation
    pub fn execute(&mut self, op: ProtocolOperation) -> Result<OperationResult> {
        debug!(op = op.operation_type(), "Executing operation");
        match op {
            ProtocolOperation::OpenPosition(op) => self
                .open_position(&op.caller, op.owner, op.collateral, op.loan, op.hint)
                .map(OperationResult::Borrow),
            ProtocolOperation::AddCollateral(op) => self
                .add_collateral(&op.caller, op.owner, op.kind, op.amount, op.hint)
                .map(OperationResult::Collateral),
            ProtocolOperation::RemoveCollateral(op) => self
                .remove_collateral(&op.caller, op.owner, op.kind, op.amount, op.hint)
                .map(OperationResult::Collateral),
            ProtocolOperation::Borrow(op) => self
                .borrow(&op.caller, op.owner, op.amount, op.hint)
                .map(OperationResult::Borrow),
            ProtocolOperation::Repay(op) => self
                .repay(&op.caller, op.owner, op.amount, op.hint)
                .map(OperationResult::Repay),
            ProtocolOperation::ClosePosition { caller, owner } => self
                .close_position(&caller, owner)
                .map(OperationResult::Repay),
            ProtocolOperation::ClaimSurplus { caller, owner } => self
                .claim_surplus(&caller, owner)
                .map(|collateral| OperationResult::Payout { collateral }),
            ProtocolOperation::Stake(op) => self
                .stake(&op.caller, op.owner, op.amount)
                .map(|balance| OperationResult::Stake { balance }),
            ProtocolOperation::Unstake(op) => self
                .unstake(&op.caller, op.owner, op.amount)
                .map(|balance| OperationResult::Stake { balance }),
            ProtocolOperation::WithdrawGains { caller, owner } => self
                .withdraw_gains(&caller, owner)
                .map(|collateral| OperationResult::Payout { collateral }),
            ProtocolOperation::Liquidate(op) => self.liquidate(&op.targets).map(OperationResult::Liquidation),
            ProtocolOperation::Redeem(op) => self
                .redeem(op.redeemer, op.amount, op.kind, op.hint)
                .map(OperationResult::Redemption),
            ProtocolOperation::Admin(op) => self.admin(op.caller, op.action).map(|_| OperationResult::Admin),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // POSITION OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Open a position. The fee is skimmed from the loan; debt is the gross loan.
    pub fn open_position(
        &mut self,
        caller: &Address,
        owner: Address,
        collateral: CollateralMap,
        loan: u128,
        hint: Option<NeighborHint>,
    ) -> Result<BorrowResult> {
        validate_owner(caller, &owner, "position")?;
        self.transact(|tx, prices| {
            let params = tx.state.global.params.clone();
            validate_loan_amount(loan, params.minimum_loan_amount)?;
            if collateral.values().all(|&a| a == 0) {
                return Err(Error::ZeroAmount);
            }

            let mut position = Position::new(owner, tx.block_height);
            for (&kind, &amount) in collateral.iter().filter(|(_, a)| **a > 0) {
                position.deposit_collateral(kind, amount, tx.block_height)?;
            }
            position.add_debt(loan, tx.block_height)?;

            let icr = compute_icr(&position, prices)?;
            validate_collateral_ratio(icr, params.minimum_collateral_ratio)?;

            let deposited = position.collateral.clone();
            tx.state.positions.insert(position)?;
            for (&kind, &amount) in &deposited {
                tx.state.global.add_collateral(kind, amount)?;
            }
            tx.state.global.record_issued(loan)?;

            let view = HealthView::new(&tx.state.positions, prices);
            tx.state.sorted.insert(owner, hint, &view)?;

            let fee = calculate_fee_bps(loan, params.protocol_fee_bps)?;
            tx.fee = fee;
            tx.emit(ProtocolEvent::PositionOpened(PositionOpenedEvent {
                owner,
                collateral: deposited,
                debt: loan,
                fee,
                icr,
            }));

            info!(owner = %owner.short(), loan, fee, icr, "Position opened");
            Ok(BorrowResult {
                debt: loan,
                fee,
                net_proceeds: loan - fee,
                icr,
            })
        })
    }

    /// Add collateral of one kind
    pub fn add_collateral(
        &mut self,
        caller: &Address,
        owner: Address,
        kind: CollateralKind,
        amount: u128,
        hint: Option<NeighborHint>,
    ) -> Result<CollateralResult> {
        validate_owner(caller, &owner, "position")?;
        self.transact(|tx, prices| {
            let position = tx.state.positions.get_active_mut(&owner)?;
            position.deposit_collateral(kind, amount, tx.block_height)?;
            let balance = position.collateral_of(kind);
            tx.state.global.add_collateral(kind, amount)?;

            let icr = tx.icr(&owner, prices)?;
            tx.rethread(owner, hint, prices)?;
            tx.emit(ProtocolEvent::CollateralAdded(CollateralChangedEvent {
                owner,
                kind,
                amount,
                icr,
            }));

            info!(owner = %owner.short(), %kind, amount, icr, "Collateral added");
            Ok(CollateralResult { balance, icr })
        })
    }

    /// Remove collateral of one kind, keeping the position above the MCR
    pub fn remove_collateral(
        &mut self,
        caller: &Address,
        owner: Address,
        kind: CollateralKind,
        amount: u128,
        hint: Option<NeighborHint>,
    ) -> Result<CollateralResult> {
        validate_owner(caller, &owner, "position")?;
        self.transact(|tx, prices| {
            let position = tx.state.positions.get_active_mut(&owner)?;
            position.withdraw_collateral(kind, amount, tx.block_height)?;
            let balance = position.collateral_of(kind);
            tx.state.global.remove_collateral(kind, amount)?;

            let icr = tx.ensure_healthy(&owner, prices)?;
            tx.rethread(owner, hint, prices)?;
            tx.emit(ProtocolEvent::CollateralRemoved(CollateralChangedEvent {
                owner,
                kind,
                amount,
                icr,
            }));

            info!(owner = %owner.short(), %kind, amount, icr, "Collateral removed");
            Ok(CollateralResult { balance, icr })
        })
    }

    /// Borrow more aUSD against an open position
    pub fn borrow(&mut self, caller: &Address, owner: Address, amount: u128, hint: Option<NeighborHint>) -> Result<BorrowResult> {
        validate_owner(caller, &owner, "position")?;
        self.transact(|tx, prices| {
            validate_non_zero(amount)?;
            let fee_bps = tx.state.global.params.protocol_fee_bps;

            let position = tx.state.positions.get_active_mut(&owner)?;
            position.add_debt(amount, tx.block_height)?;
            let debt = position.debt;
            tx.state.global.record_issued(amount)?;

            let icr = tx.ensure_healthy(&owner, prices)?;
            tx.rethread(owner, hint, prices)?;

            let fee = calculate_fee_bps(amount, fee_bps)?;
            tx.fee = fee;
            tx.emit(ProtocolEvent::DebtBorrowed(DebtBorrowedEvent {
                owner,
                amount,
                fee,
                icr,
            }));

            info!(owner = %owner.short(), amount, fee, icr, "Debt borrowed");
            Ok(BorrowResult {
                debt,
                fee,
                net_proceeds: amount - fee,
                icr,
            })
        })
    }

    /// Repay debt. Repaying everything closes the position and returns its collateral.
    pub fn repay(&mut self, caller: &Address, owner: Address, amount: u128, hint: Option<NeighborHint>) -> Result<RepayResult> {
        validate_owner(caller, &owner, "position")?;
        self.transact(|tx, prices| {
            validate_non_zero(amount)?;
            settle_debt(tx, prices, owner, amount, hint)
        })
    }

    /// Repay all debt and close the position
    pub fn close_position(&mut self, caller: &Address, owner: Address) -> Result<RepayResult> {
        validate_owner(caller, &owner, "position")?;
        self.transact(|tx, prices| {
            let debt = tx.state.positions.get_active(&owner)?.debt;
            settle_debt(tx, prices, owner, debt, None)
        })
    }

    /// Pay out collateral left over from a full redemption
    pub fn claim_surplus(&mut self, caller: &Address, owner: Address) -> Result<CollateralMap> {
        validate_owner(caller, &owner, "position")?;
        self.transact(|tx, _| {
            let collateral = tx.state.positions.take_surplus(&owner)?;
            tx.emit(ProtocolEvent::SurplusClaimed(SurplusClaimedEvent {
                owner,
                collateral: collateral.clone(),
            }));
            info!(owner = %owner.short(), "Surplus claimed");
            Ok(collateral)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STABILITY POOL OPERATIONS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Stake aUSD into the stability pool
    pub fn stake(&mut self, caller: &Address, owner: Address, amount: u128) -> Result<u128> {
        validate_owner(caller, &owner, "deposit")?;
        self.transact(|tx, _| {
            let balance = tx.state.pool.stake(owner, amount, tx.block_height)?;
            tx.emit(ProtocolEvent::Staked(StakeEvent { owner, amount, balance }));
            info!(owner = %owner.short(), amount, balance, "Staked");
            Ok(balance)
        })
    }

    /// Withdraw aUSD from the stability pool
    pub fn unstake(&mut self, caller: &Address, owner: Address, amount: u128) -> Result<u128> {
        validate_owner(caller, &owner, "deposit")?;
        self.transact(|tx, _| {
            let balance = tx.state.pool.unstake(&owner, amount)?;
            tx.emit(ProtocolEvent::Unstaked(StakeEvent { owner, amount, balance }));
            info!(owner = %owner.short(), amount, balance, "Unstaked");
            Ok(balance)
        })
    }

    /// Withdraw accumulated collateral gains
    pub fn withdraw_gains(&mut self, caller: &Address, owner: Address) -> Result<CollateralMap> {
        validate_owner(caller, &owner, "deposit")?;
        self.transact(|tx, _| {
            let gains = tx.state.pool.withdraw_gains(&owner)?;
            tx.emit(ProtocolEvent::GainsWithdrawn(GainsWithdrawnEvent {
                owner,
                gains: gains.clone(),
            }));
            info!(owner = %owner.short(), kinds = gains.len(), "Gains withdrawn");
            Ok(gains)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LIQUIDATION AND REDEMPTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Positions below `threshold`, riskiest first
    pub fn query_liquidatable(&self, threshold: u64, max_count: usize) -> Result<Vec<(Address, u64)>> {
        engine::query_liquidatable(&self.state, &self.price_book(), threshold, max_count)
    }

    /// Liquidate a batch of positions. Healthy and missing targets are reported as skipped.
    pub fn liquidate(&mut self, targets: &[Address]) -> Result<LiquidationOutcome> {
        self.transact(|tx, prices| {
            let outcome = engine::liquidate(&mut tx.state, prices, targets, tx.block_height)?;
            for l in &outcome.liquidated {
                tx.emit(ProtocolEvent::PositionLiquidated(PositionLiquidatedEvent {
                    owner: l.owner,
                    icr: l.icr,
                    debt: l.debt,
                    debt_offset: l.debt_offset,
                    debt_redistributed: l.debt_redistributed,
                    collateral: l.collateral.clone(),
                    transition: l.transition,
                }));
            }
            for s in &outcome.skipped {
                tx.emit(ProtocolEvent::LiquidationSkipped(LiquidationSkippedEvent {
                    owner: s.owner,
                    reason: s.reason,
                }));
            }
            Ok(outcome)
        })
    }

    /// Redeem aUSD for collateral of `kind`
    pub fn redeem(
        &mut self,
        redeemer: Address,
        amount: u128,
        kind: CollateralKind,
        hint: Option<NeighborHint>,
    ) -> Result<RedemptionOutcome> {
        self.transact(|tx, prices| {
            let outcome = redemption::redeem(&mut tx.state, prices, redeemer, amount, kind, hint, tx.block_height)?;
            tx.fee = outcome.fee;
            tx.emit(ProtocolEvent::Redemption(RedemptionEvent {
                redeemer,
                kind,
                amount,
                fee: outcome.fee,
                collateral_out: outcome.collateral_out,
                positions_touched: u32::try_from(outcome.positions.len()).unwrap_or(u32::MAX),
            }));
            Ok(outcome)
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ADMIN
    // ═══════════════════════════════════════════════════════════════════════════

    /// Change the MCR
    pub fn set_minimum_collateral_ratio(&mut self, caller: &Address, mcr: u64) -> Result<()> {
        self.admin(*caller, AdminAction::SetMinimumCollateralRatio { mcr })
    }

    /// Change the protocol fee
    pub fn set_protocol_fee(&mut self, caller: &Address, fee_bps: u64) -> Result<()> {
        self.admin(*caller, AdminAction::SetProtocolFee { fee_bps })
    }

    /// Change the redistribution policy
    pub fn set_redistribution_policy(&mut self, caller: &Address, policy: RedistributionPolicy) -> Result<()> {
        self.admin(*caller, AdminAction::SetRedistributionPolicy { policy })
    }

    /// Hand the admin role to another account
    pub fn transfer_admin(&mut self, caller: &Address, new_admin: Address) -> Result<()> {
        self.admin(*caller, AdminAction::TransferAdmin { new_admin })
    }

    fn admin(&mut self, caller: Address, action: AdminAction) -> Result<()> {
        self.transact(|tx, _| {
            let global = &mut tx.state.global;
            let event = match action {
                AdminAction::SetMinimumCollateralRatio { mcr } => {
                    global.set_minimum_collateral_ratio(&caller, mcr)?;
                    parameter_changed("minimum_collateral_ratio", mcr)
                }
                AdminAction::SetProtocolFee { fee_bps } => {
                    global.set_protocol_fee(&caller, fee_bps)?;
                    parameter_changed("protocol_fee_bps", fee_bps)
                }
                AdminAction::SetRedistributionPolicy { policy } => {
                    global.set_redistribution_policy(&caller, policy)?;
                    parameter_changed("redistribution_policy", policy)
                }
                AdminAction::TransferAdmin { new_admin } => {
                    global.transfer_admin(&caller, new_admin)?;
                    ProtocolEvent::AdminTransferred(AdminTransferredEvent {
                        from: caller,
                        to: new_admin,
                    })
                }
            };
            tx.emit(event);
            Ok(())
        })
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // QUERIES
    // ═══════════════════════════════════════════════════════════════════════════

    /// Position record in any status
    pub fn position(&self, owner: &Address) -> Option<&Position> {
        self.state.positions.get(owner)
    }

    /// Live ICR of an open position
    pub fn icr_of(&self, owner: &Address) -> Result<u64> {
        compute_icr(self.state.positions.get_active(owner)?, &self.price_book())
    }

    /// ICR a position with this collateral and debt would have at current prices
    pub fn preview_icr(&self, collateral: &CollateralMap, debt: u128) -> Result<u64> {
        let value = collateral_value(collateral, &self.price_book())?;
        ratio_from_value(value, debt)
    }

    /// Total debt of open positions
    pub fn total_debt(&self) -> u128 {
        self.state.global.total_debt
    }

    /// Total collateral of one kind held by open positions
    pub fn total_collateral(&self, kind: CollateralKind) -> u128 {
        self.state.global.collateral_of(kind)
    }

    /// Total aUSD staked in the pool
    pub fn total_stake(&self) -> u128 {
        self.state.pool.total_staked()
    }

    /// Compounded stake and its 1e18-scaled share of the pool
    pub fn stake_of(&self, owner: &Address) -> Result<(u128, u128)> {
        Ok((
            self.state.pool.compounded_deposit(owner)?,
            self.state.pool.stake_share(owner)?,
        ))
    }

    /// Collateral gains a depositor could withdraw now
    pub fn liquidation_gains_of(&self, owner: &Address) -> Result<CollateralMap> {
        self.state.pool.pending_gains(owner)
    }

    /// Total collateralization ratio of the system
    pub fn tcr(&self) -> Result<u64> {
        total_collateral_ratio(&self.state.positions, &self.price_book())
    }

    /// Hint to submit for a position that will have `icr`.
    ///
    /// Pass the owner as `exclude` when the position is being updated.
    pub fn find_insert_position(&self, icr: u64, exclude: Option<&Address>) -> Result<NeighborHint> {
        let prices = self.price_book();
        let view = self.state.health_view(&prices);
        self.state.sorted.find_insert_position(icr, exclude, &view)
    }

    /// Verify the committed state
    pub fn check_invariants(&self) -> Result<()> {
        self.state.check_invariants()
    }

    /// Committed state
    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    /// Current block height
    pub fn block_height(&self) -> u64 {
        self.block_height
    }

    /// Current timestamp
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    /// Price source
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// Price source, mutably
    pub fn oracle_mut(&mut self) -> &mut O {
        &mut self.oracle
    }

    /// Fee destination
    pub fn fee_router(&self) -> &F {
        &self.fee_router
    }

    /// Fee destination, mutably
    pub fn fee_router_mut(&mut self) -> &mut F {
        &mut self.fee_router
    }
}

/// Repay `amount`, closing the position when nothing is left
fn settle_debt(
    tx: &mut Pending,
    prices: &PriceBook,
    owner: Address,
    amount: u128,
    hint: Option<NeighborHint>,
) -> Result<RepayResult> {
    let minimum = tx.state.global.params.minimum_loan_amount;
    let position = tx.state.positions.get_active_mut(&owner)?;
    position.reduce_debt(amount, tx.block_height)?;
    let remaining_debt = position.debt;
    validate_remaining_debt(remaining_debt, minimum)?;
    tx.state.global.record_repaid(amount)?;

    if remaining_debt > 0 {
        tx.rethread(owner, hint, prices)?;
        tx.emit(ProtocolEvent::DebtRepaid(DebtRepaidEvent {
            owner,
            amount,
            remaining_debt,
        }));
        info!(owner = %owner.short(), amount, remaining_debt, "Debt repaid");
        return Ok(RepayResult {
            repaid: amount,
            remaining_debt,
            collateral_returned: CollateralMap::new(),
        });
    }

    let position = tx.state.positions.get_active_mut(&owner)?;
    let collateral_returned = position.take_collateral();
    position.close(PositionStatus::Closed, tx.block_height);
    for (&kind, &a) in &collateral_returned {
        tx.state.global.remove_collateral(kind, a)?;
    }
    tx.state.sorted.remove(&owner)?;

    tx.emit(ProtocolEvent::DebtRepaid(DebtRepaidEvent {
        owner,
        amount,
        remaining_debt: 0,
    }));
    tx.emit(ProtocolEvent::PositionClosed(PositionClosedEvent {
        owner,
        collateral_returned: collateral_returned.clone(),
    }));
    info!(owner = %owner.short(), amount, "Position closed");
    Ok(RepayResult {
        repaid: amount,
        remaining_debt: 0,
        collateral_returned,
    })
}

fn parameter_changed(name: &str, value: impl std::fmt::Display) -> ProtocolEvent {
    ProtocolEvent::ParameterChanged(ParameterChangedEvent {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fees::FeeSink;
    use crate::oracle::price_feed::{ManualPriceFeed, PriceQuote};
    use crate::utils::constants::*;

    const NOW: u64 = 1_700_000_000;
    const SOL: u128 = 1_000_000_000;

    type Machine = ProtocolStateMachine<ManualPriceFeed, FeeSink>;

    fn admin() -> Address {
        Address::derive("admin")
    }

    fn user(name: &str) -> Address {
        Address::derive(name)
    }

    fn sol(amount: u128) -> CollateralMap {
        CollateralMap::from([(CollateralKind::Sol, amount * SOL)])
    }

    fn ausd(amount: u128) -> u128 {
        amount * AUSD_UNIT
    }

    fn setup(sol_price: i64) -> Machine {
        let mut feed = ManualPriceFeed::new(admin());
        feed.set_price(&admin(), CollateralKind::Sol, PriceQuote::from_dollars(sol_price, NOW))
            .unwrap();
        let mut machine = Machine::new(admin(), ProtocolParams::default(), feed, FeeSink::default()).unwrap();
        machine.begin_block(1, NOW).unwrap();
        machine
    }

    fn set_sol_price(machine: &mut Machine, dollars: i64) {
        let now = machine.timestamp();
        machine
            .oracle_mut()
            .set_price(&admin(), CollateralKind::Sol, PriceQuote::from_dollars(dollars, now))
            .unwrap();
    }

    fn open(machine: &mut Machine, name: &str, sol_amount: u128, debt: u128) -> BorrowResult {
        let owner = user(name);
        let collateral = sol(sol_amount);
        let icr = machine.preview_icr(&collateral, ausd(debt)).unwrap();
        let hint = machine.find_insert_position(icr, None).unwrap();
        machine.open_position(&owner, owner, collateral, ausd(debt), Some(hint)).unwrap()
    }

    #[test]
    fn test_open_position() {
        let mut machine = setup(100);
        let result = open(&mut machine, "alice", 10, 500);

        assert_eq!(result.icr, 200 * MICRO_PERCENT);
        assert_eq!(result.debt, ausd(500));
        assert_eq!(result.fee, ausd(25));
        assert_eq!(result.net_proceeds, ausd(475));
        assert_eq!(machine.fee_router().total, ausd(25));
        assert_eq!(machine.total_debt(), ausd(500));
        assert_eq!(machine.total_collateral(CollateralKind::Sol), 10 * SOL);
        assert_eq!(machine.state().sorted.head(), Some(user("alice")));
        machine.check_invariants().unwrap();

        let events = machine.drain_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event.event_type(), "PositionOpened");
    }

    #[test]
    fn test_open_below_mcr_rejected() {
        let mut machine = setup(100);
        let result = machine.open_position(&user("alice"), user("alice"), sol(1), ausd(100), None);
        assert!(matches!(result, Err(Error::CollateralizationRatioTooLow { .. })));
        assert_eq!(machine.total_debt(), 0);
        assert_eq!(machine.fee_router().total, 0);
        assert!(machine.drain_events().is_empty());
    }

    #[test]
    fn test_open_below_minimum_loan() {
        let mut machine = setup(100);
        let result = machine.open_position(&user("alice"), user("alice"), sol(10), ausd(1), None);
        assert!(matches!(result, Err(Error::DebtBelowMinimum { .. })));
    }

    #[test]
    fn test_stale_hint_leaves_state_unchanged() {
        let mut machine = setup(100);
        open(&mut machine, "alice", 10, 500); // 200%
        open(&mut machine, "bob", 10, 400); // 250%
        let before = machine.state().clone();

        // Claims carol (300%) belongs before alice
        let bad = NeighborHint::new(None, Some(user("alice")));
        let result = machine.open_position(&user("carol"), user("carol"), sol(15), ausd(500), Some(bad));
        assert!(matches!(result, Err(Error::StaleHint(_))));
        assert_eq!(machine.state(), &before);
    }

    #[test]
    fn test_borrow_and_repay() {
        let mut machine = setup(100);
        open(&mut machine, "alice", 10, 300);

        let hint = machine.find_insert_position(0, Some(&user("alice"))).unwrap();
        let borrowed = machine.borrow(&user("alice"), user("alice"), ausd(200), Some(hint)).unwrap();
        assert_eq!(borrowed.debt, ausd(500));
        assert_eq!(borrowed.fee, ausd(10));
        assert_eq!(machine.total_debt(), ausd(500));

        let repaid = machine.repay(&user("alice"), user("alice"), ausd(100), None).unwrap();
        assert_eq!(repaid.remaining_debt, ausd(400));
        assert!(!repaid.closed());

        // Leaves 5 aUSD, under the floor
        let result = machine.repay(&user("alice"), user("alice"), ausd(395), None);
        assert!(matches!(result, Err(Error::DebtBelowMinimum { .. })));
        assert_eq!(machine.total_debt(), ausd(400));
    }

    #[test]
    fn test_full_repay_closes_position() {
        let mut machine = setup(100);
        open(&mut machine, "alice", 10, 500);

        let result = machine.repay(&user("alice"), user("alice"), ausd(500), None).unwrap();
        assert!(result.closed());
        assert_eq!(result.collateral_returned, sol(10));
        assert_eq!(machine.position(&user("alice")).unwrap().status, PositionStatus::Closed);
        assert!(machine.state().sorted.is_empty());
        assert_eq!(machine.total_collateral(CollateralKind::Sol), 0);
        machine.check_invariants().unwrap();

        // A closed owner can open again
        open(&mut machine, "alice", 10, 500);
        assert!(machine.position(&user("alice")).unwrap().is_active());
    }

    #[test]
    fn test_remove_collateral_respects_mcr() {
        let mut machine = setup(100);
        open(&mut machine, "alice", 10, 500);

        let result = machine.remove_collateral(&user("alice"), user("alice"), CollateralKind::Sol, 5 * SOL, None);
        assert!(matches!(result, Err(Error::CollateralizationRatioTooLow { .. })));

        let removed = machine
            .remove_collateral(&user("alice"), user("alice"), CollateralKind::Sol, 2 * SOL, None)
            .unwrap();
        assert_eq!(removed.balance, 8 * SOL);
        assert_eq!(removed.icr, 160 * MICRO_PERCENT);
    }

    #[test]
    fn test_non_owner_cannot_touch_position_or_deposit() {
        let mut machine = setup(100);
        open(&mut machine, "alice", 10, 500);
        machine.stake(&user("alice"), user("alice"), ausd(100)).unwrap();
        machine.drain_events();
        let (mallory, alice) = (user("mallory"), user("alice"));
        let before = machine.state().clone();
        let fees_before = machine.fee_router().total;

        let results = [
            machine.open_position(&mallory, user("victim"), sol(10), ausd(100), None).map(|_| ()),
            machine.add_collateral(&mallory, alice, CollateralKind::Sol, SOL, None).map(|_| ()),
            machine.remove_collateral(&mallory, alice, CollateralKind::Sol, SOL, None).map(|_| ()),
            machine.borrow(&mallory, alice, ausd(10), None).map(|_| ()),
            machine.repay(&mallory, alice, ausd(10), None).map(|_| ()),
            machine.close_position(&mallory, alice).map(|_| ()),
            machine.claim_surplus(&mallory, alice).map(|_| ()),
            machine.stake(&mallory, alice, ausd(10)).map(|_| ()),
            machine.unstake(&mallory, alice, ausd(100)).map(|_| ()),
            machine.withdraw_gains(&mallory, alice).map(|_| ()),
        ];
        for result in results {
            assert!(matches!(result, Err(Error::Unauthorized(_))));
        }
        assert_eq!(machine.state(), &before);
        assert_eq!(machine.fee_router().total, fees_before);
        assert!(machine.drain_events().is_empty());

        // The owner still can
        let repaid = machine.close_position(&alice, alice).unwrap();
        assert!(repaid.closed());
        assert_eq!(machine.unstake(&alice, alice, ausd(100)).unwrap(), 0);
    }

    #[test]
    fn test_execute_checks_caller() {
        let mut machine = setup(100);
        open(&mut machine, "alice", 10, 500);
        let before = machine.state().clone();

        let result = machine.execute(ProtocolOperation::Repay(AdjustDebtOp {
            caller: user("mallory"),
            owner: user("alice"),
            amount: ausd(100),
            hint: None,
        }));
        assert!(matches!(result, Err(Error::Unauthorized(_))));
        assert_eq!(machine.state(), &before);
    }

    #[test]
    fn test_add_collateral_rethreads() {
        let mut machine = setup(100);
        open(&mut machine, "alice", 10, 500); // 200%
        open(&mut machine, "bob", 10, 400); // 250%
        assert_eq!(machine.state().sorted.head(), Some(user("alice")));

        // alice to 400%
        let icr = machine.preview_icr(&sol(20), ausd(500)).unwrap();
        let hint = machine.find_insert_position(icr, Some(&user("alice"))).unwrap();
        machine
            .add_collateral(&user("alice"), user("alice"), CollateralKind::Sol, 10 * SOL, Some(hint))
            .unwrap();
        assert_eq!(machine.state().sorted.head(), Some(user("bob")));
        assert_eq!(machine.state().sorted.tail(), Some(user("alice")));
    }

    #[test]
    fn test_icr_example_and_liquidation() {
        let mut machine = setup(100);
        open(&mut machine, "alice", 10, 500);
        open(&mut machine, "bob", 100, 1000);
        assert_eq!(machine.icr_of(&user("alice")).unwrap(), 200 * MICRO_PERCENT);

        set_sol_price(&mut machine, 57);
        assert_eq!(machine.icr_of(&user("alice")).unwrap(), 114 * MICRO_PERCENT);

        let liquidatable = machine
            .query_liquidatable(DEFAULT_MINIMUM_COLLATERAL_RATIO, 10)
            .unwrap();
        assert_eq!(liquidatable, vec![(user("alice"), 114 * MICRO_PERCENT)]);

        machine.stake(&user("carol"), user("carol"), ausd(1000)).unwrap();
        let outcome = machine.liquidate(&[user("alice"), user("bob")]).unwrap();
        assert_eq!(outcome.liquidated.len(), 1);
        assert_eq!(outcome.skipped.len(), 1);
        assert!(matches!(outcome.skipped[0].reason, engine::SkipReason::Healthy { .. }));
        assert_eq!(outcome.total_debt_offset, ausd(500));

        assert_eq!(machine.total_stake(), ausd(500));
        assert_eq!(machine.total_debt(), ausd(1000));
        let gains = machine.liquidation_gains_of(&user("carol")).unwrap();
        assert_eq!(gains.get(&CollateralKind::Sol).copied(), Some(10 * SOL));
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_redeem_routes_fee() {
        let mut machine = setup(100);
        open(&mut machine, "alice", 10, 500);
        open(&mut machine, "bob", 20, 500);
        let fees_before = machine.fee_router().total;

        let outcome = machine
            .redeem(user("dave"), ausd(100), CollateralKind::Sol, None)
            .unwrap();
        assert_eq!(outcome.fee, ausd(5));
        assert_eq!(outcome.net_amount, ausd(95));
        assert_eq!(outcome.positions[0].owner, user("alice"));
        assert_eq!(machine.fee_router().total, fees_before + ausd(5));
        assert_eq!(machine.total_debt(), ausd(1000) - ausd(95));
        machine.check_invariants().unwrap();
    }

    #[test]
    fn test_admin_operations() {
        let mut machine = setup(100);
        let result = machine.set_protocol_fee(&user("mallory"), 100);
        assert!(matches!(result, Err(Error::Unauthorized(_))));

        machine.set_protocol_fee(&admin(), 100).unwrap();
        machine
            .set_redistribution_policy(&admin(), RedistributionPolicy::DebtShare)
            .unwrap();
        machine.transfer_admin(&admin(), user("new-admin")).unwrap();
        assert!(machine.set_minimum_collateral_ratio(&admin(), 120 * MICRO_PERCENT).is_err());
        machine
            .set_minimum_collateral_ratio(&user("new-admin"), 120 * MICRO_PERCENT)
            .unwrap();

        assert_eq!(machine.state().global.params.protocol_fee_bps, 100);
        assert_eq!(machine.state().global.params.minimum_collateral_ratio, 120 * MICRO_PERCENT);
        let events = machine.drain_events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[2].event.event_type(), "AdminTransferred");
    }

    #[test]
    fn test_execute_dispatch() {
        let mut machine = setup(100);
        let result = machine
            .execute(ProtocolOperation::Stake(StakeOp {
                caller: user("carol"),
                owner: user("carol"),
                amount: ausd(50),
            }))
            .unwrap();
        assert_eq!(result, OperationResult::Stake { balance: ausd(50) });
    }

    #[test]
    fn test_stale_price_blocks_operations() {
        let mut machine = setup(100);
        open(&mut machine, "alice", 10, 500);
        machine.begin_block(2, NOW + 3_600).unwrap();

        let result = machine.borrow(&user("alice"), user("alice"), ausd(10), None);
        assert!(matches!(result, Err(Error::StalePrice { .. })));
        // Pool operations need no price
        machine.stake(&user("carol"), user("carol"), ausd(10)).unwrap();
    }

    #[test]
    fn test_begin_block_rejects_rewind() {
        let mut machine = setup(100);
        assert!(machine.begin_block(0, NOW).is_err());
        assert!(machine.begin_block(2, NOW + 1).is_ok());
    }
}
