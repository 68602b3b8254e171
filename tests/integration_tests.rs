//! Integration tests for the aUSD protocol.
//!
//! These tests drive the state machine end to end: positions, registry,
//! stability pool, liquidation, redemption, fee routing and persistence.

use proptest::prelude::*;

use ausd::core::collateral::CollateralKind;
use ausd::core::config::{ProtocolParams, RedistributionPolicy};
use ausd::core::fees::{FeeDistributor, FeeRouter, FeeSink};
use ausd::core::position::{CollateralMap, PositionStatus};
use ausd::core::sorted::NeighborHint;
use ausd::error::Error;
use ausd::liquidation::engine::SkipReason;
use ausd::oracle::price_feed::{ManualPriceFeed, PriceQuote};
use ausd::protocol::{OperationResult, ProtocolOperation, ProtocolStateMachine};
use ausd::storage::backend::{BinaryStore, InMemoryStore};
use ausd::storage::state::StateStore;
use ausd::utils::constants::{AUSD_UNIT, DEFAULT_MINIMUM_COLLATERAL_RATIO, MICRO_PERCENT};
use ausd::utils::crypto::Address;

// ═══════════════════════════════════════════════════════════════════════════════
// TEST HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

const NOW: u64 = 1_700_000_000;
const SOL: u128 = 1_000_000_000;
const BTC: u128 = 100_000_000;

type Machine<F> = ProtocolStateMachine<ManualPriceFeed, F>;

fn admin() -> Address {
    Address::derive("admin")
}

fn user(name: &str) -> Address {
    Address::derive(name)
}

fn ausd(amount: u128) -> u128 {
    amount * AUSD_UNIT
}

fn sol(amount: u128) -> CollateralMap {
    CollateralMap::from([(CollateralKind::Sol, amount * SOL)])
}

fn machine_with<F: FeeRouter>(sol_price: i64, router: F) -> Machine<F> {
    let mut feed = ManualPriceFeed::new(admin());
    feed.set_price(&admin(), CollateralKind::Sol, PriceQuote::from_dollars(sol_price, NOW))
        .unwrap();
    feed.set_price(&admin(), CollateralKind::Btc, PriceQuote::from_dollars(60_000, NOW))
        .unwrap();
    let mut machine = ProtocolStateMachine::new(admin(), ProtocolParams::default(), feed, router).unwrap();
    machine.begin_block(1, NOW).unwrap();
    machine
}

fn machine(sol_price: i64) -> Machine<FeeSink> {
    machine_with(sol_price, FeeSink::default())
}

fn set_sol_price<F: FeeRouter>(machine: &mut Machine<F>, dollars: i64) {
    let now = machine.timestamp();
    machine
        .oracle_mut()
        .set_price(&admin(), CollateralKind::Sol, PriceQuote::from_dollars(dollars, now))
        .unwrap();
}

fn open_with<F: FeeRouter>(
    machine: &mut Machine<F>,
    name: &str,
    collateral: CollateralMap,
    debt: u128,
) -> Result<OperationResult, Error> {
    let icr = machine.preview_icr(&collateral, debt)?;
    let hint = machine.find_insert_position(icr, None)?;
    machine
        .open_position(&user(name), user(name), collateral, debt, Some(hint))
        .map(OperationResult::Borrow)
}

fn open<F: FeeRouter>(machine: &mut Machine<F>, name: &str, sol_amount: u128, debt: u128) {
    open_with(machine, name, sol(sol_amount), ausd(debt)).unwrap();
}

fn hint_for<F: FeeRouter>(machine: &Machine<F>, name: &str, collateral: &CollateralMap, debt: u128) -> NeighborHint {
    let icr = machine.preview_icr(collateral, debt).unwrap();
    machine.find_insert_position(icr, Some(&user(name))).unwrap()
}

fn assert_debt_conserved<F: FeeRouter>(machine: &Machine<F>) {
    let state = machine.state();
    let sum: u128 = state.positions.active().map(|p| p.debt).sum();
    assert_eq!(sum, machine.total_debt(), "global debt must equal the sum of open positions");
    assert_eq!(state.sorted.len(), state.positions.active_count());
    machine.check_invariants().unwrap();
}

// ═══════════════════════════════════════════════════════════════════════════════
// POSITION LIFECYCLE TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_full_position_lifecycle() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500);

    // Add BTC: 1000 SOL-dollars + 600 BTC-dollars against 500 debt
    let collateral = CollateralMap::from([(CollateralKind::Sol, 10 * SOL), (CollateralKind::Btc, BTC / 100)]);
    let hint = hint_for(&machine, "alice", &collateral, ausd(500));
    let added = machine
        .add_collateral(&user("alice"), user("alice"), CollateralKind::Btc, BTC / 100, Some(hint))
        .unwrap();
    assert_eq!(added.balance, BTC / 100);
    assert_eq!(added.icr, 320 * MICRO_PERCENT);

    let hint = hint_for(&machine, "alice", &collateral, ausd(800));
    let borrowed = machine.borrow(&user("alice"), user("alice"), ausd(300), Some(hint)).unwrap();
    assert_eq!(borrowed.debt, ausd(800));
    assert_eq!(borrowed.icr, 200 * MICRO_PERCENT);
    assert_debt_conserved(&machine);

    let repaid = machine.repay(&user("alice"), user("alice"), ausd(300), None).unwrap();
    assert_eq!(repaid.remaining_debt, ausd(500));

    let closed = machine.close_position(&user("alice"), user("alice")).unwrap();
    assert!(closed.closed());
    assert_eq!(closed.repaid, ausd(500));
    assert_eq!(closed.collateral_returned, collateral);
    assert_eq!(machine.position(&user("alice")).unwrap().status, PositionStatus::Closed);
    assert_eq!(machine.total_debt(), 0);
    assert_eq!(machine.total_collateral(CollateralKind::Btc), 0);
    assert_debt_conserved(&machine);

    let types: Vec<&str> = machine
        .drain_events()
        .iter()
        .map(|r| r.event.event_type())
        .collect();
    assert_eq!(
        types,
        vec![
            "PositionOpened",
            "CollateralAdded",
            "DebtBorrowed",
            "DebtRepaid",
            "DebtRepaid",
            "PositionClosed"
        ]
    );
}

#[test]
fn test_icr_example() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500);
    assert_eq!(machine.icr_of(&user("alice")).unwrap(), 200 * MICRO_PERCENT);

    set_sol_price(&mut machine, 57);
    assert_eq!(machine.icr_of(&user("alice")).unwrap(), 114 * MICRO_PERCENT);
    assert_eq!(
        machine
            .query_liquidatable(DEFAULT_MINIMUM_COLLATERAL_RATIO, 10)
            .unwrap(),
        vec![(user("alice"), 114 * MICRO_PERCENT)]
    );
}

#[test]
fn test_registry_stays_ordered() {
    let mut machine = machine(100);
    open(&mut machine, "a", 30, 1000); // 300%
    open(&mut machine, "b", 12, 1000); // 120%
    open(&mut machine, "c", 20, 1000); // 200%
    open(&mut machine, "d", 20, 1000); // 200%, after c

    let order: Vec<Address> = machine.state().sorted.iter().collect();
    assert_eq!(order, vec![user("b"), user("c"), user("d"), user("a")]);

    // Stale hint: claims e (150%) sits between c and d
    let before = machine.state().clone();
    let bad = NeighborHint::new(Some(user("c")), Some(user("d")));
    let result = machine.open_position(&user("e"), user("e"), sol(15), ausd(1000), Some(bad));
    assert!(matches!(result, Err(Error::StaleHint(_))));
    assert_eq!(machine.state(), &before);

    open(&mut machine, "e", 15, 1000);
    let order: Vec<Address> = machine.state().sorted.iter().collect();
    assert_eq!(order, vec![user("b"), user("e"), user("c"), user("d"), user("a")]);
    assert_debt_conserved(&machine);
}

// ═══════════════════════════════════════════════════════════════════════════════
// STABILITY POOL AND LIQUIDATION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_pool_offset_example() {
    let mut machine = machine(20);
    open(&mut machine, "eve", 4, 40); // 200%
    machine.stake(&user("carol"), user("carol"), ausd(100)).unwrap();
    machine.stake(&user("dave"), user("dave"), ausd(300)).unwrap();

    set_sol_price(&mut machine, 11); // 110%
    let outcome = machine.liquidate(&[user("eve")]).unwrap();
    assert_eq!(outcome.total_debt_offset, ausd(40));
    assert_eq!(outcome.total_debt_redistributed, 0);

    let (carol, _) = machine.stake_of(&user("carol")).unwrap();
    let (dave, _) = machine.stake_of(&user("dave")).unwrap();
    assert_eq!(carol, ausd(90));
    assert_eq!(dave, ausd(270));
    assert_eq!(machine.total_stake(), ausd(360));

    let carol_gain = machine.liquidation_gains_of(&user("carol")).unwrap()[&CollateralKind::Sol];
    let dave_gain = machine.liquidation_gains_of(&user("dave")).unwrap()[&CollateralKind::Sol];
    assert!(SOL - carol_gain <= 10, "carol gain {}", carol_gain);
    assert!(3 * SOL - dave_gain <= 10, "dave gain {}", dave_gain);
    assert!(carol_gain + dave_gain <= 4 * SOL);

    let withdrawn = machine.withdraw_gains(&user("carol"), user("carol")).unwrap();
    assert_eq!(withdrawn[&CollateralKind::Sol], carol_gain);
    assert!(machine.liquidation_gains_of(&user("carol")).unwrap().is_empty());
    assert_debt_conserved(&machine);
}

#[test]
fn test_redistribution_without_pool() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500);
    open(&mut machine, "bob", 100, 1000);
    set_sol_price(&mut machine, 57);

    let outcome = machine.liquidate(&[user("alice")]).unwrap();
    assert_eq!(outcome.total_debt_offset, 0);
    assert_eq!(outcome.total_debt_redistributed, ausd(500));

    let bob = machine.position(&user("bob")).unwrap();
    assert_eq!(bob.debt, ausd(1500));
    assert_eq!(bob.collateral_of(CollateralKind::Sol), 110 * SOL);
    assert_eq!(machine.total_debt(), ausd(1500));
    assert_eq!(machine.total_collateral(CollateralKind::Sol), 110 * SOL);
    assert_eq!(
        machine.position(&user("alice")).unwrap().status,
        PositionStatus::Liquidated
    );
    assert_debt_conserved(&machine);
}

#[test]
fn test_last_position_cannot_be_redistributed() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500);
    set_sol_price(&mut machine, 57);

    let outcome = machine.liquidate(&[user("alice")]).unwrap();
    assert!(outcome.liquidated.is_empty());
    assert_eq!(outcome.skipped[0].reason, SkipReason::NoRedistributionCapacity);
    assert!(machine.position(&user("alice")).unwrap().is_active());
}

#[test]
fn test_epoch_rollover_through_liquidation() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500);
    open(&mut machine, "bob", 100, 1000);
    machine.stake(&user("carol"), user("carol"), ausd(200)).unwrap();
    set_sol_price(&mut machine, 57);

    // 200 offset wipes the pool, 300 is redistributed to bob
    let outcome = machine.liquidate(&[user("alice")]).unwrap();
    assert_eq!(outcome.total_debt_offset, ausd(200));
    assert_eq!(outcome.total_debt_redistributed, ausd(300));
    assert_eq!(machine.total_stake(), 0);
    assert_eq!(machine.state().pool.epoch(), 1);
    assert_eq!(machine.stake_of(&user("carol")).unwrap().0, 0);

    let carol_gain = machine.liquidation_gains_of(&user("carol")).unwrap()[&CollateralKind::Sol];
    assert!(4 * SOL - carol_gain <= 10, "carol gain {}", carol_gain);

    // A new depositor is unaffected by the old epoch
    machine.stake(&user("dave"), user("dave"), ausd(100)).unwrap();
    assert_eq!(machine.stake_of(&user("dave")).unwrap().0, ausd(100));
    assert!(machine.liquidation_gains_of(&user("dave")).unwrap().is_empty());
    assert_eq!(machine.stake_of(&user("carol")).unwrap().0, 0);
    assert_debt_conserved(&machine);
}

#[test]
fn test_failed_batch_leaves_state_unchanged() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500);
    open(&mut machine, "bob", 100, 1000);
    machine.stake(&user("carol"), user("carol"), ausd(1000)).unwrap();
    set_sol_price(&mut machine, 57);
    machine.drain_events();
    let before = machine.state().clone();

    let result = machine.liquidate(&[user("alice"), user("alice")]);
    assert!(matches!(result, Err(Error::DuplicateTarget(_))));

    let too_many: Vec<Address> = (0..51).map(|i| user(&format!("u{}", i))).collect();
    assert!(matches!(machine.liquidate(&too_many), Err(Error::BatchTooLarge { .. })));

    assert_eq!(machine.state(), &before);
    assert!(machine.drain_events().is_empty());

    // Unknown targets are reported, the rest still go through
    let outcome = machine.liquidate(&[user("ghost"), user("alice")]).unwrap();
    assert_eq!(outcome.skipped[0].reason, SkipReason::NotFound);
    assert_eq!(outcome.liquidated.len(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════════
// REDEMPTION TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_redemption_order_and_mcr_skip() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500); // 200%
    open(&mut machine, "bob", 20, 500); // 400%
    open(&mut machine, "carol", 12, 1000); // 120%
    set_sol_price(&mut machine, 90); // carol 108%, alice 180%, bob 360%

    let outcome = machine
        .redeem(user("redeemer"), ausd(300), CollateralKind::Sol, None)
        .unwrap();
    assert_eq!(outcome.fee, ausd(15));
    assert_eq!(outcome.positions.len(), 1);
    assert_eq!(outcome.positions[0].owner, user("alice"));
    assert_eq!(outcome.collateral_out, 3_166_666_666);
    assert_eq!(machine.position(&user("alice")).unwrap().debt, ausd(215));
    assert_eq!(machine.position(&user("carol")).unwrap().debt, ausd(1000));

    // Second pass closes alice and draws the rest from bob
    let outcome = machine
        .redeem(user("redeemer"), ausd(420), CollateralKind::Sol, None)
        .unwrap();
    let owners: Vec<Address> = outcome.positions.iter().map(|p| p.owner).collect();
    assert_eq!(owners, vec![user("alice"), user("bob")]);
    assert!(outcome.positions[0].closed);
    assert_eq!(machine.position(&user("alice")).unwrap().status, PositionStatus::Redeemed);
    assert_eq!(machine.position(&user("bob")).unwrap().debt, ausd(316));
    assert_debt_conserved(&machine);

    let surplus = machine.claim_surplus(&user("alice"), user("alice")).unwrap();
    assert!(surplus[&CollateralKind::Sol] > 0);
    assert!(machine.claim_surplus(&user("alice"), user("alice")).is_err());
}

#[test]
fn test_redemption_beyond_capacity_fails_whole() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500);
    open(&mut machine, "carol", 12, 1000);
    set_sol_price(&mut machine, 90);
    let before = machine.state().clone();

    // Only alice is redeemable
    let result = machine.redeem(user("redeemer"), ausd(1000), CollateralKind::Sol, None);
    assert!(matches!(result, Err(Error::InsufficientRedemptionCapacity { .. })));
    assert_eq!(machine.state(), &before);
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEES, OPERATIONS AND PERSISTENCE
// ═══════════════════════════════════════════════════════════════════════════════

#[test]
fn test_redemption_with_hint_rethreads_last_position() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500); // 200%
    open(&mut machine, "bob", 20, 500); // 400%
    open(&mut machine, "carol", 30, 1000); // 300%

    // 400 gross, 380 net: alice keeps 6.2 SOL against 120 aUSD
    let after = CollateralMap::from([(CollateralKind::Sol, 62 * SOL / 10)]);
    let hint = hint_for(&machine, "alice", &after, ausd(120));
    let outcome = machine
        .redeem(user("dave"), ausd(400), CollateralKind::Sol, Some(hint))
        .unwrap();
    assert_eq!(outcome.net_amount, ausd(380));
    assert_eq!(outcome.collateral_out, 38 * SOL / 10);

    let order: Vec<Address> = machine.state().sorted.iter().collect();
    assert_eq!(order, vec![user("carol"), user("bob"), user("alice")]);
    assert_eq!(machine.position(&user("alice")).unwrap().debt, ausd(120));
    assert_debt_conserved(&machine);
}

#[test]
fn test_redemption_stale_hint_rolls_back() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500);
    open(&mut machine, "bob", 20, 500);
    open(&mut machine, "carol", 30, 1000);
    machine.drain_events();
    let before = machine.state().clone();
    let fees_before = machine.fee_router().total;

    // alice ends near 516%, which does not belong ahead of carol
    let bad = NeighborHint::new(None, Some(user("carol")));
    let result = machine.redeem(user("dave"), ausd(400), CollateralKind::Sol, Some(bad));
    assert!(matches!(result, Err(Error::StaleHint(_))));

    assert_eq!(machine.state(), &before);
    assert_eq!(machine.fee_router().total, fees_before);
    assert!(machine.drain_events().is_empty());
}

#[test]
fn test_partial_redemption_below_minimum_debt_rolls_back() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500);
    open(&mut machine, "bob", 20, 500);
    let before = machine.state().clone();

    // 520 gross, 494 net would leave alice with 6 aUSD
    let result = machine.redeem(user("dave"), ausd(520), CollateralKind::Sol, None);
    assert_eq!(
        result.unwrap_err(),
        Error::DebtBelowMinimum {
            amount: ausd(6),
            minimum: ausd(10),
        }
    );
    assert_eq!(machine.state(), &before);
    assert_eq!(machine.total_debt(), ausd(1000));
}

#[test]
fn test_liquidatable_query_with_mixed_collateral() {
    let mut machine = machine(100);
    // 0.025 BTC at $60,000 against 1,000 aUSD: 150%
    open_with(
        &mut machine,
        "bob",
        CollateralMap::from([(CollateralKind::Btc, BTC / 40)]),
        ausd(1000),
    )
    .unwrap();
    open(&mut machine, "alice", 10, 500); // 200%
    assert_eq!(machine.state().sorted.head(), Some(user("bob")));

    // Only SOL moves, leaving the registry out of live order
    set_sol_price(&mut machine, 55);
    assert_eq!(machine.icr_of(&user("alice")).unwrap(), 110 * MICRO_PERCENT);
    assert_eq!(machine.icr_of(&user("bob")).unwrap(), 150 * MICRO_PERCENT);

    let found = machine
        .query_liquidatable(DEFAULT_MINIMUM_COLLATERAL_RATIO, 10)
        .unwrap();
    assert_eq!(found, vec![(user("alice"), 110 * MICRO_PERCENT)]);

    machine.stake(&user("carol"), user("carol"), ausd(1000)).unwrap();
    let outcome = machine.liquidate(&[user("alice")]).unwrap();
    assert_eq!(outcome.liquidated.len(), 1);
    assert_eq!(
        machine.position(&user("alice")).unwrap().status,
        PositionStatus::Liquidated
    );
    assert_debt_conserved(&machine);
}

#[test]
fn test_fee_distributor_through_state_machine() {
    let (first, second) = (user("treasury-1"), user("treasury-2"));
    let router = FeeDistributor::new(admin(), first, second).unwrap();
    let mut machine = machine_with(100, router);

    open(&mut machine, "alice", 10, 500);
    assert_eq!(machine.fee_router().credited_to(&first), ausd(25) / 2);
    assert_eq!(machine.fee_router().credited_to(&second), ausd(25) / 2);

    machine.fee_router_mut().set_stake_contract_address(&admin(), user("stakers")).unwrap();
    machine.fee_router_mut().toggle_stake_contract(&admin()).unwrap();
    open(&mut machine, "bob", 10, 100);
    assert_eq!(machine.fee_router().credited_to(&user("stakers")), ausd(5));
    assert_eq!(machine.fee_router().total_fees_collected(), ausd(30));

    // Failed operations route nothing
    assert!(machine.open_position(&user("carol"), user("carol"), sol(1), ausd(500), None).is_err());
    assert_eq!(machine.fee_router().total_fees_collected(), ausd(30));
}

#[test]
fn test_execute_json_operation() {
    let mut machine = machine(100);
    let carol = user("carol").to_hex();
    let json = format!(
        r#"{{"stake":{{"caller":"{}","owner":"{}","amount":{}}}}}"#,
        carol,
        carol,
        ausd(50)
    );
    let op: ProtocolOperation = serde_json::from_str(&json).unwrap();
    let result = machine.execute(op).unwrap();
    assert_eq!(result, OperationResult::Stake { balance: ausd(50) });

    // Someone else cannot drain carol's deposit
    let json = format!(
        r#"{{"withdraw_gains":{{"caller":"{}","owner":"{}"}}}}"#,
        user("mallory").to_hex(),
        carol
    );
    let op: ProtocolOperation = serde_json::from_str(&json).unwrap();
    let before = machine.state().clone();
    assert!(matches!(machine.execute(op), Err(Error::Unauthorized(_))));
    assert_eq!(machine.state(), &before);
}

#[test]
fn test_debt_share_policy() {
    let mut machine = machine(100);
    machine
        .set_redistribution_policy(&admin(), RedistributionPolicy::DebtShare)
        .unwrap();
    open(&mut machine, "alice", 10, 500);
    open(&mut machine, "bob", 100, 1000);
    open(&mut machine, "carol", 100, 3000);
    set_sol_price(&mut machine, 57);

    machine.liquidate(&[user("alice")]).unwrap();
    // 500 split 1:3 by debt
    assert_eq!(machine.position(&user("bob")).unwrap().debt, ausd(1125));
    assert_eq!(machine.position(&user("carol")).unwrap().debt, ausd(3375));
    assert_debt_conserved(&machine);
}

#[test]
fn test_storage_round_trip_after_activity() {
    let mut machine = machine(100);
    open(&mut machine, "alice", 10, 500);
    open(&mut machine, "bob", 100, 1000);
    open(&mut machine, "dave", 30, 600);
    machine.stake(&user("carol"), user("carol"), ausd(200)).unwrap();
    set_sol_price(&mut machine, 57);
    machine.liquidate(&[user("alice")]).unwrap();
    machine
        .redeem(user("redeemer"), ausd(100), CollateralKind::Sol, None)
        .unwrap();

    let store = StateStore::new(InMemoryStore::new());
    store.save(machine.state()).unwrap();
    assert_eq!(store.load().unwrap().as_ref(), Some(machine.state()));

    let dir = tempfile::tempdir().unwrap();
    {
        let store = StateStore::new(BinaryStore::open(dir.path()).unwrap());
        store.save(machine.state()).unwrap();
    }
    let reopened = StateStore::new(BinaryStore::open(dir.path()).unwrap());
    let loaded = reopened.load().unwrap().unwrap();
    assert_eq!(&loaded, machine.state());
    assert_eq!(loaded.state_hash(), machine.state().state_hash());
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROPERTY TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone)]
enum Action {
    Open { who: usize, sol: u128, debt: u128 },
    Borrow { who: usize, amount: u128 },
    Repay { who: usize, amount: u128 },
    Stake { who: usize, amount: u128 },
    Unstake { who: usize, amount: u128 },
    Foreign { who: usize, victim: usize, amount: u128 },
    Price(i64),
    Liquidate,
    Redeem(u128),
}

const NAMES: [&str; 4] = ["p0", "p1", "p2", "p3"];

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        (0..4usize, 1..50u128, 10..2_000u128).prop_map(|(who, sol, debt)| Action::Open { who, sol, debt }),
        (0..4usize, 1..500u128).prop_map(|(who, amount)| Action::Borrow { who, amount }),
        (0..4usize, 1..500u128).prop_map(|(who, amount)| Action::Repay { who, amount }),
        (0..4usize, 1..1_000u128).prop_map(|(who, amount)| Action::Stake { who, amount }),
        (0..4usize, 1..500u128).prop_map(|(who, amount)| Action::Unstake { who, amount }),
        (0..4usize, 1..4usize, 1..500u128).prop_map(|(who, offset, amount)| Action::Foreign {
            who,
            victim: (who + offset) % NAMES.len(),
            amount,
        }),
        (40..200i64).prop_map(Action::Price),
        Just(Action::Liquidate),
        (10..500u128).prop_map(Action::Redeem),
    ]
}

fn apply(machine: &mut Machine<FeeSink>, action: &Action) -> Result<(), Error> {
    match *action {
        Action::Open { who, sol: amount, debt } => open_with(machine, NAMES[who], sol(amount), ausd(debt)).map(|_| ()),
        Action::Borrow { who, amount } => {
            let owner = user(NAMES[who]);
            let hint = match machine.position(&owner).filter(|p| p.is_active()) {
                Some(p) => Some(hint_for(machine, NAMES[who], &p.collateral.clone(), p.debt + ausd(amount))),
                None => None,
            };
            machine.borrow(&owner, owner, ausd(amount), hint).map(|_| ())
        }
        Action::Repay { who, amount } => {
            let owner = user(NAMES[who]);
            machine.repay(&owner, owner, ausd(amount), None).map(|_| ())
        }
        Action::Stake { who, amount } => {
            let owner = user(NAMES[who]);
            machine.stake(&owner, owner, ausd(amount)).map(|_| ())
        }
        Action::Unstake { who, amount } => {
            let owner = user(NAMES[who]);
            machine.unstake(&owner, owner, ausd(amount)).map(|_| ())
        }
        Action::Foreign { who, victim, amount } => {
            let (caller, owner) = (user(NAMES[who]), user(NAMES[victim]));
            let result = match amount % 3 {
                0 => machine.repay(&caller, owner, ausd(amount), None).map(|_| ()),
                1 => machine.unstake(&caller, owner, ausd(amount)).map(|_| ()),
                _ => machine.close_position(&caller, owner).map(|_| ()),
            };
            assert!(matches!(result, Err(Error::Unauthorized(_))));
            result
        }
        Action::Price(dollars) => {
            set_sol_price(machine, dollars);
            Ok(())
        }
        Action::Liquidate => {
            let targets: Vec<Address> = machine
                .query_liquidatable(DEFAULT_MINIMUM_COLLATERAL_RATIO, 10)?
                .into_iter()
                .map(|(owner, _)| owner)
                .collect();
            if targets.is_empty() {
                return Ok(());
            }
            machine.liquidate(&targets).map(|_| ())
        }
        Action::Redeem(amount) => machine
            .redeem(user("redeemer"), ausd(amount), CollateralKind::Sol, None)
            .map(|_| ()),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_debt_conserved_and_failures_atomic(actions in prop::collection::vec(action(), 1..40)) {
        let mut machine = machine(100);
        for action in &actions {
            let before = machine.state().clone();
            if apply(&mut machine, action).is_err() {
                prop_assert_eq!(machine.state(), &before);
            }
            let state = machine.state();
            let sum: u128 = state.positions.active().map(|p| p.debt).sum();
            prop_assert_eq!(sum, state.global.total_debt);
            prop_assert_eq!(state.sorted.len(), state.positions.active_count());
            prop_assert!(machine.check_invariants().is_ok());
        }
    }
}
