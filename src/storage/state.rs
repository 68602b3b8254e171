//! Persistence of the protocol state layout.
//!
//! Every component is written under its own key so that a single position,
//! deposit or registry node can be inspected without decoding the rest:
//!
//! | key                    | value                 |
//! |------------------------|-----------------------|
//! | `debt:{owner}`         | debt, status, blocks  |
//! | `coll:{owner}:{kind}`  | collateral balance    |
//! | `node:{owner}`         | registry node         |
//! | `dep:{owner}`          | pool deposit          |
//! | `surplus:{owner}`      | claimable collateral  |
//! | `global`               | admin, params, totals |
//! | `pool`                 | pool-wide factors     |

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::collateral::CollateralKind;
use crate::core::config::GlobalState;
use crate::core::position::{CollateralMap, Position, PositionStatus, PositionStore};
use crate::core::sorted::{Node, SortedPositions};
use crate::error::{Error, Result};
use crate::liquidation::stability_pool::{Deposit, StabilityPool};
use crate::protocol::state::ProtocolState;
use crate::storage::backend::{make_key, prefixes, StorageBackend, TypedStore};
use crate::utils::crypto::Address;

/// Everything about a position except its collateral
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct DebtRecord {
    debt: u128,
    status: PositionStatus,
    created_at: u64,
    last_updated: u64,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Saves and loads `ProtocolState` through a storage backend
pub struct StateStore<B: StorageBackend> {
    store: TypedStore<B>,
}

impl<B: StorageBackend> StateStore<B> {
    /// Create a state store over a backend
    pub fn new(backend: B) -> Self {
        Self {
            store: TypedStore::new(backend),
        }
    }

    /// Underlying backend
    pub fn backend(&self) -> &B {
        self.store.backend()
    }

    /// Whether a state has been saved
    pub fn is_initialized(&self) -> Result<bool> {
        Ok(self.store.backend().get(prefixes::GLOBAL)?.is_some())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // SAVE
    // ═══════════════════════════════════════════════════════════════════════════

    /// Replace the stored state with `state` and flush
    pub fn save(&self, state: &ProtocolState) -> Result<()> {
        state.check_invariants()?;
        self.clear_layout()?;

        self.store.set(prefixes::GLOBAL, &state.global)?;

        for position in state.positions.iter() {
            let owner = owner_key(&position.owner);
            self.store.set(
                &make_key(prefixes::DEBT, owner.as_bytes()),
                &DebtRecord {
                    debt: position.debt,
                    status: position.status,
                    created_at: position.created_at,
                    last_updated: position.last_updated,
                },
            )?;
            for (kind, amount) in &position.collateral {
                self.store.set(&collateral_key(&position.owner, *kind), amount)?;
            }
        }
        for (owner, collateral) in state.positions.surplus_entries() {
            self.store
                .set(&make_key(prefixes::SURPLUS, owner_key(owner).as_bytes()), collateral)?;
        }

        for (owner, node) in state.sorted.nodes() {
            self.store
                .set(&make_key(prefixes::NODE, owner_key(owner).as_bytes()), node)?;
        }

        let mut pool = state.pool.clone();
        for deposit in pool.take_deposits() {
            self.store
                .set(&make_key(prefixes::DEPOSIT, owner_key(&deposit.owner).as_bytes()), &deposit)?;
        }
        self.store.set(prefixes::POOL, &pool)?;

        self.store.flush()?;
        info!(
            positions = state.positions.len(),
            depositors = state.pool.depositor_count(),
            "State saved"
        );
        Ok(())
    }

    fn clear_layout(&self) -> Result<()> {
        let mut removed = 0usize;
        for prefix in [
            prefixes::DEBT,
            prefixes::COLLATERAL,
            prefixes::NODE,
            prefixes::DEPOSIT,
            prefixes::SURPLUS,
        ] {
            for key in self.store.list_prefix(prefix)? {
                self.store.delete(&key)?;
                removed += 1;
            }
        }
        debug!(removed, "Cleared stored layout");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // LOAD
    // ═══════════════════════════════════════════════════════════════════════════

    /// Load the stored state, `None` if nothing was saved
    pub fn load(&self) -> Result<Option<ProtocolState>> {
        let global: GlobalState = match self.store.get(prefixes::GLOBAL)? {
            Some(global) => global,
            None => return Ok(None),
        };

        let mut positions = PositionStore::new();
        for key in self.store.list_prefix(prefixes::DEBT)? {
            let owner = parse_owner(&key, prefixes::DEBT)?;
            let record: DebtRecord = self.required(&key)?;
            let mut position = Position::new(owner, record.created_at);
            position.debt = record.debt;
            position.status = record.status;
            position.last_updated = record.last_updated;

            let owner_prefix = make_key(prefixes::COLLATERAL, format!("{}:", owner_key(&owner)).as_bytes());
            for coll_key in self.store.list_prefix(&owner_prefix)? {
                let kind = parse_kind(&coll_key, &owner_prefix)?;
                let amount: u128 = self.required(&coll_key)?;
                position.collateral.insert(kind, amount);
            }
            positions.insert(position)?;
        }
        for key in self.store.list_prefix(prefixes::SURPLUS)? {
            let owner = parse_owner(&key, prefixes::SURPLUS)?;
            let collateral: CollateralMap = self.required(&key)?;
            positions.add_surplus(owner, collateral)?;
        }

        let mut nodes = Vec::new();
        for key in self.store.list_prefix(prefixes::NODE)? {
            let owner = parse_owner(&key, prefixes::NODE)?;
            let node: Node = self.required(&key)?;
            nodes.push((owner, node));
        }
        let sorted = SortedPositions::from_nodes(nodes)?;

        let mut pool: StabilityPool = self.required(prefixes::POOL)?;
        let mut deposits = Vec::new();
        for key in self.store.list_prefix(prefixes::DEPOSIT)? {
            let deposit: Deposit = self.required(&key)?;
            deposits.push(deposit);
        }
        pool.restore_deposits(deposits);

        let state = ProtocolState {
            global,
            positions,
            sorted,
            pool,
        };
        state.check_invariants()?;
        info!(positions = state.positions.len(), "State loaded");
        Ok(Some(state))
    }

    fn required<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<T> {
        self.store.get(key)?.ok_or_else(|| {
            Error::Storage(format!("missing value for {}", String::from_utf8_lossy(key)))
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEYS
// ═══════════════════════════════════════════════════════════════════════════════

fn owner_key(owner: &Address) -> String {
    owner.to_hex()
}

fn collateral_key(owner: &Address, kind: CollateralKind) -> Vec<u8> {
    make_key(
        prefixes::COLLATERAL,
        format!("{}:{}", owner_key(owner), kind.symbol().to_lowercase()).as_bytes(),
    )
}

fn key_suffix<'a>(key: &'a [u8], prefix: &[u8]) -> Result<&'a str> {
    let suffix = key
        .strip_prefix(prefix)
        .ok_or_else(|| Error::Storage(format!("key {} lacks prefix", String::from_utf8_lossy(key))))?;
    std::str::from_utf8(suffix).map_err(|e| Error::Storage(format!("non-utf8 key: {}", e)))
}

fn parse_owner(key: &[u8], prefix: &[u8]) -> Result<Address> {
    Address::from_hex(key_suffix(key, prefix)?)
}

fn parse_kind(key: &[u8], prefix: &[u8]) -> Result<CollateralKind> {
    key_suffix(key, prefix)?.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::ProtocolParams;
    use crate::core::health::HealthView;
    use crate::oracle::price_feed::{PriceBook, PriceQuote};
    use crate::storage::backend::{BinaryStore, InMemoryStore};
    use crate::utils::constants::AUSD_UNIT;

    const SOL: u128 = 1_000_000_000;

    fn prices() -> PriceBook {
        PriceBook::from_quotes([(CollateralKind::Sol, PriceQuote::from_dollars(100, 0))])
    }

    fn sample_state() -> ProtocolState {
        let mut state = ProtocolState::new(Address::derive("admin"), ProtocolParams::default()).unwrap();
        let book = prices();

        for (name, sol, debt) in [("alice", 10u128, 500u128), ("bob", 20, 500)] {
            let owner = Address::derive(name);
            let mut position = Position::new(owner, 1);
            position.deposit_collateral(CollateralKind::Sol, sol * SOL, 1).unwrap();
            position.add_debt(debt * AUSD_UNIT, 1).unwrap();
            state.positions.insert(position).unwrap();
            state.global.add_collateral(CollateralKind::Sol, sol * SOL).unwrap();
            state.global.record_issued(debt * AUSD_UNIT).unwrap();

            let view = HealthView::new(&state.positions, &book);
            let hint = state.sorted.find_insert_position(view_icr(&view, &owner), None, &view).unwrap();
            state.sorted.insert(owner, Some(hint), &view).unwrap();
        }

        state.pool.stake(Address::derive("carol"), 100 * AUSD_UNIT, 1).unwrap();
        state
            .positions
            .add_surplus(
                Address::derive("dave"),
                CollateralMap::from([(CollateralKind::Sol, SOL)]),
            )
            .unwrap();
        state
    }

    fn view_icr(view: &HealthView<'_>, owner: &Address) -> u64 {
        use crate::core::sorted::IcrSource;
        view.icr(owner).unwrap()
    }

    #[test]
    fn test_empty_store_loads_nothing() {
        let store = StateStore::new(InMemoryStore::new());
        assert!(!store.is_initialized().unwrap());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = StateStore::new(InMemoryStore::new());
        let state = sample_state();

        store.save(&state).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.pool.state_hash(), state.pool.state_hash());
    }

    #[test]
    fn test_layout_keys() {
        let store = StateStore::new(InMemoryStore::new());
        store.save(&sample_state()).unwrap();

        let backend = store.backend();
        assert_eq!(backend.list_prefix(prefixes::DEBT).unwrap().len(), 2);
        assert_eq!(backend.list_prefix(prefixes::COLLATERAL).unwrap().len(), 2);
        assert_eq!(backend.list_prefix(prefixes::NODE).unwrap().len(), 2);
        assert_eq!(backend.list_prefix(prefixes::DEPOSIT).unwrap().len(), 1);
        assert_eq!(backend.list_prefix(prefixes::SURPLUS).unwrap().len(), 1);

        let alice = Address::derive("alice");
        let key = collateral_key(&alice, CollateralKind::Sol);
        assert_eq!(key, format!("coll:{}:sol", alice.to_hex()).into_bytes());
        assert!(backend.get(&key).unwrap().is_some());
    }

    #[test]
    fn test_save_drops_removed_entries() {
        let store = StateStore::new(InMemoryStore::new());
        let mut state = sample_state();
        store.save(&state).unwrap();

        // Bob closes: collateral and node go away, the record stays
        let bob = Address::derive("bob");
        let position = state.positions.get_active_mut(&bob).unwrap();
        let debt = position.debt;
        position.reduce_debt(debt, 2).unwrap();
        let collateral = position.take_collateral();
        position.close(PositionStatus::Closed, 2);
        state.global.record_repaid(debt).unwrap();
        for (kind, amount) in collateral {
            state.global.remove_collateral(kind, amount).unwrap();
        }
        state.sorted.remove(&bob).unwrap();

        store.save(&state).unwrap();
        assert_eq!(store.backend().list_prefix(prefixes::NODE).unwrap().len(), 1);
        assert_eq!(store.backend().list_prefix(prefixes::COLLATERAL).unwrap().len(), 1);
        assert_eq!(store.load().unwrap().unwrap(), state);
    }

    #[test]
    fn test_corrupt_registry_rejected() {
        let store = StateStore::new(InMemoryStore::new());
        store.save(&sample_state()).unwrap();

        let alice = Address::derive("alice");
        let key = make_key(prefixes::NODE, owner_key(&alice).as_bytes());
        store.store.set(&key, &Node { prev: None, next: None, icr: 0 }).unwrap();

        assert!(matches!(store.load(), Err(Error::InvariantViolation(_))));
    }

    #[test]
    fn test_binary_store_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = sample_state();

        StateStore::new(BinaryStore::open(temp_dir.path()).unwrap())
            .save(&state)
            .unwrap();

        let reopened = StateStore::new(BinaryStore::open(temp_dir.path()).unwrap());
        assert!(reopened.is_initialized().unwrap());
        assert_eq!(reopened.load().unwrap().unwrap(), state);
    }
}
