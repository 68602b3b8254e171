//! Aggregate protocol state.
//!
//! Everything an operation may touch lives in one `ProtocolState`, so the
//! state machine can run each operation on a working copy and commit it
//! whole.

use serde::{Deserialize, Serialize};

use crate::core::collateral::CollateralKind;
use crate::core::config::{GlobalState, ProtocolParams};
use crate::core::health::HealthView;
use crate::core::position::PositionStore;
use crate::core::sorted::SortedPositions;
use crate::error::{Error, Result};
use crate::liquidation::stability_pool::StabilityPool;
use crate::oracle::price_feed::PriceBook;
use crate::utils::crypto::{Address, Hash};

/// Positions, registry, pool and global totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolState {
    /// Admin, parameters and totals
    pub global: GlobalState,
    /// Positions and surplus
    pub positions: PositionStore,
    /// ICR-ordered registry of open positions
    pub sorted: SortedPositions,
    /// Stability pool ledger
    pub pool: StabilityPool,
}

impl ProtocolState {
    /// Fresh state with validated parameters
    pub fn new(admin: Address, params: ProtocolParams) -> Result<Self> {
        Ok(Self {
            global: GlobalState::new(admin, params)?,
            positions: PositionStore::new(),
            sorted: SortedPositions::new(),
            pool: StabilityPool::new(),
        })
    }

    /// Live ICR lookup over the stored positions
    pub fn health_view<'a>(&'a self, prices: &'a PriceBook) -> HealthView<'a> {
        HealthView::new(&self.positions, prices)
    }

    /// Verify the cross-component invariants.
    ///
    /// Registry ordering is not part of this check: it depends on prices and
    /// is verified through `SortedPositions::is_sorted`.
    pub fn check_invariants(&self) -> Result<()> {
        let violation = |msg: String| Err(Error::InvariantViolation(msg));

        self.sorted.validate_links()?;

        let active = self.positions.active_count();
        if self.sorted.len() != active {
            return violation(format!(
                "registry holds {} nodes for {} open positions",
                self.sorted.len(),
                active
            ));
        }
        let minimum = self.global.params.minimum_loan_amount;
        for position in self.positions.active() {
            if !self.sorted.contains(&position.owner) {
                return violation(format!("open position {} not in registry", position.owner.short()));
            }
            if position.debt < minimum {
                return violation(format!("position {} below minimum debt", position.owner.short()));
            }
            if !position.has_collateral() {
                return violation(format!("position {} has no collateral", position.owner.short()));
            }
        }

        let summed = self.positions.total_debt()?;
        let outstanding = self.global.ledger.outstanding()?;
        if summed != self.global.total_debt || outstanding != self.global.total_debt {
            return violation(format!(
                "debt mismatch: positions {} total {} ledger {}",
                summed, self.global.total_debt, outstanding
            ));
        }

        for kind in CollateralKind::ALL {
            let summed = self.positions.total_collateral(kind)?;
            if summed != self.global.collateral_of(kind) {
                return violation(format!(
                    "{} collateral mismatch: positions {} total {}",
                    kind,
                    summed,
                    self.global.collateral_of(kind)
                ));
            }
        }
        Ok(())
    }

    /// Serialize state to bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Deserialize state from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes).map_err(|e| Error::Deserialization(e.to_string()))
    }

    /// Hash of the whole state
    pub fn state_hash(&self) -> Hash {
        Hash::sha256(&self.to_bytes().unwrap_or_default())
    }
}
