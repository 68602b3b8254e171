//! Fee routing.
//!
//! Protocol fees skimmed from loans and redemptions are handed to a
//! `FeeRouter` once an operation has committed. The default
//! `FeeDistributor` either sends everything to the staking contract or
//! splits it between two treasury addresses.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::utils::crypto::Address;
use crate::utils::math::*;
use crate::utils::validation::validate_distinct_addresses;

// ═══════════════════════════════════════════════════════════════════════════════
// FEE ROUTER
// ═══════════════════════════════════════════════════════════════════════════════

/// Destination for protocol fees
pub trait FeeRouter {
    /// Route `amount` aUSD base units of fees
    fn distribute(&mut self, amount: u128);
}

/// Router that only counts what it receives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSink {
    /// Fees received so far
    pub total: u128,
}

impl FeeRouter for FeeSink {
    fn distribute(&mut self, amount: u128) {
        self.total = self.total.saturating_add(amount);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEE DISTRIBUTOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Snapshot of the distributor configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeConfigView {
    /// Fee admin
    pub admin: Address,
    /// Whether fees go to the staking contract
    pub is_stake_enabled: bool,
    /// Staking contract address
    pub stake_contract_address: Address,
    /// First treasury address
    pub fee_address_1: Address,
    /// Second treasury address
    pub fee_address_2: Address,
    /// Fees routed so far
    pub total_fees_collected: u128,
}

/// Default fee router: stake contract or an even treasury split
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeDistributor {
    admin: Address,
    is_stake_enabled: bool,
    stake_contract_address: Address,
    fee_address_1: Address,
    fee_address_2: Address,
    total_fees_collected: u128,
    /// Amount credited to each recipient
    credited: BTreeMap<Address, u128>,
}

impl FeeDistributor {
    /// Create a distributor with staking disabled
    pub fn new(admin: Address, fee_address_1: Address, fee_address_2: Address) -> Result<Self> {
        validate_distinct_addresses(&fee_address_1, &fee_address_2)?;
        Ok(Self {
            admin,
            is_stake_enabled: false,
            stake_contract_address: Address::default(),
            fee_address_1,
            fee_address_2,
            total_fees_collected: 0,
            credited: BTreeMap::new(),
        })
    }

    fn ensure_admin(&self, caller: &Address) -> Result<()> {
        if caller != &self.admin {
            return Err(Error::Unauthorized(format!("{} is not the fee admin", caller.short())));
        }
        Ok(())
    }

    /// Flip between stake routing and the treasury split
    pub fn toggle_stake_contract(&mut self, caller: &Address) -> Result<bool> {
        self.ensure_admin(caller)?;
        self.is_stake_enabled = !self.is_stake_enabled;
        info!(enabled = self.is_stake_enabled, "Stake routing toggled");
        Ok(self.is_stake_enabled)
    }

    /// Set the staking contract address
    pub fn set_stake_contract_address(&mut self, caller: &Address, address: Address) -> Result<()> {
        self.ensure_admin(caller)?;
        self.stake_contract_address = address;
        Ok(())
    }

    /// Set both treasury addresses
    pub fn set_fee_addresses(&mut self, caller: &Address, first: Address, second: Address) -> Result<()> {
        self.ensure_admin(caller)?;
        validate_distinct_addresses(&first, &second)?;
        self.fee_address_1 = first;
        self.fee_address_2 = second;
        Ok(())
    }

    /// Current configuration
    pub fn config(&self) -> FeeConfigView {
        FeeConfigView {
            admin: self.admin,
            is_stake_enabled: self.is_stake_enabled,
            stake_contract_address: self.stake_contract_address,
            fee_address_1: self.fee_address_1,
            fee_address_2: self.fee_address_2,
            total_fees_collected: self.total_fees_collected,
        }
    }

    /// Amount credited to an address
    pub fn credited_to(&self, address: &Address) -> u128 {
        self.credited.get(address).copied().unwrap_or(0)
    }

    /// Fees routed so far
    pub fn total_fees_collected(&self) -> u128 {
        self.total_fees_collected
    }

    fn credit(&mut self, address: Address, amount: u128) {
        if amount == 0 {
            return;
        }
        let slot = self.credited.entry(address).or_insert(0);
        *slot = slot.saturating_add(amount);
    }
}

impl FeeRouter for FeeDistributor {
    fn distribute(&mut self, amount: u128) {
        if amount == 0 {
            return;
        }
        self.total_fees_collected = self.total_fees_collected.saturating_add(amount);

        if self.is_stake_enabled {
            self.credit(self.stake_contract_address, amount);
            debug!(amount, "Fees routed to stake contract");
        } else {
            let (first, second) = split_half(amount);
            self.credit(self.fee_address_1, first);
            self.credit(self.fee_address_2, second);
            debug!(first, second, "Fees split between treasury addresses");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn distributor() -> FeeDistributor {
        FeeDistributor::new(Address::derive("admin"), Address::derive("fee-1"), Address::derive("fee-2")).unwrap()
    }

    #[test]
    fn test_split_with_odd_unit_to_second() {
        let mut fees = distributor();
        fees.distribute(101);
        assert_eq!(fees.credited_to(&Address::derive("fee-1")), 50);
        assert_eq!(fees.credited_to(&Address::derive("fee-2")), 51);
        assert_eq!(fees.total_fees_collected(), 101);
    }

    #[test]
    fn test_stake_routing() {
        let mut fees = distributor();
        let admin = Address::derive("admin");
        let stake = Address::derive("stake");
        fees.set_stake_contract_address(&admin, stake).unwrap();
        assert!(fees.toggle_stake_contract(&admin).unwrap());

        fees.distribute(1_000);
        assert_eq!(fees.credited_to(&stake), 1_000);
        assert_eq!(fees.credited_to(&Address::derive("fee-1")), 0);

        assert!(!fees.toggle_stake_contract(&admin).unwrap());
        fees.distribute(10);
        assert_eq!(fees.credited_to(&Address::derive("fee-1")), 5);
    }

    #[test]
    fn test_admin_checks() {
        let mut fees = distributor();
        let mallory = Address::derive("mallory");
        assert!(fees.toggle_stake_contract(&mallory).is_err());
        assert!(fees.set_fee_addresses(&mallory, mallory, Address::derive("x")).is_err());

        let admin = Address::derive("admin");
        let same = Address::derive("same");
        assert!(matches!(
            fees.set_fee_addresses(&admin, same, same),
            Err(Error::InvalidParameter { .. })
        ));
        assert!(FeeDistributor::new(admin, same, same).is_err());
    }

    #[test]
    fn test_zero_amount_is_noop() {
        let mut fees = distributor();
        fees.distribute(0);
        assert_eq!(fees.config().total_fees_collected, 0);
    }
}
