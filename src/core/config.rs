//! Protocol configuration and global accounting.
//!
//! - `ProtocolParams`: admin-tunable parameters with defaults from constants
//! - `RedistributionPolicy`: how liquidation remainders are spread
//! - `DebtLedger`: cumulative debt flows backing the conservation invariant
//! - `GlobalState`: admin, parameters and system totals

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::info;

use crate::core::collateral::CollateralKind;
use crate::core::position::CollateralMap;
use crate::error::{Error, Result};
use crate::oracle::price_feed::OracleConfig;
use crate::utils::constants::*;
use crate::utils::crypto::Address;
use crate::utils::math::*;
use crate::utils::validation::*;

// ═══════════════════════════════════════════════════════════════════════════════
// REDISTRIBUTION POLICY
// ═══════════════════════════════════════════════════════════════════════════════

/// Weighting used to spread debt and collateral the pool cannot absorb
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RedistributionPolicy {
    /// Weight by collateral USD value
    #[default]
    CollateralShare,
    /// Weight by outstanding debt
    DebtShare,
}

impl fmt::Display for RedistributionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RedistributionPolicy::CollateralShare => f.write_str("collateral_share"),
            RedistributionPolicy::DebtShare => f.write_str("debt_share"),
        }
    }
}

impl std::str::FromStr for RedistributionPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "collateral_share" | "collateral" => Ok(RedistributionPolicy::CollateralShare),
            "debt_share" | "debt" => Ok(RedistributionPolicy::DebtShare),
            other => Err(Error::InvalidParameter {
                name: "redistribution_policy".into(),
                reason: format!("unknown policy '{}'", other),
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL PARAMETERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Admin-tunable protocol parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolParams {
    /// Protocol version
    pub version: String,

    /// Minimum collateralization ratio (MCR) in micro-percent.
    /// Below this, positions can be liquidated and are never redeemed against.
    pub minimum_collateral_ratio: u64,

    /// Fee skimmed from loans and redemptions, in basis points
    pub protocol_fee_bps: u64,

    /// Smallest debt an open position may carry
    pub minimum_loan_amount: u128,

    /// Most targets accepted by one liquidation call
    pub max_liquidation_batch: usize,

    /// Weighting for liquidation redistribution
    pub redistribution_policy: RedistributionPolicy,

    /// Oracle acceptance policy
    pub oracle: OracleConfig,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            minimum_collateral_ratio: DEFAULT_MINIMUM_COLLATERAL_RATIO,
            protocol_fee_bps: DEFAULT_PROTOCOL_FEE_BPS,
            minimum_loan_amount: MINIMUM_LOAN_AMOUNT,
            max_liquidation_batch: MAX_LIQUIDATION_BATCH_SIZE,
            redistribution_policy: RedistributionPolicy::default(),
            oracle: OracleConfig::default(),
        }
    }
}

impl ProtocolParams {
    /// Override the MCR
    pub fn with_mcr(mut self, mcr: u64) -> Self {
        self.minimum_collateral_ratio = mcr;
        self
    }

    /// Override the protocol fee
    pub fn with_fee(mut self, fee_bps: u64) -> Self {
        self.protocol_fee_bps = fee_bps;
        self
    }

    /// Override the redistribution policy
    pub fn with_policy(mut self, policy: RedistributionPolicy) -> Self {
        self.redistribution_policy = policy;
        self
    }

    /// Override the oracle policy
    pub fn with_oracle(mut self, oracle: OracleConfig) -> Self {
        self.oracle = oracle;
        self
    }

    /// Validate parameters are consistent
    pub fn validate(&self) -> Result<()> {
        validate_mcr(self.minimum_collateral_ratio)?;
        validate_fee_bps(self.protocol_fee_bps)?;
        validate_non_zero(self.minimum_loan_amount)?;
        if self.max_liquidation_batch == 0 || self.max_liquidation_batch > MAX_LIQUIDATION_BATCH_SIZE {
            return Err(Error::InvalidParameter {
                name: "max_liquidation_batch".into(),
                reason: format!("must be within 1..={}", MAX_LIQUIDATION_BATCH_SIZE),
            });
        }
        self.oracle.validate()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// DEBT LEDGER
// ═══════════════════════════════════════════════════════════════════════════════

/// Cumulative debt flows. `outstanding()` must always equal the sum of
/// open position debt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebtLedger {
    /// Debt ever issued by borrowing
    pub issued: u128,
    /// Debt repaid by borrowers
    pub repaid: u128,
    /// Debt cancelled by redemptions
    pub redeemed: u128,
    /// Debt cancelled against stability pool deposits
    pub absorbed_by_pool: u128,
}

impl DebtLedger {
    /// Debt still outstanding
    pub fn outstanding(&self) -> Result<u128> {
        let cancelled = safe_add(safe_add(self.repaid, self.redeemed)?, self.absorbed_by_pool)?;
        safe_sub(self.issued, cancelled)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GLOBAL STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Admin, parameters and system totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    /// Account allowed to change parameters
    pub admin: Address,
    /// Current parameters
    pub params: ProtocolParams,
    /// Sum of open position debt
    pub total_debt: u128,
    /// Sum of open position collateral per kind
    pub total_collateral: CollateralMap,
    /// Cumulative debt flows
    pub ledger: DebtLedger,
}

impl GlobalState {
    /// Create with validated parameters
    pub fn new(admin: Address, params: ProtocolParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            admin,
            params,
            total_debt: 0,
            total_collateral: CollateralMap::new(),
            ledger: DebtLedger::default(),
        })
    }

    /// Total collateral of one kind
    pub fn collateral_of(&self, kind: CollateralKind) -> u128 {
        self.total_collateral.get(&kind).copied().unwrap_or(0)
    }

    fn ensure_admin(&self, caller: &Address) -> Result<()> {
        if caller != &self.admin {
            return Err(Error::Unauthorized(format!("{} is not the protocol admin", caller.short())));
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // ADMIN SETTERS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Change the MCR
    pub fn set_minimum_collateral_ratio(&mut self, caller: &Address, mcr: u64) -> Result<()> {
        self.ensure_admin(caller)?;
        validate_mcr(mcr)?;
        info!(old = self.params.minimum_collateral_ratio, new = mcr, "MCR updated");
        self.params.minimum_collateral_ratio = mcr;
        Ok(())
    }

    /// Change the protocol fee
    pub fn set_protocol_fee(&mut self, caller: &Address, fee_bps: u64) -> Result<()> {
        self.ensure_admin(caller)?;
        validate_fee_bps(fee_bps)?;
        info!(old = self.params.protocol_fee_bps, new = fee_bps, "Protocol fee updated");
        self.params.protocol_fee_bps = fee_bps;
        Ok(())
    }

    /// Change the redistribution policy
    pub fn set_redistribution_policy(&mut self, caller: &Address, policy: RedistributionPolicy) -> Result<()> {
        self.ensure_admin(caller)?;
        info!(%policy, "Redistribution policy updated");
        self.params.redistribution_policy = policy;
        Ok(())
    }

    /// Change the oracle acceptance policy
    pub fn set_oracle_config(&mut self, caller: &Address, oracle: OracleConfig) -> Result<()> {
        self.ensure_admin(caller)?;
        oracle.validate()?;
        self.params.oracle = oracle;
        Ok(())
    }

    /// Hand the admin role to another account
    pub fn transfer_admin(&mut self, caller: &Address, new_admin: Address) -> Result<()> {
        self.ensure_admin(caller)?;
        info!(from = %self.admin.short(), to = %new_admin.short(), "Admin transferred");
        self.admin = new_admin;
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // TOTALS
    // ═══════════════════════════════════════════════════════════════════════════

    /// Add collateral to the system total
    pub fn add_collateral(&mut self, kind: CollateralKind, amount: u128) -> Result<()> {
        let entry = self.total_collateral.entry(kind).or_insert(0);
        *entry = safe_add(*entry, amount)?;
        Ok(())
    }

    /// Remove collateral from the system total
    pub fn remove_collateral(&mut self, kind: CollateralKind, amount: u128) -> Result<()> {
        let entry = self.total_collateral.entry(kind).or_insert(0);
        *entry = safe_sub(*entry, amount)?;
        if *entry == 0 {
            self.total_collateral.remove(&kind);
        }
        Ok(())
    }

    /// Record newly issued debt
    pub fn record_issued(&mut self, amount: u128) -> Result<()> {
        self.total_debt = safe_add(self.total_debt, amount)?;
        self.ledger.issued = safe_add(self.ledger.issued, amount)?;
        Ok(())
    }

    /// Record repaid debt
    pub fn record_repaid(&mut self, amount: u128) -> Result<()> {
        self.total_debt = safe_sub(self.total_debt, amount)?;
        self.ledger.repaid = safe_add(self.ledger.repaid, amount)?;
        Ok(())
    }

    /// Record debt cancelled by redemption
    pub fn record_redeemed(&mut self, amount: u128) -> Result<()> {
        self.total_debt = safe_sub(self.total_debt, amount)?;
        self.ledger.redeemed = safe_add(self.ledger.redeemed, amount)?;
        Ok(())
    }

    /// Record debt absorbed by the stability pool
    pub fn record_absorbed(&mut self, amount: u128) -> Result<()> {
        self.total_debt = safe_sub(self.total_debt, amount)?;
        self.ledger.absorbed_by_pool = safe_add(self.ledger.absorbed_by_pool, amount)?;
        Ok(())
    }

    /// Summary for display
    pub fn summary(&self) -> String {
        format!(
            "Debt: {} | MCR: {}% | Fee: {} bps | Policy: {}",
            self.total_debt,
            self.params.minimum_collateral_ratio / MICRO_PERCENT,
            self.params.protocol_fee_bps,
            self.params.redistribution_policy
        )
    }
}
