//! # aUSD Protocol
//!
//! Accounting core of a multi-collateral stablecoin: users lock SOL, BTC or
//! ETH in a position and borrow aUSD against it.
//!
//! ## Architecture
//!
//! The protocol consists of several core modules:
//!
//! - **Core**: Collateral kinds, positions, health index, sorted registry,
//!   parameters and fee routing
//! - **Oracle**: Validated price quotes from an external collaborator
//! - **Liquidation**: Batch liquidation, stability pool and redistribution
//! - **Redemption**: aUSD for collateral at face value, riskiest first
//! - **Protocol**: The transactional state machine tying it all together
//! - **Storage**: Per-key persisted layout over pluggable backends
//!
//! Every operation runs on a working copy of the state and is committed
//! whole, so a failed operation leaves no trace.
//!
//! ## Example
//!
//! ```rust,ignore
//! use ausd::prelude::*;
//!
//! let mut machine = ProtocolStateMachine::new(admin, ProtocolParams::default(), feed, FeeSink::default())?;
//! machine.begin_block(1, now)?;
//!
//! let icr = machine.preview_icr(&collateral, loan)?;
//! let hint = machine.find_insert_position(icr, None)?;
//! let result = machine.open_position(&owner, owner, collateral, loan, Some(hint))?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    trivial_casts,
    unused_lifetimes,
    unused_qualifications
)]

pub mod cli;
pub mod core;
pub mod error;
pub mod liquidation;
pub mod oracle;
pub mod protocol;
pub mod redemption;
pub mod storage;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        collateral::CollateralKind,
        config::{GlobalState, ProtocolParams, RedistributionPolicy},
        fees::{FeeDistributor, FeeRouter, FeeSink},
        health::{compute_icr, total_collateral_ratio, HealthView},
        position::{CollateralMap, Position, PositionStatus, PositionStore},
        sorted::{NeighborHint, SortedPositions},
    };
    pub use crate::error::{Error, Result};
    pub use crate::liquidation::{
        engine::{LiquidationOutcome, SkipReason},
        stability_pool::StabilityPool,
    };
    pub use crate::oracle::price_feed::{ManualPriceFeed, OracleConfig, PriceBook, PriceOracle, PriceQuote};
    pub use crate::protocol::{
        events::{EventRecord, ProtocolEvent},
        operations::{OperationResult, ProtocolOperation},
        state::ProtocolState,
        state_machine::ProtocolStateMachine,
    };
    pub use crate::redemption::engine::RedemptionOutcome;
    pub use crate::storage::{
        backend::{BinaryStore, InMemoryStore, StorageBackend},
        state::StateStore,
    };
    pub use crate::utils::{
        constants::{AUSD_UNIT, MICRO_PERCENT},
        crypto::{Address, Hash},
    };
}

/// Protocol version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol name
pub const PROTOCOL_NAME: &str = "aUSD";
