//! Core modules for the aUSD protocol.
//!
//! This module contains the fundamental building blocks:
//! - Collateral kinds
//! - Positions and the position store
//! - Health index (ICR, TCR)
//! - Sorted registry of open positions
//! - Configuration, admin parameters and global totals
//! - Fee routing

pub mod collateral;
pub mod config;
pub mod fees;
pub mod health;
pub mod position;
pub mod sorted;

pub use collateral::*;
pub use config::*;
pub use fees::*;
pub use health::*;
pub use position::*;
pub use sorted::*;
