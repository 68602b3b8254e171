//! Liquidation module for the aUSD protocol.
//!
//! This module handles liquidations and the stability pool:
//! - Liquidation engine for undercollateralized positions
//! - Stability pool for absorbing liquidated debt
//! - Redistribution of what the pool cannot absorb

pub mod engine;
pub mod stability_pool;

pub use engine::*;
pub use stability_pool::*;
