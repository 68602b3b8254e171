//! Redemption of aUSD for collateral at face value.

pub mod engine;

pub use engine::*;
