//! Utility modules for the aUSD protocol.
//!
//! This module contains shared utilities used across the protocol:
//! - Identifiers and hashing
//! - Checked fixed-point arithmetic
//! - Validation helpers
//! - Constants

pub mod constants;
pub mod crypto;
pub mod math;
pub mod validation;

pub use constants::*;
pub use crypto::*;
pub use math::*;
pub use validation::*;
