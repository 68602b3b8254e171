//! Oracle module for price feeds.
//!
//! The protocol never fetches prices itself. It reads quotes through the
//! `PriceOracle` collaborator and validates each one for sign, freshness
//! and confidence before any health math uses it.

pub mod price_feed;

pub use price_feed::*;
