//! Protocol module - Core state machine and orchestration.
//!
//! This module provides the central state machine that runs every aUSD
//! operation atomically against the aggregate protocol state.

pub mod events;
pub mod operations;
pub mod state;
pub mod state_machine;

pub use events::*;
pub use operations::*;
pub use state::*;
pub use state_machine::*;
