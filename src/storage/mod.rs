//! Storage module for persistent data management.
//!
//! ## Backends
//!
//! - **InMemoryStore**: ephemeral storage for testing
//! - **BinaryStore**: compact bincode file for the CLI
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ausd::storage::{BinaryStore, StateStore};
//!
//! let store = StateStore::new(BinaryStore::open("./ausd-data")?);
//! if let Some(state) = store.load()? {
//!     // ...
//! }
//! ```

pub mod backend;
pub mod state;

pub use backend::*;
pub use state::*;
