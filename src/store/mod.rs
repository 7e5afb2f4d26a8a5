//! Persistent agent state
//!
//! A single fjall keyspace under `<app dir>/state` holds:
//! - last-run timestamps of recurring task kinds (cool-down bookkeeping)
//! - per-catalog item records (plugins, mods)
//! - installed versions of the runtime and server binaries

pub mod error;
pub mod keys;
pub mod store;

pub use error::{Result, StoreError};
pub use store::StateStore;
