//! # Nitro Store
//!
//! Persistence for a node's objectives, channels and ledger channels.
//!
//! The [`Store`] trait is what the engine depends on; [`MemStore`] keeps
//! everything in memory behind read-write locks.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod traits;

pub use error::{Result, StoreError};
pub use memory::MemStore;
pub use traits::Store;
