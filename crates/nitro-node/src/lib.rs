//! # Nitro Node
//!
//! Runs a nitro engine together with in-process peers on a shared mock chain.
//!
//! The node loads [`NodeConfig`] from a YAML file with `NITRO__*` environment
//! overrides, installs logging, starts its own engine plus `local_peers`
//! permissive peers, and optionally opens a ledger channel with each peer.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod local;
pub mod logging;

pub use config::{ConfigError, NodeConfig};
pub use error::{NodeError, Result};
pub use local::{ledger_request, open_ledgers, LocalNetwork, LocalNode};
pub use logging::{init_logging, LogFormat};
