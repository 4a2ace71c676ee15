//! # Nitro Engine
//!
//! The event loop that runs a nitro node. An [`Engine`] owns the node's
//! [`Store`](nitro_store::Store) and cranks objectives in response to API
//! requests, adjudicator events and peer messages, one input at a time.
//!
//! Collaborators sit behind traits so nodes can run against real services or
//! the in-memory ones provided here:
//!
//! - [`ChainService`] / [`MockChain`]
//! - [`MessageService`] / [`MessageBroker`]
//! - [`PaymentManager`] / [`VoucherManager`]
//! - [`PolicyMaker`] / [`PermissivePolicy`], [`RejectAllPolicy`]

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod chain;
mod config;
mod engine;
mod error;
mod events;
mod messaging;
mod outbox;
mod payments;
mod policy;

pub use chain::{ChainService, MockChain};
pub use config::{EngineConfig, ErrorPolicy, Escalation};
pub use engine::{Engine, EngineHandle, EngineServices};
pub use error::{ChainError, EngineError, ErrorCategory, MessagingError, PaymentError, Result};
pub use events::{ChannelStatus, EngineEvent, LedgerChannelInfo, PaymentChannelInfo};
pub use messaging::{BrokerClient, MessageBroker, MessageService};
pub use payments::{PaymentManager, VoucherManager};
pub use policy::{PermissivePolicy, PolicyMaker, RejectAllPolicy};
