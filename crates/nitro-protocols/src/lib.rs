//! # Nitro Protocols
//!
//! The objectives a node runs to fund and close channels:
//!
//! - [`DirectFundObjective`]: open a ledger channel with on-chain deposits
//! - [`DirectDefundObjective`]: close a ledger channel, cooperatively or by challenge
//! - [`VirtualFundObjective`]: open a virtual channel through ledger guarantees
//! - [`VirtualDefundObjective`]: settle a virtual channel back into its ledgers
//!
//! Objectives are pure state machines. The engine feeds them signed states,
//! ledger proposals and chain events, and executes the [`SideEffects`] each
//! [`crank`](Objective::crank) returns.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod chain;
pub mod directdefund;
pub mod directfund;
mod error;
mod messages;
mod objective;
pub mod virtualdefund;
pub mod virtualfund;
mod voucher;

#[cfg(test)]
mod test_utils;

pub use chain::{ChainEvent, ChainTransaction};
pub use directdefund::{DirectDefundObjective, DirectDefundRequest};
pub use directfund::{DirectFundObjective, DirectFundRequest};
pub use error::{ProtocolError, Result};
pub use messages::{Message, ObjectivePayload};
pub use objective::{
    Objective, ObjectiveId, ObjectiveKind, ObjectiveRequest, ObjectiveStatus, SideEffects,
    WaitingFor,
};
pub use virtualdefund::{VirtualDefundObjective, VirtualDefundRequest};
pub use virtualfund::{Connection, GuaranteeInfo, VirtualFundObjective, VirtualFundRequest};
pub use voucher::Voucher;
