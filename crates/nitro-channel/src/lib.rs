//! # Nitro Channel
//!
//! Channel states, outcomes and signatures, the [`Channel`] bookkeeping every
//! objective builds on, and the [`ConsensusChannel`](consensus::ConsensusChannel)
//! ledger protocol used to fund virtual channels off chain.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod channel;
pub mod consensus;
mod error;
mod outcome;
mod state;

pub use channel::{Channel, POST_FUND_TURN_NUM, PRE_FUND_TURN_NUM};
pub use consensus::{
    Add, Balance, ConsensusChannel, Guarantee, LedgerIndex, LedgerOutcome, Proposal,
    ProposalKind, Remove, SignedProposal, SignedVars, Vars, MAX_TURNS_AHEAD,
};
pub use error::{ChannelError, ConsensusError, Result};
pub use outcome::{Allocation, AllocationType, Exit, GuaranteeMetadata, SingleAssetExit};
pub use state::{FixedPart, SignedState, State, VariablePart};
