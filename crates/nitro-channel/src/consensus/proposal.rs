//! Ledger update proposals.

use super::ledger::Guarantee;
use nitro_crypto::Signature;
use nitro_types::{Amount, ChannelId};
use serde::{Deserialize, Serialize};

/// Locks a new guarantee, funded by `left_deposit` from the guarantee's left party and
/// `right_deposit` from its right party.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Add {
    /// The guarantee to insert.
    pub guarantee: Guarantee,
    /// Deducted from the left party's balance.
    pub left_deposit: Amount,
    /// Deducted from the right party's balance.
    pub right_deposit: Amount,
}

/// Releases a guarantee, paying `left_amount` to its left party and `right_amount` to its right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remove {
    /// The channel whose guarantee is released.
    pub target: ChannelId,
    /// Credited to the left party.
    pub left_amount: Amount,
    /// Credited to the right party.
    pub right_amount: Amount,
}

/// The change a proposal makes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProposalKind {
    /// Insert a guarantee.
    Add(Add),
    /// Release a guarantee.
    Remove(Remove),
}

/// A change to a specific ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// The ledger the change applies to.
    pub ledger_id: ChannelId,
    /// The change.
    pub kind: ProposalKind,
}

impl Proposal {
    /// An Add proposal.
    pub fn add(ledger_id: ChannelId, add: Add) -> Self {
        Self {
            ledger_id,
            kind: ProposalKind::Add(add),
        }
    }

    /// A Remove proposal.
    pub fn remove(ledger_id: ChannelId, remove: Remove) -> Self {
        Self {
            ledger_id,
            kind: ProposalKind::Remove(remove),
        }
    }

    /// The channel the proposal funds or defunds.
    pub fn target(&self) -> ChannelId {
        match &self.kind {
            ProposalKind::Add(add) => add.guarantee.target,
            ProposalKind::Remove(remove) => remove.target,
        }
    }

    /// Whether this proposal releases the guarantee for `target`.
    pub fn is_removal_of(&self, target: &ChannelId) -> bool {
        matches!(&self.kind, ProposalKind::Remove(r) if r.target == *target)
    }
}

/// A proposal with the signature of one participant over the ledger state it produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedProposal {
    /// The proposal.
    pub proposal: Proposal,
    /// Signature over the resulting state.
    pub signature: Signature,
    /// Turn number of the resulting state.
    pub turn_num: u64,
}
