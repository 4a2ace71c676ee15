//! The objective abstraction shared by every protocol.

use crate::directdefund::{DirectDefundObjective, DirectDefundRequest};
use crate::directfund::{DirectFundObjective, DirectFundRequest};
use crate::error::{ProtocolError, Result};
use crate::virtualdefund::{VirtualDefundObjective, VirtualDefundRequest};
use crate::virtualfund::{VirtualFundObjective, VirtualFundRequest};
use crate::{ChainEvent, ChainTransaction, Message, ObjectivePayload};
use nitro_channel::{Channel, ConsensusChannel, Proposal, ProposalKind, SignedProposal};
use nitro_crypto::SecretKey;
use nitro_types::{Address, ChannelId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The protocol an objective runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectiveKind {
    /// Fund a ledger channel on chain.
    DirectFund,
    /// Close a ledger channel on chain.
    DirectDefund,
    /// Fund a virtual channel through ledger guarantees.
    VirtualFund,
    /// Close a virtual channel and release its guarantees.
    VirtualDefund,
}

impl ObjectiveKind {
    const ALL: [Self; 4] = [
        Self::DirectFund,
        Self::DirectDefund,
        Self::VirtualFund,
        Self::VirtualDefund,
    ];

    /// Parses the protocol from an objective id's prefix.
    pub fn from_id(id: &ObjectiveId) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| id.0.starts_with(kind.prefix()))
            .ok_or_else(|| ProtocolError::UnknownObjectiveId(id.0.clone()))
    }

    /// The id prefix for this protocol.
    pub fn prefix(self) -> &'static str {
        match self {
            Self::DirectFund => "DirectFunding-",
            Self::DirectDefund => "DirectDefunding-",
            Self::VirtualFund => "VirtualFund-",
            Self::VirtualDefund => "VirtualDefund-",
        }
    }
}

impl fmt::Display for ObjectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix().trim_end_matches('-'))
    }
}

/// Identifies an objective: a protocol prefix followed by the channel id it acts on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectiveId(String);

impl ObjectiveId {
    /// The id of the `kind` objective on `channel_id`.
    pub fn new(kind: ObjectiveKind, channel_id: &ChannelId) -> Self {
        Self(format!("{}{}", kind.prefix(), channel_id))
    }

    /// The objective that a ledger proposal serves.
    pub fn for_proposal(proposal: &Proposal) -> Self {
        let kind = match proposal.kind {
            ProposalKind::Add(_) => ObjectiveKind::VirtualFund,
            ProposalKind::Remove(_) => ObjectiveKind::VirtualDefund,
        };
        Self::new(kind, &proposal.target())
    }

    /// The protocol named by the prefix.
    pub fn kind(&self) -> Result<ObjectiveKind> {
        ObjectiveKind::from_id(self)
    }

    /// The id as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ObjectiveId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for ObjectiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of an objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectiveStatus {
    /// Awaiting a policy decision.
    Unapproved,
    /// Being driven to completion.
    Approved,
    /// Declined; will not progress.
    Rejected,
    /// Finished.
    Completed,
}

impl ObjectiveStatus {
    /// Whether the objective can no longer change.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed)
    }
}

/// What a cranked objective is blocked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WaitingFor {
    /// Not blocked; the objective is complete.
    Nothing,
    /// Counterparty prefund signatures.
    CompletePrefund,
    /// Earlier depositors.
    MyTurnToFund,
    /// Deposits or ledger guarantees.
    CompleteFunding,
    /// Counterparty postfund signatures.
    CompletePostFund,
    /// Counterparty final-state signatures.
    CompleteFinal,
    /// The on-chain payout.
    Withdraw,
    /// A registered challenge to time out.
    DisputeFinalization,
    /// Ledgers to release the guarantee.
    CompleteLedgerDefunding,
}

impl fmt::Display for WaitingFor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Work a crank asks the engine to perform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideEffects {
    /// Messages to dispatch.
    pub messages_to_send: Vec<Message>,
    /// Transactions to submit.
    pub transactions_to_submit: Vec<ChainTransaction>,
    /// Ledger proposals to route back to their objectives.
    pub proposals_to_process: Vec<Proposal>,
}

impl SideEffects {
    /// Appends `other`.
    pub fn merge(&mut self, other: SideEffects) {
        self.messages_to_send.extend(other.messages_to_send);
        self.transactions_to_submit
            .extend(other.transactions_to_submit);
        self.proposals_to_process.extend(other.proposals_to_process);
    }

    /// Whether there is nothing to do.
    pub fn is_empty(&self) -> bool {
        self.messages_to_send.is_empty()
            && self.transactions_to_submit.is_empty()
            && self.proposals_to_process.is_empty()
    }
}

/// An API request for a new objective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectiveRequest {
    /// Fund a ledger channel.
    DirectFund(DirectFundRequest),
    /// Close a ledger channel.
    DirectDefund(DirectDefundRequest),
    /// Fund a virtual channel.
    VirtualFund(VirtualFundRequest),
    /// Close a virtual channel.
    VirtualDefund(VirtualDefundRequest),
}

impl ObjectiveRequest {
    /// The id of the objective the request will create for `my_address`.
    pub fn id(&self, my_address: Address) -> ObjectiveId {
        match self {
            Self::DirectFund(r) => r.id(my_address),
            Self::DirectDefund(r) => r.id(),
            Self::VirtualFund(r) => r.id(my_address),
            Self::VirtualDefund(r) => r.id(),
        }
    }
}

/// A running protocol instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Objective {
    /// See [`DirectFundObjective`].
    DirectFund(DirectFundObjective),
    /// See [`DirectDefundObjective`].
    DirectDefund(DirectDefundObjective),
    /// See [`VirtualFundObjective`].
    VirtualFund(VirtualFundObjective),
    /// See [`VirtualDefundObjective`].
    VirtualDefund(VirtualDefundObjective),
}

macro_rules! dispatch {
    ($self:expr, $o:ident => $body:expr) => {
        match $self {
            Objective::DirectFund($o) => $body,
            Objective::DirectDefund($o) => $body,
            Objective::VirtualFund($o) => $body,
            Objective::VirtualDefund($o) => $body,
        }
    };
}

impl Objective {
    /// The objective's id.
    pub fn id(&self) -> ObjectiveId {
        dispatch!(self, o => o.id())
    }

    /// The protocol the objective runs.
    pub fn kind(&self) -> ObjectiveKind {
        match self {
            Self::DirectFund(_) => ObjectiveKind::DirectFund,
            Self::DirectDefund(_) => ObjectiveKind::DirectDefund,
            Self::VirtualFund(_) => ObjectiveKind::VirtualFund,
            Self::VirtualDefund(_) => ObjectiveKind::VirtualDefund,
        }
    }

    /// Current status.
    pub fn status(&self) -> ObjectiveStatus {
        dispatch!(self, o => o.status())
    }

    /// Marks an unapproved objective approved.
    pub fn approve(&mut self) {
        dispatch!(self, o => o.approve())
    }

    /// Marks the objective rejected and returns the notices for its counterparties.
    pub fn reject(&mut self) -> SideEffects {
        dispatch!(self, o => o.reject())
    }

    /// Folds a counterparty's signed state into the objective.
    pub fn update(&mut self, payload: &ObjectivePayload) -> Result<()> {
        dispatch!(self, o => o.update(payload))
    }

    /// Folds an adjudicator event into the objective.
    pub fn update_with_chain_event(&mut self, event: &ChainEvent) -> Result<()> {
        dispatch!(self, o => o.update_with_chain_event(event))
    }

    /// Applies a ledger proposal to one of the objective's ledgers.
    pub fn receive_proposal(&mut self, proposal: SignedProposal) -> Result<()> {
        match self {
            Self::VirtualFund(o) => o.receive_proposal(proposal),
            Self::VirtualDefund(o) => o.receive_proposal(proposal),
            Self::DirectFund(_) | Self::DirectDefund(_) => {
                Err(ProtocolError::LedgerOutOfScope(proposal.proposal.ledger_id))
            }
        }
    }

    /// Advances the objective as far as it can go and reports what it is waiting for.
    pub fn crank(&mut self, secret_key: &SecretKey) -> Result<(SideEffects, WaitingFor)> {
        dispatch!(self, o => o.crank(secret_key))
    }

    /// The channel the objective owns.
    pub fn owned_channel(&self) -> &Channel {
        dispatch!(self, o => o.channel())
    }

    /// Ledgers the objective reads or updates, other than the owned channel.
    pub fn ledgers(&self) -> Vec<&ConsensusChannel> {
        match self {
            Self::VirtualFund(o) => o.ledgers(),
            Self::VirtualDefund(o) => o.ledgers(),
            Self::DirectFund(_) | Self::DirectDefund(_) => Vec::new(),
        }
    }

    /// Replaces the objective's copy of `ledger` with a fresher one, if it holds that ledger.
    pub fn refresh_ledger(&mut self, ledger: &ConsensusChannel) {
        match self {
            Self::VirtualFund(o) => o.refresh_ledger(ledger),
            Self::VirtualDefund(o) => o.refresh_ledger(ledger),
            Self::DirectFund(_) | Self::DirectDefund(_) => {}
        }
    }
}

/// Shared status bookkeeping for the concrete objectives.
pub(crate) fn approve(status: &mut ObjectiveStatus) {
    if *status == ObjectiveStatus::Unapproved {
        *status = ObjectiveStatus::Approved;
    }
}

pub(crate) fn reject(status: &mut ObjectiveStatus, id: &ObjectiveId, channel: &Channel) -> SideEffects {
    if status.is_terminal() {
        return SideEffects::default();
    }
    *status = ObjectiveStatus::Rejected;
    SideEffects {
        messages_to_send: Message::rejection_notices(
            id,
            channel.my_address(),
            &channel.counterparties(),
        ),
        ..SideEffects::default()
    }
}

pub(crate) fn ensure_approved(status: ObjectiveStatus, id: &ObjectiveId) -> Result<()> {
    if status != ObjectiveStatus::Approved {
        return Err(ProtocolError::NotApproved(id.clone()));
    }
    Ok(())
}

pub(crate) fn check_payload_id(expected: ObjectiveId, payload: &ObjectivePayload) -> Result<()> {
    if payload.objective_id != expected {
        return Err(ProtocolError::ObjectiveIdMismatch {
            expected,
            got: payload.objective_id.clone(),
        });
    }
    Ok(())
}
