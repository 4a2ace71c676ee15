//! Two-party ledger channels updated by leader/follower consensus.
//!
//! The leader (participant 0) is the only party that proposes changes. Each
//! proposal is signed over the state that results from applying it on top of
//! every proposal queued before it, so the leader can pipeline several updates.
//! The follower (participant 1) checks and countersigns proposals strictly in
//! queue order; a countersignature commits everything up to its turn.

mod follower;
mod ledger;
mod leader;
mod proposal;

pub use follower::MAX_TURNS_AHEAD;
pub use ledger::{Balance, Guarantee, LedgerOutcome, SignedVars, Vars};
pub use proposal::{Add, Proposal, ProposalKind, Remove, SignedProposal};

use crate::error::ConsensusError;
use crate::state::{FixedPart, SignedState};
use nitro_crypto::Signature;
use nitro_types::{Address, ChannelId, Funds};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type Result<T> = std::result::Result<T, ConsensusError>;

/// A ledger participant's fixed role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerIndex {
    /// Participant 0; proposes updates.
    Leader,
    /// Participant 1; countersigns updates.
    Follower,
}

impl LedgerIndex {
    /// The participant index of this role.
    pub fn index(self) -> usize {
        match self {
            Self::Leader => 0,
            Self::Follower => 1,
        }
    }
}

/// A two-party ledger channel with a queue of pending proposals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusChannel {
    /// Channel id.
    pub id: ChannelId,
    /// My role.
    pub my_index: LedgerIndex,
    /// Holdings the adjudicator reports for this ledger.
    pub on_chain_funding: Funds,
    fixed_part: FixedPart,
    current: SignedVars,
    proposal_queue: Vec<SignedProposal>,
    #[serde(default)]
    held: BTreeMap<u64, SignedProposal>,
}

impl ConsensusChannel {
    /// Builds the leader's view of a ledger from a fully signed state.
    pub fn new_leader_channel(
        fixed_part: FixedPart,
        turn_num: u64,
        outcome: LedgerOutcome,
        signatures: [Signature; 2],
    ) -> Result<Self> {
        Self::new(fixed_part, turn_num, outcome, signatures, LedgerIndex::Leader)
    }

    /// Builds the follower's view of a ledger from a fully signed state.
    pub fn new_follower_channel(
        fixed_part: FixedPart,
        turn_num: u64,
        outcome: LedgerOutcome,
        signatures: [Signature; 2],
    ) -> Result<Self> {
        Self::new(fixed_part, turn_num, outcome, signatures, LedgerIndex::Follower)
    }

    fn new(
        fixed_part: FixedPart,
        turn_num: u64,
        outcome: LedgerOutcome,
        signatures: [Signature; 2],
        my_index: LedgerIndex,
    ) -> Result<Self> {
        if fixed_part.participants.len() != 2 {
            return Err(ConsensusError::InvalidParticipants(
                fixed_part.participants.len(),
            ));
        }
        let vars = Vars { turn_num, outcome };
        let digest = vars.as_state(&fixed_part).hash();
        for (signature, expected) in signatures.iter().zip(&fixed_part.participants) {
            let got = signature.recover_signer(&digest)?;
            if got != *expected {
                return Err(ConsensusError::WrongSigner {
                    expected: *expected,
                    got,
                });
            }
        }

        Ok(Self {
            id: fixed_part.channel_id(),
            my_index,
            on_chain_funding: Funds::new(),
            fixed_part,
            current: SignedVars { vars, signatures },
            proposal_queue: Vec::new(),
            held: BTreeMap::new(),
        })
    }

    /// The fixed part shared by every ledger state.
    pub fn fixed_part(&self) -> &FixedPart {
        &self.fixed_part
    }

    /// Both participants, leader first.
    pub fn participants(&self) -> &[Address] {
        &self.fixed_part.participants
    }

    /// The leader's address.
    pub fn leader(&self) -> Address {
        self.fixed_part.participants[LedgerIndex::Leader.index()]
    }

    /// The follower's address.
    pub fn follower(&self) -> Address {
        self.fixed_part.participants[LedgerIndex::Follower.index()]
    }

    /// Whether I am the leader.
    pub fn is_leader(&self) -> bool {
        self.my_index == LedgerIndex::Leader
    }

    /// Whether I am the follower.
    pub fn is_follower(&self) -> bool {
        self.my_index == LedgerIndex::Follower
    }

    /// My address.
    pub fn my_address(&self) -> Address {
        self.fixed_part.participants[self.my_index.index()]
    }

    /// The other participant's address.
    pub fn counterparty(&self) -> Address {
        match self.my_index {
            LedgerIndex::Leader => self.follower(),
            LedgerIndex::Follower => self.leader(),
        }
    }

    /// Turn number of the latest state both participants signed.
    pub fn consensus_turn_num(&self) -> u64 {
        self.current.vars.turn_num
    }

    /// The latest vars both participants signed.
    pub fn consensus_vars(&self) -> &Vars {
        &self.current.vars
    }

    /// The latest fully signed state as a [`SignedState`].
    pub fn supported_signed_state(&self) -> SignedState {
        let state = self.current.vars.as_state(&self.fixed_part);
        let sigs = self
            .current
            .signatures
            .iter()
            .copied()
            .enumerate()
            .collect();
        SignedState::with_verified_signatures(state, sigs)
    }

    /// Proposals signed by the leader but not yet committed, in turn order.
    pub fn proposal_queue(&self) -> &[SignedProposal] {
        &self.proposal_queue
    }

    /// Whether the committed outcome funds exactly `guarantee`.
    pub fn includes(&self, guarantee: &Guarantee) -> bool {
        self.current.vars.outcome.includes(guarantee)
    }

    /// Whether the committed outcome funds `target`.
    pub fn includes_target(&self, target: &ChannelId) -> bool {
        self.current.vars.outcome.includes_target(target)
    }

    /// Channels funded by committed guarantees.
    pub fn funding_targets(&self) -> Vec<ChannelId> {
        self.current.vars.outcome.guarantees.keys().copied().collect()
    }

    /// Turn number of the last queued proposal, or of the committed state.
    pub(crate) fn latest_queued_turn(&self) -> u64 {
        self.proposal_queue
            .last()
            .map_or(self.current.vars.turn_num, |p| p.turn_num)
    }

    /// The committed vars with every queued proposal applied.
    pub fn latest_proposed_vars(&self) -> Result<Vars> {
        let mut vars = self.current.vars.clone();
        for queued in &self.proposal_queue {
            vars.handle_proposal(&queued.proposal)?;
        }
        Ok(vars)
    }

    /// Whether `guarantee` is pending: funded by the queue's final state but not yet committed.
    pub fn is_proposed(&self, guarantee: &Guarantee) -> Result<bool> {
        let latest = self.latest_proposed_vars()?;
        Ok(latest.outcome.includes(guarantee) && !self.includes(guarantee))
    }

    /// Whether the head of the queue is the proposal that funds `guarantee`.
    ///
    /// A head whose replayed turn disagrees with its claimed turn is an error.
    pub fn is_proposed_next(&self, guarantee: &Guarantee) -> Result<bool> {
        let Some(head) = self.proposal_queue.first() else {
            return Ok(false);
        };
        let mut vars = self.current.vars.clone();
        vars.handle_proposal(&head.proposal)?;
        if vars.turn_num != head.turn_num {
            return Err(ConsensusError::InvalidTurnNum {
                expected: vars.turn_num,
                got: head.turn_num,
            });
        }
        Ok(vars.outcome.includes(guarantee) && !self.includes(guarantee))
    }

    /// Whether any queued proposal releases the guarantee for `target`.
    pub fn has_removal_been_proposed(&self, target: &ChannelId) -> bool {
        self.proposal_queue
            .iter()
            .any(|p| p.proposal.is_removal_of(target))
    }

    /// Whether the head of the queue releases the guarantee for `target`.
    pub fn has_removal_been_proposed_next(&self, target: &ChannelId) -> bool {
        self.proposal_queue
            .first()
            .is_some_and(|p| p.proposal.is_removal_of(target))
    }

    /// Applies a signed proposal according to my role.
    pub fn receive(&mut self, signed: SignedProposal) -> Result<()> {
        match self.my_index {
            LedgerIndex::Leader => self.leader_receive(signed),
            LedgerIndex::Follower => self.follower_receive(signed),
        }
    }

    fn check_ledger_id(&self, proposal: &Proposal) -> Result<()> {
        if proposal.ledger_id != self.id {
            return Err(ConsensusError::IncorrectChannelId {
                expected: self.id,
                got: proposal.ledger_id,
            });
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn construction_checks_signers() {
        let l = ledger(10, 10);
        let state = l.leader.consensus_vars().as_state(l.leader.fixed_part());
        let swapped = [state.sign(&l.follower_key), state.sign(&l.leader_key)];
        let err = ConsensusChannel::new_leader_channel(
            l.leader.fixed_part().clone(),
            1,
            l.leader.consensus_vars().outcome.clone(),
            swapped,
        )
        .unwrap_err();
        assert!(matches!(err, ConsensusError::WrongSigner { .. }));
    }

    #[test]
    fn supported_signed_state_is_fully_signed() {
        let l = ledger(10, 10);
        let ss = l.follower.supported_signed_state();
        assert!(ss.has_all_signatures());
        assert_eq!(ss.state().channel_id(), l.follower.id);
        assert_eq!(l.follower.counterparty(), l.leader_key.address());
    }

    #[test]
    fn is_proposed_tracks_queue_position() {
        let mut l = ledger(10, 10);
        let first = guarantee(&l, 1, 4);
        let second = guarantee(&l, 2, 4);
        let (p1, p2) = (add(&l, 1, 2, 2), add(&l, 2, 2, 2));
        let sp1 = l.leader.propose(p1, &l.leader_key).unwrap();
        let sp2 = l.leader.propose(p2, &l.leader_key).unwrap();

        assert!(l.leader.is_proposed(&first).unwrap());
        assert!(l.leader.is_proposed(&second).unwrap());
        assert!(l.leader.is_proposed_next(&first).unwrap());
        assert!(!l.leader.is_proposed_next(&second).unwrap());

        l.follower.receive(sp1.clone()).unwrap();
        l.follower.receive(sp2).unwrap();
        let expected = sp1.proposal.clone();
        let countersigned = l.follower.sign_next_proposal(&expected, &l.follower_key).unwrap();
        assert!(l.follower.includes(&first));
        assert!(l.follower.is_proposed_next(&second).unwrap());
        assert!(!l.follower.is_proposed(&first).unwrap());

        l.leader.receive(countersigned).unwrap();
        assert!(l.leader.includes(&first));
        assert_eq!(l.leader.proposal_queue().len(), 1);
    }

    #[test]
    fn is_proposed_next_rejects_turn_mismatch() {
        let mut l = ledger(10, 10);
        let proposal = add(&l, 1, 2, 2);
        let mut sp = l.leader.propose(proposal, &l.leader_key).unwrap();
        sp.turn_num += 5;
        l.leader.proposal_queue[0] = sp;
        assert!(matches!(
            l.leader.is_proposed_next(&guarantee(&l, 1, 4)),
            Err(ConsensusError::InvalidTurnNum { .. })
        ));
    }

    #[test]
    fn removal_predicates() {
        let mut l = ledger(10, 10);
        let proposal = add(&l, 1, 2, 2);
        let sp = l.leader.propose(proposal, &l.leader_key).unwrap();
        l.follower.receive(sp.clone()).unwrap();
        let cs = l.follower.sign_next_proposal(&sp.proposal, &l.follower_key).unwrap();
        l.leader.receive(cs).unwrap();

        let target = guarantee(&l, 1, 4).target;
        assert!(!l.leader.has_removal_been_proposed(&target));
        let remove = Proposal::remove(
            l.leader.id,
            Remove { target, left_amount: 1, right_amount: 3 },
        );
        l.leader.propose(remove, &l.leader_key).unwrap();
        assert!(l.leader.has_removal_been_proposed(&target));
        assert!(l.leader.has_removal_been_proposed_next(&target));
        assert_eq!(l.leader.funding_targets(), vec![target]);
    }
}
