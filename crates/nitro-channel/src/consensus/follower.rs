use super::{ConsensusChannel, Proposal, Result, SignedProposal, SignedVars};
use crate::error::ConsensusError;
use nitro_crypto::SecretKey;

/// How far past the latest queued turn a proposal may be held.
pub const MAX_TURNS_AHEAD: u64 = 64;

impl ConsensusChannel {
    /// Queues a leader proposal after checking it extends the queue and carries the leader's
    /// signature.
    ///
    /// Proposals for turns already queued or committed are ignored. A proposal that skips
    /// ahead by at most [`MAX_TURNS_AHEAD`] is held until the missing turns arrive. If any
    /// proposal fails to queue, the channel is left as it was.
    pub fn follower_receive(&mut self, proposal: SignedProposal) -> Result<()> {
        if !self.is_follower() {
            return Err(ConsensusError::NotFollower);
        }
        self.check_ledger_id(&proposal.proposal)?;

        let latest = self.latest_queued_turn();
        if proposal.turn_num <= latest {
            tracing::debug!(
                ledger = %self.id,
                turn_num = proposal.turn_num,
                "ignoring stale proposal"
            );
            return Ok(());
        }
        if proposal.turn_num > latest.saturating_add(MAX_TURNS_AHEAD) {
            return Err(ConsensusError::ProposalTooFarAhead {
                turn_num: proposal.turn_num,
                latest,
            });
        }
        if proposal.turn_num > latest + 1 {
            tracing::debug!(
                ledger = %self.id,
                turn_num = proposal.turn_num,
                expected = latest + 1,
                "holding out-of-order proposal"
            );
            self.held.insert(proposal.turn_num, proposal);
            return Ok(());
        }

        let queued = self.proposal_queue.len();
        let held = self.held.clone();
        if let Err(e) = self.enqueue_with_held(proposal) {
            self.proposal_queue.truncate(queued);
            self.held = held;
            return Err(e);
        }
        Ok(())
    }

    fn enqueue_with_held(&mut self, proposal: SignedProposal) -> Result<()> {
        self.enqueue_leader_proposal(proposal)?;
        while let Some(next) = self.held.remove(&(self.latest_queued_turn() + 1)) {
            self.enqueue_leader_proposal(next)?;
        }
        let latest = self.latest_queued_turn();
        self.held.retain(|turn, _| *turn > latest);
        Ok(())
    }

    fn enqueue_leader_proposal(&mut self, proposal: SignedProposal) -> Result<()> {
        let mut vars = self.latest_proposed_vars()?;
        vars.handle_proposal(&proposal.proposal)?;
        if vars.turn_num != proposal.turn_num {
            return Err(ConsensusError::InvalidTurnNum {
                expected: vars.turn_num,
                got: proposal.turn_num,
            });
        }
        let leader = self.leader();
        let signer = proposal
            .signature
            .recover_signer(&vars.as_state(&self.fixed_part).hash())?;
        if signer != leader {
            return Err(ConsensusError::WrongSigner {
                expected: leader,
                got: signer,
            });
        }
        self.proposal_queue.push(proposal);
        Ok(())
    }

    /// Countersigns the head of the queue, which must be `expected`, and commits it.
    ///
    /// Returns the countersigned proposal to send back to the leader.
    pub fn sign_next_proposal(
        &mut self,
        expected: &Proposal,
        secret_key: &SecretKey,
    ) -> Result<SignedProposal> {
        if !self.is_follower() {
            return Err(ConsensusError::NotFollower);
        }
        let head = self
            .proposal_queue
            .first()
            .ok_or(ConsensusError::EmptyProposalQueue)?;
        if head.proposal != *expected {
            return Err(ConsensusError::NonMatchingProposal);
        }

        let mut vars = self.current.vars.clone();
        vars.handle_proposal(&head.proposal)?;
        if vars.turn_num != head.turn_num {
            return Err(ConsensusError::InvalidTurnNum {
                expected: vars.turn_num,
                got: head.turn_num,
            });
        }
        let signature = vars.as_state(&self.fixed_part).sign(secret_key);
        let countersigned = SignedProposal {
            proposal: head.proposal.clone(),
            signature,
            turn_num: head.turn_num,
        };

        self.current = SignedVars {
            signatures: [head.signature, signature],
            vars,
        };
        self.proposal_queue.remove(0);
        tracing::debug!(
            ledger = %self.id,
            turn_num = countersigned.turn_num,
            target = %countersigned.proposal.target(),
            "countersigned ledger update"
        );
        Ok(countersigned)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use super::MAX_TURNS_AHEAD;
    use crate::error::ConsensusError;
    use nitro_crypto::SecretKey;
    use pretty_assertions::assert_eq;

    #[test]
    fn leader_cannot_follow() {
        let mut l = ledger(10, 10);
        let proposal = add(&l, 1, 2, 2);
        let sp = l.leader.propose(proposal, &l.leader_key).unwrap();
        assert_eq!(l.leader.follower_receive(sp), Err(ConsensusError::NotFollower));
    }

    #[test]
    fn duplicate_proposals_are_ignored() {
        let mut l = ledger(10, 10);
        let proposal = add(&l, 1, 2, 2);
        let sp = l.leader.propose(proposal, &l.leader_key).unwrap();
        l.follower.receive(sp.clone()).unwrap();
        l.follower.receive(sp).unwrap();
        assert_eq!(l.follower.proposal_queue().len(), 1);
    }

    #[test]
    fn out_of_order_proposals_are_held_until_contiguous() {
        let mut l = ledger(10, 10);
        let (p1, p2, p3) = (add(&l, 1, 1, 1), add(&l, 2, 1, 1), add(&l, 3, 1, 1));
        let sp1 = l.leader.propose(p1, &l.leader_key).unwrap();
        let sp2 = l.leader.propose(p2, &l.leader_key).unwrap();
        let sp3 = l.leader.propose(p3, &l.leader_key).unwrap();

        l.follower.receive(sp3).unwrap();
        l.follower.receive(sp2).unwrap();
        assert!(l.follower.proposal_queue().is_empty());

        l.follower.receive(sp1).unwrap();
        let turns: Vec<u64> = l.follower.proposal_queue().iter().map(|p| p.turn_num).collect();
        let base = l.follower.consensus_turn_num();
        assert_eq!(turns, vec![base + 1, base + 2, base + 3]);
    }

    #[test]
    fn rejects_proposal_not_signed_by_leader() {
        let mut l = ledger(10, 10);
        let proposal = add(&l, 1, 2, 2);
        let mut sp = l.leader.propose(proposal, &l.leader_key).unwrap();
        let intruder = SecretKey::generate();
        let mut vars = l.follower.consensus_vars().clone();
        vars.handle_proposal(&sp.proposal).unwrap();
        sp.signature = vars.as_state(l.follower.fixed_part()).sign(&intruder);

        assert!(matches!(
            l.follower.receive(sp),
            Err(ConsensusError::WrongSigner { .. })
        ));
        assert!(l.follower.proposal_queue().is_empty());
    }

    #[test]
    fn sign_next_requires_matching_head() {
        let mut l = ledger(10, 10);
        let (p1, p2) = (add(&l, 1, 1, 1), add(&l, 2, 1, 1));
        let sp1 = l.leader.propose(p1, &l.leader_key).unwrap();
        let sp2 = l.leader.propose(p2, &l.leader_key).unwrap();

        assert_eq!(
            l.follower.sign_next_proposal(&sp1.proposal, &l.follower_key),
            Err(ConsensusError::EmptyProposalQueue)
        );

        l.follower.receive(sp1.clone()).unwrap();
        l.follower.receive(sp2.clone()).unwrap();
        assert_eq!(
            l.follower.sign_next_proposal(&sp2.proposal, &l.follower_key),
            Err(ConsensusError::NonMatchingProposal)
        );

        let before = l.follower.consensus_turn_num();
        let cs = l
            .follower
            .sign_next_proposal(&sp1.proposal, &l.follower_key)
            .unwrap();
        assert_eq!(cs.turn_num, before + 1);
        assert_eq!(l.follower.consensus_turn_num(), before + 1);
        assert_eq!(l.follower.proposal_queue().len(), 1);
    }

    #[test]
    fn bad_held_proposal_rolls_back_the_whole_drain() {
        let mut l = ledger(10, 10);
        let (p1, p2) = (add(&l, 1, 1, 1), add(&l, 2, 1, 1));
        let sp1 = l.leader.propose(p1, &l.leader_key).unwrap();
        let sp2 = l.leader.propose(p2, &l.leader_key).unwrap();

        let mut forged = sp2.clone();
        let mut vars = l.follower.consensus_vars().clone();
        vars.handle_proposal(&sp1.proposal).unwrap();
        vars.handle_proposal(&sp2.proposal).unwrap();
        forged.signature = vars.as_state(l.follower.fixed_part()).sign(&SecretKey::generate());

        l.follower.receive(forged).unwrap();
        let before = l.follower.clone();
        assert!(matches!(
            l.follower.receive(sp1.clone()),
            Err(ConsensusError::WrongSigner { .. })
        ));
        assert_eq!(l.follower, before);

        // The genuine proposal replaces the forged one and the drain goes through.
        l.follower.receive(sp2).unwrap();
        l.follower.receive(sp1).unwrap();
        assert_eq!(l.follower.proposal_queue().len(), 2);
    }

    #[test]
    fn refuses_to_hold_proposals_too_far_ahead() {
        let mut l = ledger(10, 10);
        let proposal = add(&l, 1, 1, 1);
        let mut sp = l.leader.propose(proposal, &l.leader_key).unwrap();
        let latest = l.follower.consensus_turn_num();
        sp.turn_num = latest + MAX_TURNS_AHEAD + 1;

        assert_eq!(
            l.follower.receive(sp.clone()),
            Err(ConsensusError::ProposalTooFarAhead {
                turn_num: latest + MAX_TURNS_AHEAD + 1,
                latest,
            })
        );
        sp.turn_num = latest + MAX_TURNS_AHEAD;
        l.follower.receive(sp).unwrap();
        assert!(l.follower.proposal_queue().is_empty());
    }
}
