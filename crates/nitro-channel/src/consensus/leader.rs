use super::{ConsensusChannel, Proposal, Result, SignedProposal, SignedVars};
use crate::error::ConsensusError;
use nitro_crypto::SecretKey;

impl ConsensusChannel {
    /// Signs `proposal` on top of every queued proposal and appends it to the queue.
    ///
    /// The returned proposal is what the follower must receive.
    pub fn propose(&mut self, proposal: Proposal, secret_key: &SecretKey) -> Result<SignedProposal> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader);
        }
        self.check_ledger_id(&proposal)?;

        let mut vars = self.latest_proposed_vars()?;
        vars.handle_proposal(&proposal)?;
        let signature = vars.as_state(&self.fixed_part).sign(secret_key);

        let signed = SignedProposal {
            proposal,
            signature,
            turn_num: vars.turn_num,
        };
        tracing::debug!(
            ledger = %self.id,
            turn_num = signed.turn_num,
            target = %signed.proposal.target(),
            "proposed ledger update"
        );
        self.proposal_queue.push(signed.clone());
        Ok(signed)
    }

    /// Commits a follower countersignature.
    ///
    /// Countersignatures for already-committed turns are ignored. Otherwise the queue is
    /// replayed up to the countersigned turn, the signer is checked, and every proposal up to
    /// and including that turn is committed and dequeued.
    pub fn leader_receive(&mut self, countersigned: SignedProposal) -> Result<()> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader);
        }
        self.check_ledger_id(&countersigned.proposal)?;

        if countersigned.turn_num <= self.current.vars.turn_num {
            tracing::debug!(
                ledger = %self.id,
                turn_num = countersigned.turn_num,
                "ignoring stale countersignature"
            );
            return Ok(());
        }

        let mut vars = self.current.vars.clone();
        let mut matched = None;
        for (i, queued) in self.proposal_queue.iter().enumerate() {
            vars.handle_proposal(&queued.proposal)?;
            if vars.turn_num == countersigned.turn_num {
                matched = Some((i, queued));
                break;
            }
        }
        let Some((i, queued)) = matched else {
            return Err(ConsensusError::ProposalQueueExhausted(countersigned.turn_num));
        };
        if queued.proposal != countersigned.proposal {
            return Err(ConsensusError::NonMatchingProposal);
        }
        let follower = self.follower();
        let signer = countersigned
            .signature
            .recover_signer(&vars.as_state(&self.fixed_part).hash())?;
        if signer != follower {
            return Err(ConsensusError::WrongSigner {
                expected: follower,
                got: signer,
            });
        }

        self.current = SignedVars {
            vars,
            signatures: [queued.signature, countersigned.signature],
        };
        self.proposal_queue.drain(..=i);
        tracing::debug!(
            ledger = %self.id,
            turn_num = self.current.vars.turn_num,
            pending = self.proposal_queue.len(),
            "committed ledger update"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_utils::*;
    use crate::error::ConsensusError;
    use nitro_crypto::SecretKey;
    use nitro_types::Destination;
    use pretty_assertions::assert_eq;

    #[test]
    fn follower_cannot_propose() {
        let mut l = ledger(10, 10);
        let proposal = add(&l, 1, 2, 2);
        assert_eq!(
            l.follower.propose(proposal, &l.follower_key),
            Err(ConsensusError::NotLeader)
        );
    }

    #[test]
    fn propose_checks_ledger_id() {
        let mut l = ledger(10, 10);
        let mut proposal = add(&l, 1, 2, 2);
        proposal.ledger_id = Destination::from_bytes([0x55; 32]);
        assert!(matches!(
            l.leader.propose(proposal, &l.leader_key),
            Err(ConsensusError::IncorrectChannelId { .. })
        ));
        assert!(l.leader.proposal_queue().is_empty());
    }

    #[test]
    fn propose_rejects_unaffordable_guarantee() {
        let mut l = ledger(1, 10);
        let proposal = add(&l, 1, 5, 5);
        assert!(matches!(
            l.leader.propose(proposal, &l.leader_key),
            Err(ConsensusError::InsufficientFunds { .. })
        ));
        assert!(l.leader.proposal_queue().is_empty());
    }

    #[test]
    fn pipelined_proposals_take_consecutive_turns() {
        let mut l = ledger(10, 10);
        let turn = l.leader.consensus_turn_num();
        for target in 1..=3 {
            let proposal = add(&l, target, 1, 1);
            let sp = l.leader.propose(proposal, &l.leader_key).unwrap();
            assert_eq!(sp.turn_num, turn + u64::from(target));
        }
        assert_eq!(l.leader.proposal_queue().len(), 3);
    }

    #[test]
    fn countersignature_commits_prefix_of_queue() {
        let mut l = ledger(10, 10);
        let mut signed = Vec::new();
        for target in 1..=3 {
            let proposal = add(&l, target, 1, 1);
            signed.push(l.leader.propose(proposal, &l.leader_key).unwrap());
        }
        for sp in &signed {
            l.follower.receive(sp.clone()).unwrap();
        }
        let first = l
            .follower
            .sign_next_proposal(&signed[0].proposal, &l.follower_key)
            .unwrap();
        let second = l
            .follower
            .sign_next_proposal(&signed[1].proposal, &l.follower_key)
            .unwrap();

        // The later countersignature alone commits both proposals.
        l.leader.receive(second).unwrap();
        assert_eq!(l.leader.consensus_turn_num(), signed[1].turn_num);
        assert_eq!(l.leader.proposal_queue().len(), 1);

        l.leader.receive(first).unwrap();
        assert_eq!(l.leader.consensus_turn_num(), signed[1].turn_num);
        assert_eq!(l.leader.consensus_vars(), l.follower.consensus_vars());
    }

    #[test]
    fn wrong_signer_leaves_leader_untouched() {
        let mut l = ledger(10, 10);
        let proposal = add(&l, 1, 2, 2);
        let sp = l.leader.propose(proposal, &l.leader_key).unwrap();
        let before = l.leader.clone();

        let intruder = SecretKey::generate();
        let mut forged = sp.clone();
        let mut vars = l.leader.consensus_vars().clone();
        vars.handle_proposal(&sp.proposal).unwrap();
        forged.signature = vars.as_state(l.leader.fixed_part()).sign(&intruder);

        assert!(matches!(
            l.leader.receive(forged),
            Err(ConsensusError::WrongSigner { .. })
        ));
        assert_eq!(l.leader, before);
    }

    #[test]
    fn countersignature_beyond_queue_is_exhausted() {
        let mut l = ledger(10, 10);
        let proposal = add(&l, 1, 2, 2);
        let mut sp = l.leader.propose(proposal, &l.leader_key).unwrap();
        sp.turn_num += 3;
        assert_eq!(
            l.leader.receive(sp.clone()),
            Err(ConsensusError::ProposalQueueExhausted(sp.turn_num))
        );
    }
}
