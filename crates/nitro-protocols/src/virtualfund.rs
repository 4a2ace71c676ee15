//! Funding a virtual channel through a chain of ledger channels.
//!
//! Every hop between neighbouring participants locks a guarantee for the
//! virtual channel in its ledger. Once every hop the objective touches
//! includes its guarantee, the participants exchange postfund signatures.

use crate::error::{ProtocolError, Result};
use crate::objective::{self, ObjectiveId, ObjectiveKind, ObjectiveStatus, SideEffects, WaitingFor};
use crate::{ChainEvent, Message, ObjectivePayload};
use nitro_channel::{
    Add, AllocationType, Channel, ConsensusChannel, ConsensusError, Exit, FixedPart, Guarantee,
    Proposal, SignedProposal, State, VariablePart, PRE_FUND_TURN_NUM,
};
use nitro_crypto::SecretKey;
use nitro_types::{Address, Amount, ChannelId, Destination};
use serde::{Deserialize, Serialize};

/// Parameters for opening a virtual channel to `counterparty` through `intermediaries`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFundRequest {
    /// Hops between me and the counterparty, in order.
    pub intermediaries: Vec<Address>,
    /// The payee.
    pub counterparty: Address,
    /// Challenge window in seconds.
    pub challenge_duration: u32,
    /// Initial outcome: payer allocation then payee allocation.
    pub outcome: Exit,
    /// Channel nonce.
    pub nonce: u64,
    /// Application contract.
    pub app_definition: Address,
}

impl VirtualFundRequest {
    /// The unsigned prefund state, with me as the payer.
    pub fn prefund_state(&self, my_address: Address) -> State {
        let mut participants = Vec::with_capacity(self.intermediaries.len() + 2);
        participants.push(my_address);
        participants.extend_from_slice(&self.intermediaries);
        participants.push(self.counterparty);
        State::new(
            FixedPart {
                participants,
                channel_nonce: self.nonce,
                app_definition: self.app_definition,
                challenge_duration: self.challenge_duration,
            },
            VariablePart {
                app_data: Vec::new(),
                outcome: self.outcome.clone(),
                turn_num: PRE_FUND_TURN_NUM,
                is_final: false,
            },
        )
    }

    /// The id of the objective this request creates.
    pub fn id(&self, my_address: Address) -> ObjectiveId {
        ObjectiveId::new(
            ObjectiveKind::VirtualFund,
            &self.prefund_state(my_address).channel_id(),
        )
    }
}

/// The guarantee one hop must lock for the virtual channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuaranteeInfo {
    /// The hop participant nearer the payer.
    pub left: Destination,
    /// The hop participant nearer the payee.
    pub right: Destination,
    /// Deposit from the left party: the payer's allocation.
    pub left_amount: Amount,
    /// Deposit from the right party: the payee's allocation.
    pub right_amount: Amount,
    /// The virtual channel.
    pub target: ChannelId,
}

/// A ledger to a neighbour together with the guarantee it must hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    /// My copy of the ledger.
    pub channel: ConsensusChannel,
    /// The guarantee to lock.
    pub guarantee_info: GuaranteeInfo,
}

impl Connection {
    /// The guarantee the ledger must include.
    pub fn expected_guarantee(&self) -> Guarantee {
        let info = &self.guarantee_info;
        Guarantee {
            amount: info.left_amount + info.right_amount,
            target: info.target,
            left: info.left,
            right: info.right,
        }
    }

    /// The Add proposal that locks the guarantee.
    pub fn expected_proposal(&self) -> Proposal {
        Proposal::add(
            self.channel.id,
            Add {
                guarantee: self.expected_guarantee(),
                left_deposit: self.guarantee_info.left_amount,
                right_deposit: self.guarantee_info.right_amount,
            },
        )
    }

    /// Whether the committed ledger state includes the guarantee.
    pub fn is_funding_the_target(&self) -> bool {
        self.channel.includes(&self.expected_guarantee())
    }

    /// Proposes or countersigns the guarantee, depending on my role in the ledger.
    fn fund_target(&mut self, secret_key: &SecretKey) -> Result<SideEffects> {
        let guarantee = self.expected_guarantee();
        let proposal = self.expected_proposal();
        let ledger = &mut self.channel;
        let mut effects = SideEffects::default();

        if ledger.is_leader() {
            if !ledger.is_proposed(&guarantee)? {
                let signed = ledger.propose(proposal, secret_key)?;
                effects.messages_to_send.push(Message::for_proposal(
                    ledger.my_address(),
                    ledger.counterparty(),
                    signed,
                ));
            }
        } else if ledger.is_proposed_next(&guarantee)? {
            let countersigned = ledger.sign_next_proposal(&proposal, secret_key)?;
            effects.messages_to_send.push(Message::for_proposal(
                ledger.my_address(),
                ledger.counterparty(),
                countersigned,
            ));
            if let Some(next) = ledger.proposal_queue().first() {
                effects.proposals_to_process.push(next.proposal.clone());
            }
        }
        Ok(effects)
    }
}

/// The payer's asset and the payer and payee allocations of a virtual channel outcome.
pub(crate) fn split_outcome(
    outcome: &Exit,
    participants: &[Address],
) -> Result<(Address, Amount, Amount)> {
    let [single] = outcome.0.as_slice() else {
        return Err(ProtocolError::UnsupportedOutcome(format!(
            "a virtual channel holds exactly one asset, got {}",
            outcome.len()
        )));
    };
    let [payer, payee] = single.allocations.as_slice() else {
        return Err(ProtocolError::UnsupportedOutcome(
            "a virtual channel outcome has exactly two allocations".into(),
        ));
    };
    let (Some(first), Some(last)) = (participants.first(), participants.last()) else {
        return Err(ProtocolError::UnsupportedOutcome(
            "a virtual channel has no participants".into(),
        ));
    };
    if payer.allocation_type != AllocationType::Simple
        || payee.allocation_type != AllocationType::Simple
        || payer.destination != Destination::from_address(*first)
        || payee.destination != Destination::from_address(*last)
    {
        return Err(ProtocolError::UnsupportedOutcome(
            "allocations must pay the first and last participants".into(),
        ));
    }
    if payer.amount.checked_add(payee.amount).is_none() {
        return Err(ProtocolError::UnsupportedOutcome("allocation total overflows".into()));
    }
    Ok((single.asset, payer.amount, payee.amount))
}

/// Funds a virtual channel from my neighbouring ledgers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualFundObjective {
    status: ObjectiveStatus,
    channel: Channel,
    to_my_left: Option<Connection>,
    to_my_right: Option<Connection>,
    my_role: usize,
    a0: Amount,
    b0: Amount,
}

impl VirtualFundObjective {
    /// Creates the objective from a prefund state and my ledgers to the neighbouring hops.
    pub fn new(
        pre_approve: bool,
        prefund: State,
        my_address: Address,
        left_ledger: Option<ConsensusChannel>,
        right_ledger: Option<ConsensusChannel>,
    ) -> Result<Self> {
        if prefund.is_final {
            return Err(ProtocolError::FinalInitialState);
        }
        let my_role = prefund
            .participants
            .iter()
            .position(|p| *p == my_address)
            .ok_or(ProtocolError::NotParticipant(my_address))?;
        let channel = Channel::new(prefund.clone(), my_role)?;
        let participants = channel.participants();
        let (asset, a0, b0) = split_outcome(&prefund.outcome, participants)?;

        let hop = |ledger: Option<ConsensusChannel>, left: usize, neighbour: usize| {
            Self::connect(
                ledger,
                participants[neighbour],
                GuaranteeInfo {
                    left: Destination::from_address(participants[left]),
                    right: Destination::from_address(participants[left + 1]),
                    left_amount: a0,
                    right_amount: b0,
                    target: channel.id,
                },
                asset,
            )
        };
        let to_my_left = match my_role {
            0 => None,
            _ => Some(hop(left_ledger, my_role - 1, my_role - 1)?),
        };
        let to_my_right = if my_role + 1 < participants.len() {
            Some(hop(right_ledger, my_role, my_role + 1)?)
        } else {
            None
        };

        Ok(Self {
            status: if pre_approve {
                ObjectiveStatus::Approved
            } else {
                ObjectiveStatus::Unapproved
            },
            channel,
            to_my_left,
            to_my_right,
            my_role,
            a0,
            b0,
        })
    }

    fn connect(
        ledger: Option<ConsensusChannel>,
        neighbour: Address,
        guarantee_info: GuaranteeInfo,
        asset: Address,
    ) -> Result<Connection> {
        let ledger = ledger.ok_or(ProtocolError::MissingLedger(neighbour))?;
        if !ledger.participants().contains(&neighbour) {
            return Err(ProtocolError::MissingLedger(neighbour));
        }
        if ledger.consensus_vars().outcome.asset != asset {
            return Err(ProtocolError::UnsupportedOutcome(format!(
                "ledger {} holds a different asset",
                ledger.id
            )));
        }
        let connection = Connection {
            channel: ledger,
            guarantee_info,
        };
        if !connection.is_funding_the_target() {
            let mut vars = connection.channel.latest_proposed_vars()?;
            match vars.handle_proposal(&connection.expected_proposal()) {
                Ok(()) | Err(ConsensusError::DuplicateGuarantee(_)) => {}
                Err(ConsensusError::InsufficientFunds { .. }) => {
                    return Err(ProtocolError::InsufficientLedgerFunds {
                        ledger: connection.channel.id,
                        target: guarantee_info.target,
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(connection)
    }

    /// Creates an approved objective for the payer from an API request.
    pub fn from_request(
        request: &VirtualFundRequest,
        my_address: Address,
        ledger_with: impl Fn(&Address) -> Option<ConsensusChannel>,
    ) -> Result<Self> {
        let prefund = request.prefund_state(my_address);
        let right = prefund.participants.get(1).and_then(&ledger_with);
        Self::new(true, prefund, my_address, None, right)
    }

    /// Creates an unapproved objective from the payer's first message.
    pub fn from_payload(
        payload: &ObjectivePayload,
        my_address: Address,
        ledger_with: impl Fn(&Address) -> Option<ConsensusChannel>,
    ) -> Result<Self> {
        let prefund = payload.signed_state.state().clone();
        let participants = &prefund.participants;
        let my_role = participants
            .iter()
            .position(|p| *p == my_address)
            .ok_or(ProtocolError::NotParticipant(my_address))?;
        let left = my_role
            .checked_sub(1)
            .and_then(|i| participants.get(i))
            .and_then(&ledger_with);
        let right = participants.get(my_role + 1).and_then(&ledger_with);

        let mut objective = Self::new(false, prefund, my_address, left, right)?;
        objective.update(payload)?;
        Ok(objective)
    }

    /// The objective's id.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::VirtualFund, &self.channel.id)
    }

    /// Current status.
    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    /// The virtual channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// My position in the participant list.
    pub fn my_role(&self) -> usize {
        self.my_role
    }

    /// Whether I am the payer.
    pub fn is_payer(&self) -> bool {
        self.my_role == 0
    }

    /// Whether I am the payee.
    pub fn is_payee(&self) -> bool {
        self.my_role + 1 == self.channel.participants().len()
    }

    /// The payer's address.
    pub fn payer(&self) -> Address {
        self.channel.participants()[0]
    }

    /// The payee's address.
    pub fn payee(&self) -> Address {
        let participants = self.channel.participants();
        participants[participants.len() - 1]
    }

    /// The payer's initial allocation: the most that can be paid through the channel.
    pub fn payer_balance(&self) -> Amount {
        self.a0
    }

    /// The payee's initial allocation.
    pub fn payee_balance(&self) -> Amount {
        self.b0
    }

    pub(crate) fn approve(&mut self) {
        objective::approve(&mut self.status);
    }

    pub(crate) fn reject(&mut self) -> SideEffects {
        let id = self.id();
        objective::reject(&mut self.status, &id, &self.channel)
    }

    /// Merges signatures on the virtual channel's prefund or postfund state.
    pub fn update(&mut self, payload: &ObjectivePayload) -> Result<()> {
        objective::check_payload_id(self.id(), payload)?;
        if payload.signed_state.state().channel_id() != self.channel.id {
            return Err(ProtocolError::EventOutOfScope);
        }
        self.channel.add_signed_state(&payload.signed_state)?;
        Ok(())
    }

    /// Virtual channels are never on chain; events for them carry no information.
    pub fn update_with_chain_event(&mut self, event: &ChainEvent) -> Result<()> {
        if event.channel_id() != self.channel.id {
            return Err(ProtocolError::EventOutOfScope);
        }
        Ok(())
    }

    /// Applies a proposal or countersignature to the matching neighbour ledger.
    pub fn receive_proposal(&mut self, signed: SignedProposal) -> Result<()> {
        let ledger_id = signed.proposal.ledger_id;
        for connection in [self.to_my_left.as_mut(), self.to_my_right.as_mut()]
            .into_iter()
            .flatten()
        {
            if connection.channel.id == ledger_id {
                connection.channel.receive(signed)?;
                return Ok(());
            }
        }
        Err(ProtocolError::LedgerOutOfScope(ledger_id))
    }

    /// My neighbour ledgers.
    pub fn ledgers(&self) -> Vec<&ConsensusChannel> {
        self.to_my_left
            .iter()
            .chain(self.to_my_right.iter())
            .map(|c| &c.channel)
            .collect()
    }

    /// Replaces my copy of `ledger` if it is one of my neighbour ledgers.
    pub fn refresh_ledger(&mut self, ledger: &ConsensusChannel) {
        for connection in [self.to_my_left.as_mut(), self.to_my_right.as_mut()]
            .into_iter()
            .flatten()
        {
            if connection.channel.id == ledger.id {
                connection.channel = ledger.clone();
            }
        }
    }

    fn funding_complete(&self) -> bool {
        self.to_my_left
            .iter()
            .chain(self.to_my_right.iter())
            .all(Connection::is_funding_the_target)
    }

    /// Drives prefund, guarantee and postfund phases.
    ///
    /// The right hop is only funded once the left hop is, so an intermediary never
    /// locks funds toward the payee before the payer's side is secured.
    pub fn crank(&mut self, secret_key: &SecretKey) -> Result<(SideEffects, WaitingFor)> {
        let id = self.id();
        objective::ensure_approved(self.status, &id)?;
        let mut effects = SideEffects::default();
        let my_index = self.channel.my_index;

        if !self.channel.pre_fund_signed_by_me() {
            let signed = self.channel.sign_and_add_prefund(secret_key)?;
            effects
                .messages_to_send
                .extend(Message::for_signed_state(&id, &signed, my_index));
        }
        if !self.channel.pre_fund_complete() {
            return Ok((effects, WaitingFor::CompletePrefund));
        }

        if !self.funding_complete() {
            if let Some(left) = self.to_my_left.as_mut() {
                if !left.is_funding_the_target() {
                    effects.merge(left.fund_target(secret_key)?);
                }
            }
            let left_funded = self
                .to_my_left
                .as_ref()
                .map_or(true, Connection::is_funding_the_target);
            if left_funded {
                if let Some(right) = self.to_my_right.as_mut() {
                    if !right.is_funding_the_target() {
                        effects.merge(right.fund_target(secret_key)?);
                    }
                }
            }
            if !self.funding_complete() {
                return Ok((effects, WaitingFor::CompleteFunding));
            }
        }

        if !self.channel.post_fund_signed_by_me() {
            let signed = self.channel.sign_and_add_postfund(secret_key)?;
            effects
                .messages_to_send
                .extend(Message::for_signed_state(&id, &signed, my_index));
        }
        if !self.channel.post_fund_complete() {
            return Ok((effects, WaitingFor::CompletePostFund));
        }

        self.status = ObjectiveStatus::Completed;
        Ok((effects, WaitingFor::Nothing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use nitro_types::NATIVE_ASSET;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    struct Hops {
        alice: Actor,
        irene: Actor,
        bob: Actor,
        alice_irene: (ConsensusChannel, ConsensusChannel),
        irene_bob: (ConsensusChannel, ConsensusChannel),
    }

    /// Alice leads her ledger with Irene; Bob leads his ledger with Irene.
    fn hops(ledger_balance: Amount) -> Hops {
        let (alice, irene, bob) = (Actor::new(), Actor::new(), Actor::new());
        let alice_irene = ledger_pair(&alice, &irene, ledger_balance, ledger_balance);
        let irene_bob = ledger_pair(&bob, &irene, ledger_balance, ledger_balance);
        Hops {
            alice,
            irene,
            bob,
            alice_irene,
            irene_bob,
        }
    }

    fn request(h: &Hops) -> VirtualFundRequest {
        VirtualFundRequest {
            intermediaries: vec![h.irene.address],
            counterparty: h.bob.address,
            challenge_duration: 60,
            outcome: simple_outcome(&[(h.alice.destination(), 6), (h.bob.destination(), 4)]),
            nonce: 1,
            app_definition: Address::ZERO,
        }
    }

    #[test]
    fn payer_needs_ledger_with_first_hop() {
        let h = hops(10);
        assert_eq!(
            VirtualFundObjective::from_request(&request(&h), h.alice.address, |_| None),
            Err(ProtocolError::MissingLedger(h.irene.address))
        );
    }

    #[test]
    fn ledger_must_afford_the_guarantee() {
        let h = hops(3);
        let ledger = h.alice_irene.0.clone();
        let err = VirtualFundObjective::from_request(&request(&h), h.alice.address, |_| {
            Some(ledger.clone())
        })
        .unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientLedgerFunds { .. }));
    }

    #[test]
    fn rejects_three_allocations() {
        let h = hops(10);
        let mut req = request(&h);
        req.outcome = simple_outcome(&[
            (h.alice.destination(), 1),
            (h.irene.destination(), 1),
            (h.bob.destination(), 1),
        ]);
        let ledger = h.alice_irene.0.clone();
        assert!(matches!(
            VirtualFundObjective::from_request(&req, h.alice.address, |_| Some(ledger.clone())),
            Err(ProtocolError::UnsupportedOutcome(_))
        ));
    }

    #[test]
    fn proposal_for_unrelated_ledger_is_out_of_scope() {
        let h = hops(10);
        let ledger = h.alice_irene.0.clone();
        let mut objective =
            VirtualFundObjective::from_request(&request(&h), h.alice.address, |_| {
                Some(ledger.clone())
            })
            .unwrap();
        let mut bob_leader = h.irene_bob.0.clone();
        let proposal = Proposal::add(
            bob_leader.id,
            Add {
                guarantee: Guarantee {
                    amount: 2,
                    target: Destination::from_bytes([8; 32]),
                    left: h.bob.destination(),
                    right: h.irene.destination(),
                },
                left_deposit: 1,
                right_deposit: 1,
            },
        );
        let signed = bob_leader.propose(proposal, &h.bob.key).unwrap();
        assert_eq!(
            objective.receive_proposal(signed),
            Err(ProtocolError::LedgerOutOfScope(bob_leader.id))
        );
    }

    #[test]
    fn three_party_funding() {
        let h = hops(10);
        let (ai_alice, ai_irene) = h.alice_irene.clone();
        let (ib_bob, ib_irene) = h.irene_bob.clone();

        let mut alice = VirtualFundObjective::from_request(&request(&h), h.alice.address, |_| {
            Some(ai_alice.clone())
        })
        .unwrap();
        let (effects, waiting) = alice.crank(&h.alice.key).unwrap();
        assert_eq!(waiting, WaitingFor::CompletePrefund);
        assert_eq!(effects.messages_to_send.len(), 2);

        let payload = effects.messages_to_send[0].objective_payloads[0].clone();
        let irene_ledgers = |a: &Address| {
            if *a == h.alice.address {
                Some(ai_irene.clone())
            } else if *a == h.bob.address {
                Some(ib_irene.clone())
            } else {
                None
            }
        };
        let mut irene =
            VirtualFundObjective::from_payload(&payload, h.irene.address, irene_ledgers).unwrap();
        let mut bob =
            VirtualFundObjective::from_payload(&payload, h.bob.address, |_| Some(ib_bob.clone()))
                .unwrap();
        irene.approve();
        bob.approve();
        assert!(bob.is_payee());
        assert_eq!(bob.payer(), h.alice.address);
        assert_eq!(irene.ledgers().len(), 2);

        let keys: HashMap<Address, &SecretKey> = [
            (h.alice.address, &h.alice.key),
            (h.irene.address, &h.irene.key),
            (h.bob.address, &h.bob.key),
        ]
        .into_iter()
        .collect();
        let mut parties = HashMap::from([
            (h.alice.address, alice),
            (h.irene.address, irene),
            (h.bob.address, bob),
        ]);

        let mut done = false;
        for _ in 0..10 {
            let mut outbox = Vec::new();
            let mut finished = 0;
            for (address, objective) in parties.iter_mut() {
                if objective.status() == ObjectiveStatus::Completed {
                    finished += 1;
                    continue;
                }
                let (effects, waiting) = objective.crank(keys[address]).unwrap();
                outbox.extend(effects.messages_to_send);
                if waiting == WaitingFor::Nothing {
                    finished += 1;
                }
            }
            if finished == parties.len() && outbox.is_empty() {
                done = true;
                break;
            }
            for message in outbox {
                let to = parties.get_mut(&message.to).unwrap();
                for payload in &message.objective_payloads {
                    to.update(payload).unwrap();
                }
                for proposal in message.ledger_proposals {
                    to.receive_proposal(proposal).unwrap();
                }
            }
        }
        assert!(done, "virtual funding did not complete");

        let irene = &parties[&h.irene.address];
        for ledger in irene.ledgers() {
            assert!(ledger.includes_target(&irene.channel.id));
            assert_eq!(ledger.consensus_vars().outcome.asset, NATIVE_ASSET);
        }
        let alice = &parties[&h.alice.address];
        assert_eq!(alice.status(), ObjectiveStatus::Completed);
        assert!(alice.channel.post_fund_complete());
    }
}
