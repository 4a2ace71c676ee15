//! Closing a virtual channel and releasing its guarantees.
//!
//! Participants sign a final state that moves the amount paid from payer to
//! payee, then every hop replaces its guarantee with the same split.

use crate::error::{ProtocolError, Result};
use crate::objective::{self, ObjectiveId, ObjectiveKind, ObjectiveStatus, SideEffects, WaitingFor};
use crate::virtualfund::split_outcome;
use crate::{ChainEvent, Message, ObjectivePayload};
use nitro_channel::{Channel, ConsensusChannel, Exit, Proposal, Remove, SignedProposal, State};
use nitro_crypto::SecretKey;
use nitro_types::{Address, Amount, ChannelId};
use serde::{Deserialize, Serialize};

/// Turn number of a virtual channel's final state.
pub const FINAL_TURN_NUM: u64 = 2;

/// Parameters for closing a virtual channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDefundRequest {
    /// The virtual channel to close.
    pub channel_id: ChannelId,
}

impl VirtualDefundRequest {
    /// The id of the objective this request creates.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::VirtualDefund, &self.channel_id)
    }
}

/// Closes a virtual channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualDefundObjective {
    status: ObjectiveStatus,
    channel: Channel,
    to_my_left: Option<ConsensusChannel>,
    to_my_right: Option<ConsensusChannel>,
    final_outcome: Exit,
    a0: Amount,
    b0: Amount,
    paid: Amount,
    minimum_payment_amount: Amount,
}

impl VirtualDefundObjective {
    /// Creates the objective for a funded virtual channel and the amount paid through it.
    ///
    /// When I am the payee, `paid` must be at least `minimum_payment_amount`, the
    /// total of the vouchers I hold.
    pub fn new(
        pre_approve: bool,
        channel: Channel,
        paid: Amount,
        minimum_payment_amount: Amount,
        left_ledger: Option<ConsensusChannel>,
        right_ledger: Option<ConsensusChannel>,
    ) -> Result<Self> {
        let postfund = channel.post_fund_state()?;
        let participants = channel.participants();
        let (_, a0, b0) = split_outcome(&postfund.outcome, participants)?;
        if paid > a0 {
            return Err(ProtocolError::PaymentExceedsDeposit {
                paid,
                available: a0,
            });
        }
        let my_role = channel.my_index;
        let is_payee = my_role + 1 == participants.len();
        if is_payee && paid < minimum_payment_amount {
            return Err(ProtocolError::InsufficientPayment {
                paid,
                minimum: minimum_payment_amount,
            });
        }

        let mut final_outcome = postfund.outcome;
        if let [single] = final_outcome.0.as_mut_slice() {
            if let [payer, payee] = single.allocations.as_mut_slice() {
                payer.amount = a0 - paid;
                payee.amount = b0 + paid;
            }
        }

        let to_my_left = match my_role {
            0 => None,
            _ => Some(Self::guarding_ledger(
                left_ledger,
                participants[my_role - 1],
                &channel.id,
            )?),
        };
        let to_my_right = if is_payee {
            None
        } else {
            Some(Self::guarding_ledger(
                right_ledger,
                participants[my_role + 1],
                &channel.id,
            )?)
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
            final_outcome,
            a0,
            b0,
            paid,
            minimum_payment_amount,
        })
    }

    fn guarding_ledger(
        ledger: Option<ConsensusChannel>,
        neighbour: Address,
        target: &ChannelId,
    ) -> Result<ConsensusChannel> {
        let ledger = ledger.ok_or(ProtocolError::MissingLedger(neighbour))?;
        if !ledger.includes_target(target) {
            return Err(ProtocolError::GuaranteeMissing {
                ledger: ledger.id,
                target: *target,
            });
        }
        Ok(ledger)
    }

    /// Creates an approved objective from an API request, closing with what I have paid or
    /// been paid.
    pub fn from_request(
        channel: Channel,
        paid: Amount,
        ledger_with: impl Fn(&Address) -> Option<ConsensusChannel>,
    ) -> Result<Self> {
        let (left, right) = Self::neighbour_ledgers(&channel, ledger_with);
        Self::new(true, channel, paid, paid, left, right)
    }

    /// Creates an unapproved objective from a peer's final state, adopting its payment.
    pub fn from_payload(
        payload: &ObjectivePayload,
        channel: Channel,
        minimum_payment_amount: Amount,
        ledger_with: impl Fn(&Address) -> Option<ConsensusChannel>,
    ) -> Result<Self> {
        let state = payload.signed_state.state();
        if state.channel_id() != channel.id {
            return Err(ProtocolError::EventOutOfScope);
        }
        Self::check_final(state)?;

        let participants = channel.participants();
        let (_, a0, b0) = split_outcome(&channel.post_fund_state()?.outcome, participants)?;
        let (_, payer_final, payee_final) = split_outcome(&state.outcome, participants)?;
        let paid = a0.checked_sub(payer_final).ok_or_else(|| {
            ProtocolError::UnsupportedOutcome("final outcome refunds more than the payer deposited".into())
        })?;
        if payee_final.checked_sub(b0) != Some(paid) {
            return Err(ProtocolError::UnsupportedOutcome(
                "final outcome does not conserve funds".into(),
            ));
        }

        let (left, right) = Self::neighbour_ledgers(&channel, ledger_with);
        let mut objective = Self::new(false, channel, paid, minimum_payment_amount, left, right)?;
        objective.update(payload)?;
        Ok(objective)
    }

    fn neighbour_ledgers(
        channel: &Channel,
        ledger_with: impl Fn(&Address) -> Option<ConsensusChannel>,
    ) -> (Option<ConsensusChannel>, Option<ConsensusChannel>) {
        let participants = channel.participants();
        let my_role = channel.my_index;
        let left = my_role
            .checked_sub(1)
            .and_then(|i| participants.get(i))
            .and_then(&ledger_with);
        let right = participants.get(my_role + 1).and_then(&ledger_with);
        (left, right)
    }

    fn check_final(state: &State) -> Result<()> {
        if !state.is_final || state.turn_num != FINAL_TURN_NUM {
            return Err(ProtocolError::UnexpectedFinalState {
                expected: FINAL_TURN_NUM,
                got: state.turn_num,
                is_final: state.is_final,
            });
        }
        Ok(())
    }

    /// The objective's id.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::VirtualDefund, &self.channel.id)
    }

    /// Current status.
    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    /// The virtual channel.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    /// Amount moving from payer to payee.
    pub fn paid(&self) -> Amount {
        self.paid
    }

    /// The payee's voucher total when the objective was created.
    pub fn minimum_payment_amount(&self) -> Amount {
        self.minimum_payment_amount
    }

    pub(crate) fn approve(&mut self) {
        objective::approve(&mut self.status);
    }

    pub(crate) fn reject(&mut self) -> SideEffects {
        let id = self.id();
        objective::reject(&mut self.status, &id, &self.channel)
    }

    fn final_state(&self) -> Result<State> {
        let mut state = self.channel.post_fund_state()?;
        state.turn_num = FINAL_TURN_NUM;
        state.is_final = true;
        state.outcome = self.final_outcome.clone();
        Ok(state)
    }

    /// Merges signatures on the final state.
    pub fn update(&mut self, payload: &ObjectivePayload) -> Result<()> {
        objective::check_payload_id(self.id(), payload)?;
        let state = payload.signed_state.state();
        if state.channel_id() != self.channel.id {
            return Err(ProtocolError::EventOutOfScope);
        }
        Self::check_final(state)?;
        if state.outcome != self.final_outcome {
            return Err(ProtocolError::UnsupportedOutcome(
                "final outcome does not match the agreed payment".into(),
            ));
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
        for ledger in [self.to_my_left.as_mut(), self.to_my_right.as_mut()]
            .into_iter()
            .flatten()
        {
            if ledger.id == ledger_id {
                ledger.receive(signed)?;
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
            .collect()
    }

    /// Replaces my copy of `ledger` if it is one of my neighbour ledgers.
    pub fn refresh_ledger(&mut self, ledger: &ConsensusChannel) {
        for mine in [self.to_my_left.as_mut(), self.to_my_right.as_mut()]
            .into_iter()
            .flatten()
        {
            if mine.id == ledger.id {
                *mine = ledger.clone();
            }
        }
    }

    fn removal(&self, ledger_id: ChannelId) -> Proposal {
        Proposal::remove(
            ledger_id,
            Remove {
                target: self.channel.id,
                left_amount: self.a0 - self.paid,
                right_amount: self.b0 + self.paid,
            },
        )
    }

    fn defund_ledger(
        ledger: &mut ConsensusChannel,
        proposal: Proposal,
        secret_key: &SecretKey,
    ) -> Result<SideEffects> {
        let target = proposal.target();
        let mut effects = SideEffects::default();
        if ledger.is_leader() {
            if !ledger.has_removal_been_proposed(&target) {
                let signed = ledger.propose(proposal, secret_key)?;
                effects.messages_to_send.push(Message::for_proposal(
                    ledger.my_address(),
                    ledger.counterparty(),
                    signed,
                ));
            }
        } else if ledger.has_removal_been_proposed_next(&target) {
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

    /// Signs the final state, then releases the guarantee on every neighbour ledger.
    pub fn crank(&mut self, secret_key: &SecretKey) -> Result<(SideEffects, WaitingFor)> {
        let id = self.id();
        objective::ensure_approved(self.status, &id)?;
        let mut effects = SideEffects::default();

        if !self.channel.final_signed_by_me() {
            let state = self.final_state()?;
            let signed = self.channel.sign_and_add_state(state, secret_key)?;
            effects.messages_to_send.extend(Message::for_signed_state(
                &id,
                &signed,
                self.channel.my_index,
            ));
        }
        if !self.channel.final_completed() {
            return Ok((effects, WaitingFor::CompleteFinal));
        }

        let target = self.channel.id;
        let left_removal = self
            .to_my_left
            .as_ref()
            .filter(|l| l.includes_target(&target))
            .map(|l| self.removal(l.id));
        let right_removal = self
            .to_my_right
            .as_ref()
            .filter(|l| l.includes_target(&target))
            .map(|l| self.removal(l.id));
        if let (Some(ledger), Some(proposal)) = (self.to_my_left.as_mut(), left_removal) {
            effects.merge(Self::defund_ledger(ledger, proposal, secret_key)?);
        }
        if let (Some(ledger), Some(proposal)) = (self.to_my_right.as_mut(), right_removal) {
            effects.merge(Self::defund_ledger(ledger, proposal, secret_key)?);
        }

        if self.ledgers().iter().any(|l| l.includes_target(&target)) {
            return Ok((effects, WaitingFor::CompleteLedgerDefunding));
        }

        self.status = ObjectiveStatus::Completed;
        Ok((effects, WaitingFor::Nothing))
    }
}
