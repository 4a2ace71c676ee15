//! Funding a ledger channel with on-chain deposits.
//!
//! Participants sign the prefund state, deposit in participant order once every
//! earlier depositor's share is held, then sign the postfund state. A completed
//! objective yields the [`ConsensusChannel`] the engine keeps as the ledger.

use crate::error::{ProtocolError, Result};
use crate::objective::{self, ObjectiveId, ObjectiveKind, ObjectiveStatus, SideEffects, WaitingFor};
use crate::{ChainEvent, ChainTransaction, Message, ObjectivePayload};
use nitro_channel::{
    Channel, ChannelError, ConsensusChannel, Exit, FixedPart, LedgerOutcome, State, VariablePart,
    PRE_FUND_TURN_NUM,
};
use nitro_crypto::SecretKey;
use nitro_types::{Address, Funds};
use serde::{Deserialize, Serialize};

/// Parameters for opening a ledger channel with `counterparty`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectFundRequest {
    /// The other participant.
    pub counterparty: Address,
    /// Challenge window in seconds.
    pub challenge_duration: u32,
    /// Initial outcome.
    pub outcome: Exit,
    /// Channel nonce.
    pub nonce: u64,
    /// Application contract.
    pub app_definition: Address,
}

impl DirectFundRequest {
    /// The unsigned prefund state, with me as participant 0.
    pub fn prefund_state(&self, my_address: Address) -> State {
        State::new(
            FixedPart {
                participants: vec![my_address, self.counterparty],
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
            ObjectiveKind::DirectFund,
            &self.prefund_state(my_address).channel_id(),
        )
    }
}

/// Funds a two-party ledger channel on chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectFundObjective {
    status: ObjectiveStatus,
    channel: Channel,
    my_deposit_safety_threshold: Funds,
    my_deposit_target: Funds,
    fully_funded_threshold: Funds,
    latest_block_number: u64,
    transaction_submitted: bool,
}

impl DirectFundObjective {
    /// Creates the objective from a prefund state.
    pub fn new(prefund: State, pre_approve: bool, my_address: Address) -> Result<Self> {
        if prefund.is_final {
            return Err(ProtocolError::FinalInitialState);
        }
        let my_index = prefund
            .participants
            .iter()
            .position(|p| *p == my_address)
            .ok_or(ProtocolError::NotParticipant(my_address))?;
        let channel = Channel::new(prefund.clone(), my_index)?;

        let my_destination = channel.my_destination();
        let my_deposit_safety_threshold = prefund.outcome.deposit_safety_threshold(&my_destination);
        let mut my_deposit_target = my_deposit_safety_threshold.clone();
        for (asset, amount) in prefund.outcome.total_allocated_for(&my_destination).iter() {
            my_deposit_target.add(*asset, *amount);
        }

        Ok(Self {
            status: if pre_approve {
                ObjectiveStatus::Approved
            } else {
                ObjectiveStatus::Unapproved
            },
            channel,
            my_deposit_safety_threshold,
            my_deposit_target,
            fully_funded_threshold: prefund.outcome.total_allocated(),
            latest_block_number: 0,
            transaction_submitted: false,
        })
    }

    /// Creates an approved objective from an API request.
    ///
    /// Fails if `ledger_exists` reports a ledger with the counterparty already.
    pub fn from_request(
        request: &DirectFundRequest,
        my_address: Address,
        ledger_exists: impl Fn(&Address) -> bool,
    ) -> Result<Self> {
        if ledger_exists(&request.counterparty) {
            return Err(ProtocolError::LedgerChannelExists(request.counterparty));
        }
        Self::new(request.prefund_state(my_address), true, my_address)
    }

    /// Creates an unapproved objective from a counterparty's first message.
    pub fn from_payload(payload: &ObjectivePayload, my_address: Address) -> Result<Self> {
        let mut objective = Self::new(payload.signed_state.state().clone(), false, my_address)?;
        objective.update(payload)?;
        Ok(objective)
    }

    /// The objective's id.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::DirectFund, &self.channel.id)
    }

    /// Current status.
    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    /// The channel being funded.
    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub(crate) fn approve(&mut self) {
        objective::approve(&mut self.status);
    }

    pub(crate) fn reject(&mut self) -> SideEffects {
        let id = self.id();
        objective::reject(&mut self.status, &id, &self.channel)
    }

    /// Merges a counterparty's signatures.
    pub fn update(&mut self, payload: &ObjectivePayload) -> Result<()> {
        objective::check_payload_id(self.id(), payload)?;
        if payload.signed_state.state().channel_id() != self.channel.id {
            return Err(ProtocolError::EventOutOfScope);
        }
        self.channel.add_signed_state(&payload.signed_state)?;
        Ok(())
    }

    /// Records on-chain holdings from a deposit event newer than any seen so far.
    pub fn update_with_chain_event(&mut self, event: &ChainEvent) -> Result<()> {
        if event.channel_id() != self.channel.id {
            return Err(ProtocolError::EventOutOfScope);
        }
        match event {
            ChainEvent::Deposited {
                block_num,
                asset,
                now_held,
                ..
            }
            | ChainEvent::AllocationUpdated {
                block_num,
                asset,
                amount: now_held,
                ..
            } if *block_num > self.latest_block_number => {
                self.channel.on_chain_funding.set(*asset, *now_held);
                self.latest_block_number = *block_num;
            }
            _ => {}
        }
        Ok(())
    }

    /// Drives the prefund, deposit and postfund phases.
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

        if !self.fully_funded() {
            if !self.safe_to_deposit() {
                return Ok((effects, WaitingFor::MyTurnToFund));
            }
            let deposit = self.amount_to_deposit();
            if deposit.is_non_zero() && !self.transaction_submitted {
                tracing::debug!(objective = %id, ?deposit, "submitting deposit");
                effects.transactions_to_submit.push(ChainTransaction::Deposit {
                    channel_id: self.channel.id,
                    deposit,
                });
                self.transaction_submitted = true;
            }
            return Ok((effects, WaitingFor::CompleteFunding));
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

    fn fully_funded(&self) -> bool {
        self.channel
            .on_chain_funding
            .covers(&self.fully_funded_threshold)
    }

    fn safe_to_deposit(&self) -> bool {
        self.channel
            .on_chain_funding
            .covers(&self.my_deposit_safety_threshold)
    }

    fn amount_to_deposit(&self) -> Funds {
        self.my_deposit_target
            .iter()
            .map(|(asset, target)| {
                let held = self.channel.on_chain_funding.get(asset);
                (*asset, target.saturating_sub(held))
            })
            .collect()
    }

    /// The ledger channel this objective funded, built from the fully signed postfund state.
    pub fn create_consensus_channel(&self) -> Result<ConsensusChannel> {
        let signed = self.channel.signed_post_fund_state()?;
        let (Some(leader_sig), Some(follower_sig)) = (
            signed.participant_signature(0),
            signed.participant_signature(1),
        ) else {
            return Err(ChannelError::NoSupportedState(self.channel.id).into());
        };
        let state = signed.state();
        let outcome = LedgerOutcome::from_exit(&state.outcome)?;
        let signatures = [leader_sig, follower_sig];
        let mut ledger = if self.channel.my_index == 0 {
            ConsensusChannel::new_leader_channel(
                state.fixed_part(),
                state.turn_num,
                outcome,
                signatures,
            )?
        } else {
            ConsensusChannel::new_follower_channel(
                state.fixed_part(),
                state.turn_num,
                outcome,
                signatures,
            )?
        };
        ledger.on_chain_funding = self.channel.on_chain_funding.clone();
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::*;
    use nitro_types::NATIVE_ASSET;
    use pretty_assertions::assert_eq;

    fn request(alice: &Actor, bob: &Actor) -> DirectFundRequest {
        DirectFundRequest {
            counterparty: bob.address,
            challenge_duration: 60,
            outcome: simple_outcome(&[(alice.destination(), 5), (bob.destination(), 5)]),
            nonce: 7,
            app_definition: Address::ZERO,
        }
    }

    fn deposited(objective: &DirectFundObjective, block_num: u64, now_held: u128) -> ChainEvent {
        ChainEvent::Deposited {
            channel_id: objective.channel.id,
            block_num,
            asset: NATIVE_ASSET,
            now_held,
        }
    }

    fn deliver(effects: &SideEffects, to: &mut DirectFundObjective) {
        for message in &effects.messages_to_send {
            for payload in &message.objective_payloads {
                to.update(payload).unwrap();
            }
        }
    }

    #[test]
    fn refuses_second_ledger_with_same_counterparty() {
        let (alice, bob) = (Actor::new(), Actor::new());
        let err = DirectFundObjective::from_request(&request(&alice, &bob), alice.address, |_| true)
            .unwrap_err();
        assert_eq!(err, ProtocolError::LedgerChannelExists(bob.address));
    }

    #[test]
    fn refuses_final_prefund() {
        let (alice, bob) = (Actor::new(), Actor::new());
        let mut state = request(&alice, &bob).prefund_state(alice.address);
        state.is_final = true;
        assert_eq!(
            DirectFundObjective::new(state, true, alice.address),
            Err(ProtocolError::FinalInitialState)
        );
    }

    #[test]
    fn unapproved_objective_does_not_crank() {
        let (alice, bob) = (Actor::new(), Actor::new());
        let state = request(&alice, &bob).prefund_state(alice.address);
        let mut objective = DirectFundObjective::new(state, false, bob.address).unwrap();
        assert!(matches!(
            objective.crank(&bob.key),
            Err(ProtocolError::NotApproved(_))
        ));
    }

    #[test]
    fn chain_event_for_other_channel_is_out_of_scope() {
        let (alice, bob) = (Actor::new(), Actor::new());
        let mut objective =
            DirectFundObjective::from_request(&request(&alice, &bob), alice.address, |_| false)
                .unwrap();
        let event = ChainEvent::Concluded {
            channel_id: nitro_types::Destination::from_bytes([9; 32]),
            block_num: 1,
        };
        assert_eq!(
            objective.update_with_chain_event(&event),
            Err(ProtocolError::EventOutOfScope)
        );
    }

    #[test]
    fn stale_deposit_events_are_ignored() {
        let (alice, bob) = (Actor::new(), Actor::new());
        let mut objective =
            DirectFundObjective::from_request(&request(&alice, &bob), alice.address, |_| false)
                .unwrap();
        objective
            .update_with_chain_event(&deposited(&objective, 4, 10))
            .unwrap();
        objective
            .update_with_chain_event(&deposited(&objective, 3, 5))
            .unwrap();
        assert_eq!(objective.channel.on_chain_funding.get(&NATIVE_ASSET), 10);
    }

    #[test]
    fn two_parties_fund_in_turn() {
        let (alice, bob) = (Actor::new(), Actor::new());
        let mut a =
            DirectFundObjective::from_request(&request(&alice, &bob), alice.address, |_| false)
                .unwrap();

        let (effects, waiting) = a.crank(&alice.key).unwrap();
        assert_eq!(waiting, WaitingFor::CompletePrefund);
        assert_eq!(effects.messages_to_send.len(), 1);
        assert_eq!(effects.messages_to_send[0].to, bob.address);

        let payload = &effects.messages_to_send[0].objective_payloads[0];
        let mut b = DirectFundObjective::from_payload(payload, bob.address).unwrap();
        assert_eq!(b.status(), ObjectiveStatus::Unapproved);
        assert_eq!(b.id(), a.id());
        b.approve();

        // Bob deposits second, so waits for Alice's share.
        let (effects, waiting) = b.crank(&bob.key).unwrap();
        assert_eq!(waiting, WaitingFor::MyTurnToFund);
        deliver(&effects, &mut a);

        let (effects, waiting) = a.crank(&alice.key).unwrap();
        assert_eq!(waiting, WaitingFor::CompleteFunding);
        assert_eq!(
            effects.transactions_to_submit,
            vec![ChainTransaction::Deposit {
                channel_id: a.channel.id,
                deposit: [(NATIVE_ASSET, 5)].into_iter().collect(),
            }]
        );
        // Cranking again does not deposit twice.
        let (effects, _) = a.crank(&alice.key).unwrap();
        assert!(effects.transactions_to_submit.is_empty());

        let event = deposited(&a, 1, 5);
        a.update_with_chain_event(&event).unwrap();
        b.update_with_chain_event(&event).unwrap();
        let (effects, waiting) = b.crank(&bob.key).unwrap();
        assert_eq!(waiting, WaitingFor::CompleteFunding);
        assert_eq!(
            effects.transactions_to_submit,
            vec![ChainTransaction::Deposit {
                channel_id: b.channel.id,
                deposit: [(NATIVE_ASSET, 5)].into_iter().collect(),
            }]
        );

        let event = deposited(&a, 2, 10);
        a.update_with_chain_event(&event).unwrap();
        b.update_with_chain_event(&event).unwrap();

        let (effects, waiting) = a.crank(&alice.key).unwrap();
        assert_eq!(waiting, WaitingFor::CompletePostFund);
        deliver(&effects, &mut b);
        let (effects, waiting) = b.crank(&bob.key).unwrap();
        assert_eq!(waiting, WaitingFor::Nothing);
        assert_eq!(b.status(), ObjectiveStatus::Completed);
        deliver(&effects, &mut a);
        let (_, waiting) = a.crank(&alice.key).unwrap();
        assert_eq!(waiting, WaitingFor::Nothing);

        let leader = a.create_consensus_channel().unwrap();
        let follower = b.create_consensus_channel().unwrap();
        assert!(leader.is_leader());
        assert!(follower.is_follower());
        assert_eq!(leader.id, a.channel.id);
        assert_eq!(leader.consensus_vars(), follower.consensus_vars());
        assert_eq!(leader.on_chain_funding.get(&NATIVE_ASSET), 10);
    }

    #[test]
    fn second_depositor_walks_every_phase() {
        let (alice, bob) = (Actor::new(), Actor::new());
        let prefund = request(&alice, &bob).prefund_state(alice.address);
        let mut b = DirectFundObjective::new(prefund.clone(), true, bob.address).unwrap();

        let (effects, waiting) = b.crank(&bob.key).unwrap();
        assert_eq!(waiting, WaitingFor::CompletePrefund);
        assert_eq!(effects.messages_to_send[0].to, alice.address);

        let mut signed = nitro_channel::SignedState::new(prefund);
        signed.sign(&alice.key).unwrap();
        b.update(&ObjectivePayload {
            objective_id: b.id(),
            signed_state: signed,
        })
        .unwrap();
        let (effects, waiting) = b.crank(&bob.key).unwrap();
        assert_eq!(waiting, WaitingFor::MyTurnToFund);
        assert!(effects.is_empty());

        b.channel.on_chain_funding.set(NATIVE_ASSET, 5);
        let (effects, waiting) = b.crank(&bob.key).unwrap();
        assert_eq!(waiting, WaitingFor::CompleteFunding);
        assert_eq!(effects.transactions_to_submit.len(), 1);

        b.channel.on_chain_funding.set(NATIVE_ASSET, 10);
        let (effects, waiting) = b.crank(&bob.key).unwrap();
        assert_eq!(waiting, WaitingFor::CompletePostFund);
        assert_eq!(effects.messages_to_send.len(), 1);

        let postfund = b.channel.post_fund_state().unwrap();
        let mut signed = nitro_channel::SignedState::new(postfund);
        signed.sign(&alice.key).unwrap();
        b.update(&ObjectivePayload {
            objective_id: b.id(),
            signed_state: signed,
        })
        .unwrap();
        let (effects, waiting) = b.crank(&bob.key).unwrap();
        assert_eq!(waiting, WaitingFor::Nothing);
        assert!(effects.is_empty());
    }

    #[test]
    fn rejection_notifies_counterparty() {
        let (alice, bob) = (Actor::new(), Actor::new());
        let state = request(&alice, &bob).prefund_state(alice.address);
        let mut objective = DirectFundObjective::new(state, false, bob.address).unwrap();
        let effects = objective.reject();
        assert_eq!(objective.status(), ObjectiveStatus::Rejected);
        assert_eq!(effects.messages_to_send.len(), 1);
        assert_eq!(effects.messages_to_send[0].to, alice.address);
        assert_eq!(
            effects.messages_to_send[0].rejected_objectives,
            vec![objective.id()]
        );
        assert!(objective.reject().is_empty());
    }
}
