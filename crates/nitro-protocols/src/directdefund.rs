//! Closing a ledger channel.
//!
//! The cooperative path collects signatures on a final state and lets
//! participant 0 withdraw it. A challenge instead registers the latest
//! supported state on chain and withdraws once the challenge window has passed.

use crate::error::{ProtocolError, Result};
use crate::objective::{self, ObjectiveId, ObjectiveKind, ObjectiveStatus, SideEffects, WaitingFor};
use crate::{ChainEvent, ChainTransaction, Message, ObjectivePayload};
use nitro_channel::{Channel, ConsensusChannel};
use nitro_crypto::SecretKey;
use nitro_types::ChannelId;
use serde::{Deserialize, Serialize};

/// Parameters for closing a ledger channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectDefundRequest {
    /// The ledger to close.
    pub channel_id: ChannelId,
    /// Close unilaterally through a challenge rather than cooperatively.
    #[serde(default)]
    pub is_challenge: bool,
}

impl DirectDefundRequest {
    /// The id of the objective this request creates.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::DirectDefund, &self.channel_id)
    }
}

/// Closes a ledger channel and withdraws its holdings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectDefundObjective {
    status: ObjectiveStatus,
    channel: Channel,
    final_turn_num: u64,
    is_challenge: bool,
    challenge_submitted: bool,
    challenge_registered: bool,
    concluded: bool,
    withdraw_submitted: bool,
    latest_block_number: u64,
}

impl DirectDefundObjective {
    /// Creates the objective for `ledger`, which must not fund any channel.
    pub fn new(pre_approve: bool, ledger: &ConsensusChannel, is_challenge: bool) -> Result<Self> {
        if !ledger.funding_targets().is_empty() {
            return Err(ProtocolError::LedgerHasGuarantees(ledger.id));
        }
        Ok(Self {
            status: if pre_approve {
                ObjectiveStatus::Approved
            } else {
                ObjectiveStatus::Unapproved
            },
            channel: Channel::from_consensus_channel(ledger)?,
            final_turn_num: ledger.consensus_turn_num() + 1,
            is_challenge,
            challenge_submitted: false,
            challenge_registered: false,
            concluded: false,
            withdraw_submitted: false,
            latest_block_number: 0,
        })
    }

    /// Creates an approved objective from an API request.
    pub fn from_request(request: &DirectDefundRequest, ledger: &ConsensusChannel) -> Result<Self> {
        Self::new(true, ledger, request.is_challenge)
    }

    /// Creates an unapproved objective from a counterparty's final state.
    pub fn from_payload(payload: &ObjectivePayload, ledger: &ConsensusChannel) -> Result<Self> {
        let mut objective = Self::new(false, ledger, false)?;
        objective.update(payload)?;
        Ok(objective)
    }

    /// The objective's id.
    pub fn id(&self) -> ObjectiveId {
        ObjectiveId::new(ObjectiveKind::DirectDefund, &self.channel.id)
    }

    /// Current status.
    pub fn status(&self) -> ObjectiveStatus {
        self.status
    }

    /// The ledger being closed.
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

    /// Merges a counterparty's signature on the final state.
    pub fn update(&mut self, payload: &ObjectivePayload) -> Result<()> {
        objective::check_payload_id(self.id(), payload)?;
        let state = payload.signed_state.state();
        if state.channel_id() != self.channel.id {
            return Err(ProtocolError::EventOutOfScope);
        }
        if !state.is_final || state.turn_num != self.final_turn_num {
            return Err(ProtocolError::UnexpectedFinalState {
                expected: self.final_turn_num,
                got: state.turn_num,
                is_final: state.is_final,
            });
        }
        if state.outcome != self.channel.latest_supported_state()?.outcome {
            return Err(ProtocolError::UnsupportedOutcome(
                "final outcome differs from the ledger outcome".into(),
            ));
        }
        self.channel.add_signed_state(&payload.signed_state)?;
        Ok(())
    }

    /// Tracks payouts, challenges and conclusion of the ledger.
    pub fn update_with_chain_event(&mut self, event: &ChainEvent) -> Result<()> {
        if event.channel_id() != self.channel.id {
            return Err(ProtocolError::EventOutOfScope);
        }
        match event {
            ChainEvent::Deposited {
                block_num,
                asset,
                now_held: amount,
                ..
            }
            | ChainEvent::AllocationUpdated {
                block_num,
                asset,
                amount,
                ..
            } => {
                if *block_num > self.latest_block_number {
                    self.channel.on_chain_funding.set(*asset, *amount);
                    self.latest_block_number = *block_num;
                }
            }
            ChainEvent::Concluded { .. } => self.concluded = true,
            ChainEvent::ChallengeRegistered { candidate, .. } => {
                self.challenge_registered = true;
                self.channel.add_signed_state(candidate)?;
            }
        }
        Ok(())
    }

    /// Drives the ledger to a final state and withdraws it.
    pub fn crank(&mut self, secret_key: &SecretKey) -> Result<(SideEffects, WaitingFor)> {
        let id = self.id();
        objective::ensure_approved(self.status, &id)?;
        let mut effects = SideEffects::default();

        if self.is_challenge || self.challenge_registered {
            if self.is_challenge && !self.challenge_submitted {
                let candidate = self.channel.latest_supported_signed_state()?;
                tracing::info!(objective = %id, turn_num = candidate.state().turn_num, "challenging ledger");
                effects
                    .transactions_to_submit
                    .push(ChainTransaction::Challenge {
                        channel_id: self.channel.id,
                        candidate,
                    });
                self.challenge_submitted = true;
            }
            if !self.concluded {
                return Ok((effects, WaitingFor::DisputeFinalization));
            }
        } else {
            if !self.channel.final_signed_by_me() {
                let mut state = self.channel.latest_supported_state()?.clone();
                state.turn_num = self.final_turn_num;
                state.is_final = true;
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
        }

        if self.channel.on_chain_funding.is_non_zero() {
            if self.channel.my_index == 0 && !self.withdraw_submitted {
                effects
                    .transactions_to_submit
                    .push(ChainTransaction::WithdrawAll {
                        channel_id: self.channel.id,
                        signed_state: self.channel.latest_supported_signed_state()?,
                    });
                self.withdraw_submitted = true;
            }
            return Ok((effects, WaitingFor::Withdraw));
        }

        self.status = ObjectiveStatus::Completed;
        Ok((effects, WaitingFor::Nothing))
    }
}
