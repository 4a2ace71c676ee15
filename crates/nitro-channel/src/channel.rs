//! A channel: its fixed part and the signed states participants exchanged.

use crate::consensus::ConsensusChannel;
use crate::{ChannelError, Result, SignedState, State};
use crate::state::FixedPart;
use nitro_crypto::SecretKey;
use nitro_types::{Address, ChannelId, Destination, Funds};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Turn number of the state signed before any deposit.
pub const PRE_FUND_TURN_NUM: u64 = 0;

/// Turn number of the state signed once the channel is fully funded.
pub const POST_FUND_TURN_NUM: u64 = 1;

/// A channel as seen by one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Channel id, computed once from the fixed part.
    pub id: ChannelId,
    /// My position in the participant list.
    pub my_index: usize,
    /// Holdings the adjudicator reports for this channel.
    pub on_chain_funding: Funds,
    /// Participants, nonce, app definition and challenge duration.
    pub fixed_part: FixedPart,
    signed_state_for_turn_num: BTreeMap<u64, SignedState>,
    latest_supported_state_turn_num: Option<u64>,
}

impl Channel {
    /// Creates a channel from its unsigned prefund state.
    ///
    /// Seeds empty prefund and postfund entries so signatures for either can be collected.
    pub fn new(prefund: State, my_index: usize) -> Result<Self> {
        let fixed_part = prefund.fixed_part();
        fixed_part.validate()?;
        if my_index >= fixed_part.participants.len() {
            return Err(ChannelError::IndexOutOfRange {
                index: my_index,
                participants: fixed_part.participants.len(),
            });
        }
        if prefund.turn_num != PRE_FUND_TURN_NUM {
            return Err(ChannelError::UnexpectedTurnNum {
                expected: PRE_FUND_TURN_NUM,
                got: prefund.turn_num,
            });
        }

        let mut postfund = prefund.clone();
        postfund.turn_num = POST_FUND_TURN_NUM;

        let mut signed_state_for_turn_num = BTreeMap::new();
        signed_state_for_turn_num.insert(PRE_FUND_TURN_NUM, SignedState::new(prefund));
        signed_state_for_turn_num.insert(POST_FUND_TURN_NUM, SignedState::new(postfund));

        Ok(Self {
            id: fixed_part.channel_id(),
            my_index,
            on_chain_funding: Funds::new(),
            fixed_part,
            signed_state_for_turn_num,
            latest_supported_state_turn_num: None,
        })
    }

    /// Re-expresses a ledger's current, fully signed state as a plain channel.
    pub fn from_consensus_channel(ledger: &ConsensusChannel) -> Result<Self> {
        let supported = ledger.supported_signed_state();
        let turn_num = supported.state().turn_num;
        let mut signed_state_for_turn_num = BTreeMap::new();
        signed_state_for_turn_num.insert(turn_num, supported);

        Ok(Self {
            id: ledger.id,
            my_index: ledger.my_index.index(),
            on_chain_funding: ledger.on_chain_funding.clone(),
            fixed_part: ledger.fixed_part().clone(),
            signed_state_for_turn_num,
            latest_supported_state_turn_num: Some(turn_num),
        })
    }

    /// The ordered participants.
    pub fn participants(&self) -> &[Address] {
        &self.fixed_part.participants
    }

    /// My address.
    pub fn my_address(&self) -> Address {
        self.fixed_part.participants[self.my_index]
    }

    /// My destination in allocations.
    pub fn my_destination(&self) -> Destination {
        Destination::from_address(self.my_address())
    }

    /// Every participant except me.
    pub fn counterparties(&self) -> Vec<Address> {
        self.participants()
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != self.my_index)
            .map(|(_, p)| *p)
            .collect()
    }

    fn signed_state_at(&self, turn_num: u64) -> Result<&SignedState> {
        self.signed_state_for_turn_num
            .get(&turn_num)
            .ok_or(ChannelError::UnexpectedTurnNum {
                expected: turn_num,
                got: self.latest_turn_num(),
            })
    }

    fn latest_turn_num(&self) -> u64 {
        self.signed_state_for_turn_num
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default()
    }

    /// The prefund state.
    pub fn pre_fund_state(&self) -> Result<State> {
        Ok(self.signed_state_at(PRE_FUND_TURN_NUM)?.state().clone())
    }

    /// The postfund state.
    pub fn post_fund_state(&self) -> Result<State> {
        Ok(self.signed_state_at(POST_FUND_TURN_NUM)?.state().clone())
    }

    /// The prefund state with its signatures.
    pub fn signed_pre_fund_state(&self) -> Result<SignedState> {
        self.signed_state_at(PRE_FUND_TURN_NUM).cloned()
    }

    /// The postfund state with its signatures.
    pub fn signed_post_fund_state(&self) -> Result<SignedState> {
        self.signed_state_at(POST_FUND_TURN_NUM).cloned()
    }

    fn signed_by_me(&self, turn_num: u64) -> bool {
        self.signed_state_for_turn_num
            .get(&turn_num)
            .is_some_and(|ss| ss.has_signature_for_participant(self.my_index))
    }

    fn fully_signed(&self, turn_num: u64) -> bool {
        self.signed_state_for_turn_num
            .get(&turn_num)
            .is_some_and(SignedState::has_all_signatures)
    }

    /// Whether I signed the prefund state.
    pub fn pre_fund_signed_by_me(&self) -> bool {
        self.signed_by_me(PRE_FUND_TURN_NUM)
    }

    /// Whether I signed the postfund state.
    pub fn post_fund_signed_by_me(&self) -> bool {
        self.signed_by_me(POST_FUND_TURN_NUM)
    }

    /// Whether every participant signed the prefund state.
    pub fn pre_fund_complete(&self) -> bool {
        self.fully_signed(PRE_FUND_TURN_NUM)
    }

    /// Whether every participant signed the postfund state.
    pub fn post_fund_complete(&self) -> bool {
        self.fully_signed(POST_FUND_TURN_NUM)
    }

    /// Whether I signed some final state.
    pub fn final_signed_by_me(&self) -> bool {
        self.signed_state_for_turn_num
            .values()
            .any(|ss| ss.state().is_final && ss.has_signature_for_participant(self.my_index))
    }

    /// Whether the latest supported state is final.
    pub fn final_completed(&self) -> bool {
        self.latest_supported_state()
            .is_ok_and(|state| state.is_final)
    }

    /// Whether some state has been signed by every participant.
    pub fn has_supported_state(&self) -> bool {
        self.latest_supported_state_turn_num.is_some()
    }

    /// The latest state signed by every participant.
    pub fn latest_supported_state(&self) -> Result<&State> {
        self.latest_supported_signed_state_ref().map(SignedState::state)
    }

    /// The latest state signed by every participant, with its signatures.
    pub fn latest_supported_signed_state(&self) -> Result<SignedState> {
        self.latest_supported_signed_state_ref().cloned()
    }

    fn latest_supported_signed_state_ref(&self) -> Result<&SignedState> {
        self.latest_supported_state_turn_num
            .and_then(|turn| self.signed_state_for_turn_num.get(&turn))
            .ok_or(ChannelError::NoSupportedState(self.id))
    }

    /// The state with the highest turn number, signed or not.
    pub fn latest_signed_state(&self) -> Result<SignedState> {
        self.signed_state_for_turn_num
            .values()
            .next_back()
            .cloned()
            .ok_or(ChannelError::NoSupportedState(self.id))
    }

    /// Total funds allocated by the prefund outcome, or by the supported state once there is one.
    pub fn total(&self) -> Funds {
        self.latest_supported_state()
            .map(|s| s.outcome.total_allocated())
            .or_else(|_| self.pre_fund_state().map(|s| s.outcome.total_allocated()))
            .unwrap_or_default()
    }

    /// Merges a signed state into the channel.
    ///
    /// Returns `Ok(false)` when the state belongs to another channel or is older than the
    /// latest supported state. Invalid signatures and conflicting states are errors.
    pub fn add_signed_state(&mut self, signed: &SignedState) -> Result<bool> {
        let state = signed.state();
        if state.channel_id() != self.id {
            return Ok(false);
        }
        if self
            .latest_supported_state_turn_num
            .is_some_and(|latest| state.turn_num < latest)
        {
            return Ok(false);
        }

        let turn_num = state.turn_num;
        let entry = match self.signed_state_for_turn_num.get(&turn_num) {
            Some(existing) => {
                let mut merged = existing.clone();
                merged.merge(signed)?;
                merged
            }
            None => {
                let mut fresh = SignedState::new(state.clone());
                fresh.merge(signed)?;
                fresh
            }
        };

        let supported = entry.has_all_signatures();
        self.signed_state_for_turn_num.insert(turn_num, entry);
        if supported
            && self
                .latest_supported_state_turn_num
                .map_or(true, |latest| turn_num >= latest)
        {
            self.latest_supported_state_turn_num = Some(turn_num);
        }
        Ok(true)
    }

    /// Signs `state` and stores the signature.
    pub fn sign_and_add_state(&mut self, state: State, secret_key: &SecretKey) -> Result<SignedState> {
        let turn_num = state.turn_num;
        let mut signed = SignedState::new(state);
        signed.sign(secret_key)?;
        if !self.add_signed_state(&signed)? {
            return Err(ChannelError::StateNotAdded(turn_num));
        }
        Ok(signed)
    }

    /// Signs and stores the prefund state.
    pub fn sign_and_add_prefund(&mut self, secret_key: &SecretKey) -> Result<SignedState> {
        let state = self.pre_fund_state()?;
        self.sign_and_add_state(state, secret_key)
    }

    /// Signs and stores the postfund state.
    pub fn sign_and_add_postfund(&mut self, secret_key: &SecretKey) -> Result<SignedState> {
        let state = self.post_fund_state()?;
        self.sign_and_add_state(state, secret_key)
    }
}
