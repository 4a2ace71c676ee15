//! Channel states and their signatures.

use crate::{ChannelError, Exit, Result};
use nitro_crypto::{SecretKey, Signature};
use nitro_types::{Address, Bytes32, ChannelId, Destination};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// The parts of a state that never change over a channel's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedPart {
    /// Ordered participants; a participant's index is its signing role.
    pub participants: Vec<Address>,
    /// Disambiguates channels between the same participants.
    pub channel_nonce: u64,
    /// Application rules contract.
    pub app_definition: Address,
    /// Seconds a challenge stays open on chain.
    pub challenge_duration: u32,
}

impl FixedPart {
    /// The channel id: SHA-256 over the encoded fixed part.
    pub fn channel_id(&self) -> ChannelId {
        let mut hasher = Sha256::new();
        hasher.update((self.participants.len() as u64).to_be_bytes());
        for participant in &self.participants {
            hasher.update(participant.as_bytes());
        }
        hasher.update(self.channel_nonce.to_be_bytes());
        hasher.update(self.app_definition.as_bytes());
        hasher.update(self.challenge_duration.to_be_bytes());
        Destination::from_bytes(hasher.finalize().into())
    }

    /// Checks the participant list can form a channel.
    pub fn validate(&self) -> Result<()> {
        if self.participants.len() < 2 {
            return Err(ChannelError::TooFewParticipants(self.participants.len()));
        }
        Ok(())
    }

    /// Index of `address` in the participant list.
    pub fn participant_index(&self, address: &Address) -> Option<usize> {
        self.participants.iter().position(|p| p == address)
    }
}

/// The parts of a state that may change turn by turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VariablePart {
    /// Application-specific data.
    pub app_data: Vec<u8>,
    /// Payout if the channel were finalized in this state.
    pub outcome: Exit,
    /// Position of this state in the channel's history.
    pub turn_num: u64,
    /// Whether this state concludes the channel.
    pub is_final: bool,
}

/// A complete channel state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Ordered participants.
    pub participants: Vec<Address>,
    /// Channel nonce.
    pub channel_nonce: u64,
    /// Application rules contract.
    pub app_definition: Address,
    /// Challenge duration in seconds.
    pub challenge_duration: u32,
    /// Application-specific data.
    #[serde(default)]
    pub app_data: Vec<u8>,
    /// Payout if finalized in this state.
    pub outcome: Exit,
    /// Position in the channel's history.
    pub turn_num: u64,
    /// Whether this state concludes the channel.
    pub is_final: bool,
}

impl State {
    /// Assembles a state from its fixed and variable parts.
    pub fn new(fixed: FixedPart, variable: VariablePart) -> Self {
        Self {
            participants: fixed.participants,
            channel_nonce: fixed.channel_nonce,
            app_definition: fixed.app_definition,
            challenge_duration: fixed.challenge_duration,
            app_data: variable.app_data,
            outcome: variable.outcome,
            turn_num: variable.turn_num,
            is_final: variable.is_final,
        }
    }

    /// The fixed part of this state.
    pub fn fixed_part(&self) -> FixedPart {
        FixedPart {
            participants: self.participants.clone(),
            channel_nonce: self.channel_nonce,
            app_definition: self.app_definition,
            challenge_duration: self.challenge_duration,
        }
    }

    /// The variable part of this state.
    pub fn variable_part(&self) -> VariablePart {
        VariablePart {
            app_data: self.app_data.clone(),
            outcome: self.outcome.clone(),
            turn_num: self.turn_num,
            is_final: self.is_final,
        }
    }

    /// The id of the channel this state belongs to.
    pub fn channel_id(&self) -> ChannelId {
        self.fixed_part().channel_id()
    }

    /// The digest participants sign.
    pub fn hash(&self) -> Bytes32 {
        let mut hasher = Sha256::new();
        hasher.update(self.channel_id().as_bytes());
        hasher.update((self.app_data.len() as u64).to_be_bytes());
        hasher.update(&self.app_data);
        self.outcome.encode_into(&mut hasher);
        hasher.update(self.turn_num.to_be_bytes());
        hasher.update([u8::from(self.is_final)]);
        hasher.finalize().into()
    }

    /// Signs this state.
    pub fn sign(&self, secret_key: &SecretKey) -> Signature {
        secret_key.sign_hash(&self.hash())
    }

    /// Recovers the address that produced `signature` over this state.
    pub fn recover_signer(&self, signature: &Signature) -> Result<Address> {
        Ok(signature.recover_signer(&self.hash())?)
    }
}

/// A state together with the participant signatures collected for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedState {
    state: State,
    sigs: BTreeMap<usize, Signature>,
}

impl SignedState {
    /// Wraps a state with no signatures.
    pub fn new(state: State) -> Self {
        Self {
            state,
            sigs: BTreeMap::new(),
        }
    }

    /// Wraps a state with signatures whose signers are already known to match their indices.
    pub(crate) fn with_verified_signatures(state: State, sigs: BTreeMap<usize, Signature>) -> Self {
        Self { state, sigs }
    }

    /// The signed state.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// The collected signatures by participant index.
    pub fn signatures(&self) -> &BTreeMap<usize, Signature> {
        &self.sigs
    }

    /// The signature of participant `index`, if collected.
    pub fn participant_signature(&self, index: usize) -> Option<Signature> {
        self.sigs.get(&index).copied()
    }

    /// Records a signature under the index of the participant who produced it.
    pub fn add_signature(&mut self, signature: Signature) -> Result<()> {
        let signer = self.state.recover_signer(&signature)?;
        let index = self
            .state
            .participants
            .iter()
            .position(|p| *p == signer)
            .ok_or(ChannelError::NonParticipantSigner(signer))?;
        self.sigs.insert(index, signature);
        Ok(())
    }

    /// Signs the state and records the signature.
    pub fn sign(&mut self, secret_key: &SecretKey) -> Result<()> {
        self.add_signature(self.state.sign(secret_key))
    }

    /// Whether participant `index` has signed.
    pub fn has_signature_for_participant(&self, index: usize) -> bool {
        self.sigs.contains_key(&index)
    }

    /// Whether every participant has signed.
    pub fn has_all_signatures(&self) -> bool {
        (0..self.state.participants.len()).all(|i| self.sigs.contains_key(&i))
    }

    /// Copies every signature of `other` into this state, re-verifying each one.
    pub fn merge(&mut self, other: &SignedState) -> Result<()> {
        if self.state.hash() != other.state.hash() {
            return Err(ChannelError::StateMismatch);
        }
        for signature in other.sigs.values() {
            self.add_signature(*signature)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Allocation, SingleAssetExit};
    use nitro_types::NATIVE_ASSET;
    use pretty_assertions::assert_eq;

    fn state(keys: &[SecretKey]) -> State {
        let participants: Vec<Address> = keys.iter().map(SecretKey::address).collect();
        let allocations = participants
            .iter()
            .map(|p| Allocation::simple(Destination::from_address(*p), 5))
            .collect();
        State {
            participants,
            channel_nonce: 1,
            app_definition: Address::ZERO,
            challenge_duration: 60,
            app_data: Vec::new(),
            outcome: Exit::new(vec![SingleAssetExit {
                asset: NATIVE_ASSET,
                allocations,
            }]),
            turn_num: 0,
            is_final: false,
        }
    }

    #[test]
    fn channel_id_depends_on_nonce() {
        let keys = [SecretKey::generate(), SecretKey::generate()];
        let a = state(&keys);
        let mut b = a.clone();
        b.channel_nonce = 2;
        assert_ne!(a.channel_id(), b.channel_id());
        assert_eq!(a.channel_id(), a.fixed_part().channel_id());
    }

    #[test]
    fn hash_covers_turn_and_finality() {
        let keys = [SecretKey::generate(), SecretKey::generate()];
        let a = state(&keys);
        let mut b = a.clone();
        b.turn_num = 1;
        assert_ne!(a.hash(), b.hash());
        let mut c = a.clone();
        c.is_final = true;
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn signatures_are_indexed_by_signer() {
        let keys = [SecretKey::generate(), SecretKey::generate()];
        let mut ss = SignedState::new(state(&keys));
        ss.sign(&keys[1]).unwrap();
        assert!(ss.has_signature_for_participant(1));
        assert!(!ss.has_signature_for_participant(0));
        assert!(!ss.has_all_signatures());
        ss.sign(&keys[0]).unwrap();
        assert!(ss.has_all_signatures());
    }

    #[test]
    fn rejects_non_participant_signer() {
        let keys = [SecretKey::generate(), SecretKey::generate()];
        let outsider = SecretKey::generate();
        let mut ss = SignedState::new(state(&keys));
        assert_eq!(
            ss.sign(&outsider),
            Err(ChannelError::NonParticipantSigner(outsider.address()))
        );
        assert!(ss.signatures().is_empty());
    }

    #[test]
    fn merge_requires_equal_states() {
        let keys = [SecretKey::generate(), SecretKey::generate()];
        let mut ours = SignedState::new(state(&keys));
        let mut theirs = ours.clone();
        theirs.sign(&keys[1]).unwrap();
        ours.merge(&theirs).unwrap();
        assert!(ours.has_signature_for_participant(1));

        let mut other = state(&keys);
        other.turn_num = 3;
        let other = SignedState::new(other);
        assert_eq!(ours.merge(&other), Err(ChannelError::StateMismatch));
    }
}
