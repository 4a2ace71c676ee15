//! Messages exchanged between nodes.

use crate::{ObjectiveId, Voucher};
use nitro_channel::{SignedProposal, SignedState};
use nitro_types::Address;
use serde::{Deserialize, Serialize};

/// A signed state addressed to a particular objective.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectivePayload {
    /// Objective the state belongs to.
    pub objective_id: ObjectiveId,
    /// The state with whatever signatures the sender holds.
    pub signed_state: SignedState,
}

/// A bundle of protocol traffic from one node to another.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Recipient.
    pub to: Address,
    /// Sender.
    pub from: Address,
    /// Signed states for objectives.
    #[serde(default)]
    pub objective_payloads: Vec<ObjectivePayload>,
    /// Ledger proposals and countersignatures.
    #[serde(default)]
    pub ledger_proposals: Vec<SignedProposal>,
    /// Payment vouchers.
    #[serde(default)]
    pub payments: Vec<Voucher>,
    /// Objectives the sender rejected.
    #[serde(default)]
    pub rejected_objectives: Vec<ObjectiveId>,
}

impl Message {
    /// An empty message.
    pub fn new(from: Address, to: Address) -> Self {
        Self {
            to,
            from,
            ..Self::default()
        }
    }

    /// One message per participant other than `my_index`, each carrying `signed_state`.
    pub fn for_signed_state(
        objective_id: &ObjectiveId,
        signed_state: &SignedState,
        my_index: usize,
    ) -> Vec<Self> {
        let participants = &signed_state.state().participants;
        let Some(&from) = participants.get(my_index) else {
            return Vec::new();
        };
        participants
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != my_index)
            .map(|(_, to)| Self {
                objective_payloads: vec![ObjectivePayload {
                    objective_id: objective_id.clone(),
                    signed_state: signed_state.clone(),
                }],
                ..Self::new(from, *to)
            })
            .collect()
    }

    /// A message carrying one ledger proposal.
    pub fn for_proposal(from: Address, to: Address, proposal: SignedProposal) -> Self {
        Self {
            ledger_proposals: vec![proposal],
            ..Self::new(from, to)
        }
    }

    /// A message carrying one voucher.
    pub fn for_voucher(from: Address, to: Address, voucher: Voucher) -> Self {
        Self {
            payments: vec![voucher],
            ..Self::new(from, to)
        }
    }

    /// Rejection notices for `objective_id`, one per recipient.
    pub fn rejection_notices(objective_id: &ObjectiveId, from: Address, to: &[Address]) -> Vec<Self> {
        to.iter()
            .map(|recipient| Self {
                rejected_objectives: vec![objective_id.clone()],
                ..Self::new(from, *recipient)
            })
            .collect()
    }

    /// Whether the message carries nothing.
    pub fn is_empty(&self) -> bool {
        self.objective_payloads.is_empty()
            && self.ledger_proposals.is_empty()
            && self.payments.is_empty()
            && self.rejected_objectives.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nitro_channel::{Exit, FixedPart, State, VariablePart};
    use nitro_crypto::SecretKey;
    use pretty_assertions::assert_eq;

    #[test]
    fn signed_state_goes_to_every_other_participant() {
        let keys: Vec<SecretKey> = (0..3).map(|_| SecretKey::generate()).collect();
        let participants: Vec<Address> = keys.iter().map(SecretKey::address).collect();
        let state = State::new(
            FixedPart {
                participants: participants.clone(),
                channel_nonce: 9,
                app_definition: Address::ZERO,
                challenge_duration: 10,
            },
            VariablePart {
                app_data: vec![],
                outcome: Exit::default(),
                turn_num: 0,
                is_final: false,
            },
        );
        let mut signed = SignedState::new(state);
        signed.sign(&keys[1]).unwrap();
        let id = ObjectiveId::from("VirtualFund-test".to_string());

        let messages = Message::for_signed_state(&id, &signed, 1);
        let recipients: Vec<Address> = messages.iter().map(|m| m.to).collect();
        assert_eq!(recipients, vec![participants[0], participants[2]]);
        assert!(messages.iter().all(|m| m.from == participants[1]));
        assert_eq!(messages[0].objective_payloads[0].objective_id, id);
    }

    #[test]
    fn message_json_omits_nothing() {
        let msg = Message::rejection_notices(
            &ObjectiveId::from("DirectFunding-x".to_string()),
            Address::from_bytes([1; 20]),
            &[Address::from_bytes([2; 20])],
        )
        .remove(0);
        let json = serde_json::to_string(&msg).unwrap();
        let back: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
        assert!(!back.is_empty());
    }
}
