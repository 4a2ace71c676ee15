use nitro_channel::{
    Allocation, Balance, ConsensusChannel, Exit, FixedPart, LedgerOutcome, SingleAssetExit, State,
    VariablePart, Vars,
};
use nitro_crypto::SecretKey;
use nitro_types::{Address, Amount, Destination, NATIVE_ASSET};

pub struct Actor {
    pub key: SecretKey,
    pub address: Address,
}

impl Actor {
    pub fn new() -> Self {
        let key = SecretKey::generate();
        Self {
            address: key.address(),
            key,
        }
    }

    pub fn destination(&self) -> Destination {
        Destination::from_address(self.address)
    }
}

pub fn simple_outcome(allocations: &[(Destination, Amount)]) -> Exit {
    Exit::new(vec![SingleAssetExit {
        asset: NATIVE_ASSET,
        allocations: allocations
            .iter()
            .map(|(destination, amount)| Allocation::simple(*destination, *amount))
            .collect(),
    }])
}

pub fn prefund(participants: &[Address], outcome: Exit, nonce: u64) -> State {
    State::new(
        FixedPart {
            participants: participants.to_vec(),
            channel_nonce: nonce,
            app_definition: Address::ZERO,
            challenge_duration: 60,
        },
        VariablePart {
            app_data: vec![],
            outcome,
            turn_num: 0,
            is_final: false,
        },
    )
}

/// Both views of a funded ledger between `leader` and `follower`.
pub fn ledger_pair(
    leader: &Actor,
    follower: &Actor,
    leader_amount: Amount,
    follower_amount: Amount,
) -> (ConsensusChannel, ConsensusChannel) {
    let fixed_part = FixedPart {
        participants: vec![leader.address, follower.address],
        channel_nonce: 0,
        app_definition: Address::ZERO,
        challenge_duration: 60,
    };
    let outcome = LedgerOutcome::new(
        NATIVE_ASSET,
        Balance {
            destination: leader.destination(),
            amount: leader_amount,
        },
        Balance {
            destination: follower.destination(),
            amount: follower_amount,
        },
        vec![],
    );
    let vars = Vars {
        turn_num: 1,
        outcome: outcome.clone(),
    };
    let state = vars.as_state(&fixed_part);
    let signatures = [state.sign(&leader.key), state.sign(&follower.key)];
    let lead =
        ConsensusChannel::new_leader_channel(fixed_part.clone(), 1, outcome.clone(), signatures)
            .unwrap();
    let follow =
        ConsensusChannel::new_follower_channel(fixed_part, 1, outcome, signatures).unwrap();
    (lead, follow)
}

/// Runs `proposal` through propose, countersign and commit.
pub fn commit(
    leader: &mut ConsensusChannel,
    follower: &mut ConsensusChannel,
    leader_key: &SecretKey,
    follower_key: &SecretKey,
    proposal: nitro_channel::Proposal,
) {
    let signed = leader.propose(proposal.clone(), leader_key).unwrap();
    follower.receive(signed).unwrap();
    let countersigned = follower.sign_next_proposal(&proposal, follower_key).unwrap();
    leader.receive(countersigned).unwrap();
}
