//! In-memory store.

use crate::{Result, Store, StoreError};
use nitro_channel::{Channel, ConsensusChannel};
use nitro_crypto::SecretKey;
use nitro_protocols::{Objective, ObjectiveId};
use nitro_types::{Address, ChannelId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A [`Store`] that keeps everything in memory.
pub struct MemStore {
    secret_key: SecretKey,
    address: Address,
    objectives: RwLock<HashMap<ObjectiveId, Objective>>,
    channel_owners: RwLock<HashMap<ChannelId, ObjectiveId>>,
    channels: RwLock<HashMap<ChannelId, Channel>>,
    ledgers: RwLock<HashMap<ChannelId, ConsensusChannel>>,
}

impl MemStore {
    /// Creates an empty store for the node holding `secret_key`.
    pub fn new(secret_key: SecretKey) -> Self {
        Self {
            address: secret_key.address(),
            secret_key,
            objectives: RwLock::new(HashMap::new()),
            channel_owners: RwLock::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            ledgers: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored objectives.
    pub fn objective_count(&self) -> usize {
        self.objectives.read().len()
    }

    fn rehydrate(&self, mut objective: Objective) -> Objective {
        let fresh: Vec<ConsensusChannel> = {
            let ledgers = self.ledgers.read();
            objective
                .ledgers()
                .iter()
                .filter_map(|l| ledgers.get(&l.id).cloned())
                .collect()
        };
        for ledger in &fresh {
            objective.refresh_ledger(ledger);
        }
        objective
    }
}

impl std::fmt::Debug for MemStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemStore")
            .field("address", &self.address)
            .field("objectives", &self.objectives.read().len())
            .field("channels", &self.channels.read().len())
            .field("ledgers", &self.ledgers.read().len())
            .finish()
    }
}

impl Store for MemStore {
    fn address(&self) -> Address {
        self.address
    }

    fn channel_secret_key(&self) -> SecretKey {
        self.secret_key.clone()
    }

    fn get_objective_by_id(&self, id: &ObjectiveId) -> Result<Option<Objective>> {
        let objective = self.objectives.read().get(id).cloned();
        Ok(objective.map(|o| self.rehydrate(o)))
    }

    fn set_objective(&self, objective: &Objective) -> Result<()> {
        let id = objective.id();
        let channel = objective.owned_channel();

        if !objective.status().is_terminal() {
            let mut owners = self.channel_owners.write();
            match owners.get(&channel.id) {
                Some(owner) if *owner != id => {
                    return Err(StoreError::ChannelOwnedByOther {
                        channel: channel.id,
                        owner: owner.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    tracing::debug!(objective = %id, channel = %channel.id, "claimed channel");
                    owners.insert(channel.id, id.clone());
                }
            }
        }

        self.channels.write().insert(channel.id, channel.clone());
        {
            // Only live ledgers are written back; a destroyed one stays gone.
            let mut ledgers = self.ledgers.write();
            for ledger in objective.ledgers() {
                if let Some(stored) = ledgers.get_mut(&ledger.id) {
                    *stored = ledger.clone();
                }
            }
        }
        self.objectives.write().insert(id, objective.clone());
        Ok(())
    }

    fn get_objective_by_channel_id(&self, channel_id: &ChannelId) -> Result<Option<Objective>> {
        let owner = self.channel_owners.read().get(channel_id).cloned();
        match owner {
            Some(id) => self.get_objective_by_id(&id),
            None => Ok(None),
        }
    }

    fn release_channel_from_ownership(&self, channel_id: &ChannelId) -> Result<()> {
        if let Some(owner) = self.channel_owners.write().remove(channel_id) {
            tracing::debug!(objective = %owner, channel = %channel_id, "released channel");
        }
        Ok(())
    }

    fn get_channel_by_id(&self, id: &ChannelId) -> Result<Option<Channel>> {
        Ok(self.channels.read().get(id).cloned())
    }

    fn set_channel(&self, channel: &Channel) -> Result<()> {
        self.channels.write().insert(channel.id, channel.clone());
        Ok(())
    }

    fn destroy_channel(&self, id: &ChannelId) -> Result<()> {
        self.channels.write().remove(id);
        Ok(())
    }

    fn get_consensus_channel_by_id(&self, id: &ChannelId) -> Result<Option<ConsensusChannel>> {
        Ok(self.ledgers.read().get(id).cloned())
    }

    fn get_consensus_channel(&self, counterparty: &Address) -> Result<Option<ConsensusChannel>> {
        Ok(self
            .ledgers
            .read()
            .values()
            .find(|l| l.counterparty() == *counterparty)
            .cloned())
    }

    fn set_consensus_channel(&self, ledger: &ConsensusChannel) -> Result<()> {
        self.ledgers.write().insert(ledger.id, ledger.clone());
        Ok(())
    }

    fn destroy_consensus_channel(&self, id: &ChannelId) -> Result<()> {
        self.ledgers.write().remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nitro_channel::{
        Add, Allocation, Balance, Exit, FixedPart, Guarantee, LedgerOutcome, Proposal,
        SingleAssetExit, State, VariablePart, Vars,
    };
    use nitro_protocols::{
        DirectDefundObjective, DirectFundObjective, VirtualFundObjective, VirtualFundRequest,
    };
    use nitro_types::{Destination, NATIVE_ASSET};
    use pretty_assertions::assert_eq;

    fn outcome(allocations: &[(Address, u128)]) -> Exit {
        Exit::new(vec![SingleAssetExit {
            asset: NATIVE_ASSET,
            allocations: allocations
                .iter()
                .map(|(a, amount)| Allocation::simple(Destination::from_address(*a), *amount))
                .collect(),
        }])
    }

    fn direct_fund(me: &SecretKey, other: Address, nonce: u64) -> Objective {
        let state = State::new(
            FixedPart {
                participants: vec![me.address(), other],
                channel_nonce: nonce,
                app_definition: Address::ZERO,
                challenge_duration: 60,
            },
            VariablePart {
                app_data: vec![],
                outcome: outcome(&[(me.address(), 5), (other, 5)]),
                turn_num: 0,
                is_final: false,
            },
        );
        Objective::DirectFund(DirectFundObjective::new(state, true, me.address()).unwrap())
    }

    fn ledger(leader: &SecretKey, follower: &SecretKey) -> ConsensusChannel {
        let fixed_part = FixedPart {
            participants: vec![leader.address(), follower.address()],
            channel_nonce: 0,
            app_definition: Address::ZERO,
            challenge_duration: 60,
        };
        let outcome = LedgerOutcome::new(
            NATIVE_ASSET,
            Balance {
                destination: Destination::from_address(leader.address()),
                amount: 10,
            },
            Balance {
                destination: Destination::from_address(follower.address()),
                amount: 10,
            },
            vec![],
        );
        let state = Vars {
            turn_num: 1,
            outcome: outcome.clone(),
        }
        .as_state(&fixed_part);
        let signatures = [state.sign(leader), state.sign(follower)];
        ConsensusChannel::new_leader_channel(fixed_part, 1, outcome, signatures).unwrap()
    }

    #[test]
    fn objective_claims_its_channel() {
        let me = SecretKey::generate();
        let store = MemStore::new(me.clone());
        let other = SecretKey::generate().address();
        let objective = direct_fund(&me, other, 1);
        let channel_id = objective.owned_channel().id;

        store.set_objective(&objective).unwrap();
        assert_eq!(
            store.get_objective_by_channel_id(&channel_id).unwrap(),
            Some(objective.clone())
        );
        assert_eq!(
            store.get_channel_by_id(&channel_id).unwrap().as_ref(),
            Some(objective.owned_channel())
        );
        assert_eq!(store.address(), me.address());
    }

    #[test]
    fn second_owner_is_refused_until_release() {
        let me = SecretKey::generate();
        let them = SecretKey::generate();
        let store = MemStore::new(me.clone());
        let fund = direct_fund(&me, them.address(), 0);
        let channel_id = fund.owned_channel().id;
        store.set_objective(&fund).unwrap();

        let defund = Objective::DirectDefund(
            DirectDefundObjective::new(true, &ledger(&me, &them), false).unwrap(),
        );
        assert_eq!(defund.owned_channel().id, channel_id);
        assert_eq!(
            store.set_objective(&defund),
            Err(StoreError::ChannelOwnedByOther {
                channel: channel_id,
                owner: fund.id(),
            })
        );

        // The owner may save itself again.
        store.set_objective(&fund).unwrap();
        store.release_channel_from_ownership(&channel_id).unwrap();
        store.set_objective(&defund).unwrap();
        assert_eq!(
            store
                .get_objective_by_channel_id(&channel_id)
                .unwrap()
                .map(|o| o.id()),
            Some(defund.id())
        );
    }

    #[test]
    fn terminal_objectives_do_not_claim() {
        let me = SecretKey::generate();
        let store = MemStore::new(me.clone());
        let mut fund = direct_fund(&me, SecretKey::generate().address(), 2);
        fund.reject();
        store.set_objective(&fund).unwrap();
        assert_eq!(
            store
                .get_objective_by_channel_id(&fund.owned_channel().id)
                .unwrap(),
            None
        );
        assert_eq!(store.objective_count(), 1);
    }

    #[test]
    fn ledgers_are_found_by_counterparty() {
        let me = SecretKey::generate();
        let them = SecretKey::generate();
        let store = MemStore::new(me.clone());
        let l = ledger(&me, &them);
        store.set_consensus_channel(&l).unwrap();
        assert_eq!(
            store.get_consensus_channel(&them.address()).unwrap(),
            Some(l.clone())
        );
        assert_eq!(store.get_consensus_channel(&me.address()).unwrap(), None);
        store.destroy_consensus_channel(&l.id).unwrap();
        assert_eq!(store.get_consensus_channel_by_id(&l.id).unwrap(), None);
    }

    #[test]
    fn objectives_see_latest_ledger() {
        let alice = SecretKey::generate();
        let irene = SecretKey::generate();
        let bob = SecretKey::generate();
        let store = MemStore::new(alice.clone());
        let l = ledger(&alice, &irene);

        let request = VirtualFundRequest {
            intermediaries: vec![irene.address()],
            counterparty: bob.address(),
            challenge_duration: 60,
            outcome: outcome(&[(alice.address(), 2), (bob.address(), 0)]),
            nonce: 4,
            app_definition: Address::ZERO,
        };
        let objective = Objective::VirtualFund(
            VirtualFundObjective::from_request(&request, alice.address(), |_| Some(l.clone()))
                .unwrap(),
        );
        store.set_consensus_channel(&l).unwrap();
        store.set_objective(&objective).unwrap();

        // Another objective's update lands in the shared ledger.
        let mut shared = store.get_consensus_channel_by_id(&l.id).unwrap().unwrap();
        let proposal = Proposal::add(
            shared.id,
            Add {
                guarantee: Guarantee {
                    amount: 2,
                    target: Destination::from_bytes([6; 32]),
                    left: Destination::from_address(alice.address()),
                    right: Destination::from_address(irene.address()),
                },
                left_deposit: 1,
                right_deposit: 1,
            },
        );
        shared.propose(proposal, &alice).unwrap();
        store.set_consensus_channel(&shared).unwrap();

        let reloaded = store.get_objective_by_id(&objective.id()).unwrap().unwrap();
        assert_eq!(reloaded.ledgers(), vec![&shared]);
    }

    #[test]
    fn saving_an_objective_does_not_restore_a_destroyed_ledger() {
        let alice = SecretKey::generate();
        let irene = SecretKey::generate();
        let bob = SecretKey::generate();
        let store = MemStore::new(alice.clone());
        let l = ledger(&alice, &irene);
        store.set_consensus_channel(&l).unwrap();

        let request = VirtualFundRequest {
            intermediaries: vec![irene.address()],
            counterparty: bob.address(),
            challenge_duration: 60,
            outcome: outcome(&[(alice.address(), 2), (bob.address(), 0)]),
            nonce: 5,
            app_definition: Address::ZERO,
        };
        let objective = Objective::VirtualFund(
            VirtualFundObjective::from_request(&request, alice.address(), |_| Some(l.clone()))
                .unwrap(),
        );
        store.set_objective(&objective).unwrap();
        assert_eq!(store.get_consensus_channel_by_id(&l.id).unwrap(), Some(l.clone()));

        store.destroy_consensus_channel(&l.id).unwrap();
        let reloaded = store.get_objective_by_id(&objective.id()).unwrap().unwrap();
        store.set_objective(&reloaded).unwrap();

        assert_eq!(store.get_consensus_channel_by_id(&l.id).unwrap(), None);
        assert_eq!(store.get_consensus_channel(&irene.address()).unwrap(), None);
    }
}
