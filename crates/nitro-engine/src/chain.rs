//! The adjudicator interface and an in-memory adjudicator.

use crate::error::ChainError;
use async_trait::async_trait;
use nitro_channel::{AllocationType, SignedState};
use nitro_protocols::{ChainEvent, ChainTransaction};
use nitro_types::{Address, Amount, ChannelId, Destination, Funds};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::broadcast;

/// Submits transactions to the adjudicator and reports what it emits.
#[async_trait]
pub trait ChainService: Send + Sync {
    /// Submits a transaction and waits until it is accepted.
    async fn send_transaction(&self, tx: ChainTransaction) -> Result<(), ChainError>;

    /// A fresh subscription to every event the adjudicator emits.
    fn event_feed(&self) -> broadcast::Receiver<ChainEvent>;
}

#[derive(Default)]
struct ChainState {
    block_num: u64,
    holdings: HashMap<ChannelId, Funds>,
    challenges: HashMap<ChannelId, SignedState>,
    concluded: HashSet<ChannelId>,
    payouts: HashMap<Destination, Funds>,
}

impl ChainState {
    fn next_block(&mut self) -> u64 {
        self.block_num += 1;
        self.block_num
    }
}

/// An in-memory adjudicator shared by every node of a test network.
///
/// Each accepted transaction mines its events into new blocks and broadcasts
/// them to every subscriber.
pub struct MockChain {
    state: Mutex<ChainState>,
    events: broadcast::Sender<ChainEvent>,
}

impl MockChain {
    /// Creates a chain whose subscribers buffer up to `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            state: Mutex::new(ChainState::default()),
            events,
        }
    }

    /// Current holding of `asset` in `channel_id`.
    pub fn holdings(&self, channel_id: &ChannelId, asset: &Address) -> Amount {
        self.state
            .lock()
            .holdings
            .get(channel_id)
            .map_or(0, |funds| funds.get(asset))
    }

    /// Total paid out to `destination` across every withdrawal.
    pub fn balance_of(&self, destination: &Destination, asset: &Address) -> Amount {
        self.state
            .lock()
            .payouts
            .get(destination)
            .map_or(0, |funds| funds.get(asset))
    }

    /// Lets the challenge on `channel_id` time out, finalizing its candidate state.
    pub fn expire_challenge(&self, channel_id: &ChannelId) -> Result<(), ChainError> {
        let mut state = self.state.lock();
        if state.challenges.remove(channel_id).is_none() {
            return Err(ChainError::NoChallenge(*channel_id));
        }
        state.concluded.insert(*channel_id);
        let block_num = state.next_block();
        tracing::debug!(channel = %channel_id, block_num, "challenge expired");
        self.emit(ChainEvent::Concluded {
            channel_id: *channel_id,
            block_num,
        });
        Ok(())
    }

    fn emit(&self, event: ChainEvent) {
        // Nobody listening is not an error for a chain.
        let _ = self.events.send(event);
    }

    fn deposit(&self, channel_id: ChannelId, deposit: &Funds) {
        let mut state = self.state.lock();
        for (asset, amount) in deposit.iter() {
            let holdings = state.holdings.entry(channel_id).or_default();
            holdings.add(*asset, *amount);
            let now_held = holdings.get(asset);
            let block_num = state.next_block();
            tracing::debug!(channel = %channel_id, %asset, amount, now_held, block_num, "deposited");
            self.emit(ChainEvent::Deposited {
                channel_id,
                block_num,
                asset: *asset,
                now_held,
            });
        }
    }

    fn withdraw_all(&self, channel_id: ChannelId, signed: &SignedState) -> Result<(), ChainError> {
        let mut state = self.state.lock();
        let finalized = signed.state().is_final || state.concluded.contains(&channel_id);
        if !finalized {
            return Err(ChainError::InvalidTransaction {
                channel: channel_id,
                reason: "state is not final and the channel is not concluded".into(),
            });
        }
        if !signed.has_all_signatures() {
            return Err(ChainError::InvalidTransaction {
                channel: channel_id,
                reason: "state is not fully signed".into(),
            });
        }

        let holdings = state.holdings.remove(&channel_id).unwrap_or_default();
        for exit in signed.state().outcome.iter() {
            let mut remaining = holdings.get(&exit.asset);
            for allocation in &exit.allocations {
                if allocation.allocation_type != AllocationType::Simple {
                    continue;
                }
                let paid = allocation.amount.min(remaining);
                remaining -= paid;
                state
                    .payouts
                    .entry(allocation.destination)
                    .or_default()
                    .add(exit.asset, paid);
            }
        }
        for (asset, _) in holdings.iter() {
            let block_num = state.next_block();
            self.emit(ChainEvent::AllocationUpdated {
                channel_id,
                block_num,
                asset: *asset,
                amount: 0,
            });
        }
        if state.concluded.insert(channel_id) {
            let block_num = state.next_block();
            self.emit(ChainEvent::Concluded {
                channel_id,
                block_num,
            });
        }
        tracing::debug!(channel = %channel_id, "withdrew all");
        Ok(())
    }

    fn challenge(&self, channel_id: ChannelId, candidate: SignedState) -> Result<(), ChainError> {
        if !candidate.has_all_signatures() {
            return Err(ChainError::InvalidTransaction {
                channel: channel_id,
                reason: "challenge candidate is not supported".into(),
            });
        }
        let mut state = self.state.lock();
        state.challenges.insert(channel_id, candidate.clone());
        let block_num = state.next_block();
        tracing::debug!(channel = %channel_id, block_num, "challenge registered");
        self.emit(ChainEvent::ChallengeRegistered {
            channel_id,
            block_num,
            candidate,
        });
        Ok(())
    }
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for MockChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockChain")
            .field("block_num", &self.state.lock().block_num)
            .finish()
    }
}

#[async_trait]
impl ChainService for MockChain {
    async fn send_transaction(&self, tx: ChainTransaction) -> Result<(), ChainError> {
        match tx {
            ChainTransaction::Deposit {
                channel_id,
                deposit,
            } => {
                self.deposit(channel_id, &deposit);
                Ok(())
            }
            ChainTransaction::WithdrawAll {
                channel_id,
                signed_state,
            } => self.withdraw_all(channel_id, &signed_state),
            ChainTransaction::Challenge {
                channel_id,
                candidate,
            } => self.challenge(channel_id, candidate),
        }
    }

    fn event_feed(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }
}
