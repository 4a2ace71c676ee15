//! Events the engine publishes to API subscribers.

use nitro_channel::{Channel, ConsensusChannel, LedgerIndex};
use nitro_protocols::{ObjectiveId, Voucher};
use nitro_types::{Address, Amount, ChannelId, Destination, NATIVE_ASSET};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of a ledger or payment channel as seen by API clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    /// Being funded.
    Opening,
    /// Funded and usable.
    Open,
    /// Being defunded.
    Closing,
    /// Defunded.
    Complete,
}

/// A ledger channel's balances from my point of view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerChannelInfo {
    /// The ledger.
    pub id: ChannelId,
    /// Its lifecycle stage.
    pub status: ChannelStatus,
    /// The asset it holds.
    pub asset: Address,
    /// My address.
    pub me: Address,
    /// The counterparty.
    pub them: Address,
    /// What I would receive on payout.
    pub my_balance: Amount,
    /// What the counterparty would receive on payout.
    pub their_balance: Amount,
}

/// A virtual channel's payment progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentChannelInfo {
    /// The virtual channel.
    pub id: ChannelId,
    /// Its lifecycle stage.
    pub status: ChannelStatus,
    /// The payer.
    pub payer: Address,
    /// The payee.
    pub payee: Address,
    /// Cumulative amount paid.
    pub paid_so_far: Amount,
    /// What the payer can still pay.
    pub remaining: Amount,
}

/// What changed in one engine step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineEvent {
    /// Objectives that finished.
    pub completed_objectives: Vec<ObjectiveId>,
    /// Objectives that were rejected.
    pub failed_objectives: Vec<ObjectiveId>,
    /// Vouchers accepted from payers.
    pub received_vouchers: Vec<Voucher>,
    /// Ledger channels whose state changed.
    pub ledger_channel_updates: Vec<LedgerChannelInfo>,
    /// Payment channels whose state changed.
    pub payment_channel_updates: Vec<PaymentChannelInfo>,
}

impl EngineEvent {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.completed_objectives.is_empty()
            && self.failed_objectives.is_empty()
            && self.received_vouchers.is_empty()
            && self.ledger_channel_updates.is_empty()
            && self.payment_channel_updates.is_empty()
    }

    /// Appends `other`.
    pub fn merge(&mut self, other: EngineEvent) {
        self.completed_objectives.extend(other.completed_objectives);
        self.failed_objectives.extend(other.failed_objectives);
        self.received_vouchers.extend(other.received_vouchers);
        self.ledger_channel_updates
            .extend(other.ledger_channel_updates);
        self.payment_channel_updates
            .extend(other.payment_channel_updates);
    }
}

/// Balances of a two-party channel that has not become a ledger yet.
pub(crate) fn ledger_info_from_channel(channel: &Channel, status: ChannelStatus) -> LedgerChannelInfo {
    let outcome = channel
        .latest_supported_state()
        .map(|s| s.outcome.clone())
        .or_else(|_| channel.pre_fund_state().map(|s| s.outcome))
        .unwrap_or_default();
    let exit = outcome.iter().next();
    let my_balance = exit.map_or(0, |e| e.total_allocated_for(&channel.my_destination()));
    let total = exit.map_or(0, |e| e.total_allocated());

    LedgerChannelInfo {
        id: channel.id,
        status,
        asset: exit.map_or(NATIVE_ASSET, |e| e.asset),
        me: channel.my_address(),
        them: channel.counterparties().first().copied().unwrap_or_default(),
        my_balance,
        their_balance: total.saturating_sub(my_balance),
    }
}

/// Balances of a ledger channel's committed state.
pub(crate) fn ledger_info_from_consensus(ledger: &ConsensusChannel) -> LedgerChannelInfo {
    let outcome = &ledger.consensus_vars().outcome;
    let (mine, theirs) = match ledger.my_index {
        LedgerIndex::Leader => (&outcome.leader, &outcome.follower),
        LedgerIndex::Follower => (&outcome.follower, &outcome.leader),
    };
    LedgerChannelInfo {
        id: ledger.id,
        status: ChannelStatus::Open,
        asset: outcome.asset,
        me: ledger.my_address(),
        them: ledger.counterparty(),
        my_balance: mine.amount,
        their_balance: theirs.amount,
    }
}

/// Payment progress of a virtual channel, measured against the payer's initial allocation.
pub(crate) fn payment_info(channel: &Channel, status: ChannelStatus, paid: Amount) -> PaymentChannelInfo {
    let participants = channel.participants();
    let payer = participants.first().copied().unwrap_or_default();
    let payee = participants.last().copied().unwrap_or_default();
    let deposit = channel
        .pre_fund_state()
        .ok()
        .and_then(|s| {
            s.outcome
                .iter()
                .next()
                .map(|e| e.total_allocated_for(&Destination::from_address(payer)))
        })
        .unwrap_or_default();

    PaymentChannelInfo {
        id: channel.id,
        status,
        payer,
        payee,
        paid_so_far: paid,
        remaining: deposit.saturating_sub(paid),
    }
}

/// Remembers what was last published per channel so only changes are reported.
#[derive(Debug, Default)]
pub(crate) struct Notifier {
    ledgers: HashMap<ChannelId, LedgerChannelInfo>,
    payments: HashMap<ChannelId, PaymentChannelInfo>,
}

impl Notifier {
    pub(crate) fn ledger(&mut self, info: LedgerChannelInfo, event: &mut EngineEvent) {
        if self.ledgers.get(&info.id) != Some(&info) {
            self.ledgers.insert(info.id, info.clone());
            event.ledger_channel_updates.push(info);
        }
    }

    pub(crate) fn payment(&mut self, info: PaymentChannelInfo, event: &mut EngineEvent) {
        if self.payments.get(&info.id) != Some(&info) {
            self.payments.insert(info.id, info.clone());
            event.payment_channel_updates.push(info);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn info(my_balance: Amount) -> LedgerChannelInfo {
        LedgerChannelInfo {
            id: ChannelId::from_bytes([1; 32]),
            status: ChannelStatus::Open,
            asset: NATIVE_ASSET,
            me: Address::from_bytes([1; 20]),
            them: Address::from_bytes([2; 20]),
            my_balance,
            their_balance: 5,
        }
    }

    #[test]
    fn notifier_reports_only_changes() {
        let mut notifier = Notifier::default();
        let mut event = EngineEvent::default();
        notifier.ledger(info(5), &mut event);
        notifier.ledger(info(5), &mut event);
        assert_eq!(event.ledger_channel_updates, vec![info(5)]);

        notifier.ledger(info(3), &mut event);
        assert_eq!(event.ledger_channel_updates, vec![info(5), info(3)]);
    }

    #[test]
    fn merge_and_emptiness() {
        let mut event = EngineEvent::default();
        assert!(event.is_empty());
        event.merge(EngineEvent {
            completed_objectives: vec![ObjectiveId::from("DirectFunding-0x01".to_string())],
            ..EngineEvent::default()
        });
        assert!(!event.is_empty());
        assert_eq!(event.completed_objectives.len(), 1);
    }
}
