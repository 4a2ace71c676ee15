//! Ledger outcomes and the variables a ledger update changes.

use super::proposal::{Add, Proposal, ProposalKind, Remove};
use crate::error::ConsensusError;
use crate::outcome::{Allocation, AllocationType, Exit, GuaranteeMetadata, SingleAssetExit};
use crate::state::{FixedPart, State};
use nitro_crypto::Signature;
use nitro_types::{Address, Amount, ChannelId, Destination};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

type Result<T> = std::result::Result<T, ConsensusError>;

/// An amount owed to a ledger participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    /// The participant's destination.
    pub destination: Destination,
    /// The amount.
    pub amount: Amount,
}

/// Funds a ledger locks for a target channel, split between `left` and `right` on release.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guarantee {
    /// Total locked.
    pub amount: Amount,
    /// The channel being funded.
    pub target: ChannelId,
    /// Participant on the payer's side of the hop.
    pub left: Destination,
    /// Participant on the payee's side of the hop.
    pub right: Destination,
}

/// The outcome of a two-party ledger: both balances plus the guarantees it funds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerOutcome {
    /// The single asset the ledger holds.
    pub asset: Address,
    /// Leader's balance.
    pub leader: Balance,
    /// Follower's balance.
    pub follower: Balance,
    /// Guarantees keyed by target channel.
    pub guarantees: BTreeMap<ChannelId, Guarantee>,
}

impl LedgerOutcome {
    /// Creates an outcome.
    pub fn new(asset: Address, leader: Balance, follower: Balance, guarantees: Vec<Guarantee>) -> Self {
        Self {
            asset,
            leader,
            follower,
            guarantees: guarantees.into_iter().map(|g| (g.target, g)).collect(),
        }
    }

    /// Whether exactly `guarantee` is funded.
    pub fn includes(&self, guarantee: &Guarantee) -> bool {
        self.guarantees.get(&guarantee.target) == Some(guarantee)
    }

    /// Whether any guarantee funds `target`.
    pub fn includes_target(&self, target: &ChannelId) -> bool {
        self.guarantees.contains_key(target)
    }

    /// Balances plus guarantees; constant across every ledger update.
    pub fn total(&self) -> Amount {
        self.leader.amount
            + self.follower.amount
            + self.guarantees.values().map(|g| g.amount).sum::<Amount>()
    }

    /// Ordered allocations: leader, follower, then guarantees by target.
    pub fn as_exit(&self) -> Exit {
        let mut allocations = vec![
            Allocation::simple(self.leader.destination, self.leader.amount),
            Allocation::simple(self.follower.destination, self.follower.amount),
        ];
        allocations.extend(
            self.guarantees
                .values()
                .map(|g| Allocation::guarantee(g.target, g.amount, g.left, g.right)),
        );
        Exit::new(vec![SingleAssetExit {
            asset: self.asset,
            allocations,
        }])
    }

    /// Parses an exit laid out by [`LedgerOutcome::as_exit`].
    pub fn from_exit(exit: &Exit) -> Result<Self> {
        let [single] = exit.0.as_slice() else {
            return Err(ConsensusError::InvalidOutcome(format!(
                "a ledger holds exactly one asset, got {}",
                exit.len()
            )));
        };
        let [leader, follower, rest @ ..] = single.allocations.as_slice() else {
            return Err(ConsensusError::InvalidOutcome(
                "a ledger outcome needs leader and follower allocations".into(),
            ));
        };
        if leader.allocation_type != AllocationType::Simple
            || follower.allocation_type != AllocationType::Simple
        {
            return Err(ConsensusError::InvalidOutcome(
                "leader and follower allocations must be simple".into(),
            ));
        }

        let mut guarantees = Vec::with_capacity(rest.len());
        for allocation in rest {
            let metadata = (allocation.allocation_type == AllocationType::Guarantee)
                .then(|| GuaranteeMetadata::decode(&allocation.metadata))
                .flatten()
                .ok_or_else(|| {
                    ConsensusError::InvalidOutcome(format!(
                        "allocation to {} is not a guarantee",
                        allocation.destination
                    ))
                })?;
            guarantees.push(Guarantee {
                amount: allocation.amount,
                target: allocation.destination,
                left: metadata.left,
                right: metadata.right,
            });
        }

        Ok(Self::new(
            single.asset,
            Balance {
                destination: leader.destination,
                amount: leader.amount,
            },
            Balance {
                destination: follower.destination,
                amount: follower.amount,
            },
            guarantees,
        ))
    }

    /// Maps a guarantee's left/right parties onto (leader, follower) amounts.
    fn split(&self, guarantee: &Guarantee, left: Amount, right: Amount) -> Result<(Amount, Amount)> {
        if self.leader.destination == guarantee.left && self.follower.destination == guarantee.right {
            Ok((left, right))
        } else if self.follower.destination == guarantee.left
            && self.leader.destination == guarantee.right
        {
            Ok((right, left))
        } else if self.leader.destination != guarantee.left
            && self.follower.destination != guarantee.left
        {
            Err(ConsensusError::InvalidDestination(guarantee.left))
        } else {
            Err(ConsensusError::InvalidDestination(guarantee.right))
        }
    }
}

/// Turn number and outcome of a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vars {
    /// Turn number of the state these vars describe.
    pub turn_num: u64,
    /// The ledger outcome.
    pub outcome: LedgerOutcome,
}

impl Vars {
    /// Applies a proposal and advances the turn number. Leaves `self` untouched on error.
    pub fn handle_proposal(&mut self, proposal: &Proposal) -> Result<()> {
        match &proposal.kind {
            ProposalKind::Add(add) => self.add(add)?,
            ProposalKind::Remove(remove) => self.remove(remove)?,
        }
        self.turn_num += 1;
        Ok(())
    }

    fn add(&mut self, add: &Add) -> Result<()> {
        let guarantee = &add.guarantee;
        if self.outcome.includes_target(&guarantee.target) {
            return Err(ConsensusError::DuplicateGuarantee(guarantee.target));
        }
        if add.left_deposit.checked_add(add.right_deposit) != Some(guarantee.amount) {
            return Err(ConsensusError::InvalidAmount(guarantee.amount));
        }
        let (leader_deposit, follower_deposit) =
            self.outcome.split(guarantee, add.left_deposit, add.right_deposit)?;
        for (balance, required) in [
            (self.outcome.leader.amount, leader_deposit),
            (self.outcome.follower.amount, follower_deposit),
        ] {
            if balance < required {
                return Err(ConsensusError::InsufficientFunds { balance, required });
            }
        }

        self.outcome.leader.amount -= leader_deposit;
        self.outcome.follower.amount -= follower_deposit;
        self.outcome.guarantees.insert(guarantee.target, *guarantee);
        Ok(())
    }

    fn remove(&mut self, remove: &Remove) -> Result<()> {
        let guarantee = self
            .outcome
            .guarantees
            .get(&remove.target)
            .copied()
            .ok_or(ConsensusError::GuaranteeNotFound(remove.target))?;
        if remove.left_amount.checked_add(remove.right_amount) != Some(guarantee.amount) {
            return Err(ConsensusError::InvalidAmount(guarantee.amount));
        }
        let (leader_payout, follower_payout) =
            self.outcome
                .split(&guarantee, remove.left_amount, remove.right_amount)?;

        self.outcome.leader.amount += leader_payout;
        self.outcome.follower.amount += follower_payout;
        self.outcome.guarantees.remove(&remove.target);
        Ok(())
    }

    /// The channel state these vars describe under `fixed_part`.
    pub fn as_state(&self, fixed_part: &FixedPart) -> State {
        State {
            participants: fixed_part.participants.clone(),
            channel_nonce: fixed_part.channel_nonce,
            app_definition: fixed_part.app_definition,
            challenge_duration: fixed_part.challenge_duration,
            app_data: Vec::new(),
            outcome: self.outcome.as_exit(),
            turn_num: self.turn_num,
            is_final: false,
        }
    }
}

/// Vars signed by both ledger participants, leader first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedVars {
    /// The agreed vars.
    pub vars: Vars,
    /// Leader and follower signatures over `vars`.
    pub signatures: [Signature; 2],
}

#[cfg(test)]
mod tests {
    use super::*;
    use nitro_types::NATIVE_ASSET;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn dest(b: u8) -> Destination {
        Destination::from_address(Address::from_bytes([b; 20]))
    }

    fn ledger_id() -> ChannelId {
        Destination::from_bytes([0xee; 32])
    }

    fn vars(leader: Amount, follower: Amount) -> Vars {
        Vars {
            turn_num: 1,
            outcome: LedgerOutcome::new(
                NATIVE_ASSET,
                Balance { destination: dest(1), amount: leader },
                Balance { destination: dest(2), amount: follower },
                vec![],
            ),
        }
    }

    fn target(b: u8) -> ChannelId {
        Destination::from_bytes([b; 32])
    }

    fn add(t: u8, left: Amount, right: Amount) -> Proposal {
        Proposal::add(
            ledger_id(),
            Add {
                guarantee: Guarantee {
                    amount: left + right,
                    target: target(t),
                    left: dest(1),
                    right: dest(2),
                },
                left_deposit: left,
                right_deposit: right,
            },
        )
    }

    #[test]
    fn add_then_remove_restores_balances_with_payment() {
        let mut v = vars(10, 10);
        v.handle_proposal(&add(7, 6, 4)).unwrap();
        assert_eq!(v.outcome.leader.amount, 4);
        assert_eq!(v.outcome.follower.amount, 6);
        assert_eq!(v.turn_num, 2);

        let remove = Proposal::remove(
            ledger_id(),
            Remove {
                target: target(7),
                left_amount: 1,
                right_amount: 9,
            },
        );
        v.handle_proposal(&remove).unwrap();
        assert_eq!(v.outcome.leader.amount, 5);
        assert_eq!(v.outcome.follower.amount, 15);
        assert!(v.outcome.guarantees.is_empty());
        assert_eq!(v.turn_num, 3);
    }

    #[test]
    fn guarantee_sides_can_be_swapped() {
        let mut v = vars(10, 10);
        let proposal = Proposal::add(
            ledger_id(),
            Add {
                guarantee: Guarantee {
                    amount: 8,
                    target: target(3),
                    left: dest(2),
                    right: dest(1),
                },
                left_deposit: 6,
                right_deposit: 2,
            },
        );
        v.handle_proposal(&proposal).unwrap();
        assert_eq!(v.outcome.leader.amount, 8);
        assert_eq!(v.outcome.follower.amount, 4);
    }

    #[test]
    fn rejected_proposals_leave_vars_untouched() {
        let mut v = vars(3, 10);
        let before = v.clone();
        assert_eq!(
            v.handle_proposal(&add(1, 5, 5)),
            Err(ConsensusError::InsufficientFunds { balance: 3, required: 5 })
        );
        assert_eq!(v, before);

        let mut bad_sum = add(1, 1, 1);
        if let ProposalKind::Add(a) = &mut bad_sum.kind {
            a.guarantee.amount = 5;
        }
        assert_eq!(v.handle_proposal(&bad_sum), Err(ConsensusError::InvalidAmount(5)));

        v.handle_proposal(&add(1, 1, 1)).unwrap();
        assert_eq!(
            v.handle_proposal(&add(1, 1, 1)),
            Err(ConsensusError::DuplicateGuarantee(target(1)))
        );

        let missing = Proposal::remove(
            ledger_id(),
            Remove { target: target(9), left_amount: 0, right_amount: 0 },
        );
        assert_eq!(
            v.handle_proposal(&missing),
            Err(ConsensusError::GuaranteeNotFound(target(9)))
        );
    }

    #[test]
    fn exit_roundtrip_keeps_guarantees() {
        let mut v = vars(10, 10);
        v.handle_proposal(&add(4, 2, 3)).unwrap();
        let parsed = LedgerOutcome::from_exit(&v.outcome.as_exit()).unwrap();
        assert_eq!(parsed, v.outcome);
    }

    #[test]
    fn from_exit_rejects_multi_asset() {
        let exit = vars(1, 1).outcome.as_exit();
        let doubled = Exit::new(vec![exit.0[0].clone(), exit.0[0].clone()]);
        assert!(matches!(
            LedgerOutcome::from_exit(&doubled),
            Err(ConsensusError::InvalidOutcome(_))
        ));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add { target: u8, left: u8, right: u8 },
        Remove { target: u8, left_share: u8 },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u8..6, any::<u8>(), any::<u8>())
                .prop_map(|(target, left, right)| Op::Add { target, left, right }),
            (0u8..6, any::<u8>()).prop_map(|(target, left_share)| Op::Remove { target, left_share }),
        ]
    }

    proptest! {
        #[test]
        fn updates_conserve_funds_and_advance_turns(
            leader in 0u128..2_000,
            follower in 0u128..2_000,
            ops in prop::collection::vec(op_strategy(), 0..40),
        ) {
            let mut v = vars(leader, follower);
            let total = v.outcome.total();
            for op in ops {
                let before = v.turn_num;
                let proposal = match op {
                    Op::Add { target: t, left, right } => add(t, left.into(), right.into()),
                    Op::Remove { target: t, left_share } => {
                        let amount = v.outcome.guarantees.get(&target(t)).map_or(0, |g| g.amount);
                        let left_amount = amount.min(left_share.into());
                        Proposal::remove(
                            ledger_id(),
                            Remove { target: target(t), left_amount, right_amount: amount - left_amount },
                        )
                    }
                };
                match v.handle_proposal(&proposal) {
                    Ok(()) => prop_assert_eq!(v.turn_num, before + 1),
                    Err(_) => prop_assert_eq!(v.turn_num, before),
                }
                prop_assert_eq!(v.outcome.total(), total);
            }
        }
    }
}
