//! Channel outcomes: how a channel's funds are paid out when it is defunded.

use nitro_types::{Address, Amount, Destination, Funds};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Whether an allocation pays its destination directly or reserves funds for another channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AllocationType {
    /// Pays the destination outright.
    #[default]
    Simple,
    /// Reserves funds for the target channel, split between `left` and `right` on payout.
    Guarantee,
}

/// The left and right parties a guarantee allocation pays out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuaranteeMetadata {
    /// The party on the payer's side of the hop.
    pub left: Destination,
    /// The party on the payee's side of the hop.
    pub right: Destination,
}

impl GuaranteeMetadata {
    /// Encodes as `left || right`.
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(self.left.as_bytes());
        bytes.extend_from_slice(self.right.as_bytes());
        bytes
    }

    /// Decodes `left || right`; `None` unless exactly 64 bytes.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != 64 {
            return None;
        }
        let mut left = [0u8; 32];
        let mut right = [0u8; 32];
        left.copy_from_slice(&bytes[..32]);
        right.copy_from_slice(&bytes[32..]);
        Some(Self {
            left: Destination::from_bytes(left),
            right: Destination::from_bytes(right),
        })
    }
}

/// A single payout entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    /// Who receives the funds.
    pub destination: Destination,
    /// How much.
    pub amount: Amount,
    /// How the funds are paid out.
    pub allocation_type: AllocationType,
    /// Type-specific metadata, empty for simple allocations.
    #[serde(default)]
    pub metadata: Vec<u8>,
}

impl Allocation {
    /// A simple allocation to `destination`.
    pub fn simple(destination: Destination, amount: Amount) -> Self {
        Self {
            destination,
            amount,
            allocation_type: AllocationType::Simple,
            metadata: Vec::new(),
        }
    }

    /// A guarantee allocation reserving `amount` for `target`.
    pub fn guarantee(target: Destination, amount: Amount, left: Destination, right: Destination) -> Self {
        Self {
            destination: target,
            amount,
            allocation_type: AllocationType::Guarantee,
            metadata: GuaranteeMetadata { left, right }.encode(),
        }
    }
}

/// The allocations of a single asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleAssetExit {
    /// Asset address, zero for the native token.
    pub asset: Address,
    /// Ordered allocations; order fixes the deposit sequence.
    pub allocations: Vec<Allocation>,
}

impl SingleAssetExit {
    /// Sum of all allocations.
    pub fn total_allocated(&self) -> Amount {
        self.allocations.iter().map(|a| a.amount).sum()
    }

    /// Sum of allocations to `destination`.
    pub fn total_allocated_for(&self, destination: &Destination) -> Amount {
        self.allocations
            .iter()
            .filter(|a| a.destination == *destination)
            .map(|a| a.amount)
            .sum()
    }

    /// Sum of the allocations preceding the first one to `destination`.
    pub fn deposit_safety_threshold(&self, destination: &Destination) -> Amount {
        self.allocations
            .iter()
            .take_while(|a| a.destination != *destination)
            .map(|a| a.amount)
            .sum()
    }

    fn encode_into(&self, hasher: &mut Sha256) {
        hasher.update(self.asset.as_bytes());
        hasher.update((self.allocations.len() as u64).to_be_bytes());
        for allocation in &self.allocations {
            hasher.update(allocation.destination.as_bytes());
            hasher.update(allocation.amount.to_be_bytes());
            hasher.update([allocation.allocation_type as u8]);
            hasher.update((allocation.metadata.len() as u64).to_be_bytes());
            hasher.update(&allocation.metadata);
        }
    }
}

/// A full outcome: one exit per asset.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Exit(pub Vec<SingleAssetExit>);

impl Exit {
    /// Creates an exit from per-asset entries.
    pub fn new(exits: Vec<SingleAssetExit>) -> Self {
        Self(exits)
    }

    /// Iterates over per-asset exits.
    pub fn iter(&self) -> impl Iterator<Item = &SingleAssetExit> {
        self.0.iter()
    }

    /// Number of assets.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the exit covers no asset.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total allocated, per asset.
    pub fn total_allocated(&self) -> Funds {
        self.iter().map(|e| (e.asset, e.total_allocated())).collect()
    }

    /// Total allocated to `destination`, per asset.
    pub fn total_allocated_for(&self, destination: &Destination) -> Funds {
        self.iter()
            .map(|e| (e.asset, e.total_allocated_for(destination)))
            .collect()
    }

    /// Funds that must be on chain before `destination` can deposit safely, per asset.
    pub fn deposit_safety_threshold(&self, destination: &Destination) -> Funds {
        self.iter()
            .map(|e| (e.asset, e.deposit_safety_threshold(destination)))
            .collect()
    }

    pub(crate) fn encode_into(&self, hasher: &mut Sha256) {
        hasher.update((self.0.len() as u64).to_be_bytes());
        for exit in &self.0 {
            exit.encode_into(hasher);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nitro_types::NATIVE_ASSET;

    fn dest(b: u8) -> Destination {
        Destination::from_address(Address::from_bytes([b; 20]))
    }

    fn two_party() -> Exit {
        Exit::new(vec![SingleAssetExit {
            asset: NATIVE_ASSET,
            allocations: vec![Allocation::simple(dest(1), 5), Allocation::simple(dest(2), 7)],
        }])
    }

    #[test]
    fn thresholds_follow_allocation_order() {
        let exit = two_party();
        assert_eq!(exit.deposit_safety_threshold(&dest(1)).get(&NATIVE_ASSET), 0);
        assert_eq!(exit.deposit_safety_threshold(&dest(2)).get(&NATIVE_ASSET), 5);
        assert_eq!(exit.total_allocated_for(&dest(2)).get(&NATIVE_ASSET), 7);
        assert_eq!(exit.total_allocated().get(&NATIVE_ASSET), 12);
    }

    #[test]
    fn guarantee_metadata_roundtrip() {
        let allocation = Allocation::guarantee(Destination::from_bytes([9; 32]), 10, dest(1), dest(2));
        let metadata = GuaranteeMetadata::decode(&allocation.metadata).unwrap();
        assert_eq!(metadata.left, dest(1));
        assert_eq!(metadata.right, dest(2));
        assert!(GuaranteeMetadata::decode(&[0u8; 10]).is_none());
    }
}
