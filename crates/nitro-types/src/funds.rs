//! Multi-asset holdings.

use crate::{Address, Amount};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Amounts keyed by asset address. A missing asset is a zero balance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Funds(BTreeMap<Address, Amount>);

impl Funds {
    /// Creates empty holdings.
    pub fn new() -> Self {
        Self::default()
    }

    /// The amount held of `asset`.
    pub fn get(&self, asset: &Address) -> Amount {
        self.0.get(asset).copied().unwrap_or_default()
    }

    /// Overwrites the amount held of `asset`.
    pub fn set(&mut self, asset: Address, amount: Amount) {
        self.0.insert(asset, amount);
    }

    /// Adds `amount` of `asset`.
    pub fn add(&mut self, asset: Address, amount: Amount) {
        *self.0.entry(asset).or_default() += amount;
    }

    /// True when any asset has a positive balance.
    pub fn is_non_zero(&self) -> bool {
        self.0.values().any(|amount| *amount > 0)
    }

    /// True when every asset in `threshold` is held at least at its threshold amount.
    pub fn covers(&self, threshold: &Funds) -> bool {
        threshold
            .iter()
            .all(|(asset, amount)| self.get(asset) >= *amount)
    }

    /// Iterates over `(asset, amount)` pairs in asset order.
    pub fn iter(&self) -> impl Iterator<Item = (&Address, &Amount)> {
        self.0.iter()
    }

    /// The assets present in these holdings.
    pub fn assets(&self) -> impl Iterator<Item = &Address> {
        self.0.keys()
    }

    /// True when no asset has ever been recorded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Address, Amount)> for Funds {
    fn from_iter<I: IntoIterator<Item = (Address, Amount)>>(iter: I) -> Self {
        let mut funds = Funds::new();
        for (asset, amount) in iter {
            funds.add(asset, amount);
        }
        funds
    }
}
