//! Voucher bookkeeping for virtual payment channels.

use crate::error::PaymentError;
use nitro_crypto::SecretKey;
use nitro_protocols::Voucher;
use nitro_types::{Address, Amount, ChannelId};
use parking_lot::RwLock;
use std::collections::HashMap;

/// Issues and accepts vouchers for the virtual channels this node pays through or is paid
/// through.
pub trait PaymentManager: Send + Sync {
    /// Starts tracking a channel in which `payer` can pay `payee` up to `starting_balance`.
    fn register(
        &self,
        channel_id: ChannelId,
        payer: Address,
        payee: Address,
        starting_balance: Amount,
    ) -> Result<(), PaymentError>;

    /// Whether the channel is tracked.
    fn channel_registered(&self, channel_id: &ChannelId) -> bool;

    /// Cumulative amount paid through the channel so far.
    fn paid(&self, channel_id: &ChannelId) -> Result<Amount, PaymentError>;

    /// Pays `amount` more and returns the voucher for the new cumulative total.
    fn pay(
        &self,
        channel_id: &ChannelId,
        amount: Amount,
        secret_key: &SecretKey,
    ) -> Result<Voucher, PaymentError>;

    /// Accepts a voucher and returns the cumulative amount received.
    ///
    /// A voucher for no more than what was already received changes nothing.
    fn receive(&self, voucher: &Voucher) -> Result<Amount, PaymentError>;

    /// Stops tracking a channel.
    fn remove(&self, channel_id: &ChannelId);
}

#[derive(Debug, Clone)]
struct PaymentChannel {
    payer: Address,
    payee: Address,
    starting_balance: Amount,
    paid: Amount,
    latest: Option<Voucher>,
}

/// An in-memory [`PaymentManager`].
#[derive(Debug, Default)]
pub struct VoucherManager {
    channels: RwLock<HashMap<ChannelId, PaymentChannel>>,
}

impl VoucherManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// The largest voucher seen or issued for the channel.
    pub fn latest_voucher(&self, channel_id: &ChannelId) -> Option<Voucher> {
        self.channels
            .read()
            .get(channel_id)
            .and_then(|c| c.latest.clone())
    }
}

impl PaymentManager for VoucherManager {
    fn register(
        &self,
        channel_id: ChannelId,
        payer: Address,
        payee: Address,
        starting_balance: Amount,
    ) -> Result<(), PaymentError> {
        let mut channels = self.channels.write();
        if channels.contains_key(&channel_id) {
            return Ok(());
        }
        tracing::debug!(channel = %channel_id, %payer, %payee, starting_balance, "registered payment channel");
        channels.insert(
            channel_id,
            PaymentChannel {
                payer,
                payee,
                starting_balance,
                paid: 0,
                latest: None,
            },
        );
        Ok(())
    }

    fn channel_registered(&self, channel_id: &ChannelId) -> bool {
        self.channels.read().contains_key(channel_id)
    }

    fn paid(&self, channel_id: &ChannelId) -> Result<Amount, PaymentError> {
        self.channels
            .read()
            .get(channel_id)
            .map(|c| c.paid)
            .ok_or(PaymentError::UnknownChannel(*channel_id))
    }

    fn pay(
        &self,
        channel_id: &ChannelId,
        amount: Amount,
        secret_key: &SecretKey,
    ) -> Result<Voucher, PaymentError> {
        let mut channels = self.channels.write();
        let channel = channels
            .get_mut(channel_id)
            .ok_or(PaymentError::UnknownChannel(*channel_id))?;
        let me = secret_key.address();
        if me != channel.payer {
            return Err(PaymentError::NotPayer(me));
        }
        let total = channel.paid.saturating_add(amount);
        if total > channel.starting_balance {
            return Err(PaymentError::InsufficientBalance {
                requested: total,
                available: channel.starting_balance,
            });
        }

        let voucher = Voucher::new(*channel_id, total, secret_key);
        channel.paid = total;
        channel.latest = Some(voucher.clone());
        tracing::debug!(channel = %channel_id, amount, total, payee = %channel.payee, "issued voucher");
        Ok(voucher)
    }

    fn receive(&self, voucher: &Voucher) -> Result<Amount, PaymentError> {
        let mut channels = self.channels.write();
        let channel = channels
            .get_mut(&voucher.channel_id)
            .ok_or(PaymentError::UnknownChannel(voucher.channel_id))?;
        let signer = voucher
            .recover_signer()
            .map_err(|e| PaymentError::Signature(e.to_string()))?;
        if signer != channel.payer {
            return Err(PaymentError::InvalidSigner {
                channel: voucher.channel_id,
                signer,
                payer: channel.payer,
            });
        }
        if voucher.amount <= channel.paid {
            tracing::debug!(channel = %voucher.channel_id, amount = voucher.amount, "ignoring stale voucher");
            return Ok(channel.paid);
        }
        if voucher.amount > channel.starting_balance {
            return Err(PaymentError::InsufficientBalance {
                requested: voucher.amount,
                available: channel.starting_balance,
            });
        }

        channel.paid = voucher.amount;
        channel.latest = Some(voucher.clone());
        tracing::debug!(channel = %voucher.channel_id, total = channel.paid, "received voucher");
        Ok(channel.paid)
    }

    fn remove(&self, channel_id: &ChannelId) {
        self.channels.write().remove(channel_id);
    }
}
