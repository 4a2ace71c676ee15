//! Off-chain payment vouchers.

use nitro_crypto::{CryptoError, SecretKey, Signature};
use nitro_types::{Address, Amount, Bytes32, ChannelId};
use serde::{Deserialize, Serialize};

/// A payer's signed promise of a cumulative `amount` in a virtual channel.
///
/// Each voucher supersedes the previous one; only the largest amount matters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voucher {
    /// The virtual channel paid through.
    pub channel_id: ChannelId,
    /// Cumulative amount paid so far.
    pub amount: Amount,
    /// Payer's signature over channel id and amount.
    pub signature: Signature,
}

impl Voucher {
    /// Signs a voucher for `amount`.
    pub fn new(channel_id: ChannelId, amount: Amount, secret_key: &SecretKey) -> Self {
        let signature = secret_key.sign_hash(&Self::digest(&channel_id, amount));
        Self {
            channel_id,
            amount,
            signature,
        }
    }

    /// The address that signed the voucher.
    pub fn recover_signer(&self) -> Result<Address, CryptoError> {
        self.signature
            .recover_signer(&Self::digest(&self.channel_id, self.amount))
    }

    fn digest(channel_id: &ChannelId, amount: Amount) -> Bytes32 {
        let mut buf = Vec::with_capacity(48);
        buf.extend_from_slice(channel_id.as_bytes());
        buf.extend_from_slice(&amount.to_be_bytes());
        nitro_types::hash(&buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nitro_types::Destination;

    #[test]
    fn signer_is_recovered() {
        let key = SecretKey::generate();
        let voucher = Voucher::new(Destination::from_bytes([3; 32]), 42, &key);
        assert_eq!(voucher.recover_signer().unwrap(), key.address());
    }

    #[test]
    fn tampered_amount_changes_signer() {
        let key = SecretKey::generate();
        let mut voucher = Voucher::new(Destination::from_bytes([3; 32]), 42, &key);
        voucher.amount = 43;
        assert_ne!(voucher.recover_signer().ok(), Some(key.address()));
    }
}
