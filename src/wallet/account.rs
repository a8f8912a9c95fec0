//! Signing Accounts
//!
//! The derived wallet never stores key material itself. It asks a
//! [`KeyAccount`] for the address and public key it watches and borrows the
//! private key only for the duration of a signing call.

use bitcoin::{Address, Network, PrivateKey, PublicKey};
use secp256k1::{Secp256k1, SecretKey};

use super::WalletError;

/// Holder of the key behind a derived wallet
pub trait KeyAccount: Send + Sync {
    /// P2PKH address of the account key
    fn address(&self) -> &Address;

    fn public_key(&self) -> PublicKey;

    /// Run `f` with the private key; the key must not outlive the call
    fn use_private_key(&self, f: &mut dyn FnMut(&PrivateKey));
}

/// In-memory account built from a raw secret
pub struct LocalAccount {
    key: PrivateKey,
    public_key: PublicKey,
    address: Address,
}

impl LocalAccount {
    /// Build from a hex-encoded 32-byte secret
    pub fn from_hex(secret_hex: &str, network: Network) -> Result<Self, WalletError> {
        let bytes = hex::decode(secret_hex.trim().trim_start_matches("0x"))
            .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        let secret =
            SecretKey::from_slice(&bytes).map_err(|e| WalletError::InvalidKey(e.to_string()))?;

        Ok(Self::from_secret(secret, network))
    }

    pub fn from_secret(secret: SecretKey, network: Network) -> Self {
        let secp = Secp256k1::signing_only();
        let key = PrivateKey::new(secret, network);
        let public_key = key.public_key(&secp);
        let address = Address::p2pkh(public_key.pubkey_hash(), network);

        Self {
            key,
            public_key,
            address,
        }
    }
}

impl std::fmt::Debug for LocalAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAccount")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl KeyAccount for LocalAccount {
    fn address(&self) -> &Address {
        &self.address
    }

    fn public_key(&self) -> PublicKey {
        self.public_key
    }

    fn use_private_key(&self, f: &mut dyn FnMut(&PrivateKey)) {
        f(&self.key)
    }
}
