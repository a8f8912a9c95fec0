//! Liquidity Provider Wallets
//!
//! Three strategies share the [`BitcoinWallet`] contract:
//!
//! - [`NodeWallet`]: keys live in the node wallet, which is unlocked with a
//!   passphrase before spending.
//! - [`DerivedWallet`]: the node watches a single address whose key is held
//!   by a [`KeyAccount`]; transactions are signed with that key.
//! - [`WatchOnlyWallet`]: tracks addresses only. No balance, no spending.
//!
//! Every strategy talks to the node through an injected
//! [`BitcoinRpc`](crate::rpc::BitcoinRpc).

pub mod account;
mod common;
pub mod derived;
pub mod node;
pub mod watch_only;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{Amount, Network, Txid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::AddressError;
use crate::chain::BitcoinTransactionInformation;
use crate::rpc::{BitcoinRpc, RpcError};
use crate::script::ScriptError;
use crate::units::UnitsError;

pub use account::{KeyAccount, LocalAccount};
pub use derived::DerivedWallet;
pub use node::NodeWallet;
pub use watch_only::WatchOnlyWallet;

/// Default confirmation target for node fee estimation
pub const DEFAULT_CONF_TARGET: u16 = 2;

/// Default unlock window for the node wallet, seconds
pub const DEFAULT_UNLOCK_TIMEOUT_SECS: u64 = 60;

/// Wallet strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletKind {
    Node,
    Derived,
    WatchOnly,
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletKind::Node => write!(f, "node"),
            WalletKind::Derived => write!(f, "derived"),
            WalletKind::WatchOnly => write!(f, "watch_only"),
        }
    }
}

impl FromStr for WalletKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "node" => Ok(WalletKind::Node),
            "derived" => Ok(WalletKind::Derived),
            "watch_only" | "watch-only" | "watchonly" => Ok(WalletKind::WatchOnly),
            other => Err(format!("unknown wallet mode: {}", other)),
        }
    }
}

/// Operations of the wallet contract
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletOperation {
    EstimateFees,
    GetBalance,
    SendWithData,
    ImportAddress,
    GetTransactions,
    Unlock,
}

impl fmt::Display for WalletOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WalletOperation::EstimateFees => "estimate_fees",
            WalletOperation::GetBalance => "get_balance",
            WalletOperation::SendWithData => "send_with_data",
            WalletOperation::ImportAddress => "import_address",
            WalletOperation::GetTransactions => "get_transactions",
            WalletOperation::Unlock => "unlock",
        };
        f.write_str(name)
    }
}

/// Wallet errors
#[derive(Debug, Error)]
pub enum WalletError {
    #[error("{context}: {source}")]
    Rpc {
        context: &'static str,
        #[source]
        source: RpcError,
    },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Script(#[from] ScriptError),

    #[error(transparent)]
    Amount(#[from] UnitsError),

    #[error("{operation} is not supported by the {kind} wallet")]
    UnsupportedOperation {
        kind: WalletKind,
        operation: WalletOperation,
    },

    #[error("wallet {wallet} is rescanning ({progress:.1}% done), retry later")]
    WalletScanning { wallet: String, progress: f64 },

    #[error("rescan started for {address}, retry once it completes")]
    RescanStarted { address: String },

    #[error("node could not fully sign the transaction")]
    IncompleteSignature,

    #[error("node has no fee estimate: {0}")]
    FeeRateUnavailable(String),

    #[error("wallet is locked and no passphrase is configured")]
    PassphraseRequired,

    #[error("invalid signing key: {0}")]
    InvalidKey(String),
}

impl WalletError {
    pub(crate) fn unsupported(kind: WalletKind, operation: WalletOperation) -> Self {
        WalletError::UnsupportedOperation { kind, operation }
    }
}

/// Attach call-site context to a node failure
pub(crate) trait RpcContext<T> {
    fn rpc_context(self, context: &'static str) -> Result<T, WalletError>;
}

impl<T> RpcContext<T> for Result<T, RpcError> {
    fn rpc_context(self, context: &'static str) -> Result<T, WalletError> {
        self.map_err(|source| {
            crate::logging::log_rpc_failure(context, &source.to_string(), None);
            WalletError::Rpc { context, source }
        })
    }
}

/// Fee of a simulated payment
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FeeEstimation {
    pub fee: Amount,
    /// BTC/kvB used for the simulation
    pub fee_rate: f64,
}

/// Settings shared by every wallet strategy
#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub network: Network,
    /// BTC/kvB; node estimation is used when unset
    pub fixed_fee_rate: Option<f64>,
    pub conf_target: u16,
    /// Node wallet the derived strategy loads or creates
    pub wallet_name: String,
    pub passphrase: Option<String>,
    pub unlock_timeout_secs: u64,
}

impl WalletConfig {
    pub fn new(network: Network, wallet_name: impl Into<String>) -> Self {
        Self {
            network,
            fixed_fee_rate: None,
            conf_target: DEFAULT_CONF_TARGET,
            wallet_name: wallet_name.into(),
            passphrase: None,
            unlock_timeout_secs: DEFAULT_UNLOCK_TIMEOUT_SECS,
        }
    }
}

/// Capabilities every wallet strategy exposes
#[async_trait]
pub trait BitcoinWallet: Send + Sync {
    fn kind(&self) -> WalletKind;

    /// Fee of paying `value` to `to` with a 32-byte data output
    async fn estimate_fees(&self, to: &str, value: Amount) -> Result<FeeEstimation, WalletError>;

    async fn get_balance(&self) -> Result<Amount, WalletError>;

    /// Pay `value` to `to` with `data` in an OP_RETURN output, returning the broadcast txid
    async fn send_with_data(
        &self,
        to: &str,
        value: Amount,
        data: &[u8],
    ) -> Result<Txid, WalletError>;

    async fn import_address(&self, address: &str) -> Result<(), WalletError>;

    /// UTXOs paying to `address`, grouped by transaction
    async fn get_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<BitcoinTransactionInformation>, WalletError>;

    async fn unlock(&self) -> Result<(), WalletError>;
}

/// Build the wallet strategy selected by `kind`
///
/// The derived strategy needs `account` and runs its bootstrap here, so it
/// can fail with [`WalletError::WalletScanning`] or
/// [`WalletError::RescanStarted`].
pub async fn build_wallet(
    kind: WalletKind,
    rpc: Arc<dyn BitcoinRpc>,
    config: WalletConfig,
    account: Option<Arc<dyn KeyAccount>>,
) -> Result<Box<dyn BitcoinWallet>, WalletError> {
    match kind {
        WalletKind::Node => Ok(Box::new(NodeWallet::new(rpc, config))),
        WalletKind::WatchOnly => Ok(Box::new(WatchOnlyWallet::new(rpc, config))),
        WalletKind::Derived => {
            let account = account.ok_or_else(|| {
                WalletError::InvalidKey("derived wallet requires a signing account".to_string())
            })?;
            Ok(Box::new(DerivedWallet::new(rpc, config, account).await?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_kind_parsing() {
        assert_eq!("node".parse::<WalletKind>().unwrap(), WalletKind::Node);
        assert_eq!("Derived".parse::<WalletKind>().unwrap(), WalletKind::Derived);
        assert_eq!("watch-only".parse::<WalletKind>().unwrap(), WalletKind::WatchOnly);
        assert!("cold".parse::<WalletKind>().is_err());
    }

    #[test]
    fn test_unsupported_message() {
        let err = WalletError::unsupported(WalletKind::WatchOnly, WalletOperation::GetBalance);
        assert_eq!(
            err.to_string(),
            "get_balance is not supported by the watch_only wallet"
        );
    }

    #[tokio::test]
    async fn test_build_derived_requires_account() {
        let rpc: Arc<dyn BitcoinRpc> = Arc::new(crate::rpc::MockBitcoinRpc::new());
        let config = WalletConfig::new(Network::Regtest, "lp");

        let result = build_wallet(WalletKind::Derived, rpc, config, None).await;
        assert!(matches!(result, Err(WalletError::InvalidKey(_))));
    }
}
