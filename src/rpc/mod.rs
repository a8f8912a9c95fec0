//! Bitcoin Node RPC
//!
//! The node is consumed through the [`BitcoinRpc`] trait so that wallets and
//! chain queries can run against a test double. [`client::BitcoindClient`] is
//! the JSON-RPC implementation used in production.

pub mod client;
pub mod types;

use async_trait::async_trait;
use bitcoin::{Block, BlockHash, PublicKey, Transaction, Txid};
use thiserror::Error;

pub use client::BitcoindClient;
pub use types::{
    AddressInfo, BlockInfo, BlockchainInfo, CreateWalletOptions, FeeEstimate, FundOptions,
    FundedPsbt, FundedTransaction, ListUnspentEntry, RawOutput, RawTransactionInfo, ScanProgress,
    SignedTransaction, UnspentQuery, WalletInfo, WalletScanState, WalletTransaction,
};

/// Node RPC errors
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Transport(String),

    #[error("node error {code}: {message}")]
    Node { code: i64, message: String },

    #[error("failed to decode {method} response: {reason}")]
    Decode { method: String, reason: String },
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        RpcError::Transport(e.to_string())
    }
}

/// Result type for node calls
pub type RpcResult<T> = Result<T, RpcError>;

/// Capabilities consumed from the Bitcoin node
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    /// `listunspent`
    async fn list_unspent(&self, query: UnspentQuery) -> RpcResult<Vec<ListUnspentEntry>>;

    /// `createrawtransaction` with no inputs
    async fn create_raw_transaction(&self, outputs: Vec<RawOutput>) -> RpcResult<Transaction>;

    /// `fundrawtransaction`
    async fn fund_raw_transaction(
        &self,
        tx: &Transaction,
        options: FundOptions,
    ) -> RpcResult<FundedTransaction>;

    /// `signrawtransactionwithwallet`
    async fn sign_raw_transaction_with_wallet(
        &self,
        tx: &Transaction,
    ) -> RpcResult<SignedTransaction>;

    /// `signrawtransactionwithkey`; the keys are only borrowed for the call
    async fn sign_raw_transaction_with_key(
        &self,
        tx: &Transaction,
        wif_keys: &[String],
    ) -> RpcResult<SignedTransaction>;

    /// `sendrawtransaction`
    async fn send_raw_transaction(&self, tx: &Transaction) -> RpcResult<Txid>;

    /// `getwalletinfo`
    async fn get_wallet_info(&self) -> RpcResult<WalletInfo>;

    /// `walletpassphrase`
    async fn wallet_passphrase(&self, passphrase: &str, timeout_secs: u64) -> RpcResult<()>;

    /// `importaddress`, optionally rescanning for its history
    async fn import_address(&self, address: &str, label: &str, rescan: bool) -> RpcResult<()>;

    /// `importpubkey`
    async fn import_pubkey(&self, pubkey: &PublicKey, rescan: bool) -> RpcResult<()>;

    /// `createwallet`
    async fn create_wallet(&self, name: &str, options: CreateWalletOptions) -> RpcResult<()>;

    /// `loadwallet`
    async fn load_wallet(&self, name: &str) -> RpcResult<()>;

    /// `getaddressinfo`
    async fn get_address_info(&self, address: &str) -> RpcResult<AddressInfo>;

    /// `estimatesmartfee` in conservative mode
    async fn estimate_smart_fee(&self, conf_target: u16) -> RpcResult<FeeEstimate>;

    /// `gettransaction`
    async fn get_transaction(&self, txid: &Txid) -> RpcResult<WalletTransaction>;

    /// `getrawtransaction`
    async fn get_raw_transaction(&self, txid: &Txid) -> RpcResult<Transaction>;

    /// `getrawtransaction` verbose
    async fn get_raw_transaction_verbose(&self, txid: &Txid) -> RpcResult<RawTransactionInfo>;

    /// `getblock` raw
    async fn get_block(&self, hash: &BlockHash) -> RpcResult<Block>;

    /// `getblock` verbosity 1
    async fn get_block_verbose(&self, hash: &BlockHash) -> RpcResult<BlockInfo>;

    /// `getblockchaininfo`
    async fn get_blockchain_info(&self) -> RpcResult<BlockchainInfo>;

    /// `walletcreatefundedpsbt` with no inputs
    async fn wallet_create_funded_psbt(
        &self,
        outputs: Vec<RawOutput>,
        options: FundOptions,
    ) -> RpcResult<FundedPsbt>;

    /// `ping`
    async fn ping(&self) -> RpcResult<()>;
}
