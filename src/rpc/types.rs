//! Node RPC Request/Response Types
//!
//! Amounts stay as the node reports them (BTC floats); conversion into
//! `bitcoin::Amount` happens in `crate::units` so that non-finite values are
//! caught in one place.

use bitcoin::{Amount, BlockHash, Transaction, Txid};
use serde::{Deserialize, Serialize};

/// Filters for `listunspent`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnspentQuery {
    pub min_confirmations: Option<u32>,
    pub max_confirmations: Option<u32>,
    pub addresses: Vec<String>,
}

impl UnspentQuery {
    /// Every UTXO the wallet knows about
    pub fn all() -> Self {
        Self::default()
    }

    /// UTXOs paying to `address`, any confirmation count
    pub fn for_address(address: &str) -> Self {
        Self {
            min_confirmations: Some(0),
            max_confirmations: Some(9_999_999),
            addresses: vec![address.to_string()],
        }
    }

    /// Confirmed UTXOs paying to `address`
    pub fn confirmed_for_address(address: &str) -> Self {
        Self {
            min_confirmations: Some(1),
            ..Self::for_address(address)
        }
    }
}

/// Entry returned by `listunspent`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListUnspentEntry {
    pub txid: Txid,
    pub vout: u32,
    #[serde(default)]
    pub address: Option<String>,
    /// BTC
    pub amount: f64,
    pub confirmations: u32,
    #[serde(default)]
    pub spendable: bool,
}

/// Output for `createrawtransaction` / `walletcreatefundedpsbt`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawOutput {
    Payment { address: String, amount: Amount },
    Data(Vec<u8>),
}

impl RawOutput {
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            RawOutput::Payment { address, amount } => {
                let mut output = serde_json::Map::new();
                output.insert(address.clone(), amount.to_btc().into());
                serde_json::Value::Object(output)
            }
            RawOutput::Data(data) => serde_json::json!({ "data": hex::encode(data) }),
        }
    }
}

/// Options shared by `fundrawtransaction` and `walletcreatefundedpsbt`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FundOptions {
    pub change_position: Option<u32>,
    /// BTC/kvB
    pub fee_rate: Option<f64>,
    pub include_watching: bool,
    /// Required when the wallet has no keys to derive change from
    pub change_address: Option<String>,
}

impl FundOptions {
    pub fn to_json(&self) -> serde_json::Value {
        let mut options = serde_json::Map::new();
        if let Some(pos) = self.change_position {
            options.insert("changePosition".to_string(), pos.into());
        }
        if let Some(rate) = self.fee_rate {
            options.insert("feeRate".to_string(), rate.into());
        }
        if self.include_watching {
            options.insert("includeWatching".to_string(), true.into());
        }
        if let Some(address) = &self.change_address {
            options.insert("changeAddress".to_string(), address.clone().into());
        }
        serde_json::Value::Object(options)
    }
}

/// Result of `fundrawtransaction`
#[derive(Debug, Clone)]
pub struct FundedTransaction {
    pub transaction: Transaction,
    /// BTC
    pub fee: f64,
    pub change_position: i32,
}

/// Result of `walletcreatefundedpsbt`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundedPsbt {
    pub psbt: String,
    /// BTC
    pub fee: f64,
    #[serde(rename = "changepos")]
    pub change_position: i32,
}

/// Result of either signing call
#[derive(Debug, Clone)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub complete: bool,
}

/// Progress of a running wallet rescan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanProgress {
    pub duration: u64,
    pub progress: f64,
}

/// `scanning` field of `getwalletinfo`: `false` or an object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WalletScanState {
    Idle(bool),
    Scanning(ScanProgress),
}

impl Default for WalletScanState {
    fn default() -> Self {
        WalletScanState::Idle(false)
    }
}

impl WalletScanState {
    pub fn progress(&self) -> Option<&ScanProgress> {
        match self {
            WalletScanState::Scanning(progress) => Some(progress),
            WalletScanState::Idle(_) => None,
        }
    }
}

/// Result of `getwalletinfo`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletInfo {
    #[serde(rename = "walletname")]
    pub wallet_name: String,
    /// Unix time the wallet relocks at, absent for unencrypted wallets
    #[serde(default)]
    pub unlocked_until: Option<i64>,
    #[serde(default)]
    pub private_keys_enabled: bool,
    #[serde(default)]
    pub descriptors: bool,
    #[serde(default)]
    pub scanning: WalletScanState,
}

/// Options for `createwallet`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWalletOptions {
    pub disable_private_keys: bool,
    pub blank: bool,
    pub descriptors: bool,
    pub load_on_startup: bool,
}

impl CreateWalletOptions {
    /// Blank, key-less legacy wallet for watch-only use
    pub fn watch_only() -> Self {
        Self {
            disable_private_keys: true,
            blank: true,
            descriptors: false,
            load_on_startup: true,
        }
    }
}

/// Result of `getaddressinfo`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    #[serde(default)]
    pub solvable: bool,
    #[serde(default, rename = "iswatchonly")]
    pub is_watch_only: bool,
    #[serde(default, rename = "ismine")]
    pub is_mine: bool,
}

/// Result of `estimatesmartfee`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeeEstimate {
    /// BTC/kvB
    #[serde(rename = "feerate")]
    pub fee_rate: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
    pub blocks: u32,
}

/// Result of `gettransaction`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub txid: Txid,
    /// BTC, signed from the wallet's point of view
    pub amount: f64,
    #[serde(default)]
    pub fee: Option<f64>,
    pub confirmations: i64,
    #[serde(default, rename = "blockhash")]
    pub block_hash: Option<BlockHash>,
}

/// Result of `getrawtransaction` with verbosity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTransactionInfo {
    pub txid: Txid,
    #[serde(default, rename = "blockhash")]
    pub block_hash: Option<BlockHash>,
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default, rename = "blocktime")]
    pub block_time: Option<u64>,
}

/// Result of `getblock` with verbosity 1
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockInfo {
    pub hash: BlockHash,
    pub height: u64,
    pub time: u64,
    #[serde(rename = "nTx")]
    pub tx_count: u64,
    #[serde(default)]
    pub confirmations: i64,
}

/// Result of `getblockchaininfo`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainInfo {
    pub chain: String,
    pub blocks: u64,
    pub headers: u64,
    #[serde(rename = "bestblockhash")]
    pub best_block_hash: BlockHash,
}
