//! Bitcoin Core JSON-RPC Client
//!
//! Implements [`BitcoinRpc`] over HTTP with basic auth. Wallet calls go to
//! `/wallet/<name>` when a wallet is selected.

use async_trait::async_trait;
use bitcoin::consensus::encode::{self, deserialize, deserialize_partial, serialize, serialize_hex};
use bitcoin::{absolute, transaction, Block, BlockHash, PublicKey, Transaction, TxIn, TxOut, Txid};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::types::*;
use super::{BitcoinRpc, RpcError, RpcResult};

/// Default HTTP timeout for node calls
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// JSON-RPC client for bitcoind
#[derive(Debug)]
pub struct BitcoindClient {
    client: Client,
    base_url: String,
    wallet: Option<String>,
    user: String,
    password: String,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct HexTransaction {
    hex: String,
    #[serde(default)]
    fee: f64,
    #[serde(default, rename = "changepos")]
    change_position: i32,
    #[serde(default)]
    complete: bool,
}

impl BitcoindClient {
    /// Create a client for `base_url` (e.g. `http://127.0.0.1:8332`)
    pub fn new(base_url: &str, user: &str, password: &str) -> RpcResult<Self> {
        let client = Client::builder().timeout(DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            wallet: None,
            user: user.to_string(),
            password: password.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Scope wallet calls to `wallet`
    pub fn with_wallet(mut self, wallet: &str) -> Self {
        self.wallet = Some(wallet.to_string());
        self
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self) -> String {
        match &self.wallet {
            Some(wallet) => format!("{}/wallet/{}", self.base_url, wallet),
            None => self.base_url.clone(),
        }
    }

    /// Issue a call and decode its `result`
    async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> RpcResult<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "1.0",
            "id": id,
            "method": method,
            "params": params,
        });

        tracing::trace!(target: "flyover::rpc", method, id, "Node call");

        // bitcoind answers errors with non-2xx and a JSON body, so the status is not checked
        let resp = self
            .client
            .post(self.url())
            .basic_auth(&self.user, Some(&self.password))
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;
        Self::parse_response(method, status, &text)
    }

    /// Split a JSON-RPC reply into its `result` or the node's error object
    fn parse_response<T: DeserializeOwned>(
        method: &str,
        status: impl std::fmt::Display,
        text: &str,
    ) -> RpcResult<T> {
        let parsed: JsonRpcResponse = serde_json::from_str(text).map_err(|e| RpcError::Decode {
            method: method.to_string(),
            reason: format!("HTTP {}: {}", status, e),
        })?;

        if let Some(err) = parsed.error {
            return Err(RpcError::Node {
                code: err.code,
                message: err.message,
            });
        }

        serde_json::from_value(parsed.result.unwrap_or(Value::Null)).map_err(|e| {
            RpcError::Decode {
                method: method.to_string(),
                reason: e.to_string(),
            }
        })
    }

    fn decode_hex<T: bitcoin::consensus::Decodable>(method: &str, hex_str: &str) -> RpcResult<T> {
        let bytes = hex::decode(hex_str).map_err(|e| RpcError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })?;
        deserialize(&bytes).map_err(|e| RpcError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    /// Decode a transaction, accepting the input-less legacy form the node
    /// produces for `createrawtransaction`
    fn decode_transaction(method: &str, hex_str: &str) -> RpcResult<Transaction> {
        let bytes = hex::decode(hex_str).map_err(|e| RpcError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })?;

        match deserialize::<Transaction>(&bytes) {
            Ok(tx) => Ok(tx),
            Err(err) => deserialize_without_inputs(&bytes).map_err(|_| RpcError::Decode {
                method: method.to_string(),
                reason: err.to_string(),
            }),
        }
    }

    async fn sign(&self, method: &str, params: Vec<Value>) -> RpcResult<SignedTransaction> {
        let result: HexTransaction = self.call(method, params).await?;
        Ok(SignedTransaction {
            transaction: Self::decode_transaction(method, &result.hex)?,
            complete: result.complete,
        })
    }
}

/// Hex the node can parse. Without inputs the segwit form is ambiguous (the
/// empty input count reads as the marker byte), so those go out in legacy form.
fn transaction_hex(tx: &Transaction) -> String {
    if !tx.input.is_empty() {
        return serialize_hex(tx);
    }

    let mut bytes = serialize(&tx.version);
    bytes.extend(serialize(&tx.input));
    bytes.extend(serialize(&tx.output));
    bytes.extend(serialize(&tx.lock_time));
    hex::encode(bytes)
}

fn deserialize_without_inputs(bytes: &[u8]) -> Result<Transaction, encode::Error> {
    let (version, mut pos) = deserialize_partial::<transaction::Version>(bytes)?;

    let (input, read) = deserialize_partial::<Vec<TxIn>>(&bytes[pos..])?;
    if !input.is_empty() {
        return Err(encode::Error::ParseFailed("expected no inputs"));
    }
    pos += read;

    let (output, read) = deserialize_partial::<Vec<TxOut>>(&bytes[pos..])?;
    pos += read;

    let (lock_time, read) = deserialize_partial::<absolute::LockTime>(&bytes[pos..])?;
    if pos + read != bytes.len() {
        return Err(encode::Error::ParseFailed("data not consumed entirely"));
    }

    Ok(Transaction {
        version,
        lock_time,
        input,
        output,
    })
}

fn list_unspent_params(query: &UnspentQuery) -> Vec<Value> {
    vec![
        json!(query.min_confirmations.unwrap_or(1)),
        json!(query.max_confirmations.unwrap_or(9_999_999)),
        json!(query.addresses),
    ]
}

#[async_trait]
impl BitcoinRpc for BitcoindClient {
    async fn list_unspent(&self, query: UnspentQuery) -> RpcResult<Vec<ListUnspentEntry>> {
        self.call("listunspent", list_unspent_params(&query)).await
    }

    async fn create_raw_transaction(&self, outputs: Vec<RawOutput>) -> RpcResult<Transaction> {
        let outputs: Vec<Value> = outputs.iter().map(RawOutput::to_json).collect();
        let hex_tx: String = self
            .call("createrawtransaction", vec![json!([]), Value::Array(outputs)])
            .await?;
        Self::decode_transaction("createrawtransaction", &hex_tx)
    }

    async fn fund_raw_transaction(
        &self,
        tx: &Transaction,
        options: FundOptions,
    ) -> RpcResult<FundedTransaction> {
        let result: HexTransaction = self
            .call(
                "fundrawtransaction",
                vec![json!(transaction_hex(tx)), options.to_json()],
            )
            .await?;

        Ok(FundedTransaction {
            transaction: Self::decode_transaction("fundrawtransaction", &result.hex)?,
            fee: result.fee,
            change_position: result.change_position,
        })
    }

    async fn sign_raw_transaction_with_wallet(
        &self,
        tx: &Transaction,
    ) -> RpcResult<SignedTransaction> {
        self.sign("signrawtransactionwithwallet", vec![json!(transaction_hex(tx))])
            .await
    }

    async fn sign_raw_transaction_with_key(
        &self,
        tx: &Transaction,
        wif_keys: &[String],
    ) -> RpcResult<SignedTransaction> {
        self.sign(
            "signrawtransactionwithkey",
            vec![json!(transaction_hex(tx)), json!(wif_keys)],
        )
        .await
    }

    async fn send_raw_transaction(&self, tx: &Transaction) -> RpcResult<Txid> {
        self.call("sendrawtransaction", vec![json!(transaction_hex(tx))])
            .await
    }

    async fn get_wallet_info(&self) -> RpcResult<WalletInfo> {
        self.call("getwalletinfo", vec![]).await
    }

    async fn wallet_passphrase(&self, passphrase: &str, timeout_secs: u64) -> RpcResult<()> {
        self.call("walletpassphrase", vec![json!(passphrase), json!(timeout_secs)])
            .await
    }

    async fn import_address(&self, address: &str, label: &str, rescan: bool) -> RpcResult<()> {
        self.call(
            "importaddress",
            vec![json!(address), json!(label), json!(rescan)],
        )
        .await
    }

    async fn import_pubkey(&self, pubkey: &PublicKey, rescan: bool) -> RpcResult<()> {
        self.call(
            "importpubkey",
            vec![json!(pubkey.to_string()), json!(""), json!(rescan)],
        )
        .await
    }

    async fn create_wallet(&self, name: &str, options: CreateWalletOptions) -> RpcResult<()> {
        let params = vec![
            json!(name),
            json!(options.disable_private_keys),
            json!(options.blank),
            json!(""),
            json!(false),
            json!(options.descriptors),
            json!(options.load_on_startup),
        ];
        let _: Value = self.call("createwallet", params).await?;
        Ok(())
    }

    async fn load_wallet(&self, name: &str) -> RpcResult<()> {
        let _: Value = self.call("loadwallet", vec![json!(name)]).await?;
        Ok(())
    }

    async fn get_address_info(&self, address: &str) -> RpcResult<AddressInfo> {
        self.call("getaddressinfo", vec![json!(address)]).await
    }

    async fn estimate_smart_fee(&self, conf_target: u16) -> RpcResult<FeeEstimate> {
        self.call(
            "estimatesmartfee",
            vec![json!(conf_target), json!("CONSERVATIVE")],
        )
        .await
    }

    async fn get_transaction(&self, txid: &Txid) -> RpcResult<WalletTransaction> {
        self.call("gettransaction", vec![json!(txid.to_string())])
            .await
    }

    async fn get_raw_transaction(&self, txid: &Txid) -> RpcResult<Transaction> {
        let hex_tx: String = self
            .call("getrawtransaction", vec![json!(txid.to_string()), json!(false)])
            .await?;
        Self::decode_transaction("getrawtransaction", &hex_tx)
    }

    async fn get_raw_transaction_verbose(&self, txid: &Txid) -> RpcResult<RawTransactionInfo> {
        self.call("getrawtransaction", vec![json!(txid.to_string()), json!(true)])
            .await
    }

    async fn get_block(&self, hash: &BlockHash) -> RpcResult<Block> {
        let hex_block: String = self
            .call("getblock", vec![json!(hash.to_string()), json!(0)])
            .await?;
        Self::decode_hex("getblock", &hex_block)
    }

    async fn get_block_verbose(&self, hash: &BlockHash) -> RpcResult<BlockInfo> {
        self.call("getblock", vec![json!(hash.to_string()), json!(1)])
            .await
    }

    async fn get_blockchain_info(&self) -> RpcResult<BlockchainInfo> {
        self.call("getblockchaininfo", vec![]).await
    }

    async fn wallet_create_funded_psbt(
        &self,
        outputs: Vec<RawOutput>,
        options: FundOptions,
    ) -> RpcResult<FundedPsbt> {
        let outputs: Vec<Value> = outputs.iter().map(RawOutput::to_json).collect();
        self.call(
            "walletcreatefundedpsbt",
            vec![json!([]), Value::Array(outputs), json!(0), options.to_json()],
        )
        .await
    }

    async fn ping(&self) -> RpcResult<()> {
        let _: Value = self.call("ping", vec![]).await?;
        Ok(())
    }
}
