//! Bitcoin Network Queries
//!
//! Read-only chain facts for the bridge: transaction lookup, block
//! resolution, proofs and the coinbase data needed to register segwit
//! transactions on the settlement chain.

use std::collections::HashMap;
use std::sync::Arc;

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::{Address, Amount, Block, BlockHash, Network, Transaction, Txid};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::address::{self, AddressError};
use crate::merkle::{self, MerkleBranch, MerkleError};
use crate::rpc::{BitcoinRpc, ListUnspentEntry, RpcError};
use crate::units::{self, UnitsError};

/// Chain query errors
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("{context}: {source}")]
    Rpc {
        context: &'static str,
        #[source]
        source: RpcError,
    },

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Merkle(#[from] MerkleError),

    #[error(transparent)]
    Units(#[from] UnitsError),

    #[error("transaction {0} is not confirmed")]
    NotConfirmed(Txid),

    #[error("block {0} has no coinbase")]
    MissingCoinbase(BlockHash),
}

/// Attach call-site context to a node failure
pub(crate) trait RpcContext<T> {
    fn rpc_context(self, context: &'static str) -> Result<T, QueryError>;
}

impl<T> RpcContext<T> for Result<T, RpcError> {
    fn rpc_context(self, context: &'static str) -> Result<T, QueryError> {
        self.map_err(|source| QueryError::Rpc { context, source })
    }
}

/// A transaction and the amounts it pays, grouped by address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitcoinTransactionInformation {
    pub hash: Txid,
    pub confirmations: u64,
    /// Address to amounts in output order
    pub outputs: HashMap<String, Vec<Amount>>,
}

impl BitcoinTransactionInformation {
    /// Total paid to `address`
    pub fn amount_to(&self, address: &str) -> Amount {
        self.outputs
            .get(address)
            .map(|amounts| amounts.iter().copied().sum())
            .unwrap_or(Amount::ZERO)
    }
}

/// Block that holds a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionBlockInfo {
    pub hash: BlockHash,
    pub height: u64,
    pub time: u64,
}

/// Coinbase data of the block holding a transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoinbaseInformation {
    /// Coinbase serialized without witness
    pub coinbase_transaction: Vec<u8>,
    pub witness_merkle_root: [u8; 32],
    /// First witness item of the coinbase input, when present
    pub witness_reserved_value: Option<[u8; 32]>,
    pub block_hash: BlockHash,
    pub block_height: u64,
    /// Partial Merkle tree proving the coinbase
    pub pmt: Vec<u8>,
}

/// Group UTXO entries by transaction
pub fn aggregate_unspent(
    entries: &[ListUnspentEntry],
) -> Result<Vec<BitcoinTransactionInformation>, UnitsError> {
    let mut by_txid: Vec<BitcoinTransactionInformation> = Vec::new();

    for entry in entries {
        let amount = units::btc_to_amount(entry.amount)?;
        let address = entry.address.clone().unwrap_or_default();

        let index = match by_txid.iter().position(|info| info.hash == entry.txid) {
            Some(index) => index,
            None => {
                by_txid.push(BitcoinTransactionInformation {
                    hash: entry.txid,
                    confirmations: entry.confirmations as u64,
                    outputs: HashMap::new(),
                });
                by_txid.len() - 1
            }
        };
        by_txid[index]
            .outputs
            .entry(address)
            .or_default()
            .push(amount);
    }

    Ok(by_txid)
}

/// Serialize `tx` in the legacy (pre-segwit) format
pub fn serialize_without_witness(tx: &Transaction) -> Vec<u8> {
    let mut stripped = tx.clone();
    for input in &mut stripped.input {
        input.witness.clear();
    }
    serialize(&stripped)
}

/// Read-only view of the chain through a node
#[derive(Clone)]
pub struct BitcoinNetworkQuery {
    rpc: Arc<dyn BitcoinRpc>,
    network: Network,
}

impl BitcoinNetworkQuery {
    pub fn new(rpc: Arc<dyn BitcoinRpc>, network: Network) -> Self {
        Self { rpc, network }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn validate_address(&self, address: &str) -> Result<(), QueryError> {
        Ok(address::validate_address(address, self.network)?)
    }

    /// Hash payload of `address`, with the version byte when `keep_version`
    pub fn decode_address(&self, address: &str, keep_version: bool) -> Result<Vec<u8>, QueryError> {
        Ok(address::decode_address(address, self.network, keep_version)?)
    }

    /// Current chain height
    pub async fn get_height(&self) -> Result<u64, QueryError> {
        let info = self
            .rpc
            .get_blockchain_info()
            .await
            .rpc_context("getting blockchain info")?;
        Ok(info.blocks)
    }

    /// Outputs and confirmations of `txid`
    ///
    /// Outputs without an address form (OP_RETURN, bare multisig) are skipped.
    pub async fn get_transaction_info(
        &self,
        txid: &Txid,
    ) -> Result<BitcoinTransactionInformation, QueryError> {
        let tx = self
            .rpc
            .get_raw_transaction(txid)
            .await
            .rpc_context("getting raw transaction")?;
        let verbose = self
            .rpc
            .get_raw_transaction_verbose(txid)
            .await
            .rpc_context("getting transaction details")?;

        let mut outputs: HashMap<String, Vec<Amount>> = HashMap::new();
        for output in &tx.output {
            if let Ok(address) = Address::from_script(&output.script_pubkey, self.network) {
                outputs
                    .entry(address.to_string())
                    .or_default()
                    .push(output.value);
            }
        }

        Ok(BitcoinTransactionInformation {
            hash: *txid,
            confirmations: verbose.confirmations.unwrap_or(0),
            outputs,
        })
    }

    /// Raw transaction bytes without witness data
    pub async fn get_raw_transaction(&self, txid: &Txid) -> Result<Vec<u8>, QueryError> {
        let tx = self
            .rpc
            .get_raw_transaction(txid)
            .await
            .rpc_context("getting raw transaction")?;
        Ok(serialize_without_witness(&tx))
    }

    /// Block hash, height and time of the block holding `txid`
    pub async fn get_transaction_block_info(
        &self,
        txid: &Txid,
    ) -> Result<TransactionBlockInfo, QueryError> {
        let block_hash = self.block_hash_of(txid).await?;
        let block = self
            .rpc
            .get_block_verbose(&block_hash)
            .await
            .rpc_context("getting block details")?;

        Ok(TransactionBlockInfo {
            hash: block.hash,
            height: block.height,
            time: block.time,
        })
    }

    /// Serialized partial Merkle tree proving `txid`
    pub async fn get_partial_merkle_tree(&self, txid: &Txid) -> Result<Vec<u8>, QueryError> {
        let block = self.block_of(txid).await?;
        let pmt = merkle::serialize_partial_merkle_tree(txid, &block)?;

        tracing::debug!(
            target: "flyover::proof",
            txid = %txid,
            bytes = pmt.len(),
            "Built partial merkle tree"
        );

        Ok(pmt)
    }

    /// Merkle branch proving `txid`
    pub async fn build_merkle_branch(&self, txid: &Txid) -> Result<MerkleBranch, QueryError> {
        let block = self.block_of(txid).await?;
        let branch = merkle::merkle_branch_for_block(&block, txid)?;

        tracing::debug!(
            target: "flyover::proof",
            txid = %txid,
            depth = branch.hashes.len(),
            path = branch.path,
            "Built merkle branch"
        );

        Ok(branch)
    }

    /// Coinbase data of the block holding `txid`
    pub async fn get_coinbase_information(
        &self,
        txid: &Txid,
    ) -> Result<CoinbaseInformation, QueryError> {
        let block_hash = self.block_hash_of(txid).await?;
        let block = self
            .rpc
            .get_block(&block_hash)
            .await
            .rpc_context("getting block")?;
        let details = self
            .rpc
            .get_block_verbose(&block_hash)
            .await
            .rpc_context("getting block details")?;

        let coinbase = block
            .txdata
            .first()
            .ok_or(QueryError::MissingCoinbase(block_hash))?;
        let coinbase_txid = coinbase.compute_txid();

        let witness_reserved_value = coinbase
            .input
            .first()
            .and_then(|input| input.witness.nth(0))
            .and_then(|item| <[u8; 32]>::try_from(item).ok());

        let witness_merkle_root = block
            .witness_root()
            .map(|root| root.to_byte_array())
            .unwrap_or([0u8; 32]);

        let pmt = merkle::serialize_partial_merkle_tree(&coinbase_txid, &block)?;

        Ok(CoinbaseInformation {
            coinbase_transaction: serialize_without_witness(coinbase),
            witness_merkle_root,
            witness_reserved_value,
            block_hash,
            block_height: details.height,
            pmt,
        })
    }

    async fn block_hash_of(&self, txid: &Txid) -> Result<BlockHash, QueryError> {
        let verbose = self
            .rpc
            .get_raw_transaction_verbose(txid)
            .await
            .rpc_context("getting transaction details")?;
        verbose.block_hash.ok_or(QueryError::NotConfirmed(*txid))
    }

    async fn block_of(&self, txid: &Txid) -> Result<Block, QueryError> {
        let block_hash = self.block_hash_of(txid).await?;
        self.rpc
            .get_block(&block_hash)
            .await
            .rpc_context("getting block")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{BlockInfo, BlockchainInfo, MockBitcoinRpc, RawTransactionInfo};
    use bitcoin::absolute::LockTime;
    use bitcoin::block::{Header, Version};
    use bitcoin::script::Builder;
    use bitcoin::transaction;
    use bitcoin::{
        CompactTarget, OutPoint, ScriptBuf, Sequence, TxIn, TxMerkleNode, TxOut, Witness,
    };

    fn coinbase_tx(height: i64) -> Transaction {
        Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::null(),
                script_sig: Builder::new().push_int(height).into_script(),
                sequence: Sequence::MAX,
                witness: Witness::from_slice(&[[0u8; 32]]),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(5_000_000_000),
                script_pubkey: Builder::new()
                    .push_opcode(bitcoin::opcodes::all::OP_RETURN)
                    .push_slice([0xaa; 32])
                    .into_script(),
            }],
        }
    }

    fn payment_tx(seed: u8, script_pubkey: ScriptBuf) -> Transaction {
        Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::from_byte_array([seed; 32]), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::from_slice(&[vec![seed; 71], vec![2u8; 33]]),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(10_000 * seed as u64),
                script_pubkey,
            }],
        }
    }

    fn block_with(txdata: Vec<Transaction>) -> Block {
        let mut block = Block {
            header: Header {
                version: Version::TWO,
                prev_blockhash: BlockHash::all_zeros(),
                merkle_root: TxMerkleNode::all_zeros(),
                time: 1_700_000_000,
                bits: CompactTarget::from_consensus(0x207f_ffff),
                nonce: 0,
            },
            txdata,
        };
        if let Some(root) = block.compute_merkle_root() {
            block.header.merkle_root = root;
        }
        block
    }

    fn p2wpkh(seed: u8) -> ScriptBuf {
        // v0 witness program over a 20-byte key hash
        Builder::new()
            .push_opcode(bitcoin::opcodes::OP_0)
            .push_slice([seed; 20])
            .into_script()
    }

    fn query_with(mock: MockBitcoinRpc) -> BitcoinNetworkQuery {
        BitcoinNetworkQuery::new(Arc::new(mock), Network::Regtest)
    }

    fn confirmed(txid: Txid, block_hash: BlockHash) -> RawTransactionInfo {
        RawTransactionInfo {
            txid,
            block_hash: Some(block_hash),
            confirmations: Some(6),
            block_time: Some(1_700_000_000),
        }
    }

    #[test]
    fn test_serialize_without_witness() {
        let tx = payment_tx(3, p2wpkh(3));
        let stripped = serialize_without_witness(&tx);

        assert!(stripped.len() < serialize(&tx).len());
        let decoded: Transaction = bitcoin::consensus::deserialize(&stripped).unwrap();
        assert_eq!(decoded.compute_txid(), tx.compute_txid());
        assert!(decoded.input[0].witness.is_empty());
    }

    #[test]
    fn test_aggregate_unspent() {
        let txid = Txid::from_byte_array([7u8; 32]);
        let entry = |vout, address: &str, amount| ListUnspentEntry {
            txid,
            vout,
            address: Some(address.to_string()),
            amount,
            confirmations: 3,
            spendable: true,
        };
        let entries = vec![entry(0, "a", 0.5), entry(1, "b", 0.25), entry(2, "a", 0.1)];

        let infos = aggregate_unspent(&entries).unwrap();
        assert_eq!(infos.len(), 1);
        assert_eq!(infos[0].confirmations, 3);
        assert_eq!(
            infos[0].outputs["a"],
            vec![Amount::from_sat(50_000_000), Amount::from_sat(10_000_000)]
        );
        assert_eq!(infos[0].amount_to("b"), Amount::from_sat(25_000_000));
        assert_eq!(infos[0].amount_to("c"), Amount::ZERO);
    }

    #[test]
    fn test_aggregate_unspent_rejects_nan() {
        let entries = vec![ListUnspentEntry {
            txid: Txid::from_byte_array([1u8; 32]),
            vout: 0,
            address: None,
            amount: f64::NAN,
            confirmations: 0,
            spendable: true,
        }];
        assert!(matches!(
            aggregate_unspent(&entries),
            Err(UnitsError::NonFiniteAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_get_height() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_get_blockchain_info().returning(|| {
            Ok(BlockchainInfo {
                chain: "regtest".to_string(),
                blocks: 812,
                headers: 812,
                best_block_hash: BlockHash::all_zeros(),
            })
        });

        assert_eq!(query_with(mock).get_height().await.unwrap(), 812);
    }

    #[tokio::test]
    async fn test_get_height_wraps_rpc_error() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_get_blockchain_info()
            .returning(|| Err(RpcError::Transport("connection refused".to_string())));

        let err = query_with(mock).get_height().await.unwrap_err();
        assert!(matches!(
            err,
            QueryError::Rpc {
                context: "getting blockchain info",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_get_transaction_info() {
        let tx = payment_tx(4, p2wpkh(9));
        let txid = tx.compute_txid();
        let expected_address = Address::from_script(&p2wpkh(9), Network::Regtest)
            .unwrap()
            .to_string();

        let mut mock = MockBitcoinRpc::new();
        let raw = tx.clone();
        mock.expect_get_raw_transaction()
            .returning(move |_| Ok(raw.clone()));
        mock.expect_get_raw_transaction_verbose()
            .returning(move |txid| Ok(confirmed(*txid, BlockHash::all_zeros())));

        let info = query_with(mock).get_transaction_info(&txid).await.unwrap();
        assert_eq!(info.hash, txid);
        assert_eq!(info.confirmations, 6);
        assert_eq!(info.amount_to(&expected_address), Amount::from_sat(40_000));
    }

    #[tokio::test]
    async fn test_unconfirmed_transaction_has_no_proof() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_get_raw_transaction_verbose().returning(|txid| {
            Ok(RawTransactionInfo {
                txid: *txid,
                block_hash: None,
                confirmations: None,
                block_time: None,
            })
        });

        let txid = Txid::from_byte_array([5u8; 32]);
        let err = query_with(mock)
            .get_partial_merkle_tree(&txid)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::NotConfirmed(t) if t == txid));
    }

    #[tokio::test]
    async fn test_build_merkle_branch_from_node_block() {
        let block = block_with(vec![
            coinbase_tx(100),
            payment_tx(1, p2wpkh(1)),
            payment_tx(2, p2wpkh(2)),
        ]);
        let txid = block.txdata[2].compute_txid();
        let block_hash = block.block_hash();

        let mut mock = MockBitcoinRpc::new();
        mock.expect_get_raw_transaction_verbose()
            .returning(move |txid| Ok(confirmed(*txid, block_hash)));
        let served = block.clone();
        mock.expect_get_block()
            .returning(move |_| Ok(served.clone()));

        let branch = query_with(mock).build_merkle_branch(&txid).await.unwrap();
        assert_eq!(
            branch.compute_root(&txid),
            block.header.merkle_root.to_byte_array()
        );
    }

    #[tokio::test]
    async fn test_get_coinbase_information() {
        let block = block_with(vec![coinbase_tx(200), payment_tx(1, p2wpkh(1))]);
        let txid = block.txdata[1].compute_txid();
        let block_hash = block.block_hash();

        let mut mock = MockBitcoinRpc::new();
        mock.expect_get_raw_transaction_verbose()
            .returning(move |txid| Ok(confirmed(*txid, block_hash)));
        let served = block.clone();
        mock.expect_get_block()
            .returning(move |_| Ok(served.clone()));
        mock.expect_get_block_verbose().returning(move |hash| {
            Ok(BlockInfo {
                hash: *hash,
                height: 200,
                time: 1_700_000_000,
                tx_count: 2,
                confirmations: 1,
            })
        });

        let info = query_with(mock)
            .get_coinbase_information(&txid)
            .await
            .unwrap();

        assert_eq!(info.block_hash, block_hash);
        assert_eq!(info.block_height, 200);
        assert_eq!(info.witness_reserved_value, Some([0u8; 32]));
        assert_eq!(
            info.witness_merkle_root,
            block.witness_root().unwrap().to_byte_array()
        );
        assert_eq!(
            info.coinbase_transaction,
            serialize_without_witness(&block.txdata[0])
        );
        assert!(!info.pmt.is_empty());
    }
}
