//! Merkle Proofs for SPV Verification
//!
//! Two proof shapes are produced for the settlement chain:
//!
//! 1. A Merkle branch: sibling hashes from leaf to root plus a bit path, bit
//!    `i` set when the proven node is the right child at level `i`.
//! 2. A serialized partial Merkle tree (BIP37 `merkleblock` body) selecting a
//!    single transaction through a bloom filter.

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::merkle_tree::PartialMerkleTree;
use bitcoin::{Block, Txid};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::bloom::BloomFilter;

/// Merkle proof errors
#[derive(Debug, Error)]
pub enum MerkleError {
    #[error("transaction {0} is not in the merkle tree")]
    TransactionNotInMerkleTree(Txid),

    #[error("bloom filter matched {matches} transactions, proof would be ambiguous")]
    AmbiguousProof { matches: usize },

    #[error("block has no transactions")]
    EmptyBlock,

    #[error("transaction index {index} out of range for {count} transactions")]
    IndexOutOfRange { index: u32, count: u32 },
}

/// Inclusion branch for one transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleBranch {
    /// Sibling hashes, leaf to root, in display (reversed) byte order
    pub hashes: Vec<[u8; 32]>,
    /// Bit `i` set: sibling `i` is hashed on the left
    pub path: u32,
}

impl MerkleBranch {
    /// Fold the branch over `txid`, returning the root in internal byte order
    pub fn compute_root(&self, txid: &Txid) -> [u8; 32] {
        let mut current = txid.to_byte_array();

        for (level, hash) in self.hashes.iter().enumerate() {
            let mut sibling = *hash;
            sibling.reverse();

            current = if self.path & (1 << level) != 0 {
                double_sha256_pair(&sibling, &current)
            } else {
                double_sha256_pair(&current, &sibling)
            };
        }

        current
    }
}

/// Double SHA256 of two 32-byte values concatenated
fn double_sha256_pair(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut combined = [0u8; 64];
    combined[0..32].copy_from_slice(left);
    combined[32..64].copy_from_slice(right);
    let first = Sha256::digest(combined);
    Sha256::digest(first).into()
}

/// Merkle tree as a flat array: leaves first, root last
///
/// The array is sized for the next power of two, so absent nodes are `None`.
/// A parent whose right child is absent hashes its left child with itself.
pub fn build_merkle_tree_store(txids: &[Txid]) -> Vec<Option<[u8; 32]>> {
    if txids.is_empty() {
        return Vec::new();
    }

    let width = txids.len().next_power_of_two();
    let size = width * 2 - 1;
    let mut store: Vec<Option<[u8; 32]>> = vec![None; size];

    for (i, txid) in txids.iter().enumerate() {
        store[i] = Some(txid.to_byte_array());
    }

    let mut offset = width;
    let mut i = 0;
    while i < size - 1 {
        store[offset] = match (store[i], store[i + 1]) {
            (None, _) => None,
            (Some(left), None) => Some(double_sha256_pair(&left, &left)),
            (Some(left), Some(right)) => Some(double_sha256_pair(&left, &right)),
        };
        offset += 1;
        i += 2;
    }

    store
}

/// Drop the absent nodes, leaving each level packed one after the other
pub fn compact_tree(store: &[Option<[u8; 32]>]) -> Vec<[u8; 32]> {
    store.iter().flatten().copied().collect()
}

/// Position of `txid` among the tree nodes
pub fn find_transaction_index(tree: &[[u8; 32]], txid: &Txid) -> Result<u32, MerkleError> {
    let target = txid.to_byte_array();
    tree.iter()
        .position(|node| *node == target)
        .map(|i| i as u32)
        .ok_or(MerkleError::TransactionNotInMerkleTree(*txid))
}

/// Branch for leaf `tx_index` of a compact tree with `tx_count` leaves
pub fn build_merkle_branch(
    tree: &[[u8; 32]],
    tx_count: u32,
    tx_index: u32,
) -> Result<MerkleBranch, MerkleError> {
    if tx_count == 0 {
        return Err(MerkleError::EmptyBlock);
    }
    if tx_index >= tx_count {
        return Err(MerkleError::IndexOutOfRange {
            index: tx_index,
            count: tx_count,
        });
    }

    let mut hashes = Vec::new();
    let mut path = 0u32;
    let mut level_offset = 0usize;
    let mut node = tx_index;
    let mut level = 0u32;
    let mut level_size = tx_count;

    while level_size > 1 {
        let sibling = if node % 2 == 0 {
            // odd-width levels pair the last node with itself
            (node + 1).min(level_size - 1)
        } else {
            path |= 1 << level;
            node - 1
        };

        let mut hash = tree[level_offset + sibling as usize];
        hash.reverse();
        hashes.push(hash);

        level_offset += level_size as usize;
        node /= 2;
        level += 1;
        level_size = (level_size + 1) / 2;
    }

    Ok(MerkleBranch { hashes, path })
}

/// Branch for `txid` inside `block`
pub fn merkle_branch_for_block(block: &Block, txid: &Txid) -> Result<MerkleBranch, MerkleError> {
    let txids: Vec<Txid> = block.txdata.iter().map(|tx| tx.compute_txid()).collect();
    let tree = compact_tree(&build_merkle_tree_store(&txids));

    let index = find_transaction_index(&tree, txid)?;
    if index as usize >= txids.len() {
        // found among internal nodes, not a leaf
        return Err(MerkleError::TransactionNotInMerkleTree(*txid));
    }

    build_merkle_branch(&tree, txids.len() as u32, index)
}

/// Serialized partial Merkle tree proving `txid` is in `block`
///
/// Layout: u32 LE transaction count, compact-size hash list, compact-size
/// flag bytes.
pub fn serialize_partial_merkle_tree(txid: &Txid, block: &Block) -> Result<Vec<u8>, MerkleError> {
    if block.txdata.is_empty() {
        return Err(MerkleError::EmptyBlock);
    }

    let mut filter = BloomFilter::for_hash(&txid.to_byte_array());
    let mut txids = Vec::with_capacity(block.txdata.len());
    let mut matches = Vec::with_capacity(block.txdata.len());

    for tx in &block.txdata {
        txids.push(tx.compute_txid());
        matches.push(filter.match_tx_and_update(tx));
    }

    let matched = matches.iter().filter(|m| **m).count();
    if matched > 1 {
        return Err(MerkleError::AmbiguousProof { matches: matched });
    }
    if matched == 0 || !txids.contains(txid) {
        return Err(MerkleError::TransactionNotInMerkleTree(*txid));
    }

    let pmt = PartialMerkleTree::from_txids(&txids, &matches);
    Ok(serialize(&pmt))
}
