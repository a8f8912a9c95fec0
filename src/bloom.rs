//! BIP37 Bloom Filter
//!
//! Just enough of BIP37 to select the transactions a partial Merkle tree
//! should prove: filter sizing, murmur3 hashing and the match-and-update rule
//! applied to a block's transactions.

use bitcoin::consensus::encode::serialize;
use bitcoin::hashes::Hash;
use bitcoin::script::Instruction;
use bitcoin::{OutPoint, Script, Transaction};

/// Lower bound for the false positive rate
const MIN_FALSE_POSITIVE_RATE: f64 = 1e-9;

/// BIP37 size limits
const MAX_FILTER_SIZE: u32 = 36_000;
const MAX_HASH_FUNCS: u32 = 50;

/// Multiplier from BIP37 for deriving hash seeds
const SEED_MULTIPLIER: u32 = 0xFBA4_C795;

/// ln(2)^2
const LN2_SQUARED: f64 = std::f64::consts::LN_2 * std::f64::consts::LN_2;

/// Which outpoints get added to the filter on an output match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomUpdate {
    None,
    All,
}

/// Probabilistic set over byte strings
#[derive(Debug, Clone)]
pub struct BloomFilter {
    data: Vec<u8>,
    hash_funcs: u32,
    tweak: u32,
    update: BloomUpdate,
}

impl BloomFilter {
    /// Create a filter sized for `elements` entries at `fp_rate`
    pub fn new(elements: u32, tweak: u32, fp_rate: f64, update: BloomUpdate) -> Self {
        let elements = elements.max(1);
        let fp_rate = fp_rate.clamp(MIN_FALSE_POSITIVE_RATE, 1.0);

        let bits = (-1.0 * elements as f64 * fp_rate.ln() / LN2_SQUARED) as u32;
        let data_len = bits.min(MAX_FILTER_SIZE * 8) / 8;

        let hash_funcs = ((data_len * 8) as f64 / elements as f64 * std::f64::consts::LN_2) as u32;
        let hash_funcs = hash_funcs.min(MAX_HASH_FUNCS);

        Self {
            data: vec![0u8; data_len.max(1) as usize],
            hash_funcs,
            tweak,
            update,
        }
    }

    /// Filter holding a single 32-byte hash
    pub fn for_hash(hash: &[u8; 32]) -> Self {
        let mut filter = Self::new(1, 0, 0.0, BloomUpdate::All);
        filter.add(hash);
        filter
    }

    fn bit_index(&self, hash_num: u32, data: &[u8]) -> usize {
        let seed = hash_num.wrapping_mul(SEED_MULTIPLIER).wrapping_add(self.tweak);
        (murmur3(seed, data) % (self.data.len() as u32 * 8)) as usize
    }

    pub fn add(&mut self, data: &[u8]) {
        for i in 0..self.hash_funcs {
            let idx = self.bit_index(i, data);
            self.data[idx >> 3] |= 1 << (idx & 7);
        }
    }

    pub fn contains(&self, data: &[u8]) -> bool {
        (0..self.hash_funcs).all(|i| {
            let idx = self.bit_index(i, data);
            self.data[idx >> 3] & (1 << (idx & 7)) != 0
        })
    }

    fn contains_outpoint(&self, outpoint: &OutPoint) -> bool {
        self.contains(&serialize(outpoint))
    }

    fn matches_pushes(&self, script: &Script) -> bool {
        script.instructions().any(|ins| match ins {
            Ok(Instruction::PushBytes(push)) => {
                !push.is_empty() && self.contains(push.as_bytes())
            }
            _ => false,
        })
    }

    /// BIP37 transaction match; outputs matching with update-all feed their
    /// outpoint back into the filter so later spends also match
    pub fn match_tx_and_update(&mut self, tx: &Transaction) -> bool {
        let txid = tx.compute_txid();
        let mut matched = self.contains(txid.as_byte_array());

        for (vout, output) in tx.output.iter().enumerate() {
            if self.matches_pushes(&output.script_pubkey) {
                matched = true;
                if self.update == BloomUpdate::All {
                    let outpoint = OutPoint::new(txid, vout as u32);
                    self.add(&serialize(&outpoint));
                }
            }
        }

        if matched {
            return true;
        }

        tx.input.iter().any(|input| {
            self.contains_outpoint(&input.previous_output) || self.matches_pushes(&input.script_sig)
        })
    }
}

/// MurmurHash3 (x86, 32-bit)
pub fn murmur3(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h1 = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let mut k1 = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);

        h1 ^= k1;
        h1 = h1.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    let mut k1 = 0u32;
    if tail.len() >= 3 {
        k1 ^= (tail[2] as u32) << 16;
    }
    if tail.len() >= 2 {
        k1 ^= (tail[1] as u32) << 8;
    }
    if !tail.is_empty() {
        k1 ^= tail[0] as u32;
        k1 = k1.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h1 ^= k1;
    }

    h1 ^= data.len() as u32;
    h1 ^= h1 >> 16;
    h1 = h1.wrapping_mul(0x85eb_ca6b);
    h1 ^= h1 >> 13;
    h1 = h1.wrapping_mul(0xc2b2_ae35);
    h1 ^= h1 >> 16;
    h1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_murmur3_vectors() {
        assert_eq!(murmur3(0x0000_0000, &[]), 0x0000_0000);
        assert_eq!(murmur3(0xFBA4_C795, &[]), 0x6a39_6f08);
        assert_eq!(murmur3(0xffff_ffff, &[]), 0x81f1_6f39);
        assert_eq!(murmur3(0x0000_0000, &[0x00]), 0x514e_28b7);
        assert_eq!(murmur3(0xFBA4_C795, &[0x00]), 0xea3f_0b17);
        assert_eq!(murmur3(0x0000_0000, &[0xff]), 0xfd6c_f10d);
        assert_eq!(murmur3(0x0000_0000, &[0x00, 0x11]), 0x16c6_b7ab);
        assert_eq!(murmur3(0x0000_0000, &[0x00, 0x11, 0x22]), 0x8eb5_1c3d);
        assert_eq!(
            murmur3(0x0000_0000, &hex::decode("0011223344556677").unwrap()),
            0x8034_d2a0
        );
    }

    #[test]
    fn test_single_hash_filter_sizing() {
        let filter = BloomFilter::new(1, 0, 0.0, BloomUpdate::All);
        assert_eq!(filter.data.len(), 5);
        assert_eq!(filter.hash_funcs, 27);
    }

    #[test]
    fn test_contains() {
        let hash = [0xabu8; 32];
        let filter = BloomFilter::for_hash(&hash);

        assert!(filter.contains(&hash));
        assert!(!filter.contains(&[0xcdu8; 32]));
    }
}
