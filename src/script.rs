//! Script Assembly Helpers
//!
//! Thin layer over `bitcoin::script::Builder` for the handful of script
//! shapes the bridge needs: multisig bodies, P2SH / P2SH-P2WSH wrapping and
//! null-data outputs.

use bitcoin::hashes::{hash160, sha256, Hash};
use bitcoin::opcodes::all::*;
use bitcoin::opcodes::Opcode;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::{Address, Network, PublicKey, Script, ScriptBuf};
use thiserror::Error;

/// Largest null-data payload relayed by standard nodes
pub const MAX_NULL_DATA_SIZE: usize = 80;

/// `OP_1` .. `OP_16`, indexed by `n - 1`
const SMALL_INT_OPCODES: [Opcode; 16] = [
    OP_PUSHNUM_1,
    OP_PUSHNUM_2,
    OP_PUSHNUM_3,
    OP_PUSHNUM_4,
    OP_PUSHNUM_5,
    OP_PUSHNUM_6,
    OP_PUSHNUM_7,
    OP_PUSHNUM_8,
    OP_PUSHNUM_9,
    OP_PUSHNUM_10,
    OP_PUSHNUM_11,
    OP_PUSHNUM_12,
    OP_PUSHNUM_13,
    OP_PUSHNUM_14,
    OP_PUSHNUM_15,
    OP_PUSHNUM_16,
];

/// Script building errors
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("no small-int opcode for {0}")]
    InvalidSmallInt(usize),

    #[error("null data payload is {0} bytes, limit is {MAX_NULL_DATA_SIZE}")]
    DataTooLarge(usize),

    #[error("invalid multisig: {0}")]
    InvalidMultisig(String),

    #[error("failed to wrap script: {0}")]
    Wrap(String),
}

/// How a redeem script is committed to in an address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptWrapping {
    /// Legacy P2SH
    P2sh,
    /// Segwit script nested in P2SH
    P2shP2wsh,
}

/// Dedicated push opcode for 1..=16
pub fn small_int_opcode(n: usize) -> Result<Opcode, ScriptError> {
    if !(1..=16).contains(&n) {
        return Err(ScriptError::InvalidSmallInt(n));
    }
    Ok(SMALL_INT_OPCODES[n - 1])
}

/// Append `OP_m <keys...> OP_n` to `builder`, keys in the given order
pub fn push_multisig_body(
    builder: Builder,
    threshold: usize,
    keys: &[PublicKey],
) -> Result<Builder, ScriptError> {
    if keys.is_empty() {
        return Err(ScriptError::InvalidMultisig("no public keys".to_string()));
    }
    if threshold == 0 || threshold > keys.len() {
        return Err(ScriptError::InvalidMultisig(format!(
            "threshold {} out of range for {} keys",
            threshold,
            keys.len()
        )));
    }

    let mut builder = builder.push_opcode(small_int_opcode(threshold)?);
    for key in keys {
        builder = builder.push_key(key);
    }
    Ok(builder.push_opcode(small_int_opcode(keys.len())?))
}

/// Standard `OP_m <keys...> OP_n OP_CHECKMULTISIG`
pub fn multisig_script(threshold: usize, keys: &[PublicKey]) -> Result<ScriptBuf, ScriptError> {
    Ok(push_multisig_body(Builder::new(), threshold, keys)?
        .push_opcode(OP_CHECKMULTISIG)
        .into_script())
}

/// `OP_RETURN <data>`
pub fn null_data_script(data: &[u8]) -> Result<ScriptBuf, ScriptError> {
    if data.len() > MAX_NULL_DATA_SIZE {
        return Err(ScriptError::DataTooLarge(data.len()));
    }
    let push = PushBytesBuf::try_from(data.to_vec())
        .map_err(|_| ScriptError::DataTooLarge(data.len()))?;
    Ok(ScriptBuf::new_op_return(push))
}

/// `OP_0 <sha256(script)>`
pub fn p2wsh_script_pubkey(witness_script: &Script) -> ScriptBuf {
    let digest = sha256::Hash::hash(witness_script.as_bytes());
    Builder::new()
        .push_opcode(OP_PUSHBYTES_0)
        .push_slice(digest.to_byte_array())
        .into_script()
}

/// Hash committed to by the P2SH address for `script` under `wrapping`
pub fn wrapped_script_hash(script: &Script, wrapping: ScriptWrapping) -> [u8; 20] {
    match wrapping {
        ScriptWrapping::P2sh => hash160::Hash::hash(script.as_bytes()).to_byte_array(),
        ScriptWrapping::P2shP2wsh => {
            let redeem = p2wsh_script_pubkey(script);
            hash160::Hash::hash(redeem.as_bytes()).to_byte_array()
        }
    }
}

/// Address paying to `script` under `wrapping`
pub fn wrapped_address(
    script: &Script,
    wrapping: ScriptWrapping,
    network: Network,
) -> Result<Address, ScriptError> {
    match wrapping {
        ScriptWrapping::P2sh => {
            Address::p2sh(script, network).map_err(|e| ScriptError::Wrap(e.to_string()))
        }
        ScriptWrapping::P2shP2wsh => Ok(Address::p2shwsh(script, network)),
    }
}
