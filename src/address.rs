//! Bitcoin Address Codec
//!
//! Decodes and validates addresses for a given network and extracts the hash
//! payload the settlement chain works with:
//!
//! - base58 (P2PKH / P2SH): `version || hash160`, 21 bytes
//! - segwit (v0 / v1): `witness_version || program`

use bitcoin::{base58, Address, AddressType, Network};
use std::str::FromStr;
use thiserror::Error;

/// Length of a base58check payload (version byte + hash160)
const BASE58_PAYLOAD_LEN: usize = 21;

/// Address codec errors
#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("address {address} is not valid for network {network}")]
    NetworkMismatch { address: String, network: Network },
}

impl AddressError {
    fn invalid(address: &str, reason: impl ToString) -> Self {
        Self::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Parse an address and require it to belong to `network`
pub fn parse_address(address: &str, network: Network) -> Result<Address, AddressError> {
    let unchecked =
        Address::from_str(address.trim()).map_err(|e| AddressError::invalid(address, e))?;

    unchecked
        .require_network(network)
        .map_err(|_| AddressError::NetworkMismatch {
            address: address.to_string(),
            network,
        })
}

/// Check an address against a network
pub fn validate_address(address: &str, network: Network) -> Result<(), AddressError> {
    parse_address(address, network).map(|_| ())
}

/// Decode an address into its raw payload
///
/// With `keep_version` the base58 version byte (or the segwit witness version)
/// is kept as the first byte.
pub fn decode_address(
    address: &str,
    network: Network,
    keep_version: bool,
) -> Result<Vec<u8>, AddressError> {
    let parsed = parse_address(address, network)?;

    if let Some(program) = parsed.witness_program() {
        let bytes = program.program().as_bytes();
        let mut out = Vec::with_capacity(bytes.len() + 1);
        if keep_version {
            out.push(program.version().to_num());
        }
        out.extend_from_slice(bytes);
        return Ok(out);
    }

    let payload =
        base58::decode_check(address.trim()).map_err(|e| AddressError::invalid(address, e))?;
    if payload.len() != BASE58_PAYLOAD_LEN {
        return Err(AddressError::invalid(
            address,
            format!("unexpected payload length {}", payload.len()),
        ));
    }

    if keep_version {
        Ok(payload)
    } else {
        Ok(payload[1..].to_vec())
    }
}

/// Decode a base58 address into its 20-byte hash
pub fn decode_hash160(address: &str, network: Network) -> Result<[u8; 20], AddressError> {
    let payload = decode_address(address, network, false)?;
    payload
        .as_slice()
        .try_into()
        .map_err(|_| AddressError::invalid(address, "payload is not a 20-byte hash"))
}

/// Address type as seen by the node, `None` for unknown witness versions
pub fn address_type(address: &str, network: Network) -> Result<Option<AddressType>, AddressError> {
    Ok(parse_address(address, network)?.address_type())
}
