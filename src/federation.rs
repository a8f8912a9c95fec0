//! Federation Redeem Scripts and Flyover Derivation
//!
//! # How it works:
//!
//! ## Federation script
//! The federation custodies peg funds behind an N-of-M multisig. Once the
//! emergency recovery procedure (ERP) is active the script gains a timelocked
//! fallback branch:
//!
//! ```text
//! OP_NOTIF
//!     OP_m <fed keys...> OP_n
//! OP_ELSE
//!     <csv> OP_CHECKSEQUENCEVERIFY OP_DROP
//!     OP_k <erp keys...> OP_j
//! OP_ENDIF
//! OP_CHECKMULTISIG
//! ```
//!
//! ## Flyover address
//! Each bridge operation gets its own address without a new federation key:
//! `<derivation value> OP_DROP` is prefixed to the federation script, where the
//! derivation value is `keccak256(quote_hash || refund || lbc || lp)`.

use bitcoin::opcodes::all::*;
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::{Network, PublicKey, Script, ScriptBuf};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::address::{self, AddressError};
use crate::script::{self, ScriptError, ScriptWrapping};

/// Push opcode for the 32-byte derivation value that starts every flyover script
pub const FLYOVER_PREFIX: u8 = 0x20;

/// ERP activation delay in blocks on mainnet
pub const ERP_CSV_MAINNET: u32 = 52_560;

/// ERP activation delay in blocks on testnet
pub const ERP_CSV_TESTNET: u32 = 52_560;

/// ERP activation delay on every other network
pub const ERP_CSV_DEFAULT: u32 = 500;

/// Federation state as published by the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederationInfo {
    pub fed_size: usize,
    pub fed_threshold: usize,
    /// Script order, never sorted
    pub pub_keys: Vec<PublicKey>,
    pub fed_address: String,
    pub erp_keys: Vec<PublicKey>,
    pub active_fed_block_height: u64,
    pub iris_activation_height: u64,
    pub wrapping: ScriptWrapping,
}

impl FederationInfo {
    /// Whether the federation script carries the ERP branch: only once the
    /// federation became active strictly after Iris
    pub fn uses_erp(&self) -> bool {
        !self.erp_keys.is_empty() && self.active_fed_block_height > self.iris_activation_height
    }

    /// Majority threshold for the ERP keys
    pub fn erp_threshold(&self) -> usize {
        self.erp_keys.len() / 2 + 1
    }

    fn check(&self) -> Result<(), FederationError> {
        if self.fed_size != self.pub_keys.len() {
            return Err(FederationError::InvalidFederation(format!(
                "federation size {} does not match {} public keys",
                self.fed_size,
                self.pub_keys.len()
            )));
        }
        if self.fed_threshold == 0 || self.fed_threshold > self.fed_size {
            return Err(FederationError::InvalidFederation(format!(
                "threshold {} out of range for size {}",
                self.fed_threshold, self.fed_size
            )));
        }
        Ok(())
    }
}

/// Inputs binding a bridge operation to its flyover address
#[derive(Debug, Clone)]
pub struct FlyoverDerivationArgs {
    pub quote_hash: [u8; 32],
    pub user_btc_refund_address: Vec<u8>,
    pub lbc_address: Vec<u8>,
    pub lp_btc_address: Vec<u8>,
}

impl FlyoverDerivationArgs {
    /// keccak256 over the concatenated fields
    pub fn derivation_value_hash(&self) -> [u8; 32] {
        let mut hasher = Keccak256::new();
        hasher.update(self.quote_hash);
        hasher.update(&self.user_btc_refund_address);
        hasher.update(&self.lbc_address);
        hasher.update(&self.lp_btc_address);
        hasher.finalize().into()
    }
}

/// Derived deposit address and the script that spends from it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlyoverDerivation {
    pub address: String,
    /// Hex-encoded flyover redeem script
    pub redeem_script: String,
}

/// Errors for federation scripts
#[derive(Debug, Error)]
pub enum FederationError {
    #[error("invalid federation: {0}")]
    InvalidFederation(String),

    #[error("redeem script does not match federation address {expected}")]
    RedeemScriptMismatch { expected: String },

    #[error("federation address: {0}")]
    Address(#[from] AddressError),

    #[error("script: {0}")]
    Script(#[from] ScriptError),

    #[error("{context}: {source}")]
    Context {
        context: &'static str,
        #[source]
        source: Box<FederationError>,
    },
}

impl FederationError {
    fn context(self, context: &'static str) -> Self {
        Self::Context {
            context,
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context layers
    pub fn root(&self) -> &FederationError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// CSV delay for the ERP branch on `network`
pub fn erp_csv_value(network: Network) -> u32 {
    match network {
        Network::Bitcoin => ERP_CSV_MAINNET,
        Network::Testnet => ERP_CSV_TESTNET,
        _ => ERP_CSV_DEFAULT,
    }
}

/// Minimal little-endian script number encoding
fn script_num_bytes(value: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(5);
    let mut v = value;
    while v > 0 {
        out.push((v & 0xff) as u8);
        v >>= 8;
    }
    // Keep the number positive when the top bit is taken
    if out.last().map_or(false, |b| b & 0x80 != 0) {
        out.push(0x00);
    }
    out
}

/// Build the federation redeem script
pub fn build_federation_redeem_script(
    fed_info: &FederationInfo,
    network: Network,
) -> Result<ScriptBuf, FederationError> {
    fed_info.check()?;

    if !fed_info.uses_erp() {
        return Ok(script::multisig_script(
            fed_info.fed_threshold,
            &fed_info.pub_keys,
        )?);
    }

    let csv = PushBytesBuf::try_from(script_num_bytes(erp_csv_value(network)))
        .map_err(|e| FederationError::InvalidFederation(e.to_string()))?;

    let builder = Builder::new().push_opcode(OP_NOTIF);
    let builder =
        script::push_multisig_body(builder, fed_info.fed_threshold, &fed_info.pub_keys)?;
    let builder = builder.push_opcode(OP_ELSE).push_slice(csv);
    let builder = builder.push_opcode(OP_CSV).push_opcode(OP_DROP);
    let builder =
        script::push_multisig_body(builder, fed_info.erp_threshold(), &fed_info.erp_keys)?;

    Ok(builder
        .push_opcode(OP_ENDIF)
        .push_opcode(OP_CHECKMULTISIG)
        .into_script())
}

/// Check that `script` is what the federation address commits to
pub fn validate_redeem_script(
    fed_info: &FederationInfo,
    script: &Script,
    network: Network,
) -> Result<(), FederationError> {
    let expected = address::decode_hash160(&fed_info.fed_address, network)?;
    let actual = script::wrapped_script_hash(script, fed_info.wrapping);

    if expected != actual {
        return Err(FederationError::RedeemScriptMismatch {
            expected: fed_info.fed_address.clone(),
        });
    }
    Ok(())
}

/// `0x20 <derivation value> OP_DROP <federation script>`
pub fn build_flyover_redeem_script(derivation_value: &[u8; 32], fed_script: &Script) -> ScriptBuf {
    let mut bytes = Builder::new()
        .push_slice(derivation_value)
        .push_opcode(OP_DROP)
        .into_script()
        .into_bytes();
    bytes.extend_from_slice(fed_script.as_bytes());
    ScriptBuf::from_bytes(bytes)
}

/// Derive the flyover address for a bridge operation
///
/// An empty `existing_script` means "build the federation script first".
pub fn compute_flyover_derivation(
    fed_info: &FederationInfo,
    args: &FlyoverDerivationArgs,
    network: Network,
    existing_script: Option<&Script>,
) -> Result<FlyoverDerivation, FederationError> {
    let fed_script = match existing_script {
        Some(script) if !script.is_empty() => {
            validate_redeem_script(fed_info, script, network)
                .map_err(|e| e.context("supplied redeem script"))?;
            script.to_owned()
        }
        _ => {
            let built = build_federation_redeem_script(fed_info, network)
                .map_err(|e| e.context("building federation redeem script"))?;
            validate_redeem_script(fed_info, &built, network)
                .map_err(|e| e.context("validating federation redeem script"))?;
            built
        }
    };

    let derivation_value = args.derivation_value_hash();
    let flyover_script = build_flyover_redeem_script(&derivation_value, &fed_script);
    let address = script::wrapped_address(&flyover_script, fed_info.wrapping, network)
        .map_err(|e| FederationError::from(e).context("wrapping flyover script"))?;

    tracing::debug!(
        target: "flyover::federation",
        address = %address,
        derivation_value = %hex::encode(derivation_value),
        "Computed flyover derivation"
    );

    Ok(FlyoverDerivation {
        address: address.to_string(),
        redeem_script: hex::encode(flyover_script.as_bytes()),
    })
}
