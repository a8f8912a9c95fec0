//! Root Error Type
//!
//! Every module keeps its own error enum; [`FlyoverError`] collects them for
//! callers that drive the whole engine (the CLI, the bridge service).

use thiserror::Error;

use crate::address::AddressError;
use crate::chain::QueryError;
use crate::config::ConfigError;
use crate::federation::FederationError;
use crate::logging::LoggingError;
use crate::merkle::MerkleError;
use crate::rpc::RpcError;
use crate::script::ScriptError;
use crate::units::UnitsError;
use crate::wallet::WalletError;

/// Root error type for the Flyover BTC engine
#[derive(Debug, Error)]
pub enum FlyoverError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("address error: {0}")]
    Address(#[from] AddressError),

    #[error("script error: {0}")]
    Script(#[from] ScriptError),

    #[error("federation error: {0}")]
    Federation(#[from] FederationError),

    #[error("merkle proof error: {0}")]
    Merkle(#[from] MerkleError),

    #[error("node RPC failure: {0}")]
    Rpc(#[from] RpcError),

    #[error("chain query error: {0}")]
    Query(#[from] QueryError),

    #[error("wallet error: {0}")]
    Wallet(#[from] WalletError),

    #[error("amount error: {0}")]
    Units(#[from] UnitsError),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl FlyoverError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// The operation can succeed later without any change from the caller
    pub fn is_retry_later(&self) -> bool {
        matches!(
            self,
            FlyoverError::Wallet(WalletError::WalletScanning { .. })
                | FlyoverError::Wallet(WalletError::RescanStarted { .. })
        )
    }

    /// The operation can never succeed with this configuration
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            FlyoverError::Wallet(WalletError::UnsupportedOperation { .. })
        )
    }

    /// Stable error code for logs and API consumers
    pub fn error_code(&self) -> &'static str {
        match self {
            FlyoverError::Config(_) => "CONFIG_ERROR",
            FlyoverError::Logging(_) => "LOGGING_ERROR",
            FlyoverError::Address(_) => "INVALID_ADDRESS",
            FlyoverError::Script(_) => "SCRIPT_ERROR",
            FlyoverError::Federation(e) => match e.root() {
                FederationError::RedeemScriptMismatch { .. } => "REDEEM_SCRIPT_MISMATCH",
                FederationError::Address(_) => "INVALID_ADDRESS",
                _ => "FEDERATION_ERROR",
            },
            FlyoverError::Merkle(MerkleError::AmbiguousProof { .. }) => "AMBIGUOUS_PROOF",
            FlyoverError::Merkle(MerkleError::TransactionNotInMerkleTree(_)) => {
                "TRANSACTION_NOT_IN_MERKLE_TREE"
            }
            FlyoverError::Merkle(_) => "MERKLE_ERROR",
            FlyoverError::Rpc(_) => "NODE_RPC_FAILURE",
            FlyoverError::Query(QueryError::Rpc { .. }) => "NODE_RPC_FAILURE",
            FlyoverError::Query(QueryError::Address(_)) => "INVALID_ADDRESS",
            FlyoverError::Query(_) => "QUERY_ERROR",
            FlyoverError::Wallet(e) => match e {
                WalletError::Rpc { .. } => "NODE_RPC_FAILURE",
                WalletError::Address(_) => "INVALID_ADDRESS",
                WalletError::Amount(UnitsError::NonFiniteAmount(_)) => "NON_FINITE_AMOUNT",
                WalletError::UnsupportedOperation { .. } => "UNSUPPORTED_OPERATION",
                WalletError::WalletScanning { .. } => "WALLET_SCANNING",
                WalletError::RescanStarted { .. } => "RESCAN_STARTED",
                WalletError::IncompleteSignature => "INCOMPLETE_SIGNATURE",
                _ => "WALLET_ERROR",
            },
            FlyoverError::Units(UnitsError::NonFiniteAmount(_)) => "NON_FINITE_AMOUNT",
            FlyoverError::Units(_) => "AMOUNT_ERROR",
            FlyoverError::InvalidInput(_) => "INVALID_INPUT",
        }
    }
}

/// Result type alias using FlyoverError
pub type Result<T> = std::result::Result<T, FlyoverError>;
