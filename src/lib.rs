//! Flyover BTC Engine
//!
//! Bitcoin side of the Flyover bridge, used by a liquidity provider to
//! custody and move bitcoin for peg-in and peg-out operations.
//!
//! ## Components
//!
//! 1. **Federation scripts** - federation redeem script (with the emergency
//!    recovery branch) and per-operation flyover addresses
//! 2. **SPV proofs** - Merkle branches and partial Merkle trees for the
//!    settlement chain
//! 3. **Wallets** - node, derived and watch-only strategies behind one
//!    trait
//!
//! Everything that needs chain data goes through the [`rpc::BitcoinRpc`]
//! trait; [`rpc::BitcoindClient`] is the JSON-RPC implementation.

pub mod address;
pub mod bloom;
pub mod chain;
pub mod config;
pub mod error;
pub mod federation;
pub mod logging;
pub mod merkle;
pub mod rpc;
pub mod script;
pub mod units;
pub mod wallet;

// Re-exports: errors
pub use error::{FlyoverError, Result};

// Re-exports: federation
pub use federation::{
    build_federation_redeem_script, compute_flyover_derivation, validate_redeem_script,
    FederationError, FederationInfo, FlyoverDerivation, FlyoverDerivationArgs,
};
pub use script::ScriptWrapping;

// Re-exports: proofs
pub use merkle::{
    build_merkle_branch, serialize_partial_merkle_tree, MerkleBranch, MerkleError,
};

// Re-exports: chain queries
pub use chain::{
    BitcoinNetworkQuery, BitcoinTransactionInformation, CoinbaseInformation, QueryError,
    TransactionBlockInfo,
};

// Re-exports: node
pub use rpc::{BitcoinRpc, BitcoindClient, RpcError};

// Re-exports: wallets
pub use wallet::{
    build_wallet, BitcoinWallet, DerivedWallet, FeeEstimation, KeyAccount, LocalAccount,
    NodeWallet, WalletConfig, WalletError, WalletKind, WatchOnlyWallet,
};

// Re-exports: configuration
pub use config::{ConfigError, FlyoverConfig};
