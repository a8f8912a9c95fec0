//! Environment-based Configuration for the Flyover BTC Engine
//!
//! Secrets (node password, wallet passphrase, signer key) only come from the
//! environment, never from defaults.
//!
//! # Environment Variables
//!
//! ## Node
//! - `FLYOVER_NETWORK` - "mainnet", "testnet", "signet" or "regtest" (default: "regtest")
//! - `FLYOVER_BTC_RPC_URL` - bitcoind JSON-RPC endpoint (default per network)
//! - `FLYOVER_BTC_RPC_USER` / `FLYOVER_BTC_RPC_PASSWORD` - RPC credentials
//!
//! ## Wallet
//! - `FLYOVER_WALLET_MODE` - "node", "derived" or "watch_only" (default: "node")
//! - `FLYOVER_WALLET_NAME` - node wallet to use (default: "flyover")
//! - `FLYOVER_WALLET_PASSPHRASE` - unlocks the node wallet
//! - `FLYOVER_WALLET_UNLOCK_SECS` - unlock window (default: 60)
//! - `FLYOVER_FIXED_FEE_RATE` - BTC/kvB; the node estimates when unset
//! - `FLYOVER_FEE_CONF_TARGET` - confirmation target for estimation (default: 2)
//! - `FLYOVER_BTC_SIGNER_KEY` - hex secret for the derived wallet
//!
//! ## Federation (CLI `derive`)
//! - `FLYOVER_FED_PUBKEYS` / `FLYOVER_FED_ERP_PUBKEYS` - comma separated hex keys
//! - `FLYOVER_FED_THRESHOLD`, `FLYOVER_FED_ADDRESS`
//! - `FLYOVER_FED_ACTIVE_HEIGHT`, `FLYOVER_FED_IRIS_HEIGHT`
//! - `FLYOVER_FED_WRAPPING` - "p2sh" or "p2sh-p2wsh" (default)
//!
//! ## Optional
//! - `FLYOVER_LOG_LEVEL` - trace, debug, info, warn, error

use std::env;
use std::str::FromStr;

use bitcoin::{Network, PublicKey};
use thiserror::Error;

use crate::federation::FederationInfo;
use crate::script::ScriptWrapping;
use crate::wallet::{WalletConfig, WalletKind, DEFAULT_CONF_TARGET, DEFAULT_UNLOCK_TIMEOUT_SECS};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("network mismatch: expected {0}, got {1}")]
    NetworkMismatch(String, String),
}

/// Parse a network name, accepting the common aliases
pub fn parse_network(s: &str) -> Result<Network, ConfigError> {
    match s.to_lowercase().as_str() {
        "mainnet" | "main" | "bitcoin" => Ok(Network::Bitcoin),
        "testnet" | "test" => Ok(Network::Testnet),
        "signet" => Ok(Network::Signet),
        "regtest" => Ok(Network::Regtest),
        _ => Err(ConfigError::InvalidValue(
            "FLYOVER_NETWORK".to_string(),
            format!("unknown network: {}", s),
        )),
    }
}

/// Default bitcoind RPC endpoint for `network`
pub fn default_rpc_url(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "http://127.0.0.1:8332",
        Network::Testnet => "http://127.0.0.1:18332",
        Network::Signet => "http://127.0.0.1:38332",
        _ => "http://127.0.0.1:18443",
    }
}

/// Main configuration struct
#[derive(Clone)]
pub struct FlyoverConfig {
    pub network: Network,

    /// bitcoind JSON-RPC endpoint
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,

    pub wallet_mode: WalletKind,
    pub wallet_name: String,
    pub wallet_passphrase: Option<String>,
    pub unlock_timeout_secs: u64,

    /// BTC/kvB
    pub fixed_fee_rate: Option<f64>,
    pub fee_conf_target: u16,

    /// Hex secret for the derived wallet
    pub signer_key: Option<String>,

    pub log_level: String,
}

impl std::fmt::Debug for FlyoverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlyoverConfig")
            .field("network", &self.network)
            .field("rpc_url", &self.rpc_url)
            .field("wallet_mode", &self.wallet_mode)
            .field("wallet_name", &self.wallet_name)
            .field("fixed_fee_rate", &self.fixed_fee_rate)
            .field("fee_conf_target", &self.fee_conf_target)
            .field("log_level", &self.log_level)
            .finish_non_exhaustive()
    }
}

impl FlyoverConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let network = parse_network(
            &env::var("FLYOVER_NETWORK").unwrap_or_else(|_| "regtest".to_string()),
        )?;

        let rpc_url = env::var("FLYOVER_BTC_RPC_URL")
            .unwrap_or_else(|_| default_rpc_url(network).to_string());
        let rpc_user = get_required_or_regtest_default("FLYOVER_BTC_RPC_USER", "flyover", network)?;
        let rpc_password =
            get_required_or_regtest_default("FLYOVER_BTC_RPC_PASSWORD", "flyover", network)?;

        let wallet_mode = match env::var("FLYOVER_WALLET_MODE") {
            Ok(mode) => mode
                .parse()
                .map_err(|e| ConfigError::InvalidValue("FLYOVER_WALLET_MODE".to_string(), e))?,
            Err(_) => WalletKind::Node,
        };
        let wallet_name = env::var("FLYOVER_WALLET_NAME").unwrap_or_else(|_| "flyover".to_string());
        let wallet_passphrase = env::var("FLYOVER_WALLET_PASSPHRASE").ok();
        let unlock_timeout_secs =
            parse_optional("FLYOVER_WALLET_UNLOCK_SECS")?.unwrap_or(DEFAULT_UNLOCK_TIMEOUT_SECS);

        let fixed_fee_rate: Option<f64> = parse_optional("FLYOVER_FIXED_FEE_RATE")?;
        if let Some(rate) = fixed_fee_rate {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::InvalidValue(
                    "FLYOVER_FIXED_FEE_RATE".to_string(),
                    "must be a positive BTC/kvB rate".to_string(),
                ));
            }
        }
        let fee_conf_target =
            parse_optional("FLYOVER_FEE_CONF_TARGET")?.unwrap_or(DEFAULT_CONF_TARGET);

        let signer_key = env::var("FLYOVER_BTC_SIGNER_KEY").ok();
        if wallet_mode == WalletKind::Derived && signer_key.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "FLYOVER_BTC_SIGNER_KEY".to_string(),
            ));
        }

        let log_level = env::var("FLYOVER_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            network,
            rpc_url,
            rpc_user,
            rpc_password,
            wallet_mode,
            wallet_name,
            wallet_passphrase,
            unlock_timeout_secs,
            fixed_fee_rate,
            fee_conf_target,
            signer_key,
            log_level,
        })
    }

    /// Settings handed to the wallet strategies
    pub fn wallet_config(&self) -> WalletConfig {
        WalletConfig {
            network: self.network,
            fixed_fee_rate: self.fixed_fee_rate,
            conf_target: self.fee_conf_target,
            wallet_name: self.wallet_name.clone(),
            passphrase: self.wallet_passphrase.clone(),
            unlock_timeout_secs: self.unlock_timeout_secs,
        }
    }

    /// Validate configuration for production readiness
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        if self.network != Network::Bitcoin {
            return Err(ConfigError::NetworkMismatch(
                "mainnet".to_string(),
                self.network.to_string(),
            ));
        }

        if self.wallet_mode == WalletKind::Node && self.wallet_passphrase.is_none() {
            return Err(ConfigError::MissingEnvVar(
                "FLYOVER_WALLET_PASSPHRASE".to_string(),
            ));
        }

        if self.rpc_password.is_empty() {
            return Err(ConfigError::InvalidValue(
                "FLYOVER_BTC_RPC_PASSWORD".to_string(),
                "empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Print configuration summary (hiding sensitive values)
    pub fn print_summary(&self) {
        println!("=== Flyover BTC Configuration ===");
        println!("Network: {}", self.network);
        println!("Node RPC: {}", self.rpc_url);
        println!("Wallet: {} ({})", self.wallet_name, self.wallet_mode);
        println!(
            "Fee Rate: {}",
            match self.fixed_fee_rate {
                Some(rate) => format!("{} BTC/kvB (fixed)", rate),
                None => format!("node estimate, {} blocks", self.fee_conf_target),
            }
        );
        println!(
            "Passphrase: {}",
            if self.wallet_passphrase.is_some() { "set" } else { "unset" }
        );
        println!(
            "Signer Key: {}",
            if self.signer_key.is_some() { "set" } else { "unset" }
        );
        println!("Log Level: {}", self.log_level);
        println!("=================================");
    }
}

/// Get required env var, or use default for regtest only
fn get_required_or_regtest_default(
    var_name: &str,
    regtest_default: &str,
    network: Network,
) -> Result<String, ConfigError> {
    match env::var(var_name) {
        Ok(value) => Ok(value),
        Err(_) if network == Network::Regtest => Ok(regtest_default.to_string()),
        Err(_) => Err(ConfigError::MissingEnvVar(var_name.to_string())),
    }
}

fn parse_optional<T: FromStr>(var_name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var_name) {
        Ok(value) => value.trim().parse().map(Some).map_err(|_| {
            ConfigError::InvalidValue(var_name.to_string(), format!("cannot parse '{}'", value))
        }),
        Err(_) => Ok(None),
    }
}

fn parse_pubkeys(var_name: &str, value: &str) -> Result<Vec<PublicKey>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            PublicKey::from_str(s)
                .map_err(|e| ConfigError::InvalidValue(var_name.to_string(), e.to_string()))
        })
        .collect()
}

/// Parse a wrapping flag
pub fn parse_wrapping(s: &str) -> Result<ScriptWrapping, ConfigError> {
    match s.to_lowercase().as_str() {
        "p2sh" | "legacy" => Ok(ScriptWrapping::P2sh),
        "p2sh-p2wsh" | "p2sh_p2wsh" | "segwit" => Ok(ScriptWrapping::P2shP2wsh),
        other => Err(ConfigError::InvalidValue(
            "FLYOVER_FED_WRAPPING".to_string(),
            format!("unknown wrapping: {}", other),
        )),
    }
}

/// Load the federation used by the `derive` command
pub fn federation_from_env() -> Result<FederationInfo, ConfigError> {
    let keys_var = "FLYOVER_FED_PUBKEYS";
    let pub_keys = parse_pubkeys(
        keys_var,
        &env::var(keys_var).map_err(|_| ConfigError::MissingEnvVar(keys_var.to_string()))?,
    )?;

    let erp_var = "FLYOVER_FED_ERP_PUBKEYS";
    let erp_keys = match env::var(erp_var) {
        Ok(value) => parse_pubkeys(erp_var, &value)?,
        Err(_) => Vec::new(),
    };

    let fed_threshold =
        parse_optional("FLYOVER_FED_THRESHOLD")?.unwrap_or(pub_keys.len() / 2 + 1);
    let fed_address = env::var("FLYOVER_FED_ADDRESS")
        .map_err(|_| ConfigError::MissingEnvVar("FLYOVER_FED_ADDRESS".to_string()))?;
    let wrapping = match env::var("FLYOVER_FED_WRAPPING") {
        Ok(value) => parse_wrapping(&value)?,
        Err(_) => ScriptWrapping::P2shP2wsh,
    };

    Ok(FederationInfo {
        fed_size: pub_keys.len(),
        fed_threshold,
        pub_keys,
        fed_address,
        erp_keys,
        active_fed_block_height: parse_optional("FLYOVER_FED_ACTIVE_HEIGHT")?.unwrap_or(0),
        iris_activation_height: parse_optional("FLYOVER_FED_IRIS_HEIGHT")?.unwrap_or(0),
        wrapping,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_parsing() {
        assert_eq!(parse_network("mainnet").unwrap(), Network::Bitcoin);
        assert_eq!(parse_network("Testnet").unwrap(), Network::Testnet);
        assert_eq!(parse_network("regtest").unwrap(), Network::Regtest);
        assert!(parse_network("devnet").is_err());
    }

    #[test]
    fn test_default_rpc_urls() {
        assert_eq!(default_rpc_url(Network::Bitcoin), "http://127.0.0.1:8332");
        assert_eq!(default_rpc_url(Network::Regtest), "http://127.0.0.1:18443");
    }

    #[test]
    fn test_wrapping_parsing() {
        assert_eq!(parse_wrapping("p2sh").unwrap(), ScriptWrapping::P2sh);
        assert_eq!(parse_wrapping("P2SH-P2WSH").unwrap(), ScriptWrapping::P2shP2wsh);
        assert!(parse_wrapping("p2tr").is_err());
    }

    #[test]
    fn test_pubkey_list_parsing() {
        let keys = parse_pubkeys(
            "FLYOVER_FED_PUBKEYS",
            "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798, ",
        )
        .unwrap();
        assert_eq!(keys.len(), 1);

        assert!(parse_pubkeys("FLYOVER_FED_PUBKEYS", "02abcd").is_err());
    }

    fn config(network: Network, passphrase: Option<&str>) -> FlyoverConfig {
        FlyoverConfig {
            network,
            rpc_url: default_rpc_url(network).to_string(),
            rpc_user: "user".to_string(),
            rpc_password: "secret".to_string(),
            wallet_mode: WalletKind::Node,
            wallet_name: "flyover".to_string(),
            wallet_passphrase: passphrase.map(str::to_string),
            unlock_timeout_secs: 60,
            fixed_fee_rate: None,
            fee_conf_target: 2,
            signer_key: None,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_production_validation() {
        assert!(config(Network::Regtest, Some("pw")).validate_for_production().is_err());
        assert!(config(Network::Bitcoin, None).validate_for_production().is_err());
        assert!(config(Network::Bitcoin, Some("pw")).validate_for_production().is_ok());
    }

    #[test]
    fn test_debug_hides_secrets() {
        let debug = format!("{:?}", config(Network::Bitcoin, Some("pw")));
        assert!(!debug.contains("secret"));
        assert!(!debug.contains("pw"));
    }
}
