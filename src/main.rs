//! Flyover BTC - Operator CLI
//!
//! Run modes:
//!   flyover-btc config                      - Effective configuration
//!   flyover-btc height                      - Current chain height
//!   flyover-btc ping                        - Check the node connection
//!   flyover-btc tx <txid>                   - Outputs and confirmations
//!   flyover-btc wallet-tx <txid>            - Wallet view of a transaction
//!   flyover-btc branch <txid>               - Merkle branch
//!   flyover-btc pmt <txid>                  - Serialized partial Merkle tree
//!   flyover-btc coinbase <txid>             - Coinbase data of the tx's block
//!   flyover-btc balance                     - Wallet balance
//!   flyover-btc fees <address> <sats>       - Fee estimate for a payment
//!   flyover-btc derive <quote> <refund> <lbc> <lp>
//!                                           - Flyover deposit address

use std::env;
use std::str::FromStr;
use std::sync::Arc;

use bitcoin::{Amount, Network, Txid};
use flyover_btc::address;
use flyover_btc::config::{federation_from_env, FlyoverConfig};
use flyover_btc::logging;
use flyover_btc::rpc::BitcoinRpc;
use flyover_btc::units;
use flyover_btc::wallet::{self, KeyAccount, LocalAccount};
use flyover_btc::{
    compute_flyover_derivation, BitcoinNetworkQuery, BitcoindClient, FlyoverDerivationArgs,
    FlyoverError, Result,
};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || matches!(args[1].as_str(), "help" | "--help" | "-h") {
        print_usage();
        return;
    }

    if let Err(e) = run(&args[1], &args[2..]).await {
        eprintln!("Error [{}]: {}", e.error_code(), e);
        if e.is_retry_later() {
            eprintln!("The node is busy; retry once it finishes.");
        }
        std::process::exit(1);
    }
}

fn print_usage() {
    println!("Flyover BTC - Bitcoin engine for the Flyover bridge");
    println!();
    println!("Usage:");
    println!("  flyover-btc config                          Effective configuration");
    println!("  flyover-btc height                          Current chain height");
    println!("  flyover-btc ping                            Check the node connection");
    println!("  flyover-btc tx <txid>                       Transaction outputs");
    println!("  flyover-btc wallet-tx <txid>                Wallet view of a transaction");
    println!("  flyover-btc branch <txid>                   Merkle branch");
    println!("  flyover-btc pmt <txid>                      Partial Merkle tree (hex)");
    println!("  flyover-btc coinbase <txid>                 Coinbase information");
    println!("  flyover-btc balance                         Wallet balance");
    println!("  flyover-btc fees <address> <sats>           Fee estimate");
    println!("  flyover-btc derive <quote_hash> <refund_address> <lbc_address> <lp_address>");
    println!("                                              Flyover deposit address");
    println!();
    println!("Environment Variables:");
    println!("  FLYOVER_NETWORK          mainnet, testnet, signet, regtest");
    println!("  FLYOVER_BTC_RPC_URL      bitcoind JSON-RPC endpoint");
    println!("  FLYOVER_WALLET_MODE      node, derived, watch_only");
    println!("  FLYOVER_FED_PUBKEYS      Federation keys (derive only)");
}

async fn run(command: &str, args: &[String]) -> Result<()> {
    let config = FlyoverConfig::from_env()?;
    logging::init_from_config(&config)?;
    tracing::debug!(target: "flyover::cli", ?config, command, "Starting");

    // mainnet runs only with a complete production setup
    if config.network == Network::Bitcoin {
        config.validate_for_production()?;
    }

    match command {
        "config" => config.print_summary(),
        "height" => {
            let height = query(&config)?.get_height().await?;
            println!("{}", height);
        }
        "ping" => {
            client(&config)?.ping().await?;
            println!("ok");
        }
        "wallet-tx" => {
            let txid = parse_txid(args)?;
            let tx = client(&config)?.get_transaction(&txid).await?;
            print_json(&tx)?;
        }
        "tx" => {
            let txid = parse_txid(args)?;
            let info = query(&config)?.get_transaction_info(&txid).await?;
            print_json(&info)?;
        }
        "branch" => {
            let txid = parse_txid(args)?;
            let branch = query(&config)?.build_merkle_branch(&txid).await?;
            println!("path: {:#b}", branch.path);
            for hash in &branch.hashes {
                println!("{}", hex::encode(hash));
            }
        }
        "pmt" => {
            let txid = parse_txid(args)?;
            let pmt = query(&config)?.get_partial_merkle_tree(&txid).await?;
            println!("{}", hex::encode(pmt));
        }
        "coinbase" => {
            let txid = parse_txid(args)?;
            let info = query(&config)?.get_coinbase_information(&txid).await?;
            println!("block:    {} ({})", info.block_hash, info.block_height);
            println!("coinbase: {}", hex::encode(&info.coinbase_transaction));
            println!("witness:  {}", hex::encode(info.witness_merkle_root));
            if let Some(reserved) = info.witness_reserved_value {
                println!("reserved: {}", hex::encode(reserved));
            }
            println!("pmt:      {}", hex::encode(&info.pmt));
        }
        "balance" => {
            let wallet = build_wallet(&config).await?;
            let balance = wallet.get_balance().await?;
            println!("{}", units::sats_to_display(balance.to_sat()));
        }
        "fees" => {
            let to = arg(args, 0, "address")?;
            let sats = units::parse_sats(arg(args, 1, "sats")?)
                .ok_or_else(|| FlyoverError::invalid_input("sats must be a whole number"))?;
            let wallet = build_wallet(&config).await?;
            let estimation = wallet.estimate_fees(to, Amount::from_sat(sats)).await?;
            println!(
                "fee: {} at {} BTC/kvB",
                units::sats_to_display(estimation.fee.to_sat()),
                estimation.fee_rate
            );
        }
        "derive" => derive(&config, args)?,
        other => {
            print_usage();
            return Err(FlyoverError::invalid_input(format!("unknown command: {}", other)));
        }
    }

    Ok(())
}

fn client(config: &FlyoverConfig) -> Result<BitcoindClient> {
    Ok(
        BitcoindClient::new(&config.rpc_url, &config.rpc_user, &config.rpc_password)?
            .with_wallet(&config.wallet_name),
    )
}

fn query(config: &FlyoverConfig) -> Result<BitcoinNetworkQuery> {
    Ok(BitcoinNetworkQuery::new(Arc::new(client(config)?), config.network))
}

async fn build_wallet(config: &FlyoverConfig) -> Result<Box<dyn wallet::BitcoinWallet>> {
    let rpc: Arc<dyn BitcoinRpc> = Arc::new(client(config)?);

    let account = match &config.signer_key {
        Some(key) => {
            let account: Arc<dyn KeyAccount> =
                Arc::new(LocalAccount::from_hex(key, config.network)?);
            Some(account)
        }
        None => None,
    };

    Ok(wallet::build_wallet(config.wallet_mode, rpc, config.wallet_config(), account).await?)
}

fn derive(config: &FlyoverConfig, args: &[String]) -> Result<()> {
    let quote_hash: [u8; 32] = hex::decode(arg(args, 0, "quote_hash")?.trim_start_matches("0x"))
        .ok()
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or_else(|| FlyoverError::invalid_input("quote_hash must be 32 hex bytes"))?;

    let user_btc_refund_address =
        address::decode_address(arg(args, 1, "refund_address")?, config.network, true)?;
    let lbc_address = hex::decode(arg(args, 2, "lbc_address")?.trim_start_matches("0x"))
        .map_err(|e| FlyoverError::invalid_input(format!("lbc_address: {}", e)))?;
    let lp_btc_address =
        address::decode_address(arg(args, 3, "lp_address")?, config.network, true)?;

    let fed_info = federation_from_env()?;
    let derivation = compute_flyover_derivation(
        &fed_info,
        &FlyoverDerivationArgs {
            quote_hash,
            user_btc_refund_address,
            lbc_address,
            lp_btc_address,
        },
        config.network,
        None,
    )?;

    let correlation_id = logging::generate_correlation_id();
    logging::log_derivation_event(
        &derivation.address,
        &hex::encode(quote_hash),
        Some(&correlation_id),
    );
    print_json(&derivation)
}

fn arg<'a>(args: &'a [String], index: usize, name: &str) -> Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| FlyoverError::invalid_input(format!("missing <{}>", name)))
}

fn parse_txid(args: &[String]) -> Result<Txid> {
    let raw = arg(args, 0, "txid")?;
    Txid::from_str(raw).map_err(|e| FlyoverError::invalid_input(format!("txid: {}", e)))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| FlyoverError::invalid_input(e.to_string()))?;
    println!("{}", json);
    Ok(())
}
