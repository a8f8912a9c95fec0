//! Derived (watch-only node, external key) wallet
//!
//! The node tracks one address whose key belongs to a [`KeyAccount`].
//! Construction bootstraps the node side:
//!
//! ```text
//! probe wallet ──ok, same name──────────────┐
//!      │ fail / other name                  │
//!      ▼                                    ▼
//! load wallet ─fail─▶ create wallet ─▶ check scanning ─▶ verify key
//!                                                         │      │
//!                                              watch-only │      │ unknown
//!                                                         ▼      ▼
//!                                                      ready   import + rescan
//!                                                              (RescanStarted)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{Amount, Txid};
use zeroize::Zeroizing;

use super::account::KeyAccount;
use super::common::WalletConnection;
use super::{
    BitcoinWallet, FeeEstimation, RpcContext, WalletConfig, WalletError, WalletKind,
    WalletOperation,
};
use crate::chain::BitcoinTransactionInformation;
use crate::logging;
use crate::rpc::{BitcoinRpc, CreateWalletOptions, UnspentQuery, WalletInfo};
use crate::units;

pub struct DerivedWallet {
    conn: WalletConnection,
    account: Arc<dyn KeyAccount>,
    address: String,
}

impl std::fmt::Debug for DerivedWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedWallet")
            .field("wallet", &self.conn.config.wallet_name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl DerivedWallet {
    /// Bootstrap the node wallet and return a ready wallet
    pub async fn new(
        rpc: Arc<dyn BitcoinRpc>,
        config: WalletConfig,
        account: Arc<dyn KeyAccount>,
    ) -> Result<Self, WalletError> {
        // the node wallet holds no keys, so change returns to the account address
        let address = account.address().to_string();
        let conn = WalletConnection::new(rpc, config, true).with_change_address(&address);

        let info = Self::select_wallet(&conn).await?;
        if let Some(scan) = info.scanning.progress() {
            let progress = scan.progress * 100.0;
            return Err(WalletError::WalletScanning {
                wallet: info.wallet_name.clone(),
                progress,
            });
        }

        Self::verify_key(&conn, account.as_ref(), &address).await?;

        logging::log_wallet_event(
            "derived_wallet_ready",
            &conn.config.wallet_name,
            None,
            None,
            None,
        );

        Ok(Self {
            conn,
            account,
            address,
        })
    }

    /// Address the wallet watches and spends from
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn select_wallet(conn: &WalletConnection) -> Result<WalletInfo, WalletError> {
        let name = conn.config.wallet_name.as_str();

        match conn.rpc.get_wallet_info().await {
            Ok(info) if info.wallet_name == name => return Ok(info),
            Ok(info) => tracing::debug!(
                target: "flyover::wallet",
                loaded = %info.wallet_name,
                wanted = name,
                "Node has another wallet loaded"
            ),
            Err(e) => tracing::debug!(target: "flyover::wallet", error = %e, "Wallet probe failed"),
        }

        if let Err(e) = conn.rpc.load_wallet(name).await {
            tracing::info!(
                target: "flyover::wallet",
                wallet = name,
                error = %e,
                "Wallet not loadable, creating it"
            );
            conn.rpc
                .create_wallet(name, CreateWalletOptions::watch_only())
                .await
                .rpc_context("creating watch-only wallet")?;
        }

        conn.rpc
            .get_wallet_info()
            .await
            .rpc_context("getting wallet info after load")
    }

    async fn verify_key(
        conn: &WalletConnection,
        account: &dyn KeyAccount,
        address: &str,
    ) -> Result<(), WalletError> {
        let info = conn
            .rpc
            .get_address_info(address)
            .await
            .rpc_context("getting address info")?;

        if info.solvable && info.is_watch_only {
            return Ok(());
        }

        conn.rpc
            .import_pubkey(&account.public_key(), false)
            .await
            .rpc_context("importing public key")?;
        conn.rpc
            .import_address(address, &conn.config.wallet_name, true)
            .await
            .rpc_context("rescanning address")?;

        logging::log_wallet_event(
            "rescan_started",
            &conn.config.wallet_name,
            None,
            None,
            None,
        );
        Err(WalletError::RescanStarted {
            address: address.to_string(),
        })
    }
}

#[async_trait]
impl BitcoinWallet for DerivedWallet {
    fn kind(&self) -> WalletKind {
        WalletKind::Derived
    }

    async fn estimate_fees(&self, to: &str, value: Amount) -> Result<FeeEstimation, WalletError> {
        self.conn.estimate_fees(to, value).await
    }

    /// Confirmed UTXOs of the derived address
    async fn get_balance(&self) -> Result<Amount, WalletError> {
        let entries = self
            .conn
            .rpc
            .list_unspent(UnspentQuery::confirmed_for_address(&self.address))
            .await
            .rpc_context("listing unspent outputs")?;

        // watch-only outputs never report spendable
        let confirmed = entries
            .iter()
            .filter(|entry| entry.confirmations > 0)
            .map(|entry| entry.amount);
        Ok(units::sum_btc(confirmed)?)
    }

    async fn send_with_data(
        &self,
        to: &str,
        value: Amount,
        data: &[u8],
    ) -> Result<Txid, WalletError> {
        let tx = self.conn.build_funded_transaction(to, value, data).await?;

        let mut wif = Zeroizing::new(String::new());
        self.account.use_private_key(&mut |key| *wif = key.to_wif());

        let signed = self
            .conn
            .rpc
            .sign_raw_transaction_with_key(&tx, std::slice::from_ref(&*wif))
            .await;
        // zeroized as soon as the node answers
        drop(wif);
        let signed = signed.rpc_context("signing with account key")?;

        let txid = self.conn.broadcast(signed).await?;
        logging::log_wallet_event(
            "payment_sent",
            &self.conn.config.wallet_name,
            Some(&txid.to_string()),
            Some(value.to_sat()),
            None,
        );
        Ok(txid)
    }

    async fn import_address(&self, _address: &str) -> Result<(), WalletError> {
        Err(WalletError::unsupported(self.kind(), WalletOperation::ImportAddress))
    }

    async fn get_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<BitcoinTransactionInformation>, WalletError> {
        self.conn.get_transactions(address).await
    }

    async fn unlock(&self) -> Result<(), WalletError> {
        Err(WalletError::unsupported(self.kind(), WalletOperation::Unlock))
    }
}
