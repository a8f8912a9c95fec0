//! Node-custodied wallet
//!
//! Keys live in the node's wallet. Spending unlocks it with the configured
//! passphrase unless a previous unlock is still valid.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{Amount, Txid};

use super::common::WalletConnection;
use super::{BitcoinWallet, FeeEstimation, RpcContext, WalletConfig, WalletError, WalletKind};
use crate::chain::BitcoinTransactionInformation;
use crate::logging;
use crate::rpc::{BitcoinRpc, UnspentQuery};
use crate::units;

pub struct NodeWallet {
    conn: WalletConnection,
}

impl NodeWallet {
    pub fn new(rpc: Arc<dyn BitcoinRpc>, config: WalletConfig) -> Self {
        Self {
            conn: WalletConnection::new(rpc, config, false),
        }
    }
}

#[async_trait]
impl BitcoinWallet for NodeWallet {
    fn kind(&self) -> WalletKind {
        WalletKind::Node
    }

    async fn estimate_fees(&self, to: &str, value: Amount) -> Result<FeeEstimation, WalletError> {
        self.conn.estimate_fees(to, value).await
    }

    async fn get_balance(&self) -> Result<Amount, WalletError> {
        let entries = self
            .conn
            .rpc
            .list_unspent(UnspentQuery::all())
            .await
            .rpc_context("listing unspent outputs")?;

        let spendable = entries
            .iter()
            .filter(|entry| entry.spendable)
            .map(|entry| entry.amount);
        Ok(units::sum_btc(spendable)?)
    }

    async fn send_with_data(
        &self,
        to: &str,
        value: Amount,
        data: &[u8],
    ) -> Result<Txid, WalletError> {
        let tx = self.conn.build_funded_transaction(to, value, data).await?;

        self.unlock().await?;
        let signed = self
            .conn
            .rpc
            .sign_raw_transaction_with_wallet(&tx)
            .await
            .rpc_context("signing with node wallet")?;

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

    async fn import_address(&self, address: &str) -> Result<(), WalletError> {
        self.conn.import_address(address).await
    }

    async fn get_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<BitcoinTransactionInformation>, WalletError> {
        self.conn.get_transactions(address).await
    }

    async fn unlock(&self) -> Result<(), WalletError> {
        let info = self
            .conn
            .rpc
            .get_wallet_info()
            .await
            .rpc_context("getting wallet info")?;

        // unencrypted wallets report no expiry
        let Some(unlocked_until) = info.unlocked_until else {
            return Ok(());
        };
        if unlocked_until > chrono::Utc::now().timestamp() {
            tracing::debug!(target: "flyover::wallet", unlocked_until, "Wallet already unlocked");
            return Ok(());
        }

        let passphrase = self
            .conn
            .config
            .passphrase
            .as_deref()
            .ok_or(WalletError::PassphraseRequired)?;

        self.conn
            .rpc
            .wallet_passphrase(passphrase, self.conn.config.unlock_timeout_secs)
            .await
            .rpc_context("unlocking wallet")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{
        FundedTransaction, MockBitcoinRpc, RpcError, SignedTransaction, WalletInfo,
        WalletScanState,
    };
    use crate::wallet::common::tests::{empty_tx, unspent, REGTEST_ADDRESS};
    use bitcoin::Network;

    fn wallet_info(unlocked_until: Option<i64>) -> WalletInfo {
        WalletInfo {
            wallet_name: "lp".to_string(),
            unlocked_until,
            private_keys_enabled: true,
            descriptors: true,
            scanning: WalletScanState::default(),
        }
    }

    fn wallet(mock: MockBitcoinRpc) -> NodeWallet {
        let mut config = WalletConfig::new(Network::Regtest, "lp");
        config.fixed_fee_rate = Some(0.0001);
        config.passphrase = Some("hunter2".to_string());
        NodeWallet::new(Arc::new(mock), config)
    }

    #[tokio::test]
    async fn test_balance_counts_spendable_only() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_list_unspent().returning(|_| {
            Ok(vec![
                unspent(1, 0.5, 3, true),
                unspent(2, 0.25, 0, true),
                unspent(3, 7.0, 10, false),
            ])
        });

        let balance = wallet(mock).get_balance().await.unwrap();
        assert_eq!(balance, Amount::from_sat(75_000_000));
    }

    #[tokio::test]
    async fn test_balance_rejects_infinite_amount() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_list_unspent()
            .returning(|_| Ok(vec![unspent(1, f64::INFINITY, 3, true)]));

        let err = wallet(mock).get_balance().await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::Amount(units::UnitsError::NonFiniteAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_unlock_skipped_while_unlocked() {
        let mut mock = MockBitcoinRpc::new();
        let until = chrono::Utc::now().timestamp() + 600;
        mock.expect_get_wallet_info()
            .returning(move || Ok(wallet_info(Some(until))));
        mock.expect_wallet_passphrase().never();

        wallet(mock).unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_unlock_when_expired() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_get_wallet_info()
            .returning(|| Ok(wallet_info(Some(0))));
        mock.expect_wallet_passphrase()
            .withf(|passphrase, timeout| passphrase == "hunter2" && *timeout == 60)
            .times(1)
            .returning(|_, _| Ok(()));

        wallet(mock).unlock().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_with_data() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_create_raw_transaction()
            .returning(|_| Ok(empty_tx()));
        mock.expect_fund_raw_transaction().returning(|tx, _| {
            Ok(FundedTransaction {
                transaction: tx.clone(),
                fee: 0.00001,
                change_position: 2,
            })
        });
        mock.expect_get_wallet_info()
            .returning(|| Ok(wallet_info(None)));
        mock.expect_sign_raw_transaction_with_wallet()
            .returning(|tx| {
                Ok(SignedTransaction {
                    transaction: tx.clone(),
                    complete: true,
                })
            });
        mock.expect_send_raw_transaction()
            .times(1)
            .returning(|tx| Ok(tx.compute_txid()));

        let txid = wallet(mock)
            .send_with_data(REGTEST_ADDRESS, Amount::from_sat(20_000), b"quote")
            .await
            .unwrap();
        assert_ne!(txid.to_string(), "");
    }

    #[tokio::test]
    async fn test_send_wraps_signing_failure() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_create_raw_transaction()
            .returning(|_| Ok(empty_tx()));
        mock.expect_fund_raw_transaction().returning(|tx, _| {
            Ok(FundedTransaction {
                transaction: tx.clone(),
                fee: 0.00001,
                change_position: 2,
            })
        });
        mock.expect_get_wallet_info()
            .returning(|| Ok(wallet_info(None)));
        mock.expect_sign_raw_transaction_with_wallet().returning(|_| {
            Err(RpcError::Node {
                code: -13,
                message: "Please enter the wallet passphrase".to_string(),
            })
        });
        mock.expect_send_raw_transaction().never();

        let err = wallet(mock)
            .send_with_data(REGTEST_ADDRESS, Amount::from_sat(20_000), b"quote")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WalletError::Rpc {
                context: "signing with node wallet",
                ..
            }
        ));
    }
}
