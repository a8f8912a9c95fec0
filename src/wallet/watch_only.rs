//! Watch-only wallet
//!
//! Tracks addresses that may belong to unrelated owners, so there is no
//! meaningful balance and nothing to spend.

use std::sync::Arc;

use async_trait::async_trait;
use bitcoin::{Amount, Txid};

use super::common::WalletConnection;
use super::{
    BitcoinWallet, FeeEstimation, WalletConfig, WalletError, WalletKind, WalletOperation,
};
use crate::chain::BitcoinTransactionInformation;
use crate::rpc::BitcoinRpc;

pub struct WatchOnlyWallet {
    conn: WalletConnection,
}

impl WatchOnlyWallet {
    pub fn new(rpc: Arc<dyn BitcoinRpc>, config: WalletConfig) -> Self {
        Self {
            conn: WalletConnection::new(rpc, config, true),
        }
    }

    fn unsupported<T>(&self, operation: WalletOperation) -> Result<T, WalletError> {
        Err(WalletError::unsupported(self.kind(), operation))
    }
}

#[async_trait]
impl BitcoinWallet for WatchOnlyWallet {
    fn kind(&self) -> WalletKind {
        WalletKind::WatchOnly
    }

    async fn estimate_fees(&self, _to: &str, _value: Amount) -> Result<FeeEstimation, WalletError> {
        self.unsupported(WalletOperation::EstimateFees)
    }

    async fn get_balance(&self) -> Result<Amount, WalletError> {
        self.unsupported(WalletOperation::GetBalance)
    }

    async fn send_with_data(
        &self,
        _to: &str,
        _value: Amount,
        _data: &[u8],
    ) -> Result<Txid, WalletError> {
        self.unsupported(WalletOperation::SendWithData)
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
        self.unsupported(WalletOperation::Unlock)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::MockBitcoinRpc;
    use crate::wallet::common::tests::REGTEST_ADDRESS;
    use bitcoin::Network;

    fn wallet(mock: MockBitcoinRpc) -> WatchOnlyWallet {
        WatchOnlyWallet::new(Arc::new(mock), WalletConfig::new(Network::Regtest, "watch"))
    }

    #[tokio::test]
    async fn test_capability_gating() {
        // no expectations: any node call panics
        let wallet = wallet(MockBitcoinRpc::new());

        let unsupported = |err: WalletError, expected: WalletOperation| {
            matches!(
                err,
                WalletError::UnsupportedOperation { kind: WalletKind::WatchOnly, operation }
                    if operation == expected
            )
        };

        assert!(unsupported(
            wallet.get_balance().await.unwrap_err(),
            WalletOperation::GetBalance
        ));
        assert!(unsupported(
            wallet
                .estimate_fees(REGTEST_ADDRESS, Amount::from_sat(1))
                .await
                .unwrap_err(),
            WalletOperation::EstimateFees
        ));
        assert!(unsupported(
            wallet
                .send_with_data(REGTEST_ADDRESS, Amount::from_sat(1), b"x")
                .await
                .unwrap_err(),
            WalletOperation::SendWithData
        ));
        assert!(unsupported(wallet.unlock().await.unwrap_err(), WalletOperation::Unlock));
    }

    #[tokio::test]
    async fn test_import_address() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_import_address()
            .withf(|address, _, rescan| address == REGTEST_ADDRESS && !*rescan)
            .times(1)
            .returning(|_, _, _| Ok(()));

        wallet(mock).import_address(REGTEST_ADDRESS).await.unwrap();
    }
}
