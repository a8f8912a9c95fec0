use std::sync::Arc;

use bitcoin::{Amount, Transaction, TxOut, Txid};

use super::{FeeEstimation, RpcContext, WalletConfig, WalletError};
use crate::address;
use crate::chain::{self, BitcoinTransactionInformation};
use crate::rpc::{BitcoinRpc, FundOptions, RawOutput, SignedTransaction, UnspentQuery};
use crate::script;
use crate::units;

/// Placeholder for the commitment data when simulating a payment
const FEE_SIMULATION_DATA: [u8; 32] = [0u8; 32];

/// Change goes after the payment and data outputs
const CHANGE_POSITION: u32 = 2;

/// Node handle and settings shared by the wallet strategies
pub(crate) struct WalletConnection {
    pub rpc: Arc<dyn BitcoinRpc>,
    pub config: WalletConfig,
    /// Fund from watch-only UTXOs
    pub include_watching: bool,
    /// Where change goes when the node wallet cannot derive it
    pub change_address: Option<String>,
}

impl WalletConnection {
    pub fn new(rpc: Arc<dyn BitcoinRpc>, config: WalletConfig, include_watching: bool) -> Self {
        Self {
            rpc,
            config,
            include_watching,
            change_address: None,
        }
    }

    /// Send change to `address` instead of a node-generated one
    pub fn with_change_address(mut self, address: &str) -> Self {
        self.change_address = Some(address.to_string());
        self
    }

    /// BTC/kvB, fixed or node-estimated
    pub async fn fee_rate(&self) -> Result<f64, WalletError> {
        let rate = match self.config.fixed_fee_rate {
            Some(rate) => rate,
            None => {
                let estimate = self
                    .rpc
                    .estimate_smart_fee(self.config.conf_target)
                    .await
                    .rpc_context("estimating fee rate")?;
                estimate
                    .fee_rate
                    .ok_or_else(|| WalletError::FeeRateUnavailable(estimate.errors.join("; ")))?
            }
        };

        // rejects NaN, infinities and negatives
        units::btc_to_amount(rate)?;
        Ok(rate)
    }

    fn fund_options(&self, fee_rate: f64, change_position: Option<u32>) -> FundOptions {
        FundOptions {
            change_position,
            fee_rate: Some(fee_rate),
            include_watching: self.include_watching,
            change_address: self.change_address.clone(),
        }
    }

    pub async fn estimate_fees(
        &self,
        to: &str,
        value: Amount,
    ) -> Result<FeeEstimation, WalletError> {
        address::validate_address(to, self.config.network)?;
        let fee_rate = self.fee_rate().await?;

        let outputs = vec![
            RawOutput::Payment {
                address: to.to_string(),
                amount: value,
            },
            RawOutput::Data(FEE_SIMULATION_DATA.to_vec()),
        ];
        let funded = self
            .rpc
            .wallet_create_funded_psbt(outputs, self.fund_options(fee_rate, None))
            .await
            .rpc_context("simulating funded transaction")?;

        let fee = units::btc_to_amount(funded.fee)?;
        tracing::debug!(
            target: "flyover::wallet",
            to,
            value_sats = value.to_sat(),
            fee_sats = fee.to_sat(),
            fee_rate,
            "Estimated fees"
        );

        Ok(FeeEstimation { fee, fee_rate })
    }

    /// Payment plus OP_RETURN output, funded by the node with change last
    pub async fn build_funded_transaction(
        &self,
        to: &str,
        value: Amount,
        data: &[u8],
    ) -> Result<Transaction, WalletError> {
        address::validate_address(to, self.config.network)?;
        let data_script = script::null_data_script(data)?;
        let fee_rate = self.fee_rate().await?;

        let mut tx = self
            .rpc
            .create_raw_transaction(vec![RawOutput::Payment {
                address: to.to_string(),
                amount: value,
            }])
            .await
            .rpc_context("creating raw transaction")?;

        tx.output.push(TxOut {
            value: Amount::ZERO,
            script_pubkey: data_script,
        });

        let funded = self
            .rpc
            .fund_raw_transaction(&tx, self.fund_options(fee_rate, Some(CHANGE_POSITION)))
            .await
            .rpc_context("funding transaction")?;

        Ok(funded.transaction)
    }

    pub async fn broadcast(&self, signed: SignedTransaction) -> Result<Txid, WalletError> {
        if !signed.complete {
            return Err(WalletError::IncompleteSignature);
        }

        self.rpc
            .send_raw_transaction(&signed.transaction)
            .await
            .rpc_context("broadcasting transaction")
    }

    pub async fn import_address(&self, address: &str) -> Result<(), WalletError> {
        address::validate_address(address, self.config.network)?;

        self.rpc
            .import_address(address, "", false)
            .await
            .rpc_context("importing address")?;

        tracing::info!(target: "flyover::wallet", address, "Imported address");
        Ok(())
    }

    pub async fn get_transactions(
        &self,
        address: &str,
    ) -> Result<Vec<BitcoinTransactionInformation>, WalletError> {
        address::validate_address(address, self.config.network)?;

        let entries = self
            .rpc
            .list_unspent(UnspentQuery::for_address(address))
            .await
            .rpc_context("listing unspent outputs")?;

        Ok(chain::aggregate_unspent(&entries)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::rpc::{
        FeeEstimate, FundedPsbt, FundedTransaction, ListUnspentEntry, MockBitcoinRpc,
    };
    use bitcoin::absolute::LockTime;
    use bitcoin::hashes::Hash;
    use bitcoin::{transaction, Network};

    pub(crate) const REGTEST_ADDRESS: &str = "bcrt1qw508d6qejxtdg4y5r3zarvary0c5xw7kygt080";

    pub(crate) fn empty_tx() -> Transaction {
        Transaction {
            version: transaction::Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![],
        }
    }

    pub(crate) fn unspent(
        seed: u8,
        amount: f64,
        confirmations: u32,
        spendable: bool,
    ) -> ListUnspentEntry {
        ListUnspentEntry {
            txid: Txid::from_byte_array([seed; 32]),
            vout: 0,
            address: Some(REGTEST_ADDRESS.to_string()),
            amount,
            confirmations,
            spendable,
        }
    }

    fn connection(mock: MockBitcoinRpc, fixed_fee_rate: Option<f64>) -> WalletConnection {
        let mut config = WalletConfig::new(Network::Regtest, "lp");
        config.fixed_fee_rate = fixed_fee_rate;
        WalletConnection::new(Arc::new(mock), config, false)
    }

    #[tokio::test]
    async fn test_estimate_fees_uses_placeholder_output() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_estimate_smart_fee()
            .withf(|target| *target == 2)
            .returning(|_| {
                Ok(FeeEstimate {
                    fee_rate: Some(0.0002),
                    errors: vec![],
                    blocks: 2,
                })
            });
        mock.expect_wallet_create_funded_psbt()
            .withf(|outputs, options| {
                outputs.len() == 2
                    && outputs[1] == RawOutput::Data(vec![0u8; 32])
                    && options.fee_rate == Some(0.0002)
            })
            .returning(|_, _| {
                Ok(FundedPsbt {
                    psbt: String::new(),
                    fee: 0.00000282,
                    change_position: 2,
                })
            });

        let estimation = connection(mock, None)
            .estimate_fees(REGTEST_ADDRESS, Amount::from_sat(50_000))
            .await
            .unwrap();

        assert_eq!(estimation.fee, Amount::from_sat(282));
        assert_eq!(estimation.fee_rate, 0.0002);
    }

    #[tokio::test]
    async fn test_estimate_fees_rejects_nan_fee() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_wallet_create_funded_psbt().returning(|_, _| {
            Ok(FundedPsbt {
                psbt: String::new(),
                fee: f64::NAN,
                change_position: -1,
            })
        });

        let err = connection(mock, Some(0.0001))
            .estimate_fees(REGTEST_ADDRESS, Amount::from_sat(50_000))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WalletError::Amount(units::UnitsError::NonFiniteAmount(_))
        ));
    }

    #[tokio::test]
    async fn test_estimate_fees_rejects_foreign_address() {
        let mock = MockBitcoinRpc::new();

        let err = connection(mock, Some(0.0001))
            .estimate_fees("1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa", Amount::from_sat(1))
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Address(_)));
    }

    #[tokio::test]
    async fn test_missing_fee_estimate() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_estimate_smart_fee().returning(|_| {
            Ok(FeeEstimate {
                fee_rate: None,
                errors: vec!["Insufficient data or no feerate found".to_string()],
                blocks: 0,
            })
        });

        let err = connection(mock, None).fee_rate().await.unwrap_err();
        assert!(matches!(err, WalletError::FeeRateUnavailable(_)));
    }

    #[tokio::test]
    async fn test_build_funded_transaction_appends_data_output() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_create_raw_transaction()
            .returning(|_| Ok(empty_tx()));
        mock.expect_fund_raw_transaction()
            .withf(|tx, options| {
                tx.output.len() == 1
                    && tx.output[0].value == Amount::ZERO
                    && tx.output[0].script_pubkey.is_op_return()
                    && options.change_position == Some(2)
                    && options.change_address.is_none()
            })
            .returning(|tx, _| {
                Ok(FundedTransaction {
                    transaction: tx.clone(),
                    fee: 0.00001,
                    change_position: 2,
                })
            });

        let tx = connection(mock, Some(0.0001))
            .build_funded_transaction(REGTEST_ADDRESS, Amount::from_sat(10_000), &[0xab; 32])
            .await
            .unwrap();
        assert_eq!(tx.output.len(), 1);
    }

    #[tokio::test]
    async fn test_oversized_data_rejected_before_node_calls() {
        let mock = MockBitcoinRpc::new();

        let err = connection(mock, Some(0.0001))
            .build_funded_transaction(REGTEST_ADDRESS, Amount::from_sat(10_000), &[0u8; 81])
            .await
            .unwrap_err();
        assert!(matches!(err, WalletError::Script(_)));
    }

    #[tokio::test]
    async fn test_get_transactions_groups_by_txid() {
        let mut mock = MockBitcoinRpc::new();
        mock.expect_list_unspent()
            .withf(|query| query.addresses == vec![REGTEST_ADDRESS.to_string()])
            .returning(|_| {
                Ok(vec![
                    unspent(1, 0.1, 1, true),
                    unspent(1, 0.2, 1, true),
                    unspent(2, 0.3, 0, true),
                ])
            });

        let txs = connection(mock, None)
            .get_transactions(REGTEST_ADDRESS)
            .await
            .unwrap();

        assert_eq!(txs.len(), 2);
        assert_eq!(txs[0].amount_to(REGTEST_ADDRESS), Amount::from_sat(30_000_000));
        assert_eq!(txs[1].confirmations, 0);
    }
}
