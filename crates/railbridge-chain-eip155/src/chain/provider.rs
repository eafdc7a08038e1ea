//! The per-chain provider: composed Alloy stack plus submission helpers.

use alloy_network::{Ethereum as AlloyEthereum, EthereumWallet, NetworkWallet, TransactionBuilder};
use alloy_primitives::{Address, Bytes};
use alloy_provider::fillers::{
    BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller, WalletFiller,
};
use alloy_provider::{
    Identity, PendingTransactionError, Provider, ProviderBuilder, RootProvider, WalletProvider,
};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::{TransactionReceipt, TransactionRequest};
use alloy_transport::TransportError;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::instrument;

use railbridge_types::chain::{ChainId, ChainProviderOps};

use crate::chain::nonce::PendingNonceManager;
use crate::chain::types::Eip155ChainReference;

/// Combined filler type for gas, blob gas, nonce, and chain ID.
pub type InnerFiller = JoinFill<
    GasFiller,
    JoinFill<BlobGasFiller, JoinFill<NonceFiller<PendingNonceManager>, ChainIdFiller>>,
>;

/// The fully composed Ethereum provider type used in this project.
///
/// Combines filler layers for gas, nonce, chain ID, blob gas, and wallet
/// signing, and wraps a [`RootProvider`] for actual JSON-RPC communication.
pub type InnerProvider = FillProvider<
    JoinFill<JoinFill<Identity, InnerFiller>, WalletFiller<EthereumWallet>>,
    RootProvider,
>;

/// Transaction parameters: target address, calldata, and required
/// confirmations.
pub struct MetaTransaction {
    /// Target contract address.
    pub to: Address,
    /// Transaction calldata (encoded function call).
    pub calldata: Bytes,
    /// Number of block confirmations to wait for.
    pub confirmations: u64,
}

/// Errors raised by chain-facing calls.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// Transport-level failure (connection, timeout, RPC error).
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Submitted transaction whose receipt did not arrive in time or whose
    /// watcher failed. Retryable by callers.
    #[error(transparent)]
    PendingTransaction(#[from] PendingTransactionError),
}

/// Provider for interacting with one EVM-compatible blockchain.
///
/// Responsibilities:
/// - Transaction signing with one or more signers (round-robin selection)
/// - Nonce management with automatic reset on failures
/// - Gas estimation and pricing (EIP-1559 and legacy)
/// - Transaction receipt fetching with a configurable deadline
#[derive(Debug)]
pub struct Eip155ChainProvider {
    chain: Eip155ChainReference,
    eip1559: bool,
    receipt_timeout_secs: u64,
    inner: InnerProvider,
    signer_addresses: Arc<Vec<Address>>,
    signer_cursor: Arc<AtomicUsize>,
    nonce_manager: PendingNonceManager,
}

impl Eip155ChainProvider {
    /// Connects to `rpc_url` and composes the provider stack for `chain`.
    ///
    /// # Errors
    ///
    /// Returns an error if the wallet carries no signers or the RPC
    /// connection cannot be established.
    pub async fn try_new(
        wallet: EthereumWallet,
        rpc_url: &str,
        chain: Eip155ChainReference,
        eip1559: bool,
        receipt_timeout_secs: u64,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let signer_addresses: Vec<Address> =
            NetworkWallet::<AlloyEthereum>::signer_addresses(&wallet).collect();
        if signer_addresses.is_empty() {
            return Err("wallet must contain at least one signer".into());
        }
        let signer_addresses = Arc::new(signer_addresses);
        let signer_cursor = Arc::new(AtomicUsize::new(0));

        let client = RpcClient::builder()
            .connect(rpc_url)
            .await
            .map_err(|e| format!("Failed to connect to {chain}: {e}"))?;

        // Create the nonce manager explicitly so a reference survives for
        // error handling after failed submissions.
        let nonce_manager = PendingNonceManager::default();
        let filler = JoinFill::new(
            GasFiller,
            JoinFill::new(
                BlobGasFiller::default(),
                JoinFill::new(
                    NonceFiller::new(nonce_manager.clone()),
                    ChainIdFiller::default(),
                ),
            ),
        );
        let inner: InnerProvider = ProviderBuilder::default()
            .filler(filler)
            .wallet(wallet)
            .connect_client(client);

        tracing::info!(chain = %chain, signers = ?signer_addresses, "Using EVM provider");

        Ok(Self {
            chain,
            eip1559,
            receipt_timeout_secs,
            inner,
            signer_addresses,
            signer_cursor,
            nonce_manager,
        })
    }

    /// The composed Alloy provider, for typed contract instances and reads.
    pub fn inner(&self) -> &InnerProvider {
        &self.inner
    }

    /// The chain this provider talks to.
    pub fn chain_reference(&self) -> Eip155ChainReference {
        self.chain
    }

    /// The nonce manager serializing submissions per signer.
    pub fn nonce_manager(&self) -> &PendingNonceManager {
        &self.nonce_manager
    }

    /// Round-robin selection of the next signer from the wallet.
    pub fn next_signer_address(&self) -> Address {
        debug_assert!(!self.signer_addresses.is_empty());
        if self.signer_addresses.len() == 1 {
            self.signer_addresses[0]
        } else {
            let next =
                self.signer_cursor.fetch_add(1, Ordering::Relaxed) % self.signer_addresses.len();
            self.signer_addresses[next]
        }
    }

    /// Check whether contract code is present at `address`.
    ///
    /// Used after a counterfactual wallet deployment and before deciding
    /// whether an EIP-6492 settlement needs to deploy first.
    pub async fn is_contract_deployed(&self, address: &Address) -> Result<bool, ChainError> {
        let bytes = self.inner.get_code_at(*address).await?;
        Ok(!bytes.is_empty())
    }

    /// Send a transaction with the provided `to` and `calldata`, using an
    /// automatically selected signer, and wait for its receipt.
    ///
    /// The nonce for the sending address is reset after any failure (during
    /// submission or receipt fetching) to force a fresh `pending` query on
    /// the next transaction, which keeps the manager correct even when a
    /// transaction was submitted but its receipt timed out.
    ///
    /// Gas pricing follows the chain's capabilities: EIP-1559 networks use
    /// the provider's automatic pricing, legacy networks fetch `gasPrice`
    /// explicitly.
    #[instrument(skip_all, err, fields(chain = %self.chain, to = %tx.to))]
    pub async fn send_transaction(
        &self,
        tx: MetaTransaction,
    ) -> Result<TransactionReceipt, ChainError> {
        let from_address = self.next_signer_address();
        let mut txr = TransactionRequest::default()
            .with_to(tx.to)
            .with_from(from_address)
            .with_input(tx.calldata);

        if !self.eip1559 {
            let gas: u128 = self.inner.get_gas_price().await?;
            txr.set_gas_price(gas);
        }

        if txr.gas.is_none() {
            let gas_limit = self.inner.estimate_gas(txr.clone()).await?;
            txr.set_gas_limit(gas_limit);
        }

        let pending_tx = match self.inner.send_transaction(txr).await {
            Ok(pending) => pending,
            Err(e) => {
                self.nonce_manager.reset_nonce(from_address).await;
                return Err(ChainError::Transport(e));
            }
        };

        let timeout = Duration::from_secs(self.receipt_timeout_secs);
        let watcher = pending_tx
            .with_required_confirmations(tx.confirmations)
            .with_timeout(Some(timeout));

        match watcher.get_receipt().await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                self.nonce_manager.reset_nonce(from_address).await;
                Err(ChainError::PendingTransaction(e))
            }
        }
    }
}

impl ChainProviderOps for Eip155ChainProvider {
    fn signer_addresses(&self) -> Vec<String> {
        self.inner
            .signer_addresses()
            .map(|a| a.to_string())
            .collect()
    }

    fn chain_id(&self) -> ChainId {
        self.chain.into()
    }
}
