//! Burn-and-mint bridge provider.
//!
//! Moves USDC between EVM chains without pooled liquidity: burn on the
//! source chain's token messenger, fetch the attestation for the emitted
//! message from the attestation API, then mint on the destination chain's
//! message transmitter.
//!
//! The flow per transfer:
//!
//! 1. `approve` the token messenger for the burn amount
//! 2. `depositForBurn` on the source messenger, which emits `MessageSent`
//! 3. keccak the message bytes and poll the attestation API until signed
//! 4. `receiveMessage(message, attestation)` on the destination transmitter

use alloy_primitives::{Address, B256, Bytes, U256, address, keccak256};
use alloy_sol_types::{SolCall, SolEvent, sol};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::instrument;

use railbridge_chain_eip155::chain::{Eip155ChainProvider, Eip155ChainReference, MetaTransaction};
use railbridge_chain_eip155::networks;
use railbridge_types::chain::ChainId;

use crate::provider::{BridgeError, BridgeProvider, BridgeResult};

sol! {
    #[allow(missing_docs)]
    interface IERC20 {
        function approve(address spender, uint256 amount) external returns (bool);
        function allowance(address owner, address spender) external view returns (uint256);
    }

    /// Burn side of the bridge.
    #[allow(missing_docs)]
    interface ITokenMessenger {
        function depositForBurn(
            uint256 amount,
            uint32 destinationDomain,
            bytes32 mintRecipient,
            address burnToken
        ) external returns (uint64 nonce);
    }

    /// Mint side of the bridge.
    #[allow(missing_docs)]
    interface IMessageTransmitter {
        function receiveMessage(bytes message, bytes attestation) external returns (bool success);
    }

    /// Emitted by the message transmitter during `depositForBurn`; the raw
    /// message bytes are what the attestation service signs over.
    #[allow(missing_docs)]
    event MessageSent(bytes message);
}

/// Per-chain bridge deployment: messenger, transmitter, and routing domain.
#[derive(Debug, Clone, Copy)]
pub struct CctpRoute {
    pub chain: Eip155ChainReference,
    /// Bridge-level routing domain (not the EVM chain id).
    pub domain: u32,
    pub token_messenger: Address,
    pub message_transmitter: Address,
    pub testnet: bool,
}

/// Bridge deployments on the supported networks.
pub const CCTP_ROUTES: &[CctpRoute] = &[
    CctpRoute {
        chain: Eip155ChainReference::new(1),
        domain: 0,
        token_messenger: address!("0xBd3fa81B58Ba92a82136038B25aDec7066af3155"),
        message_transmitter: address!("0x0a992d191DEeC32aFe36203Ad87D7d289a738F81"),
        testnet: false,
    },
    CctpRoute {
        chain: Eip155ChainReference::new(11155111),
        domain: 0,
        token_messenger: address!("0x9f3B8679c73C2Fef8b59B4f3444d4e156fb70AA5"),
        message_transmitter: address!("0x7865fAfC2db2093669d92c0F33AeEF291086BEFD"),
        testnet: true,
    },
    CctpRoute {
        chain: Eip155ChainReference::new(8453),
        domain: 6,
        token_messenger: address!("0x1682Ae6375C4E4A97e4B583BC394c861A46D8962"),
        message_transmitter: address!("0xAD09780d193884d503182aD4588450C416D6F9D4"),
        testnet: false,
    },
    CctpRoute {
        chain: Eip155ChainReference::new(84532),
        domain: 6,
        token_messenger: address!("0x9f3B8679c73C2Fef8b59B4f3444d4e156fb70AA5"),
        message_transmitter: address!("0x7865fAfC2db2093669d92c0F33AeEF291086BEFD"),
        testnet: true,
    },
    CctpRoute {
        chain: Eip155ChainReference::new(137),
        domain: 7,
        token_messenger: address!("0x9daF8c91AEFAE50b9c0E69629D3F6Ca40cA3B3FE"),
        message_transmitter: address!("0xF3be9355363857F3e001be68856A2f96b4C39Ba9"),
        testnet: false,
    },
    CctpRoute {
        chain: Eip155ChainReference::new(80002),
        domain: 7,
        token_messenger: address!("0x9f3B8679c73C2Fef8b59B4f3444d4e156fb70AA5"),
        message_transmitter: address!("0x7865fAfC2db2093669d92c0F33AeEF291086BEFD"),
        testnet: true,
    },
    CctpRoute {
        chain: Eip155ChainReference::new(42161),
        domain: 3,
        token_messenger: address!("0x19330d10D9Cc8751218eaf51E8885D058642E08A"),
        message_transmitter: address!("0xC30362313FBBA5cf9163F0bb16a0e01f01A896ca"),
        testnet: false,
    },
    CctpRoute {
        chain: Eip155ChainReference::new(421614),
        domain: 3,
        token_messenger: address!("0x9f3B8679c73C2Fef8b59B4f3444d4e156fb70AA5"),
        message_transmitter: address!("0xaCF1ceeF35caAc005e15888dDb8A3515C41B4872"),
        testnet: true,
    },
];

const ATTESTATION_API: &str = "https://iris-api.circle.com";
const ATTESTATION_API_SANDBOX: &str = "https://iris-api-sandbox.circle.com";

/// Looks up the bridge deployment for a chain.
pub fn route_for(chain_id: &ChainId) -> Option<&'static CctpRoute> {
    let reference = Eip155ChainReference::try_from(chain_id).ok()?;
    CCTP_ROUTES.iter().find(|route| route.chain == reference)
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum AttestationStatus {
    Complete,
    Failed,
    Pending,
    PendingConfirmations,
}

#[derive(Debug, Deserialize)]
struct AttestationResponse {
    status: AttestationStatus,
    attestation: Option<String>,
}

/// Tuning for the burn-and-mint provider.
#[derive(Debug, Clone, Copy)]
pub struct CctpConfig {
    /// Attestation polling attempts before giving up the current bridge
    /// attempt.
    pub attestation_max_attempts: u32,
    /// Seconds between attestation polls.
    pub attestation_poll_secs: u64,
    /// Ceiling on a single burn, in atomic units.
    pub max_burn_amount: U256,
}

impl Default for CctpConfig {
    fn default() -> Self {
        Self {
            attestation_max_attempts: 30,
            attestation_poll_secs: 20,
            max_burn_amount: U256::from(1_000_000_000_000u64),
        }
    }
}

/// The shipped burn-and-mint [`BridgeProvider`].
///
/// Holds one chain provider per network, signing with the bridge key. These
/// providers are shared with the settlement path whenever the bridge key
/// equals the settlement key, so both paths funnel through one nonce
/// manager per chain.
pub struct CctpBridgeProvider {
    chains: HashMap<ChainId, Arc<Eip155ChainProvider>>,
    http: reqwest::Client,
    config: CctpConfig,
}

impl CctpBridgeProvider {
    pub fn new(chains: HashMap<ChainId, Arc<Eip155ChainProvider>>, config: CctpConfig) -> Self {
        Self {
            chains,
            http: reqwest::Client::new(),
            config,
        }
    }

    fn chain(&self, network: &ChainId) -> Result<&Arc<Eip155ChainProvider>, BridgeError> {
        self.chains
            .get(network)
            .ok_or_else(|| BridgeError::Transport(format!("no provider configured for {network}")))
    }

    fn api_base(testnet: bool) -> &'static str {
        if testnet {
            ATTESTATION_API_SANDBOX
        } else {
            ATTESTATION_API
        }
    }

    /// Burns `amount` of USDC on the source chain, returning the burn
    /// transaction hash and the emitted message bytes.
    async fn burn(
        &self,
        source: &ChainId,
        route: &CctpRoute,
        destination_domain: u32,
        amount: U256,
        recipient: &Address,
    ) -> Result<(String, Vec<u8>), BridgeError> {
        let provider = self.chain(source)?;
        let usdc = networks::by_chain_id(source)
            .map(|n| n.usdc)
            .ok_or_else(|| BridgeError::Transport(format!("no USDC deployment on {source}")))?;

        let approve = IERC20::approveCall {
            spender: route.token_messenger,
            amount,
        };
        provider
            .send_transaction(MetaTransaction {
                to: usdc,
                calldata: approve.abi_encode().into(),
                confirmations: 1,
            })
            .await
            .map_err(|e| BridgeError::Onchain(format!("approve: {e}")))?;

        let mint_recipient = B256::left_padding_from(recipient.as_slice());
        let deposit = ITokenMessenger::depositForBurnCall {
            amount,
            destinationDomain: destination_domain,
            mintRecipient: mint_recipient,
            burnToken: usdc,
        };
        let receipt = provider
            .send_transaction(MetaTransaction {
                to: route.token_messenger,
                calldata: deposit.abi_encode().into(),
                confirmations: 1,
            })
            .await
            .map_err(|e| BridgeError::Onchain(format!("depositForBurn: {e}")))?;
        if !receipt.status() {
            return Err(BridgeError::Onchain(format!(
                "depositForBurn reverted in {}",
                receipt.transaction_hash
            )));
        }

        let message = extract_message_sent(&receipt)?;
        tracing::info!(
            burn_tx = %receipt.transaction_hash,
            message_len = message.len(),
            "burn transaction confirmed"
        );
        Ok((receipt.transaction_hash.to_string(), message))
    }

    /// Polls the attestation API until the message is signed.
    async fn fetch_attestation(
        &self,
        message_hash: B256,
        testnet: bool,
    ) -> Result<Bytes, BridgeError> {
        let url = format!(
            "{}/v1/attestations/{message_hash}",
            Self::api_base(testnet)
        );
        let poll = Duration::from_secs(self.config.attestation_poll_secs);

        for attempt in 1..=self.config.attestation_max_attempts {
            let response = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| BridgeError::Transport(format!("attestation fetch: {e}")))?;

            // 404 means the attestation does not exist yet; 429 asks us to
            // slow down. Both are pending from our point of view.
            if response.status() == reqwest::StatusCode::NOT_FOUND
                || response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS
            {
                tracing::debug!(attempt, status = %response.status(), "attestation pending");
                sleep(poll).await;
                continue;
            }
            let response = response
                .error_for_status()
                .map_err(|e| BridgeError::Transport(format!("attestation fetch: {e}")))?;
            let attestation: AttestationResponse = response
                .json()
                .await
                .map_err(|e| BridgeError::Transport(format!("attestation decode: {e}")))?;

            match attestation.status {
                AttestationStatus::Complete => {
                    let hex_blob = attestation.attestation.ok_or_else(|| {
                        BridgeError::AttestationRejected(
                            "attestation complete but attestation field is null".into(),
                        )
                    })?;
                    let bytes = hex::decode(hex_blob.trim_start_matches("0x")).map_err(|e| {
                        BridgeError::AttestationRejected(format!("attestation not hex: {e}"))
                    })?;
                    tracing::info!(attempt, attestation_len = bytes.len(), "attestation complete");
                    return Ok(bytes.into());
                }
                AttestationStatus::Failed => {
                    return Err(BridgeError::AttestationRejected(format!(
                        "attestation failed for message {message_hash}"
                    )));
                }
                AttestationStatus::Pending | AttestationStatus::PendingConfirmations => {
                    tracing::debug!(attempt, "attestation pending");
                    sleep(poll).await;
                }
            }
        }

        Err(BridgeError::AttestationTimeout(
            self.config.attestation_max_attempts,
        ))
    }

    /// Submits the mint on the destination chain.
    async fn mint(
        &self,
        destination: &ChainId,
        route: &CctpRoute,
        message: Vec<u8>,
        attestation: Bytes,
    ) -> Result<String, BridgeError> {
        let provider = self.chain(destination)?;
        let receive = IMessageTransmitter::receiveMessageCall {
            message: message.into(),
            attestation,
        };
        let receipt = provider
            .send_transaction(MetaTransaction {
                to: route.message_transmitter,
                calldata: receive.abi_encode().into(),
                confirmations: 1,
            })
            .await
            .map_err(|e| BridgeError::Onchain(format!("receiveMessage: {e}")))?;
        if !receipt.status() {
            return Err(BridgeError::Onchain(format!(
                "receiveMessage reverted in {}",
                receipt.transaction_hash
            )));
        }
        Ok(receipt.transaction_hash.to_string())
    }
}

/// Finds the `MessageSent` log in a burn receipt and returns the message
/// bytes.
fn extract_message_sent(
    receipt: &alloy_rpc_types_eth::TransactionReceipt,
) -> Result<Vec<u8>, BridgeError> {
    let log = receipt
        .inner
        .logs()
        .iter()
        .find(|log| {
            log.topics()
                .first()
                .is_some_and(|topic| *topic == MessageSent::SIGNATURE_HASH)
        })
        .ok_or_else(|| {
            BridgeError::Onchain(format!(
                "MessageSent event not found among {} logs",
                receipt.inner.logs().len()
            ))
        })?;
    let decoded = MessageSent::abi_decode_data(&log.data().data)
        .map_err(|e| BridgeError::Onchain(format!("MessageSent decode: {e}")))?;
    Ok(decoded.0.to_vec())
}

#[async_trait]
impl BridgeProvider for CctpBridgeProvider {
    fn supports_chain(&self, network: &ChainId) -> bool {
        route_for(network).is_some() && self.chains.contains_key(network)
    }

    fn is_usdc(&self, network: &ChainId, asset: &Address) -> bool {
        networks::is_usdc(network, asset)
    }

    async fn check_liquidity(
        &self,
        source: &ChainId,
        destination: &ChainId,
        _asset: &Address,
        amount: U256,
    ) -> Result<bool, BridgeError> {
        if !self.supports_chain(source) || !self.supports_chain(destination) {
            return Ok(false);
        }
        // Burn-and-mint needs no pooled liquidity; the only limit is the
        // per-message burn ceiling.
        Ok(amount > U256::ZERO && amount <= self.config.max_burn_amount)
    }

    async fn get_exchange_rate(
        &self,
        source: &ChainId,
        destination: &ChainId,
        source_asset: &Address,
        destination_asset: &Address,
    ) -> Result<f64, BridgeError> {
        if self.is_usdc(source, source_asset) && self.is_usdc(destination, destination_asset) {
            Ok(1.0)
        } else {
            Ok(0.0)
        }
    }

    #[instrument(skip_all, err, fields(source = %source, destination = %destination, amount = %amount))]
    async fn bridge(
        &self,
        source: &ChainId,
        source_tx_hash: &str,
        destination: &ChainId,
        destination_asset: &Address,
        amount: U256,
        recipient: &Address,
    ) -> Result<BridgeResult, BridgeError> {
        let source_route = route_for(source).ok_or_else(|| BridgeError::UnsupportedRoute {
            source_chain: source.clone(),
            destination: destination.clone(),
        })?;
        let destination_route =
            route_for(destination).ok_or_else(|| BridgeError::UnsupportedRoute {
                source_chain: source.clone(),
                destination: destination.clone(),
            })?;
        if !self.is_usdc(destination, destination_asset) {
            return Err(BridgeError::UnsupportedRoute {
                source_chain: source.clone(),
                destination: destination.clone(),
            });
        }

        tracing::info!(
            source_tx = source_tx_hash,
            recipient = %recipient,
            "starting burn-and-mint transfer"
        );

        let (burn_tx_hash, message) = self
            .burn(source, source_route, destination_route.domain, amount, recipient)
            .await?;
        let message_hash = keccak256(&message);
        let attestation = self
            .fetch_attestation(message_hash, source_route.testnet)
            .await?;
        let mint_tx_hash = self
            .mint(destination, destination_route, message, attestation)
            .await?;

        tracing::info!(
            burn_tx = %burn_tx_hash,
            mint_tx = %mint_tx_hash,
            message_hash = %message_hash,
            "burn-and-mint transfer completed"
        );

        Ok(BridgeResult {
            bridge_tx_hash: burn_tx_hash,
            destination_tx_hash: Some(mint_tx_hash),
            message_id: Some(message_hash.to_string()),
            source_chain: source.clone(),
            destination_chain: destination.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> CctpBridgeProvider {
        // No chain providers: enough for the pure routing checks.
        CctpBridgeProvider::new(HashMap::new(), CctpConfig::default())
    }

    #[test]
    fn routes_cover_known_networks() {
        let base_sepolia = ChainId::new("eip155", "84532");
        let route = route_for(&base_sepolia).unwrap();
        assert_eq!(route.domain, 6);
        assert!(route.testnet);

        let sepolia = ChainId::new("eip155", "11155111");
        assert_eq!(route_for(&sepolia).unwrap().domain, 0);

        assert!(route_for(&ChainId::new("eip155", "999999")).is_none());
    }

    #[test]
    fn testnet_routes_use_sandbox_api() {
        assert_eq!(
            CctpBridgeProvider::api_base(true),
            "https://iris-api-sandbox.circle.com"
        );
        assert_eq!(
            CctpBridgeProvider::api_base(false),
            "https://iris-api.circle.com"
        );
    }

    #[test]
    fn unconfigured_chain_is_unsupported() {
        let provider = provider();
        // Route exists but no chain provider was configured.
        assert!(!provider.supports_chain(&ChainId::new("eip155", "84532")));
    }

    #[tokio::test]
    async fn exchange_rate_is_unit_for_usdc_pairs() {
        let provider = provider();
        let base_sepolia = ChainId::new("eip155", "84532");
        let sepolia = ChainId::new("eip155", "11155111");
        let usdc_base_sepolia = address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e");
        let usdc_sepolia = address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238");

        let rate = provider
            .get_exchange_rate(&base_sepolia, &sepolia, &usdc_base_sepolia, &usdc_sepolia)
            .await
            .unwrap();
        assert_eq!(rate, 1.0);

        let bogus = address!("0x00000000000000000000000000000000000000aa");
        let rate = provider
            .get_exchange_rate(&base_sepolia, &sepolia, &usdc_base_sepolia, &bogus)
            .await
            .unwrap();
        assert_eq!(rate, 0.0);
    }

    #[test]
    fn mint_recipient_is_left_padded() {
        let recipient = address!("0x209693Bc6afc0C5328bA36FaF03C514EF312287C");
        let padded = B256::left_padding_from(recipient.as_slice());
        assert_eq!(&padded[..12], &[0u8; 12]);
        assert_eq!(&padded[12..], recipient.as_slice());
    }
}
