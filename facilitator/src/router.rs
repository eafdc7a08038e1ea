//! The cross-chain scheme: validation and routing on top of `exact`.
//!
//! A cross-chain payment is an exact-EVM payment whose funds land at the
//! facilitator's own address on the source chain, plus a bridge obligation
//! towards the merchant's destination address. This router owns the
//! cross-chain preconditions, rewrites the requirements to target the
//! facilitator, delegates the on-chain work to the exact scheme handler, and
//! enqueues the bridge job after a successful settlement.
//!
//! Rewriting `payTo` is a security requirement, not an implementation
//! convenience: accepting a merchant-supplied recipient on the source chain
//! would let a malicious merchant siphon buyer funds while still collecting
//! on the destination chain.

use alloy_primitives::Address;
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use tracing::instrument;

use railbridge_chain_eip155::chain::{ChecksummedAddress, TokenAmount};
use railbridge_chain_eip155::exact::{ExactEvmPayload, ExactExtra};
use railbridge_types::chain::ChainId;
use railbridge_types::extension::{
    CROSS_CHAIN_EXTENSION_KEY, CrossChainInfo, ExtensionError, require_cross_chain_info,
};
use railbridge_types::lit_str;
use railbridge_types::proto;
use railbridge_types::proto::PaymentError;
use railbridge_types::scheme::SchemeFacilitator;

use railbridge_bridge::provider::BridgeProvider;
use railbridge_bridge::worker::{BridgeEnqueuer, BridgeRequest};

lit_str!(CrossChainScheme, "cross-chain");

/// Requirements as sent for the cross-chain scheme: exact-EVM field types
/// under the `cross-chain` tag.
pub type CrossChainRequirements = proto::PaymentRequirements<
    CrossChainScheme,
    TokenAmount,
    ChecksummedAddress,
    Option<ExactExtra>,
>;

/// Payload as sent for the cross-chain scheme.
pub type CrossChainPayload = proto::PaymentPayload<CrossChainRequirements, ExactEvmPayload>;

type CrossChainRequest = proto::VerifyRequest<CrossChainPayload, CrossChainRequirements>;

/// Scheme handler for `cross-chain` on one source chain.
pub struct CrossChainRouter {
    /// The exact scheme handler performing the source-chain work.
    inner: Arc<dyn SchemeFacilitator>,
    bridge: Arc<dyn BridgeProvider>,
    enqueuer: Arc<dyn BridgeEnqueuer>,
    /// The facilitator's receiving address on the source chain.
    facilitator_address: Address,
    source_network: ChainId,
}

impl CrossChainRouter {
    pub fn new(
        inner: Arc<dyn SchemeFacilitator>,
        bridge: Arc<dyn BridgeProvider>,
        enqueuer: Arc<dyn BridgeEnqueuer>,
        facilitator_address: Address,
        source_network: ChainId,
    ) -> Self {
        Self {
            inner,
            bridge,
            enqueuer,
            facilitator_address,
            source_network,
        }
    }

    /// Runs the cross-chain preconditions and extracts the routing info.
    async fn assert_cross_chain(
        &self,
        request: &proto::RawVerifyRequest,
    ) -> Result<(CrossChainRequest, CrossChainInfo), PaymentError> {
        let typed = CrossChainRequest::from_raw(request)?;
        let requirements = &typed.payment_requirements;
        let payload = &typed.payment_payload;

        let info = require_cross_chain_info(&payload.extensions).map_err(|e| match e {
            ExtensionError::Missing => PaymentError::MissingCrossChainExtension,
            ExtensionError::InvalidDestinationPayTo => PaymentError::InvalidDestinationPayTo,
        })?;

        let destination = &info.destination_network;
        if !self.bridge.supports_chain(&self.source_network)
            || !self.bridge.supports_chain(destination)
        {
            return Err(PaymentError::UnsupportedChainPair(
                self.source_network.clone(),
                destination.clone(),
            ));
        }

        let source_asset: Address = requirements.asset.into();
        if !self.bridge.is_usdc(&self.source_network, &source_asset) {
            return Err(PaymentError::UnsupportedSourceAsset(
                self.source_network.clone(),
            ));
        }
        let destination_asset = Address::from_str(&info.destination_asset)
            .map_err(|_| PaymentError::InvalidFormat("destination asset".into()))?;
        if !self.bridge.is_usdc(destination, &destination_asset) {
            return Err(PaymentError::UnsupportedDestinationAsset(
                destination.clone(),
            ));
        }

        if Address::from(requirements.pay_to) != self.facilitator_address {
            return Err(PaymentError::InvalidSourcePayTo);
        }

        let amount = requirements.amount.into();
        let liquid = self
            .bridge
            .check_liquidity(&self.source_network, destination, &source_asset, amount)
            .await
            .map_err(|e| PaymentError::Onchain(e.to_string()))?;
        if !liquid {
            return Err(PaymentError::InsufficientBridgeLiquidity);
        }

        if source_asset != destination_asset {
            let rate = self
                .bridge
                .get_exchange_rate(
                    &self.source_network,
                    destination,
                    &source_asset,
                    &destination_asset,
                )
                .await
                .map_err(|e| PaymentError::Onchain(e.to_string()))?;
            if rate <= 0.0 {
                return Err(PaymentError::InvalidExchangeRate);
            }
        }

        Ok((typed, info))
    }

    /// Rewrites the request for the exact handler: scheme `exact`, and the
    /// facilitator as the source-chain recipient, in both the requirements
    /// and the accepted copy the buyer signed over.
    fn rewrite_for_exact(
        &self,
        request: &proto::RawVerifyRequest,
    ) -> Result<proto::RawVerifyRequest, PaymentError> {
        let mut body: serde_json::Value = serde_json::from_str(request.as_str())?;
        let pay_to =
            serde_json::Value::String(ChecksummedAddress(self.facilitator_address).to_string());
        let exact = serde_json::Value::String("exact".into());

        for target in ["paymentRequirements", "paymentPayload"] {
            let object = match target {
                "paymentRequirements" => body.get_mut(target),
                _ => body.get_mut(target).and_then(|p| p.get_mut("accepted")),
            }
            .and_then(|v| v.as_object_mut())
            .ok_or_else(|| PaymentError::InvalidFormat(format!("missing {target}")))?;
            object.insert("scheme".into(), exact.clone());
            object.insert("payTo".into(), pay_to.clone());
        }

        proto::RawVerifyRequest::from_value(&body)
            .map_err(|e| PaymentError::InvalidFormat(e.to_string()))
    }
}

#[async_trait]
impl SchemeFacilitator for CrossChainRouter {
    #[instrument(skip_all, err)]
    async fn verify(
        &self,
        request: &proto::RawVerifyRequest,
    ) -> Result<proto::VerifyResponse, PaymentError> {
        self.assert_cross_chain(request).await?;
        let rewritten = self.rewrite_for_exact(request)?;
        self.inner.verify(&rewritten).await
    }

    #[instrument(skip_all, err)]
    async fn settle(
        &self,
        request: &proto::RawSettleRequest,
    ) -> Result<proto::SettleResponse, PaymentError> {
        let (typed, info) = self.assert_cross_chain(request).await?;
        let rewritten = self.rewrite_for_exact(request)?;
        let response = self.inner.settle(&rewritten).await?;

        if response.success && info.destination_network != self.source_network {
            // Bridging happens asynchronously; its outcome never changes
            // this response. The settlement carries the source transaction,
            // bridging status is tracked out-of-band on the job record.
            let enqueued = self
                .enqueuer
                .enqueue(BridgeRequest {
                    source_network: self.source_network.clone(),
                    destination_network: info.destination_network.clone(),
                    source_tx_hash: response.transaction.clone(),
                    amount: typed.payment_requirements.amount.to_string(),
                    destination_asset: info.destination_asset.clone(),
                    destination_pay_to: info.destination_pay_to.clone(),
                })
                .await;
            match enqueued {
                Ok(job) => {
                    tracing::info!(
                        job_id = %job.id,
                        source_tx = %response.transaction,
                        destination = %info.destination_network,
                        "bridge job enqueued"
                    );
                }
                Err(error) => {
                    // The recovery scan cannot help here (no job row), so
                    // this is the one place where manual reconciliation of
                    // the source transaction is required.
                    tracing::error!(
                        source_tx = %response.transaction,
                        error = %error,
                        "failed to enqueue bridge job"
                    );
                }
            }
        } else if response.success {
            tracing::warn!(
                source_tx = %response.transaction,
                "cross-chain payment with same-chain destination; nothing to bridge"
            );
        }

        Ok(response)
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, PaymentError> {
        Ok(proto::SupportedResponse {
            kinds: vec![proto::SupportedPaymentKind {
                x402_version: proto::X402Version.into(),
                scheme: CrossChainScheme.to_string(),
                network: self.source_network.to_string(),
                extra: None,
            }],
            extensions: vec![CROSS_CHAIN_EXTENSION_KEY.to_string()],
            signers: Default::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{U256, address};
    use railbridge_bridge::job::BridgeJob;
    use railbridge_bridge::provider::{BridgeError, BridgeResult};
    use railbridge_bridge::store::StoreError;
    use railbridge_types::proto::{ErrorReason, RawVerifyRequest};
    use std::sync::Mutex;

    const FACILITATOR: Address = address!("0x1111111111111111111111111111111111111111");
    const MERCHANT: &str = "0x209693Bc6afc0C5328bA36FaF03C514EF312287C";
    const USDC_BASE_SEPOLIA: &str = "0x036CbD53842c5426634e7929541eC2318f3dCF7e";
    const USDC_SEPOLIA: &str = "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238";

    /// Inner handler capturing the (rewritten) requests it receives.
    #[derive(Default)]
    struct CapturingInner {
        last: Mutex<Option<String>>,
        settle_success: bool,
    }

    #[async_trait]
    impl SchemeFacilitator for CapturingInner {
        async fn verify(
            &self,
            request: &RawVerifyRequest,
        ) -> Result<proto::VerifyResponse, PaymentError> {
            *self.last.lock().unwrap() = Some(request.as_str().to_string());
            Ok(proto::VerifyResponse::valid("0xbuyer".into()))
        }

        async fn settle(
            &self,
            request: &RawVerifyRequest,
        ) -> Result<proto::SettleResponse, PaymentError> {
            *self.last.lock().unwrap() = Some(request.as_str().to_string());
            if self.settle_success {
                Ok(proto::SettleResponse {
                    success: true,
                    transaction: "0xsettletx".into(),
                    network: "eip155:84532".into(),
                    payer: Some("0xbuyer".into()),
                    error_reason: None,
                })
            } else {
                Err(PaymentError::TransactionFailed("reverted".into()))
            }
        }

        async fn supported(&self) -> Result<proto::SupportedResponse, PaymentError> {
            Ok(proto::SupportedResponse::default())
        }
    }

    struct FakeBridge {
        liquid: bool,
    }

    #[async_trait]
    impl BridgeProvider for FakeBridge {
        fn supports_chain(&self, network: &ChainId) -> bool {
            matches!(network.reference(), "84532" | "11155111")
        }

        fn is_usdc(&self, network: &ChainId, asset: &Address) -> bool {
            railbridge_chain_eip155::networks::is_usdc(network, asset)
        }

        async fn check_liquidity(
            &self,
            _source: &ChainId,
            _destination: &ChainId,
            _asset: &Address,
            _amount: U256,
        ) -> Result<bool, BridgeError> {
            Ok(self.liquid)
        }

        async fn get_exchange_rate(
            &self,
            _source: &ChainId,
            _destination: &ChainId,
            _source_asset: &Address,
            _destination_asset: &Address,
        ) -> Result<f64, BridgeError> {
            Ok(1.0)
        }

        async fn bridge(
            &self,
            _source: &ChainId,
            _source_tx_hash: &str,
            _destination: &ChainId,
            _destination_asset: &Address,
            _amount: U256,
            _recipient: &Address,
        ) -> Result<BridgeResult, BridgeError> {
            unreachable!("router never bridges inline")
        }
    }

    #[derive(Default)]
    struct RecordingEnqueuer {
        requests: Mutex<Vec<BridgeRequest>>,
    }

    #[async_trait]
    impl BridgeEnqueuer for RecordingEnqueuer {
        async fn enqueue(&self, request: BridgeRequest) -> Result<BridgeJob, StoreError> {
            let job = BridgeJob::new(
                request.source_network.clone(),
                request.destination_network.clone(),
                request.source_tx_hash.clone(),
                request.amount.clone(),
                request.destination_asset.clone(),
                request.destination_pay_to.clone(),
            );
            self.requests.lock().unwrap().push(request);
            Ok(job)
        }
    }

    fn router(
        inner: Arc<CapturingInner>,
        liquid: bool,
        enqueuer: Arc<RecordingEnqueuer>,
    ) -> CrossChainRouter {
        CrossChainRouter::new(
            inner,
            Arc::new(FakeBridge { liquid }),
            enqueuer,
            FACILITATOR,
            ChainId::new("eip155", "84532"),
        )
    }

    fn request_body(pay_to: &str, extension: Option<serde_json::Value>) -> RawVerifyRequest {
        let requirements = serde_json::json!({
            "scheme": "cross-chain",
            "network": "eip155:84532",
            "amount": "10000",
            "payTo": pay_to,
            "maxTimeoutSeconds": 300,
            "asset": USDC_BASE_SEPOLIA,
            "extra": { "name": "USDC", "version": "2" },
        });
        let mut extensions = serde_json::Map::new();
        if let Some(extension) = extension {
            extensions.insert("cross-chain".into(), extension);
        }
        let body = serde_json::json!({
            "paymentPayload": {
                "x402Version": 1,
                "accepted": requirements,
                "payload": {
                    "signature": format!("0x{}", "11".repeat(65)),
                    "authorization": {
                        "from": "0x857b06519E91e3A54538791bDbb0E22373e36b66",
                        "to": ChecksummedAddress(FACILITATOR).to_string(),
                        "value": "10000",
                        "validAfter": "0",
                        "validBefore": "99999999999",
                        "nonce": format!("0x{}", "42".repeat(32)),
                    }
                },
                "extensions": extensions,
            },
            "paymentRequirements": requirements,
        });
        RawVerifyRequest::from_value(&body).unwrap()
    }

    fn extension() -> serde_json::Value {
        serde_json::json!({
            "destinationNetwork": "eip155:11155111",
            "destinationAsset": USDC_SEPOLIA,
            "destinationPayTo": MERCHANT,
        })
    }

    fn facilitator_pay_to() -> String {
        ChecksummedAddress(FACILITATOR).to_string()
    }

    #[tokio::test]
    async fn verify_rewrites_scheme_and_recipient() {
        let inner = Arc::new(CapturingInner::default());
        let router = router(inner.clone(), true, Arc::new(RecordingEnqueuer::default()));

        let response = router
            .verify(&request_body(&facilitator_pay_to(), Some(extension())))
            .await
            .unwrap();
        assert!(response.is_valid);

        let forwarded = inner.last.lock().unwrap().clone().unwrap();
        let forwarded: serde_json::Value = serde_json::from_str(&forwarded).unwrap();
        assert_eq!(forwarded["paymentRequirements"]["scheme"], "exact");
        assert_eq!(
            forwarded["paymentRequirements"]["payTo"],
            facilitator_pay_to()
        );
        assert_eq!(forwarded["paymentPayload"]["accepted"]["scheme"], "exact");
        assert_eq!(
            forwarded["paymentPayload"]["accepted"]["payTo"],
            facilitator_pay_to()
        );
    }

    #[tokio::test]
    async fn rejects_missing_extension() {
        let router = router(
            Arc::new(CapturingInner::default()),
            true,
            Arc::new(RecordingEnqueuer::default()),
        );
        let err = router
            .verify(&request_body(&facilitator_pay_to(), None))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ErrorReason::MissingCrossChainExtension);
    }

    #[tokio::test]
    async fn rejects_invalid_destination_pay_to() {
        let router = router(
            Arc::new(CapturingInner::default()),
            true,
            Arc::new(RecordingEnqueuer::default()),
        );
        let mut bad = extension();
        bad["destinationPayTo"] = serde_json::json!("0xnope");
        let err = router
            .verify(&request_body(&facilitator_pay_to(), Some(bad)))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ErrorReason::InvalidDestinationPayTo);
    }

    #[tokio::test]
    async fn rejects_unsupported_destination_chain() {
        let router = router(
            Arc::new(CapturingInner::default()),
            true,
            Arc::new(RecordingEnqueuer::default()),
        );
        let mut bad = extension();
        bad["destinationNetwork"] = serde_json::json!("eip155:999999");
        let err = router
            .verify(&request_body(&facilitator_pay_to(), Some(bad)))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ErrorReason::UnsupportedChainPair);
    }

    #[tokio::test]
    async fn rejects_non_usdc_destination_asset() {
        let router = router(
            Arc::new(CapturingInner::default()),
            true,
            Arc::new(RecordingEnqueuer::default()),
        );
        let mut bad = extension();
        bad["destinationAsset"] = serde_json::json!("0x00000000000000000000000000000000000000aa");
        let err = router
            .verify(&request_body(&facilitator_pay_to(), Some(bad)))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ErrorReason::UnsupportedDestinationAsset);
    }

    #[tokio::test]
    async fn rejects_malicious_source_pay_to() {
        let router = router(
            Arc::new(CapturingInner::default()),
            true,
            Arc::new(RecordingEnqueuer::default()),
        );
        let err = router
            .verify(&request_body(
                "0x00000000000000000000000000000000000000ee",
                Some(extension()),
            ))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ErrorReason::InvalidSourcePayTo);
    }

    #[tokio::test]
    async fn rejects_when_bridge_lacks_liquidity() {
        let router = router(
            Arc::new(CapturingInner::default()),
            false,
            Arc::new(RecordingEnqueuer::default()),
        );
        let err = router
            .verify(&request_body(&facilitator_pay_to(), Some(extension())))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ErrorReason::InsufficientBridgeLiquidity);
    }

    #[tokio::test]
    async fn successful_settle_enqueues_bridge_job() {
        let inner = Arc::new(CapturingInner {
            settle_success: true,
            ..Default::default()
        });
        let enqueuer = Arc::new(RecordingEnqueuer::default());
        let router = router(inner, true, enqueuer.clone());

        let response = router
            .settle(&request_body(&facilitator_pay_to(), Some(extension())))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.transaction, "0xsettletx");

        let requests = enqueuer.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.source_tx_hash, "0xsettletx");
        assert_eq!(request.amount, "10000");
        assert_eq!(request.destination_network, ChainId::new("eip155", "11155111"));
        assert_eq!(request.destination_pay_to, MERCHANT);
        assert_eq!(request.destination_asset, USDC_SEPOLIA);
    }

    #[tokio::test]
    async fn failed_settle_enqueues_nothing() {
        let inner = Arc::new(CapturingInner::default());
        let enqueuer = Arc::new(RecordingEnqueuer::default());
        let router = router(inner, true, enqueuer.clone());

        let err = router
            .settle(&request_body(&facilitator_pay_to(), Some(extension())))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), ErrorReason::TransactionFailed);
        assert!(enqueuer.requests.lock().unwrap().is_empty());
    }
}
