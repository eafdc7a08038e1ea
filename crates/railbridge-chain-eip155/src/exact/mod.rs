//! The `exact` payment scheme for EVM chains.
//!
//! Verifies and settles EIP-3009 `TransferWithAuthorization` payloads. The
//! buyer signs an EIP-712 authorization for an exact token amount; the
//! facilitator checks it off-chain (and by simulation for contract wallets)
//! and submits the transfer on-chain during settlement.
//!
//! # Signature handling
//!
//! Settlement dispatches to different `transferWithAuthorization` overloads
//! based on the signature format:
//!
//! - **EOA signatures (65 bytes)**: parsed into (v, r, s) components and sent
//!   through the standard EIP-3009 function.
//! - **ERC-1271 signatures**: passed as signature bytes to the `bytes`
//!   overload for contract wallets; validity is established by simulating
//!   the transfer.
//! - **EIP-6492 signatures**: detected by the 32-byte magic suffix. Verify
//!   runs the universal validator and the transfer in one multicall
//!   simulation so the counterfactual wallet can be prepared in-sim.
//!   Settle deploys the wallet through Multicall3 together with the
//!   transfer, when deployment is enabled.

pub mod domain;
pub mod signature;
pub mod types;

use alloy_primitives::{Address, B256, Bytes, FixedBytes, U256, address};
use alloy_provider::bindings::IMulticall3;
use alloy_provider::{MULTICALL3_ADDRESS, Provider};
use alloy_sol_types::{SolCall, SolStruct, sol};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

use async_trait::async_trait;
use railbridge_types::chain::ChainProviderOps;
use railbridge_types::proto;
use railbridge_types::proto::PaymentError;
use railbridge_types::scheme::SchemeFacilitator;
use railbridge_types::timestamp::UnixTimestamp;

use crate::chain::{Eip155ChainProvider, InnerProvider, MetaTransaction};
use domain::{DomainCache, resolve_domain};
use signature::StructuredSignature;
pub use types::{
    ExactEvmPayload, ExactEvmPayloadAuthorization, ExactExtra, ExactScheme, IEIP3009,
    PaymentPayload, PaymentRequirements, SettleRequest, TransferWithAuthorization, VerifyRequest,
};

/// Signature verifier for EIP-6492, EIP-1271, and EOA signatures,
/// universally deployed on the supported EVM chains. If absent on a target
/// chain, 6492 verification fails; deploy the validator there.
const VALIDATOR_ADDRESS: Address = address!("0xdAcD51A54883eb67D95FAEb2BBfdC4a9a6BD2a3B");

sol! {
    #[allow(missing_docs)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IValidator6492 {
        function isValidSigWithSideEffects(
            address _signer,
            bytes32 _hash,
            bytes calldata _signature
        ) external returns (bool);
    }
}

/// Facilitator for the `exact` scheme on one EVM chain.
pub struct ExactEvmFacilitator {
    provider: Arc<Eip155ChainProvider>,
    deploy_with_eip6492: bool,
    domain_cache: DomainCache,
}

impl ExactEvmFacilitator {
    /// Creates a facilitator over `provider`.
    ///
    /// `deploy_with_eip6492` controls whether settlement may deploy a
    /// counterfactual smart wallet from an EIP-6492 wrapper.
    pub fn new(provider: Arc<Eip155ChainProvider>, deploy_with_eip6492: bool) -> Self {
        Self {
            provider,
            deploy_with_eip6492,
            domain_cache: DomainCache::default(),
        }
    }

    /// Runs all preconditions needed for a successful payment:
    /// - accepted terms equal the presented requirements,
    /// - network matches this provider,
    /// - reconstructable EIP-712 domain,
    /// - valid signature for the authorization,
    /// - recipient matches `payTo`,
    /// - valid time window,
    /// - sufficient balance (best effort) and authorized value.
    #[instrument(skip_all, err)]
    async fn assert_valid_payment(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> Result<ValidPayment, PaymentError> {
        if &payload.accepted != requirements {
            return Err(PaymentError::InvalidFormat(
                "accepted terms do not match payment requirements".into(),
            ));
        }
        if requirements.network != self.provider.chain_id() {
            return Err(PaymentError::NetworkMismatch);
        }

        let authorization = &payload.payload.authorization;
        let asset: Address = requirements.asset.into();
        let contract = IEIP3009::new(asset, self.provider.inner());

        let chain = self.provider.chain_reference();
        let domain = resolve_domain(
            &contract,
            chain,
            asset,
            &requirements.extra,
            &self.domain_cache,
        )
        .await?;

        let signature = StructuredSignature::try_from(&payload.payload.signature)?;
        let eip712_hash = authorization_hash(authorization, &domain);
        self.assert_signature(&contract, authorization, &signature, eip712_hash)
            .await?;

        if authorization.to != requirements.pay_to.0 {
            return Err(PaymentError::RecipientMismatch);
        }

        assert_time(authorization.valid_after, authorization.valid_before)?;

        let amount_required: U256 = requirements.amount.into();

        // Best effort: an RPC hiccup on the balance read must not reject an
        // otherwise valid payment.
        match contract.balanceOf(authorization.from).call().await {
            Ok(balance) => {
                if balance < amount_required {
                    return Err(PaymentError::InsufficientFunds);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, payer = %authorization.from, "balance check skipped");
            }
        }

        let authorization_value: U256 = authorization.value.into();
        if authorization_value < amount_required {
            return Err(PaymentError::InsufficientValue);
        }

        Ok(ValidPayment {
            signature,
            payer: authorization.from,
        })
    }

    /// Establishes signature validity for the three supported families.
    async fn assert_signature(
        &self,
        contract: &IEIP3009::IEIP3009Instance<&InnerProvider>,
        authorization: &ExactEvmPayloadAuthorization,
        signature: &StructuredSignature,
        eip712_hash: B256,
    ) -> Result<(), PaymentError> {
        match signature {
            StructuredSignature::Ecdsa(ecdsa) => {
                let recovered = ecdsa
                    .recover_address_from_prehash(&eip712_hash)
                    .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
                if recovered != authorization.from {
                    return Err(PaymentError::InvalidSignature(format!(
                        "Address mismatch: recovered {} expected {}",
                        recovered, authorization.from
                    )));
                }
                Ok(())
            }
            StructuredSignature::Contract(bytes) => {
                // The token validates the ERC-1271 signature during the
                // transfer; simulating the call settles both questions.
                transfer_call_bytes(contract, authorization, bytes.clone())
                    .call()
                    .await
                    .map_err(|e| PaymentError::InvalidSignature(format!("{e}")))?;
                Ok(())
            }
            StructuredSignature::Eip6492 {
                inner, original, ..
            } => {
                // Validator and transfer share one eth_call simulation so a
                // counterfactual wallet prepared by the validator is visible
                // to the transfer.
                let validator = IValidator6492::new(VALIDATOR_ADDRESS, self.provider.inner());
                let is_valid_call = validator.isValidSigWithSideEffects(
                    authorization.from,
                    eip712_hash,
                    original.clone(),
                );
                let transfer_call = transfer_call_bytes(contract, authorization, inner.clone());
                let (is_valid, transfer_result) = self
                    .provider
                    .inner()
                    .multicall()
                    .add(is_valid_call)
                    .add(transfer_call)
                    .aggregate3()
                    .await
                    .map_err(|e| PaymentError::Onchain(format!("{e}")))?;
                let is_valid =
                    is_valid.map_err(|e| PaymentError::InvalidSignature(format!("{e}")))?;
                if !is_valid {
                    return Err(PaymentError::InvalidSignature("Incorrect signature".into()));
                }
                transfer_result.map_err(|e| PaymentError::InvalidSignature(format!("{e}")))?;
                Ok(())
            }
        }
    }
}

/// Everything needed to submit a settlement after validation passed.
struct ValidPayment {
    signature: StructuredSignature,
    payer: Address,
}

#[async_trait]
impl SchemeFacilitator for ExactEvmFacilitator {
    #[instrument(skip_all, err)]
    async fn verify(
        &self,
        request: &proto::RawVerifyRequest,
    ) -> Result<proto::VerifyResponse, PaymentError> {
        let request = VerifyRequest::from_raw(request)?;
        let valid = self
            .assert_valid_payment(&request.payment_payload, &request.payment_requirements)
            .await?;
        Ok(proto::VerifyResponse::valid(valid.payer.to_string()))
    }

    #[instrument(skip_all, err)]
    async fn settle(
        &self,
        request: &proto::RawSettleRequest,
    ) -> Result<proto::SettleResponse, PaymentError> {
        let request = SettleRequest::from_raw(request)?;
        let payload = &request.payment_payload;
        let requirements = &request.payment_requirements;
        let valid = self.assert_valid_payment(payload, requirements).await?;
        let authorization = &payload.payload.authorization;
        let asset: Address = requirements.asset.into();

        let calldata = match &valid.signature {
            StructuredSignature::Ecdsa(ecdsa) => {
                let raw = ecdsa.as_bytes();
                let call = IEIP3009::transferWithAuthorization_0Call {
                    from: authorization.from,
                    to: authorization.to,
                    value: authorization.value.into(),
                    validAfter: U256::from(authorization.valid_after.as_secs()),
                    validBefore: U256::from(authorization.valid_before.as_secs()),
                    nonce: authorization.nonce,
                    v: raw[64],
                    r: ecdsa.r().into(),
                    s: ecdsa.s().into(),
                };
                Bytes::from(call.abi_encode())
            }
            StructuredSignature::Contract(bytes) => {
                transfer_calldata_bytes(authorization, bytes.clone())
            }
            StructuredSignature::Eip6492 {
                factory,
                factory_calldata,
                inner,
                ..
            } => {
                let deployed = self
                    .provider
                    .is_contract_deployed(&valid.payer)
                    .await
                    .map_err(|e| PaymentError::Onchain(e.to_string()))?;
                if deployed {
                    transfer_calldata_bytes(authorization, inner.clone())
                } else {
                    if !self.deploy_with_eip6492 {
                        return Err(PaymentError::InvalidSignature(
                            "counterfactual wallet is not deployed and deployment is disabled"
                                .into(),
                        ));
                    }
                    // Deploy the smart wallet and run the transfer in one
                    // transaction; the factory call may no-op if another
                    // party deployed the wallet first.
                    let deployment_call = IMulticall3::Call3 {
                        allowFailure: true,
                        target: *factory,
                        callData: factory_calldata.clone(),
                    };
                    let transfer_call = IMulticall3::Call3 {
                        allowFailure: false,
                        target: asset,
                        callData: transfer_calldata_bytes(authorization, inner.clone()),
                    };
                    let aggregate = IMulticall3::aggregate3Call {
                        calls: vec![deployment_call, transfer_call],
                    };
                    let receipt = self
                        .provider
                        .send_transaction(MetaTransaction {
                            to: MULTICALL3_ADDRESS,
                            calldata: aggregate.abi_encode().into(),
                            confirmations: 1,
                        })
                        .await
                        .map_err(|e| PaymentError::TransactionFailed(e.to_string()))?;
                    return settle_response(receipt, requirements, valid.payer);
                }
            }
        };

        let receipt = self
            .provider
            .send_transaction(MetaTransaction {
                to: asset,
                calldata,
                confirmations: 1,
            })
            .await
            .map_err(|e| PaymentError::TransactionFailed(e.to_string()))?;
        settle_response(receipt, requirements, valid.payer)
    }

    async fn supported(&self) -> Result<proto::SupportedResponse, PaymentError> {
        let chain_id = self.provider.chain_id();
        let kinds = vec![proto::SupportedPaymentKind {
            x402_version: proto::X402Version.into(),
            scheme: ExactScheme.to_string(),
            network: chain_id.to_string(),
            extra: None,
        }];
        let signers = {
            let mut signers = HashMap::with_capacity(1);
            signers.insert(chain_id, self.provider.signer_addresses());
            signers
        };
        Ok(proto::SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        })
    }
}

/// Builds the final settle response from a mined receipt.
fn settle_response(
    receipt: alloy_rpc_types_eth::TransactionReceipt,
    requirements: &PaymentRequirements,
    payer: Address,
) -> Result<proto::SettleResponse, PaymentError> {
    let transaction = receipt.transaction_hash.to_string();
    let network = requirements.network.to_string();
    if receipt.status() {
        tracing::info!(tx = %transaction, "transferWithAuthorization succeeded");
        Ok(proto::SettleResponse {
            success: true,
            transaction,
            network,
            payer: Some(payer.to_string()),
            error_reason: None,
        })
    } else {
        tracing::warn!(tx = %transaction, "transferWithAuthorization reverted");
        Ok(proto::SettleResponse {
            success: false,
            transaction,
            network,
            payer: Some(payer.to_string()),
            error_reason: Some(proto::ErrorReason::InvalidTransactionState),
        })
    }
}

/// Computes the EIP-712 signing hash of an authorization under `domain`.
pub fn authorization_hash(
    authorization: &ExactEvmPayloadAuthorization,
    domain: &alloy_sol_types::Eip712Domain,
) -> B256 {
    let message = TransferWithAuthorization {
        from: authorization.from,
        to: authorization.to,
        value: authorization.value.into(),
        validAfter: U256::from(authorization.valid_after.as_secs()),
        validBefore: U256::from(authorization.valid_before.as_secs()),
        nonce: FixedBytes(authorization.nonce.0),
    };
    message.eip712_signing_hash(domain)
}

/// Prepared `bytes`-overload transfer call, used for simulations.
fn transfer_call_bytes<'a>(
    contract: &'a IEIP3009::IEIP3009Instance<&'a InnerProvider>,
    authorization: &ExactEvmPayloadAuthorization,
    signature: Bytes,
) -> alloy_contract::SolCallBuilder<&'a &'a InnerProvider, IEIP3009::transferWithAuthorization_1Call>
{
    contract.transferWithAuthorization_1(
        authorization.from,
        authorization.to,
        authorization.value.into(),
        U256::from(authorization.valid_after.as_secs()),
        U256::from(authorization.valid_before.as_secs()),
        authorization.nonce,
        signature,
    )
}

/// Encoded `bytes`-overload transfer calldata, used for submissions.
fn transfer_calldata_bytes(
    authorization: &ExactEvmPayloadAuthorization,
    signature: Bytes,
) -> Bytes {
    let call = IEIP3009::transferWithAuthorization_1Call {
        from: authorization.from,
        to: authorization.to,
        value: authorization.value.into(),
        validAfter: U256::from(authorization.valid_after.as_secs()),
        validBefore: U256::from(authorization.valid_before.as_secs()),
        nonce: authorization.nonce,
        signature,
    };
    Bytes::from(call.abi_encode())
}

/// Validates that the current time is within the authorization window.
///
/// A 6-second grace buffer applies to expiration to account for latency
/// between verification and on-chain inclusion.
#[instrument(skip_all, err)]
fn assert_time(
    valid_after: UnixTimestamp,
    valid_before: UnixTimestamp,
) -> Result<(), PaymentError> {
    let now = UnixTimestamp::now();
    if valid_before < now + 6 {
        return Err(PaymentError::ValidBefore(format!(
            "Expired: now {} > valid_before {}",
            now + 6,
            valid_before
        )));
    }
    if valid_after > now {
        return Err(PaymentError::ValidAfter(format!(
            "Not active yet: valid_after {valid_after} > now {now}"
        )));
    }
    Ok(())
}
