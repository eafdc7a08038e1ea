//! Wire format types for protocol messages.
//!
//! This module defines the JSON shapes exchanged between buyers, merchants,
//! and the facilitator. All types serialize with camelCase field names. The
//! protocol version is indicated by the `x402Version` field in payment
//! payloads.
//!
//! # Key types
//!
//! - [`PaymentRequirements`] - the merchant's offer for a payment route
//! - [`PaymentPayload`] - the buyer's signed authorization
//! - [`VerifyRequest`] / [`VerifyResponse`] - payment verification messages
//! - [`SettleRequest`] / [`SettleResponse`] - payment settlement messages
//! - [`ErrorReason`] - stable machine-readable failure reasons
//! - [`PaymentError`] - structured failure values produced by scheme handlers
//!
//! Verification and settlement failures are **values**, not exceptions: a
//! failed `/verify` still answers HTTP 200 with `isValid: false` and a reason
//! from [`ErrorReason`]. Only malformed request bodies and infrastructure
//! faults surface as non-200 responses.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::{VecSkipError, serde_as};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fmt::{Display, Formatter};

use crate::chain::ChainId;

/// Version marker for the payment protocol.
///
/// Serializes as the integer `1` and is used to identify protocol messages
/// in the wire format.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct X402Version;

impl X402Version {
    pub const VALUE: u8 = 1;
}

impl From<X402Version> for u8 {
    fn from(_: X402Version) -> Self {
        X402Version::VALUE
    }
}

impl Serialize for X402Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(Self::VALUE)
    }
}

impl<'de> Deserialize<'de> for X402Version {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let num = u8::deserialize(deserializer)?;
        if num == Self::VALUE {
            Ok(X402Version)
        } else {
            Err(serde::de::Error::custom(format!(
                "expected version {}, got {}",
                Self::VALUE,
                num
            )))
        }
    }
}

impl Display for X402Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", Self::VALUE)
    }
}

/// Extension declarations carried alongside payment requirements and
/// payloads, keyed by extension name (e.g. `"cross-chain"`).
pub type Extensions = BTreeMap<String, serde_json::Value>;

/// Payment requirements set by the merchant.
///
/// Defines the terms under which a payment will be accepted. Immutable once
/// issued; a merchant emits a fresh copy per 402 response.
///
/// # Type parameters
///
/// - `TScheme` - the scheme identifier type (default: `String`)
/// - `TAmount` - the amount type (default: `String`, atomic units)
/// - `TAddress` - the address type (default: `String`)
/// - `TExtra` - scheme-specific extra data (default: `Option<serde_json::Value>`)
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequirements<
    TScheme = String,
    TAmount = String,
    TAddress = String,
    TExtra = Option<serde_json::Value>,
> {
    /// The payment scheme (e.g., "exact", "cross-chain").
    pub scheme: TScheme,
    /// The CAIP-2 chain ID (e.g., "eip155:8453").
    pub network: ChainId,
    /// The payment amount in the token's atomic units.
    pub amount: TAmount,
    /// The recipient address for the payment.
    pub pay_to: TAddress,
    /// Maximum validity window of the authorization, in seconds.
    pub max_timeout_seconds: u64,
    /// The token asset address.
    pub asset: TAddress,
    /// Scheme-specific extra data, notably EIP-712 domain hints.
    pub extra: TExtra,
    /// Extension declarations keyed by extension name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: Extensions,
}

/// A signed payment authorization from the buyer.
///
/// The payload embeds the accepted requirements, allowing the facilitator to
/// check that the buyer agreed to specific terms. Created once per payment
/// attempt and consumed at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentPayload<TPaymentRequirements, TPayload> {
    /// Protocol version (always 1).
    pub x402_version: X402Version,
    /// The payment requirements the buyer accepted.
    pub accepted: TPaymentRequirements,
    /// The scheme-specific signed payload.
    pub payload: TPayload,
    /// Extensions copied from the requirements, potentially including
    /// cross-chain routing directives.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extensions: Extensions,
}

/// Request to verify (or settle) a payment, as parsed by a scheme handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest<TPayload, TRequirements> {
    /// The signed payment authorization.
    pub payment_payload: TPayload,
    /// The payment requirements to verify against.
    pub payment_requirements: TRequirements,
}

/// Request to settle a verified payment on-chain; same shape as a verify
/// request.
pub type SettleRequest<TPayload, TRequirements> = VerifyRequest<TPayload, TRequirements>;

impl<TPayload, TRequirements> VerifyRequest<TPayload, TRequirements>
where
    Self: DeserializeOwned,
{
    /// Parses a typed request out of the raw dispatch envelope.
    pub fn from_raw(request: &RawVerifyRequest) -> Result<Self, PaymentError> {
        serde_json::from_str(request.as_str())
            .map_err(|e| PaymentError::InvalidFormat(e.to_string()))
    }
}

/// An unparsed verification request, kept verbatim for scheme dispatch.
///
/// The orchestrator inspects only the scheme and network of the accepted
/// requirements; the selected scheme handler deserializes the full typed
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawVerifyRequest(Box<serde_json::value::RawValue>);

/// An unparsed settlement request; same structure as [`RawVerifyRequest`].
pub type RawSettleRequest = RawVerifyRequest;

impl From<Box<serde_json::value::RawValue>> for RawVerifyRequest {
    fn from(value: Box<serde_json::value::RawValue>) -> Self {
        Self(value)
    }
}

impl RawVerifyRequest {
    pub fn as_str(&self) -> &str {
        self.0.get()
    }

    /// Builds a raw request from any serializable value.
    pub fn from_value<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        let raw = serde_json::value::to_raw_value(value)?;
        Ok(Self(raw))
    }

    /// Extracts the (scheme, network) dispatch key from the request.
    ///
    /// Returns `None` if the request does not carry a recognizable
    /// `paymentRequirements` shape.
    pub fn dispatch_key(&self) -> Option<DispatchKey> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct Wire {
            payment_requirements: RequirementsWire,
        }

        #[derive(Deserialize)]
        struct RequirementsWire {
            scheme: String,
            network: ChainId,
        }

        let wire = serde_json::from_str::<Wire>(self.as_str()).ok()?;
        Some(DispatchKey {
            scheme: wire.payment_requirements.scheme,
            network: wire.payment_requirements.network,
        })
    }
}

/// The (scheme, network) pair a request is routed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DispatchKey {
    pub scheme: String,
    pub network: ChainId,
}

/// Response from a payment verification request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalid_reason: Option<ErrorReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

impl VerifyResponse {
    /// A successful verification attributed to `payer`.
    pub fn valid(payer: String) -> Self {
        Self {
            is_valid: true,
            invalid_reason: None,
            payer: Some(payer),
        }
    }

    /// A failed verification carrying a stable reason code.
    pub fn invalid(reason: ErrorReason) -> Self {
        Self {
            is_valid: false,
            invalid_reason: Some(reason),
            payer: None,
        }
    }
}

/// Response from a payment settlement request.
///
/// The merchant receives the same shape regardless of error kind and decides
/// whether to serve the resource or retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleResponse {
    pub success: bool,
    /// Source-chain transaction hash, or empty when nothing was submitted.
    pub transaction: String,
    pub network: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_reason: Option<ErrorReason>,
}

impl SettleResponse {
    /// A failed settlement with no on-chain transaction.
    pub fn failed(network: &ChainId, reason: ErrorReason) -> Self {
        Self {
            success: false,
            transaction: String::new(),
            network: network.to_string(),
            payer: None,
            error_reason: Some(reason),
        }
    }
}

/// Describes a payment method supported by the facilitator.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedPaymentKind {
    /// The protocol version.
    pub x402_version: u8,
    /// The payment scheme identifier (e.g., "exact").
    pub scheme: String,
    /// The CAIP-2 network identifier.
    pub network: String,
    /// Optional scheme-specific extra data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
}

/// Response from the facilitator's `/supported` endpoint.
#[serde_as]
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedResponse {
    /// List of supported payment kinds.
    #[serde_as(as = "VecSkipError<_>")]
    pub kinds: Vec<SupportedPaymentKind>,
    /// Declared protocol extension keys.
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Signer addresses grouped by chain ID.
    #[serde(default)]
    pub signers: HashMap<ChainId, Vec<String>>,
}

/// Machine-readable reason codes for payment failures.
///
/// These are part of the wire contract: clients match on the exact
/// snake_case strings, so variants must not be renamed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReason {
    /// The payment payload or requirements are malformed.
    InvalidFormat,
    /// The payment scheme is not supported by this facilitator.
    UnsupportedScheme,
    /// The payload and requirements name different networks.
    NetworkMismatch,
    /// `extra.name`/`extra.version` are absent from the requirements.
    MissingEip712Domain,
    /// No reconstructable EIP-712 domain matches the token's separator.
    DomainSeparatorMismatch,
    /// Signature recovery or contract validation failed.
    InvalidExactEvmPayloadSignature,
    /// `authorization.to` does not match `requirements.payTo`.
    InvalidExactEvmPayloadRecipientMismatch,
    /// The authorization expires too soon.
    InvalidExactEvmPayloadAuthorizationValidBefore,
    /// The authorization is not valid yet.
    InvalidExactEvmPayloadAuthorizationValidAfter,
    /// The authorized value does not cover the required amount.
    InvalidExactEvmPayloadAuthorizationValue,
    /// The payer's on-chain balance is insufficient.
    InsufficientFunds,
    /// The settlement transaction reverted on-chain.
    InvalidTransactionState,
    /// The settlement transaction failed before inclusion.
    TransactionFailed,
    /// Cross-chain scheme without a valid cross-chain extension.
    MissingCrossChainExtension,
    /// The extension's destination recipient is not a valid address.
    InvalidDestinationPayTo,
    /// The bridge provider does not support the chain pair.
    UnsupportedChainPair,
    /// The source asset is not USDC on the source chain.
    UnsupportedSourceAsset,
    /// The destination asset is not USDC on the destination chain.
    UnsupportedDestinationAsset,
    /// `requirements.payTo` is not the facilitator's source-chain address.
    InvalidSourcePayTo,
    /// The bridge provider reports insufficient liquidity for the transfer.
    InsufficientBridgeLiquidity,
    /// No positive exchange rate between differing assets.
    InvalidExchangeRate,
    /// An unexpected error occurred during processing.
    UnexpectedError,
}

impl Display for ErrorReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        write!(f, "{}", json.trim_matches('"'))
    }
}

/// Structured failure produced while verifying or settling a payment.
///
/// Every variant maps to exactly one [`ErrorReason`]; the human-readable
/// message goes to logs, the reason code goes on the wire.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Invalid request format: {0}")]
    InvalidFormat(String),
    #[error("Unsupported scheme")]
    UnsupportedScheme,
    #[error("Payment network does not match requirements network")]
    NetworkMismatch,
    #[error("Payment requirements lack EIP-712 domain name/version")]
    MissingEip712Domain,
    #[error("Reconstructed EIP-712 domain separator does not match the token contract")]
    DomainSeparatorMismatch,
    #[error("Invalid signature: {0}")]
    InvalidSignature(String),
    #[error("Authorization recipient does not match requirements payTo")]
    RecipientMismatch,
    #[error("Authorization expires too soon: {0}")]
    ValidBefore(String),
    #[error("Authorization not yet valid: {0}")]
    ValidAfter(String),
    #[error("Authorized value is below the required amount")]
    InsufficientValue,
    #[error("Onchain balance is not enough to cover the payment amount")]
    InsufficientFunds,
    #[error("Settlement transaction reverted")]
    InvalidTransactionState,
    #[error("Settlement transaction failed: {0}")]
    TransactionFailed(String),
    #[error("Cross-chain payment lacks a valid cross-chain extension")]
    MissingCrossChainExtension,
    #[error("Invalid destination payTo address")]
    InvalidDestinationPayTo,
    #[error("Bridge does not support chain pair {0} -> {1}")]
    UnsupportedChainPair(ChainId, ChainId),
    #[error("Source asset is not USDC on {0}")]
    UnsupportedSourceAsset(ChainId),
    #[error("Destination asset is not USDC on {0}")]
    UnsupportedDestinationAsset(ChainId),
    #[error("Requirements payTo must be the facilitator address on the source chain")]
    InvalidSourcePayTo,
    #[error("Insufficient bridge liquidity")]
    InsufficientBridgeLiquidity,
    #[error("No valid exchange rate between source and destination assets")]
    InvalidExchangeRate,
    #[error("Onchain interaction failed: {0}")]
    Onchain(String),
}

impl PaymentError {
    /// The stable wire reason for this failure.
    pub fn reason(&self) -> ErrorReason {
        match self {
            PaymentError::InvalidFormat(_) => ErrorReason::InvalidFormat,
            PaymentError::UnsupportedScheme => ErrorReason::UnsupportedScheme,
            PaymentError::NetworkMismatch => ErrorReason::NetworkMismatch,
            PaymentError::MissingEip712Domain => ErrorReason::MissingEip712Domain,
            PaymentError::DomainSeparatorMismatch => ErrorReason::DomainSeparatorMismatch,
            PaymentError::InvalidSignature(_) => ErrorReason::InvalidExactEvmPayloadSignature,
            PaymentError::RecipientMismatch => {
                ErrorReason::InvalidExactEvmPayloadRecipientMismatch
            }
            PaymentError::ValidBefore(_) => {
                ErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore
            }
            PaymentError::ValidAfter(_) => {
                ErrorReason::InvalidExactEvmPayloadAuthorizationValidAfter
            }
            PaymentError::InsufficientValue => {
                ErrorReason::InvalidExactEvmPayloadAuthorizationValue
            }
            PaymentError::InsufficientFunds => ErrorReason::InsufficientFunds,
            PaymentError::InvalidTransactionState => ErrorReason::InvalidTransactionState,
            PaymentError::TransactionFailed(_) => ErrorReason::TransactionFailed,
            PaymentError::MissingCrossChainExtension => ErrorReason::MissingCrossChainExtension,
            PaymentError::InvalidDestinationPayTo => ErrorReason::InvalidDestinationPayTo,
            PaymentError::UnsupportedChainPair(_, _) => ErrorReason::UnsupportedChainPair,
            PaymentError::UnsupportedSourceAsset(_) => ErrorReason::UnsupportedSourceAsset,
            PaymentError::UnsupportedDestinationAsset(_) => {
                ErrorReason::UnsupportedDestinationAsset
            }
            PaymentError::InvalidSourcePayTo => ErrorReason::InvalidSourcePayTo,
            PaymentError::InsufficientBridgeLiquidity => ErrorReason::InsufficientBridgeLiquidity,
            PaymentError::InvalidExchangeRate => ErrorReason::InvalidExchangeRate,
            PaymentError::Onchain(_) => ErrorReason::UnexpectedError,
        }
    }
}

impl From<serde_json::Error> for PaymentError {
    fn from(value: serde_json::Error) -> Self {
        Self::InvalidFormat(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reason_wire_strings() {
        assert_eq!(
            ErrorReason::InvalidExactEvmPayloadAuthorizationValidBefore.to_string(),
            "invalid_exact_evm_payload_authorization_valid_before"
        );
        assert_eq!(
            ErrorReason::InvalidSourcePayTo.to_string(),
            "invalid_source_pay_to"
        );
        assert_eq!(
            ErrorReason::InsufficientBridgeLiquidity.to_string(),
            "insufficient_bridge_liquidity"
        );
        assert_eq!(ErrorReason::UnsupportedScheme.to_string(), "unsupported_scheme");
    }

    #[test]
    fn x402_version_is_integer_one() {
        let json = serde_json::to_string(&X402Version).unwrap();
        assert_eq!(json, "1");
        assert!(serde_json::from_str::<X402Version>("2").is_err());
    }

    #[test]
    fn dispatch_key_from_raw() {
        let body = serde_json::json!({
            "paymentPayload": {"anything": true},
            "paymentRequirements": {
                "scheme": "exact",
                "network": "eip155:84532",
                "amount": "10000",
                "payTo": "0x0000000000000000000000000000000000000001",
                "maxTimeoutSeconds": 300,
                "asset": "0x0000000000000000000000000000000000000002",
                "extra": null
            }
        });
        let raw = RawVerifyRequest::from_value(&body).unwrap();
        let key = raw.dispatch_key().unwrap();
        assert_eq!(key.scheme, "exact");
        assert_eq!(key.network, ChainId::new("eip155", "84532"));
    }

    #[test]
    fn verify_response_shape() {
        let ok = VerifyResponse::valid("0xabc".into());
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["isValid"], true);
        assert_eq!(json["payer"], "0xabc");
        assert!(json.get("invalidReason").is_none());

        let bad = VerifyResponse::invalid(ErrorReason::InsufficientFunds);
        let json = serde_json::to_value(&bad).unwrap();
        assert_eq!(json["isValid"], false);
        assert_eq!(json["invalidReason"], "insufficient_funds");
    }
}
