//! The `cross-chain` payment extension.
//!
//! A merchant that wants to receive funds on a different chain than the one
//! the buyer pays on declares this extension inside its payment requirements.
//! The buyer copies the declaration into the payment payload, and the
//! facilitator extracts it to drive bridging after source-chain settlement.
//!
//! Absence of the extension means "same-chain payment"; extraction is
//! deliberately lenient and returns `None` for anything that is not a
//! complete, lexically valid declaration.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::chain::ChainId;
use crate::proto::{Extensions, PaymentPayload};

/// Extension key under which cross-chain routing directives travel.
pub const CROSS_CHAIN_EXTENSION_KEY: &str = "cross-chain";

static EVM_CHAIN_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^eip155:\d+$").expect("Invalid chain regex"));
static EVM_ADDRESS_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("Invalid address regex"));

/// Routing directives for a cross-chain payment.
///
/// All three fields are mandatory when the extension is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainInfo {
    /// CAIP-2 id of the chain the merchant receives on.
    pub destination_network: ChainId,
    /// Token contract address on the destination chain.
    pub destination_asset: String,
    /// The merchant's recipient address on the destination chain.
    pub destination_pay_to: String,
}

impl CrossChainInfo {
    /// Whether every field satisfies its lexical constraint:
    /// `^eip155:\d+$` for the network, `^0x[0-9a-fA-F]{40}$` for addresses.
    pub fn is_well_formed(&self) -> bool {
        EVM_CHAIN_REGEX.is_match(&self.destination_network.to_string())
            && EVM_ADDRESS_REGEX.is_match(&self.destination_asset)
            && EVM_ADDRESS_REGEX.is_match(&self.destination_pay_to)
    }
}

/// A declared extension: the routing data plus a JSON-schema describing its
/// shape, as published to buyers through payment requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossChainExtension {
    pub info: CrossChainInfo,
    pub schema: serde_json::Value,
}

/// Builds the merchant-side declaration for a cross-chain route.
pub fn declare_cross_chain_extension(info: CrossChainInfo) -> CrossChainExtension {
    let schema = serde_json::json!({
        "type": "object",
        "properties": {
            "destinationNetwork": { "type": "string", "pattern": "^eip155:\\d+$" },
            "destinationAsset": { "type": "string", "pattern": "^0x[0-9a-fA-F]{40}$" },
            "destinationPayTo": { "type": "string", "pattern": "^0x[0-9a-fA-F]{40}$" },
        },
        "required": ["destinationNetwork", "destinationAsset", "destinationPayTo"],
    });
    CrossChainExtension { info, schema }
}

/// Extracts cross-chain routing info from a payment payload.
///
/// Returns the info only if the extension is present, complete, and
/// syntactically valid. It is the caller's responsibility to treat `None`
/// as "same-chain payment".
pub fn extract_cross_chain_info<TRequirements, TPayload>(
    payload: &PaymentPayload<TRequirements, TPayload>,
) -> Option<CrossChainInfo> {
    extract_from_extensions(&payload.extensions)
}

/// Validation outcome for a declared cross-chain extension.
///
/// Used by the cross-chain router, which must distinguish a missing or
/// malformed declaration from one whose destination recipient specifically
/// is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionError {
    /// No complete, valid cross-chain declaration is present.
    Missing,
    /// The declaration is complete but `destinationPayTo` is not an EVM
    /// address.
    InvalidDestinationPayTo,
}

/// Strict extraction for the cross-chain scheme, where absence is an error.
pub fn require_cross_chain_info(extensions: &Extensions) -> Result<CrossChainInfo, ExtensionError> {
    let value = extensions
        .get(CROSS_CHAIN_EXTENSION_KEY)
        .ok_or(ExtensionError::Missing)?;
    let wire = match serde_json::from_value::<CrossChainExtension>(value.clone()) {
        Ok(extension) => CrossChainInfoWire {
            destination_network: extension.info.destination_network.to_string(),
            destination_asset: extension.info.destination_asset,
            destination_pay_to: extension.info.destination_pay_to,
        },
        Err(_) => serde_json::from_value::<CrossChainInfoWire>(value.clone())
            .map_err(|_| ExtensionError::Missing)?,
    };
    if !EVM_CHAIN_REGEX.is_match(&wire.destination_network)
        || !EVM_ADDRESS_REGEX.is_match(&wire.destination_asset)
    {
        return Err(ExtensionError::Missing);
    }
    if !EVM_ADDRESS_REGEX.is_match(&wire.destination_pay_to) {
        return Err(ExtensionError::InvalidDestinationPayTo);
    }
    let info: CrossChainInfo = wire.try_into().map_err(|_| ExtensionError::Missing)?;
    Ok(info)
}

/// Extension extraction over a bare extensions map.
pub fn extract_from_extensions(extensions: &Extensions) -> Option<CrossChainInfo> {
    let value = extensions.get(CROSS_CHAIN_EXTENSION_KEY)?;
    // Accept both the full declaration and the bare info object.
    let info = match serde_json::from_value::<CrossChainExtension>(value.clone()) {
        Ok(extension) => extension.info,
        Err(_) => serde_json::from_value::<CrossChainInfoWire>(value.clone())
            .ok()?
            .try_into()
            .ok()?,
    };
    info.is_well_formed().then_some(info)
}

/// Wire-side shape with unvalidated strings, so a malformed network string
/// yields `None` instead of a deserialization error bubbling up.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CrossChainInfoWire {
    destination_network: String,
    destination_asset: String,
    destination_pay_to: String,
}

impl TryFrom<CrossChainInfoWire> for CrossChainInfo {
    type Error = ();

    fn try_from(wire: CrossChainInfoWire) -> Result<Self, Self::Error> {
        let destination_network = ChainId::from_str(&wire.destination_network).map_err(|_| ())?;
        Ok(CrossChainInfo {
            destination_network,
            destination_asset: wire.destination_asset,
            destination_pay_to: wire.destination_pay_to,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{PaymentRequirements, X402Version};

    fn info() -> CrossChainInfo {
        CrossChainInfo {
            destination_network: ChainId::new("eip155", "11155111"),
            destination_asset: "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238".into(),
            destination_pay_to: "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".into(),
        }
    }

    fn payload_with(extensions: Extensions) -> PaymentPayload<PaymentRequirements, serde_json::Value> {
        PaymentPayload {
            x402_version: X402Version,
            accepted: PaymentRequirements {
                scheme: "cross-chain".into(),
                network: ChainId::new("eip155", "84532"),
                amount: "10000".into(),
                pay_to: "0x0000000000000000000000000000000000000001".into(),
                max_timeout_seconds: 300,
                asset: "0x0000000000000000000000000000000000000002".into(),
                extra: None,
                extensions: extensions.clone(),
            },
            payload: serde_json::json!({}),
            extensions,
        }
    }

    #[test]
    fn declare_then_extract_round_trips() {
        let declared = declare_cross_chain_extension(info());
        let mut extensions = Extensions::new();
        extensions.insert(
            CROSS_CHAIN_EXTENSION_KEY.into(),
            serde_json::to_value(&declared).unwrap(),
        );
        let payload = payload_with(extensions);
        let extracted = extract_cross_chain_info(&payload).unwrap();
        assert_eq!(extracted, info());
    }

    #[test]
    fn extracts_bare_info_object() {
        let mut extensions = Extensions::new();
        extensions.insert(
            CROSS_CHAIN_EXTENSION_KEY.into(),
            serde_json::to_value(info()).unwrap(),
        );
        let payload = payload_with(extensions);
        assert_eq!(extract_cross_chain_info(&payload), Some(info()));
    }

    #[test]
    fn absent_extension_is_none() {
        let payload = payload_with(Extensions::new());
        assert_eq!(extract_cross_chain_info(&payload), None);
    }

    #[test]
    fn rejects_missing_field() {
        let mut extensions = Extensions::new();
        extensions.insert(
            CROSS_CHAIN_EXTENSION_KEY.into(),
            serde_json::json!({
                "destinationNetwork": "eip155:11155111",
                "destinationAsset": "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238",
            }),
        );
        let payload = payload_with(extensions);
        assert_eq!(extract_cross_chain_info(&payload), None);
    }

    #[test]
    fn rejects_non_evm_network() {
        let mut bad = info();
        bad.destination_network = ChainId::new("solana", "mainnet");
        let mut extensions = Extensions::new();
        extensions.insert(
            CROSS_CHAIN_EXTENSION_KEY.into(),
            serde_json::to_value(&bad).unwrap(),
        );
        let payload = payload_with(extensions);
        assert_eq!(extract_cross_chain_info(&payload), None);
    }

    #[test]
    fn strict_extraction_distinguishes_bad_recipient() {
        let mut extensions = Extensions::new();
        assert_eq!(
            require_cross_chain_info(&extensions),
            Err(ExtensionError::Missing)
        );

        let mut bad_pay_to = info();
        bad_pay_to.destination_pay_to = "not-an-address".into();
        extensions.insert(
            CROSS_CHAIN_EXTENSION_KEY.into(),
            serde_json::to_value(&bad_pay_to).unwrap(),
        );
        assert_eq!(
            require_cross_chain_info(&extensions),
            Err(ExtensionError::InvalidDestinationPayTo)
        );

        extensions.insert(
            CROSS_CHAIN_EXTENSION_KEY.into(),
            serde_json::to_value(info()).unwrap(),
        );
        assert_eq!(require_cross_chain_info(&extensions), Ok(info()));
    }

    #[test]
    fn rejects_malformed_address() {
        let mut bad = info();
        bad.destination_pay_to = "0x1234".into();
        let mut extensions = Extensions::new();
        extensions.insert(
            CROSS_CHAIN_EXTENSION_KEY.into(),
            serde_json::to_value(&bad).unwrap(),
        );
        let payload = payload_with(extensions);
        assert_eq!(extract_cross_chain_info(&payload), None);
    }
}
