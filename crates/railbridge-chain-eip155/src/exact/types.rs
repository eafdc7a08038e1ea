//! Type definitions for the `exact` payment scheme on EVM chains.
//!
//! The wire shapes instantiate the generic protocol types from
//! `railbridge-types` with EVM-flavored field types.

use alloy_primitives::{Address, B256, Bytes};
use alloy_sol_types::sol;
use serde::{Deserialize, Serialize};

use railbridge_types::lit_str;
use railbridge_types::proto;
use railbridge_types::timestamp::UnixTimestamp;

use crate::chain::{ChecksummedAddress, TokenAmount};

lit_str!(ExactScheme, "exact");

/// Type alias for verify requests using the exact EVM payment scheme.
pub type VerifyRequest = proto::VerifyRequest<PaymentPayload, PaymentRequirements>;

/// Type alias for settle requests (same structure as verify requests).
pub type SettleRequest = VerifyRequest;

/// Payment payload with embedded accepted requirements and EVM payload.
pub type PaymentPayload = proto::PaymentPayload<PaymentRequirements, ExactEvmPayload>;

/// Payment requirements with EVM-specific field types.
pub type PaymentRequirements =
    proto::PaymentRequirements<ExactScheme, TokenAmount, ChecksummedAddress, Option<ExactExtra>>;

/// EIP-712 domain hints carried in `requirements.extra`.
///
/// `name` and `version` are mandatory for the exact scheme; the optional
/// [`DomainHints`] override how the domain is assembled for tokens that
/// deviate from the canonical four-field layout.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactExtra {
    /// The token name as used in the EIP-712 domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// The token version as used in the EIP-712 domain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Optional explicit domain layout override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<DomainHints>,
}

/// Explicit control over which EIP-712 domain fields a token uses.
///
/// `fields` is a bitmask: 0x01 name, 0x02 version, 0x04 chainId,
/// 0x08 verifyingContract, 0x10 salt.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainHints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<B256>,
}

/// Full payload required to authorize an ERC-3009 transfer.
///
/// Contains both the EIP-712 signature and the structured authorization data
/// that was signed. Together they provide everything needed to execute a
/// `transferWithAuthorization` call on an EIP-3009 compliant token.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayload {
    /// The cryptographic signature authorizing the transfer.
    ///
    /// This can be:
    /// - an EOA signature (65 bytes, split into r, s, v components),
    /// - an ERC-1271 signature (arbitrary length, validated by contract),
    /// - an EIP-6492 signature (wrapped with deployment data and magic suffix).
    pub signature: Bytes,

    /// The structured authorization data that was signed.
    pub authorization: ExactEvmPayloadAuthorization,
}

/// EIP-712 structured data for ERC-3009 transfer authorization.
///
/// Defines who can transfer tokens, to whom, how much, and during what time
/// window. The `nonce` is a fresh 32-byte random value, not an account
/// nonce; the token contract rejects replays of it.
#[derive(Debug, Copy, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExactEvmPayloadAuthorization {
    /// The address authorizing the transfer (token owner).
    pub from: Address,

    /// The recipient address for the transfer.
    pub to: Address,

    /// The amount of tokens to transfer, in atomic units.
    pub value: TokenAmount,

    /// The authorization is not valid before this timestamp (inclusive).
    pub valid_after: UnixTimestamp,

    /// The authorization expires at this timestamp (exclusive).
    pub valid_before: UnixTimestamp,

    /// A unique 32-byte nonce to prevent replay attacks.
    pub nonce: B256,
}

sol!(
    /// Solidity-compatible struct definition for ERC-3009
    /// `transferWithAuthorization`.
    ///
    /// This matches the EIP-3009 format used in EIP-712 typed data and is
    /// used to reconstruct the typed data message when verifying a client's
    /// signature.
    #[derive(Serialize, Deserialize)]
    struct TransferWithAuthorization {
        address from;
        address to;
        uint256 value;
        uint256 validAfter;
        uint256 validBefore;
        bytes32 nonce;
    }
);

sol! {
    /// The EIP-3009 surface of the token contracts this facilitator settles
    /// against, plus the reads used during verification.
    ///
    /// Two `transferWithAuthorization` overloads exist in the wild: the
    /// standard `(v, r, s)` split form for EOA signatures, and a `bytes`
    /// form accepting arbitrary signature blobs for contract wallets.
    #[allow(missing_docs)]
    #[allow(clippy::too_many_arguments)]
    #[derive(Debug)]
    #[sol(rpc)]
    interface IEIP3009 {
        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            uint8 v,
            bytes32 r,
            bytes32 s
        ) external;

        function transferWithAuthorization(
            address from,
            address to,
            uint256 value,
            uint256 validAfter,
            uint256 validBefore,
            bytes32 nonce,
            bytes signature
        ) external;

        function balanceOf(address account) external view returns (uint256);
        function authorizationState(address authorizer, bytes32 nonce) external view returns (bool);
        function DOMAIN_SEPARATOR() external view returns (bytes32);
        function name() external view returns (string);
        function version() external view returns (string);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_parses_wire_shape() {
        let json = serde_json::json!({
            "signature": "0x00112233",
            "authorization": {
                "from": "0x857b06519E91e3A54538791bDbb0E22373e36b66",
                "to": "0x209693Bc6afc0C5328bA36FaF03C514EF312287C",
                "value": "10000",
                "validAfter": "1740672089",
                "validBefore": "1740672154",
                "nonce": "0xf3746613c2d920b5fdabc0856f2aeb2d4f88ee6037b8cc5d04a71a4462f13480"
            }
        });
        let payload: ExactEvmPayload = serde_json::from_value(json).unwrap();
        assert_eq!(payload.authorization.value, TokenAmount::from(10000u64));
        assert_eq!(payload.authorization.valid_after.as_secs(), 1740672089);
    }

    #[test]
    fn extra_domain_hints_parse() {
        let json = serde_json::json!({
            "name": "USDC",
            "version": "2",
            "domain": { "fields": 15, "chainId": 84532 }
        });
        let extra: ExactExtra = serde_json::from_value(json).unwrap();
        let hints = extra.domain.unwrap();
        assert_eq!(hints.fields, Some(0x0f));
        assert_eq!(hints.chain_id, Some(84532));
        assert!(hints.salt.is_none());
    }

    #[test]
    fn scheme_literal_is_enforced() {
        assert!(serde_json::from_str::<ExactScheme>("\"exact\"").is_ok());
        assert!(serde_json::from_str::<ExactScheme>("\"upto\"").is_err());
    }
}
