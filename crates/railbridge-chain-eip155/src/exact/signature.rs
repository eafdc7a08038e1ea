//! Structured signature handling for the exact scheme.
//!
//! Three signature families reach the facilitator:
//!
//! - plain 65-byte ECDSA signatures from EOAs,
//! - ERC-1271 contract signatures of arbitrary length,
//! - EIP-6492 wrappers around either, carrying the factory call that deploys
//!   a counterfactual smart wallet.
//!
//! The wrapper is detected by its fixed 32-byte magic suffix; the preceding
//! bytes ABI-decode as `(address factory, bytes factoryCalldata, bytes innerSig)`.

use alloy_primitives::{Address, Bytes, Signature, b256};
use alloy_sol_types::{SolValue, sol};

use railbridge_types::proto::PaymentError;

/// The fixed 32-byte magic suffix defined by
/// [EIP-6492](https://eips.ethereum.org/EIPS/eip-6492).
pub const EIP6492_MAGIC_SUFFIX: [u8; 32] =
    b256!("6492649264926492649264926492649264926492649264926492649264926492").0;

sol! {
    /// Solidity-compatible struct for decoding the prefix of an EIP-6492
    /// signature: `(address factory, bytes factoryCalldata, bytes innerSig)`.
    #[derive(Debug)]
    struct Sig6492 {
        address factory;
        bytes   factoryCalldata;
        bytes   innerSig;
    }
}

/// A structured representation of a payment signature.
#[derive(Debug, Clone)]
pub enum StructuredSignature {
    /// A plain 65-byte ECDSA signature from an externally owned account.
    Ecdsa(Signature),
    /// An ERC-1271 contract signature, validated by the signer contract.
    Contract(Bytes),
    /// An EIP-6492 wrapped signature for a counterfactual contract wallet.
    Eip6492 {
        /// Factory contract that can deploy the wallet deterministically.
        factory: Address,
        /// Calldata to invoke on the factory (typically a CREATE2 deploy).
        factory_calldata: Bytes,
        /// Inner signature for the wallet itself, usually ERC-1271.
        inner: Bytes,
        /// Full original bytes including the wrapper and magic suffix.
        original: Bytes,
    },
}

impl StructuredSignature {
    /// The signature bytes to hand to `transferWithAuthorization`: the inner
    /// signature for 6492 wrappers, the raw bytes otherwise.
    pub fn transfer_signature(&self) -> Bytes {
        match self {
            StructuredSignature::Ecdsa(signature) => signature.as_bytes().to_vec().into(),
            StructuredSignature::Contract(bytes) => bytes.clone(),
            StructuredSignature::Eip6492 { inner, .. } => inner.clone(),
        }
    }
}

impl TryFrom<&Bytes> for StructuredSignature {
    type Error = PaymentError;

    /// Parses raw signature bytes into a [`StructuredSignature`].
    ///
    /// Rules:
    /// - bytes ending in [`EIP6492_MAGIC_SUFFIX`] decode as a [`Sig6492`]
    ///   wrapper,
    /// - exactly 65 bytes parse as an ECDSA signature,
    /// - anything else is treated as an ERC-1271 contract signature.
    fn try_from(bytes: &Bytes) -> Result<Self, Self::Error> {
        let is_eip6492 = bytes.len() >= 32 && bytes[bytes.len() - 32..] == EIP6492_MAGIC_SUFFIX;
        if is_eip6492 {
            let body = &bytes[..bytes.len() - 32];
            let sig6492 = Sig6492::abi_decode_params(body).map_err(|e| {
                PaymentError::InvalidSignature(format!("Failed to decode EIP6492 signature: {e}"))
            })?;
            return Ok(StructuredSignature::Eip6492 {
                factory: sig6492.factory,
                factory_calldata: sig6492.factoryCalldata,
                inner: sig6492.innerSig,
                original: bytes.clone(),
            });
        }
        if bytes.len() == 65 {
            let signature = Signature::from_raw(bytes.as_ref())
                .map_err(|e| PaymentError::InvalidSignature(e.to_string()))?;
            return Ok(StructuredSignature::Ecdsa(signature));
        }
        Ok(StructuredSignature::Contract(bytes.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn parses_eoa_signature() {
        let bytes = Bytes::from(vec![0x11u8; 65]);
        let parsed = StructuredSignature::try_from(&bytes).unwrap();
        assert!(matches!(parsed, StructuredSignature::Ecdsa(_)));
    }

    #[test]
    fn parses_contract_signature() {
        let bytes = Bytes::from(vec![0x22u8; 96]);
        let parsed = StructuredSignature::try_from(&bytes).unwrap();
        match parsed {
            StructuredSignature::Contract(inner) => assert_eq!(inner, bytes),
            other => panic!("expected contract signature, got {other:?}"),
        }
    }

    #[test]
    fn parses_eip6492_wrapper() {
        let factory = address!("0x00000000000000000000000000000000000000aa");
        let wrapper = Sig6492 {
            factory,
            factoryCalldata: Bytes::from(vec![0xde, 0xad]),
            innerSig: Bytes::from(vec![0x33u8; 65]),
        };
        let mut encoded = wrapper.abi_encode_params();
        encoded.extend_from_slice(&EIP6492_MAGIC_SUFFIX);
        let bytes = Bytes::from(encoded);

        let parsed = StructuredSignature::try_from(&bytes).unwrap();
        match parsed {
            StructuredSignature::Eip6492 {
                factory: parsed_factory,
                factory_calldata,
                inner,
                original,
            } => {
                assert_eq!(parsed_factory, factory);
                assert_eq!(factory_calldata, Bytes::from(vec![0xde, 0xad]));
                assert_eq!(inner.len(), 65);
                assert_eq!(original, bytes);
            }
            other => panic!("expected 6492 signature, got {other:?}"),
        }
    }

    #[test]
    fn malformed_wrapper_is_rejected() {
        let mut bytes = vec![0x00u8; 8];
        bytes.extend_from_slice(&EIP6492_MAGIC_SUFFIX);
        let bytes = Bytes::from(bytes);
        assert!(StructuredSignature::try_from(&bytes).is_err());
    }
}
