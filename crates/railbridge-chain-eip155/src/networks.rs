//! Static registry of known EVM networks and their USDC deployments.
//!
//! The facilitator operates on CAIP-2 chain ids; this table maps them to the
//! environment variables that configure per-chain RPC endpoints, to the
//! canonical USDC deployment used by the cross-chain allowlist, and to the
//! EIP-712 `name`/`version` the deployment signs under.

use alloy_primitives::{Address, address};

use railbridge_types::chain::ChainId;

use crate::chain::Eip155ChainReference;

/// A known EVM network and its USDC deployment.
#[derive(Debug, Clone, Copy)]
pub struct KnownNetwork {
    /// Numeric EIP-155 chain id.
    pub chain: Eip155ChainReference,
    /// Human-readable name, used for log context only.
    pub name: &'static str,
    /// Environment variable holding this chain's RPC endpoint.
    pub env_rpc: &'static str,
    /// Whether the chain supports EIP-1559 gas pricing.
    pub eip1559: bool,
    /// Canonical USDC contract address on this chain.
    pub usdc: Address,
    /// EIP-712 domain name of the USDC deployment.
    pub usdc_eip712_name: &'static str,
    /// EIP-712 domain version of the USDC deployment.
    pub usdc_eip712_version: &'static str,
}

/// All networks this facilitator knows how to settle and bridge on.
pub const KNOWN_NETWORKS: &[KnownNetwork] = &[
    KnownNetwork {
        chain: Eip155ChainReference::new(1),
        name: "ethereum",
        env_rpc: "RPC_URL_ETHEREUM",
        eip1559: true,
        usdc: address!("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
        usdc_eip712_name: "USD Coin",
        usdc_eip712_version: "2",
    },
    KnownNetwork {
        chain: Eip155ChainReference::new(11155111),
        name: "sepolia",
        env_rpc: "RPC_URL_SEPOLIA",
        eip1559: true,
        usdc: address!("0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238"),
        usdc_eip712_name: "USDC",
        usdc_eip712_version: "2",
    },
    KnownNetwork {
        chain: Eip155ChainReference::new(8453),
        name: "base",
        env_rpc: "RPC_URL_BASE",
        eip1559: true,
        usdc: address!("0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913"),
        usdc_eip712_name: "USD Coin",
        usdc_eip712_version: "2",
    },
    KnownNetwork {
        chain: Eip155ChainReference::new(84532),
        name: "base-sepolia",
        env_rpc: "RPC_URL_BASE_SEPOLIA",
        eip1559: true,
        usdc: address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e"),
        usdc_eip712_name: "USDC",
        usdc_eip712_version: "2",
    },
    KnownNetwork {
        chain: Eip155ChainReference::new(137),
        name: "polygon",
        env_rpc: "RPC_URL_POLYGON",
        eip1559: true,
        usdc: address!("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"),
        usdc_eip712_name: "USD Coin",
        usdc_eip712_version: "2",
    },
    KnownNetwork {
        chain: Eip155ChainReference::new(80002),
        name: "polygon-amoy",
        env_rpc: "RPC_URL_POLYGON_AMOY",
        eip1559: true,
        usdc: address!("0x41E94Eb019C0762f9Bfcf9Fb1E58725BfB0e7582"),
        usdc_eip712_name: "USDC",
        usdc_eip712_version: "2",
    },
    KnownNetwork {
        chain: Eip155ChainReference::new(42161),
        name: "arbitrum",
        env_rpc: "RPC_URL_ARBITRUM",
        eip1559: true,
        usdc: address!("0xaf88d065e77c8cC2239327C5EDb3A432268e5831"),
        usdc_eip712_name: "USD Coin",
        usdc_eip712_version: "2",
    },
    KnownNetwork {
        chain: Eip155ChainReference::new(421614),
        name: "arbitrum-sepolia",
        env_rpc: "RPC_URL_ARBITRUM_SEPOLIA",
        eip1559: true,
        usdc: address!("0x75faf114eafb1BDbe2F0316DF893fd58CE46AA4d"),
        usdc_eip712_name: "USDC",
        usdc_eip712_version: "2",
    },
];

/// Looks up a known network by CAIP-2 chain id.
pub fn by_chain_id(chain_id: &ChainId) -> Option<&'static KnownNetwork> {
    let reference = Eip155ChainReference::try_from(chain_id).ok()?;
    KNOWN_NETWORKS.iter().find(|n| n.chain == reference)
}

/// Whether `asset` is the canonical USDC deployment on `chain_id`.
pub fn is_usdc(chain_id: &ChainId, asset: &Address) -> bool {
    by_chain_id(chain_id).is_some_and(|n| n.usdc == *asset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_chain_id() {
        let base_sepolia = ChainId::new("eip155", "84532");
        let network = by_chain_id(&base_sepolia).unwrap();
        assert_eq!(network.name, "base-sepolia");
        assert_eq!(network.env_rpc, "RPC_URL_BASE_SEPOLIA");
    }

    #[test]
    fn unknown_chain_is_none() {
        assert!(by_chain_id(&ChainId::new("eip155", "999999")).is_none());
        assert!(by_chain_id(&ChainId::new("solana", "mainnet")).is_none());
    }

    #[test]
    fn usdc_allowlist_is_strict() {
        let base_sepolia = ChainId::new("eip155", "84532");
        let usdc = address!("0x036CbD53842c5426634e7929541eC2318f3dCF7e");
        let other = address!("0x00000000000000000000000000000000000000aa");
        assert!(is_usdc(&base_sepolia, &usdc));
        assert!(!is_usdc(&base_sepolia, &other));
        // The same token address on a different chain is not USDC there.
        assert!(!is_usdc(&ChainId::new("eip155", "8453"), &usdc));
    }
}
