//! The bridge capability interface.
//!
//! Abstracts the burn-and-mint USDC bridge so the worker and the cross-chain
//! validation logic never depend on a concrete bridge network.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;

use railbridge_types::chain::ChainId;

/// Outcome classification for bridge failures.
///
/// Drives the worker's retry decision: transient failures back off and
/// retry, fatal ones mark the job failed immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recoverability {
    Fatal,
    Transient,
}

/// Errors raised by a bridge provider.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The chain pair is outside the provider's coverage.
    #[error("bridge does not support {source_chain} -> {destination}")]
    UnsupportedRoute {
        source_chain: ChainId,
        destination: ChainId,
    },
    /// The bridging account cannot fund the burn.
    #[error("insufficient balance for bridging: {0}")]
    InsufficientBalance(String),
    /// The attestation service rejected the message outright.
    #[error("attestation failed: {0}")]
    AttestationRejected(String),
    /// The attestation did not arrive within the polling budget.
    #[error("attestation timed out after {0} attempts")]
    AttestationTimeout(u32),
    /// Network-level failure talking to a chain or the attestation API.
    #[error("bridge transport failure: {0}")]
    Transport(String),
    /// An on-chain burn or mint transaction failed.
    #[error("bridge transaction failed: {0}")]
    Onchain(String),
}

impl BridgeError {
    /// How the worker should react to this failure.
    pub fn recoverability(&self) -> Recoverability {
        match self {
            BridgeError::UnsupportedRoute { .. } => Recoverability::Fatal,
            BridgeError::InsufficientBalance(_) => Recoverability::Fatal,
            BridgeError::AttestationRejected(_) => Recoverability::Fatal,
            BridgeError::AttestationTimeout(_) => Recoverability::Transient,
            BridgeError::Transport(_) => Recoverability::Transient,
            // Message sniffing for the handful of retryable submission
            // failures; anything unrecognized retries and exhausts the
            // attempt budget rather than failing on first sight.
            BridgeError::Onchain(message) => {
                let message = message.to_ascii_lowercase();
                if message.contains("insufficient balance") || message.contains("insufficient funds")
                {
                    Recoverability::Fatal
                } else {
                    Recoverability::Transient
                }
            }
        }
    }
}

/// Result of a bridge submission.
#[derive(Debug, Clone)]
pub struct BridgeResult {
    /// Source-chain burn transaction hash.
    pub bridge_tx_hash: String,
    /// Destination-chain mint transaction hash. May be absent when the mint
    /// was not yet confirmed when the call returned; the worker reconciles
    /// asynchronously.
    pub destination_tx_hash: Option<String>,
    /// Bridge-level message identifier, when the protocol exposes one.
    pub message_id: Option<String>,
    pub source_chain: ChainId,
    pub destination_chain: ChainId,
}

/// Capability interface over a burn-and-mint USDC bridge.
#[async_trait]
pub trait BridgeProvider: Send + Sync {
    /// Whether the provider can operate on `network` at all.
    fn supports_chain(&self, network: &ChainId) -> bool;

    /// Whether `asset` is USDC on `network`, per the strict allowlist.
    fn is_usdc(&self, network: &ChainId, asset: &Address) -> bool;

    /// Whether `amount` can currently be moved from `source` to
    /// `destination`.
    async fn check_liquidity(
        &self,
        source: &ChainId,
        destination: &ChainId,
        asset: &Address,
        amount: U256,
    ) -> Result<bool, BridgeError>;

    /// Exchange rate between the two assets; 1.0 for USDC to USDC via
    /// burn-and-mint.
    async fn get_exchange_rate(
        &self,
        source: &ChainId,
        destination: &ChainId,
        source_asset: &Address,
        destination_asset: &Address,
    ) -> Result<f64, BridgeError>;

    /// Moves `amount` of USDC to `recipient` on the destination chain,
    /// consuming funds the facilitator holds on the source chain.
    async fn bridge(
        &self,
        source: &ChainId,
        source_tx_hash: &str,
        destination: &ChainId,
        destination_asset: &Address,
        amount: U256,
        recipient: &Address,
    ) -> Result<BridgeResult, BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recoverability_classification() {
        let fatal = BridgeError::InsufficientBalance("0 available".into());
        assert_eq!(fatal.recoverability(), Recoverability::Fatal);

        let rejected = BridgeError::AttestationRejected("bad message".into());
        assert_eq!(rejected.recoverability(), Recoverability::Fatal);

        let transport = BridgeError::Transport("failed to fetch".into());
        assert_eq!(transport.recoverability(), Recoverability::Transient);

        let timeout = BridgeError::AttestationTimeout(30);
        assert_eq!(timeout.recoverability(), Recoverability::Transient);

        let nonce = BridgeError::Onchain("nonce too low".into());
        assert_eq!(nonce.recoverability(), Recoverability::Transient);

        let broke = BridgeError::Onchain("Insufficient balance to burn".into());
        assert_eq!(broke.recoverability(), Recoverability::Fatal);
    }
}
