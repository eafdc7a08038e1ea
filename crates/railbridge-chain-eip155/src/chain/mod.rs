//! Per-network RPC facade for EVM chains.
//!
//! One [`Eip155ChainProvider`] exists per configured CAIP-2 network. It wraps
//! a composed Alloy provider (gas, blob-gas, nonce, chain-id fillers plus a
//! signing wallet) and exposes the handful of operations the facilitator
//! needs: reads through typed contract instances, transaction submission with
//! receipt tracking, and signer metadata.

mod nonce;
mod provider;
mod types;

pub use nonce::PendingNonceManager;
pub use provider::{ChainError, Eip155ChainProvider, InnerProvider, MetaTransaction};
pub use types::{ChecksummedAddress, EIP155_NAMESPACE, Eip155ChainReference, TokenAmount};
