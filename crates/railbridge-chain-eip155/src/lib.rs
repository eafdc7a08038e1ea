//! EIP-155 (EVM) chain support for the RailBridge payment facilitator.
//!
//! This crate owns everything that talks to an EVM chain:
//!
//! - [`chain`] - the per-network RPC facade ([`chain::Eip155ChainProvider`]),
//!   pending-aware nonce management, and EVM-flavored wire types
//! - [`exact`] - the `exact` payment scheme: verification and settlement of
//!   EIP-3009 `TransferWithAuthorization` payloads, EIP-712 domain
//!   reconstruction, and structured signature handling (EOA, ERC-1271,
//!   EIP-6492)
//! - [`networks`] - static registry of known EVM networks and their USDC
//!   deployments

pub mod chain;
pub mod exact;
pub mod networks;

pub use chain::{Eip155ChainProvider, Eip155ChainReference};
pub use exact::ExactEvmFacilitator;
