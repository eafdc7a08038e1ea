//! Core types for the RailBridge payment protocol.
//!
//! This crate provides the foundational types shared by the facilitator, the
//! chain-specific scheme implementations, and the bridge subsystem. It is
//! deliberately blockchain-agnostic: chain-specific payload types are
//! instantiated by the chain crates through the generic wire structs defined
//! in [`proto`].
//!
//! # Overview
//!
//! The protocol enables payments over HTTP by leveraging the 402 Payment
//! Required status code. A merchant responds with payment requirements, the
//! buyer signs a token-transfer authorization, and the facilitator verifies
//! and settles it on-chain. For cross-chain payments the buyer pays on one
//! EVM chain and the merchant receives the equivalent value on another, via
//! a burn-and-mint USDC bridge driven by the facilitator.
//!
//! # Modules
//!
//! - [`chain`] - CAIP-2 chain identifiers and provider abstractions
//! - [`extension`] - The `cross-chain` payment extension (declare/extract)
//! - [`facilitator`] - Core trait for payment verification and settlement
//! - [`proto`] - Wire format types for protocol messages
//! - [`scheme`] - Scheme handler trait and registry
//! - [`timestamp`] - Unix timestamp utilities for authorization windows

pub mod chain;
pub mod extension;
pub mod facilitator;
pub mod proto;
pub mod scheme;
pub mod timestamp;
mod util;
