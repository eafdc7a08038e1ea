//! Durable burn-and-mint USDC bridging.
//!
//! After a cross-chain payment settles on the source chain, the funds sit at
//! the facilitator's address there. This crate moves the equivalent value to
//! the merchant on the destination chain:
//!
//! - [`provider`] - the [`provider::BridgeProvider`] capability interface
//! - [`cctp`] - the shipped burn-and-mint implementation (Circle CCTP style:
//!   burn on the source token messenger, attest, mint on the destination
//!   transmitter)
//! - [`job`] - the durable [`job::BridgeJob`] unit of work, keyed by an
//!   idempotency key `source:sourceTx:dest`
//! - [`store`] - the [`store::BridgeJobStore`] trait plus the SQLite-backed
//!   implementation
//! - [`worker`] - the background executor: retries, recovery after restart,
//!   single-flight per idempotency key
//! - [`events`] - structured audit events for every bridge lifecycle
//!   transition

pub mod cctp;
pub mod events;
pub mod job;
pub mod provider;
pub mod store;
pub mod worker;

pub use job::{BridgeJob, BridgeJobStatus};
pub use provider::{BridgeError, BridgeProvider, BridgeResult, Recoverability};
pub use store::{BridgeJobStore, SqliteJobStore, StoreError};
pub use worker::{BridgeEnqueuer, BridgeRequest, BridgeWorker, BridgeWorkerConfig};
