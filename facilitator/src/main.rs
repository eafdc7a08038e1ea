//! RailBridge facilitator HTTP entrypoint.
//!
//! This binary launches an Axum-based HTTP server exposing the payment
//! protocol interface for verification and settlement on EVM chains, plus
//! asynchronous cross-chain bridging of settled USDC payments.
//!
//! Endpoints:
//! - `POST /verify` – Verify a payment payload against requirements
//! - `POST /settle` – Settle an accepted payment payload on-chain
//! - `GET /supported` – List supported payment kinds and extensions
//! - `GET /health` – Liveness signal
//! - `GET /bridge-status/{id}` – Inspect a bridge job
//! - `POST /bridge-status/{id}/cancel` – Cancel a pending bridge job
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control the binding address
//! - `EVM_PRIVATE_KEY` and friends; see the `config` module

mod config;
mod facilitator_local;
mod handlers;
mod hooks;
mod router;
mod run;
mod util;

use std::process;

use crate::run::run;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(1)
    }
}
