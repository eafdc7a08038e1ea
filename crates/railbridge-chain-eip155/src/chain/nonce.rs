//! Pending-aware nonce management, one instance per (chain, signer wallet).
//!
//! Both the payment-settlement path and the bridge-burn path submit through
//! the same provider and therefore through the same manager whenever they
//! share a signer; this is what prevents nonce races between them.

use alloy_primitives::Address;
use async_trait::async_trait;
use alloy_provider::Provider;
use alloy_provider::fillers::NonceManager;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A nonce manager that reconciles its local cache with the chain's
/// `pending` transaction count on every allocation.
///
/// # How it works
///
/// - Each allocation queries `eth_getTransactionCount(address, "pending")`
///   and issues `max(cached + 1, pending)` inside the per-address critical
///   section. Including mempool transactions prevents "nonce too low" errors
///   after a restart while transactions are still pending; taking the max
///   with the local cache prevents gaps when several transactions are in
///   flight from this process and the RPC node has not seen them all yet.
/// - [`PendingNonceManager::reset_nonce`] drops the cached value so the next
///   allocation starts from the chain again; callers invoke it after any
///   submission or receipt failure.
///
/// # Thread safety
///
/// The cache is shared across clones via `Arc<DashMap>`; each address's
/// nonce is guarded by its own `Mutex`, serializing allocation per signer
/// while leaving distinct signers concurrent.
#[derive(Clone, Debug, Default)]
pub struct PendingNonceManager {
    nonces: Arc<DashMap<Address, Arc<Mutex<Option<u64>>>>>,
}

impl PendingNonceManager {
    /// Forgets the cached nonce for `address`, forcing a fresh `pending`
    /// query on the next allocation.
    pub async fn reset_nonce(&self, address: Address) {
        let slot = {
            let entry = self
                .nonces
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(None)));
            Arc::clone(entry.value())
        };
        let mut slot = slot.lock().await;
        *slot = None;
        tracing::debug!(%address, "nonce cache reset");
    }
}

#[async_trait]
impl NonceManager for PendingNonceManager {
    async fn get_next_nonce<P, N>(
        &self,
        provider: &P,
        address: Address,
    ) -> alloy_transport::TransportResult<u64>
    where
        P: Provider<N>,
        N: alloy_network::Network,
    {
        // Locks the dashmap only long enough to clone the Arc; the await
        // below must not happen under the map lock.
        let slot = {
            let entry = self
                .nonces
                .entry(address)
                .or_insert_with(|| Arc::new(Mutex::new(None)));
            Arc::clone(entry.value())
        };

        let mut slot = slot.lock().await;
        let pending = provider.get_transaction_count(address).pending().await?;
        let next = match *slot {
            None => pending,
            Some(cached) => (cached + 1).max(pending),
        };
        *slot = Some(next);
        tracing::trace!(%address, pending, next, "allocated nonce");
        Ok(next)
    }
}
