//! Boot sequence of the facilitator server.
//!
//! - Loads `.env` values and the environment configuration.
//! - Connects a chain provider per configured network; when no dedicated
//!   bridge key is set, the settlement provider (and hence its nonce
//!   manager) is shared with the bridge-burn path.
//! - Opens the bridge job store and recovers unfinished jobs.
//! - Builds the scheme registry (`exact` everywhere, `cross-chain` when
//!   bridging is enabled) and serves the HTTP surface until SIGTERM/SIGINT.

use alloy_primitives::{Address, B256};
use alloy_provider::{Provider, ProviderBuilder};
use async_trait::async_trait;
use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tower_http::cors;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use railbridge_bridge::cctp::{CctpBridgeProvider, CctpConfig};
use railbridge_bridge::events::TracingEventSink;
use railbridge_bridge::provider::{BridgeError, BridgeProvider};
use railbridge_bridge::store::{BridgeJobStore, SqliteJobStore};
use railbridge_bridge::worker::{
    BridgeEnqueuer, BridgeWorker, BridgeWorkerConfig, SourceConfirmation,
};
use railbridge_chain_eip155::chain::Eip155ChainProvider;
use railbridge_chain_eip155::exact::ExactEvmFacilitator;
use railbridge_chain_eip155::networks;
use railbridge_types::chain::{ChainId, ChainProviderOps};
use railbridge_types::extension::CROSS_CHAIN_EXTENSION_KEY;
use railbridge_types::scheme::SchemeRegistry;

use crate::config::Config;
use crate::facilitator_local::FacilitatorLocal;
use crate::handlers::{self, AppState};
use crate::hooks::AuditHooks;
use crate::router::CrossChainRouter;
use crate::util::shutdown_token;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .expect("Failed to initialize rustls crypto provider");

    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;
    let settlement_wallet = config.settlement_wallet()?;
    let bridge_wallet = config.bridge_wallet()?;

    let endpoints = resolve_endpoints(&config).await?;
    if endpoints.is_empty() {
        return Err("no RPC endpoints configured; set EVM_RPC_URL or RPC_URL_<NETWORK>".into());
    }

    let mut settlement_chains = HashMap::new();
    let mut bridge_chains = HashMap::new();
    for (chain_id, rpc_url) in &endpoints {
        let network = networks::by_chain_id(chain_id)
            .ok_or_else(|| format!("{chain_id} is not a known network"))?;
        let provider = Arc::new(
            Eip155ChainProvider::try_new(
                settlement_wallet.clone(),
                rpc_url,
                network.chain,
                network.eip1559,
                config.receipt_timeout_secs,
            )
            .await?,
        );
        // Same signer for settlement and bridging means the same provider
        // instance, so both paths funnel through one nonce manager.
        let bridge_provider = match &bridge_wallet {
            Some(wallet) => Arc::new(
                Eip155ChainProvider::try_new(
                    wallet.clone(),
                    rpc_url,
                    network.chain,
                    network.eip1559,
                    config.receipt_timeout_secs,
                )
                .await?,
            ),
            None => provider.clone(),
        };
        settlement_chains.insert(chain_id.clone(), provider);
        bridge_chains.insert(chain_id.clone(), bridge_provider);
    }

    let store: Arc<dyn BridgeJobStore> = Arc::new(SqliteJobStore::connect(&config.db_path).await?);
    let bridge: Arc<dyn BridgeProvider> =
        Arc::new(CctpBridgeProvider::new(bridge_chains, CctpConfig::default()));
    let confirmation = Arc::new(ChainConfirmation {
        chains: settlement_chains.clone(),
        timeout_secs: config.receipt_timeout_secs,
    });
    let worker = Arc::new(BridgeWorker::new(
        store.clone(),
        bridge.clone(),
        confirmation,
        Arc::new(TracingEventSink),
        BridgeWorkerConfig {
            max_attempts: config.bridge_max_attempts,
            ..BridgeWorkerConfig::default()
        },
    ));
    let recovered = worker.recover().await?;
    if recovered > 0 {
        tracing::info!(recovered, "resumed unfinished bridge jobs");
    }

    let mut registry = SchemeRegistry::builder();
    for (chain_id, provider) in &settlement_chains {
        let exact = Arc::new(ExactEvmFacilitator::new(
            provider.clone(),
            config.deploy_erc4337_with_eip6492,
        ));
        registry = registry.register("exact", chain_id.clone(), exact.clone());

        if config.cross_chain_enabled {
            let facilitator_address = primary_signer_address(provider)?;
            let enqueuer: Arc<dyn BridgeEnqueuer> = worker.clone();
            let router = CrossChainRouter::new(
                exact,
                bridge.clone(),
                enqueuer,
                facilitator_address,
                chain_id.clone(),
            );
            registry = registry.register("cross-chain", chain_id.clone(), Arc::new(router));
        }
    }
    if config.cross_chain_enabled {
        registry = registry.declare_extension(CROSS_CHAIN_EXTENSION_KEY);
    }

    let facilitator = FacilitatorLocal::new(registry.build(), vec![Arc::new(AuditHooks)]);
    let state = Arc::new(AppState {
        facilitator,
        store,
        worker: worker.clone(),
    });

    // A settlement abandoned at the request deadline cannot be replayed:
    // the authorization's random nonce burns with the first on-chain use.
    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(state))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .inspect_err(|e| tracing::error!("Failed to bind to {}: {}", addr, e))?;

    let shutdown = shutdown_token()?;
    let axum_graceful_shutdown = async move { shutdown.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;

    // Phase two of the shutdown: drain in-flight bridge work before
    // exiting. Anything still unfinished is picked up by the recovery scan
    // on the next boot.
    worker.shutdown().await;

    Ok(())
}

/// Collects the per-chain RPC endpoints, attaching the default `EVM_RPC_URL`
/// to whatever chain it reports via `eth_chainId`.
async fn resolve_endpoints(
    config: &Config,
) -> Result<Vec<(ChainId, String)>, Box<dyn std::error::Error>> {
    let mut endpoints = config.per_chain_rpc.clone();
    if let Some(default_rpc) = &config.default_rpc {
        let provider = ProviderBuilder::new().connect(default_rpc).await?;
        let chain_id = provider.get_chain_id().await?;
        let chain = ChainId::new("eip155", chain_id.to_string());
        if endpoints.iter().any(|(existing, _)| existing == &chain) {
            tracing::debug!(chain = %chain, "default RPC shadowed by per-chain endpoint");
        } else if networks::by_chain_id(&chain).is_some() {
            endpoints.push((chain, default_rpc.clone()));
        } else {
            tracing::warn!(chain = %chain, "EVM_RPC_URL serves an unknown network; ignored");
        }
    }
    Ok(endpoints)
}

/// The facilitator's receiving address on a chain: the wallet's primary
/// signer.
fn primary_signer_address(
    provider: &Arc<Eip155ChainProvider>,
) -> Result<Address, Box<dyn std::error::Error>> {
    let addresses = provider.signer_addresses();
    let first = addresses
        .first()
        .ok_or("provider has no signer addresses")?;
    Ok(first.parse()?)
}

/// Waits for source-chain settlement transactions to confirm before the
/// worker burns against them.
struct ChainConfirmation {
    chains: HashMap<ChainId, Arc<Eip155ChainProvider>>,
    timeout_secs: u64,
}

#[async_trait]
impl SourceConfirmation for ChainConfirmation {
    async fn wait_confirmed(&self, network: &ChainId, tx_hash: &str) -> Result<(), BridgeError> {
        let provider = self
            .chains
            .get(network)
            .ok_or_else(|| BridgeError::Transport(format!("no provider for {network}")))?;
        let hash: B256 = tx_hash
            .parse()
            .map_err(|e| BridgeError::Onchain(format!("bad source tx hash {tx_hash}: {e}")))?;

        let deadline = Instant::now() + Duration::from_secs(self.timeout_secs);
        loop {
            match provider.inner().get_transaction_receipt(hash).await {
                Ok(Some(receipt)) => {
                    return if receipt.status() {
                        Ok(())
                    } else {
                        Err(BridgeError::Onchain(format!(
                            "source transaction {tx_hash} reverted"
                        )))
                    };
                }
                Ok(None) => {}
                Err(e) => return Err(BridgeError::Transport(e.to_string())),
            }
            if Instant::now() >= deadline {
                return Err(BridgeError::Transport(format!(
                    "source receipt timeout for {tx_hash}"
                )));
            }
            sleep(Duration::from_secs(3)).await;
        }
    }
}
