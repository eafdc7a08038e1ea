//! The durable background executor for bridge jobs.
//!
//! Settlement enqueues a job synchronously; a background task then waits for
//! the source-chain confirmation, calls the bridge provider, and drives the
//! job state machine:
//!
//! ```text
//! pending -> bridging -> { completed, failed }
//! pending -> cancelled   (admin action only)
//! bridging -> bridging   (retry loop; attempts++)
//! ```
//!
//! Processing is parallel across distinct idempotency keys; for a single key
//! an in-memory claim keeps at most one attempt in flight. A restart
//! recovery scan picks up `pending`/`bridging` jobs older than a staleness
//! threshold; idempotency on the bridge side prevents double-burns.

use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::task::TaskTracker;
use tracing::instrument;

use railbridge_types::chain::ChainId;
use railbridge_types::timestamp::UnixTimestamp;

use crate::events::{BridgeEvent, BridgeEventType, EventSink};
use crate::job::{BridgeJob, BridgeJobStatus};
use crate::provider::{BridgeError, BridgeProvider, Recoverability};
use crate::store::{BridgeJobStore, StoreError};

/// Parameters of a bridge obligation, as handed over by the settlement path.
#[derive(Debug, Clone)]
pub struct BridgeRequest {
    pub source_network: ChainId,
    pub destination_network: ChainId,
    pub source_tx_hash: String,
    /// Amount in atomic units, decimal string.
    pub amount: String,
    pub destination_asset: String,
    pub destination_pay_to: String,
}

/// Waits until a source-chain transaction is confirmed.
///
/// The worker confirms the settlement transaction before burning, so a
/// reorged settlement never funds a bridge transfer.
#[async_trait]
pub trait SourceConfirmation: Send + Sync {
    async fn wait_confirmed(&self, network: &ChainId, tx_hash: &str) -> Result<(), BridgeError>;
}

/// The enqueue capability, as seen by the settlement path.
#[async_trait]
pub trait BridgeEnqueuer: Send + Sync {
    /// Creates (or finds) the job for this request and schedules background
    /// processing. Idempotent per `source:sourceTx:dest`.
    async fn enqueue(&self, request: BridgeRequest) -> Result<BridgeJob, StoreError>;
}

/// Worker tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct BridgeWorkerConfig {
    /// Attempts before a transient failure becomes permanent.
    pub max_attempts: u32,
    /// Linear backoff base: attempt N sleeps `N * base` plus jitter.
    pub backoff_base_ms: u64,
    /// Unfinished jobs untouched for this long are eligible for recovery.
    pub staleness_secs: u64,
}

impl Default for BridgeWorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 1000,
            staleness_secs: 60,
        }
    }
}

/// Errors from the admin cancellation surface.
#[derive(Debug, thiserror::Error)]
pub enum CancelError {
    #[error("bridge job {0} not found")]
    NotFound(String),
    /// Only `pending` jobs can be cancelled; a `bridging` job may already
    /// have burned on the source chain.
    #[error("bridge job in state {0} cannot be cancelled")]
    NotCancellable(BridgeJobStatus),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Shared state cloned into every background processing task.
#[derive(Clone)]
struct WorkerCtx {
    store: Arc<dyn BridgeJobStore>,
    provider: Arc<dyn BridgeProvider>,
    confirmation: Arc<dyn SourceConfirmation>,
    events: Arc<dyn EventSink>,
    config: BridgeWorkerConfig,
    in_flight: Arc<DashMap<String, ()>>,
}

/// The durable bridge executor.
pub struct BridgeWorker {
    ctx: WorkerCtx,
    tasks: TaskTracker,
}

impl BridgeWorker {
    pub fn new(
        store: Arc<dyn BridgeJobStore>,
        provider: Arc<dyn BridgeProvider>,
        confirmation: Arc<dyn SourceConfirmation>,
        events: Arc<dyn EventSink>,
        config: BridgeWorkerConfig,
    ) -> Self {
        Self {
            ctx: WorkerCtx {
                store,
                provider,
                confirmation,
                events,
                config,
                in_flight: Arc::new(DashMap::new()),
            },
            tasks: TaskTracker::new(),
        }
    }

    /// Scans the store for unfinished jobs older than the staleness
    /// threshold and schedules them for processing. Called once at boot.
    pub async fn recover(&self) -> Result<usize, StoreError> {
        let horizon = UnixTimestamp::from_secs(
            UnixTimestamp::now()
                .as_secs()
                .saturating_sub(self.ctx.config.staleness_secs),
        );
        let stale = self.ctx.store.list_unfinished(horizon).await?;
        let count = stale.len();
        for job in stale {
            tracing::info!(job_id = %job.id, status = %job.status, "recovering bridge job");
            self.spawn(job.id);
        }
        Ok(count)
    }

    /// Flips a `pending` job to `cancelled`.
    pub async fn cancel(&self, job_id: &str) -> Result<BridgeJob, CancelError> {
        let mut job = self
            .ctx
            .store
            .get_by_id(job_id)
            .await?
            .ok_or_else(|| CancelError::NotFound(job_id.to_string()))?;
        if job.status != BridgeJobStatus::Pending {
            return Err(CancelError::NotCancellable(job.status));
        }
        job.transition(BridgeJobStatus::Cancelled);
        self.ctx.store.update(&job).await?;
        tracing::info!(job_id = %job.id, "bridge job cancelled");
        Ok(job)
    }

    /// Runs one job to a terminal state (or to claim-collision no-op).
    /// Exposed for deterministic driving in tests; production paths go
    /// through [`BridgeEnqueuer::enqueue`] and [`BridgeWorker::recover`].
    pub async fn process_job(&self, job_id: &str) {
        process(self.ctx.clone(), job_id.to_string()).await;
    }

    /// Stops accepting new tasks and waits for in-flight processing.
    pub async fn shutdown(&self) {
        self.tasks.close();
        self.tasks.wait().await;
    }

    fn spawn(&self, job_id: String) {
        let ctx = self.ctx.clone();
        self.tasks.spawn(async move {
            process(ctx, job_id).await;
        });
    }
}

#[async_trait]
impl BridgeEnqueuer for BridgeWorker {
    async fn enqueue(&self, request: BridgeRequest) -> Result<BridgeJob, StoreError> {
        let key = BridgeJob::idempotency_key(
            &request.source_network,
            &request.source_tx_hash,
            &request.destination_network,
        );
        if let Some(existing) = self.ctx.store.get_by_idempotency_key(&key).await? {
            tracing::debug!(job_id = %existing.id, idempotency_key = %key, "bridge job already enqueued");
            return Ok(existing);
        }

        let job = BridgeJob::new(
            request.source_network,
            request.destination_network,
            request.source_tx_hash,
            request.amount,
            request.destination_asset,
            request.destination_pay_to,
        );
        match self.ctx.store.create(&job).await {
            Ok(()) => {}
            // Lost the race against a concurrent enqueue for the same key.
            Err(StoreError::DuplicateIdempotencyKey(_)) => {
                if let Some(existing) = self.ctx.store.get_by_idempotency_key(&key).await? {
                    return Ok(existing);
                }
            }
            Err(e) => return Err(e),
        }
        self.spawn(job.id.clone());
        Ok(job)
    }
}

/// Drives one job from its current state to a terminal state.
#[instrument(skip_all, fields(job_id = %job_id))]
async fn process(ctx: WorkerCtx, job_id: String) {
    let Ok(Some(job)) = ctx.store.get_by_id(&job_id).await else {
        tracing::warn!("bridge job vanished before processing");
        return;
    };
    if job.status.is_terminal() {
        return;
    }

    // Single-flight per idempotency key.
    if ctx
        .in_flight
        .insert(job.idempotency_key.clone(), ())
        .is_some()
    {
        tracing::debug!(idempotency_key = %job.idempotency_key, "attempt already in flight");
        return;
    }
    let claim_key = job.idempotency_key.clone();

    run_attempts(&ctx, job).await;

    ctx.in_flight.remove(&claim_key);
}

async fn run_attempts(ctx: &WorkerCtx, mut job: BridgeJob) {
    let max_attempts = ctx.config.max_attempts;

    if job.status == BridgeJobStatus::Pending {
        ctx.events.emit(BridgeEvent::for_job(
            BridgeEventType::BridgeStart,
            &job,
            job.attempts,
            max_attempts,
        ));
    }

    loop {
        // Cancellation may have landed between attempts.
        match ctx.store.get_by_id(&job.id).await {
            Ok(Some(current)) if current.status.is_terminal() => return,
            Ok(Some(current)) => job = current,
            _ => return,
        }

        job.attempts += 1;
        if !job.transition(BridgeJobStatus::Bridging) {
            return;
        }
        if persist(ctx, &job).await.is_err() {
            return;
        }
        ctx.events.emit(BridgeEvent::for_job(
            BridgeEventType::BridgeAttempt,
            &job,
            job.attempts,
            max_attempts,
        ));

        match attempt_bridge(ctx, &mut job).await {
            Ok(()) => {
                job.transition(BridgeJobStatus::Completed);
                job.last_error = None;
                if persist(ctx, &job).await.is_err() {
                    return;
                }
                ctx.events.emit(BridgeEvent::for_job(
                    BridgeEventType::BridgeSuccess,
                    &job,
                    job.attempts,
                    max_attempts,
                ));
                tracing::info!(
                    job_id = %job.id,
                    bridge_tx = job.bridge_tx_hash.as_deref().unwrap_or(""),
                    destination_tx = job.destination_tx_hash.as_deref().unwrap_or(""),
                    "bridge job completed"
                );
                return;
            }
            Err(error) => {
                let recoverability = error.recoverability();
                let exhausted = job.attempts >= max_attempts;
                job.last_error = Some(error.to_string());

                let failed = recoverability == Recoverability::Fatal || exhausted;
                if failed {
                    job.transition(BridgeJobStatus::Failed);
                }
                if persist(ctx, &job).await.is_err() {
                    return;
                }
                ctx.events.emit(
                    BridgeEvent::for_job(
                        BridgeEventType::BridgeFailure,
                        &job,
                        job.attempts,
                        max_attempts,
                    )
                    .with_error(
                        error.to_string(),
                        Some(error_code(&error).to_string()),
                        Some(recoverability_label(recoverability).to_string()),
                    ),
                );
                if failed {
                    tracing::warn!(
                        job_id = %job.id,
                        attempts = job.attempts,
                        error = %error,
                        "bridge job failed permanently"
                    );
                    return;
                }

                let delay = backoff(ctx.config.backoff_base_ms, job.attempts);
                tracing::info!(
                    job_id = %job.id,
                    attempt = job.attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying bridge job"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// One bridge attempt: confirm the source settlement, then burn and mint.
/// On success the transaction hashes are recorded on `job`.
async fn attempt_bridge(ctx: &WorkerCtx, job: &mut BridgeJob) -> Result<(), BridgeError> {
    let amount = U256::from_str_radix(&job.amount, 10)
        .map_err(|e| BridgeError::AttestationRejected(format!("corrupt job amount: {e}")))?;
    let destination_asset = Address::from_str(&job.destination_asset)
        .map_err(|e| BridgeError::AttestationRejected(format!("corrupt destination asset: {e}")))?;
    let recipient = Address::from_str(&job.destination_pay_to)
        .map_err(|e| BridgeError::AttestationRejected(format!("corrupt recipient: {e}")))?;

    ctx.confirmation
        .wait_confirmed(&job.source_network, &job.source_tx_hash)
        .await?;

    let result = ctx
        .provider
        .bridge(
            &job.source_network,
            &job.source_tx_hash,
            &job.destination_network,
            &destination_asset,
            amount,
            &recipient,
        )
        .await?;

    job.bridge_tx_hash = Some(result.bridge_tx_hash);
    job.message_id = result.message_id;
    match result.destination_tx_hash {
        Some(destination_tx_hash) => {
            job.destination_tx_hash = Some(destination_tx_hash);
            Ok(())
        }
        // The mint was not confirmed when the provider returned; retry to
        // reconcile. Provider-side idempotency prevents a second burn.
        None => Err(BridgeError::Transport(
            "mint not yet confirmed on destination".into(),
        )),
    }
}

async fn persist(ctx: &WorkerCtx, job: &BridgeJob) -> Result<(), StoreError> {
    ctx.store.update(job).await.inspect_err(|e| {
        tracing::error!(job_id = %job.id, error = %e, "failed to persist bridge job");
    })
}

/// Linear backoff with uniform jitter to decorrelate concurrent retries.
fn backoff(base_ms: u64, attempt: u32) -> Duration {
    let linear = base_ms.saturating_mul(attempt as u64);
    let jitter = rand::rng().random_range(0..=base_ms / 2);
    Duration::from_millis(linear + jitter)
}

fn error_code(error: &BridgeError) -> &'static str {
    match error {
        BridgeError::UnsupportedRoute { .. } => "unsupported_route",
        BridgeError::InsufficientBalance(_) => "insufficient_balance",
        BridgeError::AttestationRejected(_) => "attestation_rejected",
        BridgeError::AttestationTimeout(_) => "attestation_timeout",
        BridgeError::Transport(_) => "transport",
        BridgeError::Onchain(_) => "onchain",
    }
}

fn recoverability_label(recoverability: Recoverability) -> &'static str {
    match recoverability {
        Recoverability::Fatal => "fatal",
        Recoverability::Transient => "transient",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingEventSink;
    use crate::provider::BridgeResult;
    use crate::store::MemoryJobStore;
    use std::sync::Mutex;

    struct NoopConfirmation;

    #[async_trait]
    impl SourceConfirmation for NoopConfirmation {
        async fn wait_confirmed(
            &self,
            _network: &ChainId,
            _tx_hash: &str,
        ) -> Result<(), BridgeError> {
            Ok(())
        }
    }

    /// Scripted provider: pops one outcome per bridge call.
    struct ScriptedProvider {
        outcomes: Mutex<Vec<Result<BridgeResult, BridgeError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedProvider {
        fn new(outcomes: Vec<Result<BridgeResult, BridgeError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }

        fn success(source: &ChainId, destination: &ChainId) -> BridgeResult {
            BridgeResult {
                bridge_tx_hash: "0xburn".into(),
                destination_tx_hash: Some("0xmint".into()),
                message_id: Some("0xmessage".into()),
                source_chain: source.clone(),
                destination_chain: destination.clone(),
            }
        }
    }

    #[async_trait]
    impl BridgeProvider for ScriptedProvider {
        fn supports_chain(&self, _network: &ChainId) -> bool {
            true
        }

        fn is_usdc(&self, _network: &ChainId, _asset: &Address) -> bool {
            true
        }

        async fn check_liquidity(
            &self,
            _source: &ChainId,
            _destination: &ChainId,
            _asset: &Address,
            _amount: U256,
        ) -> Result<bool, BridgeError> {
            Ok(true)
        }

        async fn get_exchange_rate(
            &self,
            _source: &ChainId,
            _destination: &ChainId,
            _source_asset: &Address,
            _destination_asset: &Address,
        ) -> Result<f64, BridgeError> {
            Ok(1.0)
        }

        async fn bridge(
            &self,
            _source: &ChainId,
            _source_tx_hash: &str,
            _destination: &ChainId,
            _destination_asset: &Address,
            _amount: U256,
            _recipient: &Address,
        ) -> Result<BridgeResult, BridgeError> {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .remove(0)
        }
    }

    fn request() -> BridgeRequest {
        BridgeRequest {
            source_network: ChainId::new("eip155", "84532"),
            destination_network: ChainId::new("eip155", "11155111"),
            source_tx_hash: "0xsettle".into(),
            amount: "10000".into(),
            destination_asset: "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238".into(),
            destination_pay_to: "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".into(),
        }
    }

    fn worker(
        provider: Arc<ScriptedProvider>,
        sink: Arc<RecordingEventSink>,
    ) -> (BridgeWorker, Arc<MemoryJobStore>) {
        let store = Arc::new(MemoryJobStore::default());
        let worker = BridgeWorker::new(
            store.clone(),
            provider,
            Arc::new(NoopConfirmation),
            sink,
            BridgeWorkerConfig {
                max_attempts: 3,
                backoff_base_ms: 2,
                staleness_secs: 0,
            },
        );
        (worker, store)
    }

    #[tokio::test]
    async fn happy_path_completes_with_events() {
        let source = ChainId::new("eip155", "84532");
        let destination = ChainId::new("eip155", "11155111");
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(ScriptedProvider::success(
            &source,
            &destination,
        ))]));
        let sink = Arc::new(RecordingEventSink::default());
        let (worker, store) = worker(provider.clone(), sink.clone());

        let job = worker.enqueue(request()).await.unwrap();
        worker.shutdown().await;

        let stored = store.get_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BridgeJobStatus::Completed);
        assert_eq!(stored.attempts, 1);
        assert_eq!(stored.bridge_tx_hash.as_deref(), Some("0xburn"));
        assert_eq!(stored.destination_tx_hash.as_deref(), Some("0xmint"));
        assert_eq!(stored.message_id.as_deref(), Some("0xmessage"));
        assert!(stored.last_error.is_none());

        let kinds: Vec<_> = sink.events().iter().map(|e| e.event_type).collect();
        assert_eq!(
            kinds,
            vec![
                BridgeEventType::BridgeStart,
                BridgeEventType::BridgeAttempt,
                BridgeEventType::BridgeSuccess
            ]
        );
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn enqueue_is_idempotent_per_key() {
        let source = ChainId::new("eip155", "84532");
        let destination = ChainId::new("eip155", "11155111");
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(ScriptedProvider::success(
            &source,
            &destination,
        ))]));
        let sink = Arc::new(RecordingEventSink::default());
        let (worker, _store) = worker(provider.clone(), sink);

        let first = worker.enqueue(request()).await.unwrap();
        let second = worker.enqueue(request()).await.unwrap();
        assert_eq!(first.id, second.id);

        worker.shutdown().await;
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let source = ChainId::new("eip155", "84532");
        let destination = ChainId::new("eip155", "11155111");
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(BridgeError::Transport("gateway timeout".into())),
            Ok(ScriptedProvider::success(&source, &destination)),
        ]));
        let sink = Arc::new(RecordingEventSink::default());
        let (worker, store) = worker(provider.clone(), sink.clone());

        let job = worker.enqueue(request()).await.unwrap();
        worker.shutdown().await;

        let stored = store.get_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BridgeJobStatus::Completed);
        assert_eq!(stored.attempts, 2);
        assert!(stored.last_error.is_none());
        assert_eq!(provider.calls(), 2);

        let failures: Vec<_> = sink
            .events()
            .iter()
            .filter(|e| e.event_type == BridgeEventType::BridgeFailure)
            .cloned()
            .collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(
            failures[0].payload.recoverability.as_deref(),
            Some("transient")
        );
    }

    #[tokio::test]
    async fn fatal_failure_does_not_retry() {
        let provider = Arc::new(ScriptedProvider::new(vec![Err(
            BridgeError::InsufficientBalance("0 available".into()),
        )]));
        let sink = Arc::new(RecordingEventSink::default());
        let (worker, store) = worker(provider.clone(), sink.clone());

        let job = worker.enqueue(request()).await.unwrap();
        worker.shutdown().await;

        let stored = store.get_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BridgeJobStatus::Failed);
        assert_eq!(stored.attempts, 1);
        assert!(
            stored
                .last_error
                .as_deref()
                .unwrap()
                .contains("insufficient balance")
        );
        assert_eq!(provider.calls(), 1);

        let last = sink.events().last().cloned().unwrap();
        assert_eq!(last.event_type, BridgeEventType::BridgeFailure);
        assert_eq!(last.payload.recoverability.as_deref(), Some("fatal"));
    }

    #[tokio::test]
    async fn transient_exhaustion_fails_after_max_attempts() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Err(BridgeError::Transport("failed to fetch".into())),
            Err(BridgeError::Onchain("nonce too low".into())),
            Err(BridgeError::Transport("gateway timeout".into())),
        ]));
        let sink = Arc::new(RecordingEventSink::default());
        let (worker, store) = worker(provider.clone(), sink);

        let job = worker.enqueue(request()).await.unwrap();
        worker.shutdown().await;

        let stored = store.get_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BridgeJobStatus::Failed);
        assert_eq!(stored.attempts, 3);
        assert!(stored.last_error.is_some());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn cancel_pending_but_not_bridging() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let sink = Arc::new(RecordingEventSink::default());
        let (worker, store) = worker(provider, sink);

        // A pending job never handed to a task.
        let pending = BridgeJob::new(
            ChainId::new("eip155", "84532"),
            ChainId::new("eip155", "11155111"),
            "0xpending".into(),
            "10000".into(),
            "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238".into(),
            "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".into(),
        );
        store.create(&pending).await.unwrap();
        let cancelled = worker.cancel(&pending.id).await.unwrap();
        assert_eq!(cancelled.status, BridgeJobStatus::Cancelled);

        let mut bridging = BridgeJob::new(
            ChainId::new("eip155", "84532"),
            ChainId::new("eip155", "11155111"),
            "0xbridging".into(),
            "10000".into(),
            "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238".into(),
            "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".into(),
        );
        store.create(&bridging).await.unwrap();
        bridging.transition(BridgeJobStatus::Bridging);
        store.update(&bridging).await.unwrap();

        let err = worker.cancel(&bridging.id).await.unwrap_err();
        assert!(matches!(err, CancelError::NotCancellable(_)));

        let missing = worker.cancel("bj_missing").await.unwrap_err();
        assert!(matches!(missing, CancelError::NotFound(_)));
    }

    #[tokio::test]
    async fn recovery_scan_resumes_stale_jobs() {
        let source = ChainId::new("eip155", "84532");
        let destination = ChainId::new("eip155", "11155111");
        let provider = Arc::new(ScriptedProvider::new(vec![Ok(ScriptedProvider::success(
            &source,
            &destination,
        ))]));
        let sink = Arc::new(RecordingEventSink::default());
        let (worker, store) = worker(provider.clone(), sink);

        // Simulates a job left bridging by a crashed process.
        let mut orphan = BridgeJob::new(
            source,
            destination,
            "0xorphan".into(),
            "10000".into(),
            "0x1c7D4B196Cb0C7B01d743Fbc6116a902379C7238".into(),
            "0x209693Bc6afc0C5328bA36FaF03C514EF312287C".into(),
        );
        store.create(&orphan).await.unwrap();
        orphan.transition(BridgeJobStatus::Bridging);
        store.update(&orphan).await.unwrap();

        let recovered = worker.recover().await.unwrap();
        assert_eq!(recovered, 1);
        worker.shutdown().await;

        let stored = store.get_by_id(&orphan.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BridgeJobStatus::Completed);
        assert_eq!(stored.destination_tx_hash.as_deref(), Some("0xmint"));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn unconfirmed_mint_is_retried_until_reconciled() {
        let source = ChainId::new("eip155", "84532");
        let destination = ChainId::new("eip155", "11155111");
        let unconfirmed = BridgeResult {
            destination_tx_hash: None,
            ..ScriptedProvider::success(&source, &destination)
        };
        let provider = Arc::new(ScriptedProvider::new(vec![
            Ok(unconfirmed),
            Ok(ScriptedProvider::success(&source, &destination)),
        ]));
        let sink = Arc::new(RecordingEventSink::default());
        let (worker, store) = worker(provider.clone(), sink);

        let job = worker.enqueue(request()).await.unwrap();
        worker.shutdown().await;

        let stored = store.get_by_id(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BridgeJobStatus::Completed);
        assert_eq!(stored.destination_tx_hash.as_deref(), Some("0xmint"));
        assert_eq!(provider.calls(), 2);
    }
}
