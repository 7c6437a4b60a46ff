//! Generation job dispatcher.
//!
//! Each dispatcher is a long-lived Tokio task that polls
//! [`JobStore::claim`], resolves the job's provider chain, fans the job out
//! into `quantity` concurrent generation units and records the outcome.
//! Several dispatchers (and processes) may poll the same store; the atomic
//! claim is the only coordination between them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use adcraft_core::generation::GenerationRequest;
use adcraft_core::types::JobId;
use adcraft_db::error::StoreError;
use adcraft_db::models::asset::NewAsset;
use adcraft_db::models::job::Job;
use adcraft_db::models::status::JobStatus;
use adcraft_db::store::{AssetSink, Finalized, JobStore};
use adcraft_pipeline::limiter::{GenerationLimiter, LimiterError};
use adcraft_pipeline::registry::ProviderRegistry;
use adcraft_pipeline::storage::{image_dimensions, AssetStorage};
use adcraft_providers::{GeneratedMedia, Generator, MediaPayload};
use futures::future::join_all;
use serde_json::json;
use tokio_util::sync::CancellationToken;

/// Default polling interval when the queue is empty.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Error recorded on jobs interrupted by shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Worker shutting down";

/// What happened to one claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: JobId,
    /// Status the job ended in. A job settled elsewhere (e.g. by the
    /// stale-job reaper) reports that status; `Running` means the final
    /// write itself failed.
    pub status: JobStatus,
    /// Assets actually written. May be lower than the job's quantity when
    /// individual asset writes failed.
    pub assets_persisted: usize,
    pub error: Option<String>,
}

/// Wait for every dispatcher task to stop, sharing one `grace` period
/// between all of them. Returns `false` if the grace period ran out.
pub async fn join_with_grace(handles: Vec<tokio::task::JoinHandle<()>>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, join_all(handles)).await {
        Ok(results) => {
            for e in results.into_iter().filter_map(Result::err) {
                tracing::error!(error = %e, "Dispatcher task panicked");
            }
            true
        }
        Err(_) => false,
    }
}

pub struct JobDispatcher {
    id: usize,
    store: Arc<dyn JobStore>,
    assets: Arc<dyn AssetSink>,
    registry: Arc<ProviderRegistry>,
    storage: Arc<dyn AssetStorage>,
    limiter: GenerationLimiter,
    poll_interval: Duration,
    refund_on_failure: bool,
}

impl JobDispatcher {
    /// Create a dispatcher with the default poll interval, no concurrency
    /// limit and refunds disabled.
    pub fn new(
        store: Arc<dyn JobStore>,
        assets: Arc<dyn AssetSink>,
        registry: Arc<ProviderRegistry>,
        storage: Arc<dyn AssetStorage>,
    ) -> Self {
        Self {
            id: 0,
            store,
            assets,
            registry,
            storage,
            limiter: GenerationLimiter::unlimited(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            refund_on_failure: false,
        }
    }

    /// Identifier used in log lines when several dispatchers share a process.
    pub fn with_id(mut self, id: usize) -> Self {
        self.id = id;
        self
    }

    pub fn with_limiter(mut self, limiter: GenerationLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_refund_on_failure(mut self, refund: bool) -> Self {
        self.refund_on_failure = refund;
        self
    }

    /// Run the dispatcher loop until the cancellation token is triggered.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            dispatcher = self.id,
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Job dispatcher started",
        );

        while !cancel.is_cancelled() {
            match self.dispatch_once(&cancel).await {
                // Keep draining while there is work.
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::debug!(dispatcher = self.id, "No job available");
                    self.backoff(&cancel).await;
                }
                Err(e) => {
                    tracing::warn!(dispatcher = self.id, error = %e, "Claim failed, backing off");
                    self.backoff(&cancel).await;
                }
            }
        }

        tracing::info!(dispatcher = self.id, "Job dispatcher shutting down");
    }

    /// Claim and fully process at most one job.
    ///
    /// Returns `Ok(None)` for an empty queue or when cancelled before a
    /// claim. Claim failures other than an empty queue are returned; all
    /// failures after the claim are recorded on the job instead.
    pub async fn dispatch_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<JobOutcome>, StoreError> {
        let claimed = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            claimed = self.store.claim() => claimed,
        };

        match claimed {
            Ok(job) => Ok(Some(self.process(job, cancel).await)),
            Err(StoreError::NoJobAvailable) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn backoff(&self, cancel: &CancellationToken) {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = tokio::time::sleep(self.poll_interval) => {}
        }
    }

    async fn process(&self, job: Job, cancel: &CancellationToken) -> JobOutcome {
        let started = Instant::now();
        tracing::info!(
            dispatcher = self.id,
            job_id = %job.id,
            user_id = job.user_id,
            task_type = %job.task_type,
            provider = %job.provider,
            quantity = job.quantity,
            "Job claimed",
        );

        match self.generate(&job, cancel).await {
            Ok((resolved, media)) => {
                // Win the terminal transition before writing assets, so a job
                // the reaper already failed never ends up owning any.
                match self.finalize(&job, JobStatus::Succeeded, None).await {
                    Ok(Finalized::Transitioned) => {
                        let assets_persisted = self.persist_assets(&job, &resolved, media).await;
                        tracing::info!(
                            job_id = %job.id,
                            assets = assets_persisted,
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "Job succeeded",
                        );
                        JobOutcome {
                            job_id: job.id,
                            status: JobStatus::Succeeded,
                            assets_persisted,
                            error: None,
                        }
                    }
                    Ok(Finalized::AlreadyTerminal(status)) => {
                        tracing::warn!(
                            job_id = %job.id,
                            status = %status,
                            discarded = media.len(),
                            "Job finalized elsewhere, discarding generated results",
                        );
                        JobOutcome {
                            job_id: job.id,
                            status,
                            assets_persisted: 0,
                            error: Some(format!("Job already {status}, results discarded")),
                        }
                    }
                    Err(e) => JobOutcome {
                        job_id: job.id,
                        status: JobStatus::Running,
                        assets_persisted: 0,
                        error: Some(format!("Failed to finalize job: {e}")),
                    },
                }
            }
            Err(message) => {
                tracing::warn!(
                    job_id = %job.id,
                    error = %message,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job failed",
                );
                let status = match self.finalize(&job, JobStatus::Failed, Some(&message)).await {
                    Ok(Finalized::Transitioned) => {
                        if self.refund_on_failure {
                            self.refund(&job).await;
                        }
                        JobStatus::Failed
                    }
                    // Someone else settled the job; its quota is not ours to return.
                    Ok(Finalized::AlreadyTerminal(status)) => status,
                    Err(_) => JobStatus::Running,
                };
                JobOutcome {
                    job_id: job.id,
                    status,
                    assets_persisted: 0,
                    error: Some(message),
                }
            }
        }
    }

    /// Run every unit of `job`. All-or-nothing: the first failing unit (by
    /// index) fails the job and no results are returned.
    async fn generate(
        &self,
        job: &Job,
        cancel: &CancellationToken,
    ) -> Result<(String, Vec<GeneratedMedia>), String> {
        let task_type = job.task_type().map_err(|e| format!("Invalid job: {e}"))?;
        let kind = task_type.media_kind();
        let request = GenerationRequest::from_payload(kind, &job.aspect_ratio, &job.prompt)
            .map_err(|e| format!("Invalid prompt payload: {e}"))?;

        let (generator, resolved) = self.registry.resolve(kind, &job.provider);

        let units = (0..job.quantity.max(1)).map(|unit| {
            let generator = Arc::clone(&generator);
            let request = &request;
            async move { self.run_unit(job.id, unit, generator, request, cancel).await }
        });

        let results = tokio::select! {
            _ = cancel.cancelled() => return Err(SHUTDOWN_MESSAGE.to_string()),
            results = join_all(units) => results,
        };

        let media = results.into_iter().collect::<Result<Vec<_>, _>>()?;
        Ok((resolved, media))
    }

    async fn run_unit(
        &self,
        job_id: JobId,
        unit: i32,
        generator: Arc<dyn Generator>,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GeneratedMedia, String> {
        let _permit = self.limiter.acquire(cancel).await.map_err(|e| match e {
            LimiterError::Cancelled => SHUTDOWN_MESSAGE.to_string(),
            LimiterError::Closed => e.to_string(),
        })?;

        match generator.generate(request).await {
            Ok(media) => {
                tracing::debug!(job_id = %job_id, unit, provider = %media.provider, "Unit generated");
                Ok(media)
            }
            Err(e) => {
                tracing::debug!(job_id = %job_id, unit, error = %e, "Unit failed");
                Err(e.to_string())
            }
        }
    }

    /// Persist one asset per result. Failures are logged per asset and do
    /// not affect the job status. Returns the number written.
    async fn persist_assets(&self, job: &Job, resolved: &str, media: Vec<GeneratedMedia>) -> usize {
        let mut persisted = 0;

        for (index, item) in media.into_iter().enumerate() {
            let byte_size = item.byte_size().map(|n| n as i64);

            let (pointer, detected) = match &item.payload {
                MediaPayload::Url(url) => (url.clone(), None),
                MediaPayload::Bytes(bytes) => {
                    match self.storage.store(job.id, &item.format, bytes).await {
                        Ok(pointer) => (pointer, image_dimensions(bytes)),
                        Err(e) => {
                            tracing::error!(job_id = %job.id, index, error = %e, "Failed to store asset bytes");
                            continue;
                        }
                    }
                }
            };

            let width = item.width.or(detected.map(|(w, _)| w));
            let height = item.height.or(detected.map(|(_, h)| h));

            let asset = NewAsset {
                user_id: job.user_id,
                job_id: job.id,
                kind: item.kind.name().to_string(),
                storage_pointer: pointer,
                format: item.format,
                width: width.map(|w| w as i32),
                height: height.map(|h| h as i32),
                byte_size,
                provider_metadata: json!({
                    "provider": item.provider,
                    "requested_provider": job.provider,
                    "resolved_provider": resolved,
                    "details": item.metadata,
                }),
            };

            match self.assets.persist(asset).await {
                Ok(_) => persisted += 1,
                Err(e) => {
                    tracing::error!(job_id = %job.id, index, error = %e, "Failed to persist asset");
                }
            }
        }

        persisted
    }

    async fn finalize(
        &self,
        job: &Job,
        status: JobStatus,
        error_message: Option<&str>,
    ) -> Result<Finalized, StoreError> {
        let result = self.store.finalize(job.id, status, error_message).await;
        if let Err(e) = &result {
            // The stale-job reaper eventually fails jobs left RUNNING.
            tracing::error!(job_id = %job.id, status = %status, error = %e, "Failed to finalize job");
        }
        result
    }

    async fn refund(&self, job: &Job) {
        match self.store.refund_quota(job.user_id, job.quantity).await {
            Ok(()) => {
                tracing::info!(job_id = %job.id, user_id = job.user_id, quantity = job.quantity, "Quota refunded");
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Failed to refund quota");
            }
        }
    }
}
