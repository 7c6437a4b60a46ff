//! Dispatcher integration tests on the in-memory store:
//! - All-or-nothing fan-out
//! - The limit-2 enqueue / dispatch / reject scenario
//! - Asset persistence failures isolated from job status
//! - Refund policy, payload decode failures, fallback and shutdown
//! - Concurrent fan-out and races with the stale-job reaper

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use adcraft_core::generation::{GenerationRequest, MediaKind, TaskType};
use adcraft_core::plans::Plan;
use adcraft_core::types::DbId;
use adcraft_db::memory::InMemoryStore;
use adcraft_db::models::job::NewJob;
use adcraft_db::models::status::JobStatus;
use adcraft_db::store::{AssetSink, JobStore, STALE_JOB_MESSAGE};
use adcraft_pipeline::enqueue::{EnqueueError, EnqueueRequest, EnqueueService};
use adcraft_pipeline::limiter::GenerationLimiter;
use adcraft_pipeline::registry::ProviderRegistry;
use adcraft_pipeline::storage::LocalAssetStorage;
use adcraft_providers::synthetic::{SyntheticImageGenerator, SyntheticVideoGenerator};
use adcraft_providers::{GeneratedMedia, Generator, GeneratorError, MediaPayload};
use adcraft_worker::dispatcher::{join_with_grace, JobDispatcher, SHUTDOWN_MESSAGE};
use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Test generators
// ---------------------------------------------------------------------------

/// Fails the call with the given index (0-based) permanently; every other
/// call returns a hosted URL.
struct FailNth {
    name: &'static str,
    fail_at: Option<usize>,
    calls: AtomicUsize,
}

impl FailNth {
    fn new(name: &'static str, fail_at: Option<usize>) -> Self {
        Self {
            name,
            fail_at,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FailNth {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if Some(call) == self.fail_at {
            return Err(GeneratorError::permanent(self.name, "content policy violation"));
        }
        Ok(GeneratedMedia {
            kind: MediaKind::Image,
            payload: MediaPayload::Url(format!("https://cdn.example.com/{call}.png")),
            format: "png".to_string(),
            width: Some(1024),
            height: Some(1024),
            provider: self.name.to_string(),
            metadata: json!({ "call": call }),
        })
    }
}

/// Always reports missing credentials.
struct NoKey(&'static str);

#[async_trait]
impl Generator for NoKey {
    fn name(&self) -> &str {
        self.0
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        Err(GeneratorError::missing_credentials(self.0, "GEMINI_API_KEY"))
    }
}

/// Never finishes within a test's lifetime.
struct Hangs;

#[async_trait]
impl Generator for Hangs {
    fn name(&self) -> &str {
        "hangs"
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(GeneratorError::transient("hangs", "unreachable"))
    }
}

/// Sleeps for `delay` on every call while tracking how many calls are in
/// flight at once.
struct Gauge {
    delay: Duration,
    fail: bool,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail: false,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn failing(delay: Duration) -> Self {
        Self {
            fail: true,
            ..Self::new(delay)
        }
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for Gauge {
    fn name(&self) -> &str {
        "gemini"
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Image
    }

    async fn generate(&self, _request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail {
            return Err(GeneratorError::permanent("gemini", "safety filter"));
        }
        Ok(GeneratedMedia {
            kind: MediaKind::Image,
            payload: MediaPayload::Url("https://cdn.example.com/slow.png".to_string()),
            format: "png".to_string(),
            width: Some(1024),
            height: Some(1024),
            provider: "gemini".to_string(),
            metadata: json!({}),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<InMemoryStore>,
    registry: Arc<ProviderRegistry>,
    dispatcher: JobDispatcher,
    _dir: tempfile::TempDir,
}

fn registry_with(primary: Arc<dyn Generator>, fallback_to_synthetic: bool) -> Arc<ProviderRegistry> {
    let name = primary.name().to_string();
    let mut builder = ProviderRegistry::builder()
        .register(primary)
        .register(Arc::new(SyntheticImageGenerator))
        .register(Arc::new(SyntheticVideoGenerator))
        .default_provider(MediaKind::Image, name.clone())
        .default_provider(MediaKind::Video, "synthetic-video")
        .call_timeout(Duration::from_secs(5));
    if fallback_to_synthetic {
        builder = builder.fallback(name, "synthetic");
    }
    Arc::new(builder.build().unwrap())
}

fn harness(registry: Arc<ProviderRegistry>) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = JobDispatcher::new(
        store.clone(),
        store.clone(),
        Arc::clone(&registry),
        Arc::new(LocalAssetStorage::new(dir.path())),
    )
    .with_limiter(GenerationLimiter::new(4))
    .with_poll_interval(Duration::from_millis(10));

    Harness {
        store,
        registry,
        dispatcher,
        _dir: dir,
    }
}

fn image_job(user_id: DbId, provider: &str, quantity: i32) -> NewJob {
    NewJob {
        user_id,
        task_type: TaskType::ImageGen,
        provider: provider.to_string(),
        quantity,
        aspect_ratio: "16:9".to_string(),
        prompt: json!({
            "instruction": "Minimalist poster for a coffee brand",
            "negative_prompt": "text",
        }),
    }
}

// ---------------------------------------------------------------------------
// Fan-out
// ---------------------------------------------------------------------------

#[tokio::test]
async fn all_units_succeeding_persists_every_asset() {
    let generator = Arc::new(FailNth::new("gemini", None));
    let h = harness(registry_with(generator.clone(), false));
    let user = h.store.add_user("fan@example.com", Plan::Pro, 10).await;
    let job = h.store.enqueue(image_job(user, "gemini", 3)).await.unwrap().job;

    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.job_id, job.id);
    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.assets_persisted, 3);
    assert_eq!(generator.calls(), 3);

    let stored = h.store.job(job.id).await.unwrap();
    assert_eq!(stored.status(), Some(JobStatus::Succeeded));
    assert!(stored.completed_at.is_some());
    assert_eq!(h.store.list_by_job(job.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn one_failing_unit_fails_the_whole_job() {
    let generator = Arc::new(FailNth::new("gemini", Some(1)));
    let h = harness(registry_with(generator.clone(), false));
    let user = h.store.add_user("fan@example.com", Plan::Pro, 10).await;
    let job = h.store.enqueue(image_job(user, "gemini", 3)).await.unwrap().job;

    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.assets_persisted, 0);
    assert_eq!(generator.calls(), 3, "all units start together");

    let stored = h.store.job(job.id).await.unwrap();
    assert_eq!(stored.status(), Some(JobStatus::Failed));
    assert!(stored
        .error_message
        .as_deref()
        .unwrap()
        .contains("content policy violation"));
    assert!(h.store.list_by_job(job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn units_of_one_job_run_concurrently() {
    let generator = Arc::new(Gauge::new(Duration::from_millis(100)));
    let mut h = harness(registry_with(generator.clone(), false));
    h.dispatcher = h.dispatcher.with_limiter(GenerationLimiter::unlimited());
    let user = h.store.add_user("parallel@example.com", Plan::Pro, 10).await;
    h.store.enqueue(image_job(user, "gemini", 3)).await.unwrap();

    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(generator.peak(), 3);
}

#[tokio::test]
async fn limiter_caps_simultaneous_units() {
    let generator = Arc::new(Gauge::new(Duration::from_millis(50)));
    let mut h = harness(registry_with(generator.clone(), false));
    h.dispatcher = h.dispatcher.with_limiter(GenerationLimiter::new(2));
    let user = h.store.add_user("capped@example.com", Plan::Pro, 10).await;
    let job = h.store.enqueue(image_job(user, "gemini", 4)).await.unwrap().job;

    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(generator.peak(), 2);
    assert_eq!(h.store.list_by_job(job.id).await.unwrap().len(), 4);
}

// ---------------------------------------------------------------------------
// End-to-end scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn quota_limit_two_scenario() {
    let h = harness(registry_with(Arc::new(SyntheticImageGenerator), false));
    let user = h.store.add_user("scenario@example.com", Plan::Pro, 2).await;
    let service = EnqueueService::new(h.store.clone(), Arc::clone(&h.registry));

    let request = |quantity| EnqueueRequest {
        user_id: user,
        plan: Plan::Pro,
        task_type: "IMAGE_GEN".into(),
        provider: Some("synthetic".into()),
        quantity,
        aspect_ratio: Some("1:1".into()),
        prompt: json!({"instruction": "Flat-lay of skincare products"}),
    };

    let enqueued = service.enqueue(request(2)).await.unwrap();
    assert_eq!(enqueued.remaining_quota, 0);
    assert_eq!(h.store.user(user).await.unwrap().quota_used_today, 2);

    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Succeeded);

    let assets = h.store.list_by_job(enqueued.job.id).await.unwrap();
    assert_eq!(assets.len(), 2);
    for asset in &assets {
        assert_eq!(asset.kind, "image");
        assert_eq!(asset.format, "png");
        assert_eq!((asset.width, asset.height), (Some(1024), Some(1024)));
        assert!(asset.byte_size.unwrap() > 0);
        assert!(asset
            .storage_pointer
            .starts_with(&enqueued.job.id.to_string()));
    }

    assert_matches!(
        service.enqueue(request(1)).await,
        Err(EnqueueError::QuotaExceeded { remaining: 0, .. })
    );

    let job = h.store.get_by_id(enqueued.job.id, user).await.unwrap();
    assert_eq!(job.status(), Some(JobStatus::Succeeded));
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn asset_persistence_errors_do_not_fail_the_job() {
    let h = harness(registry_with(Arc::new(FailNth::new("gemini", None)), false));
    let user = h.store.add_user("sink@example.com", Plan::Pro, 10).await;
    let job = h.store.enqueue(image_job(user, "gemini", 2)).await.unwrap().job;
    h.store.reject_asset_writes(true).await;

    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(outcome.assets_persisted, 0);
    assert_eq!(
        h.store.job(job.id).await.unwrap().status(),
        Some(JobStatus::Succeeded)
    );
}

#[tokio::test]
async fn quota_is_refunded_only_when_enabled() {
    for (refund, expected_used) in [(false, 2), (true, 0)] {
        let mut h = harness(registry_with(Arc::new(FailNth::new("gemini", Some(0))), false));
        h.dispatcher = h.dispatcher.with_refund_on_failure(refund);

        let user = h.store.add_user("refund@example.com", Plan::Pro, 5).await;
        h.store.enqueue(image_job(user, "gemini", 2)).await.unwrap();

        let outcome = h
            .dispatcher
            .dispatch_once(&CancellationToken::new())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome.status, JobStatus::Failed);
        assert_eq!(
            h.store.user(user).await.unwrap().quota_used_today,
            expected_used,
            "refund_on_failure = {refund}"
        );
    }
}

#[tokio::test]
async fn undecodable_payload_fails_without_calling_a_provider() {
    let generator = Arc::new(FailNth::new("gemini", None));
    let h = harness(registry_with(generator.clone(), false));
    let user = h.store.add_user("payload@example.com", Plan::Pro, 10).await;

    let mut job = image_job(user, "gemini", 1);
    job.prompt = json!({"instruction": "   "});
    let job = h.store.enqueue(job).await.unwrap().job;

    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert!(outcome.error.unwrap().starts_with("Invalid prompt payload"));
    assert_eq!(generator.calls(), 0);
    assert_eq!(
        h.store.job(job.id).await.unwrap().status(),
        Some(JobStatus::Failed)
    );
}

#[tokio::test]
async fn credential_failure_falls_back_and_records_the_actual_provider() {
    let h = harness(registry_with(Arc::new(NoKey("gemini")), true));
    let user = h.store.add_user("fallback@example.com", Plan::Pro, 10).await;
    let job = h.store.enqueue(image_job(user, "gemini", 1)).await.unwrap().job;

    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.status, JobStatus::Succeeded);

    let assets = h.store.list_by_job(job.id).await.unwrap();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].provider_metadata["provider"], "synthetic");
    assert_eq!(assets[0].provider_metadata["requested_provider"], "gemini");
    assert_eq!((assets[0].width, assets[0].height), (Some(1024), Some(576)));
}

#[tokio::test]
async fn unknown_provider_degrades_to_default() {
    let generator = Arc::new(FailNth::new("gemini", None));
    let h = harness(registry_with(generator.clone(), false));
    let user = h.store.add_user("legacy@example.com", Plan::Pro, 10).await;
    let job = h
        .store
        .enqueue(image_job(user, "retired-provider", 1))
        .await
        .unwrap()
        .job;

    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Succeeded);
    assert_eq!(generator.calls(), 1);
    let assets = h.store.list_by_job(job.id).await.unwrap();
    assert_eq!(assets[0].provider_metadata["resolved_provider"], "gemini");
}

// ---------------------------------------------------------------------------
// Races with the stale-job reaper
// ---------------------------------------------------------------------------

/// Fail every RUNNING job shortly after the dispatcher has claimed it.
fn reap_after(store: Arc<InMemoryStore>, delay: Duration) -> tokio::task::JoinHandle<u64> {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        store.fail_stale(Duration::ZERO).await.unwrap()
    })
}

#[tokio::test]
async fn reaped_job_keeps_no_assets() {
    let h = harness(registry_with(Arc::new(Gauge::new(Duration::from_millis(300))), false));
    let user = h.store.add_user("reaped@example.com", Plan::Pro, 10).await;
    let job = h.store.enqueue(image_job(user, "gemini", 2)).await.unwrap().job;

    let reaper = reap_after(h.store.clone(), Duration::from_millis(100));
    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reaper.await.unwrap(), 1);

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.assets_persisted, 0);

    let stored = h.store.job(job.id).await.unwrap();
    assert_eq!(stored.status(), Some(JobStatus::Failed));
    assert_eq!(stored.error_message.as_deref(), Some(STALE_JOB_MESSAGE));
    assert!(h.store.list_by_job(job.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reaped_job_is_not_refunded() {
    let mut h = harness(registry_with(
        Arc::new(Gauge::failing(Duration::from_millis(300))),
        false,
    ));
    h.dispatcher = h.dispatcher.with_refund_on_failure(true);
    let user = h.store.add_user("noref@example.com", Plan::Pro, 10).await;
    let job = h.store.enqueue(image_job(user, "gemini", 2)).await.unwrap().job;

    let reaper = reap_after(h.store.clone(), Duration::from_millis(100));
    let outcome = h
        .dispatcher
        .dispatch_once(&CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reaper.await.unwrap(), 1);

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(h.store.user(user).await.unwrap().quota_used_today, 2);
    assert_eq!(
        h.store.job(job.id).await.unwrap().error_message.as_deref(),
        Some(STALE_JOB_MESSAGE)
    );
}

// ---------------------------------------------------------------------------
// Polling and shutdown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn empty_queue_yields_nothing() {
    let h = harness(registry_with(Arc::new(SyntheticImageGenerator), false));
    assert_eq!(
        h.dispatcher
            .dispatch_once(&CancellationToken::new())
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn cancelling_an_in_flight_job_marks_it_failed() {
    let h = harness(registry_with(Arc::new(Hangs), false));
    let user = h.store.add_user("shutdown@example.com", Plan::Pro, 10).await;
    let job = h.store.enqueue(image_job(user, "hangs", 1)).await.unwrap().job;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), h.dispatcher.dispatch_once(&cancel))
        .await
        .expect("dispatcher should stop promptly")
        .unwrap()
        .unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.error.as_deref(), Some(SHUTDOWN_MESSAGE));

    let stored = h.store.job(job.id).await.unwrap();
    assert_eq!(stored.status(), Some(JobStatus::Failed));
    assert_eq!(stored.error_message.as_deref(), Some(SHUTDOWN_MESSAGE));
}

#[tokio::test]
async fn shutdown_grace_is_shared_across_dispatchers() {
    let stuck: Vec<_> = (0..3)
        .map(|_| tokio::spawn(tokio::time::sleep(Duration::from_secs(3600))))
        .collect();

    let started = std::time::Instant::now();
    assert!(!join_with_grace(stuck, Duration::from_millis(100)).await);
    assert!(started.elapsed() < Duration::from_millis(250));

    let quick: Vec<_> = (0..3)
        .map(|_| tokio::spawn(tokio::time::sleep(Duration::from_millis(10))))
        .collect();
    assert!(join_with_grace(quick, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn run_loop_drains_the_queue_until_cancelled() {
    let h = Arc::new(harness(registry_with(
        Arc::new(FailNth::new("gemini", None)),
        false,
    )));
    let user = h.store.add_user("loop@example.com", Plan::Business, 50).await;

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(h.store.enqueue(image_job(user, "gemini", 2)).await.unwrap().job.id);
    }

    let cancel = CancellationToken::new();
    let runner = {
        let h = Arc::clone(&h);
        let cancel = cancel.clone();
        tokio::spawn(async move { h.dispatcher.run(cancel).await })
    };

    let all_done = async {
        loop {
            let mut done = 0;
            for id in &ids {
                if h.store.job(*id).await.unwrap().status() == Some(JobStatus::Succeeded) {
                    done += 1;
                }
            }
            if done == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    tokio::time::timeout(Duration::from_secs(5), all_done)
        .await
        .expect("queue should drain");

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .expect("run loop should exit on cancel")
        .unwrap();
}
