use std::sync::Arc;
use std::time::Duration;

use adcraft_core::generation::MediaKind;
use adcraft_db::store::PgStore;
use adcraft_pipeline::limiter::GenerationLimiter;
use adcraft_pipeline::registry::{parse_fallbacks, ProviderRegistry};
use adcraft_pipeline::storage::LocalAssetStorage;
use adcraft_worker::config::WorkerConfig;
use adcraft_worker::dispatcher::{join_with_grace, JobDispatcher};
use adcraft_worker::reaper;
use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for dispatchers to finalize in-flight jobs.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adcraft_worker=debug,adcraft_pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    tracing::info!(
        concurrency = config.concurrency,
        poll_interval_ms = config.poll_interval.as_millis() as u64,
        max_concurrent_generations = config.max_concurrent_generations,
        refund_on_failure = config.refund_on_failure,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = adcraft_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    adcraft_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    adcraft_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Providers ---
    let http = reqwest::Client::builder()
        .user_agent(concat!("adcraft-worker/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")?;

    let fallbacks =
        parse_fallbacks(&config.provider_fallbacks).context("Invalid PROVIDER_FALLBACKS")?;
    let registry = ProviderRegistry::builder()
        .with_builtin_generators(
            http,
            config.gemini_api_key.clone(),
            config.openai_api_key.clone(),
        )
        .fallbacks(fallbacks)
        .default_provider(MediaKind::Image, config.default_image_provider.clone())
        .default_provider(MediaKind::Video, config.default_video_provider.clone())
        .call_timeout(config.generation_timeout)
        .build()
        .context("Invalid provider configuration")?;
    let registry = Arc::new(registry);

    if config.gemini_api_key.is_none() {
        tracing::warn!("GEMINI_API_KEY not set; gemini and veo will fall back");
    }
    if config.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; openai will fall back");
    }

    // --- Dispatchers ---
    let store = Arc::new(PgStore::new(pool));
    let storage = Arc::new(LocalAssetStorage::new(&config.asset_storage_dir));
    let limiter = GenerationLimiter::new(config.max_concurrent_generations);
    let cancel = CancellationToken::new();

    let mut handles = Vec::with_capacity(config.concurrency);
    for id in 0..config.concurrency {
        let dispatcher = JobDispatcher::new(
            store.clone(),
            store.clone(),
            Arc::clone(&registry),
            storage.clone(),
        )
        .with_id(id)
        .with_limiter(limiter.clone())
        .with_poll_interval(config.poll_interval)
        .with_refund_on_failure(config.refund_on_failure);

        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { dispatcher.run(cancel).await }));
    }
    tracing::info!(count = config.concurrency, "Dispatchers started");

    let reaper_handle = tokio::spawn(reaper::run(
        store.clone(),
        config.stale_job_timeout,
        config.reaper_interval,
        cancel.clone(),
    ));

    shutdown_signal().await;
    tracing::info!("Shutdown signal received, stopping dispatchers");
    cancel.cancel();

    if !join_with_grace(handles, SHUTDOWN_GRACE).await {
        tracing::warn!("Dispatchers did not stop within the grace period");
    }
    let _ = tokio::time::timeout(Duration::from_secs(5), reaper_handle).await;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
