//! Validated job submission.
//!
//! Everything that can be rejected without touching the database is checked
//! here: task type, provider name, aspect ratio and the prompt payload. The
//! quota reservation and insert then happen atomically in
//! [`JobStore::enqueue`].

use std::sync::Arc;

use adcraft_core::error::CoreError;
use adcraft_core::generation::{GenerationRequest, TaskType, DEFAULT_ASPECT_RATIO};
use adcraft_core::plans::{clamp_quantity, Plan};
use adcraft_core::types::DbId;
use adcraft_db::error::StoreError;
use adcraft_db::models::job::{Enqueued, NewJob};
use adcraft_db::store::JobStore;

use crate::registry::ProviderRegistry;

#[derive(Debug, thiserror::Error)]
pub enum EnqueueError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Daily quota exceeded: requested {requested}, {remaining} remaining")]
    QuotaExceeded { requested: i32, remaining: i32 },

    #[error(transparent)]
    Store(StoreError),
}

impl From<CoreError> for EnqueueError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => Self::Validation(msg),
            other => Self::Store(StoreError::Core(other)),
        }
    }
}

/// A generation request as submitted by an authenticated user.
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub user_id: DbId,
    /// The caller's plan, used to clamp `quantity`. The store re-checks the
    /// cap against the persisted plan inside the reservation transaction.
    pub plan: Plan,
    pub task_type: String,
    pub provider: Option<String>,
    pub quantity: i32,
    pub aspect_ratio: Option<String>,
    pub prompt: serde_json::Value,
}

/// Front door of the pipeline.
pub struct EnqueueService {
    store: Arc<dyn JobStore>,
    registry: Arc<ProviderRegistry>,
}

impl EnqueueService {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self { store, registry }
    }

    /// Validate `request` into the row that will be inserted.
    pub fn prepare(&self, request: EnqueueRequest) -> Result<NewJob, EnqueueError> {
        let task_type = TaskType::from_name(request.task_type.trim())?;
        let kind = task_type.media_kind();

        let provider = match request.provider.as_deref().map(str::trim) {
            None | Some("") => self.registry.default_for(kind).to_string(),
            Some(name) if self.registry.contains(kind, name) => name.to_string(),
            Some(name) => {
                return Err(EnqueueError::Validation(format!(
                    "Provider '{name}' is not available for {kind}. Available: {}",
                    self.registry.names(kind).join(", ")
                )));
            }
        };

        let aspect_ratio = request
            .aspect_ratio
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_ASPECT_RATIO)
            .to_string();

        // Decoding here catches malformed payloads before any quota is spent.
        GenerationRequest::from_payload(kind, &aspect_ratio, &request.prompt)?;

        Ok(NewJob {
            user_id: request.user_id,
            task_type,
            provider,
            quantity: clamp_quantity(request.quantity, request.plan),
            aspect_ratio,
            prompt: request.prompt,
        })
    }

    /// Validate, reserve quota and insert a `QUEUED` job.
    pub async fn enqueue(&self, request: EnqueueRequest) -> Result<Enqueued, EnqueueError> {
        let job = self.prepare(request)?;
        let requested = job.quantity;
        let user_id = job.user_id;

        match self.store.enqueue(job).await {
            Ok(enqueued) => {
                tracing::info!(
                    job_id = %enqueued.job.id,
                    user_id,
                    provider = %enqueued.job.provider,
                    quantity = enqueued.job.quantity,
                    remaining_quota = enqueued.remaining_quota,
                    "Generation job accepted",
                );
                Ok(enqueued)
            }
            Err(StoreError::QuotaExceeded { remaining }) => {
                tracing::info!(user_id, requested, remaining, "Generation job rejected: quota exceeded");
                Err(EnqueueError::QuotaExceeded {
                    requested,
                    remaining,
                })
            }
            Err(StoreError::Core(core)) => Err(core.into()),
            Err(e) => Err(EnqueueError::Store(e)),
        }
    }
}
