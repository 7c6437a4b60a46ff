use std::path::PathBuf;
use std::time::Duration;

use adcraft_core::providers::{DEFAULT_FALLBACKS, PROVIDER_GEMINI, PROVIDER_VEO};
use adcraft_pipeline::storage::DEFAULT_STORAGE_DIR;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}': expected {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Worker configuration loaded from environment variables.
///
/// All fields except `database_url` have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    /// Number of dispatcher tasks in this process.
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Bound on a single provider call.
    pub generation_timeout: Duration,
    /// Process-wide cap on simultaneous provider calls (0 = unlimited).
    pub max_concurrent_generations: usize,
    /// Return reserved quota when a job fails.
    pub refund_on_failure: bool,
    pub default_image_provider: String,
    pub default_video_provider: String,
    /// Raw `provider:fallback` list, validated when the registry is built.
    pub provider_fallbacks: String,
    pub gemini_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub asset_storage_dir: PathBuf,
    pub stale_job_timeout: Duration,
    pub reaper_interval: Duration,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                      | Default                                          |
    /// |------------------------------|--------------------------------------------------|
    /// | `DATABASE_URL`               | required                                         |
    /// | `WORKER_CONCURRENCY`         | `2`                                              |
    /// | `POLL_INTERVAL_MS`           | `1000`                                           |
    /// | `GENERATION_TIMEOUT_SECS`    | `60`                                             |
    /// | `MAX_CONCURRENT_GENERATIONS` | `8`                                              |
    /// | `QUOTA_REFUND_ON_FAILURE`    | `false`                                          |
    /// | `DEFAULT_IMAGE_PROVIDER`     | `gemini`                                         |
    /// | `DEFAULT_VIDEO_PROVIDER`     | `veo`                                            |
    /// | `PROVIDER_FALLBACKS`         | `gemini:openai,openai:synthetic,veo:synthetic-video` |
    /// | `GEMINI_API_KEY`             | unset                                            |
    /// | `OPENAI_API_KEY`             | unset                                            |
    /// | `ASSET_STORAGE_DIR`          | `./storage/assets`                               |
    /// | `STALE_JOB_TIMEOUT_SECS`     | `1800`                                           |
    /// | `REAPER_INTERVAL_SECS`       | `60`                                             |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup. Blank values are
    /// treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let concurrency = parse_positive(&get, "WORKER_CONCURRENCY", 2)?;

        Ok(Self {
            database_url,
            concurrency: concurrency as usize,
            poll_interval: Duration::from_millis(parse_number(&get, "POLL_INTERVAL_MS", 1000)?),
            generation_timeout: Duration::from_secs(parse_positive(
                &get,
                "GENERATION_TIMEOUT_SECS",
                60,
            )?),
            max_concurrent_generations: parse_number(&get, "MAX_CONCURRENT_GENERATIONS", 8)?
                as usize,
            refund_on_failure: parse_bool(&get, "QUOTA_REFUND_ON_FAILURE", false)?,
            default_image_provider: get("DEFAULT_IMAGE_PROVIDER")
                .unwrap_or_else(|| PROVIDER_GEMINI.into()),
            default_video_provider: get("DEFAULT_VIDEO_PROVIDER")
                .unwrap_or_else(|| PROVIDER_VEO.into()),
            provider_fallbacks: get("PROVIDER_FALLBACKS")
                .unwrap_or_else(|| DEFAULT_FALLBACKS.into()),
            gemini_api_key: get("GEMINI_API_KEY"),
            openai_api_key: get("OPENAI_API_KEY"),
            asset_storage_dir: get("ASSET_STORAGE_DIR")
                .unwrap_or_else(|| DEFAULT_STORAGE_DIR.into())
                .into(),
            stale_job_timeout: Duration::from_secs(parse_positive(
                &get,
                "STALE_JOB_TIMEOUT_SECS",
                1800,
            )?),
            reaper_interval: Duration::from_secs(parse_positive(&get, "REAPER_INTERVAL_SECS", 60)?),
        })
    }
}

fn parse_number(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match get(key) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid {
            key,
            value,
            expected: "a non-negative integer",
        }),
    }
}

/// Like [`parse_number`], but zero is rejected. Used for counts and
/// periods where zero would stall or panic the worker.
fn parse_positive(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    match parse_number(get, key, default)? {
        0 => Err(ConfigError::Invalid {
            key,
            value: "0".into(),
            expected: "a positive integer",
        }),
        n => Ok(n),
    }
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, ConfigError> {
    match get(key).map(|v| v.to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => Ok(true),
        Some(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => Ok(false),
        Some(value) => Err(ConfigError::Invalid {
            key,
            value,
            expected: "a boolean",
        }),
    }
}
