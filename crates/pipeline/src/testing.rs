//! Scripted generators for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use adcraft_core::generation::{GenerationRequest, MediaKind};
use adcraft_providers::{GeneratedMedia, Generator, GeneratorError, MediaPayload};
use async_trait::async_trait;

pub fn media(provider: &str, kind: MediaKind) -> GeneratedMedia {
    GeneratedMedia {
        kind,
        payload: MediaPayload::Url(format!("https://cdn.example.com/{provider}.png")),
        format: "png".to_string(),
        width: Some(64),
        height: Some(64),
        provider: provider.to_string(),
        metadata: serde_json::json!({}),
    }
}

/// Replays a fixed sequence of outcomes and records every request it sees.
/// Once the script is exhausted every call succeeds.
pub struct ScriptedGenerator {
    name: String,
    kind: MediaKind,
    script: Mutex<VecDeque<Result<(), GeneratorError>>>,
    delay: Option<Duration>,
    call_timeout: Option<Duration>,
    pub seen: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedGenerator {
    pub fn new(name: &str, kind: MediaKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            script: Mutex::new(VecDeque::new()),
            delay: None,
            call_timeout: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_with(self, errors: impl IntoIterator<Item = GeneratorError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .extend(errors.into_iter().map(Err));
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedMedia, GeneratorError> {
        self.seen.lock().unwrap().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Err(e)) => Err(e),
            _ => Ok(media(&self.name, self.kind)),
        }
    }
}
