use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::task::{Id as TaskId, JoinSet};

use crate::artifact::ArtifactStore;
use crate::dispatch::registry::{ProviderDescriptor, ProviderRegistry};
use crate::dispatch::{ImageRequest, ImageSize, ProviderDispatch};
use crate::error::ImagecastError;

/// Maximum prompt length accepted from callers.
pub const MAX_PROMPT_CHARS: usize = 4000;

/// One generation call as received from a caller.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    /// Target provider key; None means every enabled provider.
    pub provider: Option<String>,
    /// `WIDTHxHEIGHT` override of the configured default size.
    pub size: Option<String>,
    /// Model override of the provider's default model.
    pub model: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Error,
}

/// Result of one provider attempt.
#[derive(Debug, Serialize, Clone)]
pub struct GenerationOutcome {
    pub provider: String,
    pub provider_name: String,
    pub model: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
}

impl GenerationOutcome {
    fn succeeded(
        entry: &ProviderDescriptor,
        model: String,
        path: PathBuf,
        url: String,
        started_at: DateTime<Local>,
    ) -> Self {
        Self {
            provider: entry.key.clone(),
            provider_name: entry.name.clone(),
            model,
            status: OutcomeStatus::Success,
            artifact_path: Some(path),
            remote_url: Some(url),
            error: None,
            reason: None,
            started_at,
            finished_at: Local::now(),
        }
    }

    fn failed(
        entry: &ProviderDescriptor,
        model: String,
        error: String,
        reason: &str,
        started_at: DateTime<Local>,
    ) -> Self {
        Self {
            provider: entry.key.clone(),
            provider_name: entry.name.clone(),
            model,
            status: OutcomeStatus::Error,
            artifact_path: None,
            remote_url: None,
            error: Some(error),
            reason: Some(reason.to_string()),
            started_at,
            finished_at: Local::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Runs generation requests against one provider, all providers in parallel,
/// or providers in order until one succeeds.
///
/// Unlike a bare `ProviderDispatch` call, every attempt here ends in a
/// persisted artifact or a failed outcome: adapter errors never escape.
#[derive(Clone)]
pub struct GenerationOrchestrator {
    registry: Arc<ProviderRegistry>,
    dispatch: ProviderDispatch,
    store: ArtifactStore,
    default_size: ImageSize,
    timeout: Duration,
}

impl GenerationOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        store: ArtifactStore,
        default_size: ImageSize,
        timeout: Duration,
    ) -> Self {
        Self {
            registry,
            dispatch: ProviderDispatch::new(),
            store,
            default_size,
            timeout,
        }
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    /// Default entry point: a named provider runs alone, otherwise fan out.
    pub async fn generate(
        &self,
        req: &GenerationRequest,
    ) -> Result<Vec<GenerationOutcome>, ImagecastError> {
        match req.provider.as_deref().filter(|p| !p.trim().is_empty()) {
            Some(provider) => Ok(vec![self.generate_one(provider, req).await?]),
            None => self.generate_fan_out(req).await,
        }
    }

    /// Generate with a single provider. Only lookup and validation errors are
    /// returned as Err; adapter failures come back as a failed outcome.
    pub async fn generate_one(
        &self,
        provider: &str,
        req: &GenerationRequest,
    ) -> Result<GenerationOutcome, ImagecastError> {
        let (size, size_explicit) = self.validate(req)?;
        let entry = self.registry.lookup(provider)?;
        let image_req = self.image_request(entry, req, size, size_explicit);
        Ok(attempt(&self.dispatch, &self.store, entry, &image_req).await)
    }

    /// Run every enabled provider concurrently and wait for all of them.
    /// Returns exactly one outcome per enabled provider, in completion order.
    pub async fn generate_fan_out(
        &self,
        req: &GenerationRequest,
    ) -> Result<Vec<GenerationOutcome>, ImagecastError> {
        let (size, size_explicit) = self.validate(req)?;
        let start = Instant::now();
        let targets: Vec<ProviderDescriptor> =
            self.registry.enabled().into_iter().cloned().collect();

        if targets.is_empty() {
            tracing::warn!("fan-out requested but no providers are enabled");
            return Ok(vec![]);
        }

        tracing::info!(providers = targets.len(), "starting fan-out generation");

        let mut set = JoinSet::new();

        // Task ID → provider for panic attribution
        let mut task_provider_map: HashMap<TaskId, ProviderDescriptor> = HashMap::new();

        for entry in &targets {
            let image_req = self.image_request(entry, req, size, size_explicit);
            let dispatch = self.dispatch.clone();
            let store = self.store.clone();
            let task_entry = entry.clone();

            let abort_handle = set.spawn(async move {
                attempt(&dispatch, &store, &task_entry, &image_req).await
            });
            task_provider_map.insert(abort_handle.id(), entry.clone());
        }

        let mut results = Vec::with_capacity(targets.len());
        let mut completed: HashSet<String> = HashSet::new();

        while let Some(join_result) = set.join_next().await {
            match join_result {
                Ok(outcome) => {
                    completed.insert(outcome.provider.clone());
                    results.push(outcome);
                }
                Err(join_err) => {
                    tracing::error!("generation task ended abnormally: {join_err}");
                    if let Some(entry) = task_provider_map.get(&join_err.id()) {
                        let model = req.model.clone().unwrap_or_else(|| entry.model.clone());
                        let reason = if join_err.is_panic() { "panic" } else { "cancelled" };
                        completed.insert(entry.key.clone());
                        results.push(GenerationOutcome::failed(
                            entry,
                            model,
                            format!("task {reason}: {join_err}"),
                            reason,
                            Local::now(),
                        ));
                    }
                }
            }
        }

        // Every spawned provider must be represented, even if its task vanished
        for entry in &targets {
            if !completed.contains(&entry.key) {
                let model = req.model.clone().unwrap_or_else(|| entry.model.clone());
                results.push(GenerationOutcome::failed(
                    entry,
                    model,
                    "task did not report a result".to_string(),
                    "lost",
                    Local::now(),
                ));
            }
        }

        let successes = results.iter().filter(|o| o.is_success()).count();
        tracing::info!(
            successes = successes,
            attempted = results.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "fan-out generation finished"
        );

        Ok(results)
    }

    /// Try enabled providers one at a time in registry order and stop at the
    /// first success. Returns AllFailed when none succeed.
    pub async fn generate_first_success(
        &self,
        req: &GenerationRequest,
    ) -> Result<GenerationOutcome, ImagecastError> {
        let (size, size_explicit) = self.validate(req)?;
        let mut errors = Vec::new();

        for entry in self.registry.enabled() {
            let image_req = self.image_request(entry, req, size, size_explicit);
            let outcome = attempt(&self.dispatch, &self.store, entry, &image_req).await;
            if outcome.is_success() {
                return Ok(outcome);
            }
            tracing::info!(provider = entry.key, "falling back to next provider");
            errors.push((
                entry.key.clone(),
                outcome.error.unwrap_or_else(|| "unknown error".to_string()),
            ));
        }

        Err(ImagecastError::AllFailed {
            attempted: errors.len(),
            errors,
        })
    }

    fn validate(&self, req: &GenerationRequest) -> Result<(ImageSize, bool), ImagecastError> {
        let prompt = req.prompt.trim();
        if prompt.is_empty() {
            return Err(ImagecastError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }
        if prompt.chars().count() > MAX_PROMPT_CHARS {
            return Err(ImagecastError::InvalidRequest(format!(
                "prompt exceeds {MAX_PROMPT_CHARS} characters"
            )));
        }
        match req.size.as_deref().filter(|s| !s.trim().is_empty()) {
            Some(s) => Ok((ImageSize::parse(s)?, true)),
            None => Ok((self.default_size, false)),
        }
    }

    fn image_request(
        &self,
        entry: &ProviderDescriptor,
        req: &GenerationRequest,
        size: ImageSize,
        size_explicit: bool,
    ) -> ImageRequest {
        let model = req
            .model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or(&entry.model)
            .to_string();
        ImageRequest {
            prompt: req.prompt.trim().to_string(),
            model,
            size,
            size_explicit,
            timeout: self.timeout,
            deadline: Instant::now() + self.timeout,
        }
    }
}

/// Fetch from one provider and persist the result. Never fails: errors are
/// folded into the outcome.
async fn attempt(
    dispatch: &ProviderDispatch,
    store: &ArtifactStore,
    entry: &ProviderDescriptor,
    req: &ImageRequest,
) -> GenerationOutcome {
    let started_at = Local::now();
    tracing::info!(provider = entry.key, model = req.model, "generation started");

    let result = match dispatch.fetch_remote(entry, req).await {
        Ok(remote) => {
            tracing::info!(
                provider = entry.key,
                latency_ms = remote.latency_ms,
                "remote image ready"
            );
            store
                .persist_now(&entry.key, &remote.url)
                .await
                .map(|path| (remote, path))
        }
        Err(e) => Err(e),
    };

    match result {
        Ok((remote, path)) => {
            GenerationOutcome::succeeded(entry, remote.model, path, remote.url, started_at)
        }
        Err(e) => {
            tracing::warn!(provider = entry.key, reason = e.reason(), "generation failed: {e}");
            GenerationOutcome::failed(entry, req.model.clone(), e.to_string(), e.reason(), started_at)
        }
    }
}
