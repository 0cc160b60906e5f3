//! Publish a persisted artifact to downstream platforms.
//!
//! Same shape as generation: a registry of adapters keyed by platform, invoked
//! for one or many targets, each target's result collected on its own.

pub mod platforms;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::{Id as TaskId, JoinSet};

use crate::error::ImagecastError;
use crate::generate::OutcomeStatus;

/// What a target can do with the configuration it was given.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct PublishCapability {
    /// Session cookie, token, or auth header present.
    pub has_credentials: bool,
    /// False for placeholders that only report a fixed message.
    pub implemented: bool,
}

/// A downstream platform that turns a local artifact into a destination reference.
#[async_trait]
pub trait PublishAdapter: Send + Sync {
    /// Registry key, e.g. "xiaohongshu".
    fn platform(&self) -> &str;

    fn display_name(&self) -> &str;

    fn capability(&self) -> PublishCapability;

    /// Publish the file at `artifact`. Returns a destination URL or a
    /// platform-provided confirmation.
    async fn publish(
        &self,
        artifact: &Path,
        title: &str,
        content: &str,
    ) -> Result<String, ImagecastError>;
}

#[derive(Debug, Serialize, Clone)]
pub struct PublishOutcome {
    pub platform: String,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishOutcome {
    fn succeeded(platform: &str, result: String) -> Self {
        Self {
            platform: platform.to_string(),
            status: OutcomeStatus::Success,
            result: Some(result),
            error: None,
        }
    }

    fn failed(platform: &str, error: String) -> Self {
        Self {
            platform: platform.to_string(),
            status: OutcomeStatus::Error,
            result: None,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

/// Listing entry for a registered target.
#[derive(Debug, Serialize, Clone)]
pub struct PublishTargetInfo {
    pub platform: String,
    pub name: String,
    pub capability: PublishCapability,
}

#[derive(Default)]
pub struct PublishRegistry {
    adapters: HashMap<String, Arc<dyn PublishAdapter>>,
    order: Vec<String>,
}

impl PublishRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the adapter for its platform key.
    pub fn register(&mut self, adapter: Arc<dyn PublishAdapter>) {
        let key = adapter.platform().to_string();
        tracing::info!(platform = key, name = adapter.display_name(), "publish target registered");
        if self.adapters.insert(key.clone(), adapter).is_none() {
            self.order.push(key);
        }
    }

    pub fn get(&self, platform: &str) -> Option<&Arc<dyn PublishAdapter>> {
        self.adapters.get(platform)
    }

    /// Registered platform keys in registration order.
    pub fn platforms(&self) -> Vec<String> {
        self.order.clone()
    }

    pub fn list(&self) -> Vec<PublishTargetInfo> {
        self.order
            .iter()
            .filter_map(|k| self.adapters.get(k))
            .map(|a| PublishTargetInfo {
                platform: a.platform().to_string(),
                name: a.display_name().to_string(),
                capability: a.capability(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Publish to one platform. Never fails: errors land in the outcome.
    pub async fn dispatch(
        &self,
        platform: &str,
        artifact: &Path,
        title: &str,
        content: &str,
    ) -> PublishOutcome {
        let Some(adapter) = self.adapters.get(platform) else {
            return PublishOutcome::failed(
                platform,
                ImagecastError::PlatformNotFound {
                    platform: platform.to_string(),
                }
                .user_message(),
            );
        };
        if let Err(e) = check_artifact(artifact).await {
            return PublishOutcome::failed(platform, e.to_string());
        }

        // Own task so an adapter panic ends up in the outcome
        let adapter = adapter.clone();
        let artifact = artifact.to_path_buf();
        let title = title.to_string();
        let content = content.to_string();
        let handle = tokio::spawn(async move {
            run_adapter(adapter.as_ref(), &artifact, &title, &content).await
        });
        match handle.await {
            Ok(outcome) => outcome,
            Err(join_err) => {
                tracing::error!(platform = platform, "publish task ended abnormally: {join_err}");
                PublishOutcome::failed(platform, format!("publish task aborted: {join_err}"))
            }
        }
    }

    /// Publish to several platforms concurrently. An empty list means every
    /// registered platform. The map holds exactly one outcome per requested key.
    pub async fn dispatch_many(
        &self,
        platforms: &[String],
        artifact: &Path,
        title: &str,
        content: &str,
    ) -> BTreeMap<String, PublishOutcome> {
        let requested: Vec<String> = if platforms.is_empty() {
            self.platforms()
        } else {
            let mut seen = HashSet::new();
            platforms
                .iter()
                .filter(|p| seen.insert((*p).clone()))
                .cloned()
                .collect()
        };

        let mut results = BTreeMap::new();

        if let Err(e) = check_artifact(artifact).await {
            let message = e.to_string();
            for platform in requested {
                results.insert(platform.clone(), PublishOutcome::failed(&platform, message.clone()));
            }
            return results;
        }

        let mut set = JoinSet::new();
        let mut task_platform_map: HashMap<TaskId, String> = HashMap::new();

        for platform in requested {
            let Some(adapter) = self.adapters.get(&platform).cloned() else {
                let message = ImagecastError::PlatformNotFound {
                    platform: platform.clone(),
                }
                .user_message();
                results.insert(platform.clone(), PublishOutcome::failed(&platform, message));
                continue;
            };

            let artifact: PathBuf = artifact.to_path_buf();
            let title = title.to_string();
            let content = content.to_string();
            let abort_handle = set.spawn(async move {
                run_adapter(adapter.as_ref(), &artifact, &title, &content).await
            });
            task_platform_map.insert(abort_handle.id(), platform);
        }

        while let Some(join_result) = set.join_next().await {
            match join_result {
                Ok(outcome) => {
                    results.insert(outcome.platform.clone(), outcome);
                }
                Err(join_err) => {
                    tracing::error!("publish task ended abnormally: {join_err}");
                    if let Some(platform) = task_platform_map.get(&join_err.id()) {
                        results.insert(
                            platform.clone(),
                            PublishOutcome::failed(platform, format!("publish task aborted: {join_err}")),
                        );
                    }
                }
            }
        }

        let ok = results.values().filter(|o| o.is_success()).count();
        tracing::info!(successes = ok, targets = results.len(), "publish batch finished");

        results
    }
}

async fn check_artifact(artifact: &Path) -> Result<(), ImagecastError> {
    match tokio::fs::metadata(artifact).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(ImagecastError::InvalidRequest(format!(
            "artifact is not a file: {}",
            artifact.display()
        ))),
        Err(e) => Err(ImagecastError::InvalidRequest(format!(
            "artifact not found: {}: {e}",
            artifact.display()
        ))),
    }
}

async fn run_adapter(
    adapter: &dyn PublishAdapter,
    artifact: &Path,
    title: &str,
    content: &str,
) -> PublishOutcome {
    let platform = adapter.platform();
    tracing::info!(platform = platform, artifact = %artifact.display(), "publishing");
    match adapter.publish(artifact, title, content).await {
        Ok(result) => PublishOutcome::succeeded(platform, result),
        Err(e) => {
            tracing::warn!(platform = platform, "publish failed: {e}");
            PublishOutcome::failed(platform, e.to_string())
        }
    }
}
