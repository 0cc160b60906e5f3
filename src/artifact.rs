//! Download a remote image and place it under the output root.
//!
//! Layout: `{root}/{YYYY-MM-DD}/{provider}/{HHMMSS}.png`. Downstream consumers
//! (static file serving, the record store) depend on this exact scheme.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use futures_util::StreamExt;
use reqwest::Client;

use crate::error::ImagecastError;

/// Default cap on a downloaded image.
pub const DEFAULT_MAX_ARTIFACT_BYTES: usize = 32 * 1024 * 1024;

/// Default timeout for the whole download.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(60);

/// Atomic counter for unique temp filenames.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Deterministic location of an artifact produced at `at` by `provider`.
pub fn artifact_path(root: &Path, provider: &str, at: NaiveDateTime) -> PathBuf {
    root.join(at.format("%Y-%m-%d").to_string())
        .join(provider)
        .join(format!("{}.png", at.format("%H%M%S")))
}

#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
    client: Client,
    timeout: Duration,
    max_bytes: usize,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build download HTTP client");
        Self {
            root: root.into(),
            client,
            timeout: DEFAULT_DOWNLOAD_TIMEOUT,
            max_bytes: DEFAULT_MAX_ARTIFACT_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Persist using the current local time for the path.
    pub async fn persist_now(&self, provider: &str, url: &str) -> Result<PathBuf, ImagecastError> {
        self.persist(provider, Local::now().naive_local(), url).await
    }

    /// Fetch `url` fully into memory, then write it to the artifact path for
    /// (`provider`, `at`). Nothing is written unless the whole body arrived.
    pub async fn persist(
        &self,
        provider: &str,
        at: NaiveDateTime,
        url: &str,
    ) -> Result<PathBuf, ImagecastError> {
        let data = self.fetch(url).await?;

        let path = artifact_path(&self.root, provider, at);
        if let Some(dir) = path.parent() {
            // create_dir_all succeeds when a concurrent task created it first
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                ImagecastError::ArtifactPersist(format!("create {}: {e}", dir.display()))
            })?;
        }

        write_atomic(&path, &data).await.map_err(|e| {
            ImagecastError::ArtifactPersist(format!("write {}: {e}", path.display()))
        })?;

        tracing::info!(
            provider = provider,
            path = %path.display(),
            bytes = data.len(),
            "artifact persisted"
        );

        Ok(path)
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>, ImagecastError> {
        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ImagecastError::ArtifactPersist(format!("download failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ImagecastError::ArtifactPersist(format!(
                "download returned HTTP {status}"
            )));
        }

        if resp
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(ImagecastError::ArtifactPersist(format!(
                "image exceeds {} bytes",
                self.max_bytes
            )));
        }

        let mut data = Vec::new();
        let mut stream = resp.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| ImagecastError::ArtifactPersist(format!("download interrupted: {e}")))?;
            if data.len() + chunk.len() > self.max_bytes {
                return Err(ImagecastError::ArtifactPersist(format!(
                    "image exceeds {} bytes",
                    self.max_bytes
                )));
            }
            data.extend_from_slice(&chunk);
        }

        if data.is_empty() {
            return Err(ImagecastError::ArtifactPersist(
                "download returned an empty body".to_string(),
            ));
        }

        Ok(data)
    }
}

/// Atomic write: temp file + rename prevents partial reads.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<(), std::io::Error> {
    let seq = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let tmp_path = path.with_extension(format!("png.{}.{seq}.tmp", std::process::id()));
    tokio::fs::write(&tmp_path, data).await?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(e);
    }
    Ok(())
}
