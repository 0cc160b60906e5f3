use std::time::{Duration, Instant};

use reqwest::Client;
use serde::Deserialize;

use crate::dispatch::{ImageRequest, RemoteImage};
use crate::error::ImagecastError;

const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

/// Upper bound for a single synchronous generation call.
pub const SYNC_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

const GENERATIONS_PATH: &str = "/images/generations";

#[derive(Clone)]
pub struct HttpDispatch {
    client: Client,
}

#[derive(Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Deserialize)]
struct ImageData {
    url: Option<String>,
}

impl Default for HttpDispatch {
    fn default() -> Self {
        Self::new()
    }
}

/// Append the OpenAI-style generations path unless the base already names it.
pub fn generations_url(base_url: &str) -> String {
    if base_url.contains(GENERATIONS_PATH) {
        base_url.to_string()
    } else {
        format!("{}{GENERATIONS_PATH}", base_url.trim_end_matches('/'))
    }
}

impl HttpDispatch {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .expect("failed to build HTTP client");

        Self { client }
    }

    pub async fn query_model(
        &self,
        req: &ImageRequest,
        provider: &str,
        base_url: &str,
        api_key: &str,
    ) -> Result<RemoteImage, ImagecastError> {
        let start = Instant::now();

        // Check for expired deadline before making the request
        let timeout = req.remaining()?.min(SYNC_REQUEST_TIMEOUT);

        let body = serde_json::json!({
            "model": req.model,
            "prompt": req.prompt,
            "size": req.size.sync_token(),
            "n": 1,
        });

        let response = self
            .client
            .post(generations_url(base_url))
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json")
            .timeout(timeout)
            .json(&body)
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ImagecastError::RateLimited {
                provider: provider.to_string(),
            });
        }

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ImagecastError::AuthFailed {
                provider: provider.to_string(),
                message: format!("{status}"),
            });
        }

        // Catch-all for any non-success status. The body goes into the error
        // for diagnostics, capped at MAX_RESPONSE_BYTES.
        if !status.is_success() {
            let error_bytes = response.bytes().await.unwrap_or_default();
            let truncated = &error_bytes[..error_bytes.len().min(MAX_RESPONSE_BYTES)];
            let text = String::from_utf8_lossy(truncated);
            return Err(ImagecastError::Upstream {
                provider: provider.to_string(),
                message: format!("{status}: {text}"),
                status: Some(status.as_u16()),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ImagecastError::Upstream {
                provider: provider.to_string(),
                message: format!("failed to read response body: {e}"),
                status: None,
            })?;

        if bytes.len() > MAX_RESPONSE_BYTES {
            return Err(ImagecastError::Upstream {
                provider: provider.to_string(),
                message: format!(
                    "response too large: {} bytes (max {})",
                    bytes.len(),
                    MAX_RESPONSE_BYTES
                ),
                status: None,
            });
        }

        let url = parse_images_response(&bytes).map_err(|message| ImagecastError::Upstream {
            provider: provider.to_string(),
            message,
            status: None,
        })?;

        let latency_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(provider = provider, latency_ms = latency_ms, "sync generation returned");

        Ok(RemoteImage {
            url,
            model: req.model.clone(),
            latency_ms,
        })
    }
}

/// Extract the first image URL from a `{"data": [{"url": ...}]}` reply.
/// The error string carries the raw body for diagnostics.
pub fn parse_images_response(body: &[u8]) -> Result<String, String> {
    let parsed: ImagesResponse = serde_json::from_slice(body).map_err(|e| {
        format!(
            "failed to parse response: {e}: {}",
            String::from_utf8_lossy(body)
        )
    })?;

    parsed
        .data
        .into_iter()
        .next()
        .and_then(|d| d.url)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| format!("no image returned: {}", String::from_utf8_lossy(body)))
}
