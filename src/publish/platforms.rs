use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::multipart::{Form, Part};

use crate::error::ImagecastError;
use crate::publish::{PublishAdapter, PublishCapability};

const PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// Reply bodies beyond this are not inspected for a destination URL.
const MAX_REPLY_BYTES: usize = 64 * 1024;

/// Local publishing bridge used when none is configured.
pub const DEFAULT_SESSION_API_URL: &str = "http://127.0.0.1:18060/mcp";

fn publish_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .timeout(PUBLISH_TIMEOUT)
        .build()
        .expect("failed to build publish HTTP client")
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Multipart body with `image`, `title` and `content` parts.
async fn image_form(
    platform: &str,
    artifact: &Path,
    title: &str,
    content: &str,
) -> Result<Form, ImagecastError> {
    let data = tokio::fs::read(artifact).await.map_err(|e| ImagecastError::Publish {
        platform: platform.to_string(),
        message: format!("failed to read {}: {e}", artifact.display()),
    })?;
    let file_name = artifact
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image.png".to_string());
    let part = Part::bytes(data)
        .file_name(file_name)
        .mime_str(mime_for(artifact))?;

    Ok(Form::new()
        .part("image", part)
        .text("title", title.to_string())
        .text("content", content.to_string()))
}

/// Pull a destination reference out of a JSON reply (`url`, `data.url`, or
/// `note_url`), falling back to a plain confirmation.
pub fn destination_from_reply(body: &[u8]) -> String {
    let body = &body[..body.len().min(MAX_REPLY_BYTES)];
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["/url", "/data/url", "/note_url"]
                .iter()
                .find_map(|ptr| v.pointer(ptr).and_then(|u| u.as_str()).map(str::to_string))
        })
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| "published".to_string())
}

/// Read at most `limit` bytes of a reply body, dropping the rest.
async fn read_capped(resp: reqwest::Response, limit: usize) -> Result<Vec<u8>, reqwest::Error> {
    let mut body = Vec::new();
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let take = chunk.len().min(limit - body.len());
        body.extend_from_slice(&chunk[..take]);
        if body.len() >= limit {
            break;
        }
    }
    Ok(body)
}

async fn send_form(
    platform: &str,
    request: reqwest::RequestBuilder,
) -> Result<String, ImagecastError> {
    let resp = request.send().await?;
    let status = resp.status();
    let body = match read_capped(resp, MAX_REPLY_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(platform = platform, status = status.as_u16(), "failed to read publish reply: {e}");
            Vec::new()
        }
    };
    if status.is_client_error() || status.is_server_error() {
        let preview = String::from_utf8_lossy(&body[..body.len().min(512)]).into_owned();
        return Err(ImagecastError::Publish {
            platform: platform.to_string(),
            message: format!("HTTP {status}: {preview}"),
        });
    }
    Ok(destination_from_reply(&body))
}

// ---------------------------------------------------------------------------
// Cookie / session-token platform (e.g. Xiaohongshu through a local bridge)
// ---------------------------------------------------------------------------

pub struct SessionPlatform {
    key: String,
    name: String,
    api_url: String,
    cookies: String,
    sec_token: String,
    client: Client,
}

impl SessionPlatform {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        api_url: Option<String>,
        cookies: impl Into<String>,
        sec_token: impl Into<String>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            api_url: api_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_SESSION_API_URL.to_string()),
            cookies: cookies.into(),
            sec_token: sec_token.into(),
            client: publish_client(),
        }
    }

    pub fn publish_url(&self) -> String {
        format!("{}/publish", self.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl PublishAdapter for SessionPlatform {
    fn platform(&self) -> &str {
        &self.key
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> PublishCapability {
        PublishCapability {
            has_credentials: !self.cookies.is_empty() || !self.sec_token.is_empty(),
            implemented: true,
        }
    }

    async fn publish(
        &self,
        artifact: &Path,
        title: &str,
        content: &str,
    ) -> Result<String, ImagecastError> {
        let form = image_form(&self.key, artifact, title, content).await?;
        let mut request = self.client.post(self.publish_url()).multipart(form);
        if !self.cookies.is_empty() {
            request = request.header("Cookie", &self.cookies);
        }
        if !self.sec_token.is_empty() {
            request = request.header("X-Sec-Token", &self.sec_token);
        }
        send_form(&self.key, request).await
    }
}

impl std::fmt::Debug for SessionPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPlatform")
            .field("key", &self.key)
            .field("api_url", &self.api_url)
            .field("cookies", &"[REDACTED]")
            .field("sec_token", &"[REDACTED]")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Placeholder for platforms without an integration yet
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PendingPlatform {
    key: String,
    name: String,
}

impl PendingPlatform {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl PublishAdapter for PendingPlatform {
    fn platform(&self) -> &str {
        &self.key
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> PublishCapability {
        PublishCapability {
            has_credentials: false,
            implemented: false,
        }
    }

    async fn publish(
        &self,
        artifact: &Path,
        _title: &str,
        _content: &str,
    ) -> Result<String, ImagecastError> {
        tracing::info!(platform = self.key, artifact = %artifact.display(), "publishing not implemented");
        Ok(format!("{} publishing is in development", self.name))
    }
}

// ---------------------------------------------------------------------------
// Generic multipart upload to an arbitrary endpoint
// ---------------------------------------------------------------------------

pub struct MultipartPlatform {
    key: String,
    name: String,
    api_url: String,
    auth_header: Option<String>,
    client: Client,
}

impl MultipartPlatform {
    pub fn new(
        key: impl Into<String>,
        name: impl Into<String>,
        api_url: impl Into<String>,
        auth_header: Option<String>,
    ) -> Self {
        Self {
            key: key.into(),
            name: name.into(),
            api_url: api_url.into(),
            auth_header: auth_header.filter(|h| !h.is_empty()),
            client: publish_client(),
        }
    }
}

#[async_trait]
impl PublishAdapter for MultipartPlatform {
    fn platform(&self) -> &str {
        &self.key
    }

    fn display_name(&self) -> &str {
        &self.name
    }

    fn capability(&self) -> PublishCapability {
        PublishCapability {
            has_credentials: self.auth_header.is_some(),
            implemented: true,
        }
    }

    async fn publish(
        &self,
        artifact: &Path,
        title: &str,
        content: &str,
    ) -> Result<String, ImagecastError> {
        if self.api_url.trim().is_empty() {
            return Err(ImagecastError::Config(format!(
                "no API URL configured for {}",
                self.key
            )));
        }
        let form = image_form(&self.key, artifact, title, content).await?;
        let mut request = self.client.post(&self.api_url).multipart(form);
        if let Some(auth) = &self.auth_header {
            request = request.header("Authorization", auth);
        }
        send_form(&self.key, request).await
    }
}

impl std::fmt::Debug for MultipartPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultipartPlatform")
            .field("key", &self.key)
            .field("api_url", &self.api_url)
            .field("auth_header", &self.auth_header.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}
