use std::time::{Duration, Instant};

use reqwest::Client;
use serde_json::Value;

use crate::dispatch::registry::{AsyncPollProviderType, PollPolicy};
use crate::dispatch::{ImageRequest, ImageSize, RemoteImage};
use crate::error::ImagecastError;

/// Max response body size for submit and poll replies.
const MAX_POLL_RESPONSE_BYTES: usize = 1024 * 1024;

/// Upper bound for the task-creation call.
const SUBMIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upper bound for a single status request.
const POLL_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Canonical task state, whatever vocabulary the provider speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

/// A submitted task as seen by the loop that polls it.
#[derive(Debug)]
pub struct PollableTask {
    pub task_id: String,
    pub provider: String,
    status: TaskStatus,
    attempts: u32,
}

impl PollableTask {
    pub fn new(task_id: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            provider: provider.into(),
            status: TaskStatus::Pending,
            attempts: 0,
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Record one consumed poll attempt. `None` means the attempt produced no
    /// classification (transport blip, non-success reply) and leaves the status
    /// as it was. Terminal states are sticky: later observations are ignored.
    pub fn record(&mut self, observed: Option<TaskStatus>) -> TaskStatus {
        if self.status.is_terminal() {
            return self.status;
        }
        self.attempts += 1;
        if let Some(status) = observed {
            self.status = status;
        }
        self.status
    }

    /// Mark the attempt budget as exhausted.
    pub fn time_out(&mut self) -> TaskStatus {
        if !self.status.is_terminal() {
            self.status = TaskStatus::TimedOut;
        }
        self.status
    }
}

/// Where a provider keeps each field of its task replies (JSON pointers) and
/// which status tokens mean what. Tokens not listed in any set classify as Pending.
#[derive(Debug)]
pub struct StatusTable {
    pub task_id_pointer: &'static str,
    pub status_pointer: &'static str,
    pub results_pointer: &'static str,
    /// Key of the URL inside each result object; None when results are bare strings.
    pub result_url_key: Option<&'static str>,
    pub message_pointer: &'static str,
    pub succeeded: &'static [&'static str],
    pub failed: &'static [&'static str],
    pub running: &'static [&'static str],
}

impl StatusTable {
    pub fn classify(&self, status: Option<&str>) -> TaskStatus {
        match status {
            Some(s) if self.succeeded.contains(&s) => TaskStatus::Succeeded,
            Some(s) if self.failed.contains(&s) => TaskStatus::Failed,
            Some(s) if self.running.contains(&s) => TaskStatus::Running,
            _ => TaskStatus::Pending,
        }
    }

    pub fn first_result_url(&self, v: &Value) -> Option<String> {
        v.pointer(self.results_pointer)?
            .as_array()?
            .iter()
            .filter_map(|item| match self.result_url_key {
                Some(key) => item.get(key).and_then(Value::as_str),
                None => item.as_str(),
            })
            .find(|url| !url.is_empty())
            .map(str::to_string)
    }
}

/// One parsed status reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSnapshot {
    pub status: TaskStatus,
    pub raw_status: Option<String>,
    pub url: Option<String>,
    pub message: Option<String>,
}

impl PollSnapshot {
    fn pending() -> Self {
        Self {
            status: TaskStatus::Pending,
            raw_status: None,
            url: None,
            message: None,
        }
    }
}

/// Provider-specific request building for submit-and-poll APIs. Response
/// parsing is driven by `status_table()`.
pub trait AsyncPollApi: Send + Sync {
    fn status_table(&self) -> &'static StatusTable;

    /// Build the task-creation request. Returns (url, headers, body).
    fn build_submit_request(
        &self,
        base_url: &str,
        prompt: &str,
        model: &str,
        api_key: &str,
        size: &ImageSize,
        size_explicit: bool,
    ) -> (String, Vec<(String, String)>, Value);

    /// Build the status request. Returns (url, headers).
    fn build_poll_request(
        &self,
        base_url: &str,
        task_id: &str,
        api_key: &str,
    ) -> (String, Vec<(String, String)>);

    fn parse_submit_response(&self, body: &[u8]) -> Result<String, ImagecastError> {
        let table = self.status_table();
        let v: Value = serde_json::from_slice(body)
            .map_err(|e| ImagecastError::SchemaParse(format!("submit response: {e}")))?;
        v.pointer(table.task_id_pointer)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ImagecastError::SchemaParse(format!(
                    "submit response missing task id at {}: {}",
                    table.task_id_pointer,
                    String::from_utf8_lossy(body)
                ))
            })
    }

    /// Unparseable bodies classify as Pending so an empty or garbled reply
    /// costs one attempt instead of the whole task.
    fn parse_poll_response(&self, body: &[u8]) -> PollSnapshot {
        let table = self.status_table();
        let Ok(v) = serde_json::from_slice::<Value>(body) else {
            return PollSnapshot::pending();
        };
        let raw_status = v
            .pointer(table.status_pointer)
            .and_then(Value::as_str)
            .map(str::to_string);
        PollSnapshot {
            status: table.classify(raw_status.as_deref()),
            url: table.first_result_url(&v),
            message: v
                .pointer(table.message_pointer)
                .and_then(Value::as_str)
                .map(str::to_string),
            raw_status,
        }
    }
}

fn bearer(api_key: &str) -> (String, String) {
    ("Authorization".to_string(), format!("Bearer {api_key}"))
}

// ---------------------------------------------------------------------------
// DashScope (Alibaba Cloud) text2image
// ---------------------------------------------------------------------------

pub const DASHSCOPE_DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/api/v1";

static DASHSCOPE_TABLE: StatusTable = StatusTable {
    task_id_pointer: "/output/task_id",
    status_pointer: "/output/task_status",
    results_pointer: "/output/results",
    result_url_key: Some("url"),
    message_pointer: "/output/message",
    succeeded: &["SUCCEEDED"],
    failed: &["FAILED", "CANCELED"],
    running: &["RUNNING"],
};

pub struct DashScopeApi;

impl AsyncPollApi for DashScopeApi {
    fn status_table(&self) -> &'static StatusTable {
        &DASHSCOPE_TABLE
    }

    fn build_submit_request(
        &self,
        base_url: &str,
        prompt: &str,
        model: &str,
        api_key: &str,
        size: &ImageSize,
        _size_explicit: bool,
    ) -> (String, Vec<(String, String)>, Value) {
        let url = format!(
            "{}/services/aigc/text2image/image-synthesis",
            base_url.trim_end_matches('/')
        );
        let headers = vec![
            bearer(api_key),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-DashScope-Async".to_string(), "enable".to_string()),
        ];
        let body = serde_json::json!({
            "model": model,
            "input": {"prompt": prompt},
            "parameters": {
                "size": size.token_with('*'),
                "n": 1,
            },
        });
        (url, headers, body)
    }

    fn build_poll_request(
        &self,
        base_url: &str,
        task_id: &str,
        api_key: &str,
    ) -> (String, Vec<(String, String)>) {
        let url = format!("{}/tasks/{task_id}", base_url.trim_end_matches('/'));
        (url, vec![bearer(api_key)])
    }
}

// ---------------------------------------------------------------------------
// ModelScope image generation
// ---------------------------------------------------------------------------

pub const MODELSCOPE_DEFAULT_BASE_URL: &str = "https://api-inference.modelscope.cn";

static MODELSCOPE_TABLE: StatusTable = StatusTable {
    task_id_pointer: "/task_id",
    status_pointer: "/task_status",
    results_pointer: "/output_images",
    result_url_key: None,
    message_pointer: "/errors/message",
    succeeded: &["SUCCEED"],
    failed: &["FAILED"],
    running: &["RUNNING", "PROCESSING"],
};

pub struct ModelScopeApi;

impl AsyncPollApi for ModelScopeApi {
    fn status_table(&self) -> &'static StatusTable {
        &MODELSCOPE_TABLE
    }

    fn build_submit_request(
        &self,
        base_url: &str,
        prompt: &str,
        model: &str,
        api_key: &str,
        size: &ImageSize,
        size_explicit: bool,
    ) -> (String, Vec<(String, String)>, Value) {
        let url = format!("{}/v1/images/generations", base_url.trim_end_matches('/'));
        let headers = vec![
            bearer(api_key),
            ("Content-Type".to_string(), "application/json".to_string()),
            ("X-ModelScope-Async-Mode".to_string(), "true".to_string()),
        ];
        let mut body = serde_json::json!({
            "model": model,
            "prompt": prompt,
        });
        // The service picks its own default size unless asked for one.
        if size_explicit {
            body["size"] = Value::String(size.to_string());
        }
        (url, headers, body)
    }

    fn build_poll_request(
        &self,
        base_url: &str,
        task_id: &str,
        api_key: &str,
    ) -> (String, Vec<(String, String)>) {
        let url = format!("{}/v1/tasks/{task_id}", base_url.trim_end_matches('/'));
        let headers = vec![
            bearer(api_key),
            (
                "X-ModelScope-Task-Type".to_string(),
                "image_generation".to_string(),
            ),
        ];
        (url, headers)
    }
}

// ---------------------------------------------------------------------------
// Async Poll Dispatcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AsyncPollDispatch {
    client: Client,
}

impl Default for AsyncPollDispatch {
    fn default() -> Self {
        Self::new()
    }
}

impl AsyncPollDispatch {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .expect("failed to build async-poll HTTP client");
        Self { client }
    }

    pub fn api_for(provider_type: AsyncPollProviderType) -> Box<dyn AsyncPollApi> {
        match provider_type {
            AsyncPollProviderType::DashScope => Box::new(DashScopeApi),
            AsyncPollProviderType::ModelScope => Box::new(ModelScopeApi),
        }
    }

    pub async fn query_model(
        &self,
        req: &ImageRequest,
        provider: &str,
        provider_type: AsyncPollProviderType,
        base_url: &str,
        api_key: &str,
        policy: PollPolicy,
    ) -> Result<RemoteImage, ImagecastError> {
        let api = Self::api_for(provider_type);
        let start = Instant::now();

        let task_id = self.submit(&*api, req, provider, base_url, api_key).await?;
        let url = self
            .poll_until_terminal(&*api, &task_id, provider, base_url, api_key, policy, req.deadline)
            .await?;

        Ok(RemoteImage {
            url,
            model: req.model.clone(),
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Create the remote task and return its provider-assigned id.
    pub async fn submit(
        &self,
        api: &dyn AsyncPollApi,
        req: &ImageRequest,
        provider: &str,
        base_url: &str,
        api_key: &str,
    ) -> Result<String, ImagecastError> {
        let timeout = req.remaining()?.min(SUBMIT_TIMEOUT);

        let (url, headers, body) = api.build_submit_request(
            base_url,
            &req.prompt,
            &req.model,
            api_key,
            &req.size,
            req.size_explicit,
        );

        let mut submit_req = self.client.post(&url);
        for (k, v) in &headers {
            submit_req = submit_req.header(k, v);
        }

        let resp = submit_req.timeout(timeout).json(&body).send().await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ImagecastError::AuthFailed {
                provider: provider.to_string(),
                message: format!("HTTP {status}"),
            });
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ImagecastError::RateLimited {
                provider: provider.to_string(),
            });
        }

        let bytes = resp.bytes().await?;
        if !status.is_success() {
            let truncated = &bytes[..bytes.len().min(MAX_POLL_RESPONSE_BYTES)];
            return Err(ImagecastError::Upstream {
                provider: provider.to_string(),
                message: format!(
                    "task submission failed with HTTP {status}: {}",
                    String::from_utf8_lossy(truncated)
                ),
                status: Some(status.as_u16()),
            });
        }
        if bytes.len() > MAX_POLL_RESPONSE_BYTES {
            return Err(ImagecastError::Upstream {
                provider: provider.to_string(),
                message: format!("submit response too large: {} bytes", bytes.len()),
                status: None,
            });
        }

        let task_id = api.parse_submit_response(&bytes)?;

        tracing::info!(
            provider = provider,
            model = req.model,
            task_id = task_id,
            "generation task submitted"
        );

        Ok(task_id)
    }

    /// Poll at a fixed interval until the task reaches a terminal state, the
    /// attempt budget runs out, or the deadline passes. Returns the first
    /// result URL on success.
    pub async fn poll_until_terminal(
        &self,
        api: &dyn AsyncPollApi,
        task_id: &str,
        provider: &str,
        base_url: &str,
        api_key: &str,
        policy: PollPolicy,
        deadline: Instant,
    ) -> Result<String, ImagecastError> {
        let start = Instant::now();
        let mut task = PollableTask::new(task_id, provider);

        while task.attempts() < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;

            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                tracing::warn!(
                    provider = provider,
                    task_id = task_id,
                    attempts = task.attempts(),
                    "deadline passed while polling"
                );
                break;
            };

            let (url, headers) = api.build_poll_request(base_url, task_id, api_key);
            let mut poll_req = self.client.get(&url);
            for (k, v) in &headers {
                poll_req = poll_req.header(k, v);
            }

            let resp = match poll_req
                .timeout(remaining.min(POLL_REQUEST_TIMEOUT))
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    task.record(None);
                    tracing::warn!(
                        provider = provider,
                        task_id = task_id,
                        attempt = task.attempts(),
                        "poll request failed: {e}"
                    );
                    continue;
                }
            };

            // Auth failures during poll are not transient, fail fast
            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                return Err(ImagecastError::AuthFailed {
                    provider: provider.to_string(),
                    message: format!("poll HTTP {status}"),
                });
            }

            if !status.is_success() {
                task.record(None);
                tracing::warn!(
                    provider = provider,
                    task_id = task_id,
                    attempt = task.attempts(),
                    status = status.as_u16(),
                    "poll returned non-success status"
                );
                continue;
            }

            let body = match resp.bytes().await {
                Ok(body) => body,
                Err(e) => {
                    task.record(None);
                    tracing::warn!(
                        provider = provider,
                        task_id = task_id,
                        attempt = task.attempts(),
                        "failed to read poll body: {e}"
                    );
                    continue;
                }
            };

            if body.len() > MAX_POLL_RESPONSE_BYTES {
                return Err(ImagecastError::Upstream {
                    provider: provider.to_string(),
                    message: format!("poll response too large: {} bytes", body.len()),
                    status: None,
                });
            }

            let snapshot = api.parse_poll_response(&body);
            match task.record(Some(snapshot.status)) {
                TaskStatus::Succeeded => {
                    tracing::info!(
                        provider = provider,
                        task_id = task_id,
                        attempts = task.attempts(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "generation task succeeded"
                    );
                    return snapshot.url.ok_or_else(|| ImagecastError::Upstream {
                        provider: provider.to_string(),
                        message: format!(
                            "task succeeded without an image URL: {}",
                            String::from_utf8_lossy(&body)
                        ),
                        status: None,
                    });
                }
                TaskStatus::Failed => {
                    let message = snapshot
                        .message
                        .or(snapshot.raw_status)
                        .unwrap_or_else(|| "task failed".to_string());
                    tracing::warn!(
                        provider = provider,
                        task_id = task_id,
                        attempts = task.attempts(),
                        "generation task failed: {message}"
                    );
                    return Err(ImagecastError::TaskFailed {
                        provider: provider.to_string(),
                        task_id: task_id.to_string(),
                        message,
                    });
                }
                other => {
                    tracing::debug!(
                        provider = provider,
                        task_id = task_id,
                        attempt = task.attempts(),
                        status = other.as_str(),
                        raw_status = snapshot.raw_status.as_deref().unwrap_or(""),
                        "task still in progress"
                    );
                }
            }
        }

        task.time_out();
        tracing::warn!(
            provider = provider,
            task_id = task_id,
            attempts = task.attempts(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "generation task timed out"
        );
        Err(ImagecastError::TaskTimedOut {
            provider: provider.to_string(),
            task_id: task_id.to_string(),
            attempts: task.attempts(),
        })
    }
}
