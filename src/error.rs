use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImagecastError {
    #[error("provider not found or disabled: {provider}")]
    ProviderNotFound {
        provider: String,
        suggestions: Vec<String>,
    },

    #[error("platform not registered: {platform}")]
    PlatformNotFound { platform: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),

    #[error("rate limited by {provider}")]
    RateLimited { provider: String },

    #[error("upstream error from {provider}: {message}")]
    Upstream {
        provider: String,
        message: String,
        status: Option<u16>,
    },

    #[error("auth failed for {provider}: {message}")]
    AuthFailed { provider: String, message: String },

    #[error("schema parse error: {0}")]
    SchemaParse(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("task {task_id} failed for {provider}: {message}")]
    TaskFailed {
        provider: String,
        task_id: String,
        message: String,
    },

    #[error("task {task_id} for {provider} still unfinished after {attempts} polls")]
    TaskTimedOut {
        provider: String,
        task_id: String,
        attempts: u32,
    },

    #[error("failed to persist artifact: {0}")]
    ArtifactPersist(String),

    #[error("publish to {platform} failed: {message}")]
    Publish { platform: String, message: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("all {attempted} providers failed")]
    AllFailed {
        attempted: usize,
        /// (provider key, error detail) in the order the providers were tried.
        errors: Vec<(String, String)>,
    },
}

impl ImagecastError {
    /// Extract provider name from structured error variants.
    /// Returns None for variants that don't carry provider context.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::ProviderNotFound { provider, .. } => Some(provider),
            Self::RateLimited { provider } => Some(provider),
            Self::Upstream { provider, .. } => Some(provider),
            Self::AuthFailed { provider, .. } => Some(provider),
            Self::TaskFailed { provider, .. } => Some(provider),
            Self::TaskTimedOut { provider, .. } => Some(provider),
            _ => None,
        }
    }

    /// Returns true for transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::Timeout(_) => true,
            Self::Upstream { status, .. } => {
                // 5xx = server error (retryable), 4xx = client error (not retryable)
                // status: None = malformed payload, not retryable
                status.is_some_and(|s| s >= 500)
            }
            Self::Request(_) => true,
            Self::TaskTimedOut { .. } => true,
            _ => false,
        }
    }

    /// Short machine-readable class used in outcomes and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::ProviderNotFound { .. } => "provider_not_found",
            Self::PlatformNotFound { .. } => "platform_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Timeout(_) => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Upstream { .. } => "upstream",
            Self::AuthFailed { .. } => "auth_failed",
            Self::SchemaParse(_) => "parse_error",
            Self::Request(_) => "transport",
            Self::TaskFailed { .. } => "task_failed",
            Self::TaskTimedOut { .. } => "task_timed_out",
            Self::ArtifactPersist(_) => "artifact_persist",
            Self::Publish { .. } => "publish",
            Self::Config(_) => "config",
            Self::AllFailed { .. } => "all_failed",
        }
    }

    /// Produce a sanitized error message safe for returning to tool clients.
    /// Does not leak internal URLs, task ids, or upstream error bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::ProviderNotFound {
                provider,
                suggestions,
            } => {
                if suggestions.is_empty() {
                    format!("provider not found or disabled: {provider}")
                } else {
                    format!(
                        "provider not found or disabled: {provider}. Did you mean: {}?",
                        suggestions.join(", ")
                    )
                }
            }
            Self::PlatformNotFound { platform } => format!("unsupported platform: {platform}"),
            Self::InvalidRequest(msg) => msg.clone(),
            Self::Timeout(ms) => format!("request timed out after {ms}ms"),
            Self::RateLimited { provider } => {
                format!("rate limited by {provider}, try again shortly")
            }
            Self::Upstream { provider, status, .. } => match status {
                Some(code) => format!("{provider} rejected the request (HTTP {code})"),
                None => format!("{provider} returned an unusable response"),
            },
            Self::AuthFailed { provider, .. } => {
                format!("authentication failed for {provider}")
            }
            Self::SchemaParse(_) => "failed to parse provider response".to_string(),
            Self::Request(_) => "request to provider failed".to_string(),
            Self::TaskFailed { provider, .. } => format!("generation task failed for {provider}"),
            Self::TaskTimedOut { provider, attempts, .. } => {
                format!("generation task for {provider} did not finish after {attempts} polls")
            }
            Self::ArtifactPersist(_) => "failed to download or save the image".to_string(),
            Self::Publish { platform, message } => format!("publish to {platform} failed: {message}"),
            Self::Config(msg) => format!("configuration error: {msg}"),
            Self::AllFailed { attempted, .. } => {
                if *attempted == 0 {
                    "no providers enabled".to_string()
                } else {
                    format!("all {attempted} providers failed")
                }
            }
        }
    }
}
