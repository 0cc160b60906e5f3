use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::dispatch::ImageSize;
use crate::dispatch::async_poll::{DASHSCOPE_DEFAULT_BASE_URL, MODELSCOPE_DEFAULT_BASE_URL};
use crate::dispatch::registry::{
    AsyncPollProviderType, PollPolicy, ProtocolMode, ProviderDescriptor, ProviderRegistry,
};
use crate::error::ImagecastError;
use crate::publish::PublishRegistry;
use crate::publish::platforms::{MultipartPlatform, PendingPlatform, SessionPlatform};

/// Env var naming the config file.
pub const CONFIG_PATH_ENV: &str = "IMAGECAST_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "imagecast.toml";

const DEFAULT_WIDTH: u32 = 1024;
const DEFAULT_HEIGHT: u32 = 2048;
/// Per-generation deadline. It also caps the poll budget of async providers,
/// so it must stay above the longest default budget (ModelScope, 3s x 60)
/// plus submit and download latency.
pub const DEFAULT_TIMEOUT_SECS: u64 = 240;
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 60;

/// On-disk shape of the config file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub output_dir: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub providers: Vec<ProviderConfig>,
    pub publish: PublishConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolName {
    Sync,
    #[serde(alias = "aliyun")]
    Dashscope,
    Modelscope,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub key: String,
    pub name: Option<String>,
    /// Environment variable holding the credential.
    pub env_key: Option<String>,
    /// Literal credential; the env var wins when both are set.
    pub api_key: Option<String>,
    pub url: Option<String>,
    pub model: String,
    pub protocol: ProtocolName,
    /// `false` keeps the provider listed but never invoked.
    pub enabled: Option<bool>,
    #[serde(default)]
    pub description: String,
    pub poll_interval_ms: Option<u64>,
    pub max_poll_attempts: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub xiaohongshu: SessionPublishConfig,
    pub douyin: TogglePublishConfig,
    pub bilibili: SessionPublishConfig,
    pub custom: Vec<CustomPublishConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SessionPublishConfig {
    pub enabled: bool,
    pub mcp_url: Option<String>,
    #[serde(alias = "cookie")]
    pub cookies: String,
    pub x_sec_token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct TogglePublishConfig {
    pub enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct CustomPublishConfig {
    pub key: String,
    pub name: Option<String>,
    pub url: String,
    pub auth_header: Option<String>,
}

/// Resolved runtime configuration.
#[derive(Debug)]
pub struct Config {
    pub output_dir: PathBuf,
    pub default_size: ImageSize,
    pub timeout: Duration,
    pub download_timeout: Duration,
    pub providers: Vec<ProviderDescriptor>,
    pub publish: PublishConfig,
}

impl Config {
    /// Load from `$IMAGECAST_CONFIG` (or `imagecast.toml`), resolving
    /// credentials from the process environment. A missing file means the
    /// built-in provider table.
    pub fn load() -> Result<Self, ImagecastError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(Path::new(&path))
    }

    pub fn load_from(path: &Path) -> Result<Self, ImagecastError> {
        let file: FileConfig = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| {
                ImagecastError::Config(format!("failed to read {}: {e}", path.display()))
            })?;
            tracing::info!(path = %path.display(), "loaded config file");
            toml::from_str(&text).map_err(|e| {
                ImagecastError::Config(format!("failed to parse {}: {e}", path.display()))
            })?
        } else {
            tracing::warn!(path = %path.display(), "config file not found, using built-in providers");
            FileConfig::default()
        };
        Self::resolve(file, |name| std::env::var(name).ok())
    }

    pub fn from_toml_str(
        text: &str,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ImagecastError> {
        let file: FileConfig =
            toml::from_str(text).map_err(|e| ImagecastError::Config(e.to_string()))?;
        Self::resolve(file, env)
    }

    /// Apply defaults and resolve credentials through `env`.
    pub fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ImagecastError> {
        let default_size = ImageSize::new(
            file.width.unwrap_or(DEFAULT_WIDTH),
            file.height.unwrap_or(DEFAULT_HEIGHT),
        )
        .map_err(|e| ImagecastError::Config(e.user_message()))?;

        let output_dir = file.output_dir.unwrap_or_else(|| match env("HOME") {
            Some(home) => PathBuf::from(home).join("generated_images"),
            None => PathBuf::from("generated_images"),
        });

        let provider_configs = if file.providers.is_empty() {
            builtin_providers()
        } else {
            file.providers
        };

        let mut providers = Vec::with_capacity(provider_configs.len());
        for pc in provider_configs {
            providers.push(resolve_provider(pc, &env)?);
        }

        let enabled = providers.iter().filter(|p| p.is_enabled()).count();
        for p in &providers {
            if p.is_enabled() {
                tracing::info!(provider = p.key, name = p.name, protocol = p.protocol.name(), "provider enabled");
            } else {
                tracing::warn!(provider = p.key, "no credential set, provider unavailable");
            }
        }
        if enabled == 0 {
            tracing::error!("no providers configured with credentials, generation unavailable");
        }

        Ok(Config {
            output_dir,
            default_size,
            timeout: Duration::from_secs(file.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
            download_timeout: Duration::from_secs(
                file.download_timeout_secs
                    .unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            ),
            providers,
            publish: file.publish,
        })
    }

    pub fn provider_registry(&self) -> ProviderRegistry {
        ProviderRegistry::from_descriptors(self.providers.iter().cloned())
    }

    /// Build publish targets for every enabled platform section.
    pub fn publish_registry(&self) -> PublishRegistry {
        let mut registry = PublishRegistry::new();
        let p = &self.publish;

        if p.xiaohongshu.enabled {
            registry.register(Arc::new(SessionPlatform::new(
                "xiaohongshu",
                "Xiaohongshu",
                p.xiaohongshu.mcp_url.clone(),
                p.xiaohongshu.cookies.clone(),
                p.xiaohongshu.x_sec_token.clone(),
            )));
        }
        if p.douyin.enabled {
            registry.register(Arc::new(PendingPlatform::new("douyin", "Douyin")));
        }
        if p.bilibili.enabled {
            registry.register(Arc::new(PendingPlatform::new("bilibili", "Bilibili")));
        }
        for custom in &p.custom {
            registry.register(Arc::new(MultipartPlatform::new(
                custom.key.clone(),
                custom.name.clone().unwrap_or_else(|| custom.key.clone()),
                custom.url.clone(),
                custom.auth_header.clone(),
            )));
        }

        registry
    }
}

fn resolve_provider(
    pc: ProviderConfig,
    env: &impl Fn(&str) -> Option<String>,
) -> Result<ProviderDescriptor, ImagecastError> {
    if pc.key.trim().is_empty() {
        return Err(ImagecastError::Config("provider key must not be empty".to_string()));
    }

    let credential = pc
        .env_key
        .as_deref()
        .and_then(env)
        .filter(|k| !k.trim().is_empty())
        .or_else(|| pc.api_key.clone())
        .unwrap_or_default();
    let api_key = if pc.enabled == Some(false) {
        String::new()
    } else {
        credential
    };

    let protocol = match pc.protocol {
        ProtocolName::Sync => ProtocolMode::Sync,
        ProtocolName::Dashscope => async_mode(AsyncPollProviderType::DashScope, &pc)?,
        ProtocolName::Modelscope => async_mode(AsyncPollProviderType::ModelScope, &pc)?,
    };

    let base_url = match (pc.url, pc.protocol) {
        (Some(url), _) if !url.trim().is_empty() => url,
        (_, ProtocolName::Dashscope) => DASHSCOPE_DEFAULT_BASE_URL.to_string(),
        (_, ProtocolName::Modelscope) => MODELSCOPE_DEFAULT_BASE_URL.to_string(),
        (_, ProtocolName::Sync) => {
            return Err(ImagecastError::Config(format!(
                "provider {} needs a url",
                pc.key
            )));
        }
    };

    Ok(ProviderDescriptor {
        name: pc.name.unwrap_or_else(|| pc.key.clone()),
        key: pc.key,
        api_key,
        base_url,
        model: pc.model,
        protocol,
        description: pc.description,
    })
}

fn async_mode(
    api: AsyncPollProviderType,
    pc: &ProviderConfig,
) -> Result<ProtocolMode, ImagecastError> {
    let defaults = api.default_poll_policy();
    let max_attempts = pc.max_poll_attempts.unwrap_or(defaults.max_attempts);
    if max_attempts == 0 {
        return Err(ImagecastError::Config(format!(
            "provider {}: max_poll_attempts must be at least 1",
            pc.key
        )));
    }
    Ok(ProtocolMode::AsyncPoll {
        api,
        poll: PollPolicy {
            interval: pc
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),
            max_attempts,
        },
    })
}

fn builtin(
    key: &str,
    name: &str,
    env_key: &str,
    url: &str,
    model: &str,
    protocol: ProtocolName,
    description: &str,
) -> ProviderConfig {
    ProviderConfig {
        key: key.to_string(),
        name: Some(name.to_string()),
        env_key: Some(env_key.to_string()),
        api_key: None,
        url: Some(url.to_string()),
        model: model.to_string(),
        protocol,
        enabled: None,
        description: description.to_string(),
        poll_interval_ms: None,
        max_poll_attempts: None,
    }
}

/// Providers available without a config file, enabled by their env vars.
pub fn builtin_providers() -> Vec<ProviderConfig> {
    vec![
        builtin(
            "siliconflow",
            "SiliconFlow",
            "SILICONFLOW_API_KEY",
            "https://api.siliconflow.cn/v1",
            "Kwai-Kolors/Kolors",
            ProtocolName::Sync,
            "OpenAI-compatible image endpoint, answers inline",
        ),
        builtin(
            "openai",
            "OpenAI",
            "OPENAI_API_KEY",
            "https://api.openai.com/v1",
            "dall-e-3",
            ProtocolName::Sync,
            "OpenAI images API",
        ),
        builtin(
            "aliyun",
            "Aliyun Bailian",
            "DASHSCOPE_API_KEY",
            DASHSCOPE_DEFAULT_BASE_URL,
            "wanx2.1-t2i-turbo",
            ProtocolName::Dashscope,
            "DashScope text2image, task + polling",
        ),
        builtin(
            "modelscope",
            "ModelScope",
            "MODELSCOPE_API_KEY",
            MODELSCOPE_DEFAULT_BASE_URL,
            "Qwen/Qwen-Image",
            ProtocolName::Modelscope,
            "ModelScope inference API, task + polling",
        ),
    ]
}
