use std::collections::HashMap;
use std::time::Duration;

use crate::error::ImagecastError;

/// Discriminant for task-submission + polling providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncPollProviderType {
    /// Alibaba Cloud DashScope text2image (`X-DashScope-Async: enable`).
    DashScope,
    /// ModelScope image generation (`X-ModelScope-Async-Mode: true`).
    ModelScope,
}

impl AsyncPollProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DashScope => "dashscope",
            Self::ModelScope => "modelscope",
        }
    }

    /// Interval and attempt cap used when the config doesn't override them.
    pub fn default_poll_policy(&self) -> PollPolicy {
        match self {
            Self::DashScope => PollPolicy {
                interval: Duration::from_secs(2),
                max_attempts: 30,
            },
            Self::ModelScope => PollPolicy {
                interval: Duration::from_secs(3),
                max_attempts: 60,
            },
        }
    }
}

/// Fixed-interval polling budget for one task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// How a provider answers a generation request. Prevents invalid states
/// (e.g., a sync provider carrying a poll policy).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolMode {
    /// One request, image URL inline in the reply.
    Sync,
    /// Submit a task, then poll its status until terminal.
    AsyncPoll {
        api: AsyncPollProviderType,
        poll: PollPolicy,
    },
}

impl ProtocolMode {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::AsyncPoll { .. } => "async_poll",
        }
    }
}

#[derive(Clone)]
pub struct ProviderDescriptor {
    /// Registry key, also the directory name under the output root.
    pub key: String,
    pub name: String,
    pub api_key: String,
    pub base_url: String,
    /// Default model identifier sent in the request body.
    pub model: String,
    pub protocol: ProtocolMode,
    pub description: String,
}

impl ProviderDescriptor {
    /// A provider is usable only when it carries a credential.
    pub fn is_enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn is_async_poll(&self) -> bool {
        matches!(self.protocol, ProtocolMode::AsyncPoll { .. })
    }
}

impl std::fmt::Debug for ProviderDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("ProviderDescriptor");
        s.field("key", &self.key)
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("protocol", &self.protocol);

        if self.is_enabled() {
            s.field("api_key", &"[REDACTED]");
        } else {
            s.field("api_key", &"<unset>");
        }

        s.finish()
    }
}

/// Provider descriptors keyed by provider key, in registration order.
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, ProviderDescriptor>,
    order: Vec<String>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_descriptors(descriptors: impl IntoIterator<Item = ProviderDescriptor>) -> Self {
        let mut registry = Self::new();
        for descriptor in descriptors {
            registry.register(descriptor);
        }
        registry
    }

    /// Insert or replace a descriptor. A replaced key keeps its original position.
    pub fn register(&mut self, descriptor: ProviderDescriptor) {
        let key = descriptor.key.clone();
        if self.providers.insert(key.clone(), descriptor).is_none() {
            self.order.push(key);
        }
    }

    pub fn get(&self, key: &str) -> Option<&ProviderDescriptor> {
        self.providers.get(key)
    }

    /// All descriptors in registration order, enabled or not.
    pub fn list(&self) -> Vec<&ProviderDescriptor> {
        self.order
            .iter()
            .filter_map(|k| self.providers.get(k))
            .collect()
    }

    /// Credential-bearing descriptors in registration order.
    pub fn enabled(&self) -> Vec<&ProviderDescriptor> {
        self.list().into_iter().filter(|d| d.is_enabled()).collect()
    }

    /// Resolve an enabled provider. Disabled entries are reported exactly like
    /// missing ones so callers can't invoke them by accident.
    pub fn lookup(&self, key: &str) -> Result<&ProviderDescriptor, ImagecastError> {
        self.providers
            .get(key)
            .filter(|d| d.is_enabled())
            .ok_or_else(|| ImagecastError::ProviderNotFound {
                provider: key.to_string(),
                suggestions: self.suggest_providers(key),
            })
    }

    /// Suggest similar enabled provider keys for a failed lookup (substring match).
    /// Sorted alphabetically, capped at 5 to keep error messages readable.
    pub fn suggest_providers(&self, query: &str) -> Vec<String> {
        let q = query.trim().to_lowercase();
        if q.is_empty() {
            return vec![];
        }
        let mut suggestions: Vec<String> = self
            .providers
            .values()
            .filter(|d| d.is_enabled() && d.key != query)
            .map(|d| d.key.clone())
            .filter(|k| {
                let k_lower = k.to_lowercase();
                k_lower.contains(&q) || q.contains(&k_lower)
            })
            .collect();
        suggestions.sort();
        suggestions.truncate(5);
        suggestions
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
