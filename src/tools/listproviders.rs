use serde::Serialize;

use crate::dispatch::registry::{ProtocolMode, ProviderDescriptor};

#[derive(Debug, Serialize)]
pub struct ProviderInfo {
    pub key: String,
    pub name: String,
    pub model: String,
    pub protocol: String,
    /// Task API family for submit-and-poll providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
    pub description: String,
    pub enabled: bool,
}

impl From<&ProviderDescriptor> for ProviderInfo {
    fn from(entry: &ProviderDescriptor) -> Self {
        Self {
            key: entry.key.clone(),
            name: entry.name.clone(),
            model: entry.model.clone(),
            protocol: entry.protocol.name().to_string(),
            api: match &entry.protocol {
                ProtocolMode::AsyncPoll { api, .. } => Some(api.as_str().to_string()),
                ProtocolMode::Sync => None,
            },
            description: entry.description.clone(),
            enabled: entry.is_enabled(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListProvidersResponse {
    pub providers: Vec<ProviderInfo>,
}

impl ListProvidersResponse {
    pub fn to_markdown(&self) -> String {
        if self.providers.is_empty() {
            return "No providers configured.".to_string();
        }
        let mut out =
            String::from("| key | name | model | protocol | enabled |\n|---|---|---|---|---|\n");
        for p in &self.providers {
            out.push_str(&format!(
                "| {} | {} | {} | {} | {} |\n",
                p.key,
                p.name,
                p.model,
                p.api.as_deref().unwrap_or(&p.protocol),
                if p.enabled { "yes" } else { "no (missing credential)" }
            ));
        }
        out
    }
}
