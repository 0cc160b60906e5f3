use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::publish::{PublishOutcome, PublishTargetInfo};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PublishRequest {
    /// Path of a previously generated image.
    pub artifact_path: String,
    /// Platform keys from `listplatforms`. Omit or pass [] for every configured platform.
    pub platforms: Option<Vec<String>>,
    /// Post title.
    #[serde(default)]
    pub title: String,
    /// Post body text.
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub artifact_path: String,
    pub results: BTreeMap<String, PublishOutcome>,
    pub successes: usize,
}

impl PublishResponse {
    pub fn new(artifact_path: String, results: BTreeMap<String, PublishOutcome>) -> Self {
        let successes = results.values().filter(|o| o.is_success()).count();
        Self {
            artifact_path,
            results,
            successes,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListPlatformsResponse {
    pub platforms: Vec<PublishTargetInfo>,
}

impl ListPlatformsResponse {
    pub fn to_markdown(&self) -> String {
        if self.platforms.is_empty() {
            return "No publish platforms configured.".to_string();
        }
        let mut out = String::from("| platform | name | credentials | status |\n|---|---|---|---|\n");
        for p in &self.platforms {
            let status = if p.capability.implemented {
                "ready"
            } else {
                "in development"
            };
            let creds = if p.capability.has_credentials { "yes" } else { "no" };
            out.push_str(&format!("| {} | {} | {} | {} |\n", p.platform, p.name, creds, status));
        }
        out
    }
}
