use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::generate::{GenerationOutcome, GenerationRequest};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GenerateRequest {
    /// Text description of the image to generate.
    pub prompt: String,
    /// Provider key from `listproviders`. Omit to run every enabled provider in parallel.
    pub provider: Option<String>,
    /// Image size as "WIDTHxHEIGHT" (e.g. "1024x2048"). Defaults to the configured size.
    pub size: Option<String>,
    /// Model override for the chosen provider(s). Defaults to each provider's configured model.
    pub model: Option<String>,
}

impl From<GenerateRequest> for GenerationRequest {
    fn from(req: GenerateRequest) -> Self {
        Self {
            prompt: req.prompt,
            provider: req.provider,
            size: req.size,
            model: req.model,
        }
    }
}

/// Payload of the `generate` and `generate_first` tools.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub results: Vec<GenerationOutcome>,
    pub successes: usize,
    pub attempted: usize,
}

impl GenerateResponse {
    pub fn new(results: Vec<GenerationOutcome>) -> Self {
        let successes = results.iter().filter(|o| o.is_success()).count();
        Self {
            attempted: results.len(),
            successes,
            results,
        }
    }
}
