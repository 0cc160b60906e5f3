use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Implementation, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use serde::Serialize;

use crate::artifact::ArtifactStore;
use crate::config::Config;
use crate::error::ImagecastError;
use crate::generate::{GenerationOrchestrator, GenerationRequest};
use crate::publish::PublishRegistry;
use crate::response::{ToolMetadata, ToolResponse};
use crate::tools::generate::{GenerateRequest, GenerateResponse};
use crate::tools::listproviders::{ListProvidersResponse, ProviderInfo};
use crate::tools::publish::{ListPlatformsResponse, PublishRequest, PublishResponse};

#[derive(Clone)]
pub struct ImagecastServer {
    orchestrator: Arc<GenerationOrchestrator>,
    publish: Arc<PublishRegistry>,
    tool_router: ToolRouter<Self>,
}

#[derive(Serialize)]
struct AllFailedReport<'a> {
    message: String,
    errors: &'a [(String, String)],
}

#[tool_router]
impl ImagecastServer {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(config.provider_registry());
        let publish = Arc::new(config.publish_registry());
        let store = ArtifactStore::new(config.output_dir.clone()).with_timeout(config.download_timeout);
        tracing::info!(
            output_dir = %config.output_dir.display(),
            providers = registry.len(),
            platforms = publish.len(),
            "imagecast configured"
        );
        let orchestrator =
            GenerationOrchestrator::new(registry, store, config.default_size, config.timeout);
        Self::from_parts(orchestrator, publish)
    }

    pub fn from_parts(orchestrator: GenerationOrchestrator, publish: Arc<PublishRegistry>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            publish,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "generate",
        description = "Generate an image from a text prompt and save it locally. Name a `provider` to use one backend; omit it to run every enabled provider in parallel and get one result per provider. Use `listproviders` for provider keys."
    )]
    async fn generate(
        &self,
        Parameters(req): Parameters<GenerateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let provider_used = req
            .provider
            .clone()
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| "multi".to_string());
        let model_used = req.model.clone().unwrap_or_else(|| "default".to_string());
        let request = GenerationRequest::from(req);

        let response = match self.orchestrator.generate(&request).await {
            Ok(results) => {
                let metadata = ToolMetadata::new(
                    "generate",
                    &provider_used,
                    &model_used,
                    start.elapsed().as_secs_f64(),
                );
                let payload = GenerateResponse::new(results);
                if payload.attempted == 0 {
                    ToolResponse::error("no providers enabled".to_string(), metadata)
                } else if payload.successes == 0 {
                    ToolResponse::error_json(&payload, metadata)
                } else {
                    ToolResponse::success_json(&payload, metadata)
                }
            }
            Err(ImagecastError::InvalidRequest(msg)) => {
                return Err(McpError::invalid_params(msg, None));
            }
            Err(e) => {
                tracing::warn!("generate failed: {e}");
                ToolResponse::error(
                    e.user_message(),
                    ToolMetadata::new(
                        "generate",
                        e.provider().unwrap_or(&provider_used),
                        &model_used,
                        start.elapsed().as_secs_f64(),
                    ),
                )
            }
        };

        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "generate_first",
        description = "Generate an image by trying enabled providers one at a time in configured order, stopping at the first success. Slower than `generate` fan-out but calls fewer backends."
    )]
    async fn generate_first(
        &self,
        Parameters(req): Parameters<GenerateRequest>,
    ) -> Result<CallToolResult, McpError> {
        let start = Instant::now();
        let model_used = req.model.clone().unwrap_or_else(|| "default".to_string());
        let request = GenerationRequest::from(req);

        let response = match self.orchestrator.generate_first_success(&request).await {
            Ok(outcome) => {
                let metadata = ToolMetadata::new(
                    "generate_first",
                    &outcome.provider,
                    &outcome.model,
                    start.elapsed().as_secs_f64(),
                );
                ToolResponse::success_json(&GenerateResponse::new(vec![outcome]), metadata)
            }
            Err(ImagecastError::InvalidRequest(msg)) => {
                return Err(McpError::invalid_params(msg, None));
            }
            Err(e) => {
                tracing::warn!("generate_first failed: {e}");
                let metadata = ToolMetadata::new(
                    "generate_first",
                    "multi",
                    &model_used,
                    start.elapsed().as_secs_f64(),
                );
                match &e {
                    ImagecastError::AllFailed { errors, .. } if !errors.is_empty() => {
                        ToolResponse::error_json(
                            &AllFailedReport {
                                message: e.user_message(),
                                errors,
                            },
                            metadata,
                        )
                    }
                    _ => ToolResponse::error(e.user_message(), metadata),
                }
            }
        };

        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "listproviders",
        description = "List configured image providers with model, protocol, and whether a credential is set.",
        annotations(read_only_hint = true)
    )]
    async fn listproviders(&self) -> Result<CallToolResult, McpError> {
        let providers: Vec<ProviderInfo> = self
            .orchestrator
            .registry()
            .list()
            .into_iter()
            .map(ProviderInfo::from)
            .collect();
        let list = ListProvidersResponse { providers };

        let response = ToolResponse::success(
            list.to_markdown(),
            ToolMetadata::new("listproviders", "none", "none", 0.0),
        );
        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "publish",
        description = "Publish a generated image to one or more platforms. Omit `platforms` to publish everywhere configured. Each platform reports its own result. Use `listplatforms` for keys."
    )]
    async fn publish(
        &self,
        Parameters(req): Parameters<PublishRequest>,
    ) -> Result<CallToolResult, McpError> {
        if req.artifact_path.trim().is_empty() {
            return Err(McpError::invalid_params("artifact_path must not be empty", None));
        }
        let start = Instant::now();
        let artifact = PathBuf::from(&req.artifact_path);
        let platforms = req.platforms.unwrap_or_default();

        let results = self
            .publish
            .dispatch_many(&platforms, &artifact, &req.title, &req.content)
            .await;

        let metadata = ToolMetadata::new("publish", "multi", "none", start.elapsed().as_secs_f64());
        let payload = PublishResponse::new(req.artifact_path, results);
        let response = if payload.results.is_empty() {
            ToolResponse::error("no publish platforms configured".to_string(), metadata)
        } else if payload.successes == 0 {
            ToolResponse::error_json(&payload, metadata)
        } else {
            ToolResponse::success_json(&payload, metadata)
        };

        Ok(response.into_call_tool_result())
    }

    #[tool(
        name = "listplatforms",
        description = "List configured publish platforms and whether each has credentials and a working integration.",
        annotations(read_only_hint = true)
    )]
    async fn listplatforms(&self) -> Result<CallToolResult, McpError> {
        let list = ListPlatformsResponse {
            platforms: self.publish.list(),
        };
        let response = ToolResponse::success(
            list.to_markdown(),
            ToolMetadata::new("listplatforms", "none", "none", 0.0),
        );
        Ok(response.into_call_tool_result())
    }
}

#[tool_handler]
impl ServerHandler for ImagecastServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "imagecast".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(
                "Imagecast: text-to-image generation across several providers, plus publishing.\n\n\
                 Workflow:\n\
                 1. Call `listproviders` to see which backends have credentials.\n\
                 2. Call `generate` with a prompt. Without `provider` every enabled backend runs in parallel;\n\
                    each result carries the saved `artifact_path` or an error.\n\
                    Use `generate_first` when one image is enough.\n\
                 3. Call `listplatforms`, then `publish` with an `artifact_path` from step 2."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
