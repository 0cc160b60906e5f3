use std::sync::Arc;
use std::time::Duration;

use imagecast::artifact::ArtifactStore;
use imagecast::config::Config;
use imagecast::dispatch::ImageSize;
use imagecast::dispatch::registry::{ProtocolMode, ProviderDescriptor, ProviderRegistry};
use imagecast::generate::{GenerationOrchestrator, GenerationOutcome};
use imagecast::publish::PublishRegistry;
use imagecast::publish::platforms::PendingPlatform;
use imagecast::response::{ToolMetadata, ToolResponse};
use imagecast::server::ImagecastServer;
use imagecast::tools::generate::{GenerateRequest, GenerateResponse};
use imagecast::tools::listproviders::{ListProvidersResponse, ProviderInfo};
use imagecast::tools::publish::ListPlatformsResponse;
use rmcp::ServerHandler;

#[test]
fn tool_response_success_serializes_correctly() {
    let response = ToolResponse::success(
        "saved".to_string(),
        ToolMetadata::new("generate", "siliconflow", "Kwai-Kolors/Kolors", 4.2),
    );

    let json_str = serde_json::to_string(&response).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json_str).unwrap();

    assert_eq!(parsed["status"], "success");
    assert_eq!(parsed["content"], "saved");
    assert_eq!(parsed["content_type"], "text");
    assert_eq!(parsed["metadata"]["tool_name"], "generate");
    assert_eq!(parsed["metadata"]["provider_used"], "siliconflow");
    assert_eq!(parsed["metadata"]["model_used"], "Kwai-Kolors/Kolors");
    assert!(parsed["metadata"]["duration_seconds"].is_f64());
}

#[test]
fn tool_response_error_and_non_finite_duration() {
    let response = ToolResponse::error(
        "provider not found or disabled: foo".to_string(),
        ToolMetadata::new("generate", "foo", "default", f64::NAN),
    );
    assert!(!response.is_success());

    let parsed: serde_json::Value = serde_json::to_value(&response).unwrap();
    assert_eq!(parsed["status"], "error");
    assert_eq!(parsed["metadata"]["duration_seconds"], 0.0);
}

#[test]
fn tool_response_json_payload() {
    let payload = GenerateResponse::new(Vec::<GenerationOutcome>::new());
    let response =
        ToolResponse::error_json(&payload, ToolMetadata::new("generate", "multi", "default", 0.1));
    assert_eq!(response.content_type, "json");
    assert_eq!(response.status, "error");

    let content: serde_json::Value = serde_json::from_str(&response.content).unwrap();
    assert_eq!(content["attempted"], 0);
    assert_eq!(content["successes"], 0);
    assert!(content["results"].as_array().unwrap().is_empty());
}

#[test]
fn call_tool_result_is_always_transport_success() {
    let result = ToolResponse::error(
        "boom".to_string(),
        ToolMetadata::new("publish", "multi", "none", 0.0),
    )
    .into_call_tool_result();
    assert_ne!(result.is_error, Some(true));
}

#[test]
fn generate_request_schema_deserializes() {
    let req: GenerateRequest = serde_json::from_value(serde_json::json!({
        "prompt": "a cat",
        "size": "768x1024"
    }))
    .unwrap();
    assert_eq!(req.prompt, "a cat");
    assert!(req.provider.is_none());
    assert_eq!(req.size.as_deref(), Some("768x1024"));
}

#[test]
fn provider_listing_markdown() {
    let on = ProviderDescriptor {
        key: "siliconflow".to_string(),
        name: "SiliconFlow".to_string(),
        api_key: "k".to_string(),
        base_url: "https://api.siliconflow.cn/v1".to_string(),
        model: "Kwai-Kolors/Kolors".to_string(),
        protocol: ProtocolMode::Sync,
        description: String::new(),
    };
    let mut off = on.clone();
    off.key = "openai".to_string();
    off.api_key = String::new();

    let list = ListProvidersResponse {
        providers: vec![ProviderInfo::from(&on), ProviderInfo::from(&off)],
    };
    let md = list.to_markdown();
    assert!(md.contains("| siliconflow | SiliconFlow | Kwai-Kolors/Kolors | sync | yes |"));
    assert!(md.contains("| openai |"));
    assert!(md.contains("no (missing credential)"));
}

#[test]
fn platform_listing_markdown() {
    let mut registry = PublishRegistry::new();
    registry.register(Arc::new(PendingPlatform::new("douyin", "Douyin")));
    let md = ListPlatformsResponse {
        platforms: registry.list(),
    }
    .to_markdown();
    assert!(md.contains("| douyin | Douyin | no | in development |"));

    let empty = ListPlatformsResponse { platforms: vec![] }.to_markdown();
    assert_eq!(empty, "No publish platforms configured.");
}

#[test]
fn server_info_names_the_server() {
    let config = Config::from_toml_str("", |_: &str| None).unwrap();
    let server = ImagecastServer::new(config);
    let info = server.get_info();
    assert_eq!(info.server_info.name, "imagecast");
    assert!(info.capabilities.tools.is_some());
}

#[test]
fn server_from_parts() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = GenerationOrchestrator::new(
        Arc::new(ProviderRegistry::new()),
        ArtifactStore::new(dir.path()),
        ImageSize::new(1024, 2048).unwrap(),
        Duration::from_secs(5),
    );
    let server = ImagecastServer::from_parts(orchestrator, Arc::new(PublishRegistry::new()));
    assert!(server.get_info().instructions.is_some());
}
