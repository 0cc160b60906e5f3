use rmcp::model::{CallToolResult, Content};
use serde::Serialize;

/// Envelope returned by every tool, serialized as a single text content.
#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub status: &'static str,
    pub content: String,
    pub content_type: &'static str,
    pub metadata: ToolMetadata,
}

#[derive(Debug, Serialize)]
pub struct ToolMetadata {
    pub tool_name: String,
    pub provider_used: String,
    pub model_used: String,
    #[serde(serialize_with = "serialize_finite_f64")]
    pub duration_seconds: f64,
}

impl ToolMetadata {
    pub fn new(tool_name: &str, provider_used: &str, model_used: &str, duration_seconds: f64) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            provider_used: provider_used.to_string(),
            model_used: model_used.to_string(),
            duration_seconds,
        }
    }
}

/// Serialize f64, clamping non-finite values (NaN, Inf) to 0.0.
fn serialize_finite_f64<S: serde::Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(if v.is_finite() { *v } else { 0.0 })
}

impl ToolResponse {
    pub fn success(content: String, metadata: ToolMetadata) -> Self {
        Self {
            status: "success",
            content,
            content_type: "text",
            metadata,
        }
    }

    /// Success with a JSON document as content.
    pub fn success_json<T: Serialize>(value: &T, metadata: ToolMetadata) -> Self {
        Self::json("success", value, metadata)
    }

    /// Error carrying a JSON document, e.g. per-provider failures.
    pub fn error_json<T: Serialize>(value: &T, metadata: ToolMetadata) -> Self {
        Self::json("error", value, metadata)
    }

    fn json<T: Serialize>(status: &'static str, value: &T, metadata: ToolMetadata) -> Self {
        match serde_json::to_string_pretty(value) {
            Ok(json) => Self {
                status,
                content: json,
                content_type: "json",
                metadata,
            },
            Err(e) => Self::error(format!("serialization failed: {e}"), metadata),
        }
    }

    pub fn error(message: String, metadata: ToolMetadata) -> Self {
        Self {
            status: "error",
            content: message,
            content_type: "text",
            metadata,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == "success"
    }

    /// Convert to MCP CallToolResult.
    /// Always a transport-level success: failures are reported in the payload
    /// (`"status": "error"`) so one failed call does not abort sibling calls.
    pub fn into_call_tool_result(self) -> CallToolResult {
        match serde_json::to_string(&self) {
            Ok(json) => CallToolResult::success(vec![Content::text(json)]),
            Err(e) => {
                let escaped = e.to_string().replace('\\', "\\\\").replace('"', "\\\"");
                CallToolResult::success(vec![Content::text(format!(
                    r#"{{"status":"error","content":"serialization failed: {escaped}","content_type":"text","metadata":{{}}}}"#
                ))])
            }
        }
    }
}
