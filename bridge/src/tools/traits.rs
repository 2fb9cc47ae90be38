use super::error::ToolResult;
use crate::protocol::ToolContent;
use async_trait::async_trait;
use serde_json::Value;

/// A named operation callable over MCP
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of the tool (e.g., "generate_audio")
    fn name(&self) -> String;

    /// A human-readable description of what the tool does
    fn description(&self) -> String;

    /// The JSON Schema for the tool's arguments
    fn parameters(&self) -> Value;

    /// Whether a call with these arguments is cut off by the registry's
    /// timeout. Calls whose duration is set by real-time playback opt out.
    fn honors_timeout(&self, _arguments: &Value) -> bool {
        true
    }

    /// Execute the tool with the given arguments
    async fn call(&self, arguments: Value) -> ToolResult<Vec<ToolContent>>;
}
