use super::error::{ToolError, ToolResult};
use super::traits::Tool;
use crate::protocol::ToolContent;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(300);

/// A registry for managing available tools
#[derive(Clone)]
pub struct ToolRegistry {
    tools: Arc<DashMap<String, Arc<dyn Tool>>>,
    call_timeout: Duration,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TOOL_TIMEOUT)
    }

    pub fn with_timeout(call_timeout: Duration) -> Self {
        Self {
            tools: Arc::new(DashMap::new()),
            call_timeout,
        }
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        info!(target: "tool_registry", tool = %name, "Registering tool");
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(target: "tool_registry", tool = %name, "Replaced existing tool");
        }
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|t| t.clone())
    }

    /// All registered tools, ordered by name
    pub fn list_tools(&self) -> Vec<Arc<dyn Tool>> {
        let mut tools: Vec<Arc<dyn Tool>> = self.tools.iter().map(|t| t.clone()).collect();
        tools.sort_by_key(|t| t.name());
        tools
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Call a tool by name, bounded by the call timeout unless the tool opts out
    #[tracing::instrument(skip(self, arguments), fields(tool.name = %name))]
    pub async fn call(&self, name: &str, arguments: serde_json::Value) -> ToolResult<Vec<ToolContent>> {
        let start_time = std::time::Instant::now();

        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;

        let bounded = tool.honors_timeout(&arguments);
        debug!(target: "tool_registry", tool = %name, bounded, "Invoking tool");

        let result = if bounded {
            match timeout(self.call_timeout, tool.call(arguments)).await {
                Ok(res) => res,
                Err(_) => {
                    warn!(target: "tool_registry", tool = %name, timeout_secs = self.call_timeout.as_secs(), "Tool execution timed out");
                    Err(ToolError::Timeout)
                }
            }
        } else {
            tool.call(arguments).await
        };

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => debug!(target: "tool_registry", tool = %name, elapsed_ms, "Tool finished"),
            Err(e) => warn!(target: "tool_registry", tool = %name, elapsed_ms, error = %e, "Tool execution failed"),
        }

        result
    }
}
