mod fs;
mod predict;
mod pypi;
mod search;

pub use fs::FsTools;
pub use predict::PredictTool;
pub use pypi::PackageVersions;
pub use search::WebSearch;

use crate::{ProgressSender, ToolDefinition, ToolProvider, ToolResult};

/// Extract a required non-empty string arg, or return ToolResult::err.
pub(crate) fn require_str<'a>(
    args: &'a serde_json::Value,
    key: &str,
) -> Result<&'a str, ToolResult> {
    args.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolResult::err_fmt(format_args!("Missing required parameter: {key}")))
}

/// Combines multiple `ToolProvider`s into one registry. Dispatch is by tool
/// name; the first provider defining the name wins.
pub struct CompositeTools {
    providers: Vec<Box<dyn ToolProvider>>,
}

impl CompositeTools {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
        }
    }

    pub fn add(mut self, provider: impl ToolProvider) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    /// Does any provider define a tool with this name?
    pub fn defines(&self, name: &str) -> bool {
        self.providers
            .iter()
            .any(|p| p.definitions().iter().any(|d| d.name == name))
    }
}

impl Default for CompositeTools {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ToolProvider for CompositeTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.providers
            .iter()
            .flat_map(|p| p.definitions())
            .collect()
    }

    async fn execute(&self, name: &str, args: &serde_json::Value) -> ToolResult {
        for provider in &self.providers {
            if provider.definitions().iter().any(|d| d.name == name) {
                return provider.execute(name, args).await;
            }
        }
        ToolResult::err_fmt(format_args!("Unknown tool: {name}"))
    }

    async fn execute_streaming(
        &self,
        name: &str,
        args: &serde_json::Value,
        progress: Option<&ProgressSender>,
    ) -> ToolResult {
        for provider in &self.providers {
            if provider.definitions().iter().any(|d| d.name == name) {
                return provider.execute_streaming(name, args, progress).await;
            }
        }
        ToolResult::err_fmt(format_args!("Unknown tool: {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn composite_dispatches_by_name() {
        let dir = TempDir::new().unwrap();
        let tools = CompositeTools::new().add(FsTools::new(dir.path()));
        let result = tools
            .execute("write_file", &json!({"path": "a.txt", "content": "x"}))
            .await;
        assert!(result.success);
        assert!(tools.defines("read_file"));
        assert!(!tools.defines("cog_predict"));
    }

    #[tokio::test]
    async fn composite_unknown_tool() {
        let tools = CompositeTools::new();
        let result = tools.execute("nope", &json!({})).await;
        assert!(!result.success);
        assert!(result.result.as_str().unwrap().contains("Unknown tool"));
    }
}
