use serde_json::json;

use crate::runner::CommandRunner;
use crate::{ProgressSender, ToolDefinition, ToolParam, ToolProvider, ToolResult};

use super::require_str;

/// Runs the prediction command through [`CommandRunner`], streaming diagnostic
/// lines through the progress channel. The payload always carries the full
/// captured output so the caller can classify a failure.
pub struct PredictTool {
    runner: CommandRunner,
}

impl PredictTool {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }
}

#[async_trait::async_trait]
impl ToolProvider for PredictTool {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![ToolDefinition {
            name: "cog_predict".into(),
            description:
                "Run a prediction command in the repository and report {succeeded, exit_code, output}."
                    .into(),
            params: vec![ToolParam::typed("command", "str")],
            returns: "dict".into(),
        }]
    }

    async fn execute(&self, name: &str, args: &serde_json::Value) -> ToolResult {
        self.execute_streaming(name, args, None).await
    }

    async fn execute_streaming(
        &self,
        _name: &str,
        args: &serde_json::Value,
        progress: Option<&ProgressSender>,
    ) -> ToolResult {
        let command = match require_str(args, "command") {
            Ok(s) => s,
            Err(e) => return e,
        };
        match self.runner.run(command, progress).await {
            Ok(out) => {
                let payload = json!({
                    "succeeded": out.succeeded,
                    "exit_code": out.exit_code,
                    "output": out.output,
                });
                ToolResult {
                    success: out.succeeded,
                    result: payload,
                }
            }
            Err(e) => ToolResult::err_fmt(e),
        }
    }
}
