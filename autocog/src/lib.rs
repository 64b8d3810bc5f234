pub mod artifacts;
pub mod chat;
pub mod classify;
pub mod client;
pub mod markers;
pub mod media;
pub mod project;
pub mod prompts;
pub mod repair;
pub mod runner;
pub mod session;
pub mod tools;

// Re-exports
pub use artifacts::{ArtifactPair, GenerateError};
pub use chat::{Chat, ChatError, TextGen};
pub use classify::{ClassifyError, Diagnosis, FaultKind};
pub use client::{ClientError, Provider, TextClient};
pub use project::{DESCRIPTOR_FILE, PREDICTOR_FILE, Project, ProjectError, RepoFiles};
pub use repair::{DEFAULT_MAX_ATTEMPTS, LoopConfig, LoopError, Outcome, RepairLoop};
pub use runner::{CommandRunner, RunOutput, RunnerError};
pub use session::{Role, Session, SessionError, SessionStore, Turn};

/// Sender for streaming progress lines from tools (e.g. live `cog predict` stderr).
pub type ProgressSender = tokio::sync::mpsc::UnboundedSender<String>;

// ─── Run events ───

/// Events emitted while the repair loop runs. Hosts render these however they
/// like (stderr, log file, UI); the core never writes to stdout/stderr itself.
#[derive(Clone, Debug, serde::Serialize)]
#[serde(tag = "type")]
pub enum RunEvent {
    #[serde(rename = "status")]
    Status { message: String },
    /// A streamed fragment of generated text, exactly as received.
    #[serde(rename = "generation_chunk")]
    GenerationChunk { text: String },
    #[serde(rename = "command_started")]
    CommandStarted { command: String },
    /// One line of the prediction command's diagnostic output.
    #[serde(rename = "command_output")]
    CommandOutput { line: String },
    #[serde(rename = "attempt_failed")]
    AttemptFailed { attempt: usize, max_attempts: usize },
    #[serde(rename = "diagnosis")]
    Diagnosed { fault: String, dependency: bool },
    #[serde(rename = "repairing")]
    Repairing { target: String },
    #[serde(rename = "done")]
    Done { succeeded: bool, attempts: usize },
}

/// Host sink for run events.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: RunEvent);
}

/// No-op sink for embedders that only care about the final outcome.
pub struct NoopEventSink;

#[async_trait::async_trait]
impl EventSink for NoopEventSink {
    async fn emit(&self, _event: RunEvent) {}
}

// ─── Tool registry types ───

/// A typed parameter for a tool definition.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToolParam {
    pub name: String,
    /// "str", "int", "float", "bool", "list", "dict", "any"
    #[serde(default = "ToolParam::default_type")]
    pub r#type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default = "ToolParam::default_required")]
    pub required: bool,
}

impl ToolParam {
    fn default_type() -> String {
        "any".into()
    }
    fn default_required() -> bool {
        true
    }

    pub fn typed(name: &str, ty: &str) -> Self {
        Self {
            name: name.into(),
            r#type: ty.into(),
            description: String::new(),
            required: true,
        }
    }
    pub fn optional(name: &str, ty: &str) -> Self {
        Self {
            name: name.into(),
            r#type: ty.into(),
            description: String::new(),
            required: false,
        }
    }
}

/// A named capability with an argument schema, dispatchable by the registry.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<ToolParam>,
    #[serde(default = "ToolDefinition::default_returns")]
    pub returns: String,
}

impl ToolDefinition {
    fn default_returns() -> String {
        "any".into()
    }
}

/// Result of executing a tool.
#[derive(Clone, Debug)]
pub struct ToolResult {
    pub success: bool,
    pub result: serde_json::Value,
}

impl ToolResult {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result,
        }
    }
    pub fn err(result: serde_json::Value) -> Self {
        Self {
            success: false,
            result,
        }
    }
    pub fn err_fmt(msg: impl std::fmt::Display) -> Self {
        Self::err(serde_json::json!(msg.to_string()))
    }
}

/// Trait for providing tools to the loop. Implement per capability and combine
/// with [`tools::CompositeTools`].
#[async_trait::async_trait]
pub trait ToolProvider: Send + Sync + 'static {
    fn definitions(&self) -> Vec<ToolDefinition>;
    async fn execute(&self, name: &str, args: &serde_json::Value) -> ToolResult;

    /// Execute with progress streaming. Default: delegates to execute().
    async fn execute_streaming(
        &self,
        name: &str,
        args: &serde_json::Value,
        _progress: Option<&ProgressSender>,
    ) -> ToolResult {
        self.execute(name, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_param_typed() {
        let p = ToolParam::typed("command", "str");
        assert_eq!(p.name, "command");
        assert_eq!(p.r#type, "str");
        assert!(p.required);
    }

    #[test]
    fn tool_param_optional() {
        let p = ToolParam::optional("max_results", "int");
        assert!(!p.required);
    }

    #[test]
    fn tool_result_helpers() {
        assert!(ToolResult::ok(serde_json::json!(1)).success);
        assert!(!ToolResult::err(serde_json::json!("nope")).success);
        let r = ToolResult::err_fmt(format_args!("bad {}", 7));
        assert_eq!(r.result, serde_json::json!("bad 7"));
    }

    #[test]
    fn run_event_serializes_with_tag() {
        let v = serde_json::to_value(RunEvent::Status {
            message: "hi".into(),
        })
        .unwrap();
        assert_eq!(v["type"], "status");
        assert_eq!(v["message"], "hi");
    }
}
