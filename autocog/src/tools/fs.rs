use std::path::PathBuf;

use serde_json::json;

use crate::{ToolDefinition, ToolParam, ToolProvider, ToolResult};

use super::require_str;

/// File access scoped to the target repository: recursive listing (hidden and
/// ignored entries skipped), reads, and writes.
pub struct FsTools {
    root: PathBuf,
}

impl FsTools {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn list_files(&self) -> ToolResult {
        let mut entries = Vec::new();
        for entry in ignore::WalkBuilder::new(&self.root).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().is_some_and(|t| t.is_file()) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .to_string();
            entries.push(json!({"path": rel, "size": size}));
        }
        entries.sort_by(|a, b| a["path"].as_str().cmp(&b["path"].as_str()));
        ToolResult::ok(json!(entries))
    }

    fn read_file(&self, path: &str) -> ToolResult {
        let full = self.root.join(path);
        match std::fs::read_to_string(&full) {
            Ok(content) => ToolResult::ok(json!(content)),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                // Binary files get a marker rather than a failure.
                ToolResult::ok(json!("[binary file - content not displayed]"))
            }
            Err(e) => ToolResult::err_fmt(format_args!("Failed to read {path}: {e}")),
        }
    }

    fn write_file(&self, path: &str, content: &str) -> ToolResult {
        let full = self.root.join(path);
        if let Some(parent) = full.parent()
            && !parent.exists()
            && let Err(e) = std::fs::create_dir_all(parent)
        {
            return ToolResult::err_fmt(format_args!("Failed to create directories: {e}"));
        }
        match std::fs::write(&full, content) {
            Ok(()) => ToolResult::ok(json!(format!("Wrote {} bytes to {path}", content.len()))),
            Err(e) => ToolResult::err_fmt(format_args!("Failed to write {path}: {e}")),
        }
    }
}

#[async_trait::async_trait]
impl ToolProvider for FsTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: "list_files".into(),
                description: "List repository files recursively as {path, size}, skipping ignored and hidden entries.".into(),
                params: vec![],
                returns: "list".into(),
            },
            ToolDefinition {
                name: "read_file".into(),
                description: "Read a repository file's contents.".into(),
                params: vec![ToolParam::typed("path", "str")],
                returns: "str".into(),
            },
            ToolDefinition {
                name: "write_file".into(),
                description: "Write content to a repository file, creating parent directories if needed.".into(),
                params: vec![
                    ToolParam::typed("path", "str"),
                    ToolParam::typed("content", "str"),
                ],
                returns: "str".into(),
            },
        ]
    }

    async fn execute(&self, name: &str, args: &serde_json::Value) -> ToolResult {
        match name {
            "list_files" => self.list_files(),
            "read_file" => {
                let path = match require_str(args, "path") {
                    Ok(s) => s,
                    Err(e) => return e,
                };
                self.read_file(path)
            }
            "write_file" => {
                let path = match require_str(args, "path") {
                    Ok(s) => s,
                    Err(e) => return e,
                };
                let content = args
                    .get("content")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default();
                self.write_file(path, content)
            }
            _ => ToolResult::err_fmt(format_args!("Unknown tool: {name}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn list_skips_hidden_and_reports_sizes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("model.py"), "import torch").unwrap();
        std::fs::create_dir_all(dir.path().join(".autocog")).unwrap();
        std::fs::write(dir.path().join(".autocog/history.md"), "x").unwrap();
        let tools = FsTools::new(dir.path());

        let result = tools.execute("list_files", &json!({})).await;
        assert!(result.success);
        let paths: Vec<&str> = result
            .result
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap())
            .collect();
        assert_eq!(paths, vec!["model.py"]);
        assert_eq!(result.result[0]["size"], 12);
    }

    #[tokio::test]
    async fn read_write_round_trip() {
        let dir = TempDir::new().unwrap();
        let tools = FsTools::new(dir.path());

        let w = tools
            .execute("write_file", &json!({"path": "sub/out.txt", "content": "hello"}))
            .await;
        assert!(w.success);
        let r = tools
            .execute("read_file", &json!({"path": "sub/out.txt"}))
            .await;
        assert!(r.success);
        assert_eq!(r.result, json!("hello"));
    }

    #[tokio::test]
    async fn read_binary_returns_marker() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("blob"), [0u8, 159, 146, 150]).unwrap();
        let tools = FsTools::new(dir.path());
        let r = tools.execute("read_file", &json!({"path": "blob"})).await;
        assert!(r.success);
        assert!(r.result.as_str().unwrap().starts_with("[binary file"));
    }

    #[tokio::test]
    async fn read_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let tools = FsTools::new(dir.path());
        let r = tools.execute("read_file", &json!({"path": "gone.py"})).await;
        assert!(!r.success);
    }

    #[tokio::test]
    async fn missing_required_arg_fails() {
        let dir = TempDir::new().unwrap();
        let tools = FsTools::new(dir.path());
        let r = tools.execute("read_file", &json!({})).await;
        assert!(!r.success);
    }
}
