use std::path::{Path, PathBuf};

use crate::ToolProvider;

/// The build descriptor artifact: runtime dependencies, system packages,
/// hardware, and the predict entry point.
pub const DESCRIPTOR_FILE: &str = "cog.yaml";
/// The predictor source artifact: the code invoked per inference.
pub const PREDICTOR_FILE: &str = "predict.py";

/// Files pulled to the front of the repository snapshot, most useful first.
const PRIORITY_FILES: [&str; 7] = [
    "README.md",
    "readme.md",
    "README.txt",
    "readme.txt",
    "README",
    "requirements.txt",
    "pyproject.toml",
];

#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("repository has no Python sources to package")]
    NoPythonSources,
    #[error("tool {name} failed: {message}")]
    Tool { name: String, message: String },
}

/// Bounded repository snapshot used for the initial generation prompt.
#[derive(Clone, Debug)]
pub struct RepoFiles {
    /// filename → content, priority files first.
    pub files: Vec<(String, String)>,
    /// True when the selection hit the size budget and content was cut.
    pub truncated: bool,
}

/// The target repository's working directory: owns the artifact pair's paths
/// and the `.autocog` state directory.
#[derive(Clone)]
pub struct Project {
    root: PathBuf,
}

impl Project {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn descriptor_path(&self) -> PathBuf {
        self.root.join(DESCRIPTOR_FILE)
    }

    pub fn predictor_path(&self) -> PathBuf {
        self.root.join(PREDICTOR_FILE)
    }

    /// (descriptor present, predictor present)
    pub fn artifacts_present(&self) -> (bool, bool) {
        (
            self.descriptor_path().exists(),
            self.predictor_path().exists(),
        )
    }

    pub fn read_descriptor(&self) -> Result<String, ProjectError> {
        Ok(std::fs::read_to_string(self.descriptor_path())?)
    }

    pub fn read_predictor(&self) -> Result<String, ProjectError> {
        Ok(std::fs::read_to_string(self.predictor_path())?)
    }

    /// Delete both generated artifacts. Used by explicit re-initialization
    /// (the session is cleared separately by its store). Idempotent.
    pub fn clear_artifacts(&self) -> Result<(), ProjectError> {
        for path in [self.descriptor_path(), self.predictor_path()] {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Keep Cog's build directory out of git and the usual noise out of the
    /// image build context.
    pub fn ensure_dotfiles(&self) -> Result<(), ProjectError> {
        add_lines_to_dotfile(&self.root.join(".gitignore"), &[".cog", ".autocog"])?;
        add_lines_to_dotfile(
            &self.root.join(".dockerignore"),
            &[
                "**/.git",
                "**/.github",
                "**/.gitignore",
                ".python-version",
                "__pycache__",
                ".mypy_cache",
                ".pytest_cache",
                ".ruff_cache",
                "/venv",
            ],
        )?;
        Ok(())
    }
}

/// Append lines to a dotfile, skipping lines already present.
fn add_lines_to_dotfile(path: &Path, lines: &[&str]) -> std::io::Result<()> {
    let existing = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };
    let existing_lines: Vec<&str> = existing.lines().collect();
    let new_lines: Vec<&str> = lines
        .iter()
        .filter(|l| !existing_lines.contains(l))
        .copied()
        .collect();
    if new_lines.is_empty() {
        return Ok(());
    }
    let mut out = existing;
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&new_lines.join("\n"));
    out.push('\n');
    std::fs::write(path, out)
}

/// Gather a bounded filename → content snapshot of the repository through the
/// registry's fs tools: priority files first, then Python sources, accumulated
/// until `budget` bytes. Content past the budget is cut and flagged.
pub async fn collect_repo_files(
    tools: &dyn ToolProvider,
    budget: usize,
) -> Result<RepoFiles, ProjectError> {
    let listing = tools
        .execute("list_files", &serde_json::json!({}))
        .await;
    if !listing.success {
        return Err(ProjectError::Tool {
            name: "list_files".into(),
            message: listing.result.to_string(),
        });
    }
    let entries: Vec<String> = listing
        .result
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|e| e["path"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let mut python: Vec<&String> = entries.iter().filter(|p| p.ends_with(".py")).collect();
    python.sort();
    if python.is_empty() {
        return Err(ProjectError::NoPythonSources);
    }

    let mut ordered: Vec<&String> = PRIORITY_FILES
        .iter()
        .filter_map(|name| entries.iter().find(|p| p.as_str() == *name))
        .collect();
    ordered.extend(python);

    let mut files = Vec::new();
    let mut truncated = false;
    let mut used = 0usize;
    for path in ordered {
        let read = tools
            .execute("read_file", &serde_json::json!({"path": path}))
            .await;
        let Some(content) = read.result.as_str() else {
            continue;
        };
        if !read.success || content.starts_with("[binary file") {
            continue;
        }
        let remaining = budget.saturating_sub(used);
        if remaining == 0 {
            truncated = true;
            break;
        }
        if content.len() > remaining {
            let mut cut = remaining;
            while !content.is_char_boundary(cut) {
                cut -= 1;
            }
            files.push((path.clone(), content[..cut].to_string()));
            truncated = true;
            break;
        }
        used += content.len();
        files.push((path.clone(), content.to_string()));
    }

    Ok(RepoFiles { files, truncated })
}
