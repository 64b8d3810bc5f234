use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::ProgressSender;

/// Line marking an unrecoverable setup failure; the process is killed as soon
/// as it appears instead of being waited out.
pub const SETUP_FAILED_SENTINEL: &str = "Model setup failed";

/// Marker for an uncaught exception inside the wrapped prediction code. The
/// external tool exits 0 even when this happens, so the textual check is part
/// of the success rule.
pub const TRACEBACK_MARKER: &str = "Traceback (most recent call last)";

/// 512 KB output cap per run.
const MAX_OUTPUT: usize = 512_000;

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },
    #[error("I/O error while reading command output: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of one prediction command invocation.
#[derive(Clone, Debug)]
pub struct RunOutput {
    pub succeeded: bool,
    pub exit_code: Option<i32>,
    /// Full captured diagnostic output, capped.
    pub output: String,
}

/// Executes the prediction command as a single shell invocation, streaming its
/// diagnostic output line by line while accumulating it for classification.
pub struct CommandRunner {
    /// $SHELL or "bash" fallback.
    shell_path: String,
    cwd: PathBuf,
}

impl CommandRunner {
    pub fn new() -> Self {
        let shell_path = std::env::var("SHELL").unwrap_or_else(|_| "bash".into());
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self { shell_path, cwd }
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    /// Run `command` to completion (or sentinel-triggered kill). The command is
    /// judged successful iff it exits 0 AND its output carries no uncaught
    /// runtime exception marker. Full output is returned either way.
    pub async fn run(
        &self,
        command: &str,
        progress: Option<&ProgressSender>,
    ) -> Result<RunOutput, RunnerError> {
        tracing::info!(command, "running prediction command");

        let mut child = tokio::process::Command::new(&self.shell_path)
            .arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| RunnerError::Spawn {
                command: command.to_string(),
                source: e,
            })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr pipe missing"))?;
        let mut lines = BufReader::new(stderr).lines();

        let mut output = String::new();
        let mut truncated = false;
        let mut killed = false;
        while let Some(line) = lines.next_line().await? {
            if let Some(tx) = progress {
                let _ = tx.send(line.clone());
            }
            if output.len() < MAX_OUTPUT {
                output.push_str(&line);
                output.push('\n');
            } else if !truncated {
                output.push_str("[truncated]\n");
                truncated = true;
            }
            if line.contains(SETUP_FAILED_SENTINEL) {
                tracing::warn!("setup failure sentinel seen, killing process");
                child.start_kill()?;
                killed = true;
                break;
            }
        }

        let status = child.wait().await?;
        let exit_code = status.code();
        let succeeded = !killed && status.success() && !output.contains(TRACEBACK_MARKER);

        Ok(RunOutput {
            succeeded,
            exit_code,
            output,
        })
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clean_exit_succeeds() {
        let runner = CommandRunner::new();
        let out = runner.run("echo done 1>&2", None).await.unwrap();
        assert!(out.succeeded);
        assert_eq!(out.exit_code, Some(0));
        assert!(out.output.contains("done"));
    }

    #[tokio::test]
    async fn zero_exit_with_traceback_fails() {
        let runner = CommandRunner::new();
        let out = runner
            .run(
                "printf 'Traceback (most recent call last):\\nValueError: x\\n' 1>&2",
                None,
            )
            .await
            .unwrap();
        assert_eq!(out.exit_code, Some(0));
        assert!(!out.succeeded);
        assert!(out.output.contains("ValueError"));
    }

    #[tokio::test]
    async fn nonzero_exit_fails() {
        let runner = CommandRunner::new();
        let out = runner.run("echo broken 1>&2; exit 3", None).await.unwrap();
        assert!(!out.succeeded);
        assert_eq!(out.exit_code, Some(3));
        assert!(out.output.contains("broken"));
    }

    #[tokio::test]
    async fn sentinel_kills_early() {
        let runner = CommandRunner::new();
        let start = std::time::Instant::now();
        let out = runner
            .run("echo 'Model setup failed' 1>&2; sleep 30", None)
            .await
            .unwrap();
        assert!(!out.succeeded);
        assert!(out.output.contains(SETUP_FAILED_SENTINEL));
        assert!(start.elapsed() < std::time::Duration::from_secs(10));
    }

    #[tokio::test]
    async fn progress_receives_lines() {
        let runner = CommandRunner::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let out = runner
            .run("echo one 1>&2; echo two 1>&2", Some(&tx))
            .await
            .unwrap();
        assert!(out.succeeded);
        drop(tx);
        let mut seen = Vec::new();
        while let Some(line) = rx.recv().await {
            seen.push(line);
        }
        assert_eq!(seen, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let runner = CommandRunner::new().with_cwd(dir.path());
        let out = runner.run("pwd 1>&2", None).await.unwrap();
        let canonical = dir.path().canonicalize().unwrap();
        assert!(out.output.contains(&canonical.to_string_lossy().to_string()));
    }
}
