use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::artifacts::{self, GenerateError};
use crate::chat::TextGen;
use crate::classify::{self, ClassifyError, Diagnosis, FaultKind};
use crate::media::{self, MediaError};
use crate::project::{self, DESCRIPTOR_FILE, PREDICTOR_FILE, Project, ProjectError};
use crate::session::SessionStore;
use crate::{EventSink, RunEvent, ToolProvider};

/// Default bound on outer generate→run→repair attempts.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Byte budget for repository content in the initial generation prompt.
const REPO_BUDGET: usize = 25_000;

/// Bound on per-iteration package lookups during dependency refresh.
const MAX_PACKAGE_LOOKUPS: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum LoopError {
    /// The semi-initialized state: a session transcript exists but an artifact
    /// is gone. The cause is ambiguous, so this is never auto-repaired.
    #[error(
        "session transcript exists but {missing} is missing; re-initialize to start over"
    )]
    InconsistentState { missing: &'static str },
    #[error(transparent)]
    Generate(#[from] GenerateError),
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Project(#[from] ProjectError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("tool {name} failed: {message}")]
    Tool { name: String, message: String },
}

/// How a completed run ended. Fatal errors surface as `LoopError` instead.
#[derive(Clone, Debug)]
pub enum Outcome {
    Succeeded {
        attempts: usize,
    },
    ExhaustedAttempts {
        attempts: usize,
        last_excerpt: String,
    },
    Interrupted {
        attempts: usize,
    },
}

/// One loop iteration's state. Transient: created per Running transition,
/// discarded once the loop advances.
#[derive(Clone, Debug)]
pub struct AttemptRecord {
    pub index: usize,
    pub command: String,
    pub output: String,
    pub succeeded: bool,
    pub diagnosis: Option<Diagnosis>,
}

#[derive(Clone, Debug)]
pub struct LoopConfig {
    pub max_attempts: usize,
    /// Pre-supplied prediction command; derived from the predictor otherwise.
    pub command: Option<String>,
    /// Free-text steering instructions folded into generation.
    pub tell: Option<String>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            command: None,
            tell: None,
        }
    }
}

/// The orchestrator: Generating → Running → (Succeeded | Classifying →
/// Repairing → Running), bounded by `max_attempts`.
///
/// One loop owns the repository's artifacts and session exclusively for the
/// duration of a run; concurrent invocations against the same repository are a
/// precondition violation, not something this type defends against.
pub struct RepairLoop<'a> {
    project: Project,
    store: SessionStore,
    r#gen: &'a mut dyn TextGen,
    tools: Arc<dyn ToolProvider>,
    events: Arc<dyn EventSink>,
    config: LoopConfig,
}

impl<'a> RepairLoop<'a> {
    pub fn new(
        project: Project,
        store: SessionStore,
        r#gen: &'a mut dyn TextGen,
        tools: Arc<dyn ToolProvider>,
        events: Arc<dyn EventSink>,
        config: LoopConfig,
    ) -> Self {
        Self {
            project,
            store,
            r#gen,
            tools,
            events,
            config,
        }
    }

    pub async fn run(&mut self, cancel: CancellationToken) -> Result<Outcome, LoopError> {
        // Generating: resume if a prior run left a session behind, but refuse
        // the semi-initialized state before issuing any generation request.
        let resumed = self.store.exists();
        let (have_descriptor, have_predictor) = self.project.artifacts_present();
        if resumed {
            if !have_descriptor {
                return Err(LoopError::InconsistentState {
                    missing: DESCRIPTOR_FILE,
                });
            }
            if !have_predictor {
                return Err(LoopError::InconsistentState {
                    missing: PREDICTOR_FILE,
                });
            }
            self.status("Resuming from the saved session and existing artifacts")
                .await;
        } else {
            self.status("Generating cog.yaml and predict.py...").await;
            let repo = project::collect_repo_files(self.tools.as_ref(), REPO_BUDGET).await?;
            let pair =
                artifacts::generate_initial(self.r#gen, &repo, self.config.tell.as_deref()).await?;
            self.write_artifact(DESCRIPTOR_FILE, &pair.descriptor).await?;
            self.write_artifact(PREDICTOR_FILE, &pair.predictor).await?;
            self.project.ensure_dotfiles()?;
        }

        let mut command = match &self.config.command {
            Some(command) => command.clone(),
            None => {
                self.status("Deriving the predict command...").await;
                let predictor = self.project.read_predictor()?;
                artifacts::derive_command(self.r#gen, &predictor).await?
            }
        };

        let max_attempts = self.config.max_attempts;
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Ok(Outcome::Interrupted {
                    attempts: attempt - 1,
                });
            }

            // Running
            media::create_stub_inputs(&command, self.project.root())?;
            self.events
                .emit(RunEvent::CommandStarted {
                    command: command.clone(),
                })
                .await;
            let mut record = self.run_command(attempt, &command).await?;

            if record.succeeded {
                self.events
                    .emit(RunEvent::Done {
                        succeeded: true,
                        attempts: attempt,
                    })
                    .await;
                return Ok(Outcome::Succeeded { attempts: attempt });
            }

            self.events
                .emit(RunEvent::AttemptFailed {
                    attempt,
                    max_attempts,
                })
                .await;
            let excerpt = classify::extract_relevant_output(&record.output);
            if attempt == max_attempts {
                self.events
                    .emit(RunEvent::Done {
                        succeeded: false,
                        attempts: attempt,
                    })
                    .await;
                return Ok(Outcome::ExhaustedAttempts {
                    attempts: attempt,
                    last_excerpt: excerpt,
                });
            }

            // Classifying: exhaustion inside is fatal, there is no safe
            // default fault kind.
            self.status("Diagnosing the source of the error...").await;
            let diagnosis = classify::classify(self.r#gen, &record.command, &excerpt).await?;
            record.diagnosis = Some(diagnosis);
            self.events
                .emit(RunEvent::Diagnosed {
                    fault: diagnosis.fault.label().to_string(),
                    dependency: diagnosis.dependency,
                })
                .await;

            // Repairing: the dependency flag composes with the primary fault,
            // so version info is gathered once and may feed two rewrites.
            let versions = if diagnosis.dependency {
                self.refresh_dependency_info().await?
            } else {
                None
            };

            match diagnosis.fault {
                FaultKind::Predictor => {
                    self.repairing(PREDICTOR_FILE).await;
                    let text =
                        artifacts::repair(self.r#gen, FaultKind::Predictor, versions.as_deref())
                            .await?;
                    self.write_artifact(PREDICTOR_FILE, &text).await?;
                }
                FaultKind::Descriptor => {
                    self.repairing(DESCRIPTOR_FILE).await;
                    let text =
                        artifacts::repair(self.r#gen, FaultKind::Descriptor, versions.as_deref())
                            .await?;
                    self.write_artifact(DESCRIPTOR_FILE, &text).await?;
                }
                FaultKind::Command => {
                    self.repairing("the predict command").await;
                    let predictor = self.project.read_predictor()?;
                    command = artifacts::derive_command(self.r#gen, &predictor).await?;
                }
            }
            if diagnosis.dependency && diagnosis.fault != FaultKind::Descriptor {
                self.repairing(DESCRIPTOR_FILE).await;
                let text = artifacts::repair(self.r#gen, FaultKind::Descriptor, versions.as_deref())
                    .await?;
                self.write_artifact(DESCRIPTOR_FILE, &text).await?;
            }
        }

        // Only reachable with max_attempts == 0.
        Ok(Outcome::ExhaustedAttempts {
            attempts: 0,
            last_excerpt: String::new(),
        })
    }

    /// Dispatch the prediction command through the registry, forwarding
    /// streamed diagnostic lines to the event sink.
    async fn run_command(
        &self,
        index: usize,
        command: &str,
    ) -> Result<AttemptRecord, LoopError> {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let events = Arc::clone(&self.events);
        let drain = tokio::spawn(async move {
            while let Some(line) = rx.recv().await {
                events.emit(RunEvent::CommandOutput { line }).await;
            }
        });
        let result = self
            .tools
            .execute_streaming("cog_predict", &json!({"command": command}), Some(&tx))
            .await;
        drop(tx);
        let _ = drain.await;

        let payload = result.result;
        if !payload.is_object() {
            return Err(LoopError::Tool {
                name: "cog_predict".into(),
                message: payload.to_string(),
            });
        }
        Ok(AttemptRecord {
            index,
            command: command.to_string(),
            succeeded: payload["succeeded"].as_bool().unwrap_or(false),
            output: payload["output"].as_str().unwrap_or_default().to_string(),
            diagnosis: None,
        })
    }

    /// Look up current versions for the packages named in the descriptor,
    /// falling back to web search for anything PyPI doesn't know. Returns a
    /// text table for the repair prompt, or None when nothing useful came back.
    async fn refresh_dependency_info(&self) -> Result<Option<String>, LoopError> {
        let descriptor = self.project.read_descriptor()?;
        let packages = parse_python_packages(&descriptor);
        if packages.is_empty() {
            return Ok(None);
        }
        self.status("Refreshing package version information...").await;

        let has_search = self
            .tools
            .definitions()
            .iter()
            .any(|d| d.name == "search_web");

        let mut sections = Vec::new();
        for package in packages.iter().take(MAX_PACKAGE_LOOKUPS) {
            let result = self
                .tools
                .execute("package_versions", &json!({"package": package}))
                .await;
            if result.success {
                let versions: Vec<String> = result
                    .result
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .take(10)
                            .filter_map(|e| e["version"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                if !versions.is_empty() {
                    sections.push(format!("{package}: {}", versions.join(", ")));
                    continue;
                }
            }
            if has_search {
                let search = self
                    .tools
                    .execute(
                        "search_web",
                        &json!({"query": format!("{package} python package latest version")}),
                    )
                    .await;
                if search.success
                    && let Some(answer) = search.result["answer"].as_str()
                    && !answer.is_empty()
                {
                    sections.push(format!("{package}: {answer}"));
                }
            }
        }
        Ok((!sections.is_empty()).then(|| sections.join("\n")))
    }

    async fn write_artifact(&self, name: &str, content: &str) -> Result<(), LoopError> {
        let result = self
            .tools
            .execute("write_file", &json!({"path": name, "content": content}))
            .await;
        if result.success {
            Ok(())
        } else {
            Err(LoopError::Tool {
                name: "write_file".into(),
                message: result.result.to_string(),
            })
        }
    }

    async fn status(&self, message: &str) {
        self.events
            .emit(RunEvent::Status {
                message: message.to_string(),
            })
            .await;
    }

    async fn repairing(&self, target: &str) {
        self.events
            .emit(RunEvent::Repairing {
                target: target.to_string(),
            })
            .await;
    }
}

/// Package names from the descriptor's `python_packages` block, version
/// specifiers stripped.
fn parse_python_packages(descriptor: &str) -> Vec<String> {
    let mut packages = Vec::new();
    let mut in_block = false;
    for line in descriptor.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("python_packages:") {
            in_block = true;
            continue;
        }
        if !in_block {
            continue;
        }
        if let Some(item) = trimmed.strip_prefix('-') {
            let name = item.trim().trim_matches(['"', '\'']);
            let name = name
                .split(['=', '<', '>', '!', '~', ' ', '['])
                .next()
                .unwrap_or("");
            if !name.is_empty() {
                packages.push(name.to_string());
            }
        } else if !trimmed.is_empty() {
            in_block = false;
        }
    }
    packages.dedup();
    packages
}
