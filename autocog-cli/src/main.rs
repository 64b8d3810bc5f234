use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use autocog_core::tools::{CompositeTools, FsTools, PackageVersions, PredictTool, WebSearch};
use autocog_core::{
    Chat, CommandRunner, EventSink, LoopConfig, Outcome, Project, Provider, RepairLoop, RunEvent,
    SessionStore, TextClient, ToolProvider,
};

/// Package a machine-learning repository for Cog: generate cog.yaml and
/// predict.py, run `cog predict`, and repair failures until it works.
#[derive(Parser)]
struct Args {
    /// Path to the ML repository (defaults to the current directory)
    #[arg(short, long)]
    repo: Option<PathBuf>,

    /// Maximum number of run-and-repair attempts
    #[arg(short, long, default_value_t = autocog_core::DEFAULT_MAX_ATTEMPTS)]
    attempts: usize,

    /// Prediction command to run (derived from predict.py when omitted)
    #[arg(short, long)]
    command: Option<String>,

    /// Extra instructions folded into generation (e.g. "use the small checkpoint")
    #[arg(short, long)]
    tell: Option<String>,

    /// Delete the generated artifacts and the saved session, then start over
    #[arg(long)]
    init: bool,

    /// Text-generation provider: "anthropic" or "openai"
    #[arg(long, default_value = "anthropic")]
    provider: String,

    /// Model name (defaults per provider)
    #[arg(short, long)]
    model: Option<String>,

    /// API key (falls back to ANTHROPIC_API_KEY / OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,

    /// Tavily API key enabling web-search fallback during dependency repair
    #[arg(long, env = "TAVILY_API_KEY")]
    tavily_api_key: Option<String>,

    /// Suppress streamed generation and command output (status lines remain)
    #[arg(short, long)]
    quiet: bool,
}

/// Append-only JSONL log of run events under `<repo>/.autocog/runs/`.
struct RunLog {
    file: Mutex<std::io::BufWriter<std::fs::File>>,
}

impl RunLog {
    fn create(repo_root: &std::path::Path) -> anyhow::Result<Self> {
        let dir = repo_root.join(".autocog").join("runs");
        std::fs::create_dir_all(&dir)?;
        let name = format!("{}.jsonl", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        let file = std::fs::File::create(dir.join(name))?;
        Ok(Self {
            file: Mutex::new(std::io::BufWriter::new(file)),
        })
    }

    fn write(&self, event: &RunEvent) {
        let mut value = serde_json::to_value(event).unwrap_or_default();
        if let serde_json::Value::Object(ref mut map) = value {
            map.insert(
                "ts".into(),
                serde_json::Value::String(chrono::Local::now().to_rfc3339()),
            );
        }
        if let Ok(mut file) = self.file.lock() {
            let _ = serde_json::to_writer(&mut *file, &value);
            let _ = file.write_all(b"\n");
            let _ = file.flush();
        }
    }
}

/// Renders run events on stderr and mirrors them into the run log.
struct CliSink {
    log: RunLog,
    quiet: bool,
}

#[async_trait::async_trait]
impl EventSink for CliSink {
    async fn emit(&self, event: RunEvent) {
        match &event {
            // Streamed text is high-volume; the session transcript already
            // captures it, so it is not mirrored into the run log.
            RunEvent::GenerationChunk { text } => {
                if !self.quiet {
                    eprint!("{text}");
                    let _ = std::io::stderr().flush();
                }
                return;
            }
            RunEvent::CommandOutput { line } => {
                if !self.quiet {
                    eprintln!("{line}");
                }
                return;
            }
            RunEvent::Status { message } => eprintln!("{message}"),
            RunEvent::CommandStarted { command } => eprintln!("$ {command}"),
            RunEvent::AttemptFailed {
                attempt,
                max_attempts,
            } => eprintln!("Attempt {attempt}/{max_attempts} failed, trying to fix..."),
            RunEvent::Diagnosed { fault, dependency } => {
                if *dependency {
                    eprintln!("Diagnosis: {fault} (plus a package problem)");
                } else {
                    eprintln!("Diagnosis: {fault}");
                }
            }
            RunEvent::Repairing { target } => eprintln!("Rewriting {target}..."),
            RunEvent::Done { .. } => {}
        }
        self.log.write(&event);
    }
}

fn resolve_provider(args: &Args) -> anyhow::Result<Provider> {
    match args.provider.as_str() {
        "anthropic" => {
            let key = args
                .api_key
                .clone()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                .context("no API key: pass --api-key or set ANTHROPIC_API_KEY")?;
            Ok(Provider::anthropic(key))
        }
        "openai" => {
            let key = args
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .context("no API key: pass --api-key or set OPENAI_API_KEY")?;
            Ok(Provider::openai(key))
        }
        other => bail!("unknown provider {other:?} (expected \"anthropic\" or \"openai\")"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    {
        use tracing_subscriber::EnvFilter;
        let filter =
            EnvFilter::try_from_env("AUTOCOG_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    let args = Args::parse();

    let root = args
        .repo
        .clone()
        .unwrap_or_else(|| PathBuf::from("."))
        .canonicalize()
        .context("repository path does not exist")?;
    tracing::debug!(repo = %root.display(), "target repository");

    let project = Project::new(&root);
    let store = SessionStore::new(&root);

    if args.init {
        project.clear_artifacts()?;
        store.clear()?;
        eprintln!("Removed generated artifacts and the saved session.");
    }

    let provider = resolve_provider(&args)?;
    let client = TextClient::new(provider, args.model.clone());

    let sink: Arc<dyn EventSink> = Arc::new(CliSink {
        log: RunLog::create(&root)?,
        quiet: args.quiet,
    });

    let mut registry = CompositeTools::new()
        .add(FsTools::new(&root))
        .add(PredictTool::new(CommandRunner::new().with_cwd(&root)))
        .add(PackageVersions::new());
    if let Some(ref key) = args.tavily_api_key {
        registry = registry.add(WebSearch::new(key));
    }
    let tools: Arc<dyn ToolProvider> = Arc::new(registry);

    let mut chat = Chat::open(client, store.clone(), Arc::clone(&sink))
        .context("could not load the saved session (re-run with --init to start over)")?;

    let cancel = CancellationToken::new();
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_cancel.cancel();
        }
    });

    let config = LoopConfig {
        max_attempts: args.attempts,
        command: args.command.clone(),
        tell: args.tell.clone(),
    };
    let mut repair_loop = RepairLoop::new(project, store, &mut chat, tools, sink, config);

    match repair_loop.run(cancel).await? {
        Outcome::Succeeded { attempts } => {
            println!("Prediction succeeded after {attempts} attempt(s).");
            Ok(())
        }
        Outcome::ExhaustedAttempts {
            attempts,
            last_excerpt,
        } => {
            eprintln!("Failed after {attempts} attempts, giving up.");
            if !last_excerpt.is_empty() {
                eprintln!("\nLast captured output:\n{last_excerpt}");
            }
            std::process::exit(1);
        }
        Outcome::Interrupted { attempts } => {
            eprintln!("Interrupted after {attempts} attempt(s).");
            std::process::exit(130);
        }
    }
}
