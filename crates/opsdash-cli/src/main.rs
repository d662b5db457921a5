use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use opsdash_core::TranscriptStream;
use opsdash_engine::{
    artifacts, CapabilityRunner, PanelState, RefreshOrchestrator, RunRequest, RunStatus,
    WorkspaceResolver,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "opsdash")]
#[command(about = "Workspace control panel CLI", long_about = None)]
struct Cli {
    /// Use this workspace root instead of detecting one.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh every panel and print the workspace status rollup
    Refresh,
    /// List the capabilities the workspace advertises
    Capabilities,
    /// Launch a capability and stream its output
    Run {
        id: String,
        /// Freeform input passed to the capability
        #[arg(long)]
        input: Option<String>,
        /// Ask the capability to run in check-only mode
        #[arg(long, default_value_t = false)]
        check: bool,
    },
    /// Print the persisted workspace transcript
    Transcript,
    /// Inspect or pin the detected workspace root
    Workspace {
        #[command(subcommand)]
        action: WorkspaceCommands,
    },
}

#[derive(Subcommand)]
enum WorkspaceCommands {
    /// Print the root the resolver would use
    Show,
    /// Persist a root so future sessions skip detection
    Remember { path: Option<PathBuf> },
    /// Drop the persisted root
    Forget,
}

fn init_logging() {
    let level = std::env::var("OPSDASH_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_root(override_root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = override_root {
        return Ok(root);
    }
    match WorkspaceResolver.resolve() {
        Some(root) => Ok(root),
        None => bail!(
            "no workspace root found; pass --root, set {}, or run from inside a workspace",
            opsdash_engine::WORKSPACE_ROOT_ENV
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Commands::Refresh => refresh(cli.root).await,
        Commands::Capabilities => capabilities(cli.root).await,
        Commands::Run { id, input, check } => run(cli.root, id, input, check).await,
        Commands::Transcript => transcript(cli.root),
        Commands::Workspace { action } => workspace(cli.root, action),
    }
}

async fn refresh(root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let state = Arc::new(PanelState::new());
    let orchestrator = RefreshOrchestrator::with_root(state.clone(), root.clone());
    orchestrator.refresh().await;

    println!("workspace: {}", root.display());
    println!("rollup:    {}", state.rollup().await);

    if let Some(snapshot) = state.capabilities.read().await.snapshot.as_ref() {
        println!("{:<14} {:<14} {}", "capabilities", snapshot.indicator.as_str(), snapshot.summary);
    } else {
        println!("{:<14} {:<14} no snapshot", "capabilities", "unknown");
    }
    if let Some(snapshot) = state.meta_check.read().await.snapshot.as_ref() {
        println!("{:<14} {:<14} {}", "meta-check", snapshot.indicator.as_str(), snapshot.summary);
    } else {
        println!("{:<14} {:<14} no snapshot", "meta-check", "unknown");
    }
    if let Some(snapshot) = state.dependencies.read().await.snapshot.as_ref() {
        println!("{:<14} {:<14} {}", "dependencies", snapshot.indicator.as_str(), snapshot.summary);
    } else {
        println!("{:<14} {:<14} no snapshot", "dependencies", "unknown");
    }
    if let Some(snapshot) = state.overrides.read().await.snapshot.as_ref() {
        println!("{:<14} {:<14} {}", "overrides", snapshot.indicator.as_str(), snapshot.summary);
    } else {
        println!("{:<14} {:<14} no snapshot", "overrides", "unknown");
    }
    if let Some(snapshot) = state.agent_runs.read().await.snapshot.as_ref() {
        println!("{:<14} {:<14} {}", "agent-runs", snapshot.indicator.as_str(), snapshot.summary);
    } else {
        println!("{:<14} {:<14} no snapshot", "agent-runs", "unknown");
    }
    Ok(())
}

async fn capabilities(root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let Some(snapshot) = artifacts::fetch_capabilities(&root).await.into_option() else {
        bail!("no capability manifest under {}", root.display());
    };
    for descriptor in &snapshot.manifest.capabilities {
        let check = if descriptor.supports_check_mode() {
            "  (supports --check)"
        } else {
            ""
        };
        println!("{:<24} {}{check}", descriptor.id, descriptor.summary);
    }
    Ok(())
}

async fn run(root: Option<PathBuf>, id: String, input: Option<String>, check: bool) -> Result<()> {
    let root = resolve_root(root)?;
    let state = Arc::new(PanelState::new());
    state.load_transcript(&root).await;
    let runner = CapabilityRunner::new(state.clone(), root.clone());

    // Raw chunks as they arrive; the persisted transcript keeps the
    // coalesced form.
    let mut feed = state.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(entry) = feed.recv().await {
            match entry.stream {
                TranscriptStream::Stdout => {
                    print!("{}", entry.text);
                    let _ = std::io::stdout().flush();
                }
                TranscriptStream::Stderr => {
                    eprint!("{}", entry.text);
                    let _ = std::io::stderr().flush();
                }
                TranscriptStream::Transcript => eprintln!("== {}", entry.text),
            }
        }
    });

    let canceller = runner.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            canceller.cancel().await;
        }
    });

    let request = RunRequest {
        input,
        check: check.then_some(true),
    };
    let outcome = runner.launch(&id, request).await?;
    printer.abort();

    // The in-run persists are fire-and-forget; write the final transcript
    // synchronously so exiting does not race the background write.
    let entries = state.transcript_snapshot().await;
    if let Err(err) = opsdash_storage::persist_transcript(&root, &entries) {
        warn!("transcript_persist_failed: {}: {err}", root.display());
    }

    std::process::exit(match outcome.status {
        RunStatus::Completed => 0,
        RunStatus::Failed => 1,
        RunStatus::Cancelled => 130,
    });
}

fn transcript(root: Option<PathBuf>) -> Result<()> {
    let root = resolve_root(root)?;
    let log = opsdash_storage::load_transcript(&root);
    for entry in log.entries() {
        let capability = entry.capability_id.as_deref().unwrap_or("-");
        println!(
            "{}  {:<20} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            capability,
            entry.text.trim_end()
        );
    }
    Ok(())
}

fn workspace(root: Option<PathBuf>, action: WorkspaceCommands) -> Result<()> {
    match action {
        WorkspaceCommands::Show => match root.or_else(|| WorkspaceResolver.resolve()) {
            Some(root) => println!("{}", root.display()),
            None => bail!("no workspace root found"),
        },
        WorkspaceCommands::Remember { path } => {
            let root = resolve_root(path)?;
            WorkspaceResolver.remember(&root)?;
            println!("remembered {}", root.display());
        }
        WorkspaceCommands::Forget => {
            WorkspaceResolver.forget()?;
            println!("forgot the remembered root");
        }
    }
    Ok(())
}
