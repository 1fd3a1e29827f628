//! Rune Compose - multi-service orchestration CLI
//!
//! This is the main CLI entry point for Rune Compose.

use clap::{Parser, Subcommand, ValueEnum};
use rune_compose::compose::project::default_state_dir;
use rune_compose::compose::{
    resolve, ComposeOrchestrator, OrchestratorOptions, Project, ProjectOptions, SessionState,
    SessionStore,
};
use rune_compose::driver::docker::DEFAULT_HOST;
use rune_compose::driver::{DockerRuntime, LocalRuntime, RuntimeDriver};
use rune_compose::error::{ComposeError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Rune Compose - declarative multi-service orchestration
#[derive(Parser)]
#[command(name = "rune-compose")]
#[command(author = "Evoker Industries")]
#[command(version)]
#[command(about = "Run multi-service applications from a compose file", long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Compose file (repeat to merge several)
    #[arg(short = 'f', long = "file", global = true)]
    files: Vec<PathBuf>,

    /// Project name
    #[arg(short = 'p', long, global = true)]
    project_name: Option<String>,

    /// Project directory
    #[arg(long, global = true)]
    project_directory: Option<PathBuf>,

    /// Directory for session and runtime state
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Container runtime backend
    #[arg(long, value_enum, default_value_t = RuntimeKind::Local, global = true)]
    runtime: RuntimeKind,

    /// Docker Engine endpoint (defaults to DOCKER_HOST)
    #[arg(long, global = true)]
    host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RuntimeKind {
    /// In-process runtime persisted under the state directory
    Local,
    /// Docker Engine HTTP API
    Docker,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start containers
    Up {
        /// Services to start (with their dependencies); all when empty
        services: Vec<String>,
        /// Stop grace period in seconds used when tearing down after a failure
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Stop and remove containers and networks
    Down {
        /// Remove named volumes
        #[arg(short, long)]
        volumes: bool,
        /// Stop grace period in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Stop services without removing them
    Stop {
        /// Stop grace period in seconds
        #[arg(short, long)]
        timeout: Option<u64>,
    },
    /// Start stopped services
    Start,
    /// List services
    Ps,
    /// Validate the compose file and show the start order
    Config,
}

impl Commands {
    fn timeout(&self) -> Option<u64> {
        match self {
            Commands::Up { timeout, .. }
            | Commands::Down { timeout, .. }
            | Commands::Stop { timeout } => *timeout,
            _ => None,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let env: HashMap<String, String> = std::env::vars().collect();
    let project = Project::load(
        &ProjectOptions {
            files: cli.files,
            name: cli.project_name,
            directory: cli.project_directory,
        },
        &env,
    )?;

    if let Commands::Config = cli.command {
        return print_config(&project);
    }

    let state_dir = cli.state_dir.unwrap_or_else(default_state_dir);
    let driver: Arc<dyn RuntimeDriver> = match cli.runtime {
        RuntimeKind::Local => Arc::new(LocalRuntime::new(&state_dir.join("runtime")).map_err(
            |e| ComposeError::InvalidConfig(format!("cannot open local runtime: {}", e)),
        )?),
        RuntimeKind::Docker => {
            let host = cli
                .host
                .or_else(|| env.get("DOCKER_HOST").cloned())
                .unwrap_or_else(|| DEFAULT_HOST.to_string());
            Arc::new(DockerRuntime::new(&host).map_err(|e| {
                ComposeError::InvalidConfig(format!("cannot use Docker host {}: {}", host, e))
            })?)
        }
    };

    let mut options = OrchestratorOptions::default();
    if let Some(secs) = cli.command.timeout() {
        options.stop_timeout = Duration::from_secs(secs);
    }

    let store = SessionStore::new(&state_dir);
    let mut session = store
        .load(&project.name)?
        .unwrap_or_else(|| SessionState::new(&project.name));
    let orchestrator =
        ComposeOrchestrator::new(&project.name, project.manifest.clone(), driver, options);

    match cli.command {
        Commands::Up { services, .. } => {
            let cancel = CancellationToken::new();
            let token = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupted, waiting for in-flight operations");
                    token.cancel();
                }
            });

            let result = orchestrator.up(&mut session, &cancel, &services).await;
            save_after(&store, &session, result)?;
            print_services(&session);
        }
        Commands::Down { volumes, .. } => {
            let report = orchestrator.down(&mut session, volumes).await?;
            if session.is_clear() && session.networks.is_empty() {
                store.remove(&project.name)?;
            } else {
                store.save(&session)?;
            }
            if let Some(first) = report.failures.into_iter().next() {
                return Err(first.into());
            }
        }
        Commands::Stop { .. } => {
            let report = orchestrator.stop(&mut session).await?;
            store.save(&session)?;
            if let Some(first) = report.failures.into_iter().next() {
                return Err(first.into());
            }
        }
        Commands::Start => {
            let result = orchestrator.start(&mut session).await;
            save_after(&store, &session, result)?;
            print_services(&session);
        }
        Commands::Ps => print_services(&session),
        Commands::Config => {}
    }

    Ok(())
}

/// Persist the session after a command; the command's own error wins over a
/// failed save
fn save_after(store: &SessionStore, session: &SessionState, result: Result<()>) -> Result<()> {
    match (result, store.save(session)) {
        (Err(e), Err(save)) => {
            tracing::warn!("Failed to save session for {}: {}", session.project, save);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(()), saved) => saved,
    }
}

fn print_services(session: &SessionState) {
    println!("{:<20} {:<14} {:<10} ERROR", "SERVICE", "CONTAINER", "STATUS");
    for entry in session.services() {
        println!(
            "{:<20} {:<14} {:<10} {}",
            entry.name,
            entry.handle.as_ref().map(|h| h.short()).unwrap_or("-"),
            entry.status.to_string(),
            entry.error.as_deref().unwrap_or("")
        );
    }
}

fn print_config(project: &Project) -> Result<()> {
    let stages = resolve(&project.manifest)?;

    println!("name: {}", project.name);
    for file in &project.files {
        println!("file: {}", file.display());
    }
    for warning in project.manifest.warnings() {
        println!("warning: {}", warning);
    }
    for (index, stage) in stages.iter().enumerate() {
        println!("stage {}: {}", index + 1, stage.join(", "));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_failure_keeps_command_error() {
        let temp = tempdir().unwrap();
        let blocked = temp.path().join("state");
        std::fs::write(&blocked, "not a directory").unwrap();
        let store = SessionStore::new(&blocked);
        let session = SessionState::new("shop");

        let err = save_after(&store, &session, Err(ComposeError::Cancelled)).unwrap_err();
        assert!(matches!(err, ComposeError::Cancelled));

        let err = save_after(&store, &session, Ok(())).unwrap_err();
        assert!(matches!(err, ComposeError::Io(_)));

        let store = SessionStore::new(temp.path());
        save_after(&store, &session, Ok(())).unwrap();
        assert!(store.load("shop").unwrap().is_some());
    }
}
