#![forbid(unsafe_code)]

//! `agent-foreman`: run coding-agent sessions in parallel worktrees.
//!
//! Each subcommand loads configuration, adopts the tmux sessions left by
//! earlier invocations, runs one coordinator operation and shuts the
//! coordinator down again. `watch` keeps monitoring until interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_foreman::config::GlobalConfig;
use agent_foreman::models::session::Session;
use agent_foreman::mux::TmuxMultiplexer;
use agent_foreman::notify::LogSink;
use agent_foreman::orchestrator::{
    Collaborators, Coordinator, KillOptions, StartOptions, StartOutcome,
};
use agent_foreman::tasks::{JsonTaskStore, TaskStore};
use agent_foreman::vcs::GitCli;
use agent_foreman::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "agent-foreman",
    about = "Run coding-agent sessions in isolated git worktrees and tmux panes",
    version,
    long_about = None
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "agent-foreman.toml")]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start a session for a task.
    Start {
        /// Task identifier.
        id: String,
        /// Allocate a dev-server port and export it as `PORT`.
        #[arg(long)]
        port: bool,
        /// Branch to cut the worktree from. Ignored when the session branch
        /// is left over from an earlier run, which is reused as is.
        #[arg(long)]
        base: Option<String>,
    },
    /// Attach the terminal to a session's pane.
    Attach {
        /// Task identifier.
        id: String,
    },
    /// Stop a session and release its resources.
    Kill {
        /// Task identifier.
        id: String,
        /// Leave the worktree on disk.
        #[arg(long)]
        keep_worktree: bool,
        /// Fail instead of discarding uncommitted changes.
        #[arg(long)]
        preserve_changes: bool,
    },
    /// Show sessions.
    Status {
        /// Only show this task's session.
        id: Option<String>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// List tasks from the task store.
    Tasks,
    /// Monitor live sessions and log state changes until interrupted.
    Watch,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(
        config = %args.config.display(),
        repo_root = %config.repo_root().display(),
        "configuration loaded"
    );

    let tasks = Arc::new(JsonTaskStore::new(config.task_file.clone()));
    if let Command::Tasks = args.command {
        return print_tasks(tasks.as_ref()).await;
    }

    let coordinator = Coordinator::from_config(
        &config,
        Collaborators {
            mux: Arc::new(TmuxMultiplexer::new(config.multiplexer.binary.clone())),
            vcs: Arc::new(GitCli::new(config.repo_root().to_path_buf())),
            tasks,
            sink: Arc::new(LogSink),
        },
    )?;

    let result = match coordinator.adopt_live_sessions().await {
        Ok(adopted) => {
            if !adopted.is_empty() {
                info!(count = adopted.len(), "adopted live sessions");
            }
            dispatch(&coordinator, args.command).await
        }
        Err(err) => Err(err),
    };

    coordinator.shutdown().await;
    result
}

async fn dispatch(coordinator: &Coordinator, command: Command) -> Result<()> {
    match command {
        Command::Start { id, port, base } => {
            let StartOutcome { session, warnings } = coordinator
                .start(
                    &id,
                    StartOptions {
                        base_branch: base,
                        dev_server: port.then_some(true),
                    },
                )
                .await?;
            for warning in &warnings {
                warn!(task_id = %id, %warning, "session started with warning");
            }
            println!(
                "started {} in {}{}",
                session.id,
                session.worktree_path.display(),
                session
                    .port
                    .map(|port| format!(" (PORT={port})"))
                    .unwrap_or_default()
            );
            Ok(())
        }
        Command::Attach { id } => coordinator.attach(&id).await,
        Command::Kill {
            id,
            keep_worktree,
            preserve_changes,
        } => {
            let options = KillOptions {
                remove_worktree: keep_worktree.then_some(false),
                preserve_changes,
            };
            let session = coordinator.kill(&id, options).await?;
            println!("stopped {}", session.id);
            Ok(())
        }
        Command::Status { id, json } => {
            let sessions = coordinator.status(id.as_deref()).await;
            if json {
                let body = serde_json::to_string_pretty(&sessions)
                    .map_err(|err| AppError::Io(format!("failed to encode status: {err}")))?;
                println!("{body}");
            } else {
                print_sessions(&sessions);
            }
            Ok(())
        }
        Command::Tasks => Ok(()),
        Command::Watch => {
            info!("watching sessions, press Ctrl-C to stop");
            shutdown_signal().await;
            info!("shutdown signal received");
            Ok(())
        }
    }
}

fn print_sessions(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("no sessions");
        return;
    }
    println!("{:<24} {:<10} {:<6} WORKTREE", "ID", "STATE", "PORT");
    for session in sessions {
        println!(
            "{:<24} {:<10} {:<6} {}",
            session.id,
            session.state,
            session
                .port
                .map_or_else(|| "-".to_owned(), |port| port.to_string()),
            session.worktree_path.display()
        );
    }
}

async fn print_tasks(store: &dyn TaskStore) -> Result<()> {
    let tasks = store.list().await?;
    if tasks.is_empty() {
        println!("no tasks");
        return Ok(());
    }
    for task in tasks {
        println!(
            "{:<24} {:<12} {}",
            task.id,
            task.status.as_str(),
            task.title
        );
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
