use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use devflow::config::DevflowConfig;
use devflow::monitor::ContinuousMonitor;
use devflow::server::{create_router, run_monitor_loop, AppState};
use devflow::services::Services;
use devflow::shutdown::{graceful_shutdown, wait_for_shutdown};
use devflow::store::{SessionStore, WorkflowStatistics};
use devflow::workflow::{Stage, StageConfirmer, WorkflowState, WorkflowStatus};

#[derive(Parser)]
#[command(name = "devflow", about = "Drive GitHub issues to human-ready pull requests with AI agents")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a starter devflow.toml
    Init {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run (or resume) the workflow for an issue
    Process {
        issue: u64,
        /// Do not ask for confirmation between stages
        #[arg(long)]
        auto: bool,
        /// Walk the stages without calling agents, GitHub or git
        #[arg(long)]
        dry_run: bool,
        /// Monitor the pull request once it is ready for review
        #[arg(long)]
        monitor: bool,
    },
    /// Fix CI failures and review feedback on a pull request
    Autofix {
        pr: u64,
        #[arg(long)]
        max_iterations: Option<u32>,
        /// Checkout holding the PR branch
        #[arg(long)]
        working_dir: Option<PathBuf>,
    },
    /// Watch a pull request's CI and auto-fix failures
    Monitor {
        pr: u64,
        #[arg(long)]
        max_cycles: Option<u32>,
    },
    /// Show one session, or every session with statistics
    Status { issue: Option<u64> },
    /// Delete a session and its worktree, or prune old finished sessions
    Cleanup {
        #[arg(required_unless_present = "completed_older_than")]
        issue: Option<u64>,
        #[arg(long, value_name = "DAYS", conflicts_with = "issue")]
        completed_older_than: Option<i64>,
    },
    /// Run the webhook service
    Serve,
}

/// Asks on the terminal before each stage.
struct StdinConfirmer;

#[async_trait]
impl StageConfirmer for StdinConfirmer {
    async fn confirm(&self, issue_number: u64, completed: Stage, next: WorkflowState) -> bool {
        let prompt = format!("Issue #{issue_number}: {completed} finished, next state {next}. Continue? [y/N] ");
        tokio::task::spawn_blocking(move || {
            eprint!("{prompt}");
            let _ = io::stderr().flush();
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(_) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
                Err(_) => false,
            }
        })
        .await
        .unwrap_or(false)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    if let Command::Init { owner, name, force } = &cli.command {
        return init(cli.config.as_deref().unwrap_or("devflow.toml"), owner, name, *force);
    }

    let config = DevflowConfig::load(cli.config.as_deref())?;
    let mut services = Services::from_config(config)?;

    match cli.command {
        Command::Init { .. } => Ok(()),
        Command::Process {
            issue,
            auto,
            dry_run,
            monitor,
        } => {
            if !auto && !dry_run {
                services.engine = services.engine.with_confirmer(Arc::new(StdinConfirmer));
            }
            let result = services.engine.process_issue(issue, auto, dry_run).await?;
            print_json(&result)?;

            if monitor && !dry_run && result.current_state == WorkflowState::ReadyForHuman {
                if let Some(pr) = result.pull_request {
                    let max_cycles = services.config.monitor.max_cycles;
                    monitor_pull_request(&services, pr, max_cycles).await?;
                }
            }
            if !result.success {
                anyhow::bail!("issue #{issue} stopped at {}", result.current_state);
            }
            Ok(())
        }
        Command::Autofix {
            pr,
            max_iterations,
            working_dir,
        } => {
            let max_iterations = max_iterations.unwrap_or(services.config.autofix.max_iterations);
            let result = services
                .autofix_engine(working_dir)
                .run_auto_fix_cycle(pr, max_iterations)
                .await?;
            print_json(&result)?;
            if !result.success {
                anyhow::bail!(
                    "auto-fix on PR #{pr} did not finish: {}",
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            Ok(())
        }
        Command::Monitor { pr, max_cycles } => {
            let max_cycles = max_cycles.unwrap_or(services.config.monitor.max_cycles);
            monitor_pull_request(&services, pr, max_cycles).await
        }
        Command::Status { issue: Some(issue) } => {
            match services.engine.workflow_status(issue).await? {
                Some(status) => print_json(&status),
                None => anyhow::bail!("no workflow session for issue #{issue}"),
            }
        }
        Command::Status { issue: None } => {
            let sessions = services.store.list().await?;
            let statistics = WorkflowStatistics::from_sessions(&sessions);
            let sessions: Vec<WorkflowStatus> = sessions.iter().map(WorkflowStatus::from).collect();
            print_json(&StatusReport { statistics, sessions })
        }
        Command::Cleanup {
            issue,
            completed_older_than,
        } => {
            if let Some(days) = completed_older_than {
                let removed = services.store.cleanup_completed(days).await?;
                println!("Removed {removed} finished session(s) older than {days} day(s)");
            } else if let Some(issue) = issue {
                if services.engine.cleanup_workflow(issue).await? {
                    println!("Removed session for issue #{issue}");
                } else {
                    println!("No session for issue #{issue}");
                }
            }
            Ok(())
        }
        Command::Serve => serve(services).await,
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
            .init();
    }
}

fn init(path: &str, owner: &str, name: &str, force: bool) -> anyhow::Result<()> {
    let path = Path::new(path);
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let config = DevflowConfig::template(owner, name);
    std::fs::write(path, config.to_toml()?).with_context(|| format!("writing {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    statistics: WorkflowStatistics,
    sessions: Vec<WorkflowStatus>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn monitor_pull_request(services: &Services, pr: u64, max_cycles: u32) -> anyhow::Result<()> {
    let monitor = ContinuousMonitor::new(Arc::new(services.autofix_engine(None)), &services.config.monitor);
    monitor.start_monitoring(pr).await;
    let reports = monitor.run_monitoring_cycle(max_cycles).await;
    print_json(&reports)
}

async fn serve(services: Services) -> anyhow::Result<()> {
    let host = services.config.server.host.clone();
    let port = services.config.server.port;
    let interval = Duration::from_secs(services.config.monitor.check_interval_secs.max(1));

    tracing::info!(host = %host, port, "Starting DevFlow server");

    let state = Arc::new(AppState::new(services)?);

    let queue_state = Arc::clone(&state);
    tokio::spawn(async move {
        devflow::queue::run_queue_processor(queue_state).await;
    });

    // Resume interrupted sessions and pick up labelled issues
    let scan_state = Arc::clone(&state);
    tokio::spawn(async move {
        devflow::queue::startup::scan_pending_work(&scan_state).await;
    });

    let monitor_state = Arc::clone(&state);
    tokio::spawn(async move {
        run_monitor_loop(monitor_state, interval).await;
    });

    let app = create_router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}")).await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    graceful_shutdown(&state).await;

    Ok(())
}
