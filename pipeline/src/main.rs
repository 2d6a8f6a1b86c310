//! PRD-to-implementation pipeline CLI.
//!
//! Sessions live under `plan/` (configurable). `run` resumes the latest
//! session when the PRD is unchanged and starts a delta session otherwise.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use pipeline::core::scope::Scope;
use pipeline::core::types::VerificationResult;
use pipeline::error::PipelineError;
use pipeline::exit_codes;
use pipeline::fix_cycle::{FixCycle, FixCycleStop};
use pipeline::inspect::{current_item, render_hierarchy, render_sessions};
use pipeline::io::backlog_store::load_backlog;
use pipeline::io::config::{PipelineConfig, load_config, write_config};
use pipeline::io::executor::{
    CommandExecutor, CommandVerifier, NESTED_GUARD_ENV, RetryingExecutor, ensure_not_nested,
};
use pipeline::io::session::{Session, SessionManager};
use pipeline::logging;
use pipeline::orchestrator::{Orchestrator, RunStop};

#[derive(Parser)]
#[command(
    name = "pipeline",
    version,
    about = "Resumable PRD-to-implementation pipeline"
)]
struct Cli {
    /// Path to the pipeline config file.
    #[arg(long, global = true, default_value = "pipeline.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default `pipeline.toml`.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Execute backlog items for a PRD, resuming where the last run stopped.
    Run {
        /// Product requirements document.
        #[arg(long)]
        prd: PathBuf,
        /// Backlog JSON to seed (or delta-merge into) the session.
        #[arg(long)]
        tasks: Option<PathBuf>,
        /// `all`, or a phase/milestone/task/subtask id such as `P1.M2`.
        #[arg(long, default_value = "all")]
        scope: String,
    },
    /// Run the verify/fix cycle from a verification report.
    Fix {
        /// Verification result JSON to start from.
        #[arg(long)]
        report: PathBuf,
        /// Session directory name, sequence number, or content hash.
        #[arg(long)]
        session: Option<String>,
    },
    /// List sessions, oldest first.
    Sessions,
    /// Print the backlog hierarchy with statuses.
    Show {
        #[arg(long)]
        session: Option<String>,
    },
    /// Print the item the last run was working on.
    Current {
        #[arg(long)]
        session: Option<String>,
    },
    /// Check a session's artifacts, schema, and invariants.
    Validate {
        #[arg(long)]
        session: Option<String>,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => report_error(&err),
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run { prd, tasks, scope } => cmd_run(&cli.config, &prd, tasks.as_deref(), &scope),
        Command::Fix { report, session } => cmd_fix(&cli.config, &report, session.as_deref()),
        Command::Sessions => cmd_sessions(&cli.config),
        Command::Show { session } => cmd_show(&cli.config, session.as_deref()),
        Command::Current { session } => cmd_current(&cli.config, session.as_deref()),
        Command::Validate { session } => cmd_validate(&cli.config, session.as_deref()),
    }
}

fn report_error(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<PipelineError>() {
        Some(typed) => {
            eprintln!("error[{}]: {err:#}", typed.code().as_str());
            match typed {
                PipelineError::ScopeParse(_) => exit_codes::INVALID_SCOPE,
                _ => exit_codes::INVALID,
            }
        }
        None => {
            eprintln!("{err:#}");
            exit_codes::INVALID
        }
    }
}

fn cmd_init(config_path: &Path, force: bool) -> Result<i32> {
    if config_path.exists() && !force {
        println!("{} already exists", config_path.display());
        return Ok(exit_codes::OK);
    }
    write_config(config_path, &PipelineConfig::default())?;
    println!("wrote {}", config_path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(config_path: &Path, prd: &Path, tasks: Option<&Path>, scope: &str) -> Result<i32> {
    let scope = Scope::parse(scope).map_err(PipelineError::from)?;
    ensure_not_nested(std::env::var(NESTED_GUARD_ENV).ok())?;
    let cfg = load_config(config_path)?;

    let source = fs::read_to_string(prd).with_context(|| format!("read {}", prd.display()))?;
    let backlog = tasks.map(load_backlog).transpose()?;
    let sessions = SessionManager::new(&cfg.sessions_dir);
    let session = sessions.open_or_create(&source, backlog.as_ref())?;
    println!("session {}", session.metadata.dir_name());

    let executor = agent_executor(&cfg);
    let mut orchestrator = Orchestrator::new(&sessions, session, &executor, scope)?;
    let report = orchestrator.run()?;

    println!(
        "completed {}, failed {}",
        report.completed.len(),
        report.failed.len()
    );
    for id in &report.failed {
        println!("failed {id}");
    }
    if let RunStop::Blocked(blocked) = &report.stop {
        for entry in blocked {
            println!("blocked {} (waiting on {})", entry.id, entry.unmet.join(", "));
        }
        return Ok(exit_codes::BLOCKED);
    }
    if !report.failed.is_empty() {
        return Ok(exit_codes::FAILED_ITEMS);
    }
    Ok(exit_codes::OK)
}

fn cmd_fix(config_path: &Path, report: &Path, selector: Option<&str>) -> Result<i32> {
    ensure_not_nested(std::env::var(NESTED_GUARD_ENV).ok())?;
    let cfg = load_config(config_path)?;
    let sessions = SessionManager::new(&cfg.sessions_dir);
    let session = load_selected(&sessions, selector)?;

    let raw = fs::read_to_string(report).with_context(|| format!("read {}", report.display()))?;
    let initial: VerificationResult = serde_json::from_str(&raw)
        .with_context(|| format!("parse verification report {}", report.display()))?;

    let executor = agent_executor(&cfg);
    let verifier = command_verifier(&cfg);
    let source = session.source_document.clone();
    let mut orchestrator = Orchestrator::new(&sessions, session, &executor, Scope::all())?;
    let outcome = FixCycle::new(&verifier, source).run(&mut orchestrator, initial)?;

    println!(
        "fix cycle {:?} after {} iteration(s), {} fix task(s)",
        outcome.stop,
        outcome.iterations,
        outcome.fix_task_ids.len()
    );
    for bug in outcome.result.blocking_bugs() {
        println!("open {} [{}] {}", bug.id, bug.severity, bug.title);
    }
    Ok(match outcome.stop {
        FixCycleStop::Complete => exit_codes::OK,
        FixCycleStop::Exhausted => exit_codes::FIX_EXHAUSTED,
    })
}

fn cmd_sessions(config_path: &Path) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let sessions = SessionManager::new(&cfg.sessions_dir).list_sessions()?;
    print!("{}", render_sessions(&sessions));
    Ok(exit_codes::OK)
}

fn cmd_show(config_path: &Path, selector: Option<&str>) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let session = load_selected(&SessionManager::new(&cfg.sessions_dir), selector)?;
    println!(
        "session {} (scope {})",
        session.metadata.dir_name(),
        session.run_state.scope
    );
    print!(
        "{}",
        render_hierarchy(&session.backlog, session.current_item_id())
    );
    Ok(exit_codes::OK)
}

fn cmd_current(config_path: &Path, selector: Option<&str>) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let session = load_selected(&SessionManager::new(&cfg.sessions_dir), selector)?;
    match current_item(&session) {
        Some(item) => println!(
            "{} {} [{}] {}",
            item.kind(),
            item.id(),
            item.status(),
            item.title()
        ),
        None => println!("none"),
    }
    Ok(exit_codes::OK)
}

fn cmd_validate(config_path: &Path, selector: Option<&str>) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let session = load_selected(&SessionManager::new(&cfg.sessions_dir), selector)?;
    println!("ok {}", session.metadata.dir_name());
    Ok(exit_codes::OK)
}

fn agent_executor(cfg: &PipelineConfig) -> RetryingExecutor<CommandExecutor> {
    let mut executor = CommandExecutor::new(&cfg.agent);
    if let Some(dir) = &cfg.workdir {
        executor = executor.with_workdir(dir);
    }
    RetryingExecutor::new(executor, cfg.agent.max_attempts)
}

fn command_verifier(cfg: &PipelineConfig) -> CommandVerifier {
    let mut verifier = CommandVerifier::new(&cfg.verifier);
    if let Some(dir) = &cfg.workdir {
        verifier = verifier.with_workdir(dir);
    }
    verifier
}

fn load_selected(sessions: &SessionManager, selector: Option<&str>) -> Result<Session> {
    let metadata = sessions.resolve_session(selector)?;
    sessions.load_session(&metadata.path)
}
