//! Agent and verifier boundaries.
//!
//! [`AgentExecutor`] and [`Verifier`] decouple orchestration from whatever
//! actually does the work. The command-backed implementations exchange JSON
//! over stdin/stdout with a configured subprocess; tests use scripted
//! implementations from `test_support`.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Backlog, HierarchyItem, VerificationResult};
use crate::error::PipelineError;
use crate::io::config::{AgentConfig, VerifierConfig};
use crate::io::process::run_command_with_timeout;

/// Set on every child process; its presence means a pipeline is already running.
pub const NESTED_GUARD_ENV: &str = "PIPELINE_RUNNING";

const STDERR_TAIL_CHARS: usize = 2000;

/// Payload for one subtask execution.
#[derive(Debug, Clone, Serialize)]
pub struct AgentRequest<'a> {
    pub item_id: &'a str,
    /// The subtask's work contract.
    pub context_scope: &'a str,
    /// Snapshot of the whole hierarchy at dispatch time.
    pub hierarchy: &'a Backlog,
}

/// Successful agent result, persisted as `artifacts/<id>/result.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub summary: String,
    #[serde(default)]
    pub artifacts: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyRequest<'a> {
    pub source_document: &'a str,
    pub completed_items: &'a [HierarchyItem],
}

/// Runs one subtask to completion. An `Err` marks the subtask `Failed`.
pub trait AgentExecutor {
    fn execute(&self, request: &AgentRequest<'_>) -> Result<AgentOutput>;
}

/// Checks completed work against the source document.
pub trait Verifier {
    fn verify(
        &self,
        source_document: &str,
        completed_items: &[HierarchyItem],
    ) -> Result<VerificationResult>;
}

/// Refuse to start when this process was itself spawned by a pipeline run.
pub fn ensure_not_nested(guard_value: Option<String>) -> Result<()> {
    match guard_value {
        Some(pid) if !pid.trim().is_empty() => Err(PipelineError::NestedExecution { pid }.into()),
        _ => Ok(()),
    }
}

/// Executor that pipes the request JSON into a configured command and reads
/// an [`AgentOutput`] JSON document from its stdout.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    workdir: Option<PathBuf>,
}

impl CommandExecutor {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

impl AgentExecutor for CommandExecutor {
    #[instrument(skip_all, fields(item_id = request.item_id, timeout_secs = self.timeout.as_secs()))]
    fn execute(&self, request: &AgentRequest<'_>) -> Result<AgentOutput> {
        info!("dispatching agent");
        let input = serde_json::to_vec(request).context("serialize agent request")?;
        let output: AgentOutput = run_json_command(
            "agent",
            &self.command,
            self.workdir.as_ref(),
            &input,
            self.timeout,
            self.output_limit_bytes,
        )?;
        debug!(summary = %output.summary, "agent finished");
        Ok(output)
    }
}

/// Verifier backed by a command: request JSON on stdin, [`VerificationResult`] on stdout.
#[derive(Debug, Clone)]
pub struct CommandVerifier {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    workdir: Option<PathBuf>,
}

impl CommandVerifier {
    pub fn new(config: &VerifierConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            workdir: None,
        }
    }

    pub fn with_workdir(mut self, workdir: impl Into<PathBuf>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

impl Verifier for CommandVerifier {
    #[instrument(skip_all, fields(completed = completed_items.len()))]
    fn verify(
        &self,
        source_document: &str,
        completed_items: &[HierarchyItem],
    ) -> Result<VerificationResult> {
        let request = VerifyRequest {
            source_document,
            completed_items,
        };
        let input = serde_json::to_vec(&request).context("serialize verify request")?;
        let result: VerificationResult = run_json_command(
            "verifier",
            &self.command,
            self.workdir.as_ref(),
            &input,
            self.timeout,
            self.output_limit_bytes,
        )?;
        info!(bugs = result.bugs.len(), has_bugs = result.has_bugs, "verification finished");
        Ok(result)
    }
}

/// Wraps an executor and retries failed calls up to `max_attempts` in total.
#[derive(Debug, Clone)]
pub struct RetryingExecutor<E> {
    inner: E,
    max_attempts: u32,
}

impl<E> RetryingExecutor<E> {
    pub fn new(inner: E, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

impl<E: AgentExecutor> AgentExecutor for RetryingExecutor<E> {
    fn execute(&self, request: &AgentRequest<'_>) -> Result<AgentOutput> {
        let mut attempt = 1;
        loop {
            match self.inner.execute(request) {
                Ok(output) => return Ok(output),
                Err(err) if attempt < self.max_attempts => {
                    warn!(
                        item_id = request.item_id,
                        attempt,
                        max_attempts = self.max_attempts,
                        err = %format!("{err:#}"),
                        "agent attempt failed, retrying"
                    );
                    attempt += 1;
                }
                Err(err) => {
                    return Err(err).with_context(|| {
                        format!("agent failed after {attempt} attempt(s)")
                    });
                }
            }
        }
    }
}

fn run_json_command<T: DeserializeOwned>(
    label: &str,
    command: &[String],
    workdir: Option<&PathBuf>,
    input: &[u8],
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<T> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| anyhow!("{label} command is empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args)
        .env(NESTED_GUARD_ENV, std::process::id().to_string());
    if let Some(dir) = workdir {
        cmd.current_dir(dir);
    }

    let output = run_command_with_timeout(cmd, Some(input), timeout, output_limit_bytes)
        .with_context(|| format!("run {label} command"))?;

    if output.timed_out {
        return Err(anyhow!("{label} timed out after {}s", timeout.as_secs()));
    }
    if !output.status.success() {
        return Err(anyhow!(
            "{label} exited with status {:?}: {}",
            output.status.code(),
            output.stderr_tail(STDERR_TAIL_CHARS)
        ));
    }
    if output.stdout_truncated > 0 {
        return Err(anyhow!(
            "{label} output exceeded limit {}",
            output.truncation_notice(label)
        ));
    }
    serde_json::from_slice(&output.stdout).with_context(|| format!("parse {label} output json"))
}
