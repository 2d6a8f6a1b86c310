//! Pipeline configuration stored in `pipeline.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::atomic::write_atomic;

/// Pipeline configuration (TOML).
///
/// Intended to be edited by humans. Missing fields fall back to defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding numbered session directories, relative to the working directory.
    pub sessions_dir: PathBuf,

    /// Working directory for agent and verifier commands. Unset means the
    /// pipeline's own working directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,

    pub agent: AgentConfig,

    pub verifier: VerifierConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    /// Command that receives an agent request on stdin (e.g. `["claude-agent","--json"]`).
    pub command: Vec<String>,

    /// Wall-clock limit for one agent call.
    pub timeout_secs: u64,

    /// Calls per subtask before the failure is recorded.
    pub max_attempts: u32,

    /// Discard agent stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct VerifierConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
    pub output_limit_bytes: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sessions_dir: PathBuf::from("plan"),
            workdir: None,
            agent: AgentConfig::default(),
            verifier: VerifierConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: vec!["pipeline-agent".to_string()],
            timeout_secs: 30 * 60,
            max_attempts: 1,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            command: vec!["pipeline-verify".to_string()],
            timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sessions_dir.as_os_str().is_empty() {
            return Err(anyhow!("sessions_dir must not be empty"));
        }
        if self
            .workdir
            .as_ref()
            .is_some_and(|dir| dir.as_os_str().is_empty())
        {
            return Err(anyhow!("workdir must not be empty when set"));
        }
        if self.agent.command.is_empty() || self.agent.command[0].trim().is_empty() {
            return Err(anyhow!("agent.command must be a non-empty array"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.max_attempts == 0 {
            return Err(anyhow!("agent.max_attempts must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.verifier.command.is_empty() || self.verifier.command[0].trim().is_empty() {
            return Err(anyhow!("verifier.command must be a non-empty array"));
        }
        if self.verifier.timeout_secs == 0 {
            return Err(anyhow!("verifier.timeout_secs must be > 0"));
        }
        if self.verifier.output_limit_bytes == 0 {
            return Err(anyhow!("verifier.output_limit_bytes must be > 0"));
        }
        Ok(())
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        debug!(path = %path.display(), "config missing, using defaults");
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
