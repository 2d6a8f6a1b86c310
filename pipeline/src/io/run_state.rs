//! Resume bookkeeping for a session (`<session>/run_state.json`).

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::io::atomic::write_json_atomic;

/// Persisted resume point of the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunState {
    /// Item most recently moved to `Researching` or `Implementing`.
    pub current_item_id: Option<String>,
    /// Scope string of the last run, for operator display.
    pub scope: String,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            current_item_id: None,
            scope: "all".to_string(),
        }
    }
}

/// Load run state from disk. A missing file yields the default state.
pub fn load_run_state(path: &Path) -> Result<RunState> {
    if !path.exists() {
        debug!(path = %path.display(), "run state missing, using default");
        return Ok(RunState::default());
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read run state {}", path.display()))?;
    let state: RunState = serde_json::from_str(&contents)
        .with_context(|| format!("parse run state {}", path.display()))?;
    debug!(current_item_id = ?state.current_item_id, scope = %state.scope, "run state loaded");
    Ok(state)
}

/// Atomically write run state to disk (temp file + rename).
pub fn write_run_state(path: &Path, state: &RunState) -> Result<()> {
    debug!(path = %path.display(), current_item_id = ?state.current_item_id, "writing run state");
    write_json_atomic(path, state)
}
