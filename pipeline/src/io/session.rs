//! Session Manager: discovery, creation, loading, and persistence of
//! numbered session directories.
//!
//! Layout of one session (`{root}/{seq:03}_{hash:12}/`):
//!
//! ```text
//! session.json         metadata
//! tasks.json           backlog with live statuses
//! prd_snapshot.md      source document the session was created from
//! run_state.json       resume point
//! parent_session.txt   delta sessions only
//! delta.json           delta sessions only
//! artifacts/<id>/      per-item status log, results, failures
//! bugfix/              per-iteration verification reports
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::core::delta::{DeltaReport, merge_delta};
use crate::core::fix::FIX_PHASE_ID;
use crate::core::hash::{content_hash, sha256_hex, short_hash};
use crate::core::tree_update::roll_up_containers;
use crate::core::types::{Backlog, VerificationResult};
use crate::error::PipelineError;
use crate::io::atomic::{stage, to_pretty_json, write_atomic, write_json_atomic};
use crate::io::backlog_store::{load_backlog, stage_backlog, validate_backlog, write_backlog};
use crate::io::run_state::{RunState, load_run_state, write_run_state};

pub const SESSION_FILE: &str = "session.json";
pub const TASKS_FILE: &str = "tasks.json";
pub const PRD_SNAPSHOT_FILE: &str = "prd_snapshot.md";
pub const RUN_STATE_FILE: &str = "run_state.json";
pub const PARENT_SESSION_FILE: &str = "parent_session.txt";
pub const DELTA_FILE: &str = "delta.json";
pub const ARTIFACTS_DIR: &str = "artifacts";
pub const BUGFIX_DIR: &str = "bugfix";

const STAGING_PREFIX: &str = ".staging-";

static SESSION_DIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9]{3,})_([0-9a-f]{12})$").unwrap());

/// Contents of `session.json`. `path` is derived from where it was found.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionMetadata {
    pub sequence: u32,
    /// Full SHA-256 hex; the directory name carries the first 12 characters.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
    /// Directory name of the session this one was derived from.
    pub parent_session: Option<String>,
    #[serde(skip)]
    pub path: PathBuf,
}

impl SessionMetadata {
    pub fn dir_name(&self) -> String {
        session_dir_name(self.sequence, &self.content_hash)
    }
}

pub fn session_dir_name(sequence: u32, hash: &str) -> String {
    format!("{sequence:03}_{}", short_hash(hash))
}

/// A loaded session: metadata, source snapshot, backlog, and resume point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub metadata: SessionMetadata,
    pub source_document: String,
    pub backlog: Backlog,
    pub run_state: RunState,
}

impl Session {
    pub fn path(&self) -> &Path {
        &self.metadata.path
    }

    pub fn current_item_id(&self) -> Option<&str> {
        self.run_state.current_item_id.as_deref()
    }

    pub fn item_artifacts_dir(&self, item_id: &str) -> PathBuf {
        self.path().join(ARTIFACTS_DIR).join(item_id)
    }

    pub fn bugfix_dir(&self) -> PathBuf {
        self.path().join(BUGFIX_DIR)
    }
}

/// Owns the sessions root directory. All session writes go through here.
#[derive(Debug, Clone)]
pub struct SessionManager {
    root: PathBuf,
}

impl SessionManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Valid sessions under the root, ascending by sequence number.
    ///
    /// Only metadata is read. Directories that do not match the naming
    /// pattern or lack parseable metadata are skipped.
    pub fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        let entries = fs::read_dir(&self.root)
            .with_context(|| format!("read sessions dir {}", self.root.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("read entry in {}", self.root.display()))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !path.is_dir() || !SESSION_DIR_RE.is_match(name) {
                continue;
            }
            match read_metadata(&path) {
                Ok(metadata) => sessions.push(metadata),
                Err(err) => debug!(path = %path.display(), err = %format!("{err:#}"), "skipping session dir"),
            }
        }
        sessions.sort_by_key(|s| s.sequence);
        Ok(sessions)
    }

    pub fn find_latest_session(&self) -> Result<Option<SessionMetadata>> {
        Ok(self.list_sessions()?.pop())
    }

    /// Match a full hash or any unambiguous prefix of at least 12 characters.
    pub fn find_session_by_content_hash(&self, hash: &str) -> Result<Option<SessionMetadata>> {
        Ok(self
            .list_sessions()?
            .into_iter()
            .rev()
            .find(|s| hash.len() >= 12 && s.content_hash.starts_with(hash)))
    }

    /// Resolve an operator selector: directory name, sequence number, or
    /// content hash. `None` selects the latest session.
    pub fn resolve_session(&self, selector: Option<&str>) -> Result<SessionMetadata> {
        let found = match selector {
            None => self.find_latest_session()?,
            Some(sel) if SESSION_DIR_RE.is_match(sel) => {
                self.list_sessions()?.into_iter().find(|s| s.dir_name() == sel)
            }
            Some(sel) if sel.chars().all(|c| c.is_ascii_digit()) => {
                let sessions = self.list_sessions()?;
                let by_sequence = sel
                    .parse::<u32>()
                    .ok()
                    .and_then(|sequence| sessions.into_iter().find(|s| s.sequence == sequence));
                match by_sequence {
                    Some(found) => Some(found),
                    // All-digit hashes are valid hex.
                    None => self.find_session_by_content_hash(sel)?,
                }
            }
            Some(sel) => self.find_session_by_content_hash(sel)?,
        };
        found.ok_or_else(|| {
            PipelineError::SessionNotFound {
                root: self.root.clone(),
            }
            .into()
        })
    }

    /// Load a session and validate its required artifacts.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn load_session(&self, path: &Path) -> Result<Session> {
        for required in [SESSION_FILE, TASKS_FILE, PRD_SNAPSHOT_FILE] {
            if !path.join(required).is_file() {
                return Err(session_load_error(path, format!("missing {required}")));
            }
        }
        if !path.join(ARTIFACTS_DIR).is_dir() {
            return Err(session_load_error(path, format!("missing {ARTIFACTS_DIR}/")));
        }

        let metadata =
            read_metadata(path).map_err(|err| session_load_error(path, format!("{err:#}")))?;
        let source_document = fs::read_to_string(path.join(PRD_SNAPSHOT_FILE))
            .with_context(|| format!("read {}", path.join(PRD_SNAPSHOT_FILE).display()))?;
        let backlog = load_backlog(&path.join(TASKS_FILE))
            .with_context(|| format!("session {}", path.display()))?;
        let run_state = load_run_state(&path.join(RUN_STATE_FILE))?;

        debug!(sequence = metadata.sequence, "session loaded");
        Ok(Session {
            metadata,
            source_document,
            backlog,
            run_state,
        })
    }

    /// Create the next session for `source_document`.
    ///
    /// When the latest session was created from a different document the new
    /// one is a delta session: it links to that session and merges `backlog`
    /// into its backlog (or carries it unchanged when `backlog` is `None`).
    /// With the same document the new session is standalone; it takes
    /// `backlog`, or a copy of the latest backlog when `backlog` is `None`.
    #[instrument(skip_all, fields(root = %self.root.display()))]
    pub fn create_session(&self, source_document: &str, backlog: Option<&Backlog>) -> Result<Session> {
        let sessions = self.list_sessions()?;
        let prior = match sessions.last() {
            Some(meta) => Some(self.load_session(&meta.path)?),
            None => None,
        };
        let parent = prior
            .as_ref()
            .filter(|prior| prior.source_document != source_document);

        let (merged, delta) = match (parent, backlog) {
            (Some(parent), Some(next)) => {
                let (merged, report) = merge_delta(&parent.backlog, next);
                (merged, Some(report))
            }
            (Some(parent), None) => (parent.backlog.clone(), Some(DeltaReport::default())),
            (None, Some(next)) => (next.clone(), None),
            (None, None) => (
                prior.as_ref().map(|p| p.backlog.clone()).unwrap_or_default(),
                None,
            ),
        };
        let (merged, _) = roll_up_containers(&merged);
        validate_backlog(&merged)?;

        let hash = content_hash(&json!({
            "backlog": &merged,
            "source_sha256": sha256_hex(source_document.as_bytes()),
        }));
        let sequence = sessions.last().map_or(1, |s| s.sequence + 1);
        let final_path = self.root.join(session_dir_name(sequence, &hash));
        let metadata = SessionMetadata {
            sequence,
            content_hash: hash,
            created_at: Utc::now(),
            parent_session: parent.map(|p| p.metadata.dir_name()),
            path: final_path.clone(),
        };
        if final_path.exists() {
            return Err(anyhow!("session directory already exists {}", final_path.display()));
        }

        let staging = self
            .root
            .join(format!("{STAGING_PREFIX}{}", metadata.dir_name()));
        if staging.exists() {
            warn!(path = %staging.display(), "removing stale staging dir");
            fs::remove_dir_all(&staging)
                .with_context(|| format!("remove stale staging {}", staging.display()))?;
        }
        fs::create_dir_all(staging.join(ARTIFACTS_DIR))
            .with_context(|| format!("create {}", staging.display()))?;
        fs::create_dir_all(staging.join(BUGFIX_DIR))
            .with_context(|| format!("create {}", staging.display()))?;
        write_atomic(&staging.join(PRD_SNAPSHOT_FILE), source_document)?;
        write_backlog(&staging.join(TASKS_FILE), &merged)?;
        write_run_state(&staging.join(RUN_STATE_FILE), &RunState::default())?;
        if let (Some(parent), Some(report)) = (&metadata.parent_session, &delta) {
            write_atomic(&staging.join(PARENT_SESSION_FILE), &format!("{parent}\n"))?;
            write_json_atomic(&staging.join(DELTA_FILE), report)?;
        }
        // Metadata last: an unrenamed staging dir is never listed anyway.
        write_json_atomic(&staging.join(SESSION_FILE), &metadata)?;
        fs::rename(&staging, &final_path).with_context(|| {
            format!(
                "move session {} into place at {}",
                staging.display(),
                final_path.display()
            )
        })?;

        info!(
            session = %metadata.dir_name(),
            parent = ?metadata.parent_session,
            "created session"
        );
        Ok(Session {
            metadata,
            source_document: source_document.to_string(),
            backlog: merged,
            run_state: RunState::default(),
        })
    }

    /// Resume the latest session when its source snapshot matches
    /// `source_document`; otherwise create a new (possibly delta) session.
    ///
    /// A `backlog` passed for a resumed session must describe the same items
    /// as the session's backlog. Fix work is ignored in that comparison.
    pub fn open_or_create(&self, source_document: &str, backlog: Option<&Backlog>) -> Result<Session> {
        if let Some(latest) = self.find_latest_session()? {
            let session = self.load_session(&latest.path)?;
            if session.source_document == source_document {
                if let Some(next) = backlog {
                    ensure_backlog_matches(&session, next)?;
                }
                info!(session = %latest.dir_name(), "resuming session");
                return Ok(session);
            }
        }
        self.create_session(source_document, backlog)
    }

    /// Replace `tasks.json` then `run_state.json`, each atomically.
    ///
    /// Both temp files are written and synced before either rename.
    pub fn persist(&self, session: &Session) -> Result<()> {
        let backlog_write = stage_backlog(&session.path().join(TASKS_FILE), &session.backlog)?;
        let state_buf = to_pretty_json(&session.run_state)?;
        let state_write = stage(&session.path().join(RUN_STATE_FILE), state_buf.as_bytes())?;
        backlog_write.commit()?;
        state_write.commit()?;
        debug!(session = %session.metadata.dir_name(), "session persisted");
        Ok(())
    }

    /// Replace only `run_state.json`, atomically.
    pub fn persist_run_state(&self, session: &Session, run_state: &RunState) -> Result<()> {
        write_run_state(&session.path().join(RUN_STATE_FILE), run_state)?;
        debug!(
            session = %session.metadata.dir_name(),
            scope = %run_state.scope,
            "run state persisted"
        );
        Ok(())
    }

    /// Append one line to `artifacts/<id>/status.log`.
    pub fn append_status_log(&self, session: &Session, item_id: &str, line: &str) -> Result<()> {
        let dir = session.item_artifacts_dir(item_id);
        fs::create_dir_all(&dir).with_context(|| format!("create {}", dir.display()))?;
        let path = dir.join("status.log");
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        writeln!(file, "{line}").with_context(|| format!("append {}", path.display()))?;
        Ok(())
    }

    /// Write `artifacts/<id>/<name>` atomically.
    pub fn write_item_artifact(
        &self,
        session: &Session,
        item_id: &str,
        name: &str,
        contents: &str,
    ) -> Result<PathBuf> {
        let path = session.item_artifacts_dir(item_id).join(name);
        write_atomic(&path, contents)?;
        Ok(path)
    }

    /// Persist one fix-cycle verification report under
    /// `bugfix/{iteration:03}_{hash:12}/verification.json`.
    pub fn write_bugfix_report(
        &self,
        session: &Session,
        iteration: u32,
        result: &VerificationResult,
    ) -> Result<PathBuf> {
        let value = serde_json::to_value(result)?;
        let dir = session
            .bugfix_dir()
            .join(session_dir_name(iteration, &content_hash(&value)));
        let path = dir.join("verification.json");
        write_json_atomic(&path, result)?;
        debug!(path = %path.display(), iteration, "bugfix report written");
        Ok(path)
    }
}

fn read_metadata(dir: &Path) -> Result<SessionMetadata> {
    let path = dir.join(SESSION_FILE);
    let contents = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
    let mut metadata: SessionMetadata =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    metadata.path = dir.to_path_buf();
    Ok(metadata)
}

fn ensure_backlog_matches(session: &Session, next: &Backlog) -> Result<()> {
    let (_, mut report) = merge_delta(&session.backlog, next);
    report.removed.retain(|id| !id.starts_with(FIX_PHASE_ID));
    if report.is_empty() {
        return Ok(());
    }
    warn!(
        session = %session.metadata.dir_name(),
        added = report.added.len(),
        changed = report.changed.len(),
        removed = report.removed.len(),
        "backlog differs from resumed session"
    );
    Err(PipelineError::BacklogMismatch {
        session: session.metadata.dir_name(),
        added: report.added,
        changed: report.changed,
        removed: report.removed,
    }
    .into())
}

fn session_load_error(path: &Path, reason: String) -> anyhow::Error {
    PipelineError::SessionLoad {
        path: path.to_path_buf(),
        reason,
    }
    .into()
}
