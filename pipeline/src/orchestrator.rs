//! Task Orchestrator: drives scheduled items through the status machine.
//!
//! One item is processed at a time. Each transition is validated, applied to
//! a fresh copy of the backlog, persisted atomically, and appended to the
//! item's `status.log` before the in-memory session is replaced.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::core::queue::{BlockedItem, QueuedItem, Selection, build_queue, select_next, unmet_dependencies};
use crate::core::scope::{Scope, resolve};
use crate::core::status::is_legal_transition;
use crate::core::tree_update::{replace_status, roll_up_containers};
use crate::core::types::{Backlog, ItemKind, Status};
use crate::error::PipelineError;
use crate::io::atomic::to_pretty_json;
use crate::io::backlog_store::validate_backlog;
use crate::io::executor::{AgentExecutor, AgentRequest};
use crate::io::session::{Session, SessionManager};

const RESULT_FILE: &str = "result.json";
const FAILURE_FILE: &str = "failure.txt";

/// Why a run stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStop {
    /// Nothing pending remains in the queue.
    Drained,
    /// Pending items remain but each waits on an incomplete dependency.
    Blocked(Vec<BlockedItem>),
}

/// Outcome of one [`Orchestrator::process_next`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// A container was moved to `Implementing`; its children do the work.
    Activated { id: String },
    /// A subtask was dispatched and ended in `status`.
    Executed { id: String, status: Status },
    Idle(RunStop),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub stop: RunStop,
}

pub struct Orchestrator<'a, E: AgentExecutor> {
    sessions: &'a SessionManager,
    executor: &'a E,
    session: Session,
    scope: Scope,
    queue: Vec<QueuedItem>,
    queue_position: usize,
}

impl<'a, E: AgentExecutor> Orchestrator<'a, E> {
    /// Build the queue for `scope` and record it as the session's scope.
    pub fn new(
        sessions: &'a SessionManager,
        session: Session,
        executor: &'a E,
        scope: Scope,
    ) -> Result<Self> {
        let mut orchestrator = Self {
            sessions,
            executor,
            session,
            scope: Scope::all(),
            queue: Vec::new(),
            queue_position: 0,
        };
        orchestrator.set_scope(scope)?;
        Ok(orchestrator)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn sessions(&self) -> &'a SessionManager {
        self.sessions
    }

    pub fn into_session(self) -> Session {
        self.session
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn queue(&self) -> &[QueuedItem] {
        &self.queue
    }

    /// Index in the queue of the item most recently selected.
    pub fn queue_position(&self) -> usize {
        self.queue_position
    }

    /// Replace the queue with the items `scope` resolves to.
    ///
    /// Whatever remained of the previous queue is discarded. The new scope
    /// is written to `run_state.json` before the queue is replaced.
    pub fn set_scope(&mut self, scope: Scope) -> Result<()> {
        let mut run_state = self.session.run_state.clone();
        run_state.scope = scope.to_string();
        self.sessions.persist_run_state(&self.session, &run_state)?;
        self.session.run_state = run_state;

        let items = resolve(&self.session.backlog, &scope);
        self.queue = build_queue(&items);
        self.queue_position = 0;
        info!(scope = %scope, queued = self.queue.len(), "queue rebuilt");
        self.scope = scope;
        Ok(())
    }

    /// Replace the queue with exactly `ids`, in the given order.
    ///
    /// Used for items the scope grammar cannot name, such as fix tasks.
    pub fn schedule_items(&mut self, ids: &[String]) -> Result<()> {
        let mut queue = Vec::with_capacity(ids.len());
        for id in ids {
            let item = self
                .session
                .backlog
                .find(id)
                .ok_or_else(|| PipelineError::ItemNotFound { id: id.clone() })?;
            queue.push(QueuedItem::from(&item));
        }
        info!(queued = queue.len(), "queue replaced with explicit items");
        self.queue = queue;
        self.queue_position = 0;
        Ok(())
    }

    /// Replace the backlog wholesale after a structural edit (new items).
    ///
    /// The replacement must pass the same checks as a loaded `tasks.json`.
    pub fn apply_backlog(&mut self, backlog: Backlog) -> Result<()> {
        validate_backlog(&backlog)?;
        let (backlog, _) = roll_up_containers(&backlog);
        let mut next = self.session.clone();
        next.backlog = backlog;
        self.sessions.persist(&next)?;
        self.session = next;
        debug!("backlog replaced");
        Ok(())
    }

    /// Validate and apply one status transition, then persist it.
    #[instrument(skip_all, fields(item_id = id, to = %status))]
    pub fn set_status(&mut self, id: &str, status: Status, reason: &str) -> Result<()> {
        let backlog = &self.session.backlog;
        let item = backlog
            .find(id)
            .ok_or_else(|| PipelineError::ItemNotFound { id: id.to_string() })?;
        let from = item.status();
        if !is_legal_transition(from, status) {
            return Err(PipelineError::InvalidTransition {
                id: id.to_string(),
                from,
                to: status,
            }
            .into());
        }
        let activating = matches!(status, Status::Researching | Status::Implementing);
        if activating && let Some(subtask) = backlog.find_subtask(id) {
            let unmet = unmet_dependencies(backlog, subtask);
            if !unmet.is_empty() {
                return Err(PipelineError::DependenciesUnmet {
                    id: id.to_string(),
                    unmet,
                }
                .into());
            }
        }

        let replaced = replace_status(backlog, id, status)
            .ok_or_else(|| PipelineError::ItemNotFound { id: id.to_string() })?;
        let (next_backlog, rolled) = roll_up_containers(&replaced);

        let mut next = self.session.clone();
        next.backlog = next_backlog;
        if activating {
            next.run_state.current_item_id = Some(id.to_string());
        }
        self.sessions.persist(&next)?;
        self.session = next;

        let now = Utc::now().to_rfc3339();
        self.sessions
            .append_status_log(&self.session, id, &format!("{now} {from} -> {status}: {reason}"))?;
        for rolled_id in &rolled {
            self.sessions.append_status_log(
                &self.session,
                rolled_id,
                &format!("{now} -> {}: all children settled", Status::Complete),
            )?;
        }
        debug!(%from, rolled = rolled.len(), "status updated");
        Ok(())
    }

    /// Select and process the next eligible item.
    ///
    /// Agent failures are recorded on the item and do not error; only
    /// persistence failures propagate.
    pub fn process_next(&mut self) -> Result<Step> {
        let selection = select_next(
            &self.session.backlog,
            &self.queue,
            self.session.current_item_id(),
        );
        let item = match selection {
            Selection::Next(item) => item,
            Selection::Drained => return Ok(Step::Idle(RunStop::Drained)),
            Selection::Blocked(blocked) => {
                for entry in &blocked {
                    warn!(item_id = %entry.id, unmet = ?entry.unmet, "item blocked");
                }
                return Ok(Step::Idle(RunStop::Blocked(blocked)));
            }
        };
        if let Some(position) = self.queue.iter().position(|q| q.id == item.id) {
            self.queue_position = position;
        }

        if item.kind != ItemKind::Subtask {
            self.set_status(&item.id, Status::Researching, "scheduled")?;
            self.set_status(&item.id, Status::Implementing, "children scheduled")?;
            return Ok(Step::Activated { id: item.id });
        }
        let status = self.execute_subtask(&item.id)?;
        Ok(Step::Executed {
            id: item.id,
            status,
        })
    }

    /// Process items until the queue drains or only blocked items remain.
    pub fn run(&mut self) -> Result<RunReport> {
        let mut completed = Vec::new();
        let mut failed = Vec::new();
        loop {
            match self.process_next()? {
                Step::Activated { .. } => {}
                Step::Executed { id, status } => {
                    if status == Status::Complete {
                        completed.push(id);
                    } else {
                        failed.push(id);
                    }
                }
                Step::Idle(stop) => {
                    info!(
                        completed = completed.len(),
                        failed = failed.len(),
                        blocked = matches!(stop, RunStop::Blocked(_)),
                        "run finished"
                    );
                    return Ok(RunReport {
                        completed,
                        failed,
                        stop,
                    });
                }
            }
        }
    }

    #[instrument(skip_all, fields(item_id = id))]
    fn execute_subtask(&mut self, id: &str) -> Result<Status> {
        if self.session.backlog.status_of(id) == Some(Status::Planned) {
            self.set_status(id, Status::Researching, "dispatching")?;
        }
        if self.session.backlog.status_of(id) == Some(Status::Researching) {
            self.set_status(id, Status::Implementing, "agent running")?;
        }

        let subtask = self
            .session
            .backlog
            .find_subtask(id)
            .cloned()
            .ok_or_else(|| PipelineError::ItemNotFound { id: id.to_string() })?;
        let request = AgentRequest {
            item_id: id,
            context_scope: &subtask.context_scope,
            hierarchy: &self.session.backlog,
        };

        match self.executor.execute(&request) {
            Ok(output) => {
                self.sessions.write_item_artifact(
                    &self.session,
                    id,
                    RESULT_FILE,
                    &to_pretty_json(&output)?,
                )?;
                self.set_status(id, Status::Complete, &output.summary)?;
                info!("subtask complete");
                Ok(Status::Complete)
            }
            Err(err) => {
                let reason = format!("{err:#}");
                warn!(err = %reason, "subtask failed");
                self.sessions.write_item_artifact(
                    &self.session,
                    id,
                    FAILURE_FILE,
                    &format!("{reason}\n"),
                )?;
                self.set_status(id, Status::Failed, &reason)?;
                Ok(Status::Failed)
            }
        }
    }
}
