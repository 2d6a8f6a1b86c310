//! Test-only helpers: backlog builders and scripted agent/verifier doubles.

use std::cell::RefCell;
use std::collections::{HashSet, VecDeque};

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{
    Backlog, Bug, HierarchyItem, Milestone, Phase, Severity, Status, Subtask, Task,
    VerificationResult,
};
use crate::io::executor::{AgentExecutor, AgentOutput, AgentRequest, Verifier};
use crate::io::session::{Session, SessionManager};

/// Planned subtask with deterministic text and one story point.
pub fn subtask(id: &str, dependencies: &[&str]) -> Subtask {
    Subtask {
        id: id.to_string(),
        title: format!("{id} title"),
        status: Status::Planned,
        story_points: 1,
        dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        context_scope: format!("{id} contract"),
    }
}

pub fn task(id: &str, subtasks: Vec<Subtask>) -> Task {
    Task {
        id: id.to_string(),
        title: format!("{id} title"),
        status: Status::Planned,
        description: format!("{id} description"),
        subtasks,
    }
}

pub fn milestone(id: &str, tasks: Vec<Task>) -> Milestone {
    Milestone {
        id: id.to_string(),
        title: format!("{id} title"),
        status: Status::Planned,
        tasks,
    }
}

pub fn phase(id: &str, milestones: Vec<Milestone>) -> Phase {
    Phase {
        id: id.to_string(),
        title: format!("{id} title"),
        status: Status::Planned,
        milestones,
    }
}

/// Three phases, all `Planned`:
///
/// ```text
/// P1.M1.T1.{S1,S2}   P1.M1.T2.S1 -> depends on P1.M1.T1.S2
/// P2.M1.T1.S1
/// P3.M1.T1.{S1,S2}   S2 -> depends on P3.M1.T1.S1
/// P3.M2.T1.S1
/// ```
pub fn sample_backlog() -> Backlog {
    Backlog::new(vec![
        phase(
            "P1",
            vec![milestone(
                "P1.M1",
                vec![
                    task(
                        "P1.M1.T1",
                        vec![subtask("P1.M1.T1.S1", &[]), subtask("P1.M1.T1.S2", &[])],
                    ),
                    task(
                        "P1.M1.T2",
                        vec![subtask("P1.M1.T2.S1", &["P1.M1.T1.S2"])],
                    ),
                ],
            )],
        ),
        phase(
            "P2",
            vec![milestone(
                "P2.M1",
                vec![task("P2.M1.T1", vec![subtask("P2.M1.T1.S1", &[])])],
            )],
        ),
        phase(
            "P3",
            vec![
                milestone(
                    "P3.M1",
                    vec![task(
                        "P3.M1.T1",
                        vec![
                            subtask("P3.M1.T1.S1", &[]),
                            subtask("P3.M1.T1.S2", &["P3.M1.T1.S1"]),
                        ],
                    )],
                ),
                milestone(
                    "P3.M2",
                    vec![task("P3.M2.T1", vec![subtask("P3.M2.T1.S1", &[])])],
                ),
            ],
        ),
    ])
}

/// Fresh session for `backlog` under a temp `plan/` root.
///
/// Keep the returned `TempDir` alive for as long as the session is used.
pub fn temp_session(source_document: &str, backlog: &Backlog) -> (TempDir, SessionManager, Session) {
    let temp = tempfile::tempdir().expect("tempdir");
    let sessions = SessionManager::new(temp.path().join("plan"));
    let session = sessions
        .create_session(source_document, Some(backlog))
        .expect("create session");
    (temp, sessions, session)
}

pub fn bug(id: &str, severity: Severity) -> Bug {
    Bug {
        id: id.to_string(),
        severity,
        title: format!("{id} title"),
        description: format!("{id} description"),
        reproduction: format!("{id} reproduction"),
        location: None,
    }
}

/// Result whose `has_bugs` flag is true iff `bugs` is non-empty.
pub fn verification(bugs: Vec<Bug>) -> VerificationResult {
    VerificationResult {
        has_bugs: !bugs.is_empty(),
        summary: format!("{} bug(s)", bugs.len()),
        bugs,
        recommendations: Vec::new(),
    }
}

/// Agent double: records every call and fails the ids it was told to fail.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    failing: HashSet<String>,
    calls: RefCell<Vec<String>>,
    statuses_seen: RefCell<Vec<Option<Status>>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(ids: &[&str]) -> Self {
        Self {
            failing: ids.iter().map(|id| id.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Item ids in dispatch order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    /// Status of the dispatched item inside the snapshot it was sent, per call.
    pub fn statuses_seen(&self) -> Vec<Option<Status>> {
        self.statuses_seen.borrow().clone()
    }
}

impl AgentExecutor for ScriptedExecutor {
    fn execute(&self, request: &AgentRequest<'_>) -> Result<AgentOutput> {
        self.calls.borrow_mut().push(request.item_id.to_string());
        self.statuses_seen
            .borrow_mut()
            .push(request.hierarchy.status_of(request.item_id));
        if self.failing.contains(request.item_id) {
            return Err(anyhow!("scripted failure for {}", request.item_id));
        }
        Ok(AgentOutput {
            summary: format!("done {}", request.item_id),
            artifacts: Vec::new(),
        })
    }
}

/// Verifier double returning queued results in order.
///
/// Once the queue is down to one result, that result repeats.
#[derive(Debug)]
pub struct ScriptedVerifier {
    results: RefCell<VecDeque<VerificationResult>>,
    calls: RefCell<Vec<Vec<String>>>,
}

impl ScriptedVerifier {
    pub fn new(results: Vec<VerificationResult>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Ids of the completed items passed to each call.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }
}

impl Verifier for ScriptedVerifier {
    fn verify(
        &self,
        _source_document: &str,
        completed_items: &[HierarchyItem],
    ) -> Result<VerificationResult> {
        self.calls.borrow_mut().push(
            completed_items
                .iter()
                .map(|item| item.id().to_string())
                .collect(),
        );
        let mut results = self.results.borrow_mut();
        if results.len() > 1 {
            return results
                .pop_front()
                .ok_or_else(|| anyhow!("scripted verifier has no results"));
        }
        results
            .front()
            .cloned()
            .ok_or_else(|| anyhow!("scripted verifier has no results"))
    }
}
