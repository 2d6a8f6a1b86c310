//! Fix Cycle Controller: verify, turn bugs into fix tasks, run them, re-verify.
//!
//! The loop stops once no critical or major bug remains, or after
//! [`MAX_FIX_ITERATIONS`] rounds. Hitting the ceiling is an outcome, not an
//! error.

use anyhow::Result;
use tracing::{info, instrument, warn};

use crate::core::fix::{MAX_FIX_ITERATIONS, check_complete, create_fix_tasks, inject_fix_tasks};
use crate::core::types::VerificationResult;
use crate::io::executor::{AgentExecutor, Verifier};
use crate::orchestrator::{Orchestrator, RunReport, RunStop};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixCycleStop {
    /// No blocking bug remains.
    Complete,
    /// Iteration ceiling reached with blocking bugs left.
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixCycleOutcome {
    pub stop: FixCycleStop,
    /// Fix rounds actually run; 0 when the initial result was already clean.
    pub iterations: u32,
    /// The most recent verification result.
    pub result: VerificationResult,
    /// Every fix subtask id created, in creation order.
    pub fix_task_ids: Vec<String>,
}

pub struct FixCycle<'v, V: Verifier> {
    verifier: &'v V,
    source_document: String,
    max_iterations: u32,
}

impl<'v, V: Verifier> FixCycle<'v, V> {
    pub fn new(verifier: &'v V, source_document: impl Into<String>) -> Self {
        Self {
            verifier,
            source_document: source_document.into(),
            max_iterations: MAX_FIX_ITERATIONS,
        }
    }

    /// Inject one fix task per bug into the backlog and persist it.
    ///
    /// Returns the new fix subtask ids in report order.
    pub fn create_fix_tasks<E: AgentExecutor>(
        &self,
        orchestrator: &mut Orchestrator<'_, E>,
        result: &VerificationResult,
    ) -> Result<Vec<String>> {
        let backlog = &orchestrator.session().backlog;
        let tasks = create_fix_tasks(backlog, &result.bugs)?;
        let ids: Vec<String> = tasks
            .iter()
            .flat_map(|task| task.subtasks.iter().map(|s| s.id.clone()))
            .collect();
        let next = inject_fix_tasks(backlog, tasks);
        orchestrator.apply_backlog(next)?;
        info!(created = ids.len(), "fix tasks created");
        Ok(ids)
    }

    /// Run the given fix subtasks. A failed fix is logged; the rest still run.
    pub fn execute_fixes<E: AgentExecutor>(
        &self,
        orchestrator: &mut Orchestrator<'_, E>,
        ids: &[String],
    ) -> Result<RunReport> {
        orchestrator.schedule_items(ids)?;
        let report = orchestrator.run()?;
        for id in &report.failed {
            warn!(item_id = %id, "fix task failed");
        }
        if let RunStop::Blocked(blocked) = &report.stop {
            warn!(blocked = blocked.len(), "fix tasks left blocked");
        }
        Ok(report)
    }

    /// Verify the currently completed subtasks against the source document.
    pub fn retest<E: AgentExecutor>(
        &self,
        orchestrator: &Orchestrator<'_, E>,
    ) -> Result<VerificationResult> {
        let completed = orchestrator.session().backlog.completed_subtasks();
        self.verifier.verify(&self.source_document, &completed)
    }

    #[instrument(skip_all, fields(max_iterations = self.max_iterations))]
    pub fn run<E: AgentExecutor>(
        &self,
        orchestrator: &mut Orchestrator<'_, E>,
        initial: VerificationResult,
    ) -> Result<FixCycleOutcome> {
        let mut result = initial;
        let mut iterations = 0;
        let mut fix_task_ids = Vec::new();

        while !check_complete(&result) && iterations < self.max_iterations {
            iterations += 1;
            let blocking = result.blocking_bugs().count();
            info!(iteration = iterations, bugs = result.bugs.len(), blocking, "fix iteration");
            let sessions = orchestrator.sessions();
            sessions.write_bugfix_report(orchestrator.session(), iterations, &result)?;

            let ids = self.create_fix_tasks(orchestrator, &result)?;
            self.execute_fixes(orchestrator, &ids)?;
            fix_task_ids.extend(ids);
            result = self.retest(orchestrator)?;
        }

        let stop = if check_complete(&result) {
            FixCycleStop::Complete
        } else {
            FixCycleStop::Exhausted
        };
        info!(?stop, iterations, "fix cycle finished");
        Ok(FixCycleOutcome {
            stop,
            iterations,
            result,
            fix_task_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scope::Scope;
    use crate::core::types::{Severity, Status};
    use crate::test_support::{
        ScriptedExecutor, ScriptedVerifier, bug, sample_backlog, temp_session, verification,
    };

    #[test]
    fn clean_initial_result_needs_no_iterations() {
        let (_temp, sessions, session) = temp_session("doc", &sample_backlog());
        let executor = ScriptedExecutor::new();
        let verifier = ScriptedVerifier::new(vec![verification(Vec::new())]);
        let mut orchestrator = Orchestrator::new(&sessions, session, &executor, Scope::all())
            .expect("orchestrator");

        let initial = verification(vec![bug("B1", Severity::Minor)]);
        let outcome = FixCycle::new(&verifier, "doc")
            .run(&mut orchestrator, initial)
            .expect("cycle");
        assert_eq!(outcome.stop, FixCycleStop::Complete);
        assert_eq!(outcome.iterations, 0);
        assert!(verifier.calls().is_empty());
        assert!(executor.calls().is_empty());
    }

    #[test]
    fn failed_fix_does_not_stop_other_fixes() {
        let (_temp, sessions, session) = temp_session("doc", &sample_backlog());
        let executor = ScriptedExecutor::failing(&["PFIX.M1.T001.S1"]);
        let verifier = ScriptedVerifier::new(vec![verification(Vec::new())]);
        let mut orchestrator = Orchestrator::new(&sessions, session, &executor, Scope::all())
            .expect("orchestrator");
        let cycle = FixCycle::new(&verifier, "doc");

        let initial = verification(vec![bug("B1", Severity::Critical), bug("B2", Severity::Major)]);
        let ids = cycle
            .create_fix_tasks(&mut orchestrator, &initial)
            .expect("create");
        let report = cycle.execute_fixes(&mut orchestrator, &ids).expect("fixes");

        assert_eq!(report.failed, vec!["PFIX.M1.T001.S1"]);
        assert_eq!(report.completed, vec!["PFIX.M1.T002.S1"]);
        let backlog = &orchestrator.session().backlog;
        assert_eq!(backlog.status_of("PFIX.M1.T001.S1"), Some(Status::Failed));
        assert_eq!(backlog.find_subtask("PFIX.M1.T001.S1").map(|s| s.story_points), Some(13));
    }

    /// Retest only hands completed subtasks to the verifier.
    #[test]
    fn retest_passes_completed_subtasks() {
        let (_temp, sessions, session) = temp_session("doc", &sample_backlog());
        let executor = ScriptedExecutor::new();
        let verifier = ScriptedVerifier::new(vec![verification(Vec::new())]);
        let mut orchestrator = Orchestrator::new(
            &sessions,
            session,
            &executor,
            Scope::parse("P2").expect("scope"),
        )
        .expect("orchestrator");
        orchestrator.run().expect("run");

        FixCycle::new(&verifier, "doc")
            .retest(&orchestrator)
            .expect("retest");
        assert_eq!(verifier.calls(), vec![vec!["P2.M1.T1.S1".to_string()]]);
    }
}
