//! Lifecycle tests spanning orchestrator, session store, and fix cycle.
//!
//! Each test drives the library through a full scenario against a temp
//! `plan/` directory, reloading sessions from disk between phases the way a
//! restarted process would.

use std::fs;

use pipeline::core::scope::Scope;
use pipeline::core::types::{Backlog, Severity, Status};
use pipeline::fix_cycle::{FixCycle, FixCycleStop};
use pipeline::orchestrator::{Orchestrator, RunStop};
use pipeline::test_support::{
    ScriptedExecutor, ScriptedVerifier, bug, sample_backlog, temp_session, verification,
};

fn scope(input: &str) -> Scope {
    Scope::parse(input).expect("scope")
}

/// A second run over a finished session dispatches nothing.
#[test]
fn resumed_run_after_completion_is_a_no_op() {
    let (_temp, sessions, session) = temp_session("doc", &sample_backlog());
    let path = session.path().to_path_buf();

    let first = ScriptedExecutor::new();
    let mut orchestrator = Orchestrator::new(&sessions, session, &first, Scope::all())
        .expect("orchestrator");
    let report = orchestrator.run().expect("first run");
    assert_eq!(report.completed.len(), 7);
    drop(orchestrator);

    let resumed = sessions.open_or_create("doc", None).expect("resume");
    assert_eq!(resumed.path(), path.as_path());

    let second = ScriptedExecutor::new();
    let mut orchestrator = Orchestrator::new(&sessions, resumed, &second, Scope::all())
        .expect("orchestrator");
    let report = orchestrator.run().expect("second run");
    assert!(report.completed.is_empty());
    assert_eq!(report.stop, RunStop::Drained);
    assert!(second.calls().is_empty());
    assert_eq!(sessions.list_sessions().expect("list").len(), 1);
}

/// Process dies after moving an item to `Researching`.
///
/// On restart the in-flight item is picked up first and no subtask is
/// dispatched twice.
#[test]
fn interrupted_item_is_retried_first_after_restart() {
    let (_temp, sessions, session) = temp_session("doc", &sample_backlog());
    let path = session.path().to_path_buf();

    let idle = ScriptedExecutor::new();
    let mut orchestrator = Orchestrator::new(&sessions, session, &idle, Scope::all())
        .expect("orchestrator");
    orchestrator
        .set_status("P2.M1.T1.S1", Status::Researching, "dispatching")
        .expect("transition");
    drop(orchestrator);

    let reloaded = sessions.load_session(&path).expect("reload");
    assert_eq!(reloaded.current_item_id(), Some("P2.M1.T1.S1"));
    assert_eq!(
        reloaded.backlog.status_of("P2.M1.T1.S1"),
        Some(Status::Researching)
    );

    let executor = ScriptedExecutor::new();
    let mut orchestrator = Orchestrator::new(&sessions, reloaded, &executor, Scope::all())
        .expect("orchestrator");
    orchestrator.run().expect("run");

    let calls = executor.calls();
    assert_eq!(calls.first().map(String::as_str), Some("P2.M1.T1.S1"));
    assert_eq!(calls.len(), 7);
    let mut unique = calls.clone();
    unique.sort();
    unique.dedup();
    assert_eq!(unique.len(), calls.len());
}

#[test]
fn set_scope_replaces_pending_queue() {
    let (_temp, sessions, session) = temp_session("doc", &sample_backlog());
    let executor = ScriptedExecutor::new();
    let mut orchestrator = Orchestrator::new(&sessions, session, &executor, scope("P1"))
        .expect("orchestrator");
    assert!(orchestrator.queue().iter().all(|q| q.id.starts_with("P1")));

    orchestrator.set_scope(scope("P2")).expect("set scope");
    assert!(orchestrator.queue().iter().all(|q| q.id.starts_with("P2")));
    assert_eq!(orchestrator.session().run_state.scope, "P2");
    let on_disk = sessions
        .load_session(orchestrator.session().path())
        .expect("reload");
    assert_eq!(on_disk.run_state.scope, "P2");

    orchestrator.run().expect("run");
    assert_eq!(executor.calls(), vec!["P2.M1.T1.S1"]);
    let backlog = &orchestrator.session().backlog;
    assert_eq!(backlog.status_of("P2"), Some(Status::Complete));
    assert_eq!(backlog.status_of("P1.M1.T1.S1"), Some(Status::Planned));
}

/// A task scope touches only that task's subtasks.
#[test]
fn task_scope_leaves_siblings_untouched() {
    let (_temp, sessions, session) = temp_session("doc", &sample_backlog());
    let executor = ScriptedExecutor::new();
    let mut orchestrator = Orchestrator::new(&sessions, session, &executor, scope("P3.M1.T1"))
        .expect("orchestrator");

    let report = orchestrator.run().expect("run");
    assert_eq!(report.stop, RunStop::Drained);
    assert_eq!(executor.calls(), vec!["P3.M1.T1.S1", "P3.M1.T1.S2"]);

    let backlog = &orchestrator.session().backlog;
    assert_eq!(backlog.status_of("P3.M1.T1"), Some(Status::Complete));
    assert_eq!(backlog.status_of("P3.M2.T1.S1"), Some(Status::Planned));
    assert_ne!(backlog.status_of("P3"), Some(Status::Complete));
}

/// Editing one subtask in a new PRD revision re-runs only that subtask.
#[test]
fn delta_session_reruns_only_changed_work() {
    let (_temp, sessions, session) = temp_session("v1", &sample_backlog());
    let first = ScriptedExecutor::new();
    let mut orchestrator = Orchestrator::new(&sessions, session, &first, Scope::all())
        .expect("orchestrator");
    orchestrator.run().expect("first run");
    let parent = orchestrator.session().metadata.dir_name();
    drop(orchestrator);

    let mut phases = sample_backlog().phases().to_vec();
    phases[1].milestones[0].tasks[0].subtasks[0].title = "reworded".to_string();
    let revised = Backlog::new(phases);

    let delta = sessions
        .open_or_create("v2", Some(&revised))
        .expect("delta session");
    assert_eq!(delta.metadata.parent_session.as_deref(), Some(parent.as_str()));
    assert_eq!(delta.backlog.status_of("P2.M1.T1.S1"), Some(Status::Planned));
    assert_eq!(delta.backlog.status_of("P1.M1.T1.S1"), Some(Status::Complete));

    let second = ScriptedExecutor::new();
    let mut orchestrator = Orchestrator::new(&sessions, delta, &second, Scope::all())
        .expect("orchestrator");
    orchestrator.run().expect("second run");
    assert_eq!(second.calls(), vec!["P2.M1.T1.S1"]);
    assert_eq!(
        orchestrator.session().backlog.status_of("P2"),
        Some(Status::Complete)
    );
}

#[test]
fn fix_cycle_completes_when_retest_is_clean() {
    let (_temp, sessions, session) = temp_session("doc", &sample_backlog());
    let executor = ScriptedExecutor::new();
    let verifier = ScriptedVerifier::new(vec![verification(Vec::new())]);
    let mut orchestrator = Orchestrator::new(&sessions, session, &executor, Scope::all())
        .expect("orchestrator");

    let initial = verification(vec![bug("B1", Severity::Major)]);
    let outcome = FixCycle::new(&verifier, "doc")
        .run(&mut orchestrator, initial)
        .expect("cycle");

    assert_eq!(outcome.stop, FixCycleStop::Complete);
    assert_eq!(outcome.iterations, 1);
    assert_eq!(outcome.fix_task_ids, vec!["PFIX.M1.T001.S1"]);
    assert_eq!(executor.calls(), vec!["PFIX.M1.T001.S1"]);
    assert_eq!(verifier.calls().len(), 1);
    assert_eq!(
        orchestrator.session().backlog.status_of("PFIX"),
        Some(Status::Complete)
    );
}

/// Persistent critical bugs stop the cycle at the iteration ceiling.
#[test]
fn fix_cycle_stops_after_three_iterations() {
    let (_temp, sessions, session) = temp_session("doc", &sample_backlog());
    let executor = ScriptedExecutor::new();
    let stubborn = verification(vec![bug("B1", Severity::Critical)]);
    let verifier = ScriptedVerifier::new(vec![stubborn.clone()]);
    let mut orchestrator = Orchestrator::new(&sessions, session, &executor, Scope::all())
        .expect("orchestrator");

    let outcome = FixCycle::new(&verifier, "doc")
        .run(&mut orchestrator, stubborn)
        .expect("cycle");

    assert_eq!(outcome.stop, FixCycleStop::Exhausted);
    assert_eq!(outcome.iterations, 3);
    assert_eq!(verifier.calls().len(), 3);
    assert_eq!(
        outcome.fix_task_ids,
        vec!["PFIX.M1.T001.S1", "PFIX.M1.T002.S1", "PFIX.M1.T003.S1"]
    );

    let reports = fs::read_dir(orchestrator.session().bugfix_dir())
        .expect("bugfix dir")
        .count();
    assert_eq!(reports, 3);
}
