//! Turning verifier bug reports into fix work under the `PFIX` phase.

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::core::types::{Backlog, Bug, Milestone, Phase, Status, Subtask, Task, VerificationResult};

pub const FIX_PHASE_ID: &str = "PFIX";
pub const FIX_MILESTONE_ID: &str = "PFIX.M1";
pub const MAX_FIX_ITERATIONS: u32 = 3;

const FIX_CONTRACT_TEMPLATE: &str = include_str!("templates/fix_contract.md");

pub fn fix_task_id(n: u32) -> String {
    format!("{FIX_MILESTONE_ID}.T{n:03}")
}

pub fn fix_subtask_id(n: u32) -> String {
    format!("{}.S1", fix_task_id(n))
}

/// True when no critical or major bug remains.
pub fn check_complete(result: &VerificationResult) -> bool {
    result.blocking_bugs().next().is_none()
}

/// Highest `T<n>` already used under `PFIX.M1`, or 0.
pub fn last_fix_number(backlog: &Backlog) -> u32 {
    let prefix = format!("{FIX_MILESTONE_ID}.T");
    backlog
        .phases()
        .iter()
        .filter(|phase| phase.id == FIX_PHASE_ID)
        .flat_map(|phase| phase.milestones.iter())
        .flat_map(|milestone| milestone.tasks.iter())
        .filter_map(|task| task.id.strip_prefix(&prefix)?.parse::<u32>().ok())
        .max()
        .unwrap_or(0)
}

/// One task with a single subtask per bug, numbered after any existing fix
/// tasks, in report order.
pub fn create_fix_tasks(backlog: &Backlog, bugs: &[Bug]) -> Result<Vec<Task>> {
    let mut env = Environment::new();
    env.add_template("fix_contract", FIX_CONTRACT_TEMPLATE)
        .context("load fix contract template")?;
    let template = env.get_template("fix_contract")?;

    let start = last_fix_number(backlog);
    bugs.iter()
        .zip(start + 1..)
        .map(|(bug, n)| {
            let contract = template
                .render(context! {
                    bug_id => bug.id.as_str(),
                    severity => bug.severity.as_str(),
                    title => bug.title.trim(),
                    description => bug.description.trim(),
                    reproduction => bug.reproduction.trim(),
                    location => bug.location.as_deref().map(str::trim).filter(|s| !s.is_empty()),
                })
                .with_context(|| format!("render fix contract for bug {}", bug.id))?;
            let title = format!("Fix: {}", bug.title);
            Ok(Task {
                id: fix_task_id(n),
                title: title.clone(),
                status: Status::Planned,
                description: bug.description.clone(),
                subtasks: vec![Subtask {
                    id: fix_subtask_id(n),
                    title,
                    status: Status::Planned,
                    story_points: bug.severity.story_points(),
                    dependencies: Vec::new(),
                    context_scope: contract,
                }],
            })
        })
        .collect()
}

/// Append `tasks` under `PFIX` / `PFIX.M1`, creating them as needed.
///
/// A fix phase or milestone that had already rolled up to `Complete` is
/// reopened as `Planned`, since it gains pending children.
pub fn inject_fix_tasks(backlog: &Backlog, tasks: Vec<Task>) -> Backlog {
    let mut next = backlog.clone();
    if !next.backlog.iter().any(|phase| phase.id == FIX_PHASE_ID) {
        next.backlog.push(Phase {
            id: FIX_PHASE_ID.to_string(),
            title: "Bug fixes".to_string(),
            status: Status::Planned,
            milestones: Vec::new(),
        });
    }
    let Some(phase) = next.backlog.iter_mut().find(|phase| phase.id == FIX_PHASE_ID) else {
        return next;
    };
    if !phase.milestones.iter().any(|m| m.id == FIX_MILESTONE_ID) {
        phase.milestones.push(Milestone {
            id: FIX_MILESTONE_ID.to_string(),
            title: "Verification fixes".to_string(),
            status: Status::Planned,
            tasks: Vec::new(),
        });
    }
    if tasks.is_empty() {
        return next;
    }
    reopen(&mut phase.status);
    if let Some(milestone) = phase
        .milestones
        .iter_mut()
        .find(|m| m.id == FIX_MILESTONE_ID)
    {
        reopen(&mut milestone.status);
        milestone.tasks.extend(tasks);
    }
    next
}

fn reopen(status: &mut Status) {
    if *status == Status::Complete {
        *status = Status::Planned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::invariants::validate_invariants;
    use crate::core::types::Severity;
    use crate::test_support::{bug, sample_backlog, verification};

    #[test]
    fn ids_are_zero_padded() {
        assert_eq!(fix_task_id(1), "PFIX.M1.T001");
        assert_eq!(fix_subtask_id(12), "PFIX.M1.T012.S1");
    }

    #[test]
    fn severity_sets_story_points_in_report_order() {
        let bugs = vec![
            bug("BUG-1", Severity::Critical),
            bug("BUG-2", Severity::Major),
            bug("BUG-3", Severity::Minor),
            bug("BUG-4", Severity::Cosmetic),
        ];
        let tasks = create_fix_tasks(&sample_backlog(), &bugs).expect("tasks");

        let summary: Vec<(String, u32)> = tasks
            .iter()
            .map(|t| (t.subtasks[0].id.clone(), t.subtasks[0].story_points))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("PFIX.M1.T001.S1".to_string(), 13),
                ("PFIX.M1.T002.S1".to_string(), 8),
                ("PFIX.M1.T003.S1".to_string(), 3),
                ("PFIX.M1.T004.S1".to_string(), 1),
            ]
        );
        assert!(tasks.iter().all(|t| t.subtasks[0].dependencies.is_empty()));
    }

    #[test]
    fn contract_carries_bug_details() {
        let mut located = bug("BUG-7", Severity::Major);
        located.location = Some("src/auth.rs:42".to_string());
        let tasks = create_fix_tasks(&Backlog::default(), &[located]).expect("tasks");
        let contract = &tasks[0].subtasks[0].context_scope;
        assert!(contract.contains("major bug BUG-7"));
        assert!(contract.contains("Location: src/auth.rs:42"));
        assert!(contract.contains("Reproduction:"));
    }

    #[test]
    fn numbering_continues_after_existing_fix_tasks() {
        let first = create_fix_tasks(&Backlog::default(), &[bug("A", Severity::Major)])
            .expect("tasks");
        let backlog = inject_fix_tasks(&sample_backlog(), first);
        assert_eq!(last_fix_number(&backlog), 1);

        let second = create_fix_tasks(&backlog, &[bug("B", Severity::Minor)]).expect("tasks");
        assert_eq!(second[0].id, "PFIX.M1.T002");

        let backlog = inject_fix_tasks(&backlog, second);
        assert!(validate_invariants(&backlog).is_empty());
        assert_eq!(backlog.phases().last().map(|p| p.id.as_str()), Some("PFIX"));
    }

    #[test]
    fn injecting_reopens_completed_fix_containers() {
        let tasks = create_fix_tasks(&Backlog::default(), &[bug("A", Severity::Major)])
            .expect("tasks");
        let mut backlog = inject_fix_tasks(&Backlog::default(), tasks);
        backlog.backlog[0].status = Status::Complete;
        backlog.backlog[0].milestones[0].status = Status::Complete;

        let more = create_fix_tasks(&backlog, &[bug("B", Severity::Critical)]).expect("tasks");
        let backlog = inject_fix_tasks(&backlog, more);
        assert_eq!(backlog.status_of("PFIX"), Some(Status::Planned));
        assert_eq!(backlog.status_of("PFIX.M1"), Some(Status::Planned));
        assert_eq!(backlog.status_of("PFIX.M1.T001"), Some(Status::Planned));
    }

    #[test]
    fn only_blocking_severities_prevent_completion() {
        let minor_only = verification(vec![
            bug("A", Severity::Minor),
            bug("B", Severity::Cosmetic),
        ]);
        assert!(check_complete(&minor_only));

        let with_major = verification(vec![bug("C", Severity::Major)]);
        assert!(!check_complete(&with_major));
    }
}
