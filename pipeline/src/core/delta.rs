//! Merging a replacement backlog into the prior session's backlog.
//!
//! - Items whose definition is unchanged keep their prior status.
//! - Changed items take the new definition and restart at `Planned`.
//! - Items only in the prior backlog are kept, appended under their parent,
//!   and marked `Obsolete` together with their subtree. Nothing is deleted,
//!   and items that were already `Obsolete` are not reported again.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::core::tree_update::{obsolete_milestone, obsolete_phase, obsolete_task};
use crate::core::types::{Backlog, Milestone, Phase, Status, Subtask, Task};

/// Ids by kind of change, each in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeltaReport {
    pub added: Vec<String>,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl DeltaReport {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.changed.is_empty() && self.removed.is_empty()
    }
}

pub fn merge_delta(prior: &Backlog, next: &Backlog) -> (Backlog, DeltaReport) {
    let mut report = DeltaReport::default();
    let prior_phases: HashMap<&str, &Phase> =
        prior.backlog.iter().map(|p| (p.id.as_str(), p)).collect();

    let mut merged: Vec<Phase> = next
        .backlog
        .iter()
        .map(|phase| merge_phase(prior_phases.get(phase.id.as_str()).copied(), phase, &mut report))
        .collect();

    for phase in &prior.backlog {
        if !next.backlog.iter().any(|p| p.id == phase.id) {
            record_removal(&phase.id, phase.status, &mut report);
            merged.push(obsolete_phase(phase));
        }
    }

    let mut merged = Backlog::new(merged);
    reopen_containers(&mut merged);
    (merged, report)
}

fn merge_phase(prior: Option<&Phase>, next: &Phase, report: &mut DeltaReport) -> Phase {
    let status = carried_status(
        prior.map(|p| (p.status, p.title == next.title)),
        &next.id,
        next.status,
        report,
    );
    let prior_children: Vec<Milestone> = prior.map(|p| p.milestones.clone()).unwrap_or_default();

    let mut milestones: Vec<Milestone> = next
        .milestones
        .iter()
        .map(|m| {
            let old = prior_children.iter().find(|o| o.id == m.id);
            merge_milestone(old, m, report)
        })
        .collect();
    for old in &prior_children {
        if !next.milestones.iter().any(|m| m.id == old.id) {
            record_removal(&old.id, old.status, report);
            milestones.push(obsolete_milestone(old));
        }
    }

    Phase {
        id: next.id.clone(),
        title: next.title.clone(),
        status,
        milestones,
    }
}

fn merge_milestone(prior: Option<&Milestone>, next: &Milestone, report: &mut DeltaReport) -> Milestone {
    let status = carried_status(
        prior.map(|m| (m.status, m.title == next.title)),
        &next.id,
        next.status,
        report,
    );
    let prior_children: Vec<Task> = prior.map(|m| m.tasks.clone()).unwrap_or_default();

    let mut tasks: Vec<Task> = next
        .tasks
        .iter()
        .map(|t| {
            let old = prior_children.iter().find(|o| o.id == t.id);
            merge_task(old, t, report)
        })
        .collect();
    for old in &prior_children {
        if !next.tasks.iter().any(|t| t.id == old.id) {
            record_removal(&old.id, old.status, report);
            tasks.push(obsolete_task(old));
        }
    }

    Milestone {
        id: next.id.clone(),
        title: next.title.clone(),
        status,
        tasks,
    }
}

fn merge_task(prior: Option<&Task>, next: &Task, report: &mut DeltaReport) -> Task {
    let status = carried_status(
        prior.map(|t| {
            (
                t.status,
                t.title == next.title && t.description == next.description,
            )
        }),
        &next.id,
        next.status,
        report,
    );

    let mut subtasks: Vec<Subtask> = next
        .subtasks
        .iter()
        .map(|s| {
            let old = prior.and_then(|t| t.subtasks.iter().find(|o| o.id == s.id));
            let status = carried_status(
                old.map(|o| (o.status, same_subtask_definition(o, s))),
                &s.id,
                s.status,
                report,
            );
            Subtask {
                status,
                ..s.clone()
            }
        })
        .collect();
    if let Some(prior) = prior {
        for old in &prior.subtasks {
            if !next.subtasks.iter().any(|s| s.id == old.id) {
                record_removal(&old.id, old.status, report);
                subtasks.push(Subtask {
                    status: Status::Obsolete,
                    ..old.clone()
                });
            }
        }
    }

    Task {
        id: next.id.clone(),
        title: next.title.clone(),
        status,
        description: next.description.clone(),
        subtasks,
    }
}

/// Items already `Obsolete` were removed by an earlier delta.
fn record_removal(id: &str, prior_status: Status, report: &mut DeltaReport) {
    if prior_status != Status::Obsolete {
        report.removed.push(id.to_string());
    }
}

fn same_subtask_definition(a: &Subtask, b: &Subtask) -> bool {
    a.title == b.title
        && a.story_points == b.story_points
        && a.dependencies == b.dependencies
        && a.context_scope == b.context_scope
}

/// Decide the merged status of one item and record how it changed.
///
/// `prior` is the prior status and whether the definition is unchanged.
/// A previously obsoleted item that reappears counts as added.
fn carried_status(
    prior: Option<(Status, bool)>,
    id: &str,
    declared: Status,
    report: &mut DeltaReport,
) -> Status {
    match prior {
        Some((Status::Obsolete, _)) | None => {
            report.added.push(id.to_string());
            declared
        }
        Some((status, true)) => status,
        Some((_, false)) => {
            report.changed.push(id.to_string());
            Status::Planned
        }
    }
}

// A container carried as Complete may have gained new or reset children.
fn reopen_containers(backlog: &mut Backlog) {
    for phase in &mut backlog.backlog {
        for milestone in &mut phase.milestones {
            for task in &mut milestone.tasks {
                let open = task.subtasks.iter().any(|s| !settled(s.status));
                reopen_if(&mut task.status, open);
            }
            let open = milestone.tasks.iter().any(|t| !settled(t.status));
            reopen_if(&mut milestone.status, open);
        }
        let open = phase.milestones.iter().any(|m| !settled(m.status));
        reopen_if(&mut phase.status, open);
    }
}

fn settled(status: Status) -> bool {
    matches!(status, Status::Complete | Status::Obsolete)
}

fn reopen_if(status: &mut Status, has_open_children: bool) {
    if *status == Status::Complete && has_open_children {
        *status = Status::Planned;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree_update::replace_status;
    use crate::test_support::{milestone, phase, sample_backlog, subtask, task};

    fn complete(backlog: &Backlog, ids: &[&str]) -> Backlog {
        ids.iter().fold(backlog.clone(), |acc, id| {
            replace_status(&acc, id, Status::Complete).expect("found")
        })
    }

    #[test]
    fn identical_backlog_keeps_every_status() {
        let prior = complete(&sample_backlog(), &["P1.M1.T1.S1", "P1.M1.T1.S2", "P1.M1.T1"]);
        let (merged, report) = merge_delta(&prior, &sample_backlog());
        assert!(report.is_empty(), "{report:?}");
        assert_eq!(merged, prior);
    }

    #[test]
    fn changed_subtask_restarts_and_reopens_parent() {
        let prior = complete(&sample_backlog(), &["P1.M1.T1.S1", "P1.M1.T1.S2", "P1.M1.T1"]);
        let mut next = sample_backlog();
        next.backlog[0].milestones[0].tasks[0].subtasks[1].context_scope =
            "new contract".to_string();

        let (merged, report) = merge_delta(&prior, &next);
        assert_eq!(report.changed, vec!["P1.M1.T1.S2"]);
        assert_eq!(merged.status_of("P1.M1.T1.S1"), Some(Status::Complete));
        assert_eq!(merged.status_of("P1.M1.T1.S2"), Some(Status::Planned));
        assert_eq!(merged.status_of("P1.M1.T1"), Some(Status::Planned));
    }

    #[test]
    fn removed_items_become_obsolete_and_stay_in_tree() {
        let prior = sample_backlog();
        let mut next = sample_backlog();
        next.backlog.retain(|p| p.id != "P3");
        next.backlog[0].milestones[0].tasks[0].subtasks.pop();

        let (merged, report) = merge_delta(&prior, &next);
        assert_eq!(report.removed, vec!["P1.M1.T1.S2", "P3"]);
        assert_eq!(merged.status_of("P1.M1.T1.S2"), Some(Status::Obsolete));
        let p3 = merged.find("P3").expect("kept");
        assert!(p3.flatten().iter().all(|i| i.status() == Status::Obsolete));
        assert_eq!(merged.flatten().len(), prior.flatten().len());
    }

    /// Re-merging the same trimmed backlog does not report P3 a second time.
    #[test]
    fn obsolete_items_are_not_removed_twice() {
        let mut next = sample_backlog();
        next.backlog.retain(|p| p.id != "P3");
        let (merged, first) = merge_delta(&sample_backlog(), &next);
        assert_eq!(first.removed, vec!["P3"]);

        let (again, second) = merge_delta(&merged, &next);
        assert!(second.is_empty(), "{second:?}");
        assert_eq!(again.status_of("P3"), Some(Status::Obsolete));
    }

    #[test]
    fn new_items_are_reported_as_added() {
        let prior = Backlog::new(vec![phase(
            "P1",
            vec![milestone("P1.M1", vec![task("P1.M1.T1", vec![subtask("P1.M1.T1.S1", &[])])])],
        )]);
        let next = Backlog::new(vec![phase(
            "P1",
            vec![milestone(
                "P1.M1",
                vec![task(
                    "P1.M1.T1",
                    vec![subtask("P1.M1.T1.S1", &[]), subtask("P1.M1.T1.S2", &[])],
                )],
            )],
        )]);
        let (_, report) = merge_delta(&prior, &next);
        assert_eq!(report.added, vec!["P1.M1.T1.S2"]);
        assert!(report.changed.is_empty());
    }
}
