//! Replace-on-write updates for the backlog.
//!
//! Every function takes the current backlog by reference and returns a new
//! value; the input is never touched.

use crate::core::types::{Backlog, Milestone, Phase, Status, Task};

/// Return a copy of `backlog` with item `id` set to `status`.
///
/// Returns `None` if the id does not exist.
pub fn replace_status(backlog: &Backlog, id: &str, status: Status) -> Option<Backlog> {
    let mut next = backlog.clone();
    let slot = status_slot_mut(&mut next, id)?;
    *slot = status;
    Some(next)
}

/// Derive container completion from children.
///
/// A phase, milestone, or task becomes `Complete` once every child is
/// `Complete` or `Obsolete` and at least one child is `Complete`. Returns the
/// updated backlog and the ids that changed, sorted.
pub fn roll_up_containers(backlog: &Backlog) -> (Backlog, Vec<String>) {
    let mut next = backlog.clone();
    let mut rolled = Vec::new();
    for phase in &mut next.backlog {
        roll_up_phase(phase, &mut rolled);
    }
    rolled.sort();
    (next, rolled)
}

fn roll_up_phase(phase: &mut Phase, rolled: &mut Vec<String>) {
    for milestone in &mut phase.milestones {
        roll_up_milestone(milestone, rolled);
    }
    let children: Vec<Status> = phase.milestones.iter().map(|m| m.status).collect();
    mark_if_done(&phase.id, &mut phase.status, &children, rolled);
}

fn roll_up_milestone(milestone: &mut Milestone, rolled: &mut Vec<String>) {
    for task in &mut milestone.tasks {
        roll_up_task(task, rolled);
    }
    let children: Vec<Status> = milestone.tasks.iter().map(|t| t.status).collect();
    mark_if_done(&milestone.id, &mut milestone.status, &children, rolled);
}

fn roll_up_task(task: &mut Task, rolled: &mut Vec<String>) {
    let children: Vec<Status> = task.subtasks.iter().map(|s| s.status).collect();
    mark_if_done(&task.id, &mut task.status, &children, rolled);
}

fn mark_if_done(id: &str, status: &mut Status, children: &[Status], rolled: &mut Vec<String>) {
    if status.is_terminal() {
        return;
    }
    let settled = children
        .iter()
        .all(|s| matches!(s, Status::Complete | Status::Obsolete));
    let any_complete = children.contains(&Status::Complete);
    if settled && any_complete {
        *status = Status::Complete;
        rolled.push(id.to_string());
    }
}

/// Mark every item of a phase subtree `Obsolete`.
pub fn obsolete_phase(phase: &Phase) -> Phase {
    Phase {
        status: Status::Obsolete,
        milestones: phase.milestones.iter().map(obsolete_milestone).collect(),
        ..phase.clone()
    }
}

pub fn obsolete_milestone(milestone: &Milestone) -> Milestone {
    Milestone {
        status: Status::Obsolete,
        tasks: milestone.tasks.iter().map(obsolete_task).collect(),
        ..milestone.clone()
    }
}

pub fn obsolete_task(task: &Task) -> Task {
    let mut next = task.clone();
    next.status = Status::Obsolete;
    for subtask in &mut next.subtasks {
        subtask.status = Status::Obsolete;
    }
    next
}

fn status_slot_mut<'a>(backlog: &'a mut Backlog, id: &str) -> Option<&'a mut Status> {
    for phase in &mut backlog.backlog {
        if phase.id == id {
            return Some(&mut phase.status);
        }
        if !id.starts_with(&format!("{}.", phase.id)) {
            continue;
        }
        for milestone in &mut phase.milestones {
            if milestone.id == id {
                return Some(&mut milestone.status);
            }
            for task in &mut milestone.tasks {
                if task.id == id {
                    return Some(&mut task.status);
                }
                for subtask in &mut task.subtasks {
                    if subtask.id == id {
                        return Some(&mut subtask.status);
                    }
                }
            }
        }
    }
    None
}
