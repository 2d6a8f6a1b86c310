//! Execution queue and dependency-gated selection.
//!
//! The queue only records *which* items to visit and in what order. Status
//! and dependencies are always read from the live backlog, so a reloaded
//! session resumes from persisted state without any queue bookkeeping.

use crate::core::status::needs_execution;
use crate::core::types::{Backlog, HierarchyItem, ItemKind, Status, Subtask};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedItem {
    pub id: String,
    pub kind: ItemKind,
}

impl From<&HierarchyItem> for QueuedItem {
    fn from(item: &HierarchyItem) -> Self {
        Self {
            id: item.id().to_string(),
            kind: item.kind(),
        }
    }
}

/// A pending subtask that cannot start yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockedItem {
    pub id: String,
    pub unmet: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Next(QueuedItem),
    /// Work remains but every pending item waits on an incomplete dependency.
    Blocked(Vec<BlockedItem>),
    Drained,
}

pub fn build_queue(items: &[HierarchyItem]) -> Vec<QueuedItem> {
    items.iter().map(QueuedItem::from).collect()
}

/// Dependencies of `subtask` that are not `Complete`, in declaration order.
///
/// A dependency id missing from the backlog counts as unmet.
pub fn unmet_dependencies(backlog: &Backlog, subtask: &Subtask) -> Vec<String> {
    subtask
        .dependencies
        .iter()
        .filter(|dep| backlog.status_of(dep) != Some(Status::Complete))
        .cloned()
        .collect()
}

/// True if the queued item still has work to do.
///
/// Subtasks are pending until terminal, so an interrupted `Researching` or
/// `Implementing` subtask is picked up again. Containers only need their
/// one-time `Planned` activation; completion rolls up from children.
pub fn is_pending(backlog: &Backlog, item: &QueuedItem) -> bool {
    match (item.kind, backlog.status_of(&item.id)) {
        (_, None) => false,
        (ItemKind::Subtask, Some(status)) => needs_execution(status),
        (_, Some(status)) => status == Status::Planned,
    }
}

/// Pick the next item to run.
///
/// `current` (the persisted `current_item_id`) wins when it is queued,
/// pending, and unblocked. Otherwise the first pending unblocked item in queue
/// order is returned.
pub fn select_next(backlog: &Backlog, queue: &[QueuedItem], current: Option<&str>) -> Selection {
    if let Some(current_id) = current
        && let Some(item) = queue.iter().find(|item| item.id == current_id)
        && is_pending(backlog, item)
        && blocked_on(backlog, item).is_empty()
    {
        return Selection::Next(item.clone());
    }

    let mut blocked = Vec::new();
    for item in queue {
        if !is_pending(backlog, item) {
            continue;
        }
        let unmet = blocked_on(backlog, item);
        if unmet.is_empty() {
            return Selection::Next(item.clone());
        }
        blocked.push(BlockedItem {
            id: item.id.clone(),
            unmet,
        });
    }

    if blocked.is_empty() {
        Selection::Drained
    } else {
        Selection::Blocked(blocked)
    }
}

fn blocked_on(backlog: &Backlog, item: &QueuedItem) -> Vec<String> {
    if item.kind != ItemKind::Subtask {
        return Vec::new();
    }
    backlog
        .find_subtask(&item.id)
        .map(|subtask| unmet_dependencies(backlog, subtask))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tree_update::replace_status;
    use crate::test_support::{milestone, phase, subtask, task};

    fn chain_backlog() -> Backlog {
        Backlog::new(vec![phase(
            "P1",
            vec![milestone(
                "P1.M1",
                vec![task(
                    "P1.M1.T1",
                    vec![
                        subtask("P1.M1.T1.S1", &["P1.M1.T1.S2"]),
                        subtask("P1.M1.T1.S2", &[]),
                        subtask("P1.M1.T1.S3", &[]),
                    ],
                )],
            )],
        )])
    }

    fn subtask_queue(backlog: &Backlog) -> Vec<QueuedItem> {
        backlog
            .subtasks()
            .map(|s| QueuedItem {
                id: s.id.clone(),
                kind: ItemKind::Subtask,
            })
            .collect()
    }

    fn next_id(selection: Selection) -> String {
        match selection {
            Selection::Next(item) => item.id,
            other => panic!("expected next item, got {other:?}"),
        }
    }

    /// A subtask listed first but depending on a later one waits for it.
    #[test]
    fn dependency_is_run_before_dependent() {
        let backlog = chain_backlog();
        let queue = subtask_queue(&backlog);
        assert_eq!(next_id(select_next(&backlog, &queue, None)), "P1.M1.T1.S2");

        let backlog = replace_status(&backlog, "P1.M1.T1.S2", Status::Complete).expect("found");
        assert_eq!(next_id(select_next(&backlog, &queue, None)), "P1.M1.T1.S1");
    }

    #[test]
    fn failed_dependency_leaves_dependent_blocked() {
        let backlog = chain_backlog();
        let backlog = replace_status(&backlog, "P1.M1.T1.S2", Status::Failed).expect("found");
        let backlog = replace_status(&backlog, "P1.M1.T1.S3", Status::Complete).expect("found");
        let queue = subtask_queue(&backlog);

        assert_eq!(
            select_next(&backlog, &queue, None),
            Selection::Blocked(vec![BlockedItem {
                id: "P1.M1.T1.S1".to_string(),
                unmet: vec!["P1.M1.T1.S2".to_string()],
            }])
        );
    }

    #[test]
    fn interrupted_current_item_is_retried_first() {
        let backlog = chain_backlog();
        let backlog =
            replace_status(&backlog, "P1.M1.T1.S3", Status::Implementing).expect("found");
        let queue = subtask_queue(&backlog);

        let selected = select_next(&backlog, &queue, Some("P1.M1.T1.S3"));
        assert_eq!(next_id(selected), "P1.M1.T1.S3");
    }

    #[test]
    fn terminal_items_are_skipped_and_queue_drains() {
        let mut backlog = chain_backlog();
        for (id, status) in [
            ("P1.M1.T1.S1", Status::Obsolete),
            ("P1.M1.T1.S2", Status::Complete),
            ("P1.M1.T1.S3", Status::Failed),
        ] {
            backlog = replace_status(&backlog, id, status).expect("found");
        }
        let queue = subtask_queue(&backlog);
        assert_eq!(select_next(&backlog, &queue, None), Selection::Drained);
    }

    #[test]
    fn containers_are_pending_only_while_planned() {
        let backlog = chain_backlog();
        let item = QueuedItem {
            id: "P1.M1".to_string(),
            kind: ItemKind::Milestone,
        };
        assert!(is_pending(&backlog, &item));
        let backlog = replace_status(&backlog, "P1.M1", Status::Researching).expect("found");
        assert!(!is_pending(&backlog, &item));
    }

    #[test]
    fn unknown_dependency_counts_as_unmet() {
        let backlog = Backlog::default();
        let orphan = subtask("P1.M1.T1.S1", &["P7.M1.T1.S1"]);
        assert_eq!(unmet_dependencies(&backlog, &orphan), vec!["P7.M1.T1.S1"]);
    }
}
