//! Read-only operator views: session list, annotated hierarchy, current item.

use std::fmt::Write;

use crate::core::types::{Backlog, HierarchyItem, ItemKind};
use crate::io::session::{Session, SessionMetadata};

/// One line per session: directory, creation time, parent link.
pub fn render_sessions(sessions: &[SessionMetadata]) -> String {
    let mut out = String::new();
    for meta in sessions {
        let parent = meta
            .parent_session
            .as_deref()
            .map(|p| format!(" (delta of {p})"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{}  {}{}",
            meta.dir_name(),
            meta.created_at.to_rfc3339(),
            parent
        );
    }
    out
}

/// Indented hierarchy with each item's status; `current` is marked with `*`.
pub fn render_hierarchy(backlog: &Backlog, current: Option<&str>) -> String {
    let mut out = String::new();
    for item in backlog.flatten() {
        let depth = match item.kind() {
            ItemKind::Phase => 0,
            ItemKind::Milestone => 1,
            ItemKind::Task => 2,
            ItemKind::Subtask => 3,
        };
        let marker = if current == Some(item.id()) { '*' } else { ' ' };
        let _ = writeln!(
            out,
            "{marker} {:indent$}{} [{}] {}",
            "",
            item.id(),
            item.status(),
            item.title(),
            indent = depth * 2
        );
    }
    out
}

/// The item named by `current_item_id`, if it still exists.
pub fn current_item(session: &Session) -> Option<HierarchyItem> {
    session
        .current_item_id()
        .and_then(|id| session.backlog.find(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Status;
    use crate::test_support::{sample_backlog, temp_session};

    #[test]
    fn hierarchy_is_indented_and_marks_current() {
        let rendered = render_hierarchy(&sample_backlog(), Some("P1.M1.T1.S2"));
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "  P1 [Planned] P1 title");
        assert_eq!(lines[1], "    P1.M1 [Planned] P1.M1 title");
        assert_eq!(lines[4], "*       P1.M1.T1.S2 [Planned] P1.M1.T1.S2 title");
        assert_eq!(lines.len(), sample_backlog().flatten().len());
    }

    #[test]
    fn sessions_list_shows_delta_parent() {
        let (_temp, sessions, first) = temp_session("v1", &sample_backlog());
        sessions.create_session("v2", None).expect("delta");
        let listed = sessions.list_sessions().expect("list");
        let rendered = render_sessions(&listed);
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with(&first.metadata.dir_name()));
        assert!(lines[1].ends_with(&format!("(delta of {})", first.metadata.dir_name())));
    }

    #[test]
    fn current_item_follows_run_state() {
        let (_temp, _sessions, mut session) = temp_session("doc", &sample_backlog());
        assert!(current_item(&session).is_none());
        session.run_state.current_item_id = Some("P2.M1.T1.S1".to_string());
        let item = current_item(&session).expect("current");
        assert_eq!(item.id(), "P2.M1.T1.S1");
        assert_eq!(item.status(), Status::Planned);
    }
}
