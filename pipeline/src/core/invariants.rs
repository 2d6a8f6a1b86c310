//! Semantic invariants not expressible via JSON Schema.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;

use crate::core::types::Backlog;

static PHASE_SEGMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:P[0-9]+|PFIX)$").unwrap());
static MILESTONE_SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^M[0-9]+$").unwrap());
static TASK_SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^T[0-9]+$").unwrap());
static SUBTASK_SEGMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^S[0-9]+$").unwrap());

/// Check semantic invariants not expressible in JSON Schema:
/// - No duplicate ids
/// - Each child id is its parent id plus one segment of the right shape
/// - Dependencies reference existing subtasks, never the subtask itself
///
/// Cycles are reported separately by [`find_dependency_cycle`].
pub fn validate_invariants(backlog: &Backlog) -> Vec<String> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for phase in &backlog.backlog {
        check_id(&phase.id, None, &PHASE_SEGMENT_RE, &mut seen, &mut errors);
        for milestone in &phase.milestones {
            check_id(
                &milestone.id,
                Some(&phase.id),
                &MILESTONE_SEGMENT_RE,
                &mut seen,
                &mut errors,
            );
            for task in &milestone.tasks {
                check_id(
                    &task.id,
                    Some(&milestone.id),
                    &TASK_SEGMENT_RE,
                    &mut seen,
                    &mut errors,
                );
                for subtask in &task.subtasks {
                    check_id(
                        &subtask.id,
                        Some(&task.id),
                        &SUBTASK_SEGMENT_RE,
                        &mut seen,
                        &mut errors,
                    );
                }
            }
        }
    }

    let subtask_ids: HashSet<&str> = backlog.subtasks().map(|s| s.id.as_str()).collect();
    for subtask in backlog.subtasks() {
        for dep in &subtask.dependencies {
            if dep == &subtask.id {
                errors.push(format!("{}: depends on itself", subtask.id));
            } else if !subtask_ids.contains(dep.as_str()) {
                errors.push(format!("{}: unknown dependency '{}'", subtask.id, dep));
            }
        }
    }

    errors
}

fn check_id(
    id: &str,
    parent: Option<&str>,
    segment_re: &Regex,
    seen: &mut HashSet<String>,
    errors: &mut Vec<String>,
) {
    if !seen.insert(id.to_string()) {
        errors.push(format!("duplicate id '{id}'"));
    }

    let segment = match parent {
        None => Some(id),
        Some(parent) => id
            .strip_prefix(parent)
            .and_then(|rest| rest.strip_prefix('.')),
    };
    match segment {
        Some(segment) if segment_re.is_match(segment) => {}
        Some(segment) => errors.push(format!("{id}: malformed id segment '{segment}'")),
        None => errors.push(format!(
            "{id}: id must extend parent id '{}'",
            parent.unwrap_or_default()
        )),
    }
}

/// Return one dependency cycle as a closed path (`a -> b -> a`), if any.
///
/// Unknown dependency ids are ignored here; [`validate_invariants`] reports them.
pub fn find_dependency_cycle(backlog: &Backlog) -> Option<Vec<String>> {
    let graph: HashMap<&str, Vec<&str>> = backlog
        .subtasks()
        .map(|s| {
            (
                s.id.as_str(),
                s.dependencies.iter().map(String::as_str).collect(),
            )
        })
        .collect();

    let mut done = HashSet::new();
    for subtask in backlog.subtasks() {
        let mut stack = Vec::new();
        if let Some(cycle) = visit(subtask.id.as_str(), &graph, &mut stack, &mut done) {
            return Some(cycle);
        }
    }
    None
}

fn visit<'a>(
    id: &'a str,
    graph: &HashMap<&'a str, Vec<&'a str>>,
    stack: &mut Vec<&'a str>,
    done: &mut HashSet<&'a str>,
) -> Option<Vec<String>> {
    if done.contains(id) {
        return None;
    }
    if let Some(start) = stack.iter().position(|entry| *entry == id) {
        let mut cycle: Vec<String> = stack[start..].iter().map(|s| s.to_string()).collect();
        cycle.push(id.to_string());
        return Some(cycle);
    }
    let deps = graph.get(id)?;
    stack.push(id);
    for dep in deps {
        if let Some(cycle) = visit(*dep, graph, stack, done) {
            return Some(cycle);
        }
    }
    stack.pop();
    done.insert(id);
    None
}
