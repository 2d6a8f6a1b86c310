//! Hierarchy, status, and verification types shared across the engine.
//!
//! The backlog is a value type: every item is cloned or replaced, never edited
//! in place by callers. Serialized field names match the on-disk `tasks.json`
//! registry and the verifier's bug report format.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state carried by every hierarchy item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Planned,
    Researching,
    Implementing,
    Complete,
    Failed,
    Obsolete,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Planned => "Planned",
            Status::Researching => "Researching",
            Status::Implementing => "Implementing",
            Status::Complete => "Complete",
            Status::Failed => "Failed",
            Status::Obsolete => "Obsolete",
        }
    }

    /// `Complete`, `Failed`, and `Obsolete` end an item's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Complete | Status::Failed | Status::Obsolete)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Level of an item in the four-level hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Phase,
    Milestone,
    Task,
    Subtask,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Phase => "phase",
            ItemKind::Milestone => "milestone",
            ItemKind::Task => "task",
            ItemKind::Subtask => "subtask",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub struct Phase {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub milestones: Vec<Milestone>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub struct Milestone {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub description: String,
    pub subtasks: Vec<Subtask>,
}

/// Leaf unit of work. Only subtasks declare dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub struct Subtask {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub story_points: u32,
    /// Subtask ids that must be `Complete` before this one may start.
    pub dependencies: Vec<String>,
    /// Opaque work contract handed to the agent.
    pub context_scope: String,
}

/// Any single node of the hierarchy, owned.
///
/// Each variant's struct carries its own `type` tag, so the enum itself is
/// untagged on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HierarchyItem {
    Phase(Phase),
    Milestone(Milestone),
    Task(Task),
    Subtask(Subtask),
}

impl HierarchyItem {
    pub fn id(&self) -> &str {
        match self {
            HierarchyItem::Phase(item) => &item.id,
            HierarchyItem::Milestone(item) => &item.id,
            HierarchyItem::Task(item) => &item.id,
            HierarchyItem::Subtask(item) => &item.id,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            HierarchyItem::Phase(item) => &item.title,
            HierarchyItem::Milestone(item) => &item.title,
            HierarchyItem::Task(item) => &item.title,
            HierarchyItem::Subtask(item) => &item.title,
        }
    }

    pub fn status(&self) -> Status {
        match self {
            HierarchyItem::Phase(item) => item.status,
            HierarchyItem::Milestone(item) => item.status,
            HierarchyItem::Task(item) => item.status,
            HierarchyItem::Subtask(item) => item.status,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            HierarchyItem::Phase(_) => ItemKind::Phase,
            HierarchyItem::Milestone(_) => ItemKind::Milestone,
            HierarchyItem::Task(_) => ItemKind::Task,
            HierarchyItem::Subtask(_) => ItemKind::Subtask,
        }
    }

    /// Self followed by every descendant, pre-order.
    pub fn flatten(&self) -> Vec<HierarchyItem> {
        let mut out = Vec::new();
        push_preorder(self, &mut out);
        out
    }
}

fn push_preorder(item: &HierarchyItem, out: &mut Vec<HierarchyItem>) {
    out.push(item.clone());
    match item {
        HierarchyItem::Phase(phase) => {
            for milestone in &phase.milestones {
                push_preorder(&HierarchyItem::Milestone(milestone.clone()), out);
            }
        }
        HierarchyItem::Milestone(milestone) => {
            for task in &milestone.tasks {
                push_preorder(&HierarchyItem::Task(task.clone()), out);
            }
        }
        HierarchyItem::Task(task) => {
            for subtask in &task.subtasks {
                out.push(HierarchyItem::Subtask(subtask.clone()));
            }
        }
        HierarchyItem::Subtask(_) => {}
    }
}

/// Root ordered list of phases; the unit of persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backlog {
    pub backlog: Vec<Phase>,
}

impl Backlog {
    pub fn new(phases: Vec<Phase>) -> Self {
        Self { backlog: phases }
    }

    pub fn phases(&self) -> &[Phase] {
        &self.backlog
    }

    /// All subtasks in document order.
    pub fn subtasks(&self) -> impl Iterator<Item = &Subtask> {
        self.backlog
            .iter()
            .flat_map(|phase| phase.milestones.iter())
            .flat_map(|milestone| milestone.tasks.iter())
            .flat_map(|task| task.subtasks.iter())
    }

    pub fn find_subtask(&self, id: &str) -> Option<&Subtask> {
        self.subtasks().find(|subtask| subtask.id == id)
    }

    /// Exact-id lookup across every level.
    pub fn find(&self, id: &str) -> Option<HierarchyItem> {
        for phase in &self.backlog {
            if phase.id == id {
                return Some(HierarchyItem::Phase(phase.clone()));
            }
            for milestone in &phase.milestones {
                if milestone.id == id {
                    return Some(HierarchyItem::Milestone(milestone.clone()));
                }
                for task in &milestone.tasks {
                    if task.id == id {
                        return Some(HierarchyItem::Task(task.clone()));
                    }
                    for subtask in &task.subtasks {
                        if subtask.id == id {
                            return Some(HierarchyItem::Subtask(subtask.clone()));
                        }
                    }
                }
            }
        }
        None
    }

    pub fn status_of(&self, id: &str) -> Option<Status> {
        self.find(id).map(|item| item.status())
    }

    /// Every item in the backlog, pre-order.
    pub fn flatten(&self) -> Vec<HierarchyItem> {
        self.backlog
            .iter()
            .flat_map(|phase| HierarchyItem::Phase(phase.clone()).flatten())
            .collect()
    }

    /// Subtasks whose status is `Complete`, in document order.
    pub fn completed_subtasks(&self) -> Vec<HierarchyItem> {
        self.subtasks()
            .filter(|subtask| subtask.status == Status::Complete)
            .cloned()
            .map(HierarchyItem::Subtask)
            .collect()
    }
}

/// Bug classification reported by the verifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Major,
    Minor,
    Cosmetic,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Major => "major",
            Severity::Minor => "minor",
            Severity::Cosmetic => "cosmetic",
        }
    }

    /// Effort estimate for the fix subtask generated from a bug of this severity.
    pub fn story_points(self) -> u32 {
        match self {
            Severity::Critical => 13,
            Severity::Major => 8,
            Severity::Minor => 3,
            Severity::Cosmetic => 1,
        }
    }

    /// Critical and major bugs keep the fix cycle running.
    pub fn blocks_completion(self) -> bool {
        matches!(self, Severity::Critical | Severity::Major)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bug {
    pub id: String,
    pub severity: Severity,
    pub title: String,
    pub description: String,
    pub reproduction: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Verifier output.
///
/// `has_bugs` is set by the verifier according to its own severity policy and
/// is never recomputed from `bugs`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub has_bugs: bool,
    pub bugs: Vec<Bug>,
    pub summary: String,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl VerificationResult {
    /// Bugs that must be fixed before the cycle may stop.
    pub fn blocking_bugs(&self) -> impl Iterator<Item = &Bug> {
        self.bugs
            .iter()
            .filter(|bug| bug.severity.blocks_completion())
    }
}
