//! Scope strings: parsing into a typed [`Scope`] and resolving against a backlog.
//!
//! Grammar (exact match, no trimming):
//!
//! ```text
//! all | P<n> | P<n>.M<n> | P<n>.M<n>.T<n> | P<n>.M<n>.T<n>.S<n>
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use crate::core::types::{Backlog, HierarchyItem, ItemKind};

static SCOPE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^P[0-9]+(?:\.M[0-9]+(?:\.T[0-9]+(?:\.S[0-9]+)?)?)?$").unwrap());

/// Malformed scope string. Always raised before any execution begins.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "invalid scope '{input}': expected 'all', P<n>, P<n>.M<n>, P<n>.M<n>.T<n>, or P<n>.M<n>.T<n>.S<n>"
)]
pub struct ScopeParseError {
    pub input: String,
}

/// Which slice of the backlog a scope selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    All,
    Item(ItemKind),
}

/// Parsed scope descriptor. Only obtainable through [`Scope::parse`] / `FromStr`,
/// or [`Scope::all`] for the literal `all`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    kind: ScopeKind,
    id: Option<String>,
}

impl Scope {
    /// The scope `parse("all")` yields.
    pub fn all() -> Self {
        Self {
            kind: ScopeKind::All,
            id: None,
        }
    }

    pub fn parse(input: &str) -> Result<Self, ScopeParseError> {
        if input == "all" {
            return Ok(Self::all());
        }
        if !SCOPE_RE.is_match(input) {
            return Err(ScopeParseError {
                input: input.to_string(),
            });
        }
        let kind = match input.split('.').count() {
            1 => ItemKind::Phase,
            2 => ItemKind::Milestone,
            3 => ItemKind::Task,
            _ => ItemKind::Subtask,
        };
        Ok(Self {
            kind: ScopeKind::Item(kind),
            id: Some(input.to_string()),
        })
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    /// Target id; `None` for `all`.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

}

impl FromStr for Scope {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Scope::parse(s)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => f.write_str(id),
            None => f.write_str("all"),
        }
    }
}

/// Resolve `scope` against `backlog`.
///
/// - `all`: every subtask, document order.
/// - concrete id: `[item, ...descendants]` pre-order, or empty when the id is
///   absent. A missing id is not an error.
pub fn resolve(backlog: &Backlog, scope: &Scope) -> Vec<HierarchyItem> {
    match scope.id() {
        None => backlog
            .subtasks()
            .cloned()
            .map(HierarchyItem::Subtask)
            .collect(),
        Some(id) => backlog
            .find(id)
            .map(|item| item.flatten())
            .unwrap_or_default(),
    }
}
