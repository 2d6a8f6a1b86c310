//! Resumable PRD-to-implementation pipeline.
//!
//! A product requirements document is decomposed into a four-level backlog
//! (phase, milestone, task, subtask) stored in a content-addressed session
//! directory. Subtasks are dispatched one at a time to an agent, every status
//! change is persisted atomically, and a verify/fix cycle closes out the run.
//!
//! - **[`core`]**: Pure, deterministic logic (queueing, status rules, deltas,
//!   fix-task construction). No I/O.
//! - **[`io`]**: Side-effecting operations (sessions on disk, config,
//!   subprocess agents and verifiers).
//!
//! Orchestration modules ([`orchestrator`], [`fix_cycle`], [`inspect`])
//! coordinate core logic with I/O to implement CLI commands.

pub mod core;
pub mod error;
pub mod exit_codes;
pub mod fix_cycle;
pub mod inspect;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
