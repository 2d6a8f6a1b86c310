//! Deterministic, pure logic over the backlog hierarchy.
//!
//! Core modules must be free of I/O side effects. They take a backlog by
//! reference and return new values, which keeps them trivially testable.

pub mod delta;
pub mod fix;
pub mod hash;
pub mod invariants;
pub mod queue;
pub mod scope;
pub mod status;
pub mod tree_update;
pub mod types;
