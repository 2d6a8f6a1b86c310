//! Filesystem, session, and subprocess plumbing for pipeline commands.

pub mod atomic;
pub mod backlog_store;
pub mod config;
pub mod executor;
pub mod process;
pub mod run_state;
pub mod session;
