//! Stable exit codes for pipeline CLI commands.

/// Command succeeded; every scheduled item finished or the fix cycle completed.
pub const OK: i32 = 0;
/// Invalid config, session, backlog, or any other fatal error.
pub const INVALID: i32 = 1;
/// `--scope` did not parse. Nothing was executed.
pub const INVALID_SCOPE: i32 = 2;
/// Run stopped with pending items waiting on incomplete dependencies.
pub const BLOCKED: i32 = 3;
/// Run finished but at least one scheduled item ended `Failed`.
pub const FAILED_ITEMS: i32 = 4;
/// Fix cycle hit its iteration ceiling with blocking bugs left.
pub const FIX_EXHAUSTED: i32 = 5;
