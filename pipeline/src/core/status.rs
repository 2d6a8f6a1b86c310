//! Status state machine.
//!
//! ```text
//! Planned -> Researching -> Implementing -> Complete
//!            Researching -> Failed
//!                           Implementing -> Failed
//! any (except Obsolete) -> Obsolete
//! Failed -> Planned        (external retry)
//! ```

use crate::core::types::Status;

/// True if `from -> to` is an edge of the state machine.
pub fn is_legal_transition(from: Status, to: Status) -> bool {
    use Status::{Complete, Failed, Implementing, Obsolete, Planned, Researching};

    match (from, to) {
        (Obsolete, _) => false,
        (_, Obsolete) => true,
        (Planned, Researching)
        | (Researching, Implementing)
        | (Implementing, Complete)
        | (Researching, Failed)
        | (Implementing, Failed)
        | (Failed, Planned) => true,
        _ => false,
    }
}

/// Statuses that still need work before a subtask is done.
pub fn needs_execution(status: Status) -> bool {
    !status.is_terminal()
}
