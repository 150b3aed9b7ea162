//! Error types for roster locking and the draft.

use std::time::Duration;
use thiserror::Error;

/// Failures of the roster lock. Both leave the lock free for later callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// The request was not granted within the lock timeout; the lock was force-released
    #[error("roster lock for '{operation}' not granted within {waited:?}")]
    Timeout { operation: String, waited: Duration },

    /// The request was still queued when another waiter forced a release
    #[error("queued roster lock request '{operation}' dropped by a forced release")]
    ForcedRelease { operation: String },
}

/// Rejected picks. These go back to the picker only; the draft carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PickError {
    #[error("Pick a number between 1 and {len}")]
    OutOfRange { index: usize, len: usize },

    #[error("It is not your team's turn to pick")]
    NotYourTurn,

    #[error("Your team is already full")]
    TeamFull,

    #[error("{name} is no longer available, the list has been refreshed")]
    CandidateUnavailable { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error(transparent)]
    Pick(#[from] PickError),

    #[error(transparent)]
    Lock(#[from] LockError),

    /// The session no longer matches its recorded digest
    #[error("draft state digest mismatch (recorded {recorded:#018x}, found {found:#018x})")]
    StateCorruption { recorded: u64, found: u64 },
}
