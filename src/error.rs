use thiserror::Error;

use crate::phase::{Phase, PhaseCommand};

/// Ledger error types
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Cannot {command:?} while {from:?}")]
    IllegalTransition { from: Phase, command: PhaseCommand },

    #[error("No shift is open")]
    NoOpenShift,

    #[error("Shift {0} is open; use the track commands or end the shift first")]
    ShiftInProgress(String),

    #[error("Unknown {kind} id: {id}")]
    UnknownId { kind: &'static str, id: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Location failed: {0}")]
    Location(String),

    #[error("Vehicle lookup failed: {0}")]
    Oracle(String),

    #[error("Tracker stopped")]
    TrackerStopped,
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    /// Errors caused by the driver's input rather than the environment
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            LedgerError::IllegalTransition { .. }
                | LedgerError::NoOpenShift
                | LedgerError::ShiftInProgress(_)
                | LedgerError::UnknownId { .. }
                | LedgerError::InvalidInput(_)
        )
    }
}
