//! Error types shared by every Branchline crate.

use crate::appointment::AppointmentStatus;
use crate::token::TokenStatus;
use thiserror::Error;

/// Errors reported by storage collaborators (ledger and queue cache).
///
/// The core never retries on these; callers decide whether to resubmit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The collaborator could not be reached or the operation failed mid-flight.
    ///
    /// Transactions are rolled back before this is returned.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// A uniqueness or check constraint rejected the write.
    #[error("Constraint violated: {0}")]
    Constraint(String),

    /// A payload could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A stored row holds a value the domain model does not know about.
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// A status transition that the state machine does not allow.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    /// Appointment lifecycle violation
    #[error("appointment cannot move from {from} to {to}")]
    Appointment {
        /// Current status
        from: AppointmentStatus,
        /// Requested status
        to: AppointmentStatus,
    },

    /// Token lifecycle violation
    #[error("token cannot move from {from} to {to}")]
    Token {
        /// Current status
        from: TokenStatus,
        /// Requested status
        to: TokenStatus,
    },
}

/// A status string that does not name a known status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    /// Which status family was being parsed
    pub kind: &'static str,
    /// The rejected input
    pub value: String,
}

impl From<ParseStatusError> for StoreError {
    fn from(err: ParseStatusError) -> Self {
        Self::Corrupt(err.to_string())
    }
}
