//! Error types for engine operations.

use branchline_core::error::{StoreError, TransitionError};
use branchline_core::ids::AppointmentId;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Terminal outcome of a rejected operation.
///
/// No variant implies a partially applied effect: the ledger either committed the whole
/// operation or nothing.
#[derive(Error, Debug)]
pub enum EngineError {
    /// A required field is missing, nil or out of range. Storage was not touched.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The referenced record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// No open slot with spare capacity covers the requested time.
    #[error("No available slot at {scheduled_time}")]
    SlotUnavailable {
        /// Requested start
        scheduled_time: DateTime<Utc>,
    },

    /// The staff member already has an overlapping appointment.
    #[error("Conflicts with appointment {existing}")]
    ConflictingAppointment {
        /// The appointment in the way
        existing: AppointmentId,
    },

    /// The record is not in a state that allows the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A storage collaborator failed.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}

impl EngineError {
    /// Short, stable label for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound(_) => "not_found",
            Self::SlotUnavailable { .. } => "slot_unavailable",
            Self::ConflictingAppointment { .. } => "conflict",
            Self::InvalidState(_) => "invalid_state",
            Self::StorageUnavailable(_) => "storage_unavailable",
        }
    }
}

impl From<TransitionError> for EngineError {
    fn from(err: TransitionError) -> Self {
        Self::InvalidState(err.to_string())
    }
}
