//! Queue tokens and the token state machine.
//!
//! ```text
//! WAITING ──call──▶ CALLED ──begin──▶ SERVING ──complete──▶ COMPLETED
//! ```
//!
//! Transitions are strictly forward and never skip a state.

use crate::error::{ParseStatusError, TransitionError};
use crate::ids::{AppointmentId, BranchId, CustomerId, TokenId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a queue token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    /// Issued, waiting to be called
    Waiting,
    /// Called to the counter
    Called,
    /// Being served
    Serving,
    /// Done, immutable from here on
    Completed,
}

impl TokenStatus {
    /// Database/wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Called => "CALLED",
            Self::Serving => "SERVING",
            Self::Completed => "COMPLETED",
        }
    }

    /// The only legal successor, `None` once completed.
    #[must_use]
    pub const fn next(&self) -> Option<Self> {
        match self {
            Self::Waiting => Some(Self::Called),
            Self::Called => Some(Self::Serving),
            Self::Serving => Some(Self::Completed),
            Self::Completed => None,
        }
    }

    /// Whether the token holds the service window (CALLED or SERVING).
    #[must_use]
    pub const fn is_active(&self) -> bool {
        matches!(self, Self::Called | Self::Serving)
    }
}

impl fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "WAITING" => Ok(Self::Waiting),
            "CALLED" => Ok(Self::Called),
            "SERVING" => Ok(Self::Serving),
            "COMPLETED" => Ok(Self::Completed),
            _ => Err(ParseStatusError {
                kind: "token",
                value: s.to_string(),
            }),
        }
    }
}

/// A ticket in a branch's daily queue.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Unique id
    pub id: TokenId,
    /// Branch whose queue this token belongs to
    pub branch_id: BranchId,
    /// Holder
    pub customer_id: CustomerId,
    /// Appointment the holder checked in for, if any
    pub appointment_id: Option<AppointmentId>,
    /// Sequence number, unique per branch and service day, starting at 1
    pub token_number: i32,
    /// Calendar day (in the configured timezone) the number is scoped to
    pub service_date: NaiveDate,
    /// Lifecycle status
    pub status: TokenStatus,
    /// Free-form notes
    pub notes: String,
    /// When the token was called to the counter
    pub called_at: Option<DateTime<Utc>>,
    /// When service finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Issue time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Token {
    /// Move to `next`, stamping the matching timestamp.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Token`] unless `next` is the direct successor of the
    /// current status.
    pub fn advance(&mut self, next: TokenStatus, at: DateTime<Utc>) -> Result<(), TransitionError> {
        if self.status.next() != Some(next) {
            return Err(TransitionError::Token {
                from: self.status,
                to: next,
            });
        }
        match next {
            TokenStatus::Called => self.called_at = Some(at),
            TokenStatus::Completed => self.completed_at = Some(at),
            TokenStatus::Waiting | TokenStatus::Serving => {},
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }

    /// The cache entry mirroring this token.
    #[must_use]
    pub const fn queue_entry(&self) -> QueueEntry {
        QueueEntry {
            token_id: self.id,
            token_number: self.token_number,
        }
    }

    /// The cache key of this token's queue.
    #[must_use]
    pub const fn queue_key(&self) -> QueueKey {
        QueueKey::new(self.branch_id, self.service_date)
    }
}

/// Identifies one branch's queue for one service day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueueKey {
    /// Branch
    pub branch_id: BranchId,
    /// Service day
    pub service_date: NaiveDate,
}

impl QueueKey {
    /// Creates a new `QueueKey`
    #[must_use]
    pub const fn new(branch_id: BranchId, service_date: NaiveDate) -> Self {
        Self {
            branch_id,
            service_date,
        }
    }

    /// Cache key, e.g. `queue:<branch>:2025-03-10`.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("queue:{}:{}", self.branch_id, self.service_date)
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.branch_id, self.service_date)
    }
}

/// Payload stored in the queue cache list.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Token the entry mirrors
    pub token_id: TokenId,
    /// Its number, for display without a ledger round-trip
    pub token_number: i32,
}
