//! Derived queue status.

use crate::ids::BranchId;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Snapshot of a branch's queue, recomputed on every query.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    /// Branch
    pub branch_id: BranchId,
    /// Service day the snapshot covers
    pub service_date: NaiveDate,
    /// Number of the token being served, if any
    pub current_token_number: Option<i32>,
    /// Tokens still waiting to be called
    pub waiting_count: i64,
    /// `waiting_count` times the per-ticket estimate
    pub estimated_wait_minutes: i64,
}

impl QueueStatus {
    /// Build a snapshot using the linear per-ticket wait model.
    #[must_use]
    pub const fn compute(
        branch_id: BranchId,
        service_date: NaiveDate,
        current_token_number: Option<i32>,
        waiting_count: i64,
        minutes_per_ticket: i64,
    ) -> Self {
        Self {
            branch_id,
            service_date,
            current_token_number,
            waiting_count,
            estimated_wait_minutes: estimated_wait(waiting_count, minutes_per_ticket),
        }
    }
}

/// Linear wait estimate: every ticket ahead costs `minutes_per_ticket`.
#[must_use]
pub const fn estimated_wait(tickets_ahead: i64, minutes_per_ticket: i64) -> i64 {
    tickets_ahead.saturating_mul(minutes_per_ticket)
}
