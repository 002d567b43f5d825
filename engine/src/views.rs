//! Request and response types exchanged with the request dispatcher.

use branchline_core::appointment::{Appointment, AppointmentStatus};
use branchline_core::ids::{
    AppointmentId, BranchId, CustomerId, ServiceId, SlotId, StaffId, TokenId,
};
use branchline_core::queue::QueueStatus;
use branchline_core::slot::TimeSlot;
use branchline_core::token::{QueueEntry, Token, TokenStatus};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Requests
// ============================================================================

/// Request to book an appointment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRequest {
    /// Who books
    pub customer_id: CustomerId,
    /// Where
    pub branch_id: BranchId,
    /// What
    pub service_id: ServiceId,
    /// With whom
    #[serde(default)]
    pub staff_id: Option<StaffId>,
    /// When; required, `None` is rejected
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    /// Free-form notes
    #[serde(default)]
    pub notes: String,
}

/// Replacement values for an existing appointment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateAppointmentRequest {
    /// New staff member (`None` makes the booking branch-wide)
    #[serde(default)]
    pub staff_id: Option<StaffId>,
    /// New start; required
    #[serde(default)]
    pub scheduled_time: Option<DateTime<Utc>>,
    /// New notes
    #[serde(default)]
    pub notes: String,
}

/// Request to issue a queue token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTokenRequest {
    /// Branch queue to join
    pub branch_id: BranchId,
    /// Holder
    pub customer_id: CustomerId,
    /// Appointment being checked in, if any
    #[serde(default)]
    pub appointment_id: Option<AppointmentId>,
    /// Free-form notes
    #[serde(default)]
    pub notes: String,
}

/// Request to open a bookable slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSlotRequest {
    /// Branch offering the slot
    pub branch_id: BranchId,
    /// Staff member, `None` for branch-wide slots
    #[serde(default)]
    pub staff_id: Option<StaffId>,
    /// Inclusive start
    pub start_time: DateTime<Utc>,
    /// Exclusive end
    pub end_time: DateTime<Utc>,
    /// Concurrent bookings accepted, defaults to 1
    #[serde(default)]
    pub capacity: Option<i32>,
}

/// Search for open slots whose start lies in `[from, to]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotSearch {
    /// Branch
    pub branch_id: BranchId,
    /// Restrict to one staff member
    #[serde(default)]
    pub staff_id: Option<StaffId>,
    /// Earliest start
    pub from: DateTime<Utc>,
    /// Latest start
    pub to: DateTime<Utc>,
}

// ============================================================================
// Views
// ============================================================================

/// Acknowledgement for operations without a payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Whether this call changed anything (`false` for idempotent repeats)
    pub changed: bool,
}

impl Ack {
    /// The call applied its effect
    #[must_use]
    pub const fn applied() -> Self {
        Self { changed: true }
    }

    /// The effect was already in place
    #[must_use]
    pub const fn unchanged() -> Self {
        Self { changed: false }
    }
}

/// Appointment as returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentView {
    /// Id
    pub id: AppointmentId,
    /// Customer
    pub customer_id: CustomerId,
    /// Branch
    pub branch_id: BranchId,
    /// Service
    pub service_id: ServiceId,
    /// Staff member
    pub staff_id: Option<StaffId>,
    /// Start
    pub scheduled_time: DateTime<Utc>,
    /// Status
    pub status: AppointmentStatus,
    /// Queue number after check-in
    pub token_number: Option<i32>,
    /// Wait estimate recorded at check-in
    pub estimated_wait_minutes: Option<i32>,
    /// Notes
    pub notes: String,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last modified
    pub updated_at: DateTime<Utc>,
}

impl From<Appointment> for AppointmentView {
    fn from(a: Appointment) -> Self {
        Self {
            id: a.id,
            customer_id: a.customer_id,
            branch_id: a.branch_id,
            service_id: a.service_id,
            staff_id: a.staff_id,
            scheduled_time: a.scheduled_time,
            status: a.status,
            token_number: a.token_number,
            estimated_wait_minutes: a.estimated_wait_minutes,
            notes: a.notes,
            created_at: a.created_at,
            updated_at: a.updated_at,
        }
    }
}

/// Token as returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenView {
    /// Id
    pub id: TokenId,
    /// Branch
    pub branch_id: BranchId,
    /// Holder
    pub customer_id: CustomerId,
    /// Linked appointment
    pub appointment_id: Option<AppointmentId>,
    /// Number within the branch's day
    pub token_number: i32,
    /// Day the number belongs to
    pub service_date: NaiveDate,
    /// Status
    pub status: TokenStatus,
    /// Notes
    pub notes: String,
    /// Called to the counter
    pub called_at: Option<DateTime<Utc>>,
    /// Service finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Issued
    pub created_at: DateTime<Utc>,
    /// Last modified
    pub updated_at: DateTime<Utc>,
}

impl From<Token> for TokenView {
    fn from(t: Token) -> Self {
        Self {
            id: t.id,
            branch_id: t.branch_id,
            customer_id: t.customer_id,
            appointment_id: t.appointment_id,
            token_number: t.token_number,
            service_date: t.service_date,
            status: t.status,
            notes: t.notes,
            called_at: t.called_at,
            completed_at: t.completed_at,
            created_at: t.created_at,
            updated_at: t.updated_at,
        }
    }
}

/// Queue snapshot as returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatusView {
    /// Branch
    pub branch_id: BranchId,
    /// Day
    pub service_date: NaiveDate,
    /// Number being served, if any
    pub current_token_number: Option<i32>,
    /// Tokens waiting
    pub waiting_count: i64,
    /// Wait for a token issued now
    pub estimated_wait_minutes: i64,
}

impl From<QueueStatus> for QueueStatusView {
    fn from(s: QueueStatus) -> Self {
        Self {
            branch_id: s.branch_id,
            service_date: s.service_date,
            current_token_number: s.current_token_number,
            waiting_count: s.waiting_count,
            estimated_wait_minutes: s.estimated_wait_minutes,
        }
    }
}

/// Slot as returned to callers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotView {
    /// Id
    pub id: SlotId,
    /// Branch
    pub branch_id: BranchId,
    /// Staff member
    pub staff_id: Option<StaffId>,
    /// Start
    pub start_time: DateTime<Utc>,
    /// End
    pub end_time: DateTime<Utc>,
    /// Capacity
    pub capacity: i32,
    /// Open for booking
    pub is_available: bool,
}

impl From<TimeSlot> for SlotView {
    fn from(s: TimeSlot) -> Self {
        Self {
            id: s.id,
            branch_id: s.branch_id,
            staff_id: s.staff_id,
            start_time: s.start_time,
            end_time: s.end_time,
            capacity: s.capacity,
            is_available: s.is_available,
        }
    }
}

/// One entry of the queue head, as served by `PeekQueue`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntryView {
    /// Token
    pub token_id: TokenId,
    /// Its number
    pub token_number: i32,
}

impl From<QueueEntry> for QueueEntryView {
    fn from(e: QueueEntry) -> Self {
        Self {
            token_id: e.token_id,
            token_number: e.token_number,
        }
    }
}
