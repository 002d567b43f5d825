//! Collaborator traits for persistence and the queue cache.
//!
//! The engines only talk to storage through these traits. Each method that must observe and
//! change several records at once (booking, status changes that release capacity, token
//! issuance) is a single call, so implementations can run it inside one transaction.
//!
//! # Implementations
//!
//! - `PostgresLedger` (in `branchline-postgres`): production ledger
//! - `RedisQueueCache` (in `branchline-redis`): production queue cache
//! - `InMemoryLedger` / `InMemoryQueueCache` (in `branchline-testing`): deterministic tests
//!
//! # Dyn Compatibility
//!
//! Methods return [`StoreFuture`] instead of using `async fn` so the engines can hold
//! `Arc<dyn AppointmentLedger>` and friends.

use crate::appointment::{Appointment, AppointmentFilter, AppointmentStatus};
use crate::error::StoreError;
use crate::ids::{AppointmentId, BranchId, CustomerId, SlotId, TokenId};
use crate::slot::{SlotQuery, TimeSlot};
use crate::token::{QueueEntry, QueueKey, Token, TokenStatus};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by every collaborator method.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

// ============================================================================
// Slots
// ============================================================================

/// Result of deleting a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotDeletion {
    /// The slot was removed
    Deleted,
    /// No slot with that id
    NotFound,
    /// An appointment occupying capacity still starts inside the slot
    InUse,
}

/// Storage for bookable time slots.
pub trait SlotStore: Send + Sync {
    /// Persist a new slot.
    ///
    /// # Errors
    ///
    /// - `Constraint`: the row violates a check (e.g. `start_time >= end_time`)
    /// - `Unavailable`: storage failure
    fn create_slot(&self, slot: TimeSlot) -> StoreFuture<'_, TimeSlot>;

    /// Load a slot by id.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn get_slot(&self, id: SlotId) -> StoreFuture<'_, Option<TimeSlot>>;

    /// Available slots matching `query`, ordered by `start_time`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn list_available_slots(&self, query: SlotQuery) -> StoreFuture<'_, Vec<TimeSlot>>;

    /// Open or close a slot. Returns `None` if the slot does not exist.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn set_slot_availability(
        &self,
        id: SlotId,
        is_available: bool,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<TimeSlot>>;

    /// Delete a slot unless an active appointment starts inside it.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn delete_slot(&self, id: SlotId) -> StoreFuture<'_, SlotDeletion>;
}

// ============================================================================
// Appointments
// ============================================================================

/// Whether a booking creates a new appointment or moves an existing one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BookingMode {
    /// Insert a new appointment row.
    Create,
    /// Overwrite the row with the candidate's id, ignoring that row in the checks and
    /// releasing the capacity it held.
    Reschedule,
}

/// A proposed booking, checked and committed atomically by [`AppointmentLedger::commit_booking`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingCandidate {
    /// The appointment as it should be stored on success
    pub appointment: Appointment,
    /// Length of every appointment window
    pub service_duration: Duration,
    /// Insert or overwrite
    pub mode: BookingMode,
}

/// Outcome of an atomic check-then-commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingOutcome {
    /// Both checks passed and the appointment was stored.
    Booked(Appointment),
    /// Another appointment for the same staff member overlaps the requested window.
    Conflict {
        /// The appointment in the way
        existing: AppointmentId,
    },
    /// No open slot with spare capacity covers the requested time.
    SlotUnavailable,
    /// Rescheduling an appointment that no longer exists.
    Missing,
}

/// The appointment ledger.
///
/// Implementations must make [`commit_booking`](Self::commit_booking) and
/// [`transition_appointment`](Self::transition_appointment) atomic: the checks and every write
/// they imply either all happen or none do, and two calls for the same branch and staff member
/// never interleave.
pub trait AppointmentLedger: Send + Sync {
    /// Check availability and conflicts, then store the appointment.
    ///
    /// Checks, in order:
    ///
    /// 1. When the appointment has a staff member: no other appointment on the same branch and
    ///    staff member that still occupies the schedule has an overlapping window. Reported
    ///    as [`BookingOutcome::Conflict`].
    /// 2. An available slot serving the branch/staff member covers `scheduled_time` and has
    ///    fewer active bookings than its capacity. Reported as
    ///    [`BookingOutcome::SlotUnavailable`].
    ///
    /// On success the chosen slot is closed if this booking fills it. When rescheduling, the
    /// slot the appointment previously held is reopened if it had been full.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure; nothing is written in that case.
    fn commit_booking(&self, candidate: BookingCandidate) -> StoreFuture<'_, BookingOutcome>;

    /// Load an appointment by id.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn get_appointment(&self, id: AppointmentId) -> StoreFuture<'_, Option<Appointment>>;

    /// Appointments matching `filter`, ordered by `scheduled_time`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn list_appointments(&self, filter: AppointmentFilter) -> StoreFuture<'_, Vec<Appointment>>;

    /// Overwrite `staff_id`, `scheduled_time`, `notes` and `updated_at` without any checks.
    ///
    /// Status and token linkage are left as stored. Returns `None` if the appointment does
    /// not exist.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn update_appointment(&self, appointment: Appointment)
    -> StoreFuture<'_, Option<Appointment>>;

    /// Compare-and-set the status from `from` to `to`.
    ///
    /// Returns `None` if the appointment is absent or no longer in `from`. When `to` stops
    /// occupying the schedule (cancelled, no-show) the covering slot is reopened if it had
    /// been full, in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn transition_appointment(
        &self,
        id: AppointmentId,
        from: AppointmentStatus,
        to: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Appointment>>;
}

// ============================================================================
// Tokens
// ============================================================================

/// Input for issuing a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NewToken {
    /// Id to assign
    pub id: TokenId,
    /// Branch queue
    pub branch_id: BranchId,
    /// Holder
    pub customer_id: CustomerId,
    /// Appointment to stamp with the number and wait estimate
    pub appointment_id: Option<AppointmentId>,
    /// Service day scoping the number
    pub service_date: NaiveDate,
    /// Free-form notes
    pub notes: String,
    /// Per-ticket wait estimate used for the linked appointment
    pub minutes_per_ticket: i64,
    /// Issue time
    pub issued_at: DateTime<Utc>,
}

/// The token ledger.
pub trait TokenLedger: Send + Sync {
    /// Allocate the next number for `(branch_id, service_date)` and insert a WAITING token.
    ///
    /// The counter increment, the insert and the update of a linked appointment
    /// (`token_number`, `estimated_wait_minutes` = tokens already waiting x
    /// `minutes_per_ticket`) happen in one transaction.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure; no number is consumed in that case.
    fn issue_token(&self, token: NewToken) -> StoreFuture<'_, Token>;

    /// Load a token by id.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn get_token(&self, id: TokenId) -> StoreFuture<'_, Option<Token>>;

    /// All tokens of a branch/day, ordered by `token_number`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn list_tokens(&self, branch_id: BranchId, date: NaiveDate) -> StoreFuture<'_, Vec<Token>>;

    /// The lowest-numbered token of a branch/day in `status`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn first_with_status(
        &self,
        branch_id: BranchId,
        date: NaiveDate,
        status: TokenStatus,
    ) -> StoreFuture<'_, Option<Token>>;

    /// The branch's CALLED or SERVING token from any service day, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn active_token(&self, branch_id: BranchId) -> StoreFuture<'_, Option<Token>>;

    /// Number of tokens of a branch/day in `status`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` on storage failure.
    fn count_with_status(
        &self,
        branch_id: BranchId,
        date: NaiveDate,
        status: TokenStatus,
    ) -> StoreFuture<'_, i64>;

    /// Compare-and-set the status, stamping `called_at`/`completed_at` as appropriate.
    ///
    /// Returns `None` if the token is absent or no longer in `from`.
    ///
    /// # Errors
    ///
    /// - `Constraint`: another token of the branch, from any day, already holds the service window
    /// - `Unavailable`: storage failure
    fn transition_token(
        &self,
        id: TokenId,
        from: TokenStatus,
        to: TokenStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Token>>;
}

// ============================================================================
// Queue cache
// ============================================================================

/// Fast FIFO mirror of each branch/day queue.
///
/// The ledger stays authoritative: callers treat every error here as a degraded cache, not a
/// failed operation.
pub trait QueueCache: Send + Sync {
    /// Append an entry at the tail.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Serialization` if the cache could not be written.
    fn push_back(&self, key: QueueKey, entry: QueueEntry) -> StoreFuture<'_, ()>;

    /// Remove and return the head entry.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Serialization` on failure.
    fn pop_front(&self, key: QueueKey) -> StoreFuture<'_, Option<QueueEntry>>;

    /// The first `limit` entries, head first.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Serialization` on failure.
    fn range(&self, key: QueueKey, limit: usize) -> StoreFuture<'_, Vec<QueueEntry>>;

    /// Replace the whole list.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` or `Serialization` on failure.
    fn replace(&self, key: QueueKey, entries: Vec<QueueEntry>) -> StoreFuture<'_, ()>;
}

/// Queue cache for deployments without one: every call fails with `Unavailable`, so readers
/// fall back to the ledger.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledQueueCache;

impl DisabledQueueCache {
    fn disabled<'a, T: Send + 'a>() -> StoreFuture<'a, T> {
        Box::pin(async { Err(StoreError::Unavailable("queue cache disabled".to_string())) })
    }
}

impl QueueCache for DisabledQueueCache {
    fn push_back(&self, _key: QueueKey, _entry: QueueEntry) -> StoreFuture<'_, ()> {
        Self::disabled()
    }

    fn pop_front(&self, _key: QueueKey) -> StoreFuture<'_, Option<QueueEntry>> {
        Self::disabled()
    }

    fn range(&self, _key: QueueKey, _limit: usize) -> StoreFuture<'_, Vec<QueueEntry>> {
        Self::disabled()
    }

    fn replace(&self, _key: QueueKey, _entries: Vec<QueueEntry>) -> StoreFuture<'_, ()> {
        Self::disabled()
    }
}
