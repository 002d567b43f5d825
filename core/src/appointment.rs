//! Appointments, their lifecycle and the overlap rule used for conflict detection.

use crate::error::{ParseStatusError, TransitionError};
use crate::ids::{AppointmentId, BranchId, CustomerId, ServiceId, StaffId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an appointment.
///
/// ```text
/// SCHEDULED ──▶ IN_PROGRESS ──▶ COMPLETED
///     │  │            │
///     │  └──▶ NO_SHOW │
///     └──────┬────────┘
///            ▼
///        CANCELLED
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    /// Booked, not yet started
    Scheduled,
    /// Staff has started serving the customer
    InProgress,
    /// Service finished
    Completed,
    /// Withdrawn before completion
    Cancelled,
    /// Customer never turned up
    NoShow,
}

impl AppointmentStatus {
    /// Statuses that keep a staff member's time occupied.
    pub const BLOCKING: [Self; 3] = [Self::Scheduled, Self::InProgress, Self::Completed];

    /// Database/wire representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::NoShow => "NO_SHOW",
        }
    }

    /// Whether an appointment in this status occupies its time window and slot capacity.
    #[must_use]
    pub const fn occupies_schedule(&self) -> bool {
        !matches!(self, Self::Cancelled | Self::NoShow)
    }

    /// Whether the status can be cancelled.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        matches!(self, Self::Scheduled | Self::InProgress)
    }

    /// Whether a token may still be issued against an appointment in this status.
    #[must_use]
    pub const fn accepts_token(&self) -> bool {
        matches!(self, Self::Scheduled | Self::InProgress)
    }

    /// Whether `next` is a legal successor of this status.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Scheduled, Self::InProgress)
                | (Self::InProgress, Self::Completed)
                | (Self::Scheduled, Self::NoShow)
                | (Self::Scheduled | Self::InProgress, Self::Cancelled)
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(Self::Scheduled),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            "NO_SHOW" => Ok(Self::NoShow),
            _ => Err(ParseStatusError {
                kind: "appointment",
                value: s.to_string(),
            }),
        }
    }
}

/// The half-open interval `[start, end)` an appointment occupies.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingWindow {
    /// Inclusive start
    pub start: DateTime<Utc>,
    /// Exclusive end
    pub end: DateTime<Utc>,
}

impl BookingWindow {
    /// Window of `duration` starting at `start`.
    #[must_use]
    pub fn starting_at(start: DateTime<Utc>, duration: Duration) -> Self {
        Self {
            start,
            end: start + duration,
        }
    }

    /// Whether two half-open windows share at least one instant.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Length of the window.
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

/// An appointment record as held by the ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    /// Unique id
    pub id: AppointmentId,
    /// Who booked
    pub customer_id: CustomerId,
    /// Where
    pub branch_id: BranchId,
    /// What
    pub service_id: ServiceId,
    /// With whom (branch-wide bookings have none)
    pub staff_id: Option<StaffId>,
    /// Start of the appointment
    pub scheduled_time: DateTime<Utc>,
    /// Lifecycle status
    pub status: AppointmentStatus,
    /// Queue token number once the customer has checked in
    pub token_number: Option<i32>,
    /// Wait estimate recorded when the token was issued
    pub estimated_wait_minutes: Option<i32>,
    /// Free-form notes
    pub notes: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    /// The window this appointment occupies for a given service duration.
    #[must_use]
    pub fn window(&self, service_duration: Duration) -> BookingWindow {
        BookingWindow::starting_at(self.scheduled_time, service_duration)
    }

    /// Whether this appointment blocks `window` for the same staff member.
    #[must_use]
    pub fn conflicts_with(&self, window: &BookingWindow, service_duration: Duration) -> bool {
        self.status.occupies_schedule() && self.window(service_duration).overlaps(window)
    }

    /// Apply a status transition, stamping `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::Appointment`] if the lifecycle forbids the move.
    pub fn transition(
        &mut self,
        next: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::Appointment {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = at;
        Ok(())
    }
}

/// Optional conjunction of equality filters for listing appointments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentFilter {
    /// Match branch
    pub branch_id: Option<BranchId>,
    /// Match customer
    pub customer_id: Option<CustomerId>,
    /// Match staff member
    pub staff_id: Option<StaffId>,
    /// Match status
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    /// Whether `appointment` satisfies every populated field.
    #[must_use]
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.branch_id.is_none_or(|id| appointment.branch_id == id)
            && self.customer_id.is_none_or(|id| appointment.customer_id == id)
            && self
                .staff_id
                .is_none_or(|id| appointment.staff_id == Some(id))
            && self.status.is_none_or(|status| appointment.status == status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0)
            .single()
            .unwrap_or_default()
    }

    fn appointment(time: DateTime<Utc>, status: AppointmentStatus) -> Appointment {
        Appointment {
            id: AppointmentId::new(),
            customer_id: CustomerId::new(),
            branch_id: BranchId::new(),
            service_id: ServiceId::new(),
            staff_id: Some(StaffId::new()),
            scheduled_time: time,
            status,
            token_number: None,
            estimated_wait_minutes: None,
            notes: String::new(),
            created_at: time,
            updated_at: time,
        }
    }

    #[test]
    fn windows_fifteen_minutes_apart_overlap() {
        let thirty = Duration::minutes(30);
        let existing = BookingWindow::starting_at(at(10, 0), thirty);
        let requested = BookingWindow::starting_at(at(10, 15), thirty);
        assert!(existing.overlaps(&requested));
        assert!(requested.overlaps(&existing));
    }

    #[test]
    fn back_to_back_windows_do_not_overlap() {
        let thirty = Duration::minutes(30);
        let first = BookingWindow::starting_at(at(10, 0), thirty);
        let second = BookingWindow::starting_at(at(10, 30), thirty);
        assert!(!first.overlaps(&second));
    }

    #[test]
    fn cancelled_and_no_show_never_conflict() {
        let thirty = Duration::minutes(30);
        let window = BookingWindow::starting_at(at(10, 0), thirty);
        for status in [AppointmentStatus::Cancelled, AppointmentStatus::NoShow] {
            assert!(!appointment(at(10, 0), status).conflicts_with(&window, thirty));
        }
        for status in AppointmentStatus::BLOCKING {
            assert!(appointment(at(10, 0), status).conflicts_with(&window, thirty));
        }
    }

    #[test]
    fn cancellation_only_from_scheduled_or_in_progress() {
        use AppointmentStatus::*;
        assert!(Scheduled.can_transition_to(Cancelled));
        assert!(InProgress.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!NoShow.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn transitions_are_forward_only() {
        let mut appt = appointment(at(9, 0), AppointmentStatus::Scheduled);
        assert!(appt.transition(AppointmentStatus::InProgress, at(9, 1)).is_ok());
        assert!(appt.transition(AppointmentStatus::Completed, at(9, 30)).is_ok());
        assert_eq!(appt.updated_at, at(9, 30));
        assert_eq!(
            appt.transition(AppointmentStatus::Scheduled, at(9, 31)),
            Err(TransitionError::Appointment {
                from: AppointmentStatus::Completed,
                to: AppointmentStatus::Scheduled,
            })
        );
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::InProgress,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::NoShow,
        ] {
            assert_eq!(status.as_str().parse::<AppointmentStatus>(), Ok(status));
        }
        assert!("BOOKED".parse::<AppointmentStatus>().is_err());
    }

    #[test]
    fn empty_filter_matches_everything() {
        let appt = appointment(at(12, 0), AppointmentStatus::Scheduled);
        assert!(AppointmentFilter::default().matches(&appt));

        let filter = AppointmentFilter {
            branch_id: Some(appt.branch_id),
            status: Some(AppointmentStatus::Cancelled),
            ..AppointmentFilter::default()
        };
        assert!(!filter.matches(&appt));
    }

    proptest! {
        #[test]
        fn overlap_is_symmetric(a in 0i64..10_000, b in 0i64..10_000, len in 1i64..240) {
            let base = at(0, 0);
            let duration = Duration::minutes(len);
            let first = BookingWindow::starting_at(base + Duration::minutes(a), duration);
            let second = BookingWindow::starting_at(base + Duration::minutes(b), duration);
            prop_assert_eq!(first.overlaps(&second), second.overlaps(&first));
            prop_assert_eq!(first.overlaps(&second), (a - b).abs() < len);
        }
    }
}
