//! Bookable time slots.

use crate::ids::{BranchId, SlotId, StaffId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A bookable window for a branch, optionally bound to one staff member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    /// Unique id
    pub id: SlotId,
    /// Branch offering the slot
    pub branch_id: BranchId,
    /// Staff member the slot belongs to (`None` for branch-wide slots)
    pub staff_id: Option<StaffId>,
    /// Inclusive start
    pub start_time: DateTime<Utc>,
    /// Exclusive end, always after `start_time`
    pub end_time: DateTime<Utc>,
    /// Number of concurrent appointments the slot accepts (at least 1)
    pub capacity: i32,
    /// Open for booking
    pub is_available: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl TimeSlot {
    /// Whether `time` falls inside `[start_time, end_time)`.
    #[must_use]
    pub fn covers(&self, time: DateTime<Utc>) -> bool {
        self.start_time <= time && time < self.end_time
    }

    /// Whether this slot serves bookings for `branch_id` / `staff_id`.
    ///
    /// Staffed requests only match that staff member's slots, staff-less requests only match
    /// branch-wide slots.
    #[must_use]
    pub fn serves(&self, branch_id: BranchId, staff_id: Option<StaffId>) -> bool {
        self.branch_id == branch_id && self.staff_id == staff_id
    }

    /// Whether the slot can take another booking given `booked` active appointments.
    #[must_use]
    pub fn accepts_booking(&self, booked: i64) -> bool {
        self.is_available && booked < i64::from(self.capacity)
    }

    /// Whether `booked` active appointments fill the slot.
    #[must_use]
    pub fn is_full(&self, booked: i64) -> bool {
        booked >= i64::from(self.capacity)
    }
}

/// Input for creating a slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTimeSlot {
    /// Branch offering the slot
    pub branch_id: BranchId,
    /// Optional staff member
    pub staff_id: Option<StaffId>,
    /// Inclusive start
    pub start_time: DateTime<Utc>,
    /// Exclusive end
    pub end_time: DateTime<Utc>,
    /// Concurrent capacity
    pub capacity: i32,
}

impl NewTimeSlot {
    /// Materialize the slot with a fresh id, open for booking.
    #[must_use]
    pub fn into_slot(self, now: DateTime<Utc>) -> TimeSlot {
        TimeSlot {
            id: SlotId::new(),
            branch_id: self.branch_id,
            staff_id: self.staff_id,
            start_time: self.start_time,
            end_time: self.end_time,
            capacity: self.capacity,
            is_available: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Range query over slots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotQuery {
    /// Branch to search
    pub branch_id: BranchId,
    /// Restrict to one staff member
    pub staff_id: Option<StaffId>,
    /// Earliest start (inclusive)
    pub from: DateTime<Utc>,
    /// Latest start (inclusive)
    pub to: DateTime<Utc>,
}

impl SlotQuery {
    /// Whether `slot` is an available slot inside this query.
    #[must_use]
    pub fn matches(&self, slot: &TimeSlot) -> bool {
        slot.is_available
            && slot.branch_id == self.branch_id
            && self.staff_id.is_none_or(|staff| slot.staff_id == Some(staff))
            && self.from <= slot.start_time
            && slot.start_time <= self.to
    }
}
