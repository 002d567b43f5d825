//! Booking engine behaviour against the in-memory ledger.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/expect

use branchline_core::appointment::{AppointmentFilter, AppointmentStatus};
use branchline_core::Tz;
use branchline_core::config::EngineConfig;
use branchline_core::ids::{AppointmentId, BranchId, CustomerId, ServiceId, SlotId, StaffId};
use branchline_engine::{
    AppointmentRequest, AppointmentView, BookingEngine, CreateSlotRequest, EngineError,
    SlotSearch, SlotView, UpdateAppointmentRequest,
};
use branchline_testing::{InMemoryLedger, ManualClock};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0)
        .single()
        .expect("valid time")
}

struct Harness {
    ledger: InMemoryLedger,
    engine: BookingEngine,
    branch: BranchId,
    staff: StaffId,
}

fn harness_with(config: EngineConfig) -> Harness {
    branchline_testing::init_test_tracing();
    let ledger = InMemoryLedger::new();
    let clock = ManualClock::new(at(8, 0));
    let engine = BookingEngine::new(
        Arc::new(ledger.clone()),
        Arc::new(ledger.clone()),
        Arc::new(clock),
        config,
    );
    Harness {
        ledger,
        engine,
        branch: BranchId::new(),
        staff: StaffId::new(),
    }
}

fn harness() -> Harness {
    harness_with(EngineConfig::new(Tz::UTC))
}

impl Harness {
    async fn slot(
        &self,
        staff: Option<StaffId>,
        start: DateTime<Utc>,
        minutes: i64,
        capacity: i32,
    ) -> SlotView {
        self.engine
            .create_time_slot(CreateSlotRequest {
                branch_id: self.branch,
                staff_id: staff,
                start_time: start,
                end_time: start + Duration::minutes(minutes),
                capacity: Some(capacity),
            })
            .await
            .expect("slot created")
    }

    fn request(&self, staff: Option<StaffId>, time: DateTime<Utc>) -> AppointmentRequest {
        AppointmentRequest {
            customer_id: CustomerId::new(),
            branch_id: self.branch,
            service_id: ServiceId::new(),
            staff_id: staff,
            scheduled_time: Some(time),
            notes: String::new(),
        }
    }

    async fn book(
        &self,
        staff: Option<StaffId>,
        time: DateTime<Utc>,
    ) -> Result<AppointmentView, EngineError> {
        self.engine
            .create_appointment(self.request(staff, time))
            .await
    }

    async fn slot_state(&self, id: SlotId) -> bool {
        use branchline_core::store::SlotStore;
        self.ledger
            .get_slot(id)
            .await
            .unwrap()
            .expect("slot exists")
            .is_available
    }
}

// ============================================================================
// Admission
// ============================================================================

#[tokio::test]
async fn overlapping_booking_conflicts_and_later_booking_succeeds() {
    let h = harness();
    let staff = Some(h.staff);
    h.slot(staff, at(10, 0), 30, 1).await;
    h.slot(staff, at(11, 0), 30, 1).await;

    let c1 = h.book(staff, at(10, 0)).await.expect("first booking");
    assert_eq!(c1.status, AppointmentStatus::Scheduled);

    let c2 = h.book(staff, at(10, 15)).await;
    match c2 {
        Err(EngineError::ConflictingAppointment { existing }) => assert_eq!(existing, c1.id),
        other => panic!("expected conflict, got {other:?}"),
    }

    let c3 = h.book(staff, at(11, 0)).await.expect("third booking");
    assert_eq!(c3.status, AppointmentStatus::Scheduled);
    assert_eq!(h.ledger.appointment_count().unwrap(), 2);
}

#[tokio::test]
async fn back_to_back_bookings_do_not_conflict() {
    let h = harness();
    let staff = Some(h.staff);
    h.slot(staff, at(10, 0), 60, 2).await;

    h.book(staff, at(10, 0)).await.expect("10:00");
    h.book(staff, at(10, 30)).await.expect("10:30");
}

#[tokio::test]
async fn other_staff_members_do_not_conflict() {
    let h = harness();
    let other = StaffId::new();
    h.slot(Some(h.staff), at(10, 0), 30, 1).await;
    h.slot(Some(other), at(10, 0), 30, 1).await;

    h.book(Some(h.staff), at(10, 0)).await.expect("first staff");
    h.book(Some(other), at(10, 10)).await.expect("second staff");
}

#[tokio::test]
async fn booking_without_a_covering_slot_is_unavailable() {
    let h = harness();
    h.slot(Some(h.staff), at(10, 0), 30, 1).await;

    let result = h.book(Some(h.staff), at(10, 30)).await;
    assert!(matches!(result, Err(EngineError::SlotUnavailable { .. })));

    // Staffed slots never serve branch-wide requests.
    let result = h.book(None, at(10, 0)).await;
    assert!(matches!(result, Err(EngineError::SlotUnavailable { .. })));
}

#[tokio::test]
async fn capacity_closes_the_slot_when_reached() {
    let h = harness();
    let slot = h.slot(None, at(9, 0), 60, 2).await;

    h.book(None, at(9, 0)).await.expect("first");
    assert!(h.slot_state(slot.id).await);
    h.book(None, at(9, 0)).await.expect("second");
    assert!(!h.slot_state(slot.id).await);

    let third = h.book(None, at(9, 30)).await;
    assert!(matches!(third, Err(EngineError::SlotUnavailable { .. })));
}

#[tokio::test]
async fn closed_slot_rejects_bookings() {
    let h = harness();
    let slot = h.slot(None, at(9, 0), 60, 5).await;
    h.engine.set_slot_availability(slot.id, false).await.unwrap();

    let result = h.book(None, at(9, 0)).await;
    assert!(matches!(result, Err(EngineError::SlotUnavailable { .. })));
}

#[tokio::test]
async fn invalid_requests_never_reach_storage() {
    let h = harness();
    h.ledger.set_unavailable(true);

    let mut request = h.request(Some(h.staff), at(10, 0));
    request.customer_id = CustomerId::from_uuid(uuid_nil());
    assert!(matches!(
        h.engine.create_appointment(request).await,
        Err(EngineError::Validation(_))
    ));

    let mut request = h.request(Some(h.staff), at(10, 0));
    request.scheduled_time = None;
    assert!(matches!(
        h.engine.create_appointment(request).await,
        Err(EngineError::Validation(_))
    ));

    let request = h.request(Some(StaffId::from_uuid(uuid_nil())), at(10, 0));
    assert!(matches!(
        h.engine.create_appointment(request).await,
        Err(EngineError::Validation(_))
    ));
}

fn uuid_nil() -> uuid::Uuid {
    uuid::Uuid::nil()
}

#[tokio::test]
async fn ledger_outage_is_reported_as_storage_unavailable() {
    let h = harness();
    h.slot(Some(h.staff), at(10, 0), 30, 1).await;
    h.ledger.set_unavailable(true);

    let result = h.book(Some(h.staff), at(10, 0)).await;
    assert!(matches!(result, Err(EngineError::StorageUnavailable(_))));
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn get_and_list_appointments() {
    let h = harness();
    let staff = Some(h.staff);
    h.slot(staff, at(9, 0), 180, 10).await;

    let late = h.book(staff, at(11, 0)).await.unwrap();
    let early = h.book(staff, at(9, 0)).await.unwrap();
    let fetched = h.engine.get_appointment(late.id).await.unwrap();
    assert_eq!(fetched, late);

    let listed = h
        .engine
        .list_appointments(AppointmentFilter {
            branch_id: Some(h.branch),
            ..AppointmentFilter::default()
        })
        .await
        .unwrap();
    let ids: Vec<AppointmentId> = listed.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![early.id, late.id]);

    let cancelled_only = h
        .engine
        .list_appointments(AppointmentFilter {
            status: Some(AppointmentStatus::Cancelled),
            ..AppointmentFilter::default()
        })
        .await
        .unwrap();
    assert!(cancelled_only.is_empty());

    assert!(matches!(
        h.engine.get_appointment(AppointmentId::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

// ============================================================================
// Updates
// ============================================================================

#[tokio::test]
async fn update_overwrites_without_checks_by_default() {
    let h = harness();
    let staff = Some(h.staff);
    h.slot(staff, at(10, 0), 60, 2).await;
    let first = h.book(staff, at(10, 0)).await.unwrap();
    let second = h.book(staff, at(10, 30)).await.unwrap();

    let updated = h
        .engine
        .update_appointment(
            second.id,
            UpdateAppointmentRequest {
                staff_id: staff,
                scheduled_time: Some(at(10, 10)),
                notes: "moved".to_string(),
            },
        )
        .await
        .expect("unchecked update");
    assert_eq!(updated.scheduled_time, at(10, 10));
    assert_eq!(updated.notes, "moved");
    assert_eq!(updated.status, AppointmentStatus::Scheduled);
    assert_ne!(first.id, updated.id);
}

#[tokio::test]
async fn revalidating_update_rejects_conflicts_and_moves_slots() {
    let h = harness_with(EngineConfig::new(Tz::UTC).with_revalidate_updates(true));
    let staff = Some(h.staff);
    let morning = h.slot(staff, at(10, 0), 30, 1).await;
    let noon = h.slot(staff, at(12, 0), 30, 1).await;
    h.slot(staff, at(14, 0), 30, 1).await;

    let first = h.book(staff, at(10, 0)).await.unwrap();
    let second = h.book(staff, at(12, 0)).await.unwrap();

    let conflict = h
        .engine
        .update_appointment(
            second.id,
            UpdateAppointmentRequest {
                staff_id: staff,
                scheduled_time: Some(at(10, 15)),
                notes: String::new(),
            },
        )
        .await;
    match conflict {
        Err(EngineError::ConflictingAppointment { existing }) => assert_eq!(existing, first.id),
        other => panic!("expected conflict, got {other:?}"),
    }

    let moved = h
        .engine
        .update_appointment(
            second.id,
            UpdateAppointmentRequest {
                staff_id: staff,
                scheduled_time: Some(at(14, 0)),
                notes: String::new(),
            },
        )
        .await
        .expect("move to 14:00");
    assert_eq!(moved.scheduled_time, at(14, 0));
    assert!(h.slot_state(noon.id).await, "old slot reopened");
    assert!(!h.slot_state(morning.id).await, "unrelated slot untouched");
}

#[tokio::test]
async fn update_of_missing_appointment_is_not_found() {
    let h = harness();
    let result = h
        .engine
        .update_appointment(
            AppointmentId::new(),
            UpdateAppointmentRequest {
                staff_id: None,
                scheduled_time: Some(at(10, 0)),
                notes: String::new(),
            },
        )
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn cancel_reopens_a_full_slot_and_is_idempotent() {
    let h = harness();
    let staff = Some(h.staff);
    let slot = h.slot(staff, at(10, 0), 30, 1).await;
    let booked = h.book(staff, at(10, 0)).await.unwrap();
    assert!(!h.slot_state(slot.id).await);

    let ack = h.engine.cancel_appointment(booked.id).await.unwrap();
    assert!(ack.changed);
    assert!(h.slot_state(slot.id).await);

    let again = h.engine.cancel_appointment(booked.id).await.unwrap();
    assert!(!again.changed);

    let cancelled = h.engine.get_appointment(booked.id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

    // The time is free again for the same staff member.
    h.book(staff, at(10, 5)).await.expect("rebook after cancel");
}

#[tokio::test]
async fn cancel_rejects_finished_appointments() {
    let h = harness();
    let staff = Some(h.staff);
    h.slot(staff, at(10, 0), 120, 4).await;

    let completed = h.book(staff, at(10, 0)).await.unwrap();
    h.engine.start_appointment(completed.id).await.unwrap();
    h.engine.complete_appointment(completed.id).await.unwrap();
    assert!(matches!(
        h.engine.cancel_appointment(completed.id).await,
        Err(EngineError::InvalidState(_))
    ));

    let absent = h.book(staff, at(11, 0)).await.unwrap();
    let no_show = h.engine.mark_no_show(absent.id).await.unwrap();
    assert_eq!(no_show.status, AppointmentStatus::NoShow);
    assert!(matches!(
        h.engine.cancel_appointment(absent.id).await,
        Err(EngineError::InvalidState(_))
    ));

    assert!(matches!(
        h.engine.cancel_appointment(AppointmentId::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn lifecycle_transitions_are_forward_only() {
    let h = harness();
    let staff = Some(h.staff);
    h.slot(staff, at(10, 0), 30, 1).await;
    let booked = h.book(staff, at(10, 0)).await.unwrap();

    assert!(matches!(
        h.engine.complete_appointment(booked.id).await,
        Err(EngineError::InvalidState(_))
    ));
    let started = h.engine.start_appointment(booked.id).await.unwrap();
    assert_eq!(started.status, AppointmentStatus::InProgress);
    assert!(matches!(
        h.engine.mark_no_show(booked.id).await,
        Err(EngineError::InvalidState(_))
    ));
    let done = h.engine.complete_appointment(booked.id).await.unwrap();
    assert_eq!(done.status, AppointmentStatus::Completed);

    // Completed appointments still block the staff member's time.
    h.slot(staff, at(10, 0), 30, 1).await;
    assert!(matches!(
        h.book(staff, at(10, 10)).await,
        Err(EngineError::ConflictingAppointment { .. })
    ));
}

#[tokio::test]
async fn no_show_releases_the_slot() {
    let h = harness();
    let slot = h.slot(None, at(10, 0), 30, 1).await;
    let booked = h.book(None, at(10, 0)).await.unwrap();
    assert!(!h.slot_state(slot.id).await);

    h.engine.mark_no_show(booked.id).await.unwrap();
    assert!(h.slot_state(slot.id).await);
}

// ============================================================================
// Slots
// ============================================================================

#[tokio::test]
async fn slot_creation_is_validated() {
    let h = harness();
    let inverted = h
        .engine
        .create_time_slot(CreateSlotRequest {
            branch_id: h.branch,
            staff_id: None,
            start_time: at(11, 0),
            end_time: at(10, 0),
            capacity: None,
        })
        .await;
    assert!(matches!(inverted, Err(EngineError::Validation(_))));

    let empty = h
        .engine
        .create_time_slot(CreateSlotRequest {
            branch_id: h.branch,
            staff_id: None,
            start_time: at(10, 0),
            end_time: at(11, 0),
            capacity: Some(0),
        })
        .await;
    assert!(matches!(empty, Err(EngineError::Validation(_))));

    let defaulted = h
        .engine
        .create_time_slot(CreateSlotRequest {
            branch_id: h.branch,
            staff_id: None,
            start_time: at(10, 0),
            end_time: at(11, 0),
            capacity: None,
        })
        .await
        .unwrap();
    assert_eq!(defaulted.capacity, 1);
    assert!(defaulted.is_available);
}

#[tokio::test]
async fn available_slots_are_listed_in_order() {
    let h = harness();
    let staff = Some(h.staff);
    let late = h.slot(staff, at(15, 0), 30, 1).await;
    let early = h.slot(staff, at(9, 0), 30, 1).await;
    let closed = h.slot(staff, at(12, 0), 30, 1).await;
    h.engine.set_slot_availability(closed.id, false).await.unwrap();

    let search = SlotSearch {
        branch_id: h.branch,
        staff_id: staff,
        from: at(8, 0),
        to: at(18, 0),
    };
    let ids: Vec<SlotId> = h
        .engine
        .list_available_slots(search.clone())
        .await
        .unwrap()
        .iter()
        .map(|s| s.id)
        .collect();
    assert_eq!(ids, vec![early.id, late.id]);

    let inverted = SlotSearch {
        from: search.to,
        to: search.from,
        ..search
    };
    assert!(matches!(
        h.engine.list_available_slots(inverted).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn slots_in_use_cannot_be_deleted() {
    let h = harness();
    let slot = h.slot(None, at(10, 0), 30, 2).await;
    let booked = h.book(None, at(10, 0)).await.unwrap();

    assert!(matches!(
        h.engine.delete_time_slot(slot.id).await,
        Err(EngineError::InvalidState(_))
    ));

    h.engine.cancel_appointment(booked.id).await.unwrap();
    assert!(h.engine.delete_time_slot(slot.id).await.unwrap().changed);
    assert!(matches!(
        h.engine.delete_time_slot(slot.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        h.engine.set_slot_availability(slot.id, true).await,
        Err(EngineError::NotFound(_))
    ));
}
