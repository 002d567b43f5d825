//! Tests for moving bookings between slots in the in-memory ledger

#![allow(clippy::unwrap_used)] // Tests can unwrap
#![allow(clippy::panic)] // Tests can panic

use branchline_core::appointment::{Appointment, AppointmentStatus};
use branchline_core::environment::Clock;
use branchline_core::ids::{AppointmentId, BranchId, CustomerId, ServiceId, StaffId};
use branchline_core::slot::{NewTimeSlot, TimeSlot};
use branchline_core::store::{
    AppointmentLedger, BookingCandidate, BookingMode, BookingOutcome, SlotStore,
};
use branchline_testing::{InMemoryLedger, test_clock};
use chrono::{DateTime, Duration, Utc};

struct Fixture {
    ledger: InMemoryLedger,
    branch: BranchId,
    staff: StaffId,
    morning: TimeSlot,
    noon: TimeSlot,
    start: DateTime<Utc>,
}

async fn fixture() -> Fixture {
    let ledger = InMemoryLedger::new();
    let start = test_clock().now() + Duration::hours(10);
    let branch = BranchId::new();
    let staff = StaffId::new();
    let slot = |offset_hours: i64| {
        NewTimeSlot {
            branch_id: branch,
            staff_id: Some(staff),
            start_time: start + Duration::hours(offset_hours),
            end_time: start + Duration::hours(offset_hours) + Duration::minutes(30),
            capacity: 1,
        }
        .into_slot(start)
    };
    let morning = ledger.create_slot(slot(0)).await.unwrap();
    let noon = ledger.create_slot(slot(2)).await.unwrap();
    Fixture {
        ledger,
        branch,
        staff,
        morning,
        noon,
        start,
    }
}

fn appointment(f: &Fixture, time: DateTime<Utc>) -> Appointment {
    Appointment {
        id: AppointmentId::new(),
        customer_id: CustomerId::new(),
        branch_id: f.branch,
        service_id: ServiceId::new(),
        staff_id: Some(f.staff),
        scheduled_time: time,
        status: AppointmentStatus::Scheduled,
        token_number: None,
        estimated_wait_minutes: None,
        notes: String::new(),
        created_at: f.start,
        updated_at: f.start,
    }
}

async fn book(f: &Fixture, appointment: Appointment, mode: BookingMode) -> BookingOutcome {
    f.ledger
        .commit_booking(BookingCandidate {
            appointment,
            service_duration: Duration::minutes(30),
            mode,
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn moving_a_booking_reopens_the_old_slot_and_closes_the_new_one() {
    let f = fixture().await;
    let original = match book(&f, appointment(&f, f.start), BookingMode::Create).await {
        BookingOutcome::Booked(appointment) => appointment,
        other => panic!("expected booking, got {other:?}"),
    };

    let mut moved = original.clone();
    moved.scheduled_time = f.noon.start_time;
    let outcome = book(&f, moved, BookingMode::Reschedule).await;
    assert!(matches!(outcome, BookingOutcome::Booked(_)));

    let morning = f.ledger.get_slot(f.morning.id).await.unwrap().unwrap();
    let noon = f.ledger.get_slot(f.noon.id).await.unwrap().unwrap();
    assert!(morning.is_available);
    assert!(!noon.is_available);
}

#[tokio::test]
async fn moving_within_the_same_full_slot_is_allowed() {
    let f = fixture().await;
    let original = match book(&f, appointment(&f, f.start), BookingMode::Create).await {
        BookingOutcome::Booked(appointment) => appointment,
        other => panic!("expected booking, got {other:?}"),
    };

    let mut moved = original;
    moved.scheduled_time = f.start + Duration::minutes(5);
    let outcome = book(&f, moved, BookingMode::Reschedule).await;
    assert!(matches!(outcome, BookingOutcome::Booked(_)));
    assert!(!f.ledger.get_slot(f.morning.id).await.unwrap().unwrap().is_available);
}

#[tokio::test]
async fn rescheduling_a_missing_appointment_reports_missing() {
    let f = fixture().await;
    let outcome = book(&f, appointment(&f, f.start), BookingMode::Reschedule).await;
    assert_eq!(outcome, BookingOutcome::Missing);
}

#[tokio::test]
async fn moving_onto_another_booking_conflicts() {
    let f = fixture().await;
    let first = match book(&f, appointment(&f, f.start), BookingMode::Create).await {
        BookingOutcome::Booked(appointment) => appointment,
        other => panic!("expected booking, got {other:?}"),
    };
    let second = match book(&f, appointment(&f, f.noon.start_time), BookingMode::Create).await {
        BookingOutcome::Booked(appointment) => appointment,
        other => panic!("expected booking, got {other:?}"),
    };

    let mut moved = second;
    moved.scheduled_time = f.start + Duration::minutes(10);
    assert_eq!(
        book(&f, moved, BookingMode::Reschedule).await,
        BookingOutcome::Conflict { existing: first.id }
    );
}
