//! In-memory walkthrough of booking and the ticket queue.
//!
//! Runs the engines against `branchline-testing` collaborators, so it needs no database:
//!
//! ```bash
//! cargo run --bin demo
//! ```

use anyhow::Context;
use branchline_core::environment::SystemClock;
use branchline_core::ids::{BranchId, CustomerId, ServiceId, StaffId};
use branchline_core::{EngineConfig, Tz};
use branchline_engine::{AppointmentRequest, CreateSlotRequest, EngineError, IssueTokenRequest};
use branchline_server::Branchline;
use branchline_server::telemetry::init_tracing;
use branchline_testing::{InMemoryLedger, InMemoryQueueCache};
use chrono::{Duration, DurationRound, Utc};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let app = Branchline::assemble(
        InMemoryLedger::new(),
        Arc::new(InMemoryQueueCache::new()),
        Arc::new(SystemClock),
        EngineConfig::new(Tz::UTC),
    );
    let branch = BranchId::new();
    let staff = StaffId::new();
    let start = Utc::now()
        .duration_trunc(Duration::hours(1))
        .context("truncate to the hour")?
        + Duration::hours(1);

    app.booking
        .create_time_slot(CreateSlotRequest {
            branch_id: branch,
            staff_id: Some(staff),
            start_time: start,
            end_time: start + Duration::hours(2),
            capacity: Some(4),
        })
        .await?;

    let request = |minutes: i64| AppointmentRequest {
        customer_id: CustomerId::new(),
        branch_id: branch,
        service_id: ServiceId::new(),
        staff_id: Some(staff),
        scheduled_time: Some(start + Duration::minutes(minutes)),
        notes: String::new(),
    };

    let first = app.booking.create_appointment(request(0)).await?;
    tracing::info!(id = %first.id, status = %first.status, "Booked first customer");

    match app.booking.create_appointment(request(15)).await {
        Err(EngineError::ConflictingAppointment { existing }) => {
            tracing::info!(%existing, "Overlapping request rejected as expected");
        },
        other => tracing::warn!(?other, "Overlapping request was not rejected"),
    }

    let later = app.booking.create_appointment(request(60)).await?;
    tracing::info!(id = %later.id, "Booked an hour later");

    for _ in 0..3 {
        let token = app
            .queue
            .issue_token(IssueTokenRequest {
                branch_id: branch,
                customer_id: CustomerId::new(),
                appointment_id: None,
                notes: String::new(),
            })
            .await?;
        tracing::info!(number = token.token_number, "Issued token");
    }

    let called = app.queue.call_next_token(branch).await?;
    app.queue.begin_serving(called.id).await?;
    let done = app.queue.complete_token(called.id).await?;
    tracing::info!(number = done.token_number, "Served and completed");

    let status = app.queue.get_queue_status(branch).await?;
    tracing::info!(
        waiting = status.waiting_count,
        estimated_wait_minutes = status.estimated_wait_minutes,
        "Queue status"
    );
    Ok(())
}
