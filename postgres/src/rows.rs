//! Row shapes and their conversion into domain types.

use branchline_core::appointment::Appointment;
use branchline_core::error::StoreError;
use branchline_core::slot::TimeSlot;
use branchline_core::token::Token;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct SlotRow {
    id: Uuid,
    branch_id: Uuid,
    staff_id: Option<Uuid>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    capacity: i32,
    is_available: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<SlotRow> for TimeSlot {
    fn from(row: SlotRow) -> Self {
        Self {
            id: row.id.into(),
            branch_id: row.branch_id.into(),
            staff_id: row.staff_id.map(Into::into),
            start_time: row.start_time,
            end_time: row.end_time,
            capacity: row.capacity,
            is_available: row.is_available,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct AppointmentRow {
    id: Uuid,
    customer_id: Uuid,
    branch_id: Uuid,
    service_id: Uuid,
    staff_id: Option<Uuid>,
    scheduled_time: DateTime<Utc>,
    status: String,
    token_number: Option<i32>,
    estimated_wait_minutes: Option<i32>,
    notes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = StoreError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            customer_id: row.customer_id.into(),
            branch_id: row.branch_id.into(),
            service_id: row.service_id.into(),
            staff_id: row.staff_id.map(Into::into),
            scheduled_time: row.scheduled_time,
            status: row.status.parse()?,
            token_number: row.token_number,
            estimated_wait_minutes: row.estimated_wait_minutes,
            notes: row.notes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct TokenRow {
    id: Uuid,
    branch_id: Uuid,
    customer_id: Uuid,
    appointment_id: Option<Uuid>,
    token_number: i32,
    service_date: NaiveDate,
    status: String,
    notes: String,
    called_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TokenRow> for Token {
    type Error = StoreError;

    fn try_from(row: TokenRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id.into(),
            branch_id: row.branch_id.into(),
            customer_id: row.customer_id.into(),
            appointment_id: row.appointment_id.map(Into::into),
            token_number: row.token_number,
            service_date: row.service_date,
            status: row.status.parse()?,
            notes: row.notes,
            called_at: row.called_at,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Convert a batch of rows, failing on the first corrupt one.
pub(crate) fn convert_all<R, T>(rows: Vec<R>) -> Result<Vec<T>, StoreError>
where
    T: TryFrom<R, Error = StoreError>,
{
    rows.into_iter().map(T::try_from).collect()
}
