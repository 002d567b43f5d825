//! [`AppointmentLedger`]: transactional check-then-book and status changes.

use crate::rows::{AppointmentRow, convert_all};
use crate::slots::{booked_in, covering_slots, release_capacity, set_availability};
use crate::{PostgresLedger, lock_schedules, schedule_key, store_error};
use branchline_core::appointment::{Appointment, AppointmentFilter, AppointmentStatus};
use branchline_core::error::StoreError;
use branchline_core::ids::AppointmentId;
use branchline_core::slot::TimeSlot;
use branchline_core::store::{
    AppointmentLedger, BookingCandidate, BookingMode, BookingOutcome, StoreFuture,
};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

async fn fetch_appointment(
    conn: &mut PgConnection,
    id: AppointmentId,
    for_update: bool,
) -> Result<Option<Appointment>, StoreError> {
    let sql = if for_update {
        "SELECT * FROM appointments WHERE id = $1 FOR UPDATE"
    } else {
        "SELECT * FROM appointments WHERE id = $1"
    };
    sqlx::query_as::<_, AppointmentRow>(sql)
        .bind(*id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(store_error("get appointment"))?
        .map(Appointment::try_from)
        .transpose()
}

/// Whether `slot` can hold the booking, given `booked` rows counting against it.
///
/// The row being moved (`previous`) neither counts against its own slot nor keeps it closed.
fn admits(slot: &TimeSlot, booked: i64, previous: Option<&Appointment>) -> bool {
    let own = previous.is_some_and(|p| {
        p.status.occupies_schedule()
            && slot.serves(p.branch_id, p.staff_id)
            && slot.covers(p.scheduled_time)
    });
    if own {
        (slot.is_available || slot.is_full(booked)) && !slot.is_full(booked - 1)
    } else {
        slot.accepts_booking(booked)
    }
}

impl PostgresLedger {
    #[allow(clippy::too_many_lines)]
    async fn book(&self, candidate: BookingCandidate) -> Result<BookingOutcome, StoreError> {
        let BookingCandidate {
            appointment,
            service_duration,
            mode,
        } = candidate;
        let mut tx = self.pool.begin().await.map_err(store_error("begin booking"))?;

        let mut keys = vec![schedule_key(appointment.branch_id, appointment.staff_id)];
        if mode == BookingMode::Reschedule {
            let Some(stored) = fetch_appointment(&mut tx, appointment.id, false).await? else {
                return Ok(BookingOutcome::Missing);
            };
            keys.push(schedule_key(stored.branch_id, stored.staff_id));
        }
        lock_schedules(&mut tx, keys).await?;

        let previous = match mode {
            BookingMode::Create => None,
            BookingMode::Reschedule => {
                match fetch_appointment(&mut tx, appointment.id, true).await? {
                    Some(previous) => Some(previous),
                    None => return Ok(BookingOutcome::Missing),
                }
            },
        };

        if let Some(staff_id) = appointment.staff_id {
            let existing = sqlx::query_scalar::<_, Uuid>(
                r"
                SELECT id FROM appointments
                WHERE branch_id = $1
                  AND staff_id = $2
                  AND id <> $3
                  AND status NOT IN ('CANCELLED', 'NO_SHOW')
                  AND scheduled_time > $4
                  AND scheduled_time < $5
                ORDER BY scheduled_time
                LIMIT 1
                ",
            )
            .bind(*appointment.branch_id.as_uuid())
            .bind(*staff_id.as_uuid())
            .bind(*appointment.id.as_uuid())
            .bind(appointment.scheduled_time - service_duration)
            .bind(appointment.scheduled_time + service_duration)
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_error("check conflicts"))?;
            if let Some(existing) = existing {
                return Ok(BookingOutcome::Conflict {
                    existing: existing.into(),
                });
            }
        }

        let mut chosen = None;
        for slot in covering_slots(&mut tx, &appointment).await? {
            let booked = booked_in(&mut tx, &slot).await?;
            if admits(&slot, booked, previous.as_ref()) {
                chosen = Some(slot);
                break;
            }
        }
        let Some(slot) = chosen else {
            return Ok(BookingOutcome::SlotUnavailable);
        };

        let at = appointment.updated_at;
        let row = match &previous {
            None => sqlx::query_as::<_, AppointmentRow>(
                r"
                INSERT INTO appointments
                    (id, customer_id, branch_id, service_id, staff_id, scheduled_time, status,
                     token_number, estimated_wait_minutes, notes, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                RETURNING *
                ",
            )
            .bind(*appointment.id.as_uuid())
            .bind(*appointment.customer_id.as_uuid())
            .bind(*appointment.branch_id.as_uuid())
            .bind(*appointment.service_id.as_uuid())
            .bind(appointment.staff_id.map(|s| *s.as_uuid()))
            .bind(appointment.scheduled_time)
            .bind(appointment.status.as_str())
            .bind(appointment.token_number)
            .bind(appointment.estimated_wait_minutes)
            .bind(&appointment.notes)
            .bind(appointment.created_at)
            .bind(appointment.updated_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(store_error("insert appointment"))?,
            Some(_) => sqlx::query_as::<_, AppointmentRow>(
                r"
                UPDATE appointments
                SET staff_id = $2, scheduled_time = $3, notes = $4, updated_at = $5
                WHERE id = $1
                RETURNING *
                ",
            )
            .bind(*appointment.id.as_uuid())
            .bind(appointment.staff_id.map(|s| *s.as_uuid()))
            .bind(appointment.scheduled_time)
            .bind(&appointment.notes)
            .bind(at)
            .fetch_one(&mut *tx)
            .await
            .map_err(store_error("move appointment"))?,
        };
        let stored = Appointment::try_from(row)?;

        if let Some(previous) = &previous {
            release_capacity(&mut tx, previous, at).await?;
        }
        if slot.is_full(booked_in(&mut tx, &slot).await?) {
            set_availability(&mut tx, slot.id, false, at).await?;
            tracing::debug!(slot_id = %slot.id, "Closed slot at capacity");
        }

        tx.commit().await.map_err(store_error("commit booking"))?;
        Ok(BookingOutcome::Booked(stored))
    }

    async fn load_appointment(&self, id: AppointmentId) -> Result<Option<Appointment>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(store_error("acquire connection"))?;
        fetch_appointment(&mut conn, id, false).await
    }

    async fn find_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<Appointment>, StoreError> {
        let rows = sqlx::query_as::<_, AppointmentRow>(
            r"
            SELECT * FROM appointments
            WHERE ($1::uuid IS NULL OR branch_id = $1)
              AND ($2::uuid IS NULL OR customer_id = $2)
              AND ($3::uuid IS NULL OR staff_id = $3)
              AND ($4::text IS NULL OR status = $4)
            ORDER BY scheduled_time, created_at, id
            ",
        )
        .bind(filter.branch_id.map(|id| *id.as_uuid()))
        .bind(filter.customer_id.map(|id| *id.as_uuid()))
        .bind(filter.staff_id.map(|id| *id.as_uuid()))
        .bind(filter.status.map(|status| status.as_str()))
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("list appointments"))?;
        convert_all(rows)
    }

    async fn overwrite_appointment(
        &self,
        appointment: Appointment,
    ) -> Result<Option<Appointment>, StoreError> {
        let row = sqlx::query_as::<_, AppointmentRow>(
            r"
            UPDATE appointments
            SET staff_id = $2, scheduled_time = $3, notes = $4, updated_at = $5
            WHERE id = $1
            RETURNING *
            ",
        )
        .bind(*appointment.id.as_uuid())
        .bind(appointment.staff_id.map(|s| *s.as_uuid()))
        .bind(appointment.scheduled_time)
        .bind(&appointment.notes)
        .bind(appointment.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("update appointment"))?;
        row.map(Appointment::try_from).transpose()
    }

    async fn swap_status(
        &self,
        id: AppointmentId,
        from: AppointmentStatus,
        to: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Appointment>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error("begin"))?;
        let Some(current) = fetch_appointment(&mut tx, id, false).await? else {
            return Ok(None);
        };
        lock_schedules(
            &mut tx,
            vec![schedule_key(current.branch_id, current.staff_id)],
        )
        .await?;

        let row = sqlx::query_as::<_, AppointmentRow>(
            r"
            UPDATE appointments
            SET status = $3, updated_at = $4
            WHERE id = $1 AND status = $2
            RETURNING *
            ",
        )
        .bind(*id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(store_error("transition appointment"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let updated = Appointment::try_from(row)?;

        if from.occupies_schedule() && !to.occupies_schedule() {
            release_capacity(&mut tx, &updated, at).await?;
        }
        tx.commit().await.map_err(store_error("commit"))?;
        Ok(Some(updated))
    }
}

impl AppointmentLedger for PostgresLedger {
    fn commit_booking(&self, candidate: BookingCandidate) -> StoreFuture<'_, BookingOutcome> {
        Box::pin(self.book(candidate))
    }

    fn get_appointment(&self, id: AppointmentId) -> StoreFuture<'_, Option<Appointment>> {
        Box::pin(self.load_appointment(id))
    }

    fn list_appointments(&self, filter: AppointmentFilter) -> StoreFuture<'_, Vec<Appointment>> {
        Box::pin(self.find_appointments(filter))
    }

    fn update_appointment(
        &self,
        appointment: Appointment,
    ) -> StoreFuture<'_, Option<Appointment>> {
        Box::pin(self.overwrite_appointment(appointment))
    }

    fn transition_appointment(
        &self,
        id: AppointmentId,
        from: AppointmentStatus,
        to: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Appointment>> {
        Box::pin(self.swap_status(id, from, to, at))
    }
}
