//! [`SlotStore`] and the slot queries shared with booking.

use crate::rows::SlotRow;
use crate::{PostgresLedger, store_error};
use branchline_core::appointment::Appointment;
use branchline_core::error::StoreError;
use branchline_core::ids::SlotId;
use branchline_core::slot::{SlotQuery, TimeSlot};
use branchline_core::store::{SlotDeletion, SlotStore, StoreFuture};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;

/// Appointments occupying capacity that start inside `slot`.
pub(crate) async fn booked_in(conn: &mut PgConnection, slot: &TimeSlot) -> Result<i64, StoreError> {
    sqlx::query_scalar::<_, i64>(
        r"
        SELECT COUNT(*) FROM appointments
        WHERE branch_id = $1
          AND staff_id IS NOT DISTINCT FROM $2
          AND status NOT IN ('CANCELLED', 'NO_SHOW')
          AND scheduled_time >= $3
          AND scheduled_time < $4
        ",
    )
    .bind(*slot.branch_id.as_uuid())
    .bind(slot.staff_id.map(|s| *s.as_uuid()))
    .bind(slot.start_time)
    .bind(slot.end_time)
    .fetch_one(&mut *conn)
    .await
    .map_err(store_error("count bookings"))
}

/// Slots serving the appointment's branch/staff member that cover its time, earliest first,
/// locked for the rest of the transaction.
pub(crate) async fn covering_slots(
    conn: &mut PgConnection,
    appointment: &Appointment,
) -> Result<Vec<TimeSlot>, StoreError> {
    let rows = sqlx::query_as::<_, SlotRow>(
        r"
        SELECT * FROM time_slots
        WHERE branch_id = $1
          AND staff_id IS NOT DISTINCT FROM $2
          AND start_time <= $3
          AND end_time > $3
        ORDER BY start_time, id
        FOR UPDATE
        ",
    )
    .bind(*appointment.branch_id.as_uuid())
    .bind(appointment.staff_id.map(|s| *s.as_uuid()))
    .bind(appointment.scheduled_time)
    .fetch_all(&mut *conn)
    .await
    .map_err(store_error("find covering slots"))?;
    Ok(rows.into_iter().map(TimeSlot::from).collect())
}

pub(crate) async fn set_availability(
    conn: &mut PgConnection,
    id: SlotId,
    is_available: bool,
    at: DateTime<Utc>,
) -> Result<Option<TimeSlot>, StoreError> {
    let row = sqlx::query_as::<_, SlotRow>(
        "UPDATE time_slots SET is_available = $2, updated_at = $3 WHERE id = $1 RETURNING *",
    )
    .bind(*id.as_uuid())
    .bind(is_available)
    .bind(at)
    .fetch_optional(&mut *conn)
    .await
    .map_err(store_error("set slot availability"))?;
    Ok(row.map(TimeSlot::from))
}

/// Reopen the slot `released` occupied if it was closed while full and now has room.
///
/// Must run after `released` stopped counting against the slot.
pub(crate) async fn release_capacity(
    conn: &mut PgConnection,
    released: &Appointment,
    at: DateTime<Utc>,
) -> Result<(), StoreError> {
    let Some(slot) = covering_slots(conn, released).await?.into_iter().next() else {
        return Ok(());
    };
    let booked = booked_in(conn, &slot).await?;
    if !slot.is_available && slot.is_full(booked + 1) && !slot.is_full(booked) {
        set_availability(conn, slot.id, true, at).await?;
        tracing::debug!(slot_id = %slot.id, "Reopened slot after release");
    }
    Ok(())
}

impl PostgresLedger {
    async fn insert_slot(&self, slot: TimeSlot) -> Result<TimeSlot, StoreError> {
        let row = sqlx::query_as::<_, SlotRow>(
            r"
            INSERT INTO time_slots
                (id, branch_id, staff_id, start_time, end_time, capacity, is_available,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *
            ",
        )
        .bind(*slot.id.as_uuid())
        .bind(*slot.branch_id.as_uuid())
        .bind(slot.staff_id.map(|s| *s.as_uuid()))
        .bind(slot.start_time)
        .bind(slot.end_time)
        .bind(slot.capacity)
        .bind(slot.is_available)
        .bind(slot.created_at)
        .bind(slot.updated_at)
        .fetch_one(&self.pool)
        .await
        .map_err(store_error("create slot"))?;
        Ok(row.into())
    }

    async fn fetch_slot(&self, id: SlotId) -> Result<Option<TimeSlot>, StoreError> {
        let row = sqlx::query_as::<_, SlotRow>("SELECT * FROM time_slots WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("get slot"))?;
        Ok(row.map(TimeSlot::from))
    }

    async fn available_slots(&self, query: SlotQuery) -> Result<Vec<TimeSlot>, StoreError> {
        let rows = sqlx::query_as::<_, SlotRow>(
            r"
            SELECT * FROM time_slots
            WHERE is_available
              AND branch_id = $1
              AND ($2::uuid IS NULL OR staff_id = $2)
              AND start_time >= $3
              AND start_time <= $4
            ORDER BY start_time, id
            ",
        )
        .bind(*query.branch_id.as_uuid())
        .bind(query.staff_id.map(|s| *s.as_uuid()))
        .bind(query.from)
        .bind(query.to)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("list available slots"))?;
        Ok(rows.into_iter().map(TimeSlot::from).collect())
    }

    async fn toggle_slot(
        &self,
        id: SlotId,
        is_available: bool,
        at: DateTime<Utc>,
    ) -> Result<Option<TimeSlot>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(store_error("acquire connection"))?;
        set_availability(&mut conn, id, is_available, at).await
    }

    async fn remove_slot(&self, id: SlotId) -> Result<SlotDeletion, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error("begin"))?;
        let row = sqlx::query_as::<_, SlotRow>("SELECT * FROM time_slots WHERE id = $1 FOR UPDATE")
            .bind(*id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(store_error("get slot"))?;
        let Some(slot) = row.map(TimeSlot::from) else {
            return Ok(SlotDeletion::NotFound);
        };
        if booked_in(&mut tx, &slot).await? > 0 {
            return Ok(SlotDeletion::InUse);
        }
        sqlx::query("DELETE FROM time_slots WHERE id = $1")
            .bind(*id.as_uuid())
            .execute(&mut *tx)
            .await
            .map_err(store_error("delete slot"))?;
        tx.commit().await.map_err(store_error("commit"))?;
        Ok(SlotDeletion::Deleted)
    }
}

impl SlotStore for PostgresLedger {
    fn create_slot(&self, slot: TimeSlot) -> StoreFuture<'_, TimeSlot> {
        Box::pin(self.insert_slot(slot))
    }

    fn get_slot(&self, id: SlotId) -> StoreFuture<'_, Option<TimeSlot>> {
        Box::pin(self.fetch_slot(id))
    }

    fn list_available_slots(&self, query: SlotQuery) -> StoreFuture<'_, Vec<TimeSlot>> {
        Box::pin(self.available_slots(query))
    }

    fn set_slot_availability(
        &self,
        id: SlotId,
        is_available: bool,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<TimeSlot>> {
        Box::pin(self.toggle_slot(id, is_available, at))
    }

    fn delete_slot(&self, id: SlotId) -> StoreFuture<'_, SlotDeletion> {
        Box::pin(self.remove_slot(id))
    }
}
