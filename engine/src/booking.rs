//! Booking engine.
//!
//! Admits an appointment only if an open slot with spare capacity covers it and, for staffed
//! bookings, no other active appointment of the same staff member overlaps its window. Checks
//! and commit are one ledger call, serialized per `(branch, staff)` inside the process.

use crate::error::{EngineError, Result};
use crate::locks::KeyedLocks;
use crate::views::{
    Ack, AppointmentRequest, AppointmentView, CreateSlotRequest, SlotSearch, SlotView,
    UpdateAppointmentRequest,
};
use branchline_core::appointment::{Appointment, AppointmentFilter, AppointmentStatus};
use branchline_core::config::EngineConfig;
use branchline_core::environment::Clock;
use branchline_core::error::{StoreError, TransitionError};
use branchline_core::ids::{AppointmentId, BranchId, SlotId, StaffId};
use branchline_core::slot::{NewTimeSlot, SlotQuery};
use branchline_core::store::{
    AppointmentLedger, BookingCandidate, BookingMode, BookingOutcome, SlotDeletion, SlotStore,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Schedules are serialized per branch and staff member.
type ScheduleKey = (BranchId, Option<StaffId>);

/// Compare-and-set retries before a status change gives up.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

fn require(field: &str, missing: bool) -> Result<()> {
    if missing {
        return Err(EngineError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn not_found(id: AppointmentId) -> EngineError {
    EngineError::NotFound(format!("appointment {id}"))
}

const fn schedule_key(appointment: &Appointment) -> ScheduleKey {
    (appointment.branch_id, appointment.staff_id)
}

/// Booking engine.
pub struct BookingEngine {
    slots: Arc<dyn SlotStore>,
    ledger: Arc<dyn AppointmentLedger>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    locks: KeyedLocks<ScheduleKey>,
}

impl BookingEngine {
    /// Create a booking engine over the given collaborators.
    #[must_use]
    pub fn new(
        slots: Arc<dyn SlotStore>,
        ledger: Arc<dyn AppointmentLedger>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            slots,
            ledger,
            clock,
            config,
            locks: KeyedLocks::new(),
        }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // Appointments
    // ========================================================================

    /// Book an appointment.
    ///
    /// # Errors
    ///
    /// - `Validation`: a nil identifier or missing `scheduled_time`
    /// - `ConflictingAppointment`: the staff member has an overlapping appointment (reported
    ///   even when no slot is free either)
    /// - `SlotUnavailable`: no open slot with spare capacity covers the time
    /// - `StorageUnavailable`: the ledger failed; nothing was written
    #[tracing::instrument(
        skip(self, request),
        fields(branch_id = %request.branch_id, staff_id = ?request.staff_id)
    )]
    pub async fn create_appointment(&self, request: AppointmentRequest) -> Result<AppointmentView> {
        let result = self.book(request).await;
        match &result {
            Ok(appointment) => {
                metrics::counter!("booking.appointments.created").increment(1);
                tracing::info!(
                    appointment_id = %appointment.id,
                    scheduled_time = %appointment.scheduled_time,
                    "Appointment booked"
                );
            },
            Err(err) => {
                metrics::counter!("booking.appointments.rejected", "reason" => err.kind())
                    .increment(1);
                tracing::warn!(error = %err, "Appointment rejected");
            },
        }
        result.map(AppointmentView::from)
    }

    async fn book(&self, request: AppointmentRequest) -> Result<Appointment> {
        require("customer_id", request.customer_id.is_nil())?;
        require("branch_id", request.branch_id.is_nil())?;
        require("service_id", request.service_id.is_nil())?;
        require("staff_id", request.staff_id.is_some_and(|s| s.is_nil()))?;
        let scheduled_time = request
            .scheduled_time
            .ok_or_else(|| EngineError::Validation("scheduled_time is required".to_string()))?;

        let _guard = self.locks.lock((request.branch_id, request.staff_id)).await;
        let now = self.clock.now();
        let appointment = Appointment {
            id: AppointmentId::new(),
            customer_id: request.customer_id,
            branch_id: request.branch_id,
            service_id: request.service_id,
            staff_id: request.staff_id,
            scheduled_time,
            status: AppointmentStatus::Scheduled,
            token_number: None,
            estimated_wait_minutes: None,
            notes: request.notes,
            created_at: now,
            updated_at: now,
        };
        let id = appointment.id;

        let outcome = self
            .ledger
            .commit_booking(BookingCandidate {
                appointment,
                service_duration: self.config.service_duration,
                mode: BookingMode::Create,
            })
            .await?;
        Self::admitted(outcome, id, scheduled_time)
    }

    fn admitted(
        outcome: BookingOutcome,
        id: AppointmentId,
        scheduled_time: DateTime<Utc>,
    ) -> Result<Appointment> {
        match outcome {
            BookingOutcome::Booked(appointment) => Ok(appointment),
            BookingOutcome::Conflict { existing } => {
                Err(EngineError::ConflictingAppointment { existing })
            },
            BookingOutcome::SlotUnavailable => Err(EngineError::SlotUnavailable { scheduled_time }),
            BookingOutcome::Missing => Err(not_found(id)),
        }
    }

    async fn fetch(&self, id: AppointmentId) -> Result<Appointment> {
        self.ledger
            .get_appointment(id)
            .await?
            .ok_or_else(|| not_found(id))
    }

    /// Load one appointment.
    ///
    /// # Errors
    ///
    /// `NotFound` or `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn get_appointment(&self, id: AppointmentId) -> Result<AppointmentView> {
        let appointment = self.fetch(id).await?;
        tracing::debug!(status = %appointment.status, "Appointment loaded");
        Ok(appointment.into())
    }

    /// Appointments matching every populated filter field, ordered by `scheduled_time`.
    ///
    /// # Errors
    ///
    /// `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn list_appointments(
        &self,
        filter: AppointmentFilter,
    ) -> Result<Vec<AppointmentView>> {
        let appointments = self.ledger.list_appointments(filter).await?;
        tracing::debug!(count = appointments.len(), "Appointments listed");
        Ok(appointments.into_iter().map(AppointmentView::from).collect())
    }

    /// Replace staff member, time and notes of an appointment.
    ///
    /// Without `revalidate_updates` the new values are written as given. With it, an
    /// appointment that still occupies the schedule is re-checked like a new booking (ignoring
    /// itself) and moved between slots atomically.
    ///
    /// # Errors
    ///
    /// - `Validation`: missing `scheduled_time` or nil staff id
    /// - `NotFound`: no such appointment
    /// - `ConflictingAppointment` / `SlotUnavailable`: only when re-validating
    /// - `StorageUnavailable`
    #[tracing::instrument(skip(self, request), fields(staff_id = ?request.staff_id))]
    pub async fn update_appointment(
        &self,
        id: AppointmentId,
        request: UpdateAppointmentRequest,
    ) -> Result<AppointmentView> {
        require("staff_id", request.staff_id.is_some_and(|s| s.is_nil()))?;
        let scheduled_time = request
            .scheduled_time
            .ok_or_else(|| EngineError::Validation("scheduled_time is required".to_string()))?;

        let existing = self.fetch(id).await?;
        let revalidate = self.config.revalidate_updates && existing.status.occupies_schedule();

        let _guards = if revalidate {
            self.locks
                .lock_pair(schedule_key(&existing), (existing.branch_id, request.staff_id))
                .await
        } else {
            Vec::new()
        };

        let updated = Appointment {
            staff_id: request.staff_id,
            scheduled_time,
            notes: request.notes,
            updated_at: self.clock.now(),
            ..existing
        };

        let stored = if revalidate {
            let outcome = self
                .ledger
                .commit_booking(BookingCandidate {
                    appointment: updated,
                    service_duration: self.config.service_duration,
                    mode: BookingMode::Reschedule,
                })
                .await?;
            Self::admitted(outcome, id, scheduled_time).inspect_err(|err| {
                metrics::counter!("booking.appointments.rejected", "reason" => err.kind())
                    .increment(1);
                tracing::warn!(error = %err, "Appointment update rejected");
            })?
        } else {
            self.ledger
                .update_appointment(updated)
                .await?
                .ok_or_else(|| not_found(id))?
        };

        tracing::info!(revalidated = revalidate, "Appointment updated");
        Ok(stored.into())
    }

    /// Cancel an appointment, reopening its slot if the booking had filled it.
    ///
    /// Cancelling an already cancelled appointment acknowledges without changes.
    ///
    /// # Errors
    ///
    /// - `NotFound`
    /// - `InvalidState`: the appointment is COMPLETED or NO_SHOW
    /// - `StorageUnavailable`
    #[tracing::instrument(skip(self))]
    pub async fn cancel_appointment(&self, id: AppointmentId) -> Result<Ack> {
        let (_, changed) = self.transition(id, AppointmentStatus::Cancelled).await?;
        if changed {
            tracing::info!("Appointment cancelled");
            Ok(Ack::applied())
        } else {
            tracing::debug!("Appointment already cancelled");
            Ok(Ack::unchanged())
        }
    }

    /// SCHEDULED -> IN_PROGRESS.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` from any other status, `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn start_appointment(&self, id: AppointmentId) -> Result<AppointmentView> {
        let (appointment, _) = self.transition(id, AppointmentStatus::InProgress).await?;
        tracing::info!("Appointment started");
        Ok(appointment.into())
    }

    /// IN_PROGRESS -> COMPLETED.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` from any other status, `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn complete_appointment(&self, id: AppointmentId) -> Result<AppointmentView> {
        let (appointment, _) = self.transition(id, AppointmentStatus::Completed).await?;
        tracing::info!("Appointment completed");
        Ok(appointment.into())
    }

    /// SCHEDULED -> NO_SHOW, releasing the slot capacity.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` from any other status, `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn mark_no_show(&self, id: AppointmentId) -> Result<AppointmentView> {
        let (appointment, _) = self.transition(id, AppointmentStatus::NoShow).await?;
        tracing::info!("Appointment marked as no-show");
        Ok(appointment.into())
    }

    /// Move an appointment to `to`; the flag is `false` for a repeated cancellation.
    async fn transition(
        &self,
        id: AppointmentId,
        to: AppointmentStatus,
    ) -> Result<(Appointment, bool)> {
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            let current = self.fetch(id).await?;
            if current.status == to && to == AppointmentStatus::Cancelled {
                return Ok((current, false));
            }
            if !current.status.can_transition_to(to) {
                return Err(TransitionError::Appointment {
                    from: current.status,
                    to,
                }
                .into());
            }

            let _guard = self.locks.lock(schedule_key(&current)).await;
            let now = self.clock.now();
            if let Some(updated) = self
                .ledger
                .transition_appointment(id, current.status, to, now)
                .await?
            {
                metrics::counter!("booking.appointments.transitions", "to" => to.as_str())
                    .increment(1);
                return Ok((updated, true));
            }
            tracing::debug!(from = %current.status, "Status changed concurrently, retrying");
        }
        Err(EngineError::InvalidState(format!(
            "appointment {id} kept changing concurrently"
        )))
    }

    // ========================================================================
    // Slots
    // ========================================================================

    /// Open a new bookable slot.
    ///
    /// # Errors
    ///
    /// - `Validation`: nil ids, `start_time >= end_time` or capacity below 1
    /// - `StorageUnavailable`
    #[tracing::instrument(skip(self, request), fields(branch_id = %request.branch_id))]
    pub async fn create_time_slot(&self, request: CreateSlotRequest) -> Result<SlotView> {
        require("branch_id", request.branch_id.is_nil())?;
        require("staff_id", request.staff_id.is_some_and(|s| s.is_nil()))?;
        if request.start_time >= request.end_time {
            return Err(EngineError::Validation(
                "start_time must be before end_time".to_string(),
            ));
        }
        let capacity = request.capacity.unwrap_or(1);
        if capacity < 1 {
            return Err(EngineError::Validation(format!(
                "capacity must be at least 1, got {capacity}"
            )));
        }

        let slot = NewTimeSlot {
            branch_id: request.branch_id,
            staff_id: request.staff_id,
            start_time: request.start_time,
            end_time: request.end_time,
            capacity,
        }
        .into_slot(self.clock.now());

        let created = self.slots.create_slot(slot).await.map_err(|e| match e {
            StoreError::Constraint(msg) => EngineError::Validation(msg),
            other => EngineError::StorageUnavailable(other),
        })?;
        tracing::info!(slot_id = %created.id, capacity, "Time slot created");
        Ok(created.into())
    }

    /// Open slots whose start lies in `[from, to]`, ordered by start.
    ///
    /// # Errors
    ///
    /// `Validation` when `from > to`, `StorageUnavailable`.
    #[tracing::instrument(skip(self, search), fields(branch_id = %search.branch_id))]
    pub async fn list_available_slots(&self, search: SlotSearch) -> Result<Vec<SlotView>> {
        if search.from > search.to {
            return Err(EngineError::Validation(
                "from must not be after to".to_string(),
            ));
        }
        let slots = self
            .slots
            .list_available_slots(SlotQuery {
                branch_id: search.branch_id,
                staff_id: search.staff_id,
                from: search.from,
                to: search.to,
            })
            .await?;
        tracing::debug!(count = slots.len(), "Available slots listed");
        Ok(slots.into_iter().map(SlotView::from).collect())
    }

    /// Open or close a slot by hand.
    ///
    /// # Errors
    ///
    /// `NotFound`, `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn set_slot_availability(
        &self,
        slot_id: SlotId,
        is_available: bool,
    ) -> Result<SlotView> {
        let slot = self
            .slots
            .get_slot(slot_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("slot {slot_id}")))?;
        let _guard = self.locks.lock((slot.branch_id, slot.staff_id)).await;

        let updated = self
            .slots
            .set_slot_availability(slot_id, is_available, self.clock.now())
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("slot {slot_id}")))?;
        tracing::info!("Slot availability changed");
        Ok(updated.into())
    }

    /// Delete a slot that no active appointment starts in.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` while referenced, `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn delete_time_slot(&self, slot_id: SlotId) -> Result<Ack> {
        let slot = self
            .slots
            .get_slot(slot_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("slot {slot_id}")))?;
        let _guard = self.locks.lock((slot.branch_id, slot.staff_id)).await;

        match self.slots.delete_slot(slot_id).await? {
            SlotDeletion::Deleted => {
                tracing::info!("Time slot deleted");
                Ok(Ack::applied())
            },
            SlotDeletion::NotFound => Err(EngineError::NotFound(format!("slot {slot_id}"))),
            SlotDeletion::InUse => Err(EngineError::InvalidState(format!(
                "slot {slot_id} still has active appointments"
            ))),
        }
    }
}
