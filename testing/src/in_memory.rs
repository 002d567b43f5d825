//! In-memory ledger and queue cache.
//!
//! [`InMemoryLedger`] implements all three ledger traits over a single mutex, so every call is
//! trivially atomic. Both collaborators have an outage switch for exercising
//! `StorageUnavailable` paths and cache fallbacks.

use branchline_core::appointment::{Appointment, AppointmentFilter, AppointmentStatus};
use branchline_core::error::StoreError;
use branchline_core::ids::{AppointmentId, BranchId, SlotId, TokenId};
use branchline_core::queue::estimated_wait;
use branchline_core::slot::{SlotQuery, TimeSlot};
use branchline_core::store::{
    AppointmentLedger, BookingCandidate, BookingMode, BookingOutcome, NewToken, QueueCache,
    SlotDeletion, SlotStore, StoreFuture, TokenLedger,
};
use branchline_core::token::{QueueEntry, QueueKey, Token, TokenStatus};
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

fn ready<T: Send + 'static>(result: Result<T, StoreError>) -> StoreFuture<'static, T> {
    Box::pin(std::future::ready(result))
}

#[derive(Debug, Default)]
struct LedgerState {
    slots: HashMap<SlotId, TimeSlot>,
    appointments: HashMap<AppointmentId, Appointment>,
    tokens: HashMap<TokenId, Token>,
    counters: HashMap<QueueKey, i32>,
}

impl LedgerState {
    /// Appointments occupying capacity that start inside `slot`.
    fn booked_in(&self, slot: &TimeSlot) -> i64 {
        let count = self
            .appointments
            .values()
            .filter(|a| {
                a.status.occupies_schedule()
                    && slot.serves(a.branch_id, a.staff_id)
                    && slot.covers(a.scheduled_time)
            })
            .count();
        i64::try_from(count).unwrap_or(i64::MAX)
    }

    fn covering_slot(&self, appointment: &Appointment) -> Option<SlotId> {
        self.slots
            .values()
            .filter(|s| {
                s.serves(appointment.branch_id, appointment.staff_id)
                    && s.covers(appointment.scheduled_time)
            })
            .min_by_key(|s| (s.start_time, s.id))
            .map(|s| s.id)
    }

    /// Reopen the slot `released` occupied if it was closed while full and now has room.
    ///
    /// Must run after `released` stopped counting against the slot.
    fn release_capacity(&mut self, released: &Appointment, at: DateTime<Utc>) {
        let Some(slot_id) = self.covering_slot(released) else {
            return;
        };
        let Some(slot) = self.slots.get(&slot_id) else {
            return;
        };
        let booked = self.booked_in(slot);
        if !slot.is_available && slot.is_full(booked + 1) && !slot.is_full(booked) {
            if let Some(slot) = self.slots.get_mut(&slot_id) {
                slot.is_available = true;
                slot.updated_at = at;
            }
        }
    }

    fn commit_booking(&mut self, candidate: BookingCandidate) -> BookingOutcome {
        let BookingCandidate {
            appointment,
            service_duration,
            mode,
        } = candidate;

        let previous = match mode {
            BookingMode::Create => None,
            BookingMode::Reschedule => match self.appointments.get(&appointment.id) {
                Some(existing) => Some(existing.clone()),
                None => return BookingOutcome::Missing,
            },
        };

        let window = appointment.window(service_duration);
        if let Some(staff_id) = appointment.staff_id {
            let conflict = self
                .appointments
                .values()
                .filter(|other| {
                    other.id != appointment.id
                        && other.branch_id == appointment.branch_id
                        && other.staff_id == Some(staff_id)
                        && other.conflicts_with(&window, service_duration)
                })
                .min_by_key(|other| other.scheduled_time);
            if let Some(existing) = conflict {
                return BookingOutcome::Conflict {
                    existing: existing.id,
                };
            }
        }

        // The row being moved neither counts against a slot nor keeps it closed.
        let admits = |state: &Self, slot: &TimeSlot| {
            let booked = state.booked_in(slot);
            let own = previous.as_ref().is_some_and(|p| {
                p.status.occupies_schedule()
                    && slot.serves(p.branch_id, p.staff_id)
                    && slot.covers(p.scheduled_time)
            });
            if own {
                (slot.is_available || slot.is_full(booked)) && !slot.is_full(booked - 1)
            } else {
                slot.accepts_booking(booked)
            }
        };

        let chosen = self
            .slots
            .values()
            .filter(|s| {
                s.serves(appointment.branch_id, appointment.staff_id)
                    && s.covers(appointment.scheduled_time)
                    && admits(self, s)
            })
            .min_by_key(|s| (s.start_time, s.id))
            .map(|s| s.id);
        let Some(slot_id) = chosen else {
            return BookingOutcome::SlotUnavailable;
        };

        let at = appointment.updated_at;
        let stored = match &previous {
            Some(previous) => Appointment {
                staff_id: appointment.staff_id,
                scheduled_time: appointment.scheduled_time,
                notes: appointment.notes,
                updated_at: at,
                ..previous.clone()
            },
            None => appointment,
        };
        self.appointments.insert(stored.id, stored.clone());

        if let Some(previous) = previous {
            self.release_capacity(&previous, at);
        }

        if let Some(slot) = self.slots.get(&slot_id) {
            if slot.is_full(self.booked_in(slot)) {
                if let Some(slot) = self.slots.get_mut(&slot_id) {
                    slot.is_available = false;
                    slot.updated_at = at;
                }
            }
        }

        BookingOutcome::Booked(stored)
    }

    fn issue_token(&mut self, new: NewToken) -> Token {
        let key = QueueKey::new(new.branch_id, new.service_date);
        let number = self.counters.entry(key).or_insert(0);
        *number += 1;
        let token_number = *number;

        let waiting_ahead = self.count_with_status(key, TokenStatus::Waiting);
        let token = Token {
            id: new.id,
            branch_id: new.branch_id,
            customer_id: new.customer_id,
            appointment_id: new.appointment_id,
            token_number,
            service_date: new.service_date,
            status: TokenStatus::Waiting,
            notes: new.notes,
            called_at: None,
            completed_at: None,
            created_at: new.issued_at,
            updated_at: new.issued_at,
        };
        self.tokens.insert(token.id, token.clone());

        if let Some(appointment) = new
            .appointment_id
            .and_then(|id| self.appointments.get_mut(&id))
        {
            let wait = estimated_wait(waiting_ahead, new.minutes_per_ticket);
            appointment.token_number = Some(token_number);
            appointment.estimated_wait_minutes = Some(i32::try_from(wait).unwrap_or(i32::MAX));
            appointment.updated_at = new.issued_at;
        }

        token
    }

    fn day_tokens(&self, key: QueueKey) -> impl Iterator<Item = &Token> {
        self.tokens
            .values()
            .filter(move |t| t.queue_key() == key)
    }

    /// The oldest CALLED/SERVING token of the branch, whatever its service day.
    fn active_token(&self, branch_id: BranchId) -> Option<&Token> {
        self.tokens
            .values()
            .filter(|t| t.branch_id == branch_id && t.status.is_active())
            .min_by_key(|t| (t.service_date, t.token_number))
    }

    fn count_with_status(&self, key: QueueKey, status: TokenStatus) -> i64 {
        let count = self.day_tokens(key).filter(|t| t.status == status).count();
        i64::try_from(count).unwrap_or(i64::MAX)
    }

    fn transition_token(
        &mut self,
        id: TokenId,
        from: TokenStatus,
        to: TokenStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError> {
        let Some(current) = self.tokens.get(&id) else {
            return Ok(None);
        };
        if current.status != from {
            return Ok(None);
        }
        if to.is_active() {
            let branch_id = current.branch_id;
            let occupied = self
                .tokens
                .values()
                .any(|t| t.id != id && t.branch_id == branch_id && t.status.is_active());
            if occupied {
                return Err(StoreError::Constraint(format!(
                    "another token of branch {branch_id} holds the service window"
                )));
            }
        }
        let Some(token) = self.tokens.get_mut(&id) else {
            return Ok(None);
        };
        token
            .advance(to, at)
            .map_err(|e| StoreError::Constraint(e.to_string()))?;
        Ok(Some(token.clone()))
    }
}

/// In-memory implementation of [`SlotStore`], [`AppointmentLedger`] and [`TokenLedger`].
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`] (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored appointments (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn appointment_count(&self) -> Result<usize, StoreError> {
        Ok(self.lock()?.appointments.len())
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerState>, StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory ledger offline".to_string()));
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("Mutex lock failed".to_string()))
    }

    fn with_state<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut LedgerState) -> Result<T, StoreError>,
    {
        let mut guard = self.lock()?;
        f(&mut guard)
    }
}

impl SlotStore for InMemoryLedger {
    fn create_slot(&self, slot: TimeSlot) -> StoreFuture<'_, TimeSlot> {
        ready(self.with_state(|state| {
            if slot.start_time >= slot.end_time || slot.capacity < 1 {
                return Err(StoreError::Constraint(format!(
                    "slot {} violates time_slots checks",
                    slot.id
                )));
            }
            state.slots.insert(slot.id, slot.clone());
            Ok(slot)
        }))
    }

    fn get_slot(&self, id: SlotId) -> StoreFuture<'_, Option<TimeSlot>> {
        ready(self.with_state(|state| Ok(state.slots.get(&id).cloned())))
    }

    fn list_available_slots(&self, query: SlotQuery) -> StoreFuture<'_, Vec<TimeSlot>> {
        ready(self.with_state(|state| {
            let mut slots: Vec<TimeSlot> = state
                .slots
                .values()
                .filter(|s| query.matches(s))
                .cloned()
                .collect();
            slots.sort_by_key(|s| (s.start_time, s.id));
            Ok(slots)
        }))
    }

    fn set_slot_availability(
        &self,
        id: SlotId,
        is_available: bool,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<TimeSlot>> {
        ready(self.with_state(|state| {
            Ok(state.slots.get_mut(&id).map(|slot| {
                slot.is_available = is_available;
                slot.updated_at = at;
                slot.clone()
            }))
        }))
    }

    fn delete_slot(&self, id: SlotId) -> StoreFuture<'_, SlotDeletion> {
        ready(self.with_state(|state| {
            let Some(slot) = state.slots.get(&id) else {
                return Ok(SlotDeletion::NotFound);
            };
            if state.booked_in(slot) > 0 {
                return Ok(SlotDeletion::InUse);
            }
            state.slots.remove(&id);
            Ok(SlotDeletion::Deleted)
        }))
    }
}

impl AppointmentLedger for InMemoryLedger {
    fn commit_booking(&self, candidate: BookingCandidate) -> StoreFuture<'_, BookingOutcome> {
        ready(self.with_state(|state| Ok(state.commit_booking(candidate))))
    }

    fn get_appointment(&self, id: AppointmentId) -> StoreFuture<'_, Option<Appointment>> {
        ready(self.with_state(|state| Ok(state.appointments.get(&id).cloned())))
    }

    fn list_appointments(&self, filter: AppointmentFilter) -> StoreFuture<'_, Vec<Appointment>> {
        ready(self.with_state(|state| {
            let mut appointments: Vec<Appointment> = state
                .appointments
                .values()
                .filter(|a| filter.matches(a))
                .cloned()
                .collect();
            appointments.sort_by_key(|a| (a.scheduled_time, a.created_at, a.id));
            Ok(appointments)
        }))
    }

    fn update_appointment(
        &self,
        appointment: Appointment,
    ) -> StoreFuture<'_, Option<Appointment>> {
        ready(self.with_state(|state| {
            Ok(state
                .appointments
                .get_mut(&appointment.id)
                .map(|stored| {
                    stored.staff_id = appointment.staff_id;
                    stored.scheduled_time = appointment.scheduled_time;
                    stored.notes = appointment.notes;
                    stored.updated_at = appointment.updated_at;
                    stored.clone()
                }))
        }))
    }

    fn transition_appointment(
        &self,
        id: AppointmentId,
        from: AppointmentStatus,
        to: AppointmentStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Appointment>> {
        ready(self.with_state(|state| {
            let Some(appointment) = state.appointments.get_mut(&id) else {
                return Ok(None);
            };
            if appointment.status != from {
                return Ok(None);
            }
            appointment.status = to;
            appointment.updated_at = at;
            let updated = appointment.clone();

            if from.occupies_schedule() && !to.occupies_schedule() {
                state.release_capacity(&updated, at);
            }
            Ok(Some(updated))
        }))
    }
}

impl TokenLedger for InMemoryLedger {
    fn issue_token(&self, token: NewToken) -> StoreFuture<'_, Token> {
        ready(self.with_state(|state| Ok(state.issue_token(token))))
    }

    fn get_token(&self, id: TokenId) -> StoreFuture<'_, Option<Token>> {
        ready(self.with_state(|state| Ok(state.tokens.get(&id).cloned())))
    }

    fn list_tokens(&self, branch_id: BranchId, date: NaiveDate) -> StoreFuture<'_, Vec<Token>> {
        ready(self.with_state(|state| {
            let mut tokens: Vec<Token> = state
                .day_tokens(QueueKey::new(branch_id, date))
                .cloned()
                .collect();
            tokens.sort_by_key(|t| t.token_number);
            Ok(tokens)
        }))
    }

    fn first_with_status(
        &self,
        branch_id: BranchId,
        date: NaiveDate,
        status: TokenStatus,
    ) -> StoreFuture<'_, Option<Token>> {
        ready(self.with_state(|state| {
            Ok(state
                .day_tokens(QueueKey::new(branch_id, date))
                .filter(|t| t.status == status)
                .min_by_key(|t| t.token_number)
                .cloned())
        }))
    }

    fn active_token(&self, branch_id: BranchId) -> StoreFuture<'_, Option<Token>> {
        ready(self.with_state(|state| Ok(state.active_token(branch_id).cloned())))
    }

    fn count_with_status(
        &self,
        branch_id: BranchId,
        date: NaiveDate,
        status: TokenStatus,
    ) -> StoreFuture<'_, i64> {
        ready(self.with_state(|state| {
            Ok(state.count_with_status(QueueKey::new(branch_id, date), status))
        }))
    }

    fn transition_token(
        &self,
        id: TokenId,
        from: TokenStatus,
        to: TokenStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Token>> {
        ready(self.with_state(|state| state.transition_token(id, from, to, at)))
    }
}

/// In-memory [`QueueCache`] with an outage switch.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueueCache {
    lists: Arc<Mutex<HashMap<QueueKey, VecDeque<QueueEntry>>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryQueueCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`] (or recover).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Snapshot of one list, ignoring the outage switch (for testing).
    ///
    /// # Errors
    ///
    /// Returns error if lock is poisoned.
    pub fn entries(&self, key: QueueKey) -> Result<Vec<QueueEntry>, StoreError> {
        let lists = self
            .lists
            .lock()
            .map_err(|_| StoreError::Unavailable("Mutex lock failed".to_string()))?;
        Ok(lists
            .get(&key)
            .map(|list| list.iter().copied().collect())
            .unwrap_or_default())
    }

    fn with_lists<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut HashMap<QueueKey, VecDeque<QueueEntry>>) -> T,
    {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("in-memory cache offline".to_string()));
        }
        let mut lists = self
            .lists
            .lock()
            .map_err(|_| StoreError::Unavailable("Mutex lock failed".to_string()))?;
        Ok(f(&mut lists))
    }
}

impl QueueCache for InMemoryQueueCache {
    fn push_back(&self, key: QueueKey, entry: QueueEntry) -> StoreFuture<'_, ()> {
        ready(self.with_lists(|lists| lists.entry(key).or_default().push_back(entry)))
    }

    fn pop_front(&self, key: QueueKey) -> StoreFuture<'_, Option<QueueEntry>> {
        ready(self.with_lists(|lists| lists.get_mut(&key).and_then(VecDeque::pop_front)))
    }

    fn range(&self, key: QueueKey, limit: usize) -> StoreFuture<'_, Vec<QueueEntry>> {
        ready(self.with_lists(|lists| {
            lists
                .get(&key)
                .map(|list| list.iter().take(limit).copied().collect())
                .unwrap_or_default()
        }))
    }

    fn replace(&self, key: QueueKey, entries: Vec<QueueEntry>) -> StoreFuture<'_, ()> {
        ready(self.with_lists(|lists| {
            lists.insert(key, entries.into());
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::test_clock;
    use branchline_core::environment::Clock;
    use branchline_core::ids::{CustomerId, ServiceId, StaffId};
    use branchline_core::slot::NewTimeSlot;
    use chrono::Duration;

    fn appointment(
        branch_id: BranchId,
        staff_id: Option<StaffId>,
        time: DateTime<Utc>,
    ) -> Appointment {
        Appointment {
            id: AppointmentId::new(),
            customer_id: CustomerId::new(),
            branch_id,
            service_id: ServiceId::new(),
            staff_id,
            scheduled_time: time,
            status: AppointmentStatus::Scheduled,
            token_number: None,
            estimated_wait_minutes: None,
            notes: String::new(),
            created_at: time,
            updated_at: time,
        }
    }

    fn candidate(appointment: Appointment) -> BookingCandidate {
        BookingCandidate {
            appointment,
            service_duration: Duration::minutes(30),
            mode: BookingMode::Create,
        }
    }

    #[tokio::test]
    async fn full_slot_closes_and_reopens_on_cancel() {
        let ledger = InMemoryLedger::new();
        let now = test_clock().now();
        let branch = BranchId::new();
        let staff = Some(StaffId::new());
        let slot = ledger
            .create_slot(
                NewTimeSlot {
                    branch_id: branch,
                    staff_id: staff,
                    start_time: now,
                    end_time: now + Duration::minutes(30),
                    capacity: 1,
                }
                .into_slot(now),
            )
            .await
            .unwrap();

        let booked = match ledger
            .commit_booking(candidate(appointment(branch, staff, now)))
            .await
            .unwrap()
        {
            BookingOutcome::Booked(appointment) => appointment,
            other => panic!("expected booking, got {other:?}"),
        };
        assert!(!ledger.get_slot(slot.id).await.unwrap().unwrap().is_available);

        ledger
            .transition_appointment(
                booked.id,
                AppointmentStatus::Scheduled,
                AppointmentStatus::Cancelled,
                now,
            )
            .await
            .unwrap()
            .unwrap();
        assert!(ledger.get_slot(slot.id).await.unwrap().unwrap().is_available);
    }

    #[tokio::test]
    async fn manually_closed_slot_stays_closed_after_cancel() {
        let ledger = InMemoryLedger::new();
        let now = test_clock().now();
        let branch = BranchId::new();
        let slot = ledger
            .create_slot(
                NewTimeSlot {
                    branch_id: branch,
                    staff_id: None,
                    start_time: now,
                    end_time: now + Duration::hours(1),
                    capacity: 3,
                }
                .into_slot(now),
            )
            .await
            .unwrap();
        let booked = match ledger
            .commit_booking(candidate(appointment(branch, None, now)))
            .await
            .unwrap()
        {
            BookingOutcome::Booked(appointment) => appointment,
            other => panic!("expected booking, got {other:?}"),
        };
        ledger
            .set_slot_availability(slot.id, false, now)
            .await
            .unwrap();

        ledger
            .transition_appointment(
                booked.id,
                AppointmentStatus::Scheduled,
                AppointmentStatus::Cancelled,
                now,
            )
            .await
            .unwrap();
        assert!(!ledger.get_slot(slot.id).await.unwrap().unwrap().is_available);
    }

    #[tokio::test]
    async fn token_numbers_restart_each_day() {
        let ledger = InMemoryLedger::new();
        let now = test_clock().now();
        let branch = BranchId::new();
        let issue = |date: NaiveDate| NewToken {
            id: TokenId::new(),
            branch_id: branch,
            customer_id: CustomerId::new(),
            appointment_id: None,
            service_date: date,
            notes: String::new(),
            minutes_per_ticket: 15,
            issued_at: now,
        };
        let today = now.date_naive();
        let tomorrow = today.succ_opt().unwrap();

        assert_eq!(ledger.issue_token(issue(today)).await.unwrap().token_number, 1);
        assert_eq!(ledger.issue_token(issue(today)).await.unwrap().token_number, 2);
        assert_eq!(ledger.issue_token(issue(tomorrow)).await.unwrap().token_number, 1);
    }

    #[tokio::test]
    async fn service_window_spans_days() {
        let ledger = InMemoryLedger::new();
        let now = test_clock().now();
        let branch = BranchId::new();
        let issue = |date: NaiveDate| NewToken {
            id: TokenId::new(),
            branch_id: branch,
            customer_id: CustomerId::new(),
            appointment_id: None,
            service_date: date,
            notes: String::new(),
            minutes_per_ticket: 15,
            issued_at: now,
        };
        let today = now.date_naive();
        let tomorrow = today.succ_opt().unwrap();

        let late = ledger.issue_token(issue(today)).await.unwrap();
        ledger
            .transition_token(late.id, TokenStatus::Waiting, TokenStatus::Called, now)
            .await
            .unwrap();
        let next_day = ledger.issue_token(issue(tomorrow)).await.unwrap();

        let active = ledger.active_token(branch).await.unwrap().unwrap();
        assert_eq!(active.id, late.id);
        let result = ledger
            .transition_token(next_day.id, TokenStatus::Waiting, TokenStatus::Called, now)
            .await;
        assert!(matches!(result, Err(StoreError::Constraint(_))));
    }

    #[tokio::test]
    async fn outage_switch_fails_every_call() {
        let ledger = InMemoryLedger::new();
        ledger.set_unavailable(true);
        assert!(matches!(
            ledger.get_token(TokenId::new()).await,
            Err(StoreError::Unavailable(_))
        ));
        ledger.set_unavailable(false);
        assert!(ledger.get_token(TokenId::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cache_is_fifo() {
        let cache = InMemoryQueueCache::new();
        let key = QueueKey::new(BranchId::new(), test_clock().now().date_naive());
        for number in 1..=3 {
            cache
                .push_back(
                    key,
                    QueueEntry {
                        token_id: TokenId::new(),
                        token_number: number,
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(cache.pop_front(key).await.unwrap().unwrap().token_number, 1);
        let rest: Vec<i32> = cache
            .range(key, 10)
            .await
            .unwrap()
            .iter()
            .map(|e| e.token_number)
            .collect();
        assert_eq!(rest, vec![2, 3]);
    }
}
