//! Queue engine.
//!
//! Issues numbered tokens per branch and service day and walks them through
//! WAITING -> CALLED -> SERVING -> COMPLETED. The ledger is authoritative; the queue cache is a
//! best-effort FIFO mirror whose failures are logged and counted but never fail an operation
//! that already committed.

use crate::error::{EngineError, Result};
use crate::locks::KeyedLocks;
use crate::views::{IssueTokenRequest, QueueEntryView, QueueStatusView, TokenView};
use branchline_core::config::EngineConfig;
use branchline_core::environment::Clock;
use branchline_core::error::{StoreError, TransitionError};
use branchline_core::ids::{BranchId, TokenId};
use branchline_core::queue::QueueStatus;
use branchline_core::store::{AppointmentLedger, NewToken, QueueCache, TokenLedger};
use branchline_core::token::{QueueEntry, QueueKey, Token, TokenStatus};
use chrono::NaiveDate;
use std::future::Future;
use std::sync::Arc;

/// Queue engine.
pub struct QueueEngine {
    tokens: Arc<dyn TokenLedger>,
    appointments: Arc<dyn AppointmentLedger>,
    cache: Arc<dyn QueueCache>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    locks: KeyedLocks<BranchId>,
}

impl QueueEngine {
    /// Create a queue engine over the given collaborators.
    #[must_use]
    pub fn new(
        tokens: Arc<dyn TokenLedger>,
        appointments: Arc<dyn AppointmentLedger>,
        cache: Arc<dyn QueueCache>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        Self {
            tokens,
            appointments,
            cache,
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

    fn today(&self) -> NaiveDate {
        self.config.service_date(self.clock.now())
    }

    /// Run a cache call, downgrading failure to a warning.
    async fn mirror<T>(
        &self,
        op: &'static str,
        call: impl Future<Output = std::result::Result<T, StoreError>>,
    ) -> Option<T> {
        match call.await {
            Ok(value) => Some(value),
            Err(err) => {
                metrics::counter!("queue.cache.failures", "op" => op).increment(1);
                tracing::warn!(op, error = %err, "Queue cache degraded, ledger remains authoritative");
                None
            },
        }
    }

    async fn fetch(&self, id: TokenId) -> Result<Token> {
        self.tokens
            .get_token(id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("token {id}")))
    }

    /// Compare-and-set `token` into `to`.
    async fn advance(&self, token: &Token, to: TokenStatus) -> Result<Token> {
        if token.status.next() != Some(to) {
            return Err(TransitionError::Token {
                from: token.status,
                to,
            }
            .into());
        }
        match self
            .tokens
            .transition_token(token.id, token.status, to, self.clock.now())
            .await
        {
            Ok(Some(updated)) => {
                metrics::counter!("queue.tokens.transitions", "to" => to.as_str()).increment(1);
                Ok(updated)
            },
            Ok(None) => Err(EngineError::InvalidState(format!(
                "token {} changed concurrently",
                token.id
            ))),
            Err(StoreError::Constraint(msg)) => Err(EngineError::InvalidState(msg)),
            Err(err) => Err(err.into()),
        }
    }

    // ========================================================================
    // Issuance
    // ========================================================================

    /// Issue the next token of today's queue.
    ///
    /// # Errors
    ///
    /// - `Validation`: nil ids, or a linked appointment that is missing, belongs to another
    ///   branch, or is no longer SCHEDULED/IN_PROGRESS
    /// - `StorageUnavailable`: the ledger failed; no number was consumed
    #[tracing::instrument(
        skip(self, request),
        fields(branch_id = %request.branch_id, appointment_id = ?request.appointment_id)
    )]
    pub async fn issue_token(&self, request: IssueTokenRequest) -> Result<TokenView> {
        if request.branch_id.is_nil() {
            return Err(EngineError::Validation("branch_id is required".to_string()));
        }
        if request.customer_id.is_nil() {
            return Err(EngineError::Validation("customer_id is required".to_string()));
        }
        if let Some(appointment_id) = request.appointment_id {
            let appointment = self
                .appointments
                .get_appointment(appointment_id)
                .await?
                .ok_or_else(|| {
                    EngineError::Validation(format!("appointment {appointment_id} does not exist"))
                })?;
            if appointment.branch_id != request.branch_id {
                return Err(EngineError::Validation(format!(
                    "appointment {appointment_id} belongs to another branch"
                )));
            }
            if !appointment.status.accepts_token() {
                return Err(EngineError::Validation(format!(
                    "appointment {appointment_id} is {}",
                    appointment.status
                )));
            }
        }

        let _guard = self.locks.lock(request.branch_id).await;
        let now = self.clock.now();
        let token = self
            .tokens
            .issue_token(NewToken {
                id: TokenId::new(),
                branch_id: request.branch_id,
                customer_id: request.customer_id,
                appointment_id: request.appointment_id,
                service_date: self.config.service_date(now),
                notes: request.notes,
                minutes_per_ticket: self.config.minutes_per_ticket,
                issued_at: now,
            })
            .await?;

        metrics::counter!("queue.tokens.issued").increment(1);
        tracing::info!(
            token_id = %token.id,
            token_number = token.token_number,
            service_date = %token.service_date,
            "Token issued"
        );

        self.mirror(
            "push_back",
            self.cache.push_back(token.queue_key(), token.queue_entry()),
        )
        .await;
        Ok(token.into())
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Load one token.
    ///
    /// # Errors
    ///
    /// `NotFound`, `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn get_token(&self, id: TokenId) -> Result<TokenView> {
        let token = self.fetch(id).await?;
        tracing::debug!(status = %token.status, "Token loaded");
        Ok(token.into())
    }

    /// The token being served at the branch today.
    ///
    /// # Errors
    ///
    /// `NotFound` when nobody is being served, `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn get_current_token(&self, branch_id: BranchId) -> Result<TokenView> {
        self.tokens
            .first_with_status(branch_id, self.today(), TokenStatus::Serving)
            .await?
            .map(TokenView::from)
            .ok_or_else(|| EngineError::NotFound(format!("no token is being served at {branch_id}")))
    }

    /// Recompute the branch's queue snapshot for today.
    ///
    /// # Errors
    ///
    /// `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn get_queue_status(&self, branch_id: BranchId) -> Result<QueueStatusView> {
        let today = self.today();
        let waiting = self
            .tokens
            .count_with_status(branch_id, today, TokenStatus::Waiting)
            .await?;
        let serving = self
            .tokens
            .first_with_status(branch_id, today, TokenStatus::Serving)
            .await?;

        let status = QueueStatus::compute(
            branch_id,
            today,
            serving.map(|t| t.token_number),
            waiting,
            self.config.minutes_per_ticket,
        );
        tracing::debug!(
            waiting = status.waiting_count,
            current = ?status.current_token_number,
            "Queue status computed"
        );
        Ok(status.into())
    }

    /// Every token issued at the branch today, ordered by number.
    ///
    /// # Errors
    ///
    /// `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn list_queue(&self, branch_id: BranchId) -> Result<Vec<TokenView>> {
        let tokens = self.tokens.list_tokens(branch_id, self.today()).await?;
        Ok(tokens.into_iter().map(TokenView::from).collect())
    }

    /// The first `limit` entries of today's queue, served from the cache.
    ///
    /// Falls back to the ledger's non-completed tokens when the cache fails, or when it answers
    /// with fewer than `limit` entries while the ledger holds more (a flushed or stale list).
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` only if the ledger has to be read and fails.
    #[tracing::instrument(skip(self))]
    pub async fn peek_queue(&self, branch_id: BranchId, limit: usize) -> Result<Vec<QueueEntryView>> {
        let key = QueueKey::new(branch_id, self.today());
        let cached = self.mirror("range", self.cache.range(key, limit)).await;
        if let Some(entries) = &cached {
            if entries.len() >= limit {
                return Ok(entries.iter().copied().map(QueueEntryView::from).collect());
            }
        }

        let mut pending = self.pending_entries(key).await?;
        pending.truncate(limit);
        if let Some(entries) = cached {
            if entries.len() >= pending.len() {
                return Ok(entries.into_iter().map(QueueEntryView::from).collect());
            }
            metrics::counter!("queue.cache.failures", "op" => "stale_range").increment(1);
            tracing::warn!(
                cached = entries.len(),
                pending = pending.len(),
                "Queue cache is behind the ledger, serving the ledger"
            );
        }
        Ok(pending.into_iter().map(QueueEntryView::from).collect())
    }

    async fn pending_entries(&self, key: QueueKey) -> Result<Vec<QueueEntry>> {
        let tokens = self
            .tokens
            .list_tokens(key.branch_id, key.service_date)
            .await?;
        Ok(tokens
            .iter()
            .filter(|t| t.status != TokenStatus::Completed)
            .map(Token::queue_entry)
            .collect())
    }

    /// Replace today's cache list with the ledger's non-completed tokens.
    ///
    /// Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// `StorageUnavailable` if either the ledger or the cache fails.
    #[tracing::instrument(skip(self))]
    pub async fn rebuild_queue_cache(&self, branch_id: BranchId) -> Result<usize> {
        let _guard = self.locks.lock(branch_id).await;
        let key = QueueKey::new(branch_id, self.today());
        let entries = self.pending_entries(key).await?;
        let count = entries.len();

        self.cache.replace(key, entries).await?;
        tracing::info!(count, "Queue cache rebuilt");
        Ok(count)
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Call the lowest-numbered waiting token of today (WAITING -> CALLED).
    ///
    /// # Errors
    ///
    /// - `InvalidState`: a token of the branch, from any day, is already CALLED or SERVING
    /// - `NotFound`: nobody is waiting
    /// - `StorageUnavailable`
    #[tracing::instrument(skip(self))]
    pub async fn call_next_token(&self, branch_id: BranchId) -> Result<TokenView> {
        let _guard = self.locks.lock(branch_id).await;
        let today = self.today();

        // The window may still be held by a token issued on an earlier day.
        if let Some(active) = self.tokens.active_token(branch_id).await? {
            tracing::warn!(
                token_number = active.token_number,
                service_date = %active.service_date,
                status = %active.status,
                "Branch is busy"
            );
            return Err(EngineError::InvalidState(format!(
                "token {} of {} is {}",
                active.token_number, active.service_date, active.status
            )));
        }

        let next = self
            .tokens
            .first_with_status(branch_id, today, TokenStatus::Waiting)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("no token waiting at {branch_id}")))?;

        let called = self.advance(&next, TokenStatus::Called).await?;
        tracing::info!(token_number = called.token_number, "Token called");
        Ok(called.into())
    }

    /// CALLED -> SERVING.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` from any other status, `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn begin_serving(&self, id: TokenId) -> Result<TokenView> {
        let token = self.fetch(id).await?;
        let _guard = self.locks.lock(token.branch_id).await;

        let serving = self.advance(&token, TokenStatus::Serving).await?;
        tracing::info!(token_number = serving.token_number, "Token being served");
        Ok(serving.into())
    }

    /// SERVING -> COMPLETED, then drop the head of the cached queue.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState` unless SERVING, `StorageUnavailable`.
    #[tracing::instrument(skip(self))]
    pub async fn complete_token(&self, id: TokenId) -> Result<TokenView> {
        let token = self.fetch(id).await?;
        let _guard = self.locks.lock(token.branch_id).await;

        let completed = self.advance(&token, TokenStatus::Completed).await?;
        tracing::info!(token_number = completed.token_number, "Token completed");

        if let Some(popped) = self
            .mirror("pop_front", self.cache.pop_front(completed.queue_key()))
            .await
        {
            if popped.is_some_and(|entry| entry.token_id != completed.id) {
                tracing::warn!(
                    popped = ?popped,
                    "Queue cache head did not match the completed token; consider a rebuild"
                );
            }
        }
        Ok(completed.into())
    }
}
