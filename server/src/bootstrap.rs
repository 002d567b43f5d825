//! Composition root: builds the collaborators and hands them to the engines.

use crate::config::Config;
use branchline_core::config::EngineConfig;
use branchline_core::environment::{Clock, SystemClock};
use branchline_core::error::StoreError;
use branchline_core::store::{AppointmentLedger, DisabledQueueCache, QueueCache, SlotStore, TokenLedger};
use branchline_engine::{BookingEngine, QueueEngine};
use branchline_postgres::PostgresLedger;
use branchline_redis::RedisQueueCache;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while starting up.
#[derive(Error, Debug)]
pub enum BootstrapError {
    /// The ledger could not be reached or migrated.
    #[error("Ledger setup failed: {0}")]
    Ledger(#[from] StoreError),

    /// Tracing or metrics could not be installed.
    #[error("Telemetry setup failed: {0}")]
    Telemetry(String),
}

/// The wired engines, ready to serve requests.
#[derive(Clone)]
pub struct Branchline {
    /// Appointment booking and slot management
    pub booking: Arc<BookingEngine>,
    /// Branch ticket queues
    pub queue: Arc<QueueEngine>,
}

impl Branchline {
    /// Wire both engines to one ledger, a queue cache and a clock.
    #[must_use]
    pub fn assemble<L>(
        ledger: L,
        cache: Arc<dyn QueueCache>,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self
    where
        L: SlotStore + AppointmentLedger + TokenLedger + Clone + 'static,
    {
        let appointments: Arc<dyn AppointmentLedger> = Arc::new(ledger.clone());
        let booking = BookingEngine::new(
            Arc::new(ledger.clone()),
            Arc::clone(&appointments),
            Arc::clone(&clock),
            config.clone(),
        );
        let queue = QueueEngine::new(Arc::new(ledger), appointments, cache, clock, config);
        Self {
            booking: Arc::new(booking),
            queue: Arc::new(queue),
        }
    }

    /// Connect to `PostgreSQL` and (optionally) Redis as described by `config`.
    ///
    /// A Redis outage at startup is not fatal: the queue cache is disabled and reads fall
    /// back to the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Ledger`] if the database is unreachable or a migration fails.
    pub async fn connect(config: &Config) -> Result<Self, BootstrapError> {
        let ledger =
            PostgresLedger::connect(&config.postgres.url, config.postgres.max_connections).await?;
        if config.postgres.run_migrations {
            ledger.migrate().await?;
            tracing::info!("Ledger migrations applied");
        }

        let cache: Arc<dyn QueueCache> = match &config.redis.url {
            Some(url) => {
                match RedisQueueCache::new(url, config.engine.queue_cache_ttl_seconds).await {
                    Ok(cache) => Arc::new(cache),
                    Err(e) => {
                        tracing::warn!(error = %e, "Queue cache unreachable, serving from the ledger");
                        Arc::new(DisabledQueueCache)
                    },
                }
            },
            None => {
                tracing::info!("No REDIS_URL configured, queue cache disabled");
                Arc::new(DisabledQueueCache)
            },
        };

        Ok(Self::assemble(
            ledger,
            cache,
            Arc::new(SystemClock),
            config.engine.clone(),
        ))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use branchline_core::Tz;
    use branchline_core::ids::{BranchId, CustomerId};
    use branchline_engine::IssueTokenRequest;
    use branchline_testing::{InMemoryLedger, InMemoryQueueCache, test_clock};

    #[tokio::test]
    async fn assembled_engines_share_one_ledger() {
        let ledger = InMemoryLedger::new();
        let app = Branchline::assemble(
            ledger.clone(),
            Arc::new(InMemoryQueueCache::new()),
            Arc::new(test_clock()),
            EngineConfig::new(Tz::UTC),
        );
        let branch = BranchId::new();
        let issued = app
            .queue
            .issue_token(IssueTokenRequest {
                branch_id: branch,
                customer_id: CustomerId::new(),
                appointment_id: None,
                notes: String::new(),
            })
            .await
            .unwrap();
        assert_eq!(issued.token_number, 1);

        let status = app.queue.get_queue_status(branch).await.unwrap();
        assert_eq!(status.waiting_count, 1);
    }
}
