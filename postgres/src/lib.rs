//! `PostgreSQL` ledger for Branchline.
//!
//! [`PostgresLedger`] implements [`SlotStore`](branchline_core::SlotStore),
//! [`AppointmentLedger`](branchline_core::AppointmentLedger) and
//! [`TokenLedger`](branchline_core::TokenLedger) over one connection pool:
//!
//! - Bookings run check-then-insert inside one transaction, serialized per branch and staff
//!   member with a transaction-scoped advisory lock
//! - Token numbers come from an upserted per-branch/day counter row, so concurrent issuers
//!   queue on its row lock and numbers stay gap-free
//! - A partial unique index keeps at most one CALLED/SERVING token per branch and day
//!
//! # Example
//!
//! ```no_run
//! use branchline_postgres::PostgresLedger;
//!
//! # async fn example() -> Result<(), branchline_core::StoreError> {
//! let ledger = PostgresLedger::connect("postgres://localhost/branchline", 10).await?;
//! ledger.migrate().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod appointments;
mod rows;
mod slots;
mod tokens;

use branchline_core::error::StoreError;
use branchline_core::ids::{BranchId, StaffId};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};

/// `PostgreSQL`-backed ledger for slots, appointments and tokens.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone, Debug)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    /// Connect a pool of at most `max_connections` to `database_url`.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the database cannot be reached.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(store_error("connect"))?;
        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled migrations.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
        Ok(())
    }
}

/// Map a driver error: constraint violations become `Constraint`, everything else
/// `Unavailable`.
pub(crate) fn store_error(context: &'static str) -> impl Fn(sqlx::Error) -> StoreError {
    move |err| match &err {
        sqlx::Error::Database(db)
            if matches!(db.code().as_deref(), Some("23505" | "23514" | "23503")) =>
        {
            StoreError::Constraint(format!("{context}: {db}"))
        },
        _ => StoreError::Unavailable(format!("{context}: {err}")),
    }
}

/// Advisory lock key for one schedule (branch plus staff member, or branch-wide).
pub(crate) fn schedule_key(branch_id: BranchId, staff_id: Option<StaffId>) -> String {
    match staff_id {
        Some(staff_id) => format!("schedule:{branch_id}:{staff_id}"),
        None => format!("schedule:{branch_id}:-"),
    }
}

/// Take the transaction-scoped advisory locks for `keys`, in sorted order.
pub(crate) async fn lock_schedules(
    conn: &mut PgConnection,
    mut keys: Vec<String>,
) -> Result<(), StoreError> {
    keys.sort();
    keys.dedup();
    for key in keys {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key)
            .execute(&mut *conn)
            .await
            .map_err(store_error("lock schedule"))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_keys_separate_staff_from_branch_wide() {
        let branch = BranchId::new();
        let staff = StaffId::new();
        assert_ne!(schedule_key(branch, Some(staff)), schedule_key(branch, None));
        assert_eq!(schedule_key(branch, None), format!("schedule:{branch}:-"));
    }

    #[test]
    fn non_database_errors_are_unavailable() {
        let err = store_error("get slot")(sqlx::Error::PoolTimedOut);
        assert!(matches!(err, StoreError::Unavailable(msg) if msg.starts_with("get slot")));
    }
}
