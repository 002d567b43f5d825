//! [`TokenLedger`]: gap-free numbering and the one-active-token rule.

use crate::rows::{TokenRow, convert_all};
use crate::{PostgresLedger, store_error};
use branchline_core::error::{StoreError, TransitionError};
use branchline_core::ids::{BranchId, TokenId};
use branchline_core::queue::estimated_wait;
use branchline_core::store::{NewToken, StoreFuture, TokenLedger};
use branchline_core::token::{Token, TokenStatus};
use chrono::{DateTime, NaiveDate, Utc};

impl PostgresLedger {
    async fn insert_token(&self, new: NewToken) -> Result<Token, StoreError> {
        let mut tx = self.pool.begin().await.map_err(store_error("begin issue"))?;

        // The upsert row-locks the counter until commit, serializing issuers per branch/day.
        let token_number = sqlx::query_scalar::<_, i32>(
            r"
            INSERT INTO token_counters (branch_id, service_date, last_number)
            VALUES ($1, $2, 1)
            ON CONFLICT (branch_id, service_date)
            DO UPDATE SET last_number = token_counters.last_number + 1
            RETURNING last_number
            ",
        )
        .bind(*new.branch_id.as_uuid())
        .bind(new.service_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error("allocate token number"))?;

        let waiting_ahead = sqlx::query_scalar::<_, i64>(
            r"
            SELECT COUNT(*) FROM tokens
            WHERE branch_id = $1 AND service_date = $2 AND status = 'WAITING'
            ",
        )
        .bind(*new.branch_id.as_uuid())
        .bind(new.service_date)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error("count waiting tokens"))?;

        let row = sqlx::query_as::<_, TokenRow>(
            r"
            INSERT INTO tokens
                (id, branch_id, customer_id, appointment_id, token_number, service_date, status,
                 notes, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'WAITING', $7, $8, $8)
            RETURNING *
            ",
        )
        .bind(*new.id.as_uuid())
        .bind(*new.branch_id.as_uuid())
        .bind(*new.customer_id.as_uuid())
        .bind(new.appointment_id.map(|id| *id.as_uuid()))
        .bind(token_number)
        .bind(new.service_date)
        .bind(&new.notes)
        .bind(new.issued_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(store_error("insert token"))?;

        if let Some(appointment_id) = new.appointment_id {
            let wait = estimated_wait(waiting_ahead, new.minutes_per_ticket);
            sqlx::query(
                r"
                UPDATE appointments
                SET token_number = $2, estimated_wait_minutes = $3, updated_at = $4
                WHERE id = $1
                ",
            )
            .bind(*appointment_id.as_uuid())
            .bind(token_number)
            .bind(i32::try_from(wait).unwrap_or(i32::MAX))
            .bind(new.issued_at)
            .execute(&mut *tx)
            .await
            .map_err(store_error("link appointment"))?;
        }

        tx.commit().await.map_err(store_error("commit issue"))?;
        Token::try_from(row)
    }

    async fn load_token(&self, id: TokenId) -> Result<Option<Token>, StoreError> {
        sqlx::query_as::<_, TokenRow>("SELECT * FROM tokens WHERE id = $1")
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(store_error("get token"))?
            .map(Token::try_from)
            .transpose()
    }

    async fn day_tokens(&self, branch_id: BranchId, date: NaiveDate) -> Result<Vec<Token>, StoreError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r"
            SELECT * FROM tokens
            WHERE branch_id = $1 AND service_date = $2
            ORDER BY token_number
            ",
        )
        .bind(*branch_id.as_uuid())
        .bind(date)
        .fetch_all(&self.pool)
        .await
        .map_err(store_error("list tokens"))?;
        convert_all(rows)
    }

    async fn first_in(
        &self,
        branch_id: BranchId,
        date: NaiveDate,
        status: TokenStatus,
    ) -> Result<Option<Token>, StoreError> {
        sqlx::query_as::<_, TokenRow>(
            r"
            SELECT * FROM tokens
            WHERE branch_id = $1 AND service_date = $2 AND status = $3
            ORDER BY token_number
            LIMIT 1
            ",
        )
        .bind(*branch_id.as_uuid())
        .bind(date)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("find token"))?
        .map(Token::try_from)
        .transpose()
    }

    async fn active_in(&self, branch_id: BranchId) -> Result<Option<Token>, StoreError> {
        sqlx::query_as::<_, TokenRow>(
            r"
            SELECT * FROM tokens
            WHERE branch_id = $1 AND status IN ('CALLED', 'SERVING')
            ORDER BY service_date, token_number
            LIMIT 1
            ",
        )
        .bind(*branch_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("find active token"))?
        .map(Token::try_from)
        .transpose()
    }

    async fn count_in(
        &self,
        branch_id: BranchId,
        date: NaiveDate,
        status: TokenStatus,
    ) -> Result<i64, StoreError> {
        sqlx::query_scalar::<_, i64>(
            r"
            SELECT COUNT(*) FROM tokens
            WHERE branch_id = $1 AND service_date = $2 AND status = $3
            ",
        )
        .bind(*branch_id.as_uuid())
        .bind(date)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(store_error("count tokens"))
    }

    async fn advance_token(
        &self,
        id: TokenId,
        from: TokenStatus,
        to: TokenStatus,
        at: DateTime<Utc>,
    ) -> Result<Option<Token>, StoreError> {
        if from.next() != Some(to) {
            return Err(StoreError::Constraint(
                TransitionError::Token { from, to }.to_string(),
            ));
        }
        // A second CALLED/SERVING token for the branch trips idx_tokens_one_active (23505).
        sqlx::query_as::<_, TokenRow>(
            r"
            UPDATE tokens
            SET status = $3,
                updated_at = $4,
                called_at = CASE WHEN $3 = 'CALLED' THEN $4 ELSE called_at END,
                completed_at = CASE WHEN $3 = 'COMPLETED' THEN $4 ELSE completed_at END
            WHERE id = $1 AND status = $2
            RETURNING *
            ",
        )
        .bind(*id.as_uuid())
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_error("transition token"))?
        .map(Token::try_from)
        .transpose()
    }
}

impl TokenLedger for PostgresLedger {
    fn issue_token(&self, token: NewToken) -> StoreFuture<'_, Token> {
        Box::pin(self.insert_token(token))
    }

    fn get_token(&self, id: TokenId) -> StoreFuture<'_, Option<Token>> {
        Box::pin(self.load_token(id))
    }

    fn list_tokens(&self, branch_id: BranchId, date: NaiveDate) -> StoreFuture<'_, Vec<Token>> {
        Box::pin(self.day_tokens(branch_id, date))
    }

    fn first_with_status(
        &self,
        branch_id: BranchId,
        date: NaiveDate,
        status: TokenStatus,
    ) -> StoreFuture<'_, Option<Token>> {
        Box::pin(self.first_in(branch_id, date, status))
    }

    fn active_token(&self, branch_id: BranchId) -> StoreFuture<'_, Option<Token>> {
        Box::pin(self.active_in(branch_id))
    }

    fn count_with_status(
        &self,
        branch_id: BranchId,
        date: NaiveDate,
        status: TokenStatus,
    ) -> StoreFuture<'_, i64> {
        Box::pin(self.count_in(branch_id, date, status))
    }

    fn transition_token(
        &self,
        id: TokenId,
        from: TokenStatus,
        to: TokenStatus,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<Token>> {
        Box::pin(self.advance_token(id, from, to, at))
    }
}
