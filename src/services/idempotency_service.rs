use crate::{
    config::WalletConfig,
    error::{ApiError, Result},
    models::payment::ConfirmationResult,
};
use anyhow::anyhow;
use entity::sea_orm_active_enums::IdempotencyStatus;
use sea_orm::{
    entity::*, query::*, sea_query::{Expr, OnConflict}, DatabaseConnection, TransactionTrait,
};
use time::{Duration, OffsetDateTime};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// What the caller should do with a confirmation after `begin`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyDecision {
    /// This attempt owns the key; run the saga
    Proceed,
    /// The key already completed; return the cached response verbatim
    Replay(ConfirmationResult),
}

/// Exactly-once guard for payment confirmations, keyed by the gateway payment token.
///
/// Every write here commits in its own transaction, independent of the payment
/// saga, so a FAILED marker survives a rollback of the saga itself.
pub struct IdempotencyService {
    db: DatabaseConnection,
    ttl: Duration,
    lease: Duration,
}

impl IdempotencyService {
    pub fn new(db: DatabaseConnection, wallet: &WalletConfig) -> Self {
        Self {
            db,
            ttl: Duration::hours(wallet.idempotency_ttl_hours),
            lease: Duration::seconds(wallet.idempotency_lease_seconds),
        }
    }

    /// Claim `key` for `user_id`, or tell the caller to replay / back off
    #[instrument(skip(self, fingerprint))]
    pub async fn begin(
        &self,
        user_id: Uuid,
        key: &str,
        fingerprint: &str,
    ) -> Result<IdempotencyDecision> {
        let now = OffsetDateTime::now_utc();
        let txn = self.db.begin().await?;

        let record = entity::idempotency_records::ActiveModel {
            id: Set(Uuid::now_v7()),
            idem_key: Set(key.to_string()),
            user_id: Set(user_id),
            status: Set(IdempotencyStatus::Pending),
            request_fingerprint: Set(fingerprint.to_string()),
            response_snapshot: Set(None),
            error_snapshot: Set(None),
            locked_at: Set(now),
            expires_at: Set(now + self.ttl),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // The unique index on idem_key decides the winner of concurrent first attempts
        let inserted = entity::idempotency_records::Entity::insert(record)
            .on_conflict(
                OnConflict::column(entity::idempotency_records::Column::IdemKey)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(&txn)
            .await?;

        if inserted == 1 {
            txn.commit().await?;
            return Ok(IdempotencyDecision::Proceed);
        }

        let existing = entity::idempotency_records::Entity::find()
            .filter(entity::idempotency_records::Column::IdemKey.eq(key))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ApiError::Internal(anyhow!("Idempotency record {} vanished after conflict", key))
            })?;

        if existing.expires_at <= now {
            // Expired records are treated as new, whoever owned them
            self.take_over(&txn, &existing, user_id, fingerprint, now).await?;
            txn.commit().await?;
            info!("Reclaimed expired idempotency key {}", key);
            return Ok(IdempotencyDecision::Proceed);
        }

        if existing.user_id != user_id {
            txn.rollback().await?;
            error!(
                alert = true,
                "Idempotency key {} owned by user {} was presented by user {}",
                key,
                existing.user_id,
                user_id
            );
            return Err(ApiError::Integrity(format!(
                "Idempotency key {} belongs to another user",
                key
            )));
        }

        match existing.status {
            IdempotencyStatus::Completed => {
                txn.rollback().await?;
                if existing.request_fingerprint != fingerprint {
                    return Err(ApiError::DuplicateRequest(format!(
                        "Payment {} was already confirmed with a different request",
                        key
                    )));
                }

                let snapshot = existing.response_snapshot.ok_or_else(|| {
                    ApiError::Integrity(format!("Completed key {} has no cached response", key))
                })?;
                let cached: ConfirmationResult = serde_json::from_str(&snapshot).map_err(|e| {
                    ApiError::Integrity(format!("Cached response for {} is unreadable: {}", key, e))
                })?;

                info!("Replaying cached confirmation for key {}", key);
                Ok(IdempotencyDecision::Replay(cached))
            }
            IdempotencyStatus::Pending if now - existing.locked_at < self.lease => {
                txn.rollback().await?;
                Err(ApiError::DuplicateRequest(format!(
                    "Payment {} is already being processed",
                    key
                )))
            }
            IdempotencyStatus::Pending | IdempotencyStatus::Failed => {
                if existing.status == IdempotencyStatus::Pending {
                    warn!(
                        "Taking over abandoned idempotency key {} locked at {}",
                        key, existing.locked_at
                    );
                }
                self.take_over(&txn, &existing, user_id, fingerprint, now).await?;
                txn.commit().await?;
                Ok(IdempotencyDecision::Proceed)
            }
        }
    }

    /// Conditional update on the row we read, so two retries cannot both win
    async fn take_over(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        existing: &entity::idempotency_records::Model,
        user_id: Uuid,
        fingerprint: &str,
        now: OffsetDateTime,
    ) -> Result<()> {
        use entity::idempotency_records::Column;

        let updated = entity::idempotency_records::Entity::update_many()
            .col_expr(Column::UserId, Expr::value(user_id))
            .col_expr(Column::Status, Expr::value(IdempotencyStatus::Pending))
            .col_expr(Column::RequestFingerprint, Expr::value(fingerprint))
            .col_expr(Column::ResponseSnapshot, Expr::value(Option::<String>::None))
            .col_expr(Column::ErrorSnapshot, Expr::value(Option::<String>::None))
            .col_expr(Column::LockedAt, Expr::value(now))
            .col_expr(Column::ExpiresAt, Expr::value(now + self.ttl))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(existing.id))
            .filter(Column::Status.eq(existing.status))
            .filter(Column::LockedAt.eq(existing.locked_at))
            .exec(txn)
            .await?;

        if updated.rows_affected != 1 {
            return Err(ApiError::DuplicateRequest(format!(
                "Payment {} was claimed by a concurrent attempt",
                existing.idem_key
            )));
        }
        Ok(())
    }

    /// Mark the key COMPLETED with the response that replays will return
    #[instrument(skip(self, response))]
    pub async fn complete(&self, key: &str, response: &ConfirmationResult) -> Result<()> {
        let snapshot = serde_json::to_string(response)
            .map_err(|e| ApiError::Internal(anyhow!("Failed to serialize response: {}", e)))?;

        self.finish(key, IdempotencyStatus::Completed, Some(snapshot), None)
            .await
    }

    /// Mark the key FAILED so the next attempt with the same key may proceed
    #[instrument(skip(self))]
    pub async fn fail(&self, key: &str, error_snapshot: &str) -> Result<()> {
        self.finish(
            key,
            IdempotencyStatus::Failed,
            None,
            Some(error_snapshot.to_string()),
        )
        .await
    }

    async fn finish(
        &self,
        key: &str,
        status: IdempotencyStatus,
        response_snapshot: Option<String>,
        error_snapshot: Option<String>,
    ) -> Result<()> {
        let txn = self.db.begin().await?;

        let record = entity::idempotency_records::Entity::find()
            .filter(entity::idempotency_records::Column::IdemKey.eq(key))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Idempotency key {} not found", key)))?;

        let mut record_active: entity::idempotency_records::ActiveModel = record.into();
        record_active.status = Set(status);
        record_active.response_snapshot = Set(response_snapshot);
        record_active.error_snapshot = Set(error_snapshot);
        record_active.updated_at = Set(OffsetDateTime::now_utc());
        record_active.update(&txn).await?;

        txn.commit().await?;
        Ok(())
    }

    pub async fn find(&self, key: &str) -> Result<Option<entity::idempotency_records::Model>> {
        let record = entity::idempotency_records::Entity::find()
            .filter(entity::idempotency_records::Column::IdemKey.eq(key))
            .one(&self.db)
            .await?;
        Ok(record)
    }
}
