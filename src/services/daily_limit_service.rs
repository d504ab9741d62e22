use crate::{
    config::LimitsConfig,
    error::{ApiError, Result},
};
use sea_orm::{
    entity::*, query::*, sea_query::OnConflict, DatabaseConnection, DatabaseTransaction,
};
use time::Date;
use tracing::{debug, instrument};
use uuid::Uuid;

/// Per-user per-day spend totals used for risk limits
pub struct DailyLimitService {
    db: DatabaseConnection,
    limits: LimitsConfig,
}

impl DailyLimitService {
    pub fn new(db: DatabaseConnection, limits: LimitsConfig) -> Self {
        Self { db, limits }
    }

    pub async fn get(
        &self,
        user_id: Uuid,
        date: Date,
    ) -> Result<Option<entity::daily_limit_aggregates::Model>> {
        let aggregate = entity::daily_limit_aggregates::Entity::find()
            .filter(entity::daily_limit_aggregates::Column::UserId.eq(user_id))
            .filter(entity::daily_limit_aggregates::Column::SpendDate.eq(date))
            .one(&self.db)
            .await?;
        Ok(aggregate)
    }

    /// Reject a spend that would push today's totals past the configured limits
    pub async fn check_in_txn(
        &self,
        user_id: Uuid,
        date: Date,
        cash: i64,
        credit: i64,
        txn: &DatabaseTransaction,
    ) -> Result<()> {
        if self.limits.daily_cash_limit <= 0 && self.limits.daily_credit_limit <= 0 {
            return Ok(());
        }

        let aggregate = entity::daily_limit_aggregates::Entity::find()
            .filter(entity::daily_limit_aggregates::Column::UserId.eq(user_id))
            .filter(entity::daily_limit_aggregates::Column::SpendDate.eq(date))
            .one(txn)
            .await?;
        let (cash_total, credit_total) = aggregate
            .map(|a| (a.cash_total, a.credit_total))
            .unwrap_or((0, 0));

        if self.limits.daily_cash_limit > 0 && cash_total + cash > self.limits.daily_cash_limit {
            return Err(ApiError::LimitExceeded(format!(
                "Daily cash limit of {} reached",
                self.limits.daily_cash_limit
            )));
        }

        if self.limits.daily_credit_limit > 0
            && credit_total + credit > self.limits.daily_credit_limit
        {
            return Err(ApiError::LimitExceeded(format!(
                "Daily credit limit of {} reached",
                self.limits.daily_credit_limit
            )));
        }

        Ok(())
    }

    async fn lock_or_create(
        &self,
        user_id: Uuid,
        date: Date,
        txn: &DatabaseTransaction,
    ) -> Result<entity::daily_limit_aggregates::Model> {
        let now = time::OffsetDateTime::now_utc();
        let aggregate = entity::daily_limit_aggregates::ActiveModel {
            id: Set(Uuid::now_v7()),
            user_id: Set(user_id),
            spend_date: Set(date),
            cash_total: Set(0),
            credit_total: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        // Insert with ON CONFLICT DO NOTHING, then lock whichever row won
        entity::daily_limit_aggregates::Entity::insert(aggregate)
            .on_conflict(
                OnConflict::columns([
                    entity::daily_limit_aggregates::Column::UserId,
                    entity::daily_limit_aggregates::Column::SpendDate,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(txn)
            .await?;

        entity::daily_limit_aggregates::Entity::find()
            .filter(entity::daily_limit_aggregates::Column::UserId.eq(user_id))
            .filter(entity::daily_limit_aggregates::Column::SpendDate.eq(date))
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| {
                ApiError::Internal(anyhow::anyhow!(
                    "Failed to create or lock daily limit aggregate"
                ))
            })
    }

    /// Add a successful spend to the day's totals
    #[instrument(skip(self, txn))]
    pub async fn add_in_txn(
        &self,
        user_id: Uuid,
        date: Date,
        cash: i64,
        credit: i64,
        txn: &DatabaseTransaction,
    ) -> Result<entity::daily_limit_aggregates::Model> {
        let aggregate = self.lock_or_create(user_id, date, txn).await?;
        let cash_total = aggregate.cash_total + cash;
        let credit_total = aggregate.credit_total + credit;

        let mut aggregate_active: entity::daily_limit_aggregates::ActiveModel = aggregate.into();
        aggregate_active.cash_total = Set(cash_total);
        aggregate_active.credit_total = Set(credit_total);
        aggregate_active.updated_at = Set(time::OffsetDateTime::now_utc());
        let aggregate = aggregate_active.update(txn).await?;

        debug!(
            "Daily spend for {} on {}: cash={}, credit={}",
            user_id, date, cash_total, credit_total
        );
        Ok(aggregate)
    }

    /// Take a refunded spend back out of the day it was made on. Never goes below zero.
    #[instrument(skip(self, txn))]
    pub async fn subtract_in_txn(
        &self,
        user_id: Uuid,
        date: Date,
        cash: i64,
        credit: i64,
        txn: &DatabaseTransaction,
    ) -> Result<()> {
        let aggregate = entity::daily_limit_aggregates::Entity::find()
            .filter(entity::daily_limit_aggregates::Column::UserId.eq(user_id))
            .filter(entity::daily_limit_aggregates::Column::SpendDate.eq(date))
            .lock_exclusive()
            .one(txn)
            .await?;

        let Some(aggregate) = aggregate else {
            return Ok(());
        };

        let cash_total = (aggregate.cash_total - cash).max(0);
        let credit_total = (aggregate.credit_total - credit).max(0);

        let mut aggregate_active: entity::daily_limit_aggregates::ActiveModel = aggregate.into();
        aggregate_active.cash_total = Set(cash_total);
        aggregate_active.credit_total = Set(credit_total);
        aggregate_active.updated_at = Set(time::OffsetDateTime::now_utc());
        aggregate_active.update(txn).await?;
        Ok(())
    }
}
