use crate::error::{ApiError, Result};
use anyhow::anyhow;
use entity::sea_orm_active_enums::LedgerEntryType;
use sea_orm::{
    entity::*, query::*, sea_query::OnConflict, DatabaseConnection, DatabaseTransaction,
};
use tracing::{debug, instrument};
use uuid::Uuid;

/// The only balance unit the wallet carries today
pub const CREDIT_UNIT: &str = "CREDIT";

/// Loose pointer from a ledger entry to whatever caused it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerReference {
    pub kind: &'static str,
    pub id: Uuid,
}

impl LedgerReference {
    pub fn order(id: Uuid) -> Self {
        Self { kind: "ORDER", id }
    }

    pub fn payment(id: Uuid) -> Self {
        Self { kind: "PAYMENT", id }
    }

    pub fn admin(admin_user_id: Uuid) -> Self {
        Self {
            kind: "ADMIN",
            id: admin_user_id,
        }
    }

    pub fn lot(id: Uuid) -> Self {
        Self { kind: "LOT", id }
    }
}

/// Accounts, balances and the append-only ledger.
///
/// Every balance mutation goes through [`LedgerService::apply_delta_in_txn`],
/// which writes exactly one entry carrying the post-mutation snapshot. The sum
/// of an account's entries therefore always equals its balance.
pub struct LedgerService {
    db: DatabaseConnection,
}

impl LedgerService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Get or lazily create the wallet account of a user
    pub async fn ensure_account_in_txn(
        &self,
        user_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<entity::accounts::Model> {
        let account = entity::accounts::ActiveModel {
            id: Set(Uuid::now_v7()),
            user_id: Set(user_id),
            created_at: Set(time::OffsetDateTime::now_utc()),
        };

        // Concurrent first access: the loser of the race inserts nothing
        entity::accounts::Entity::insert(account)
            .on_conflict(
                OnConflict::column(entity::accounts::Column::UserId)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(txn)
            .await?;

        entity::accounts::Entity::find()
            .filter(entity::accounts::Column::UserId.eq(user_id))
            .one(txn)
            .await?
            .ok_or_else(|| {
                ApiError::Internal(anyhow!("Account for user {} vanished after insert", user_id))
            })
    }

    pub async fn find_account(&self, user_id: Uuid) -> Result<Option<entity::accounts::Model>> {
        let account = entity::accounts::Entity::find()
            .filter(entity::accounts::Column::UserId.eq(user_id))
            .one(&self.db)
            .await?;
        Ok(account)
    }

    pub async fn find_account_in_txn(
        &self,
        user_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<Option<entity::accounts::Model>> {
        let account = entity::accounts::Entity::find()
            .filter(entity::accounts::Column::UserId.eq(user_id))
            .one(txn)
            .await?;
        Ok(account)
    }

    /// Lock the credit balance row of an account, creating it at zero first if needed.
    /// Serializes every lot and ledger mutation on the same account.
    pub async fn lock_balance_in_txn(
        &self,
        account_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<entity::balances::Model> {
        let now = time::OffsetDateTime::now_utc();
        let balance = entity::balances::ActiveModel {
            id: Set(Uuid::now_v7()),
            account_id: Set(account_id),
            unit: Set(CREDIT_UNIT.to_string()),
            amount: Set(0),
            frozen_amount: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        };

        entity::balances::Entity::insert(balance)
            .on_conflict(
                OnConflict::columns([
                    entity::balances::Column::AccountId,
                    entity::balances::Column::Unit,
                ])
                .do_nothing()
                .to_owned(),
            )
            .exec_without_returning(txn)
            .await?;

        entity::balances::Entity::find()
            .filter(entity::balances::Column::AccountId.eq(account_id))
            .filter(entity::balances::Column::Unit.eq(CREDIT_UNIT))
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| {
                ApiError::Internal(anyhow!("Balance for account {} vanished after insert", account_id))
            })
    }

    /// Apply a signed delta to the credit balance and append the matching ledger entry.
    /// Fails with InsufficientBalance if the balance would go negative.
    #[instrument(skip(self, note, txn))]
    pub async fn apply_delta_in_txn(
        &self,
        account_id: Uuid,
        delta: i64,
        entry_type: LedgerEntryType,
        note: &str,
        reference: Option<LedgerReference>,
        txn: &DatabaseTransaction,
    ) -> Result<entity::ledger_entries::Model> {
        if delta == 0 {
            return Err(ApiError::BadRequest(
                "Ledger delta must not be zero".to_string(),
            ));
        }

        let balance = self.lock_balance_in_txn(account_id, txn).await?;

        let balance_after = balance.amount.checked_add(delta).ok_or_else(|| {
            ApiError::Internal(anyhow!("Balance overflow on account {}", account_id))
        })?;

        if balance_after < 0 {
            return Err(ApiError::InsufficientBalance(format!(
                "Balance {} cannot cover {}",
                balance.amount, -delta
            )));
        }

        let now = time::OffsetDateTime::now_utc();
        let mut balance_active: entity::balances::ActiveModel = balance.into();
        balance_active.amount = Set(balance_after);
        balance_active.updated_at = Set(now);
        balance_active.update(txn).await?;

        let entry = entity::ledger_entries::ActiveModel {
            id: Set(Uuid::now_v7()),
            account_id: Set(account_id),
            entry_type: Set(entry_type),
            amount: Set(delta),
            balance_after: Set(balance_after),
            note: Set(note.to_string()),
            reference_type: Set(reference.map(|r| r.kind.to_string())),
            reference_id: Set(reference.map(|r| r.id)),
            created_at: Set(now),
        }
        .insert(txn)
        .await?;

        debug!(
            "Ledger entry: account={}, type={:?}, delta={}, balance_after={}",
            account_id, entry_type, delta, balance_after
        );

        Ok(entry)
    }

    /// Current spendable balance; zero for users without an account yet
    pub async fn get_balance(&self, user_id: Uuid) -> Result<entity::balances::Model> {
        let Some(account) = self.find_account(user_id).await? else {
            return Ok(Self::empty_balance(Uuid::nil()));
        };

        let balance = entity::balances::Entity::find()
            .filter(entity::balances::Column::AccountId.eq(account.id))
            .filter(entity::balances::Column::Unit.eq(CREDIT_UNIT))
            .one(&self.db)
            .await?;

        Ok(balance.unwrap_or_else(|| Self::empty_balance(account.id)))
    }

    fn empty_balance(account_id: Uuid) -> entity::balances::Model {
        let now = time::OffsetDateTime::now_utc();
        entity::balances::Model {
            id: Uuid::nil(),
            account_id,
            unit: CREDIT_UNIT.to_string(),
            amount: 0,
            frozen_amount: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Signed sum of every ledger entry of an account
    pub async fn ledger_sum(&self, account_id: Uuid) -> Result<i64> {
        // Summed here rather than in SQL: SUM(bigint) is NUMERIC on PostgreSQL
        let amounts: Vec<i64> = entity::ledger_entries::Entity::find()
            .select_only()
            .column(entity::ledger_entries::Column::Amount)
            .filter(entity::ledger_entries::Column::AccountId.eq(account_id))
            .into_tuple()
            .all(&self.db)
            .await?;

        Ok(amounts.iter().sum())
    }

    /// Newest entries first
    pub async fn list_entries(
        &self,
        account_id: Uuid,
        limit: u64,
    ) -> Result<Vec<entity::ledger_entries::Model>> {
        let entries = entity::ledger_entries::Entity::find()
            .filter(entity::ledger_entries::Column::AccountId.eq(account_id))
            .order_by_desc(entity::ledger_entries::Column::CreatedAt)
            .order_by_desc(entity::ledger_entries::Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?;
        Ok(entries)
    }

    pub async fn entries_for_reference(
        &self,
        reference: LedgerReference,
    ) -> Result<Vec<entity::ledger_entries::Model>> {
        let entries = entity::ledger_entries::Entity::find()
            .filter(entity::ledger_entries::Column::ReferenceType.eq(reference.kind))
            .filter(entity::ledger_entries::Column::ReferenceId.eq(reference.id))
            .order_by_asc(entity::ledger_entries::Column::Id)
            .all(&self.db)
            .await?;
        Ok(entries)
    }
}
