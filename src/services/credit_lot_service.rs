use crate::{
    config::WalletConfig,
    error::{ApiError, Result},
    models::credit_lot_ext::CreditLotExt,
};
use entity::sea_orm_active_enums::{LotSource, LotType};
use sea_orm::{entity::*, query::*, DatabaseConnection, DatabaseTransaction};
use time::OffsetDateTime;
use tracing::{debug, info, instrument};
use uuid::Uuid;

/// Quantity taken from (or put back into) a single lot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LotDraw {
    pub lot_id: Uuid,
    pub amount: i64,
}

/// Parameters of a freshly issued lot
#[derive(Debug, Clone)]
pub struct NewLot {
    pub lot_type: LotType,
    pub source: LotSource,
    pub quantity: i64,
    pub expires_at: Option<OffsetDateTime>,
    pub order_line_id: Option<Uuid>,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreOutcome {
    /// Amounts put back into existing lots, in restoration order
    pub restored: Vec<LotDraw>,
    /// New FREE lot holding what existing lots could not absorb
    pub overflow_lot: Option<entity::credit_lots::Model>,
}

impl RestoreOutcome {
    pub fn total(&self) -> i64 {
        self.restored.iter().map(|d| d.amount).sum::<i64>()
            + self.overflow_lot.as_ref().map_or(0, |lot| lot.qty_total)
    }
}

/// Decide which lots a consumption draws from.
///
/// FREE lots go before PAID lots; within a type the oldest lot goes first.
/// Expired and empty lots are ignored. Nothing is planned unless the whole
/// quantity can be covered.
pub fn plan_consumption(
    lots: &[entity::credit_lots::Model],
    quantity: i64,
    now: OffsetDateTime,
) -> Result<Vec<LotDraw>> {
    if quantity <= 0 {
        return Err(ApiError::BadRequest(format!(
            "Consumption quantity must be positive, got {}",
            quantity
        )));
    }

    let mut spendable: Vec<&entity::credit_lots::Model> =
        lots.iter().filter(|lot| lot.is_spendable(now)).collect();
    spendable.sort_by(|a, b| {
        a.consumption_rank()
            .cmp(&b.consumption_rank())
            .then(a.created_at.cmp(&b.created_at))
            .then(a.id.cmp(&b.id))
    });

    let available: i64 = spendable.iter().map(|lot| lot.qty_remain).sum();
    if available < quantity {
        return Err(ApiError::InsufficientBalance(format!(
            "Requested {} credits, only {} available",
            quantity, available
        )));
    }

    let mut remaining = quantity;
    let mut draws = Vec::new();
    for lot in spendable {
        if remaining == 0 {
            break;
        }
        let take = remaining.min(lot.qty_remain);
        draws.push(LotDraw {
            lot_id: lot.id,
            amount: take,
        });
        remaining -= take;
    }

    Ok(draws)
}

/// Decide how a refund of `quantity` is spread back over previously drawn lots.
///
/// `draws` is in consumption order and is walked newest first. Each lot takes
/// back at most what was drawn from it and at most its free capacity; expired
/// lots take nothing. Returns the per-lot restorations and the leftover.
pub fn plan_restore(
    draws: &[(LotDraw, entity::credit_lots::Model)],
    quantity: i64,
    now: OffsetDateTime,
) -> (Vec<LotDraw>, i64) {
    let mut remaining = quantity.max(0);
    let mut restored: Vec<LotDraw> = Vec::new();

    for (draw, lot) in draws.iter().rev() {
        if remaining == 0 {
            break;
        }
        if lot.is_expired(now) {
            continue;
        }

        // A lot may appear in several draws; count what we already gave back
        let already: i64 = restored
            .iter()
            .filter(|r| r.lot_id == lot.id)
            .map(|r| r.amount)
            .sum();
        let capacity = lot.restorable_capacity() - already;
        let give = remaining.min(draw.amount).min(capacity);
        if give > 0 {
            restored.push(LotDraw {
                lot_id: lot.id,
                amount: give,
            });
            remaining -= give;
        }
    }

    (restored, remaining)
}

/// Credit lots ("cookie batches")
pub struct CreditLotService {
    db: DatabaseConnection,
    wallet: WalletConfig,
}

impl CreditLotService {
    pub fn new(db: DatabaseConnection, wallet: WalletConfig) -> Self {
        Self { db, wallet }
    }

    /// Every lot of an account that still holds credit, locked
    async fn lock_lots_with_remaining(
        &self,
        account_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<Vec<entity::credit_lots::Model>> {
        let lots = entity::credit_lots::Entity::find()
            .filter(entity::credit_lots::Column::AccountId.eq(account_id))
            .filter(entity::credit_lots::Column::QtyRemain.gt(0))
            .order_by_asc(entity::credit_lots::Column::CreatedAt)
            .order_by_asc(entity::credit_lots::Column::Id)
            .lock_exclusive()
            .all(txn)
            .await?;
        Ok(lots)
    }

    /// Unexpired lots with credit left, in consumption order
    pub async fn spendable_lots(
        &self,
        account_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Vec<entity::credit_lots::Model>> {
        let lots = entity::credit_lots::Entity::find()
            .filter(entity::credit_lots::Column::AccountId.eq(account_id))
            .filter(entity::credit_lots::Column::QtyRemain.gt(0))
            .order_by_asc(entity::credit_lots::Column::CreatedAt)
            .order_by_asc(entity::credit_lots::Column::Id)
            .all(&self.db)
            .await?;

        let mut spendable: Vec<_> = lots.into_iter().filter(|l| l.is_spendable(now)).collect();
        spendable.sort_by_key(|lot| lot.consumption_rank());
        Ok(spendable)
    }

    /// Read-only sum of unexpired remaining credit
    pub async fn available_in_txn(
        &self,
        account_id: Uuid,
        now: OffsetDateTime,
        txn: &DatabaseTransaction,
    ) -> Result<i64> {
        let lots = entity::credit_lots::Entity::find()
            .filter(entity::credit_lots::Column::AccountId.eq(account_id))
            .filter(entity::credit_lots::Column::QtyRemain.gt(0))
            .all(txn)
            .await?;

        Ok(lots
            .iter()
            .filter(|lot| lot.is_spendable(now))
            .map(|lot| lot.qty_remain)
            .sum())
    }

    /// Sum of qty_remain over every lot, expired or not
    pub async fn remaining_total(&self, account_id: Uuid) -> Result<i64> {
        let remains: Vec<i64> = entity::credit_lots::Entity::find()
            .select_only()
            .column(entity::credit_lots::Column::QtyRemain)
            .filter(entity::credit_lots::Column::AccountId.eq(account_id))
            .into_tuple()
            .all(&self.db)
            .await?;
        Ok(remains.iter().sum())
    }

    /// Take `quantity` credits from the account's lots.
    /// Must run after the account balance is locked in the same transaction.
    #[instrument(skip(self, txn))]
    pub async fn consume_in_txn(
        &self,
        account_id: Uuid,
        quantity: i64,
        now: OffsetDateTime,
        txn: &DatabaseTransaction,
    ) -> Result<Vec<LotDraw>> {
        let lots = self.lock_lots_with_remaining(account_id, txn).await?;
        let draws = plan_consumption(&lots, quantity, now)?;

        for draw in &draws {
            if let Some(lot) = lots.iter().find(|l| l.id == draw.lot_id) {
                let remain = lot.qty_remain - draw.amount;
                let mut lot_active: entity::credit_lots::ActiveModel = lot.clone().into();
                lot_active.qty_remain = Set(remain);
                lot_active.updated_at = Set(now);
                lot_active.update(txn).await?;
            }
        }

        debug!(
            "Consumed {} credits from {} lots of account {}",
            quantity,
            draws.len(),
            account_id
        );

        Ok(draws)
    }

    /// Put `quantity` credits back, newest draw first. Whatever the drawn lots
    /// cannot absorb becomes a new long-lived FREE lot.
    #[instrument(skip(self, draws, txn))]
    pub async fn restore_in_txn(
        &self,
        account_id: Uuid,
        quantity: i64,
        draws: &[LotDraw],
        now: OffsetDateTime,
        txn: &DatabaseTransaction,
    ) -> Result<RestoreOutcome> {
        if quantity <= 0 {
            return Ok(RestoreOutcome::default());
        }

        let lot_ids: Vec<Uuid> = draws.iter().map(|d| d.lot_id).collect();
        let lots = if lot_ids.is_empty() {
            Vec::new()
        } else {
            entity::credit_lots::Entity::find()
                .filter(entity::credit_lots::Column::Id.is_in(lot_ids))
                .filter(entity::credit_lots::Column::AccountId.eq(account_id))
                .lock_exclusive()
                .all(txn)
                .await?
        };

        // Lots that no longer exist are treated as fully exhausted capacity
        let paired: Vec<(LotDraw, entity::credit_lots::Model)> = draws
            .iter()
            .filter_map(|d| {
                lots.iter()
                    .find(|l| l.id == d.lot_id)
                    .map(|l| (*d, l.clone()))
            })
            .collect();

        let (restored, leftover) = plan_restore(&paired, quantity, now);

        for lot in &lots {
            let give: i64 = restored
                .iter()
                .filter(|r| r.lot_id == lot.id)
                .map(|r| r.amount)
                .sum();
            if give == 0 {
                continue;
            }
            let mut lot_active: entity::credit_lots::ActiveModel = lot.clone().into();
            lot_active.qty_remain = Set(lot.qty_remain + give);
            lot_active.updated_at = Set(now);
            lot_active.update(txn).await?;
        }

        let overflow_lot = if leftover > 0 {
            let expires_at = now + time::Duration::days(self.wallet.refund_lot_expiry_days);
            let lot = self
                .issue_in_txn(
                    account_id,
                    NewLot {
                        lot_type: LotType::Free,
                        source: LotSource::Refund,
                        quantity: leftover,
                        expires_at: Some(expires_at),
                        order_line_id: None,
                    },
                    txn,
                )
                .await?;
            Some(lot)
        } else {
            None
        };

        Ok(RestoreOutcome {
            restored,
            overflow_lot,
        })
    }

    /// Create a new lot holding `quantity` credits
    pub async fn issue_in_txn(
        &self,
        account_id: Uuid,
        new_lot: NewLot,
        txn: &DatabaseTransaction,
    ) -> Result<entity::credit_lots::Model> {
        if new_lot.quantity <= 0 {
            return Err(ApiError::BadRequest(format!(
                "Lot quantity must be positive, got {}",
                new_lot.quantity
            )));
        }

        let now = OffsetDateTime::now_utc();
        let lot = entity::credit_lots::ActiveModel {
            id: Set(Uuid::now_v7()),
            account_id: Set(account_id),
            lot_type: Set(new_lot.lot_type),
            source: Set(new_lot.source),
            qty_total: Set(new_lot.quantity),
            qty_remain: Set(new_lot.quantity),
            expires_at: Set(new_lot.expires_at),
            order_line_id: Set(new_lot.order_line_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(txn)
        .await?;

        info!(
            "Issued credit lot: account={}, lot={}, type={:?}, source={:?}, qty={}",
            account_id, lot.id, lot.lot_type, lot.source, lot.qty_total
        );

        Ok(lot)
    }

    /// Link each draw to the ledger entry that debited it
    pub async fn record_consumptions_in_txn(
        &self,
        draws: &[LotDraw],
        ledger_entry_id: Uuid,
        order_id: Option<Uuid>,
        txn: &DatabaseTransaction,
    ) -> Result<()> {
        if draws.is_empty() {
            return Ok(());
        }

        let now = OffsetDateTime::now_utc();
        let rows = draws
            .iter()
            .map(|draw| entity::credit_lot_consumptions::ActiveModel {
                id: Set(Uuid::now_v7()),
                lot_id: Set(draw.lot_id),
                ledger_entry_id: Set(ledger_entry_id),
                order_id: Set(order_id),
                amount: Set(draw.amount),
                created_at: Set(now),
            });

        entity::credit_lot_consumptions::Entity::insert_many(rows)
            .exec_without_returning(txn)
            .await?;
        Ok(())
    }

    /// Draws recorded for an order, in consumption order
    pub async fn consumptions_for_order_in_txn(
        &self,
        order_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<Vec<LotDraw>> {
        let rows = entity::credit_lot_consumptions::Entity::find()
            .filter(entity::credit_lot_consumptions::Column::OrderId.eq(order_id))
            .order_by_asc(entity::credit_lot_consumptions::Column::Id)
            .all(txn)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| LotDraw {
                lot_id: row.lot_id,
                amount: row.amount,
            })
            .collect())
    }

    /// Lots issued for the given order lines, locked
    pub async fn lots_for_lines_in_txn(
        &self,
        line_ids: Vec<Uuid>,
        txn: &DatabaseTransaction,
    ) -> Result<Vec<entity::credit_lots::Model>> {
        if line_ids.is_empty() {
            return Ok(Vec::new());
        }

        let lots = entity::credit_lots::Entity::find()
            .filter(entity::credit_lots::Column::OrderLineId.is_in(line_ids))
            .order_by_asc(entity::credit_lots::Column::Id)
            .lock_exclusive()
            .all(txn)
            .await?;
        Ok(lots)
    }

    /// Empty a lot completely, returning how much it held
    pub async fn drain_lot_in_txn(
        &self,
        lot: entity::credit_lots::Model,
        txn: &DatabaseTransaction,
    ) -> Result<i64> {
        let drained = lot.qty_remain;
        if drained == 0 {
            return Ok(0);
        }

        let mut lot_active: entity::credit_lots::ActiveModel = lot.into();
        lot_active.qty_remain = Set(0);
        lot_active.updated_at = Set(OffsetDateTime::now_utc());
        lot_active.update(txn).await?;
        Ok(drained)
    }

    /// Accounts holding at least one expired lot with credit left. Takes no locks.
    pub async fn accounts_with_expired_lots(&self, now: OffsetDateTime) -> Result<Vec<Uuid>> {
        let account_ids: Vec<Uuid> = entity::credit_lots::Entity::find()
            .select_only()
            .column(entity::credit_lots::Column::AccountId)
            .filter(entity::credit_lots::Column::QtyRemain.gt(0))
            .filter(entity::credit_lots::Column::ExpiresAt.is_not_null())
            .filter(entity::credit_lots::Column::ExpiresAt.lte(now))
            .distinct()
            .order_by_asc(entity::credit_lots::Column::AccountId)
            .into_tuple()
            .all(&self.db)
            .await?;
        Ok(account_ids)
    }

    /// Expired lots of one account that still hold credit, locked.
    /// Must run after the account balance is locked in the same transaction.
    pub async fn lock_expired_lots_in_txn(
        &self,
        account_id: Uuid,
        now: OffsetDateTime,
        txn: &DatabaseTransaction,
    ) -> Result<Vec<entity::credit_lots::Model>> {
        let lots = entity::credit_lots::Entity::find()
            .filter(entity::credit_lots::Column::AccountId.eq(account_id))
            .filter(entity::credit_lots::Column::QtyRemain.gt(0))
            .filter(entity::credit_lots::Column::ExpiresAt.is_not_null())
            .filter(entity::credit_lots::Column::ExpiresAt.lte(now))
            .order_by_asc(entity::credit_lots::Column::Id)
            .lock_exclusive()
            .all(txn)
            .await?;
        Ok(lots)
    }
}
