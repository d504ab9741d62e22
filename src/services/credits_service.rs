use crate::{
    config::WalletConfig,
    error::{ApiError, Result},
    models::{
        credit_lot_ext::CreditLotExt,
        credits::{
            AdminAdjustResult, CreditBalanceInfo, CreditLotInfo, LedgerEntryInfo,
            WalletReconciliation,
        },
    },
    services::{
        credit_lot_service::{CreditLotService, LotDraw, NewLot, RestoreOutcome},
        ledger_service::{LedgerReference, LedgerService},
    },
};
use entity::sea_orm_active_enums::{LedgerEntryType, LotSource, LotType};
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use time::OffsetDateTime;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Outcome of a debit against the wallet
#[derive(Debug, Clone)]
pub struct CreditDebit {
    pub entry: entity::ledger_entries::Model,
    pub draws: Vec<LotDraw>,
}

/// Outcome of restoring spent credit on refund
#[derive(Debug, Clone)]
pub struct CreditRestore {
    pub entry: entity::ledger_entries::Model,
    pub outcome: RestoreOutcome,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpirySummary {
    pub lots_expired: u64,
    pub credits_expired: i64,
}

/// Wallet operations: balance reads, debits, grants, refunds and expiry.
/// Keeps lots and ledger in step so Balance.amount always equals the ledger sum.
pub struct CreditsService {
    db: DatabaseConnection,
    wallet: WalletConfig,
    ledger: LedgerService,
    lots: CreditLotService,
}

impl CreditsService {
    pub fn new(db: DatabaseConnection, wallet: WalletConfig) -> Self {
        Self {
            ledger: LedgerService::new(db.clone()),
            lots: CreditLotService::new(db.clone(), wallet.clone()),
            db,
            wallet,
        }
    }

    pub fn ledger(&self) -> &LedgerService {
        &self.ledger
    }

    /// Balance with its spendable lot breakdown
    #[instrument(skip(self))]
    pub async fn get_credit_balance(&self, user_id: Uuid) -> Result<CreditBalanceInfo> {
        let balance = self.ledger.get_balance(user_id).await?;
        let now = OffsetDateTime::now_utc();

        let lots = match self.ledger.find_account(user_id).await? {
            Some(account) => self.lots.spendable_lots(account.id, now).await?,
            None => Vec::new(),
        };

        let free_available = lots
            .iter()
            .filter(|l| l.lot_type == LotType::Free)
            .map(|l| l.qty_remain)
            .sum();
        let paid_available = lots
            .iter()
            .filter(|l| l.lot_type == LotType::Paid)
            .map(|l| l.qty_remain)
            .sum();

        Ok(CreditBalanceInfo {
            user_id,
            amount: balance.amount,
            frozen_amount: balance.frozen_amount,
            free_available,
            paid_available,
            lots: lots.into_iter().map(CreditLotInfo::from).collect(),
        })
    }

    /// Spendable amount only
    pub async fn get_balance_amount(&self, user_id: Uuid) -> Result<i64> {
        Ok(self.ledger.get_balance(user_id).await?.amount)
    }

    /// Unexpired credit a user could spend right now, without locking anything
    pub async fn available_credit_in_txn(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
        txn: &DatabaseTransaction,
    ) -> Result<i64> {
        match self.ledger.find_account_in_txn(user_id, txn).await? {
            Some(account) => self.lots.available_in_txn(account.id, now, txn).await,
            None => Ok(0),
        }
    }

    /// Spend `amount` credits for an order: consume lots, write one DEBIT entry,
    /// and remember which lots were drawn so a refund can put them back.
    #[instrument(skip(self, txn))]
    pub async fn debit_in_txn(
        &self,
        user_id: Uuid,
        amount: i64,
        order_id: Uuid,
        order_number: &str,
        txn: &DatabaseTransaction,
    ) -> Result<CreditDebit> {
        let now = OffsetDateTime::now_utc();
        let account = self.ledger.ensure_account_in_txn(user_id, txn).await?;
        self.ledger.lock_balance_in_txn(account.id, txn).await?;

        let draws = self.lots.consume_in_txn(account.id, amount, now, txn).await?;
        let entry = self
            .ledger
            .apply_delta_in_txn(
                account.id,
                -amount,
                LedgerEntryType::Debit,
                &format!("Payment for order {}", order_number),
                Some(LedgerReference::order(order_id)),
                txn,
            )
            .await?;
        self.lots
            .record_consumptions_in_txn(&draws, entry.id, Some(order_id), txn)
            .await?;

        Ok(CreditDebit { entry, draws })
    }

    /// Issue the lots of one credit-increasing event and write a single entry for their sum
    #[instrument(skip(self, new_lots, note, txn))]
    pub async fn issue_in_txn(
        &self,
        user_id: Uuid,
        new_lots: Vec<NewLot>,
        entry_type: LedgerEntryType,
        note: &str,
        reference: Option<LedgerReference>,
        txn: &DatabaseTransaction,
    ) -> Result<entity::ledger_entries::Model> {
        let total: i64 = new_lots.iter().map(|l| l.quantity).sum();
        if total <= 0 {
            return Err(ApiError::BadRequest(format!(
                "Credit grant must be positive, got {}",
                total
            )));
        }

        let account = self.ledger.ensure_account_in_txn(user_id, txn).await?;
        self.ledger.lock_balance_in_txn(account.id, txn).await?;

        for new_lot in new_lots.into_iter().filter(|l| l.quantity > 0) {
            self.lots.issue_in_txn(account.id, new_lot, txn).await?;
        }

        self.ledger
            .apply_delta_in_txn(account.id, total, entry_type, note, reference, txn)
            .await
    }

    /// Lots a credit package line produces: PAID base and FREE bonus
    pub fn package_lots(&self, base: i64, bonus: i64, order_line_id: Uuid) -> Vec<NewLot> {
        let now = OffsetDateTime::now_utc();
        let mut lots = vec![NewLot {
            lot_type: LotType::Paid,
            source: LotSource::Purchase,
            quantity: base,
            expires_at: self
                .wallet
                .purchase_lot_expiry_days
                .map(|days| now + time::Duration::days(days)),
            order_line_id: Some(order_line_id),
        }];
        if bonus > 0 {
            lots.push(NewLot {
                lot_type: LotType::Free,
                source: LotSource::Bonus,
                quantity: bonus,
                expires_at: self
                    .wallet
                    .bonus_lot_expiry_days
                    .map(|days| now + time::Duration::days(days)),
                order_line_id: Some(order_line_id),
            });
        }
        lots
    }

    /// Give back credit spent on an order, newest draw first, as one REFUND entry
    #[instrument(skip(self, txn))]
    pub async fn restore_for_order_in_txn(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        amount: i64,
        txn: &DatabaseTransaction,
    ) -> Result<Option<CreditRestore>> {
        if amount <= 0 {
            return Ok(None);
        }

        let now = OffsetDateTime::now_utc();
        let account = self.ledger.ensure_account_in_txn(user_id, txn).await?;
        self.ledger.lock_balance_in_txn(account.id, txn).await?;

        let draws = self.lots.consumptions_for_order_in_txn(order_id, txn).await?;
        let outcome = self
            .lots
            .restore_in_txn(account.id, amount, &draws, now, txn)
            .await?;

        let entry = self
            .ledger
            .apply_delta_in_txn(
                account.id,
                amount,
                LedgerEntryType::Refund,
                "Refund of spent credit",
                Some(LedgerReference::order(order_id)),
                txn,
            )
            .await?;

        Ok(Some(CreditRestore { entry, outcome }))
    }

    /// Take back lots that an order issued. Only untouched lots can be revoked.
    #[instrument(skip(self, line_ids, txn))]
    pub async fn revoke_issued_lots_in_txn(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        line_ids: Vec<Uuid>,
        txn: &DatabaseTransaction,
    ) -> Result<i64> {
        let account = self.ledger.ensure_account_in_txn(user_id, txn).await?;
        self.ledger.lock_balance_in_txn(account.id, txn).await?;

        let issued = self.lots.lots_for_lines_in_txn(line_ids, txn).await?;
        if let Some(spent) = issued.iter().find(|l| l.qty_remain != l.qty_total) {
            return Err(ApiError::InvalidState(format!(
                "Credit lot {} from order {} is partly spent ({} of {} left)",
                spent.id, order_id, spent.qty_remain, spent.qty_total
            )));
        }

        let mut revoked = 0;
        for lot in issued {
            revoked += self.lots.drain_lot_in_txn(lot, txn).await?;
        }

        if revoked > 0 {
            self.ledger
                .apply_delta_in_txn(
                    account.id,
                    -revoked,
                    LedgerEntryType::Refund,
                    "Revoked credit package",
                    Some(LedgerReference::order(order_id)),
                    txn,
                )
                .await?;
        }

        Ok(revoked)
    }

    /// Admin grant (positive) or deduction (negative)
    #[instrument(skip(self, reason))]
    pub async fn admin_adjust(
        &self,
        target_user_id: Uuid,
        amount: i64,
        admin_user_id: Uuid,
        reason: &str,
    ) -> Result<AdminAdjustResult> {
        if amount == 0 {
            return Err(ApiError::BadRequest(
                "Adjustment amount must not be zero".to_string(),
            ));
        }

        let txn = self.db.begin().await?;
        let note = format!("Admin adjustment by {}: {}", admin_user_id, reason);

        let entry = if amount > 0 {
            self.issue_in_txn(
                target_user_id,
                vec![NewLot {
                    lot_type: LotType::Free,
                    source: LotSource::Admin,
                    quantity: amount,
                    expires_at: None,
                    order_line_id: None,
                }],
                LedgerEntryType::AdminAdjust,
                &note,
                Some(LedgerReference::admin(admin_user_id)),
                &txn,
            )
            .await?
        } else {
            let now = OffsetDateTime::now_utc();
            let account = self.ledger.ensure_account_in_txn(target_user_id, &txn).await?;
            self.ledger.lock_balance_in_txn(account.id, &txn).await?;

            let draws = self
                .lots
                .consume_in_txn(account.id, -amount, now, &txn)
                .await?;
            let entry = self
                .ledger
                .apply_delta_in_txn(
                    account.id,
                    amount,
                    LedgerEntryType::AdminAdjust,
                    &note,
                    Some(LedgerReference::admin(admin_user_id)),
                    &txn,
                )
                .await?;
            self.lots
                .record_consumptions_in_txn(&draws, entry.id, None, &txn)
                .await?;
            entry
        };

        txn.commit().await?;

        info!(
            "Admin credit adjustment: target={}, admin={}, amount={}, balance_after={}",
            target_user_id, admin_user_id, amount, entry.balance_after
        );

        Ok(AdminAdjustResult {
            target_user_id,
            amount,
            balance_after: entry.balance_after,
        })
    }

    /// Zero every lot past its expiry and write one EXPIRE entry per lot.
    /// Each account is swept in its own transaction, balance locked before lots.
    #[instrument(skip(self))]
    pub async fn expire_lots(&self, now: OffsetDateTime) -> Result<ExpirySummary> {
        let account_ids = self.lots.accounts_with_expired_lots(now).await?;

        let mut summary = ExpirySummary::default();
        for account_id in account_ids {
            let txn = self.db.begin().await?;
            self.ledger.lock_balance_in_txn(account_id, &txn).await?;
            let lots = self.lots.lock_expired_lots_in_txn(account_id, now, &txn).await?;

            for lot in lots {
                if !lot.is_expired(now) {
                    continue;
                }
                let lot_id = lot.id;
                let drained = self.lots.drain_lot_in_txn(lot, &txn).await?;
                if drained == 0 {
                    continue;
                }

                self.ledger
                    .apply_delta_in_txn(
                        account_id,
                        -drained,
                        LedgerEntryType::Expire,
                        "Credit lot expired",
                        Some(LedgerReference::lot(lot_id)),
                        &txn,
                    )
                    .await?;

                summary.lots_expired += 1;
                summary.credits_expired += drained;
            }

            txn.commit().await?;
        }

        if summary.lots_expired > 0 {
            info!(
                "Expired {} credit lots holding {} credits",
                summary.lots_expired, summary.credits_expired
            );
        }

        Ok(summary)
    }

    /// Newest ledger entries of a user
    pub async fn list_ledger(&self, user_id: Uuid, limit: u64) -> Result<Vec<LedgerEntryInfo>> {
        let Some(account) = self.ledger.find_account(user_id).await? else {
            return Ok(Vec::new());
        };

        let entries = self.ledger.list_entries(account.id, limit).await?;
        Ok(entries.into_iter().map(LedgerEntryInfo::from).collect())
    }

    /// Compare Balance.amount with the ledger sum and the lots
    #[instrument(skip(self))]
    pub async fn reconcile(&self, user_id: Uuid) -> Result<WalletReconciliation> {
        let account = self
            .ledger
            .find_account(user_id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("No wallet for user {}", user_id)))?;

        let balance_amount = self.ledger.get_balance(user_id).await?.amount;
        let ledger_sum = self.ledger.ledger_sum(account.id).await?;
        let lot_remaining = self.lots.remaining_total(account.id).await?;
        let consistent = balance_amount == ledger_sum && balance_amount == lot_remaining;

        if !consistent {
            warn!(
                alert = true,
                "Wallet drift for user {}: balance={}, ledger={}, lots={}",
                user_id,
                balance_amount,
                ledger_sum,
                lot_remaining
            );
        }

        Ok(WalletReconciliation {
            user_id,
            balance_amount,
            ledger_sum,
            lot_remaining,
            consistent,
        })
    }
}
