use entity::sea_orm_active_enums::{LedgerEntryType, LotSource, LotType};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use super::common::SuccessResponse;

/// Spendable wallet state for one user
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreditBalanceInfo {
    pub user_id: Uuid,
    /// Balance.amount, equal to the signed sum of the ledger
    pub amount: i64,
    pub frozen_amount: i64,
    pub free_available: i64,
    pub paid_available: i64,
    pub lots: Vec<CreditLotInfo>,
}

pub type CreditBalanceResponse = SuccessResponse<CreditBalanceInfo>;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreditLotInfo {
    pub lot_id: Uuid,
    pub lot_type: LotType,
    pub source: LotSource,
    pub qty_total: i64,
    pub qty_remain: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl From<entity::credit_lots::Model> for CreditLotInfo {
    fn from(lot: entity::credit_lots::Model) -> Self {
        Self {
            lot_id: lot.id,
            lot_type: lot.lot_type,
            source: lot.source,
            qty_total: lot.qty_total,
            qty_remain: lot.qty_remain,
            expires_at: lot.expires_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntryInfo {
    pub id: Uuid,
    pub entry_type: LedgerEntryType,
    pub amount: i64,
    pub balance_after: i64,
    pub note: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<entity::ledger_entries::Model> for LedgerEntryInfo {
    fn from(entry: entity::ledger_entries::Model) -> Self {
        Self {
            id: entry.id,
            entry_type: entry.entry_type,
            amount: entry.amount,
            balance_after: entry.balance_after,
            note: entry.note,
            reference_type: entry.reference_type,
            reference_id: entry.reference_id,
            created_at: entry.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LedgerQuery {
    #[validate(range(min = 1, max = 200))]
    pub limit: Option<u64>,
}

/// Admin credit adjustment
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AdminAdjustRequest {
    pub target_user_id: Uuid,
    /// Positive grants, negative deducts
    pub amount: i64,
    #[validate(length(min = 1, max = 500))]
    pub reason: String,
}

#[derive(Debug, Serialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AdminAdjustResult {
    pub target_user_id: Uuid,
    pub amount: i64,
    pub balance_after: i64,
}

/// Cross-check of Balance.amount against the ledger and the lots
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WalletReconciliation {
    pub user_id: Uuid,
    pub balance_amount: i64,
    pub ledger_sum: i64,
    /// qty_remain summed over lots the expiry sweep has not zeroed yet
    pub lot_remaining: i64,
    pub consistent: bool,
}
