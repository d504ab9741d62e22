/// Extension methods for credit_lots entity
use entity::{credit_lots, sea_orm_active_enums::LotType};
use time::OffsetDateTime;

pub trait CreditLotExt {
    /// A lot past its expiry is excluded from every spendable read
    fn is_expired(&self, now: OffsetDateTime) -> bool;

    fn is_spendable(&self, now: OffsetDateTime) -> bool;

    /// How much a refund may put back into this lot
    fn restorable_capacity(&self) -> i64;

    /// Lower ranks are consumed first
    fn consumption_rank(&self) -> u8;
}

impl CreditLotExt for credit_lots::Model {
    fn is_expired(&self, now: OffsetDateTime) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    fn is_spendable(&self, now: OffsetDateTime) -> bool {
        self.qty_remain > 0 && !self.is_expired(now)
    }

    fn restorable_capacity(&self) -> i64 {
        self.qty_total - self.qty_remain
    }

    fn consumption_rank(&self) -> u8 {
        match self.lot_type {
            LotType::Free => 0,
            LotType::Paid => 1,
        }
    }
}
