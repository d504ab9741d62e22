/// Extension methods for coupons entity
use crate::error::{ApiError, Result};
use entity::{coupons, sea_orm_active_enums::DiscountType};
use time::OffsetDateTime;

pub trait CouponExt {
    /// Discount for `base`, never more than `base`
    fn compute_discount(&self, base: i64) -> i64;

    /// Eligibility of this coupon for an order of `base` at `now`
    fn check_eligibility(&self, base: i64, now: OffsetDateTime) -> Result<()>;
}

impl CouponExt for coupons::Model {
    fn compute_discount(&self, base: i64) -> i64 {
        if base <= 0 {
            return 0;
        }

        let raw = match self.discount_type {
            // Floor so the platform never gives away a fraction of a unit
            DiscountType::Percentage => {
                let pct = self.discount_value.clamp(0, 100) as i128;
                let discount = (base as i128 * pct / 100) as i64;
                match self.max_discount {
                    Some(cap) => discount.min(cap),
                    None => discount,
                }
            }
            DiscountType::Fixed => self.discount_value.max(0),
        };

        raw.clamp(0, base)
    }

    fn check_eligibility(&self, base: i64, now: OffsetDateTime) -> Result<()> {
        if !self.active {
            return Err(ApiError::InvalidState(format!(
                "Coupon {} is no longer active",
                self.id
            )));
        }

        if self.valid_from.is_some_and(|from| now < from) {
            return Err(ApiError::InvalidState(format!(
                "Coupon {} is not valid yet",
                self.id
            )));
        }

        if self.valid_until.is_some_and(|until| now > until) {
            return Err(ApiError::InvalidState(format!(
                "Coupon {} has expired",
                self.id
            )));
        }

        if base < self.min_order_amount {
            return Err(ApiError::BadRequest(format!(
                "Order amount {} is below the coupon minimum of {}",
                base, self.min_order_amount
            )));
        }

        Ok(())
    }
}
