use crate::{
    error::{ApiError, Result},
    models::coupon_ext::CouponExt,
};
use entity::sea_orm_active_enums::CouponInstanceStatus;
use sea_orm::{entity::*, query::*, DatabaseConnection, DatabaseTransaction};
use time::OffsetDateTime;
use tracing::{debug, instrument};
use uuid::Uuid;

/// A reserved coupon instance together with its definition
#[derive(Debug, Clone)]
pub struct CouponReservation {
    pub instance: entity::coupon_instances::Model,
    pub coupon: entity::coupons::Model,
}

/// Coupon instance state machine: AVAILABLE -> RESERVED -> USED, or back to AVAILABLE.
/// All transitions run inside the caller's transaction with the instance row locked.
pub struct CouponService {
    db: DatabaseConnection,
}

impl CouponService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn lock_instance(
        &self,
        instance_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<entity::coupon_instances::Model> {
        entity::coupon_instances::Entity::find_by_id(instance_id)
            .lock_exclusive()
            .one(txn)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Coupon {} not found", instance_id)))
    }

    async fn find_coupon(
        &self,
        coupon_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<entity::coupons::Model> {
        entity::coupons::Entity::find_by_id(coupon_id)
            .one(txn)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Coupon definition {} not found", coupon_id)))
    }

    /// Read-only eligibility check used before the gateway is called
    pub async fn validate_in_txn(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
        order_amount: i64,
        txn: &DatabaseTransaction,
    ) -> Result<CouponReservation> {
        let instance = entity::coupon_instances::Entity::find_by_id(instance_id)
            .one(txn)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("Coupon {} not found", instance_id)))?;

        if instance.user_id != user_id {
            return Err(ApiError::Forbidden(format!(
                "Coupon {} belongs to another user",
                instance_id
            )));
        }
        if instance.status == CouponInstanceStatus::Used {
            return Err(ApiError::InvalidState(format!(
                "Coupon {} has already been used",
                instance_id
            )));
        }

        let coupon = self.find_coupon(instance.coupon_id, txn).await?;
        coupon.check_eligibility(order_amount, OffsetDateTime::now_utc())?;

        Ok(CouponReservation { instance, coupon })
    }

    /// AVAILABLE -> RESERVED for `order_number`. Reserving again for the same
    /// order is a no-op; an instance held by another order is InvalidState.
    #[instrument(skip(self, txn))]
    pub async fn reserve_in_txn(
        &self,
        instance_id: Uuid,
        user_id: Uuid,
        order_number: &str,
        order_amount: i64,
        txn: &DatabaseTransaction,
    ) -> Result<CouponReservation> {
        let instance = self.lock_instance(instance_id, txn).await?;

        if instance.user_id != user_id {
            return Err(ApiError::Forbidden(format!(
                "Coupon {} belongs to another user",
                instance_id
            )));
        }

        match instance.status {
            CouponInstanceStatus::Used => {
                return Err(ApiError::InvalidState(format!(
                    "Coupon {} has already been used",
                    instance_id
                )));
            }
            CouponInstanceStatus::Reserved => {
                if instance.reserved_order_number.as_deref() != Some(order_number) {
                    return Err(ApiError::InvalidState(format!(
                        "Coupon {} is reserved by another order",
                        instance_id
                    )));
                }
            }
            CouponInstanceStatus::Available => {}
        }

        let coupon = self.find_coupon(instance.coupon_id, txn).await?;
        coupon.check_eligibility(order_amount, OffsetDateTime::now_utc())?;

        if instance.status == CouponInstanceStatus::Reserved {
            return Ok(CouponReservation { instance, coupon });
        }

        let now = OffsetDateTime::now_utc();
        let mut instance_active: entity::coupon_instances::ActiveModel = instance.into();
        instance_active.status = Set(CouponInstanceStatus::Reserved);
        instance_active.reserved_order_number = Set(Some(order_number.to_string()));
        instance_active.reserved_at = Set(Some(now));
        instance_active.updated_at = Set(now);
        let instance = instance_active.update(txn).await?;

        debug!("Reserved coupon {} for order {}", instance_id, order_number);

        Ok(CouponReservation { instance, coupon })
    }

    /// RESERVED -> USED; already USED is a no-op
    #[instrument(skip(self, txn))]
    pub async fn commit_in_txn(
        &self,
        instance_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<entity::coupon_instances::Model> {
        let instance = self.lock_instance(instance_id, txn).await?;

        match instance.status {
            CouponInstanceStatus::Used => Ok(instance),
            CouponInstanceStatus::Available => Err(ApiError::InvalidState(format!(
                "Coupon {} must be reserved before use",
                instance_id
            ))),
            CouponInstanceStatus::Reserved => {
                let now = OffsetDateTime::now_utc();
                let mut instance_active: entity::coupon_instances::ActiveModel = instance.into();
                instance_active.status = Set(CouponInstanceStatus::Used);
                instance_active.used_at = Set(Some(now));
                instance_active.updated_at = Set(now);
                Ok(instance_active.update(txn).await?)
            }
        }
    }

    /// RESERVED -> AVAILABLE; already AVAILABLE is a no-op
    #[instrument(skip(self, txn))]
    pub async fn release_in_txn(
        &self,
        instance_id: Uuid,
        txn: &DatabaseTransaction,
    ) -> Result<entity::coupon_instances::Model> {
        let instance = self.lock_instance(instance_id, txn).await?;

        match instance.status {
            CouponInstanceStatus::Available => Ok(instance),
            CouponInstanceStatus::Used => Err(ApiError::InvalidState(format!(
                "Coupon {} has already been used",
                instance_id
            ))),
            CouponInstanceStatus::Reserved => {
                let mut instance_active: entity::coupon_instances::ActiveModel = instance.into();
                instance_active.status = Set(CouponInstanceStatus::Available);
                instance_active.reserved_order_number = Set(None);
                instance_active.reserved_at = Set(None);
                instance_active.updated_at = Set(OffsetDateTime::now_utc());
                Ok(instance_active.update(txn).await?)
            }
        }
    }

    pub async fn find_instance(
        &self,
        instance_id: Uuid,
    ) -> Result<Option<entity::coupon_instances::Model>> {
        let instance = entity::coupon_instances::Entity::find_by_id(instance_id)
            .one(&self.db)
            .await?;
        Ok(instance)
    }
}
