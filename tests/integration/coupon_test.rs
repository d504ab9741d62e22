use cookiepay::{services::CouponService, ApiError};
use entity::sea_orm_active_enums::{CouponInstanceStatus, DiscountType};
use sea_orm::{ActiveModelTrait, EntityTrait, Set, TransactionTrait};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::common::{seed_coupon, setup_test_db};

#[tokio::test]
async fn test_reserve_commit_lifecycle() {
    let db = setup_test_db().await;
    let coupons = CouponService::new(db.clone());
    let user_id = Uuid::new_v4();
    let seeded = seed_coupon(&db, user_id, DiscountType::Percentage, 10, None, 0).await;

    let txn = db.begin().await.unwrap();
    let reservation = coupons
        .reserve_in_txn(seeded.instance_id, user_id, "ORD-1", 1_000, &txn)
        .await
        .unwrap();
    assert_eq!(reservation.instance.status, CouponInstanceStatus::Reserved);
    assert_eq!(
        reservation.instance.reserved_order_number.as_deref(),
        Some("ORD-1")
    );

    let used = coupons.commit_in_txn(seeded.instance_id, &txn).await.unwrap();
    assert_eq!(used.status, CouponInstanceStatus::Used);
    assert!(used.used_at.is_some());

    // Committing twice is a no-op, releasing a used coupon is not allowed
    let again = coupons.commit_in_txn(seeded.instance_id, &txn).await.unwrap();
    assert_eq!(again.status, CouponInstanceStatus::Used);
    let err = coupons
        .release_in_txn(seeded.instance_id, &txn)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)), "{err:?}");
    txn.commit().await.unwrap();

    let txn = db.begin().await.unwrap();
    let err = coupons
        .reserve_in_txn(seeded.instance_id, user_id, "ORD-2", 1_000, &txn)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)), "{err:?}");
}

#[tokio::test]
async fn test_reservation_is_held_by_one_order() {
    let db = setup_test_db().await;
    let coupons = CouponService::new(db.clone());
    let user_id = Uuid::new_v4();
    let seeded = seed_coupon(&db, user_id, DiscountType::Fixed, 500, None, 0).await;

    let txn = db.begin().await.unwrap();
    coupons
        .reserve_in_txn(seeded.instance_id, user_id, "ORD-A", 2_000, &txn)
        .await
        .unwrap();

    let err = coupons
        .reserve_in_txn(seeded.instance_id, user_id, "ORD-B", 2_000, &txn)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)), "{err:?}");

    // Same order again is fine
    coupons
        .reserve_in_txn(seeded.instance_id, user_id, "ORD-A", 2_000, &txn)
        .await
        .unwrap();

    let released = coupons
        .release_in_txn(seeded.instance_id, &txn)
        .await
        .unwrap();
    assert_eq!(released.status, CouponInstanceStatus::Available);
    assert!(released.reserved_order_number.is_none());
    assert!(released.reserved_at.is_none());

    let released_again = coupons
        .release_in_txn(seeded.instance_id, &txn)
        .await
        .unwrap();
    assert_eq!(released_again.status, CouponInstanceStatus::Available);

    coupons
        .reserve_in_txn(seeded.instance_id, user_id, "ORD-B", 2_000, &txn)
        .await
        .unwrap();
    txn.commit().await.unwrap();
}

#[tokio::test]
async fn test_commit_requires_reservation() {
    let db = setup_test_db().await;
    let coupons = CouponService::new(db.clone());
    let user_id = Uuid::new_v4();
    let seeded = seed_coupon(&db, user_id, DiscountType::Fixed, 100, None, 0).await;

    let txn = db.begin().await.unwrap();
    let err = coupons
        .commit_in_txn(seeded.instance_id, &txn)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)), "{err:?}");
}

#[tokio::test]
async fn test_foreign_and_missing_coupons() {
    let db = setup_test_db().await;
    let coupons = CouponService::new(db.clone());
    let owner = Uuid::new_v4();
    let seeded = seed_coupon(&db, owner, DiscountType::Fixed, 100, None, 0).await;

    let txn = db.begin().await.unwrap();
    let err = coupons
        .reserve_in_txn(seeded.instance_id, Uuid::new_v4(), "ORD-1", 1_000, &txn)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)), "{err:?}");

    let err = coupons
        .validate_in_txn(Uuid::new_v4(), owner, 1_000, &txn)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn test_eligibility_rules() {
    let db = setup_test_db().await;
    let coupons = CouponService::new(db.clone());
    let user_id = Uuid::new_v4();

    let minimum = seed_coupon(&db, user_id, DiscountType::Fixed, 100, None, 5_000).await;
    let txn = db.begin().await.unwrap();
    let err = coupons
        .reserve_in_txn(minimum.instance_id, user_id, "ORD-1", 1_000, &txn)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)), "{err:?}");
    txn.rollback().await.unwrap();

    let expired = seed_coupon(&db, user_id, DiscountType::Fixed, 100, None, 0).await;
    let coupon = entity::coupons::Entity::find_by_id(expired.coupon_id)
        .one(&db)
        .await
        .unwrap()
        .unwrap();
    let mut coupon_active: entity::coupons::ActiveModel = coupon.into();
    coupon_active.valid_until = Set(Some(OffsetDateTime::now_utc() - Duration::days(1)));
    coupon_active.update(&db).await.unwrap();

    let txn = db.begin().await.unwrap();
    let err = coupons
        .validate_in_txn(expired.instance_id, user_id, 1_000, &txn)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)), "{err:?}");
    txn.rollback().await.unwrap();

    let instance = coupons
        .find_instance(expired.instance_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(instance.status, CouponInstanceStatus::Available);
}
