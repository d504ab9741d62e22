use cookiepay::{config::LimitsConfig, services::DailyLimitService, ApiError};
use entity::sea_orm_active_enums::{
    ItemType, LedgerEntryType, LotType, OrderLineStatus, OrderStatus, PaymentStatus,
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::common::{confirm_request, item, new_order_number, seed_price, TestApp, PACKAGE_ID};

#[tokio::test]
async fn test_refund_returns_cash_and_credit() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.issue_lot(user_id, LotType::Paid, 100, None).await;
    app.issue_lot(user_id, LotType::Free, 50, None).await;
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;

    let request = confirm_request(&new_order_number(), 880, 120, vec![item(ItemType::Course, course)]);
    let paid = app
        .payments
        .confirm_payment(request.clone(), user_id, Default::default())
        .await
        .unwrap();
    assert_eq!(app.balance(user_id).await, 30);

    let refund = app
        .payments
        .refund_order(paid.order_id, user_id, "requested")
        .await
        .unwrap();
    assert_eq!(refund.cash_refunded, 880);
    assert_eq!(refund.credit_restored, 120);
    assert_eq!(refund.credit_revoked, 0);

    // Both lots are back to where they were
    let info = app.credits.get_credit_balance(user_id).await.unwrap();
    assert_eq!(info.amount, 150);
    assert_eq!(info.free_available, 50);
    assert_eq!(info.paid_available, 100);
    assert_eq!(info.lots.len(), 2);

    let entries = app.credits.list_ledger(user_id, 10).await.unwrap();
    assert_eq!(entries[0].entry_type, LedgerEntryType::Refund);
    assert_eq!(entries[0].amount, 120);

    assert_eq!(app.gateway.cancels(), vec![(request.payment_key.clone(), 880)]);

    let (order, lines) = app
        .payments
        .orders()
        .find_by_number(&request.order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);
    assert!(lines.iter().all(|l| l.status == OrderLineStatus::Refunded));

    let payment = entity::payments::Entity::find()
        .filter(entity::payments::Column::PaymentKey.eq(request.payment_key.as_str()))
        .one(&app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payment.status, PaymentStatus::Cancelled);

    let aggregate = DailyLimitService::new(app.db.clone(), LimitsConfig::default())
        .get(user_id, OffsetDateTime::now_utc().date())
        .await
        .unwrap()
        .expect("spend was recorded");
    assert_eq!(aggregate.cash_total, 0);
    assert_eq!(aggregate.credit_total, 0);

    app.assert_consistent(user_id).await;
}

#[tokio::test]
async fn test_refund_is_only_for_paid_orders_of_the_owner() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;
    let paid = app
        .payments
        .confirm_payment(
            confirm_request(&new_order_number(), 1_000, 0, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await
        .unwrap();

    let err = app
        .payments
        .refund_order(paid.order_id, Uuid::new_v4(), "not mine")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)), "{err:?}");

    app.payments
        .refund_order(paid.order_id, user_id, "first")
        .await
        .unwrap();
    let err = app
        .payments
        .refund_order(paid.order_id, user_id, "second")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)), "{err:?}");
    assert_eq!(app.gateway.cancels().len(), 1);

    let err = app
        .payments
        .refund_order(Uuid::new_v4(), user_id, "missing")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn test_refund_of_untouched_package_revokes_its_credit() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let paid = app
        .payments
        .confirm_payment(
            confirm_request(
                &new_order_number(),
                1_000,
                0,
                vec![item(ItemType::CreditPackage, PACKAGE_ID)],
            ),
            user_id,
            Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(app.balance(user_id).await, 110);

    let refund = app
        .payments
        .refund_order(paid.order_id, user_id, "requested")
        .await
        .unwrap();

    assert_eq!(refund.credit_revoked, 110);
    assert_eq!(refund.cash_refunded, 1_000);
    assert_eq!(app.balance(user_id).await, 0);

    let entries = app.credits.list_ledger(user_id, 10).await.unwrap();
    assert_eq!(entries[0].entry_type, LedgerEntryType::Refund);
    assert_eq!(entries[0].amount, -110);
    app.assert_consistent(user_id).await;
}

#[tokio::test]
async fn test_refund_of_partly_spent_package_is_rejected() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let package = app
        .payments
        .confirm_payment(
            confirm_request(
                &new_order_number(),
                1_000,
                0,
                vec![item(ItemType::CreditPackage, PACKAGE_ID)],
            ),
            user_id,
            Default::default(),
        )
        .await
        .unwrap();

    // Spends the 10 bonus credits and 20 of the purchased ones
    let course = seed_price(&app.db, ItemType::Course, 30).await;
    app.payments
        .confirm_payment(
            confirm_request(&new_order_number(), 0, 30, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await
        .unwrap();

    let err = app
        .payments
        .refund_order(package.order_id, user_id, "requested")
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::InvalidState(_)), "{err:?}");
    assert_eq!(app.balance(user_id).await, 80);
    assert!(app.gateway.cancels().is_empty());
    app.assert_consistent(user_id).await;
}
