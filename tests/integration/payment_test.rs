use std::sync::Arc;

use futures::{FutureExt, StreamExt};

use cookiepay::{
    config::{LimitsConfig, WalletConfig},
    models::{events::PaymentEvent, payment::ConfirmPaymentRequest},
    services::{ledger_service::LedgerReference, CreditsService},
    ApiError,
};
use entity::sea_orm_active_enums::{
    CouponInstanceStatus, DiscountType, IdempotencyStatus, ItemType, LedgerEntryType, LotSource,
    LotType, OrderLineStatus, OrderStatus, PaymentStatus, PaymentType,
};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::common::{
    confirm_request, item, new_order_number, seed_coupon, seed_price, test_config,
    FailingPublisher, TestApp, PACKAGE_ID,
};

async fn payments_for(app: &TestApp, key: &str) -> Vec<entity::payments::Model> {
    entity::payments::Entity::find()
        .filter(entity::payments::Column::PaymentKey.eq(key))
        .all(&app.db)
        .await
        .unwrap()
}

async fn coupon_status(app: &TestApp, instance_id: Uuid) -> CouponInstanceStatus {
    entity::coupon_instances::Entity::find_by_id(instance_id)
        .one(&app.db)
        .await
        .unwrap()
        .unwrap()
        .status
}

#[tokio::test]
async fn test_credit_only_payment_skips_gateway() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.grant(user_id, 500).await;
    let course = seed_price(&app.db, ItemType::Course, 300).await;

    let request = confirm_request(&new_order_number(), 0, 300, vec![item(ItemType::Course, course)]);
    let result = app
        .payments
        .confirm_payment(request.clone(), user_id, Default::default())
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.amount, 300);
    assert_eq!(result.credit_amount, 300);
    assert_eq!(result.cash_amount, 0);
    assert_eq!(result.payment_type, PaymentType::Credit);
    assert_eq!(result.payment_method, "CREDIT");
    assert_eq!(app.gateway.confirm_calls(), 0);
    assert_eq!(app.balance(user_id).await, 200);

    let entries = app
        .credits
        .ledger()
        .entries_for_reference(LedgerReference::order(result.order_id))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, LedgerEntryType::Debit);
    assert_eq!(entries[0].amount, -300);

    let (order, lines) = app
        .payments
        .orders()
        .find_by_number(&request.order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.credit_spent, 300);
    assert!(lines.iter().all(|l| l.status == OrderLineStatus::Paid));

    app.assert_consistent(user_id).await;
}

#[tokio::test]
async fn test_retry_with_same_key_replays_without_charging_again() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;
    let request = confirm_request(&new_order_number(), 1_000, 0, vec![item(ItemType::Course, course)]);

    let first = app
        .payments
        .confirm_payment(request.clone(), user_id, Default::default())
        .await
        .unwrap();
    let second = app
        .payments
        .confirm_payment(request.clone(), user_id, Default::default())
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(first.payment_type, PaymentType::Cash);
    assert_eq!(first.payment_method, "CARD");
    assert_eq!(app.gateway.confirm_calls(), 1);
    assert_eq!(payments_for(&app, &request.payment_key).await.len(), 1);
}

#[tokio::test]
async fn test_gateway_failure_rolls_back_and_retry_succeeds() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;
    let coupon = seed_coupon(&app.db, user_id, DiscountType::Fixed, 200, None, 0).await;

    let mut request =
        confirm_request(&new_order_number(), 800, 0, vec![item(ItemType::Course, course)]);
    request.coupon_instance_id = Some(coupon.instance_id);

    app.gateway.set_failing(true);
    let err = app
        .payments
        .confirm_payment(request.clone(), user_id, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Gateway(_)), "{err:?}");

    // Nothing paid, coupon back on the shelf, attempt recorded
    let (order, _) = app
        .payments
        .orders()
        .find_by_number(&request.order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(coupon_status(&app, coupon.instance_id).await, CouponInstanceStatus::Available);

    let attempts = payments_for(&app, &request.payment_key).await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, PaymentStatus::Failed);
    assert!(attempts[0].failure_reason.is_some());

    let record = entity::idempotency_records::Entity::find()
        .filter(entity::idempotency_records::Column::IdemKey.eq(request.payment_key.as_str()))
        .one(&app.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, IdempotencyStatus::Failed);

    app.gateway.set_failing(false);
    let result = app
        .payments
        .confirm_payment(request.clone(), user_id, Default::default())
        .await
        .unwrap();

    assert_eq!(result.order_id, order.id);
    assert_eq!(result.discount_amount, 200);
    assert_eq!(app.gateway.confirm_calls(), 2);
    assert_eq!(coupon_status(&app, coupon.instance_id).await, CouponInstanceStatus::Used);

    let attempts = payments_for(&app, &request.payment_key).await;
    assert_eq!(attempts.len(), 2);
    assert!(attempts.iter().any(|p| p.status == PaymentStatus::Done));
}

#[tokio::test]
async fn test_failed_attempt_is_recorded_when_coupon_lapses_mid_payment() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;
    let coupon = seed_coupon(&app.db, user_id, DiscountType::Fixed, 200, None, 0).await;

    let mut request =
        confirm_request(&new_order_number(), 800, 0, vec![item(ItemType::Course, course)]);
    request.coupon_instance_id = Some(coupon.instance_id);

    // The coupon expires while the card is being charged, then the charge fails
    let db = app.db.clone();
    let coupon_id = coupon.coupon_id;
    app.gateway.on_next_confirm(move || {
        async move {
            let definition = entity::coupons::Entity::find_by_id(coupon_id)
                .one(&db)
                .await
                .unwrap()
                .unwrap();
            let mut active: entity::coupons::ActiveModel = definition.into();
            active.valid_until = Set(Some(OffsetDateTime::now_utc() - Duration::hours(1)));
            active.update(&db).await.unwrap();
        }
        .boxed()
    });
    app.gateway.set_failing(true);

    let err = app
        .payments
        .confirm_payment(request.clone(), user_id, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Gateway(_)), "{err:?}");

    let attempts = payments_for(&app, &request.payment_key).await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, PaymentStatus::Failed);
    assert_eq!(attempts[0].cash_amount, 800);

    let (order, lines) = app
        .payments
        .orders()
        .find_by_number(&request.order_number)
        .await
        .unwrap()
        .expect("order recorded for the failed attempt");
    assert_eq!(attempts[0].order_id, order.id);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.coupon_instance_id, None);
    assert!(lines.iter().all(|l| l.status == OrderLineStatus::Pending));
    assert_eq!(coupon_status(&app, coupon.instance_id).await, CouponInstanceStatus::Available);
}

#[tokio::test]
async fn test_settle_failure_after_approval_cancels_and_records_attempt() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.grant(user_id, 300).await;
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;
    let request =
        confirm_request(&new_order_number(), 700, 300, vec![item(ItemType::Course, course)]);

    // The credit is taken away after the precheck saw it
    let db = app.db.clone();
    app.gateway.on_next_confirm(move || {
        async move {
            CreditsService::new(db, WalletConfig::default())
                .admin_adjust(user_id, -300, Uuid::new_v4(), "clawback")
                .await
                .unwrap();
        }
        .boxed()
    });

    let err = app
        .payments
        .confirm_payment(request.clone(), user_id, Default::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InsufficientBalance(_)), "{err:?}");

    assert_eq!(app.gateway.cancels(), vec![(request.payment_key.clone(), 700)]);

    let attempts = payments_for(&app, &request.payment_key).await;
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, PaymentStatus::Failed);
    assert_eq!(attempts[0].method, "CARD");

    let (order, _) = app
        .payments
        .orders()
        .find_by_number(&request.order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(app.balance(user_id).await, 0);
    app.assert_consistent(user_id).await;
}

#[tokio::test]
async fn test_coupon_discount_is_split_across_lines() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let cheap = seed_price(&app.db, ItemType::Course, 1_000).await;
    let pricey = seed_price(&app.db, ItemType::Section, 3_000).await;
    let coupon = seed_coupon(&app.db, user_id, DiscountType::Percentage, 10, None, 0).await;

    let mut request = confirm_request(
        &new_order_number(),
        3_600,
        0,
        vec![item(ItemType::Course, cheap), item(ItemType::Section, pricey)],
    );
    request.coupon_instance_id = Some(coupon.instance_id);

    let result = app
        .payments
        .confirm_payment(request.clone(), user_id, Default::default())
        .await
        .unwrap();
    assert_eq!(result.discount_amount, 400);
    assert_eq!(result.amount, 3_600);

    let (order, lines) = app
        .payments
        .orders()
        .find_by_number(&request.order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.total_amount, 4_000);
    assert_eq!(order.final_amount, 3_600);
    let shares: Vec<i64> = lines.iter().map(|l| l.discount_amount).collect();
    assert_eq!(shares, vec![100, 300]);
    assert_eq!(lines[1].final_amount, 2_700);
    assert!(lines
        .iter()
        .all(|l| l.coupon_instance_id == Some(coupon.instance_id)));
    assert_eq!(coupon_status(&app, coupon.instance_id).await, CouponInstanceStatus::Used);
}

#[tokio::test]
async fn test_used_coupon_cannot_pay_twice() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;
    let coupon = seed_coupon(&app.db, user_id, DiscountType::Fixed, 100, None, 0).await;

    let mut first = confirm_request(&new_order_number(), 900, 0, vec![item(ItemType::Course, course)]);
    first.coupon_instance_id = Some(coupon.instance_id);
    app.payments
        .confirm_payment(first, user_id, Default::default())
        .await
        .unwrap();

    let mut second =
        confirm_request(&new_order_number(), 900, 0, vec![item(ItemType::Course, course)]);
    second.coupon_instance_id = Some(coupon.instance_id);
    let err = app
        .payments
        .confirm_payment(second, user_id, Default::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::InvalidState(_)), "{err:?}");
    assert_eq!(app.gateway.confirm_calls(), 1);
}

#[tokio::test]
async fn test_prepared_order_is_reused_by_number() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_500).await;

    let prepared = app
        .payments
        .orders()
        .prepare_order(user_id, &[item(ItemType::Course, course)])
        .await
        .unwrap();
    assert_eq!(prepared.status, OrderStatus::Pending);
    assert_eq!(prepared.total_amount, 1_500);
    assert!(prepared.order_number.starts_with("ORD-"));

    // A stranger cannot pay someone else's order
    let err = app
        .payments
        .confirm_payment(
            confirm_request(&prepared.order_number, 1_500, 0, Vec::new()),
            Uuid::new_v4(),
            Default::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Forbidden(_)), "{err:?}");

    let result = app
        .payments
        .confirm_payment(
            confirm_request(&prepared.order_number, 1_500, 0, Vec::new()),
            user_id,
            Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(result.order_id, prepared.order_id);

    // Paid orders are closed for further payments
    let err = app
        .payments
        .confirm_payment(
            confirm_request(&prepared.order_number, 1_500, 0, Vec::new()),
            user_id,
            Default::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)), "{err:?}");
    assert_eq!(app.gateway.confirm_calls(), 1);
}

#[tokio::test]
async fn test_order_without_items_is_rejected() {
    let app = TestApp::new().await;
    let err = app
        .payments
        .confirm_payment(
            confirm_request(&new_order_number(), 0, 0, Vec::new()),
            Uuid::new_v4(),
            Default::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)), "{err:?}");
}

#[tokio::test]
async fn test_credit_package_purchase_issues_lots() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let result = app
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
    assert_eq!(result.cash_amount, 1_000);
    assert_eq!(app.balance(user_id).await, 110);

    let info = app.credits.get_credit_balance(user_id).await.unwrap();
    assert_eq!(info.paid_available, 100);
    assert_eq!(info.free_available, 10);
    assert!(info.lots.iter().any(|l| l.source == LotSource::Purchase && l.lot_type == LotType::Paid));
    assert!(info.lots.iter().any(|l| l.source == LotSource::Bonus && l.lot_type == LotType::Free));

    let entries = app.credits.list_ledger(user_id, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].entry_type, LedgerEntryType::Charge);
    assert_eq!(entries[0].amount, 110);

    app.assert_consistent(user_id).await;
}

#[tokio::test]
async fn test_credit_package_cannot_be_bought_with_credit() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.grant(user_id, 1_000).await;

    let err = app
        .payments
        .confirm_payment(
            confirm_request(
                &new_order_number(),
                0,
                1_000,
                vec![item(ItemType::CreditPackage, PACKAGE_ID)],
            ),
            user_id,
            Default::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::BadRequest(_)), "{err:?}");
    assert_eq!(app.balance(user_id).await, 1_000);
}

#[tokio::test]
async fn test_credit_package_cannot_share_an_order_with_a_course() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 500).await;

    let err = app
        .payments
        .confirm_payment(
            confirm_request(
                &new_order_number(),
                1_500,
                0,
                vec![
                    item(ItemType::Course, course),
                    item(ItemType::CreditPackage, PACKAGE_ID),
                ],
            ),
            user_id,
            Default::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::BadRequest(_)), "{err:?}");
    assert_eq!(app.gateway.confirm_calls(), 0);

    let err = app
        .payments
        .orders()
        .prepare_order(
            user_id,
            &[
                item(ItemType::CreditPackage, PACKAGE_ID),
                item(ItemType::Section, course),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)), "{err:?}");
}

#[tokio::test]
async fn test_amount_mismatch_is_rejected_before_gateway() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;

    let err = app
        .payments
        .confirm_payment(
            confirm_request(&new_order_number(), 900, 0, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::BadRequest(_)), "{err:?}");
    assert_eq!(app.gateway.confirm_calls(), 0);
}

#[tokio::test]
async fn test_gateway_approving_wrong_total_is_cancelled() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;
    app.gateway.approve_amount(1_200);

    let request = confirm_request(&new_order_number(), 1_000, 0, vec![item(ItemType::Course, course)]);
    let err = app
        .payments
        .confirm_payment(request.clone(), user_id, Default::default())
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Gateway(_)), "{err:?}");
    assert_eq!(app.gateway.cancels(), vec![(request.payment_key.clone(), 1_200)]);

    let (order, _) = app
        .payments
        .orders()
        .find_by_number(&request.order_number)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
}

#[tokio::test]
async fn test_insufficient_credit_never_reaches_gateway() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.grant(user_id, 100).await;
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;

    let err = app
        .payments
        .confirm_payment(
            confirm_request(&new_order_number(), 700, 300, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::InsufficientBalance(_)), "{err:?}");
    assert_eq!(app.gateway.confirm_calls(), 0);
    assert_eq!(app.balance(user_id).await, 100);
}

#[tokio::test]
async fn test_mixed_payment_splits_cash_and_credit() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.grant(user_id, 400).await;
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;

    let result = app
        .payments
        .confirm_payment(
            confirm_request(&new_order_number(), 600, 400, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await
        .unwrap();

    assert_eq!(result.payment_type, PaymentType::Mixed);
    assert_eq!(result.cash_amount, 600);
    assert_eq!(result.credit_amount, 400);
    assert_eq!(app.balance(user_id).await, 0);
    app.assert_consistent(user_id).await;
}

#[tokio::test]
async fn test_daily_cash_limit_blocks_second_payment() {
    let mut config = test_config();
    config.limits = LimitsConfig {
        daily_cash_limit: 1_500,
        daily_credit_limit: 0,
    };
    let app = TestApp::with_config(config).await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;

    app.payments
        .confirm_payment(
            confirm_request(&new_order_number(), 1_000, 0, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await
        .unwrap();

    let err = app
        .payments
        .confirm_payment(
            confirm_request(&new_order_number(), 1_000, 0, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::LimitExceeded(_)), "{err:?}");
    assert_eq!(app.gateway.confirm_calls(), 1);
}

#[tokio::test]
async fn test_publisher_failure_does_not_fail_payment() {
    let app = TestApp::with_publisher(Arc::new(FailingPublisher)).await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;

    let result = app
        .payments
        .confirm_payment(
            confirm_request(&new_order_number(), 1_000, 0, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await;

    assert!(result.is_ok(), "{result:?}");
}

#[tokio::test]
async fn test_completion_event_reaches_subscriber() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;
    let mut events = app.hub.subscribe(user_id);

    let result = app
        .payments
        .confirm_payment(
            confirm_request(&new_order_number(), 1_000, 0, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await
        .unwrap();

    match events.next().now_or_never().flatten().expect("event delivered") {
        PaymentEvent::PaymentCompleted {
            order_id, user_id: event_user, ..
        } => {
            assert_eq!(order_id, result.order_id);
            assert_eq!(event_user, user_id);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_confirmations_charge_once() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let course = seed_price(&app.db, ItemType::Course, 1_000).await;
    let request: ConfirmPaymentRequest =
        confirm_request(&new_order_number(), 1_000, 0, vec![item(ItemType::Course, course)]);

    let (a, b) = tokio::join!(
        app.payments
            .confirm_payment(request.clone(), user_id, Default::default()),
        app.payments
            .confirm_payment(request.clone(), user_id, Default::default()),
    );

    assert_eq!(app.gateway.confirm_calls(), 1);
    assert!(a.is_ok() || b.is_ok());
    for outcome in [a, b] {
        if let Err(err) = outcome {
            assert!(matches!(err, ApiError::DuplicateRequest(_)), "{err:?}");
        }
    }

    let done: Vec<_> = payments_for(&app, &request.payment_key)
        .await
        .into_iter()
        .filter(|p| p.status == PaymentStatus::Done)
        .collect();
    assert_eq!(done.len(), 1);
}
