use cookiepay::ApiError;
use entity::sea_orm_active_enums::{ItemType, LedgerEntryType, LotSource, LotType};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::common::{confirm_request, item, new_order_number, seed_price, TestApp};

async fn lots_of(app: &TestApp, user_id: Uuid) -> Vec<entity::credit_lots::Model> {
    let account = app
        .credits
        .ledger()
        .find_account(user_id)
        .await
        .unwrap()
        .expect("account exists");
    entity::credit_lots::Entity::find()
        .filter(entity::credit_lots::Column::AccountId.eq(account.id))
        .all(&app.db)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_grant_and_deduct_keep_ledger_and_balance_equal() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    app.grant(user_id, 500).await;
    let result = app
        .credits
        .admin_adjust(user_id, -300, Uuid::new_v4(), "correction")
        .await
        .unwrap();

    assert_eq!(result.balance_after, 200);
    assert_eq!(app.balance(user_id).await, 200);

    let entries = app.credits.list_ledger(user_id, 10).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].amount, -300);
    assert_eq!(entries[0].balance_after, 200);
    assert_eq!(entries[1].amount, 500);
    assert!(entries
        .iter()
        .all(|e| e.entry_type == LedgerEntryType::AdminAdjust));

    app.assert_consistent(user_id).await;
}

#[tokio::test]
async fn test_deduction_below_zero_is_rejected() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.grant(user_id, 100).await;

    let err = app
        .credits
        .admin_adjust(user_id, -150, Uuid::new_v4(), "too much")
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::InsufficientBalance(_)), "{err:?}");
    assert_eq!(app.balance(user_id).await, 100);
    assert_eq!(app.credits.list_ledger(user_id, 10).await.unwrap().len(), 1);
    app.assert_consistent(user_id).await;
}

#[tokio::test]
async fn test_zero_adjustment_is_rejected() {
    let app = TestApp::new().await;
    let err = app
        .credits
        .admin_adjust(Uuid::new_v4(), 0, Uuid::new_v4(), "noop")
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::BadRequest(_)), "{err:?}");
}

#[tokio::test]
async fn test_free_lots_are_spent_before_paid_lots() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.issue_lot(user_id, LotType::Paid, 100, None).await;
    app.issue_lot(user_id, LotType::Free, 50, None).await;

    let course = seed_price(&app.db, ItemType::Course, 70).await;
    app.payments
        .confirm_payment(
            confirm_request(&new_order_number(), 0, 70, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await
        .unwrap();

    let lots = lots_of(&app, user_id).await;
    let free = lots.iter().find(|l| l.lot_type == LotType::Free).unwrap();
    let paid = lots.iter().find(|l| l.lot_type == LotType::Paid).unwrap();
    assert_eq!(free.qty_remain, 0);
    assert_eq!(paid.qty_remain, 80);
    assert_eq!(app.balance(user_id).await, 80);
    app.assert_consistent(user_id).await;
}

#[tokio::test]
async fn test_balance_view_splits_free_and_paid() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.issue_lot(user_id, LotType::Paid, 100, None).await;
    app.grant(user_id, 40).await;

    let info = app.credits.get_credit_balance(user_id).await.unwrap();
    assert_eq!(info.amount, 140);
    assert_eq!(info.free_available, 40);
    assert_eq!(info.paid_available, 100);
    assert_eq!(info.lots.len(), 2);
    assert_eq!(info.lots[0].lot_type, LotType::Free);
}

#[tokio::test]
async fn test_unknown_user_has_empty_wallet() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();

    let info = app.credits.get_credit_balance(user_id).await.unwrap();
    assert_eq!(info.amount, 0);
    assert!(info.lots.is_empty());
    assert!(app.credits.list_ledger(user_id, 10).await.unwrap().is_empty());

    let err = app.credits.reconcile(user_id).await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)), "{err:?}");
}

#[tokio::test]
async fn test_expiry_sweep_zeroes_lots_and_writes_expire_entries() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    let yesterday = OffsetDateTime::now_utc() - Duration::days(1);
    app.issue_lot(user_id, LotType::Free, 30, Some(yesterday)).await;
    app.issue_lot(user_id, LotType::Paid, 70, None).await;

    // Expired credit is not spendable even before the sweep runs
    let info = app.credits.get_credit_balance(user_id).await.unwrap();
    assert_eq!(info.free_available, 0);
    assert_eq!(info.paid_available, 70);

    let summary = app
        .credits
        .expire_lots(OffsetDateTime::now_utc())
        .await
        .unwrap();
    assert_eq!(summary.lots_expired, 1);
    assert_eq!(summary.credits_expired, 30);
    assert_eq!(app.balance(user_id).await, 70);

    let entries = app.credits.list_ledger(user_id, 10).await.unwrap();
    assert_eq!(entries[0].entry_type, LedgerEntryType::Expire);
    assert_eq!(entries[0].amount, -30);
    assert_eq!(entries[0].reference_type.as_deref(), Some("LOT"));

    let again = app
        .credits
        .expire_lots(OffsetDateTime::now_utc())
        .await
        .unwrap();
    assert_eq!(again.lots_expired, 0);
    app.assert_consistent(user_id).await;
}

#[tokio::test]
async fn test_expiry_sweep_settles_each_account_separately() {
    let app = TestApp::new().await;
    let alice = Uuid::new_v4();
    let bob = Uuid::new_v4();
    let yesterday = OffsetDateTime::now_utc() - Duration::days(1);
    let next_week = OffsetDateTime::now_utc() + Duration::days(7);

    app.issue_lot(alice, LotType::Free, 10, Some(yesterday)).await;
    app.issue_lot(alice, LotType::Paid, 20, Some(yesterday)).await;
    app.issue_lot(alice, LotType::Paid, 5, Some(next_week)).await;
    app.issue_lot(bob, LotType::Free, 40, Some(yesterday)).await;

    let summary = app
        .credits
        .expire_lots(OffsetDateTime::now_utc())
        .await
        .unwrap();
    assert_eq!(summary.lots_expired, 3);
    assert_eq!(summary.credits_expired, 70);

    assert_eq!(app.balance(alice).await, 5);
    assert_eq!(app.balance(bob).await, 0);
    app.assert_consistent(alice).await;
    app.assert_consistent(bob).await;

    let expire_entries = app
        .credits
        .list_ledger(alice, 10)
        .await
        .unwrap()
        .into_iter()
        .filter(|e| e.entry_type == LedgerEntryType::Expire)
        .count();
    assert_eq!(expire_entries, 2);

    // The unexpired lot is still spendable after the sweep
    let course_id = seed_price(&app.db, ItemType::Course, 5).await;
    app.payments
        .confirm_payment(
            confirm_request(&new_order_number(), 0, 5, vec![item(ItemType::Course, course_id)]),
            alice,
            Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(app.balance(alice).await, 0);
    app.assert_consistent(alice).await;
}

#[tokio::test]
async fn test_refund_into_expired_lot_creates_refund_lot() {
    let app = TestApp::new().await;
    let user_id = Uuid::new_v4();
    app.issue_lot(user_id, LotType::Paid, 100, None).await;

    let course = seed_price(&app.db, ItemType::Course, 100).await;
    let result = app
        .payments
        .confirm_payment(
            confirm_request(&new_order_number(), 0, 100, vec![item(ItemType::Course, course)]),
            user_id,
            Default::default(),
        )
        .await
        .unwrap();

    // The drawn lot expires before the refund arrives
    let lot = lots_of(&app, user_id).await.remove(0);
    let mut lot_active: entity::credit_lots::ActiveModel = lot.clone().into();
    lot_active.expires_at = Set(Some(OffsetDateTime::now_utc() - Duration::days(1)));
    lot_active.update(&app.db).await.unwrap();

    let refund = app
        .payments
        .refund_order(result.order_id, user_id, "changed mind")
        .await
        .unwrap();
    assert_eq!(refund.credit_restored, 100);

    let lots = lots_of(&app, user_id).await;
    let original = lots.iter().find(|l| l.id == lot.id).unwrap();
    assert_eq!(original.qty_remain, 0);

    let overflow = lots
        .iter()
        .find(|l| l.source == LotSource::Refund)
        .expect("overflow lot issued");
    assert_eq!(overflow.lot_type, LotType::Free);
    assert_eq!(overflow.qty_total, 100);
    let expires_at = overflow.expires_at.expect("refund lot expires");
    assert!(expires_at > OffsetDateTime::now_utc() + Duration::days(1000));

    assert_eq!(app.balance(user_id).await, 100);
    app.assert_consistent(user_id).await;
}
