use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use futures::future::BoxFuture;
use cookiepay::{
    config::{
        AuthConfig, Config, CreditPackageConfig, DatabaseConfig, GatewayConfig, LimitsConfig,
        LoggingConfig, RateLimitConfig, RedisConfig, ServerConfig, WalletConfig,
    },
    models::{
        events::PaymentEvent,
        payment::{ConfirmPaymentRequest, OrderItemRequest},
    },
    services::{
        credit_lot_service::NewLot,
        gateway_service::{GatewayApproval, GatewayCancellation},
        CreditsService, DbCatalog, EventHub, GatewayError, PaymentEventPublisher, PaymentGateway,
        PaymentService, PublishError,
    },
};
use entity::sea_orm_active_enums::{
    CouponInstanceStatus, DiscountType, ItemType, LedgerEntryType, LotSource, LotType,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{ActiveModelTrait, ConnectOptions, Database, DatabaseConnection, Set, TransactionTrait};
use time::OffsetDateTime;
use uuid::Uuid;

pub const PACKAGE_ID: &str = "cookies-100";

/// One connection, so every test sees the same in-memory database
pub async fn setup_test_db() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:");
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);

    let db = Database::connect(options)
        .await
        .expect("Failed to open in-memory database");
    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");
    db
}

pub fn test_config() -> Config {
    Config {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
        },
        redis: RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        },
        auth: AuthConfig {
            jwt_secret: "test-secret-for-cookiepay".to_string(),
            access_token_expiration_minutes: 15,
        },
        gateway: GatewayConfig {
            base_url: "http://gateway.invalid".to_string(),
            secret_key: "test_sk".to_string(),
            timeout_ms: 2_000,
        },
        wallet: WalletConfig::default(),
        limits: LimitsConfig::default(),
        credit_packages: vec![CreditPackageConfig {
            id: PACKAGE_ID.to_string(),
            title: "100 cookies".to_string(),
            price: 1_000,
            base_credits: 100,
            bonus_credits: 10,
        }],
        rate_limit: RateLimitConfig::default(),
        logging: LoggingConfig::default(),
    }
}

type ConfirmHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Scriptable gateway double
#[derive(Default)]
pub struct FakeGateway {
    confirms: AtomicUsize,
    fail: AtomicBool,
    approve_override: Mutex<Option<i64>>,
    cancels: Mutex<Vec<(String, i64)>>,
    on_next_confirm: Mutex<Option<ConfirmHook>>,
}

impl FakeGateway {
    pub fn confirm_calls(&self) -> usize {
        self.confirms.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Approve this total regardless of what was requested
    pub fn approve_amount(&self, amount: i64) {
        *self.approve_override.lock().unwrap() = Some(amount);
    }

    pub fn cancels(&self) -> Vec<(String, i64)> {
        self.cancels.lock().unwrap().clone()
    }

    /// Run `hook` while the next confirmation is in flight, i.e. between the
    /// precheck and the settle step of the payment
    pub fn on_next_confirm<F>(&self, hook: F)
    where
        F: FnOnce() -> BoxFuture<'static, ()> + Send + 'static,
    {
        *self.on_next_confirm.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl PaymentGateway for FakeGateway {
    async fn confirm(
        &self,
        _payment_key: &str,
        _order_number: &str,
        amount: i64,
    ) -> Result<GatewayApproval, GatewayError> {
        self.confirms.fetch_add(1, Ordering::SeqCst);
        let hook = self.on_next_confirm.lock().unwrap().take();
        if let Some(hook) = hook {
            hook().await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(GatewayError::Declined {
                code: "REJECT_CARD_COMPANY".to_string(),
                message: "Card declined".to_string(),
            });
        }

        let total_amount = self.approve_override.lock().unwrap().unwrap_or(amount);
        Ok(GatewayApproval {
            status: "DONE".to_string(),
            method: "CARD".to_string(),
            approved_at: OffsetDateTime::now_utc(),
            total_amount,
        })
    }

    async fn cancel(
        &self,
        payment_key: &str,
        _reason: &str,
        amount: i64,
    ) -> Result<GatewayCancellation, GatewayError> {
        self.cancels
            .lock()
            .unwrap()
            .push((payment_key.to_string(), amount));
        Ok(GatewayCancellation {
            cancelled_amount: amount,
            cancelled_at: OffsetDateTime::now_utc(),
        })
    }
}

/// Publisher whose downstream is always broken
pub struct FailingPublisher;

#[async_trait]
impl PaymentEventPublisher for FailingPublisher {
    async fn publish(&self, _event: PaymentEvent) -> Result<(), PublishError> {
        Err(PublishError::Delivery("downstream unavailable".to_string()))
    }
}

pub struct TestApp {
    pub db: DatabaseConnection,
    pub gateway: Arc<FakeGateway>,
    pub hub: Arc<EventHub>,
    pub payments: PaymentService,
    pub credits: CreditsService,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(test_config(), None).await
    }

    pub async fn with_config(config: Config) -> Self {
        Self::build(config, None).await
    }

    pub async fn with_publisher(publisher: Arc<dyn PaymentEventPublisher>) -> Self {
        Self::build(test_config(), Some(publisher)).await
    }

    async fn build(config: Config, publisher: Option<Arc<dyn PaymentEventPublisher>>) -> Self {
        let db = setup_test_db().await;
        let gateway = Arc::new(FakeGateway::default());
        let hub = Arc::new(EventHub::new());
        let publisher: Arc<dyn PaymentEventPublisher> =
            publisher.unwrap_or_else(|| hub.clone() as Arc<dyn PaymentEventPublisher>);
        let catalog = Arc::new(DbCatalog::new(db.clone(), config.credit_packages.clone()));

        let payments = PaymentService::new(
            db.clone(),
            &config,
            gateway.clone(),
            catalog,
            publisher,
        );
        let credits = CreditsService::new(db.clone(), config.wallet.clone());

        Self {
            db,
            gateway,
            hub,
            payments,
            credits,
        }
    }

    /// FREE admin grant
    pub async fn grant(&self, user_id: Uuid, amount: i64) {
        self.credits
            .admin_adjust(user_id, amount, Uuid::new_v4(), "test grant")
            .await
            .expect("grant failed");
    }

    /// Issue one lot directly, e.g. with a chosen type or expiry
    pub async fn issue_lot(
        &self,
        user_id: Uuid,
        lot_type: LotType,
        quantity: i64,
        expires_at: Option<OffsetDateTime>,
    ) {
        let txn = self.db.begin().await.unwrap();
        self.credits
            .issue_in_txn(
                user_id,
                vec![NewLot {
                    lot_type,
                    source: LotSource::Purchase,
                    quantity,
                    expires_at,
                    order_line_id: None,
                }],
                LedgerEntryType::Charge,
                "test lot",
                None,
                &txn,
            )
            .await
            .expect("issue failed");
        txn.commit().await.unwrap();
    }

    pub async fn balance(&self, user_id: Uuid) -> i64 {
        self.credits.get_balance_amount(user_id).await.unwrap()
    }

    pub async fn assert_consistent(&self, user_id: Uuid) {
        let report = self.credits.reconcile(user_id).await.unwrap();
        assert!(report.consistent, "wallet drifted: {:?}", report);
    }
}

/// Active catalog price for a course or section; returns its item id
pub async fn seed_price(db: &DatabaseConnection, item_type: ItemType, price: i64) -> Uuid {
    let item_id = Uuid::new_v4();
    entity::catalog_prices::ActiveModel {
        id: Set(Uuid::new_v4()),
        item_type: Set(item_type),
        item_id: Set(item_id),
        title: Set(format!("Item {}", &item_id.to_string()[..8])),
        price: Set(price),
        active: Set(true),
        updated_at: Set(OffsetDateTime::now_utc()),
    }
    .insert(db)
    .await
    .expect("seed price failed");
    item_id
}

pub struct SeededCoupon {
    pub coupon_id: Uuid,
    pub instance_id: Uuid,
}

/// Active coupon definition plus one AVAILABLE instance owned by `user_id`
pub async fn seed_coupon(
    db: &DatabaseConnection,
    user_id: Uuid,
    discount_type: DiscountType,
    discount_value: i64,
    max_discount: Option<i64>,
    min_order_amount: i64,
) -> SeededCoupon {
    let now = OffsetDateTime::now_utc();
    let coupon = entity::coupons::ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set("Test coupon".to_string()),
        discount_type: Set(discount_type),
        discount_value: Set(discount_value),
        max_discount: Set(max_discount),
        min_order_amount: Set(min_order_amount),
        valid_from: Set(None),
        valid_until: Set(None),
        active: Set(true),
        created_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed coupon failed");

    let instance = entity::coupon_instances::ActiveModel {
        id: Set(Uuid::new_v4()),
        coupon_id: Set(coupon.id),
        user_id: Set(user_id),
        status: Set(CouponInstanceStatus::Available),
        reserved_order_number: Set(None),
        reserved_at: Set(None),
        used_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed coupon instance failed");

    SeededCoupon {
        coupon_id: coupon.id,
        instance_id: instance.id,
    }
}

pub fn item(item_type: ItemType, item_id: impl ToString) -> OrderItemRequest {
    OrderItemRequest {
        item_type,
        item_id: item_id.to_string(),
        quantity: 1,
    }
}

pub fn confirm_request(
    order_number: &str,
    cash: i64,
    credit: i64,
    items: Vec<OrderItemRequest>,
) -> ConfirmPaymentRequest {
    ConfirmPaymentRequest {
        payment_key: format!("pk_{}", Uuid::new_v4().simple()),
        order_number: order_number.to_string(),
        amount: cash,
        credit_amount: credit,
        coupon_instance_id: None,
        items,
    }
}

pub fn new_order_number() -> String {
    format!("ORD-TEST-{}", &Uuid::new_v4().simple().to_string()[..12])
}
