use crate::{
    config::Config,
    services::{
        CatalogLookup, CreditsService, DbCatalog, EventHub, HttpPaymentGateway, JWTService,
        OrderService, PaymentGateway, PaymentService,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub redis: Arc<redis::Client>,
    pub jwt_service: Arc<JWTService>,
    pub payment_service: Arc<PaymentService>,
    pub order_service: Arc<OrderService>,
    pub credits_service: Arc<CreditsService>,
    pub event_hub: Arc<EventHub>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        // Connect to database
        let db = sea_orm::Database::connect(&config.database.url).await?;

        // Connect to Redis
        let redis = Arc::new(redis::Client::open(config.redis.url.as_str())?);

        let gateway: Arc<dyn PaymentGateway> = Arc::new(HttpPaymentGateway::new(&config.gateway)?);

        Ok(Self::from_parts(db, redis, config, gateway))
    }

    /// Wire services over existing connections; tests inject their own gateway
    pub fn from_parts(
        db: DatabaseConnection,
        redis: Arc<redis::Client>,
        config: Config,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let catalog: Arc<dyn CatalogLookup> =
            Arc::new(DbCatalog::new(db.clone(), config.credit_packages.clone()));
        let event_hub = Arc::new(EventHub::new());

        let jwt_service = Arc::new(JWTService::new(Arc::new(config.auth.clone())));
        let payment_service = Arc::new(PaymentService::new(
            db.clone(),
            &config,
            gateway,
            catalog.clone(),
            event_hub.clone(),
        ));
        let order_service = Arc::new(OrderService::new(db.clone(), catalog));
        let credits_service = Arc::new(CreditsService::new(db.clone(), config.wallet.clone()));

        Self {
            db,
            redis,
            jwt_service,
            payment_service,
            order_service,
            credits_service,
            event_hub,
            config: Arc::new(config),
        }
    }
}
