use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub credit_packages: Vec<CreditPackageConfig>,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub access_token_expiration_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub base_url: String,
    pub secret_key: String,
    /// Upper bound for a single confirm/cancel call
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    #[serde(default = "default_idempotency_ttl_hours")]
    pub idempotency_ttl_hours: i64,
    /// A PENDING key older than this is treated as an abandoned attempt
    #[serde(default = "default_idempotency_lease_seconds")]
    pub idempotency_lease_seconds: i64,
    #[serde(default = "default_refund_lot_expiry_days")]
    pub refund_lot_expiry_days: i64,
    #[serde(default)]
    pub purchase_lot_expiry_days: Option<i64>,
    #[serde(default)]
    pub bonus_lot_expiry_days: Option<i64>,
    #[serde(default = "default_expiry_sweep_interval_seconds")]
    pub expiry_sweep_interval_seconds: u64,
}

fn default_idempotency_ttl_hours() -> i64 {
    24
}

fn default_idempotency_lease_seconds() -> i64 {
    60
}

fn default_refund_lot_expiry_days() -> i64 {
    3 * 365
}

fn default_expiry_sweep_interval_seconds() -> u64 {
    3600
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            idempotency_ttl_hours: default_idempotency_ttl_hours(),
            idempotency_lease_seconds: default_idempotency_lease_seconds(),
            refund_lot_expiry_days: default_refund_lot_expiry_days(),
            purchase_lot_expiry_days: None,
            bonus_lot_expiry_days: None,
            expiry_sweep_interval_seconds: default_expiry_sweep_interval_seconds(),
        }
    }
}

/// Per-user per-day spend limits; 0 disables a limit
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LimitsConfig {
    #[serde(default)]
    pub daily_cash_limit: i64,
    #[serde(default)]
    pub daily_credit_limit: i64,
}

/// A purchasable bundle of credits
#[derive(Debug, Clone, Deserialize)]
pub struct CreditPackageConfig {
    pub id: String,
    pub title: String,
    pub price: i64,
    pub base_credits: i64,
    #[serde(default)]
    pub bonus_credits: i64,
}

/// Sliding-window request limits for payment endpoints
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests per window for regular users
    #[serde(default = "default_user_rpm")]
    pub user_rpm: u32,
    /// Requests per window for admins
    #[serde(default = "default_admin_rpm")]
    pub admin_rpm: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u32,
}

fn default_user_rpm() -> u32 {
    30
}

fn default_admin_rpm() -> u32 {
    300
}

fn default_window_seconds() -> u32 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            user_rpm: default_user_rpm(),
            admin_rpm: default_admin_rpm(),
            window_seconds: default_window_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for environment variable overrides)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            // config.yml / config.yaml (REQUIRED)
            .add_source(config::File::with_name("config").required(true))
            .add_source(
                config::Environment::with_prefix("COOKIEPAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), config::ConfigError> {
        if self.wallet.expiry_sweep_interval_seconds == 0 {
            return Err(config::ConfigError::Message(
                "wallet.expiry_sweep_interval_seconds must be at least 1".to_string(),
            ));
        }
        if self.gateway.timeout_ms == 0 {
            return Err(config::ConfigError::Message(
                "gateway.timeout_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
