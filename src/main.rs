use std::{sync::Arc, time::Duration};

use cookiepay::{
    app_state::AppState, config::Config, routes::create_router, services::CreditsService,
};
use migration::{Migrator, MigratorTrait};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load()?;

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,cookiepay=debug".into());
    if config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting cookie payment service (cookiepay)");
    tracing::info!(
        "Loaded configuration - Server: {}:{}",
        config.server.host,
        config.server.port
    );

    // Initialize application state
    let state = AppState::new(config.clone()).await?;

    Migrator::up(&state.db, None).await?;
    tracing::info!("Database migrations applied");

    spawn_expiry_sweep(
        state.credits_service.clone(),
        Duration::from_secs(config.wallet.expiry_sweep_interval_seconds),
    );

    let app = create_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically zero out expired credit lots
fn spawn_expiry_sweep(credits: Arc<CreditsService>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match credits
                .expire_lots(time::OffsetDateTime::now_utc())
                .await
            {
                Ok(summary) if summary.lots_expired > 0 => tracing::info!(
                    "Expired {} credit lots ({} credits)",
                    summary.lots_expired,
                    summary.credits_expired
                ),
                Ok(_) => {}
                Err(e) => tracing::error!("Credit lot expiry sweep failed: {}", e),
            }
        }
    });
}
