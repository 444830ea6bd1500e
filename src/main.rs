use anyhow::Result;
use ebay_seller_monitor::api::{EbayClient, ListingSource};
use ebay_seller_monitor::core::{self, Config, HealthChecker};
use ebay_seller_monitor::monitoring::{
    notifier, HotProductsDigest, MonitorReporter, MonitoringCycle, SnapshotDatabase, SnapshotStore,
};
use ebay_seller_monitor::server::{self, AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    core::logging::init_logging(&config.server.log_level);

    tracing::info!("🚀 eBay Seller Monitor starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Monitoring sellers: {}", config.monitor.sellers.join(", "));

    let health_checker = HealthChecker::new();

    let ebay = EbayClient::new(config.ebay.clone());
    if !ebay.has_credentials() {
        tracing::warn!(
            "⚠️  EBAY_PROD_CLIENT_ID / EBAY_PROD_CLIENT_SECRET not set, searches will fail"
        );
    }

    let database = SnapshotDatabase::connect_lazy(&config.database)?;
    match database.initialize_schema().await {
        Ok(()) => health_checker.update_component("database", true).await,
        Err(e) => tracing::warn!("⚠️  Could not initialize database schema: {}", e),
    }

    let source: Arc<dyn ListingSource> = Arc::new(ebay);
    let store: Arc<dyn SnapshotStore> = Arc::new(database);
    let notifier = notifier::from_config(&config.notification);

    let state = AppState {
        cycle: Arc::new(MonitoringCycle::new(
            source.clone(),
            store.clone(),
            notifier.clone(),
            config.monitor.clone(),
        )),
        reporter: Arc::new(MonitorReporter::new(store)),
        hot_products: Arc::new(HotProductsDigest::new(
            source.clone(),
            notifier,
            config.hot_products.clone(),
        )),
        source,
        health: health_checker,
    };

    if let Some(interval_secs) = config.monitor.interval_secs {
        tracing::info!("⏱️  Scheduled monitoring every {}s", interval_secs);
        server::spawn_scheduler(state.clone(), interval_secs);
    }

    tracing::info!("✅ HTTP server running on port {}", config.server.port);
    warp::serve(server::routes(state))
        .run(([0, 0, 0, 0], config.server.port))
        .await;

    Ok(())
}
