use serde::Serialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::reply::{json, with_status};
use warp::{Filter, Rejection, Reply};

use crate::api::ListingSource;
use crate::core::{HealthChecker, MonitorError, MonitorResult};
use crate::monitoring::cycle::MONITORED_METRICS;
use crate::monitoring::{
    CollaboratorFailure, CycleReport, CycleStage, DeliveryReceipt, DiffSummary, HotProductsDigest,
    HotProductsReport, ListingRecord, MonitorReporter, MonitoringCycle,
};

#[derive(Clone)]
pub struct AppState {
    pub cycle: Arc<MonitoringCycle>,
    pub reporter: Arc<MonitorReporter>,
    pub source: Arc<dyn ListingSource>,
    pub hot_products: Arc<HotProductsDigest>,
    pub health: HealthChecker,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonitorSummary<'a> {
    total_products: usize,
    sellers: &'a [String],
    monitored_metrics: [&'static str; 5],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MonitorResponse<'a> {
    success: bool,
    timestamp: chrono::DateTime<chrono::Utc>,
    run_id: uuid::Uuid,
    has_changes: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    changes: Option<&'a DiffSummary>,
    summary: MonitorSummary<'a>,
    delivery: Option<&'a DeliveryReceipt>,
    failures: &'a [CollaboratorFailure],
}

impl<'a> From<&'a CycleReport> for MonitorResponse<'a> {
    fn from(report: &'a CycleReport) -> Self {
        Self {
            success: true,
            timestamp: report.timestamp,
            run_id: report.run_id,
            has_changes: report.has_changes,
            changes: report.has_changes.then_some(&report.changes),
            summary: MonitorSummary {
                total_products: report.total_listings,
                sellers: &report.sellers,
                monitored_metrics: MONITORED_METRICS,
            },
            delivery: report.delivery.as_ref(),
            failures: &report.failures,
        }
    }
}

#[derive(Debug, Serialize)]
struct SearchResponse<'a> {
    success: bool,
    query: &'a str,
    total: usize,
    items: Vec<ListingRecord>,
}

#[derive(Debug, Serialize)]
struct HotProductsResponse<'a> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    recipient: Option<&'a str>,
    #[serde(flatten)]
    report: &'a HotProductsReport,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl ErrorBody {
    fn new(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            message: None,
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

pub fn routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_headers(vec!["content-type"]);

    let monitor = warp::path!("api" / "monitor-sellers")
        .and(warp::get().or(warp::post()).unify())
        .and(with_state(state.clone()))
        .and_then(monitor_sellers);

    let stats = warp::path!("api" / "historical-stats")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(historical_stats);

    let search = warp::path!("api" / "search-products")
        .and(warp::get())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state(state.clone()))
        .and_then(search_products);

    let hot_products = warp::path!("api" / "hot-products-email")
        .and(warp::get().or(warp::post()).unify())
        .and(warp::query::<HashMap<String, String>>())
        .and(with_state(state.clone()))
        .and_then(hot_products_email);

    let health = warp::path!("health")
        .and(warp::get())
        .and(with_state(state))
        .and_then(health_status);

    monitor
        .or(stats)
        .or(search)
        .or(hot_products)
        .or(health)
        .with(cors)
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

async fn monitor_sellers(state: AppState) -> Result<impl Reply, Rejection> {
    let result = state.cycle.run().await;
    record_outcome(&state.health, &result).await;

    Ok(match result {
        Ok(report) => with_status(json(&MonitorResponse::from(&report)), StatusCode::OK),
        Err(e) => {
            tracing::error!("❌ Monitoring cycle failed: {}", e);
            with_status(
                json(&ErrorBody::new(e.to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    })
}

async fn historical_stats(state: AppState) -> Result<impl Reply, Rejection> {
    let stats = state.reporter.historical_stats(chrono::Utc::now()).await;
    Ok(json(&stats))
}

async fn search_products(
    params: HashMap<String, String>,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let query = match params.get("q").map(|q| q.trim()).filter(|q| !q.is_empty()) {
        Some(q) => q,
        None => {
            return Ok(with_status(
                json(
                    &ErrorBody::new("Missing query parameter")
                        .with_message("Provide a search keyword, e.g. ?q=iphone"),
                ),
                StatusCode::BAD_REQUEST,
            ))
        }
    };

    tracing::info!("Searching products for '{}'", query);

    Ok(match state.source.search_items(query).await {
        Ok(items) => with_status(
            json(&SearchResponse {
                success: true,
                query,
                total: items.len(),
                items,
            }),
            StatusCode::OK,
        ),
        Err(MonitorError::MissingCredentials) => with_status(
            json(&ErrorBody::new("Server configuration error").with_message(
                "Set EBAY_PROD_CLIENT_ID and EBAY_PROD_CLIENT_SECRET",
            )),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        Err(e) => {
            tracing::error!("Product search failed: {}", e);
            with_status(
                json(&ErrorBody::new(e.to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    })
}

async fn hot_products_email(
    params: HashMap<String, String>,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let recipient = params
        .get("email")
        .map(|e| e.trim())
        .filter(|e| !e.is_empty())
        .map(str::to_string);

    Ok(match state.hot_products.run(recipient.clone()).await {
        Ok(report) => with_status(
            json(&HotProductsResponse {
                success: true,
                recipient: recipient.as_deref(),
                report: &report,
            }),
            StatusCode::OK,
        ),
        Err(e) => {
            tracing::error!("❌ Hot products digest failed: {}", e);
            with_status(
                json(&ErrorBody::new(e.to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    })
}

async fn health_status(state: AppState) -> Result<impl Reply, Rejection> {
    Ok(json(&state.health.get_status().await))
}

/// Reflects a cycle outcome in the component health flags.
pub async fn record_outcome(health: &HealthChecker, result: &MonitorResult<CycleReport>) {
    match result {
        Ok(report) => {
            let database_ok = ![
                CycleStage::LoadSnapshot,
                CycleStage::MonitoringStats,
                CycleStage::AppendHistory,
                CycleStage::SaveSnapshot,
            ]
            .into_iter()
            .any(|stage| report.failed_at(stage));

            health.update_component("ebay_api", true).await;
            health.update_component("database", database_ok).await;
            health
                .update_component("notifier", !report.failed_at(CycleStage::Notify))
                .await;
            health.mark_cycle(report.timestamp).await;
        }
        Err(e) if e.is_upstream() => health.update_component("ebay_api", false).await,
        Err(_) => {}
    }
}

/// Runs a cycle every `interval_secs` in the background.
pub fn spawn_scheduler(state: AppState, interval_secs: u64) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        state.health.update_component("scheduler", true).await;
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));

        loop {
            interval.tick().await;

            let result = state.cycle.run().await;
            if let Err(e) = &result {
                tracing::error!("❌ Scheduled monitoring cycle failed: {}", e);
            }
            record_outcome(&state.health, &result).await;
        }
    })
}
