use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::change_detector::{detect_changes, DiffSummary};
use super::listing::{Snapshot, StoredSnapshot};
use super::notifier::{DeliveryReceipt, Notifier};
use super::reporter::{MonitorReporter, MonitoringStats};
use super::store::SnapshotStore;
use crate::api::ListingSource;
use crate::core::config::MonitorConfig;
use crate::core::MonitorResult;

pub const MONITORED_METRICS: [&str; 5] = ["price", "listing", "title", "image", "rating"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    LoadSnapshot,
    MonitoringStats,
    Notify,
    AppendHistory,
    SaveSnapshot,
}

/// A collaborator call that failed without aborting the cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollaboratorFailure {
    pub stage: CycleStage,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub run_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub has_changes: bool,
    pub changes: DiffSummary,
    pub total_listings: usize,
    pub sellers: Vec<String>,
    pub monitoring_stats: MonitoringStats,
    pub delivery: Option<DeliveryReceipt>,
    pub snapshot_version: Option<i64>,
    pub failures: Vec<CollaboratorFailure>,
}

impl CycleReport {
    pub fn failed_at(&self, stage: CycleStage) -> bool {
        self.failures.iter().any(|f| f.stage == stage)
    }
}

/// One fetch, compare, notify and persist pass over the monitored sellers.
///
/// Fetching current listings is the only step allowed to fail the cycle.
/// Every later collaborator failure is logged and recorded in the report.
pub struct MonitoringCycle {
    source: Arc<dyn ListingSource>,
    store: Arc<dyn SnapshotStore>,
    notifier: Arc<dyn Notifier>,
    reporter: MonitorReporter,
    settings: MonitorConfig,
    running: Mutex<()>,
}

impl MonitoringCycle {
    pub fn new(
        source: Arc<dyn ListingSource>,
        store: Arc<dyn SnapshotStore>,
        notifier: Arc<dyn Notifier>,
        settings: MonitorConfig,
    ) -> Self {
        Self {
            source,
            reporter: MonitorReporter::new(store.clone()),
            store,
            notifier,
            settings,
            running: Mutex::new(()),
        }
    }

    pub fn sellers(&self) -> &[String] {
        &self.settings.sellers
    }

    /// Searches every monitored seller; any failed search fails the whole
    /// fetch so a partial result is never mistaken for removed listings.
    pub async fn fetch_current_listings(&self) -> MonitorResult<Snapshot> {
        let query = self.settings.search_query.as_str();
        let per_seller = try_join_all(
            self.settings
                .sellers
                .iter()
                .map(|seller| self.source.search_items_by_seller(seller, query)),
        )
        .await?;

        Ok(Snapshot::new(
            Utc::now(),
            per_seller.into_iter().flatten().collect(),
        ))
    }

    pub async fn run(&self) -> MonitorResult<CycleReport> {
        let _guard = self.running.lock().await;
        let run_id = Uuid::new_v4();
        let start = std::time::Instant::now();
        tracing::info!("🔄 Starting monitoring cycle {}", run_id);

        let current = self.fetch_current_listings().await?;
        let now = current.timestamp.unwrap_or_else(Utc::now);
        let mut failures = Vec::new();

        let previous = match self.store.load_snapshot().await {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(
                    "⚠️  Could not load previous snapshot, treating as first run: {}",
                    e
                );
                failures.push(failure(CycleStage::LoadSnapshot, &e));
                self.unreadable_snapshot().await
            }
        };
        if previous.snapshot.is_first_run() {
            tracing::info!("No previous snapshot, every listing is reported as new");
        }

        let mut changes = detect_changes(&previous.snapshot, &current);
        if self.settings.dedupe_rating_changes {
            changes = changes.with_ratings_per_seller();
        }
        tracing::info!(
            "Detected {} change(s) across {} listings",
            changes.total_changes(),
            current.listings.len()
        );

        let stats = match self.reporter.monitoring_stats(now).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::error!("❌ Failed to get monitoring stats: {}", e);
                failures.push(failure(CycleStage::MonitoringStats, &e));
                MonitoringStats::first_run(now)
            }
        };

        let delivery = match self.notifier.notify(&changes, &stats).await {
            Ok(receipt) => {
                tracing::info!("📧 Notification delivered via {}", receipt.channel);
                Some(receipt)
            }
            Err(e) => {
                tracing::error!("❌ Notification failed: {}", e);
                failures.push(failure(CycleStage::Notify, &e));
                None
            }
        };

        if let Err(e) = self.store.append_history(&changes.counts(), &stats).await {
            tracing::error!("❌ Failed to save change history: {}", e);
            failures.push(failure(CycleStage::AppendHistory, &e));
        }

        let snapshot_version = match self.store.save_snapshot(&current, previous.version).await {
            Ok(version) => Some(version),
            Err(e) => {
                tracing::error!("❌ Failed to save snapshot: {}", e);
                failures.push(failure(CycleStage::SaveSnapshot, &e));
                None
            }
        };

        tracing::info!(
            "✅ Cycle {} finished in {:.2}ms ({} collaborator failure(s))",
            run_id,
            start.elapsed().as_secs_f64() * 1000.0,
            failures.len()
        );

        Ok(CycleReport {
            run_id,
            timestamp: now,
            has_changes: changes.has_changes,
            total_listings: current.listings.len(),
            changes,
            sellers: self.settings.sellers.clone(),
            monitoring_stats: stats,
            delivery,
            snapshot_version,
            failures,
        })
    }

    /// Empty snapshot carrying the stored row's version, so an undecodable
    /// row is still replaced through the version guard.
    async fn unreadable_snapshot(&self) -> StoredSnapshot {
        let version = match self.store.snapshot_version().await {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!("⚠️  Could not read snapshot version: {}", e);
                0
            }
        };

        StoredSnapshot {
            version,
            snapshot: Snapshot::empty(),
        }
    }
}

fn failure(stage: CycleStage, error: &dyn std::fmt::Display) -> CollaboratorFailure {
    CollaboratorFailure {
        stage,
        error: error.to_string(),
    }
}
