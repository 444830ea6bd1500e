use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use serde::{Deserialize, Serialize};

use super::change_detector::ChangeCounts;
use super::listing::{Snapshot, StoredSnapshot};
use super::reporter::MonitoringStats;
use crate::core::MonitorResult;

/// When monitoring began and how many cycles have run since.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorMeta {
    pub start_date: DateTime<Utc>,
    pub total_checks: i64,
}

/// One row of the change history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub changes_summary: ChangeCounts,
    pub monitoring_day: i64,
    pub total_checks: i64,
    pub created_at: DateTime<Utc>,
}

/// Persistence for the monitored snapshot and its audit trail.
///
/// The snapshot lives in a single row. `save_snapshot` only succeeds when the
/// row is still at `expected_version`, so two overlapping cycles cannot
/// silently overwrite each other.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Version 0 with an empty snapshot when nothing was stored yet.
    async fn load_snapshot(&self) -> MonitorResult<StoredSnapshot>;

    /// Version of the stored row without decoding its data; 0 when absent.
    async fn snapshot_version(&self) -> MonitorResult<i64>;

    /// Returns the new version.
    async fn save_snapshot(&self, snapshot: &Snapshot, expected_version: i64) -> MonitorResult<i64>;

    async fn append_history(
        &self,
        counts: &ChangeCounts,
        stats: &MonitoringStats,
    ) -> MonitorResult<()>;

    /// Counts one more check, creating the metadata row on the first run.
    async fn record_check(&self, now: DateTime<Utc>) -> MonitorResult<MonitorMeta>;

    async fn get_meta(&self) -> MonitorResult<Option<MonitorMeta>>;

    async fn history_since(&self, since: DateTime<Utc>) -> MonitorResult<Vec<HistoryEntry>>;

    /// Newest first.
    async fn recent_history(&self, limit: i64) -> MonitorResult<Vec<HistoryEntry>>;
}
