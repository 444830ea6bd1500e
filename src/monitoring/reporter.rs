use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::change_detector::DiffSummary;
use super::store::{HistoryEntry, MonitorMeta, SnapshotStore};
use crate::core::MonitorResult;

const RECENT_WINDOW_DAYS: i64 = 7;
const HISTORY_LIMIT: i64 = 30;
const MAX_ACHIEVEMENTS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentStats {
    pub total_changes: usize,
    pub price_changes: usize,
    pub new_listings: usize,
    pub removed_listings: usize,
}

impl RecentStats {
    pub fn aggregate(history: &[HistoryEntry]) -> Self {
        history.iter().fold(Self::default(), |mut acc, entry| {
            let counts = &entry.changes_summary;
            acc.total_changes += counts.total_changes;
            acc.price_changes += counts.price_changes;
            acc.new_listings += counts.new_listings;
            acc.removed_listings += counts.removed_listings;
            acc
        })
    }
}

/// Running totals sent along with every notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringStats {
    pub monitoring_days: i64,
    pub total_checks: i64,
    pub recent_stats: RecentStats,
    pub last_check_time: DateTime<Utc>,
}

impl MonitoringStats {
    /// Used when the store cannot be reached.
    pub fn first_run(now: DateTime<Utc>) -> Self {
        Self {
            monitoring_days: 0,
            total_checks: 1,
            recent_stats: RecentStats::default(),
            last_check_time: now,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementKind {
    Milestone,
    Achievement,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Achievement {
    pub title: String,
    pub date: String,
    #[serde(rename = "type")]
    pub kind: AchievementKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalTotals {
    pub monitoring_days: i64,
    pub total_checks: i64,
    pub total_changes: usize,
    pub total_price_changes: usize,
    pub total_new_listings: usize,
    pub total_removed_listings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoricalStats {
    pub success: bool,
    pub stats: HistoricalTotals,
    pub achievements: Vec<Achievement>,
    pub history: Vec<HistoryEntry>,
    pub last_update: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl HistoricalStats {
    pub fn unavailable(now: DateTime<Utc>, note: impl Into<String>) -> Self {
        Self {
            success: true,
            stats: HistoricalTotals::default(),
            achievements: Vec::new(),
            history: Vec::new(),
            last_update: now,
            note: Some(note.into()),
        }
    }

    pub fn build(
        meta: Option<MonitorMeta>,
        history: Vec<HistoryEntry>,
        now: DateTime<Utc>,
    ) -> Self {
        let recent = RecentStats::aggregate(&history);
        let stats = HistoricalTotals {
            monitoring_days: meta.map(|m| monitoring_days(m.start_date, now)).unwrap_or(0),
            total_checks: meta.map(|m| m.total_checks).unwrap_or(0),
            total_changes: recent.total_changes,
            total_price_changes: recent.price_changes,
            total_new_listings: recent.new_listings,
            total_removed_listings: recent.removed_listings,
        };

        Self {
            success: true,
            achievements: achievements(meta.map(|m| m.start_date), &stats, now),
            stats,
            history,
            last_update: now,
            note: None,
        }
    }
}

/// Whole days elapsed since `start`.
pub fn monitoring_days(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    (now - start).num_days().max(0)
}

fn achievements(
    start_date: Option<DateTime<Utc>>,
    stats: &HistoricalTotals,
    now: DateTime<Utc>,
) -> Vec<Achievement> {
    let day = |at: DateTime<Utc>| at.format("%Y-%m-%d").to_string();
    let mut earned = Vec::new();

    if let Some(start) = start_date {
        let milestones = [
            (1, 0, "Monitoring started"),
            (7, 7, "7 days of continuous monitoring"),
            (30, 30, "30 days of continuous monitoring"),
        ];
        for (required_days, offset, title) in milestones {
            if stats.monitoring_days >= required_days {
                earned.push(Achievement {
                    title: title.to_string(),
                    date: day(start + Duration::days(offset)),
                    kind: AchievementKind::Milestone,
                });
            }
        }
    }

    if stats.total_checks >= 100 {
        earned.push(Achievement {
            title: "100+ checks completed".to_string(),
            date: day(now),
            kind: AchievementKind::Achievement,
        });
    }

    if stats.total_changes >= 50 {
        earned.push(Achievement {
            title: "50+ listing changes detected".to_string(),
            date: day(now),
            kind: AchievementKind::Achievement,
        });
    }

    earned.truncate(MAX_ACHIEVEMENTS);
    earned
}

pub struct MonitorReporter {
    store: Arc<dyn SnapshotStore>,
}

impl MonitorReporter {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Counts this check and summarizes the last week of history.
    pub async fn monitoring_stats(&self, now: DateTime<Utc>) -> MonitorResult<MonitoringStats> {
        let meta = self.store.record_check(now).await?;
        let history = self
            .store
            .history_since(now - Duration::days(RECENT_WINDOW_DAYS))
            .await?;

        Ok(MonitoringStats {
            monitoring_days: monitoring_days(meta.start_date, now),
            total_checks: meta.total_checks,
            recent_stats: RecentStats::aggregate(&history),
            last_check_time: now,
        })
    }

    /// Never fails; store errors produce the zeroed response with a note.
    pub async fn historical_stats(&self, now: DateTime<Utc>) -> HistoricalStats {
        let meta = match self.store.get_meta().await {
            Ok(meta) => meta,
            Err(e) => {
                tracing::error!("Historical stats: metadata query failed: {}", e);
                return HistoricalStats::unavailable(
                    now,
                    "Store unavailable, returning default statistics",
                );
            }
        };

        match self.store.recent_history(HISTORY_LIMIT).await {
            Ok(history) => HistoricalStats::build(meta, history, now),
            Err(e) => {
                tracing::error!("Historical stats: history query failed: {}", e);
                HistoricalStats::unavailable(now, "Store unavailable, returning default statistics")
            }
        }
    }

    pub fn format_summary(changes: &DiffSummary, stats: &MonitoringStats) -> String {
        let mut output = String::new();

        output.push_str("\n╔════════════════════════════════════════════════════════════╗\n");
        output.push_str("║             SELLER MONITORING SUMMARY                      ║\n");
        output.push_str("╚════════════════════════════════════════════════════════════╝\n\n");

        output.push_str(&format!(
            "Checked at {} (day {}, check #{})\n\n",
            stats.last_check_time.format("%Y-%m-%d %H:%M:%S UTC"),
            stats.monitoring_days,
            stats.total_checks
        ));

        if !changes.has_changes {
            output.push_str("No changes since the previous check.\n");
        } else {
            output.push_str(&format!("Changes detected: {}\n", changes.total_changes()));
            output.push_str(&format!("   • New listings:     {}\n", changes.new_listings.len()));
            output.push_str(&format!(
                "   • Removed listings: {}\n",
                changes.removed_listings.len()
            ));
            output.push_str(&format!("   • Price changes:    {}\n", changes.price_changes.len()));
            output.push_str(&format!("   • Title changes:    {}\n", changes.title_changes.len()));
            output.push_str(&format!("   • Image changes:    {}\n", changes.image_changes.len()));
            output.push_str(&format!("   • Rating changes:   {}\n", changes.rating_changes.len()));

            for price in changes.price_changes.iter().take(10) {
                let percent = price
                    .percent_change
                    .value()
                    .map(|p| format!("{:+.2}%", p))
                    .unwrap_or_else(|| "n/a".to_string());
                output.push_str(&format!(
                    "   {} [{}] {} -> {} ({})\n",
                    price.item_id,
                    price.seller,
                    format_price(price.old_price),
                    format_price(price.new_price),
                    percent
                ));
            }
        }

        output.push_str(&format!(
            "\nLast {} days: {} changes ({} price, {} new, {} removed)\n",
            RECENT_WINDOW_DAYS,
            stats.recent_stats.total_changes,
            stats.recent_stats.price_changes,
            stats.recent_stats.new_listings,
            stats.recent_stats.removed_listings
        ));
        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");

        output
    }
}

fn format_price(price: Option<f64>) -> String {
    price.map(|p| format!("{:.2}", p)).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MonitorError;
    use crate::monitoring::change_detector::ChangeCounts;
    use crate::monitoring::store::MockSnapshotStore;
    use chrono::TimeZone;

    fn entry(total: usize, price: usize, new: usize, removed: usize) -> HistoryEntry {
        HistoryEntry {
            changes_summary: ChangeCounts {
                has_changes: total > 0,
                total_changes: total,
                price_changes: price,
                new_listings: new,
                removed_listings: removed,
                ..Default::default()
            },
            monitoring_day: 0,
            total_checks: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_recent_stats_sum_history() {
        let stats = RecentStats::aggregate(&[entry(3, 1, 1, 1), entry(5, 5, 0, 0)]);
        assert_eq!(
            stats,
            RecentStats {
                total_changes: 8,
                price_changes: 6,
                new_listings: 1,
                removed_listings: 1,
            }
        );
    }

    #[test]
    fn test_monitoring_days_counts_whole_days() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(monitoring_days(start, start + Duration::hours(47)), 1);
        assert_eq!(monitoring_days(start, start + Duration::hours(48)), 2);
        assert_eq!(monitoring_days(start, start - Duration::hours(1)), 0);
    }

    #[test]
    fn test_achievements_are_capped() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let now = start + Duration::days(40);
        let meta = MonitorMeta {
            start_date: start,
            total_checks: 250,
        };
        let history = vec![entry(60, 10, 20, 30)];

        let stats = HistoricalStats::build(Some(meta), history, now);
        assert_eq!(stats.stats.monitoring_days, 40);
        assert_eq!(stats.stats.total_changes, 60);
        assert_eq!(stats.achievements.len(), 4);
        assert_eq!(stats.achievements[0].date, "2025-01-01");
        assert_eq!(stats.achievements[1].date, "2025-01-08");
        assert_eq!(stats.achievements[3].kind, AchievementKind::Achievement);
    }

    #[test]
    fn test_no_meta_means_no_milestones() {
        let stats = HistoricalStats::build(None, vec![], Utc::now());
        assert_eq!(stats.stats.total_checks, 0);
        assert!(stats.achievements.is_empty());
        assert!(stats.note.is_none());
    }

    #[tokio::test]
    async fn test_monitoring_stats_uses_meta_and_last_week() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 9, 0, 0).unwrap();
        let mut store = MockSnapshotStore::new();
        store.expect_record_check().returning(move |_| {
            Ok(MonitorMeta {
                start_date: now - Duration::days(3),
                total_checks: 12,
            })
        });
        store
            .expect_history_since()
            .withf(move |since| *since == now - Duration::days(7))
            .returning(|_| Ok(vec![entry(2, 1, 1, 0)]));

        let reporter = MonitorReporter::new(Arc::new(store));
        let stats = reporter.monitoring_stats(now).await.unwrap();

        assert_eq!(stats.monitoring_days, 3);
        assert_eq!(stats.total_checks, 12);
        assert_eq!(stats.recent_stats.total_changes, 2);
        assert_eq!(stats.last_check_time, now);
    }

    #[tokio::test]
    async fn test_historical_stats_fall_back_on_store_error() {
        let mut store = MockSnapshotStore::new();
        store
            .expect_get_meta()
            .returning(|| Err(MonitorError::Database(sqlx::Error::PoolTimedOut)));

        let reporter = MonitorReporter::new(Arc::new(store));
        let stats = reporter.historical_stats(Utc::now()).await;

        assert!(stats.success);
        assert!(stats.note.is_some());
        assert_eq!(stats.stats, HistoricalTotals::default());
    }

    #[test]
    fn test_summary_mentions_price_moves() {
        let mut changes = DiffSummary::default();
        changes.price_changes.push(crate::monitoring::change_detector::PriceChange {
            item_id: "1".to_string(),
            seller: "s".to_string(),
            title: "iPhone".to_string(),
            old_price: Some(500.0),
            new_price: Some(450.0),
            change: Some(-50.0),
            percent_change: crate::monitoring::change_detector::PercentChange::Finite(-10.0),
            url: None,
        });
        changes.price_changes.push(crate::monitoring::change_detector::PriceChange {
            item_id: "2".to_string(),
            seller: "s".to_string(),
            title: "iPad".to_string(),
            old_price: Some(0.0),
            new_price: Some(20.0),
            change: Some(20.0),
            percent_change: crate::monitoring::change_detector::PercentChange::Undefined,
            url: None,
        });
        changes.has_changes = true;

        let stats = MonitoringStats::first_run(Utc::now());
        let text = MonitorReporter::format_summary(&changes, &stats);
        assert!(text.contains("500.00 -> 450.00 (-10.00%)"));
        assert!(text.contains("0.00 -> 20.00 (n/a)"));
        assert!(text.contains("Changes detected: 2"));
    }
}
