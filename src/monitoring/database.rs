use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;

use super::change_detector::ChangeCounts;
use super::listing::{Snapshot, StoredSnapshot};
use super::reporter::MonitoringStats;
use super::store::{HistoryEntry, MonitorMeta, SnapshotStore};
use crate::core::config::DatabaseConfig;
use crate::core::{MonitorError, MonitorResult};

const SNAPSHOT_ROW_ID: i32 = 1;
const META_ROW_ID: i32 = 1;

#[derive(sqlx::FromRow)]
struct HistoryRow {
    changes_summary: Json<ChangeCounts>,
    monitoring_day: i64,
    total_checks: i64,
    created_at: DateTime<Utc>,
}

impl From<HistoryRow> for HistoryEntry {
    fn from(row: HistoryRow) -> Self {
        Self {
            changes_summary: row.changes_summary.0,
            monitoring_day: row.monitoring_day,
            total_checks: row.total_checks,
            created_at: row.created_at,
        }
    }
}

pub struct SnapshotDatabase {
    pool: PgPool,
}

impl SnapshotDatabase {
    /// Builds the pool without connecting, so the service can start while
    /// the database is unreachable.
    pub fn connect_lazy(config: &DatabaseConfig) -> MonitorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect_lazy(&config.postgres_url)?;

        Ok(Self { pool })
    }

    pub async fn initialize_schema(&self) -> MonitorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seller_monitor (
                id INTEGER PRIMARY KEY,
                data JSONB NOT NULL,
                version BIGINT NOT NULL DEFAULT 1,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Tables created before versioning existed
        sqlx::query(
            r#"
            ALTER TABLE seller_monitor
            ADD COLUMN IF NOT EXISTS version BIGINT NOT NULL DEFAULT 1
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seller_monitor_history (
                id BIGSERIAL PRIMARY KEY,
                changes_summary JSONB NOT NULL,
                monitoring_day BIGINT NOT NULL DEFAULT 0,
                total_checks BIGINT NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_seller_monitor_history_created
            ON seller_monitor_history(created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS seller_monitor_meta (
                id INTEGER PRIMARY KEY,
                start_date TIMESTAMPTZ NOT NULL,
                total_checks BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("✅ Seller monitor schema initialized");

        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SnapshotDatabase {
    async fn load_snapshot(&self) -> MonitorResult<StoredSnapshot> {
        let row = sqlx::query_as::<_, (Json<Snapshot>, i64)>(
            r#"
            SELECT data, version FROM seller_monitor WHERE id = $1
            "#,
        )
        .bind(SNAPSHOT_ROW_ID)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((Json(snapshot), version)) => Ok(StoredSnapshot { version, snapshot }),
            None => {
                tracing::info!("No previous snapshot stored");
                Ok(StoredSnapshot::empty())
            }
        }
    }

    async fn snapshot_version(&self) -> MonitorResult<i64> {
        let version = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT version FROM seller_monitor WHERE id = $1
            "#,
        )
        .bind(SNAPSHOT_ROW_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(version.unwrap_or(0))
    }

    async fn save_snapshot(
        &self,
        snapshot: &Snapshot,
        expected_version: i64,
    ) -> MonitorResult<i64> {
        // The WHERE only guards the update branch; a fresh insert starts at 1,
        // so expected_version 0 fails if another cycle created the row first.
        let version = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO seller_monitor (id, data, version, updated_at)
            VALUES ($1, $2, 1, $3)
            ON CONFLICT (id) DO UPDATE SET
                data = excluded.data,
                version = seller_monitor.version + 1,
                updated_at = excluded.updated_at
            WHERE seller_monitor.version = $4
            RETURNING version
            "#,
        )
        .bind(SNAPSHOT_ROW_ID)
        .bind(Json(snapshot))
        .bind(Utc::now())
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        version.ok_or(MonitorError::VersionConflict {
            expected: expected_version,
        })
    }

    async fn append_history(
        &self,
        counts: &ChangeCounts,
        stats: &MonitoringStats,
    ) -> MonitorResult<()> {
        sqlx::query(
            r#"
            INSERT INTO seller_monitor_history
                (changes_summary, monitoring_day, total_checks, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(Json(counts))
        .bind(stats.monitoring_days)
        .bind(stats.total_checks)
        .bind(stats.last_check_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn record_check(&self, now: DateTime<Utc>) -> MonitorResult<MonitorMeta> {
        let (start_date, total_checks) = sqlx::query_as::<_, (DateTime<Utc>, i64)>(
            r#"
            INSERT INTO seller_monitor_meta (id, start_date, total_checks)
            VALUES ($1, $2, 1)
            ON CONFLICT (id) DO UPDATE SET
                total_checks = seller_monitor_meta.total_checks + 1
            RETURNING start_date, total_checks
            "#,
        )
        .bind(META_ROW_ID)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(MonitorMeta {
            start_date,
            total_checks,
        })
    }

    async fn get_meta(&self) -> MonitorResult<Option<MonitorMeta>> {
        let row = sqlx::query_as::<_, (DateTime<Utc>, i64)>(
            r#"
            SELECT start_date, total_checks FROM seller_monitor_meta WHERE id = $1
            "#,
        )
        .bind(META_ROW_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(start_date, total_checks)| MonitorMeta {
            start_date,
            total_checks,
        }))
    }

    async fn history_since(&self, since: DateTime<Utc>) -> MonitorResult<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT changes_summary, monitoring_day, total_checks, created_at
            FROM seller_monitor_history
            WHERE created_at >= $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HistoryEntry::from).collect())
    }

    async fn recent_history(&self, limit: i64) -> MonitorResult<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT changes_summary, monitoring_day, total_checks, created_at
            FROM seller_monitor_history
            ORDER BY created_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HistoryEntry::from).collect())
    }
}
