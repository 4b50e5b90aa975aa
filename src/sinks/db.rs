//! DB sink and retention cleanup (C6). Uses `sqlx::Any` so the
//! same SQL runs against SQLite and PostgreSQL (`database_url` dictates
//! which driver `Any` picks at connect time), grounded on the
//! multi-row-insert batching style of `ingestion.rs`'s `QueryBuilder`
//! usage, generalized from a Postgres-only builder to `Any` for
//! cross-backend support.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::any::AnyPoolOptions;
use sqlx::{AnyPool, Row};
use tracing::{debug, info, warn};

use crate::config::{CleanupConfig, DbConfig};
use crate::error::SinkError;
use crate::model::WeatherEvent;
use crate::stats::PipelineStats;

pub struct DbSink {
    name: String,
    pool: AnyPool,
}

impl DbSink {
    pub async fn connect(config: &DbConfig) -> Result<Self, SinkError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(config.pool_size)
            .idle_timeout(std::time::Duration::from_secs(config.pool_recycle_seconds))
            .connect(&config.database_url)
            .await
            .map_err(|e| SinkError::DatabaseUnavailable(e.to_string()))?;

        init_schema(&pool)
            .await
            .map_err(|e| SinkError::DatabaseUnavailable(e.to_string()))?;

        Ok(Self {
            name: "db".to_string(),
            pool,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pool(&self) -> AnyPool {
        self.pool.clone()
    }

    /// One `events` row, N segment rows, M metadata rows, in a single
    /// transaction — a failure rolls back the whole event.
    pub async fn send(&self, event: &WeatherEvent) -> Result<(), SinkError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| SinkError::DatabaseUnavailable(e.to_string()))?;

        sqlx::query(
            "INSERT INTO events \
             (event_id, product_id, cccc, awips_id, product_category, issued_at, received_at, wmo, text) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(event.event_id.to_string())
        .bind(&event.product_id)
        .bind(&event.cccc)
        .bind(&event.awips_id)
        .bind(&event.product_category)
        .bind(event.issued_at)
        .bind(event.received_at)
        .bind(&event.wmo)
        .bind(&event.text)
        .execute(&mut *tx)
        .await
        .map_err(|e| SinkError::ConstraintViolation(e.to_string()))?;

        for (index, segment) in event.segments.iter().enumerate() {
            let vtec_expires_at = segment_vtec_expiry(segment);
            let polygon_wkt = segment.polygon.as_ref().map(|points| polygon_to_wkt(points));
            let body = serde_json::to_string(segment).unwrap_or_default();

            sqlx::query(
                "INSERT INTO event_content \
                 (event_id, segment_index, ugc_expires_at, vtec_expires_at, polygon_wkt, body) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(event.event_id.to_string())
            .bind(index as i64)
            .bind(segment.ugc_expires_at)
            .bind(vtec_expires_at)
            .bind(polygon_wkt)
            .bind(body)
            .execute(&mut *tx)
            .await
            .map_err(|e| SinkError::ConstraintViolation(e.to_string()))?;

            for (key, value) in &segment.ibw_tags {
                sqlx::query(
                    "INSERT INTO event_metadata (event_id, key, value) VALUES (?, ?, ?)",
                )
                .bind(event.event_id.to_string())
                .bind(format!("segment_{index}.ibw.{key}"))
                .bind(value)
                .execute(&mut *tx)
                .await
                .map_err(|e| SinkError::ConstraintViolation(e.to_string()))?;
            }

            for (vtec_index, vtec) in segment.vtec.iter().enumerate() {
                sqlx::query(
                    "INSERT INTO event_metadata (event_id, key, value) VALUES (?, ?, ?)",
                )
                .bind(event.event_id.to_string())
                .bind(format!("segment_{index}.vtec.{vtec_index}"))
                .bind(format!(
                    "{:?}.{}.{}.{:?}.{}",
                    vtec.action, vtec.office, vtec.phenomenon, vtec.significance, vtec.etn
                ))
                .execute(&mut *tx)
                .await
                .map_err(|e| SinkError::ConstraintViolation(e.to_string()))?;
            }
        }

        tx.commit()
            .await
            .map_err(|e| SinkError::DatabaseUnavailable(e.to_string()))?;
        Ok(())
    }
}

fn segment_vtec_expiry(segment: &crate::model::Segment) -> Option<DateTime<Utc>> {
    if segment.vtec.is_empty() {
        return None;
    }
    // "until further notice" (end = zeros, decoded as None) never
    // triggers VTEC-based cleanup for this segment.
    if segment.vtec.iter().any(|v| v.end.is_none()) {
        return None;
    }
    segment.vtec.iter().filter_map(|v| v.end).max()
}

fn polygon_to_wkt(points: &[crate::model::LatLon]) -> String {
    let coords: Vec<String> = points
        .iter()
        .map(|p| format!("{} {}", p.lon, p.lat))
        .collect();
    format!("POLYGON(({}))", coords.join(", "))
}

pub async fn init_schema(pool: &AnyPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS events ( \
            event_id TEXT PRIMARY KEY, \
            product_id TEXT NOT NULL, \
            cccc TEXT NOT NULL, \
            awips_id TEXT NOT NULL, \
            product_category TEXT NOT NULL, \
            issued_at TIMESTAMP NOT NULL, \
            received_at TIMESTAMP NOT NULL, \
            wmo TEXT NOT NULL, \
            text TEXT NOT NULL \
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS event_content ( \
            event_id TEXT NOT NULL, \
            segment_index INTEGER NOT NULL, \
            ugc_expires_at TIMESTAMP NOT NULL, \
            vtec_expires_at TIMESTAMP, \
            polygon_wkt TEXT, \
            body TEXT NOT NULL \
        )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS event_metadata ( \
            event_id TEXT NOT NULL, \
            key TEXT NOT NULL, \
            value TEXT NOT NULL \
        )",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Per-strategy deletion counts for one cleanup cycle.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct CleanupReport {
    pub product_expiration_deleted: u64,
    pub vtec_based_deleted: u64,
    pub product_specific_deleted: u64,
    pub age_based_deleted: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.product_expiration_deleted
            + self.vtec_based_deleted
            + self.product_specific_deleted
            + self.age_based_deleted
    }
}

/// `product_category → retention_hours`, built from [`CleanupConfig`]
fn retention_bucket_hours(config: &CleanupConfig, category: &str) -> Option<i64> {
    match category {
        "TOR" | "SVR" | "EWW" | "SMW" => Some(config.short_duration_retention_hours),
        "FFW" | "FLW" | "CFW" => Some(config.medium_duration_retention_hours),
        "WSW" | "FFA" => Some(config.long_duration_retention_hours),
        "ZFP" | "NOW" | "SPS" => Some(config.routine_retention_hours),
        "PNS" | "LSR" | "PSH" => Some(config.administrative_retention_days * 24),
        _ => None,
    }
}

/// Run one cleanup cycle. In dry-run mode this only counts eligible
/// rows; nothing is deleted.
pub async fn run_cleanup_cycle(
    pool: &AnyPool,
    config: &CleanupConfig,
    now: DateTime<Utc>,
) -> Result<CleanupReport, SinkError> {
    let mut report = CleanupReport::default();
    let mut budget = config.max_deletions_per_cycle as i64;

    if budget > 0 && config.respect_ugc_expiration {
        let deleted = delete_eligible(
            pool,
            config.dry_run_mode,
            budget,
            "SELECT DISTINCT e.event_id FROM events e \
             WHERE NOT EXISTS ( \
                SELECT 1 FROM event_content c \
                WHERE c.event_id = e.event_id AND c.ugc_expires_at >= ? \
             )",
            now,
        )
        .await?;
        report.product_expiration_deleted = deleted;
        budget -= deleted as i64;
    }

    if budget > 0 && config.respect_vtec_expiration {
        let threshold = now - chrono::Duration::hours(config.vtec_expiration_buffer_hours);
        let deleted = delete_eligible(
            pool,
            config.dry_run_mode,
            budget,
            "SELECT DISTINCT e.event_id FROM events e \
             WHERE EXISTS ( \
                SELECT 1 FROM event_content c WHERE c.event_id = e.event_id \
             ) AND NOT EXISTS ( \
                SELECT 1 FROM event_content c \
                WHERE c.event_id = e.event_id \
                  AND (c.vtec_expires_at IS NULL OR c.vtec_expires_at >= ?) \
             )",
            threshold,
        )
        .await?;
        report.vtec_based_deleted = deleted;
        budget -= deleted as i64;
    }

    if budget > 0 && config.use_product_specific_retention {
        for (category, hours) in bucket_table(config) {
            if budget <= 0 {
                break;
            }
            let threshold = now - chrono::Duration::hours(hours);
            let deleted = delete_eligible_by_category(
                pool,
                config.dry_run_mode,
                budget,
                &category,
                threshold,
            )
            .await?;
            report.product_specific_deleted += deleted;
            budget -= deleted as i64;
        }
    }

    if budget > 0 {
        let threshold = now - chrono::Duration::days(config.default_retention_days);
        // Categories with their own bucket in `bucket_table` already had
        // their chance above; a category with a *longer* bucket than
        // `default_retention_days` must not be swept up again here.
        let handled = bucket_table(config);
        let select_sql = if config.use_product_specific_retention && !handled.is_empty() {
            let placeholders = handled.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
            format!(
                "SELECT event_id FROM events WHERE received_at < ? \
                 AND product_category NOT IN ({placeholders})"
            )
        } else {
            "SELECT event_id FROM events WHERE received_at < ?".to_string()
        };
        let deleted = delete_eligible_with_categories(
            pool,
            config.dry_run_mode,
            budget,
            &select_sql,
            threshold,
            &handled,
        )
        .await?;
        report.age_based_deleted = deleted;
    }

    if config.dry_run_mode {
        info!(total = report.total(), "cleanup dry-run would delete");
    } else {
        info!(total = report.total(), "cleanup cycle complete");
    }

    Ok(report)
}

fn bucket_table(config: &CleanupConfig) -> Vec<(String, i64)> {
    [
        "TOR", "SVR", "EWW", "SMW", "FFW", "FLW", "CFW", "WSW", "FFA", "ZFP", "NOW", "SPS", "PNS",
        "LSR", "PSH",
    ]
    .iter()
    .filter_map(|category| {
        retention_bucket_hours(config, category).map(|hours| (category.to_string(), hours))
    })
    .collect()
}

async fn delete_eligible(
    pool: &AnyPool,
    dry_run: bool,
    limit: i64,
    select_sql: &str,
    bound: DateTime<Utc>,
) -> Result<u64, SinkError> {
    let ids: Vec<String> = sqlx::query(&format!(
        "SELECT t.event_id FROM ({select_sql}) t LIMIT {limit}"
    ))
    .bind(bound)
    .fetch_all(pool)
    .await
    .map_err(|e| SinkError::DatabaseUnavailable(e.to_string()))?
    .iter()
    .map(|row| row.get::<String, _>("event_id"))
    .collect();

    if ids.is_empty() || dry_run {
        return Ok(ids.len() as u64);
    }
    delete_by_ids(pool, &ids).await
}

/// Like [`delete_eligible`], but binds a trailing list of category
/// exclusions after the date bound (for the default-retention step,
/// which must skip categories already swept by product-specific buckets).
async fn delete_eligible_with_categories(
    pool: &AnyPool,
    dry_run: bool,
    limit: i64,
    select_sql: &str,
    bound: DateTime<Utc>,
    excluded_categories: &[(String, i64)],
) -> Result<u64, SinkError> {
    let mut query = sqlx::query(&format!(
        "SELECT t.event_id FROM ({select_sql}) t LIMIT {limit}"
    ))
    .bind(bound);
    for (category, _) in excluded_categories {
        query = query.bind(category);
    }
    let ids: Vec<String> = query
        .fetch_all(pool)
        .await
        .map_err(|e| SinkError::DatabaseUnavailable(e.to_string()))?
        .iter()
        .map(|row| row.get::<String, _>("event_id"))
        .collect();

    if ids.is_empty() || dry_run {
        return Ok(ids.len() as u64);
    }
    delete_by_ids(pool, &ids).await
}

async fn delete_eligible_by_category(
    pool: &AnyPool,
    dry_run: bool,
    limit: i64,
    category: &str,
    threshold: DateTime<Utc>,
) -> Result<u64, SinkError> {
    let ids: Vec<String> = sqlx::query(
        "SELECT event_id FROM events WHERE product_category = ? AND received_at < ? LIMIT ?",
    )
    .bind(category)
    .bind(threshold)
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| SinkError::DatabaseUnavailable(e.to_string()))?
    .iter()
    .map(|row| row.get::<String, _>("event_id"))
    .collect();

    if ids.is_empty() || dry_run {
        return Ok(ids.len() as u64);
    }
    delete_by_ids(pool, &ids).await
}

async fn delete_by_ids(pool: &AnyPool, ids: &[String]) -> Result<u64, SinkError> {
    let mut deleted = 0u64;
    for id in ids {
        for table in ["event_metadata", "event_content", "events"] {
            sqlx::query(&format!("DELETE FROM {table} WHERE event_id = ?"))
                .bind(id)
                .execute(pool)
                .await
                .map_err(|e| SinkError::DatabaseUnavailable(e.to_string()))?;
        }
        deleted += 1;
    }
    Ok(deleted)
}

/// Background cleanup task.
pub async fn run_cleanup_loop(pool: AnyPool, config: CleanupConfig, stats: Arc<PipelineStats>) {
    if !config.cleanup_enabled {
        debug!("db cleanup disabled by configuration");
        return;
    }
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(
        config.cleanup_interval_hours * 3600,
    ));
    loop {
        ticker.tick().await;
        match run_cleanup_cycle(&pool, &config, Utc::now()).await {
            Ok(report) => {
                stats.record_cleanup_deleted("product_expiration", report.product_expiration_deleted);
                stats.record_cleanup_deleted("vtec_based", report.vtec_based_deleted);
                stats.record_cleanup_deleted("product_specific", report.product_specific_deleted);
                stats.record_cleanup_deleted("age_based", report.age_based_deleted);
            }
            Err(e) => warn!("cleanup cycle failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Vtec, VtecAction, VtecProductStatus, VtecSignificance};

    fn vtec(end: Option<DateTime<Utc>>) -> Vtec {
        Vtec {
            fixed: VtecProductStatus::Operational,
            action: VtecAction::New,
            office: "KTOP".to_string(),
            phenomenon: "TO".to_string(),
            significance: VtecSignificance::Warning,
            etn: 1,
            begin: Some(Utc::now()),
            end,
        }
    }

    fn segment_with_vtec(vtecs: Vec<Vtec>) -> crate::model::Segment {
        crate::model::Segment {
            ugc_codes: Default::default(),
            ugc_expires_at: Utc::now(),
            vtec: vtecs,
            h_vtec: None,
            headlines: Vec::new(),
            polygon: None,
            time_mot_loc: None,
            ibw_tags: Default::default(),
            geo: Vec::new(),
        }
    }

    #[test]
    fn ufn_vtec_never_expires() {
        let segment = segment_with_vtec(vec![vtec(None)]);
        assert_eq!(segment_vtec_expiry(&segment), None);
    }

    #[test]
    fn vtec_expiry_is_latest_end() {
        let a = Utc::now();
        let b = a + chrono::Duration::hours(1);
        let segment = segment_with_vtec(vec![vtec(Some(a)), vtec(Some(b))]);
        assert_eq!(segment_vtec_expiry(&segment), Some(b));
    }

    #[test]
    fn retention_buckets_match_spec_table() {
        let config = CleanupConfig::default();
        assert_eq!(retention_bucket_hours(&config, "TOR"), Some(1));
        assert_eq!(retention_bucket_hours(&config, "FFW"), Some(24));
        assert_eq!(retention_bucket_hours(&config, "WSW"), Some(72));
        assert_eq!(retention_bucket_hours(&config, "ZFP"), Some(12));
        assert_eq!(retention_bucket_hours(&config, "PNS"), Some(30 * 24));
        assert_eq!(retention_bucket_hours(&config, "UNKNOWN"), None);
    }
}
