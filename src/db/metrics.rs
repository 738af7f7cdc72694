use crate::db::RepoResult;
use crate::domain::models::{DashboardMetric, MetricPeriod};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

const METRIC_COLUMNS: &str =
    "id, user_id, metric_name, period, period_start, period_end, value, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct MetricValue {
    pub name: &'static str,
    pub period: MetricPeriod,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub value: serde_json::Value,
}

pub async fn upsert(pool: &PgPool, user_id: Uuid, metric: &MetricValue) -> RepoResult<DashboardMetric> {
    let row = sqlx::query_as::<_, DashboardMetric>(&format!(
        r#"
        INSERT INTO dashboard_metrics (id, user_id, metric_name, period, period_start, period_end, value)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id, metric_name, period, period_start)
        DO UPDATE SET value = EXCLUDED.value, period_end = EXCLUDED.period_end, updated_at = now()
        RETURNING {METRIC_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(metric.name)
    .bind(metric.period)
    .bind(metric.period_start)
    .bind(metric.period_end)
    .bind(&metric.value)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

/// Latest stored value of every metric for the period.
pub async fn latest(pool: &PgPool, user_id: Uuid, period: MetricPeriod) -> RepoResult<Vec<DashboardMetric>> {
    let rows = sqlx::query_as::<_, DashboardMetric>(&format!(
        r#"
        SELECT DISTINCT ON (metric_name) {METRIC_COLUMNS}
        FROM dashboard_metrics
        WHERE user_id = $1 AND period = $2
        ORDER BY metric_name, period_start DESC
        "#
    ))
    .bind(user_id)
    .bind(period)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
