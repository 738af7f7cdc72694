use crate::db::leads::{self, ScoreStats, StageCount};
use crate::db::{conversations, metrics, notifications, suggestions, tasks};
use crate::domain::models::{DashboardMetric, MetricPeriod};
use crate::services::metrics::refresh_user;
use crate::state::SharedState;
use crate::web::session::UserSession;
use crate::web::{internal, reject};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub struct MetricsQuery {
    #[serde(default = "default_period")]
    pub period: MetricPeriod,
}

fn default_period() -> MetricPeriod {
    MetricPeriod::Week
}

#[derive(Serialize)]
pub struct Summary {
    pub leads_by_stage: Vec<StageCount>,
    pub score: ScoreStats,
    pub open_suggestions: i64,
    pub open_tasks: i64,
    pub overdue_tasks: i64,
    pub follow_ups_due: i64,
    pub unread_notifications: i64,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/summary", get(summary))
        .route("/metrics", get(get_metrics))
        .route("/metrics/refresh", post(refresh_metrics))
        .with_state(state)
}

async fn summary(
    State(state): State<SharedState>,
    session: UserSession,
) -> Result<Json<Summary>, StatusCode> {
    let scope = session.owner_scope();
    let now = Utc::now();
    let pool = &state.pool;

    let leads_by_stage = leads::count_by_stage(pool, scope).await.map_err(reject)?;
    let score = leads::score_stats(pool, scope).await.map_err(reject)?;
    let open_suggestions = suggestions::count_open(pool, scope).await.map_err(reject)?;
    let open_tasks: i64 = tasks::count_by_status(pool, scope)
        .await
        .map_err(reject)?
        .into_iter()
        .filter(|row| row.status.is_open())
        .map(|row| row.count)
        .sum();
    let overdue_tasks = tasks::count_overdue(pool, scope, now).await.map_err(reject)?;
    let follow_ups_due = conversations::count_due_follow_ups(pool, scope, now)
        .await
        .map_err(reject)?;
    let unread_notifications = notifications::unread_count(pool, session.user_id)
        .await
        .map_err(reject)?;

    Ok(Json(Summary {
        leads_by_stage,
        score,
        open_suggestions,
        open_tasks,
        overdue_tasks,
        follow_ups_due,
        unread_notifications,
    }))
}

/// Stored metrics for the period; computed on the spot the first time.
async fn get_metrics(
    State(state): State<SharedState>,
    session: UserSession,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<Vec<DashboardMetric>>, StatusCode> {
    let stored = metrics::latest(&state.pool, session.user_id, query.period)
        .await
        .map_err(reject)?;
    if !stored.is_empty() {
        return Ok(Json(stored));
    }

    let fresh = refresh_user(&state.pool, session.user_id, Utc::now())
        .await
        .map_err(internal)?;
    Ok(Json(
        fresh
            .into_iter()
            .filter(|m| m.period == query.period)
            .collect(),
    ))
}

async fn refresh_metrics(
    State(state): State<SharedState>,
    session: UserSession,
) -> Result<Json<Vec<DashboardMetric>>, StatusCode> {
    let fresh = refresh_user(&state.pool, session.user_id, Utc::now())
        .await
        .map_err(internal)?;
    tracing::debug!("Refreshed {} metrics for user {}", fresh.len(), session.user_id);
    Ok(Json(fresh))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_defaults_to_week() {
        let q: MetricsQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.period, MetricPeriod::Week);
        let q: MetricsQuery = serde_json::from_str(r#"{"period":"MONTH"}"#).unwrap();
        assert_eq!(q.period, MetricPeriod::Month);
    }
}
