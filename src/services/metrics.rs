use crate::db::metrics::{self, MetricValue};
use crate::db::{conversations, leads, tasks, users};
use crate::domain::models::{DashboardMetric, LeadStage, MetricPeriod};
use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

/// UTC window `[start, end)` of the period containing `now`.
pub fn period_window(period: MetricPeriod, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let today = now.date_naive();
    let (start, end) = match period {
        MetricPeriod::Day => (today, today + Duration::days(1)),
        MetricPeriod::Week => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            (monday, monday + Duration::days(7))
        }
        MetricPeriod::Month => {
            let first = first_of_month(today.year(), today.month());
            let next = if today.month() == 12 {
                first_of_month(today.year() + 1, 1)
            } else {
                first_of_month(today.year(), today.month() + 1)
            };
            (first, next)
        }
    };
    (midnight(start), midnight(end))
}

fn first_of_month(year: i32, month: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN))
}

/// Share of decided leads that converted, rounded to 4 places.
pub fn conversion_rate(converted: i64, lost: i64) -> f64 {
    let decided = converted + lost;
    if decided == 0 {
        return 0.0;
    }
    (converted as f64 / decided as f64 * 10_000.0).round() / 10_000.0
}

async fn compute(
    pool: &PgPool,
    user_id: Uuid,
    period: MetricPeriod,
    now: DateTime<Utc>,
) -> Result<Vec<MetricValue>> {
    let (from, to) = period_window(period, now);
    let owner = Some(user_id);

    let mut stages = Map::new();
    for row in leads::count_by_stage(pool, owner).await? {
        stages.insert(stage_key(row.stage), json!(row.count));
    }

    let created = leads::count_created_in_window(pool, user_id, from, to).await?;
    let converted = leads::count_stage_in_window(pool, user_id, LeadStage::Converted, from, to).await?;
    let lost = leads::count_stage_in_window(pool, user_id, LeadStage::Lost, from, to).await?;

    let mut by_type = Map::new();
    let mut interactions = 0;
    for row in conversations::count_by_type_in_window(pool, user_id, from, to).await? {
        interactions += row.count;
        by_type.insert(
            serde_json::to_value(row.conversation_type)?
                .as_str()
                .unwrap_or_default()
                .to_string(),
            json!(row.count),
        );
    }

    let completed = tasks::count_completed_in_window(pool, user_id, from, to).await?;
    let overdue = tasks::count_overdue(pool, owner, now).await?;
    let mut open = 0;
    for row in tasks::count_by_status(pool, owner).await? {
        if row.status.is_open() {
            open += row.count;
        }
    }

    let metric = |name: &'static str, value: Value| MetricValue {
        name,
        period,
        period_start: from,
        period_end: to,
        value,
    };

    Ok(vec![
        metric("lead_stages", Value::Object(stages)),
        metric(
            "conversion",
            json!({
                "created": created,
                "converted": converted,
                "lost": lost,
                "rate": conversion_rate(converted, lost),
            }),
        ),
        metric("activity", json!({ "total": interactions, "byType": by_type })),
        metric(
            "tasks",
            json!({ "completed": completed, "open": open, "overdue": overdue }),
        ),
    ])
}

fn stage_key(stage: LeadStage) -> String {
    serde_json::to_value(stage)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default()
}

/// Recomputes and stores every period for one user.
pub async fn refresh_user(pool: &PgPool, user_id: Uuid, now: DateTime<Utc>) -> Result<Vec<DashboardMetric>> {
    let mut stored = Vec::new();
    for period in MetricPeriod::ALL {
        for value in compute(pool, user_id, period, now).await? {
            stored.push(metrics::upsert(pool, user_id, &value).await?);
        }
    }
    Ok(stored)
}

pub async fn refresh_all(pool: &PgPool) -> Result<usize> {
    let now = Utc::now();
    let mut refreshed = 0;
    for user in users::list_active(pool).await? {
        match refresh_user(pool, user.id, now).await {
            Ok(_) => refreshed += 1,
            Err(e) => tracing::error!("Metrics refresh failed for user {}: {}", user.id, e),
        }
    }
    Ok(refreshed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 15, 0).unwrap()
    }

    #[test]
    fn day_window_is_midnight_aligned() {
        let (start, end) = period_window(MetricPeriod::Day, at(2024, 5, 17, 13));
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 5, 18, 0, 0, 0).unwrap());
    }

    #[test]
    fn week_window_starts_monday() {
        // 2024-05-19 is a Sunday
        let (start, end) = period_window(MetricPeriod::Week, at(2024, 5, 19, 23));
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 5, 13, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 5, 20, 0, 0, 0).unwrap());
    }

    #[test]
    fn month_window_rolls_over_year() {
        let (start, end) = period_window(MetricPeriod::Month, at(2024, 12, 31, 8));
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn conversion_rate_handles_empty() {
        assert_eq!(conversion_rate(0, 0), 0.0);
        assert_eq!(conversion_rate(1, 2), 0.3333);
        assert_eq!(conversion_rate(3, 0), 1.0);
    }

    #[test]
    fn stage_keys_match_wire_names() {
        assert_eq!(stage_key(LeadStage::Negotiation), "NEGOTIATION");
    }
}
