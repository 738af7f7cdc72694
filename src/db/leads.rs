use crate::db::users::normalize_email;
use crate::db::{Page, Paging, RepoResult};
use crate::domain::models::{Lead, LeadStage};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

pub(crate) const LEAD_COLUMNS: &str = "id, first_name, last_name, email, phone, company, title, \
     linkedin_url, source, notes, stage, tags, score, user_id, campaign_id, campaign_step, \
     campaign_step_at, campaign_finished_at, last_contacted_at, next_follow_up_at, created_at, updated_at";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLead {
    pub first_name: String,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub linkedin_url: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub stage: Option<LeadStage>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub title: Option<String>,
    pub linkedin_url: Option<String>,
    pub source: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub next_follow_up_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadOrder {
    #[default]
    CreatedAt,
    UpdatedAt,
    Score,
    LastContactedAt,
    Name,
}

impl LeadOrder {
    fn column(&self) -> &'static str {
        match self {
            LeadOrder::CreatedAt => "created_at",
            LeadOrder::UpdatedAt => "updated_at",
            LeadOrder::Score => "score",
            LeadOrder::LastContactedAt => "last_contacted_at",
            LeadOrder::Name => "lower(first_name || ' ' || coalesce(last_name, ''))",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LeadFilter {
    pub stage: Option<LeadStage>,
    pub tag: Option<String>,
    pub search: Option<String>,
    pub campaign_id: Option<Uuid>,
    pub min_score: Option<i32>,
    pub owner_id: Option<Uuid>,
    #[serde(default)]
    pub order_by: LeadOrder,
    #[serde(default)]
    pub desc: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl LeadFilter {
    pub fn paging(&self) -> Paging {
        Paging {
            limit: self.limit,
            offset: self.offset,
        }
    }

    /// Tag as stored: tags are written trimmed and lowercased.
    fn tag_value(&self) -> Option<String> {
        self.tag
            .as_deref()
            .map(normalize_tag)
            .filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Serialize, FromRow)]
pub struct StageCount {
    pub stage: LeadStage,
    pub count: i64,
}

#[derive(Debug, Serialize, FromRow)]
pub struct ScoreStats {
    pub count: i64,
    pub avg_score: Option<f64>,
    pub min_score: Option<i32>,
    pub max_score: Option<i32>,
}

fn push_scope(qb: &mut QueryBuilder<'_, Postgres>, owner: Option<Uuid>) {
    qb.push(" WHERE TRUE");
    if let Some(owner) = owner {
        qb.push(" AND user_id = ").push_bind(owner);
    }
}

fn push_filters<'a>(qb: &mut QueryBuilder<'a, Postgres>, owner: Option<Uuid>, filter: &'a LeadFilter) {
    push_scope(qb, owner);
    if let Some(stage) = filter.stage {
        qb.push(" AND stage = ").push_bind(stage);
    }
    if let Some(tag) = filter.tag_value() {
        qb.push(" AND ").push_bind(tag).push(" = ANY(tags)");
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", search.replace('%', "\\%").replace('_', "\\_"));
        qb.push(" AND (first_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR last_name ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR email ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR company ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
    if let Some(campaign_id) = filter.campaign_id {
        qb.push(" AND campaign_id = ").push_bind(campaign_id);
    }
    if let Some(min_score) = filter.min_score {
        qb.push(" AND score >= ").push_bind(min_score);
    }
}

/// `owner = None` lists every lead (admin scope); otherwise only that user's.
pub async fn list(pool: &PgPool, owner: Option<Uuid>, filter: &LeadFilter) -> RepoResult<Page<Lead>> {
    let limit = filter.paging().limit();
    let offset = filter.paging().offset();

    let mut count_qb = QueryBuilder::new("SELECT COUNT(*) FROM leads");
    push_filters(&mut count_qb, owner, filter);
    let total = count_qb.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut qb = QueryBuilder::new(format!("SELECT {LEAD_COLUMNS} FROM leads"));
    push_filters(&mut qb, owner, filter);
    qb.push(" ORDER BY ")
        .push(filter.order_by.column())
        .push(if filter.desc { " DESC NULLS LAST" } else { " ASC NULLS LAST" })
        .push(", id ASC LIMIT ")
        .push_bind(limit)
        .push(" OFFSET ")
        .push_bind(offset);

    let items = qb.build_query_as::<Lead>().fetch_all(pool).await?;
    Ok(Page {
        items,
        total,
        limit,
        offset,
    })
}

pub async fn find_by_id(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<Option<Lead>> {
    let lead = sqlx::query_as::<_, Lead>(&format!(
        "SELECT {LEAD_COLUMNS} FROM leads WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;
    Ok(lead)
}

/// Current stage of every listed lead the caller can see.
pub async fn stages_of(
    pool: &PgPool,
    ids: &[Uuid],
    owner: Option<Uuid>,
) -> RepoResult<Vec<(Uuid, LeadStage)>> {
    let rows: Vec<(Uuid, LeadStage)> = sqlx::query_as(
        "SELECT id, stage FROM leads WHERE id = ANY($1) AND ($2::uuid IS NULL OR user_id = $2)",
    )
    .bind(ids)
    .bind(owner)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_by_campaign(pool: &PgPool, campaign_id: Uuid) -> RepoResult<Vec<Lead>> {
    let leads = sqlx::query_as::<_, Lead>(&format!(
        "SELECT {LEAD_COLUMNS} FROM leads WHERE campaign_id = $1 ORDER BY created_at ASC"
    ))
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(leads)
}

/// Leads with no open suggestion and no contact in `stale_days`.
pub async fn list_stale_without_suggestion(pool: &PgPool, stale_days: i32) -> RepoResult<Vec<Lead>> {
    let leads = sqlx::query_as::<_, Lead>(&format!(
        r#"
        SELECT {LEAD_COLUMNS} FROM leads l
        WHERE l.stage NOT IN ('CONVERTED', 'LOST')
          AND l.user_id IS NOT NULL
          AND COALESCE(l.last_contacted_at, l.created_at) < now() - make_interval(days => $1)
          AND NOT EXISTS (
              SELECT 1 FROM ai_suggestions s WHERE s.lead_id = l.id AND s.status = 'NEW'
          )
        ORDER BY l.score DESC
        LIMIT 500
        "#
    ))
    .bind(stale_days)
    .fetch_all(pool)
    .await?;
    Ok(leads)
}

pub async fn list_ids_open(pool: &PgPool) -> RepoResult<Vec<Uuid>> {
    let ids: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM leads WHERE stage NOT IN ('CONVERTED', 'LOST')")
        .fetch_all(pool)
        .await?;
    Ok(ids)
}

pub async fn create(pool: &PgPool, owner: Uuid, new: &NewLead) -> RepoResult<Lead> {
    let lead = sqlx::query_as::<_, Lead>(&format!(
        r#"
        INSERT INTO leads (id, first_name, last_name, email, phone, company, title,
                           linkedin_url, source, notes, stage, tags, user_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        RETURNING {LEAD_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(new.first_name.trim())
    .bind(&new.last_name)
    .bind(new.email.as_deref().map(normalize_email))
    .bind(&new.phone)
    .bind(&new.company)
    .bind(&new.title)
    .bind(&new.linkedin_url)
    .bind(&new.source)
    .bind(&new.notes)
    .bind(new.stage.unwrap_or(LeadStage::New))
    .bind(normalize_tags(&new.tags))
    .bind(owner)
    .fetch_one(pool)
    .await?;
    Ok(lead)
}

/// Bulk import in one transaction. Rows whose email the owner already has are skipped.
pub async fn create_many(pool: &PgPool, owner: Uuid, rows: &[NewLead]) -> RepoResult<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;
    for new in rows {
        let res = sqlx::query(
            r#"
            INSERT INTO leads (id, first_name, last_name, email, phone, company, title,
                               linkedin_url, source, notes, stage, tags, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(new.first_name.trim())
        .bind(&new.last_name)
        .bind(new.email.as_deref().map(normalize_email))
        .bind(&new.phone)
        .bind(&new.company)
        .bind(&new.title)
        .bind(&new.linkedin_url)
        .bind(&new.source)
        .bind(&new.notes)
        .bind(new.stage.unwrap_or(LeadStage::New))
        .bind(normalize_tags(&new.tags))
        .bind(owner)
        .execute(&mut *tx)
        .await?;
        inserted += res.rows_affected();
    }
    tx.commit().await?;
    Ok(inserted)
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    owner: Option<Uuid>,
    patch: &LeadPatch,
) -> RepoResult<Option<Lead>> {
    let lead = sqlx::query_as::<_, Lead>(&format!(
        r#"
        UPDATE leads SET
            first_name = COALESCE($3, first_name),
            last_name = COALESCE($4, last_name),
            email = COALESCE($5, email),
            phone = COALESCE($6, phone),
            company = COALESCE($7, company),
            title = COALESCE($8, title),
            linkedin_url = COALESCE($9, linkedin_url),
            source = COALESCE($10, source),
            notes = COALESCE($11, notes),
            tags = COALESCE($12, tags),
            next_follow_up_at = COALESCE($13, next_follow_up_at),
            updated_at = now()
        WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)
        RETURNING {LEAD_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(owner)
    .bind(patch.first_name.as_deref().map(str::trim))
    .bind(&patch.last_name)
    .bind(patch.email.as_deref().map(normalize_email))
    .bind(&patch.phone)
    .bind(&patch.company)
    .bind(&patch.title)
    .bind(&patch.linkedin_url)
    .bind(&patch.source)
    .bind(&patch.notes)
    .bind(patch.tags.as_deref().map(normalize_tags))
    .bind(patch.next_follow_up_at)
    .fetch_optional(pool)
    .await?;
    Ok(lead)
}

/// Compare-and-set on the stage the caller validated against; false when the lead moved meanwhile.
pub async fn set_stage(pool: &PgPool, id: Uuid, expected: LeadStage, next: LeadStage) -> RepoResult<bool> {
    let res = sqlx::query(
        r#"
        UPDATE leads SET stage = $3, stage_changed_at = now(), updated_at = now()
        WHERE id = $1 AND stage = $2
        "#,
    )
    .bind(id)
    .bind(expected)
    .bind(next)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Moves each `(id, expected)` lead to `next` if it is still at `expected`;
/// returns the ids that changed.
pub async fn set_stage_many(
    pool: &PgPool,
    moves: &[(Uuid, LeadStage)],
    owner: Option<Uuid>,
    next: LeadStage,
) -> RepoResult<Vec<Uuid>> {
    let mut by_expected: HashMap<LeadStage, Vec<Uuid>> = HashMap::new();
    for (id, expected) in moves {
        by_expected.entry(*expected).or_default().push(*id);
    }

    let mut tx = pool.begin().await?;
    let mut changed = Vec::with_capacity(moves.len());
    for (expected, ids) in by_expected {
        let rows: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE leads SET stage = $4, stage_changed_at = now(), updated_at = now()
            WHERE id = ANY($1) AND ($2::uuid IS NULL OR user_id = $2) AND stage = $3 AND stage <> $4
            RETURNING id
            "#,
        )
        .bind(&ids)
        .bind(owner)
        .bind(expected)
        .bind(next)
        .fetch_all(&mut *tx)
        .await?;
        changed.extend(rows);
    }
    tx.commit().await?;
    Ok(changed)
}

pub async fn retag_many(
    pool: &PgPool,
    ids: &[Uuid],
    owner: Option<Uuid>,
    add: &[String],
    remove: &[String],
) -> RepoResult<u64> {
    let add = normalize_tags(add);
    let remove = normalize_tags(remove);
    let res = sqlx::query(
        r#"
        UPDATE leads SET
            tags = ARRAY(
                SELECT DISTINCT t FROM unnest(tags || $3::text[]) AS t
                WHERE t <> ALL($4::text[])
                ORDER BY t
            ),
            updated_at = now()
        WHERE id = ANY($1) AND ($2::uuid IS NULL OR user_id = $2)
        "#,
    )
    .bind(ids)
    .bind(owner)
    .bind(&add)
    .bind(&remove)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

pub async fn assign_owner(pool: &PgPool, id: Uuid, owner: Uuid) -> RepoResult<Option<Lead>> {
    let lead = sqlx::query_as::<_, Lead>(&format!(
        "UPDATE leads SET user_id = $2, updated_at = now() WHERE id = $1 RETURNING {LEAD_COLUMNS}"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;
    Ok(lead)
}

pub async fn set_score(conn: &mut PgConnection, id: Uuid, score: i32) -> RepoResult<bool> {
    let res = sqlx::query("UPDATE leads SET score = $2 WHERE id = $1 AND score <> $2")
        .bind(id)
        .bind(score.clamp(0, 100))
        .execute(&mut *conn)
        .await?;
    Ok(res.rows_affected() > 0)
}

/// Row-locks a lead for the rest of the transaction.
pub async fn lock(conn: &mut PgConnection, id: Uuid) -> RepoResult<Option<Lead>> {
    let lead = sqlx::query_as::<_, Lead>(&format!(
        "SELECT {LEAD_COLUMNS} FROM leads WHERE id = $1 FOR UPDATE"
    ))
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(lead)
}

/// Writes the effects of a logged interaction on its lead.
pub async fn apply_contact(
    conn: &mut PgConnection,
    id: Uuid,
    stage: LeadStage,
    contacted_at: Option<DateTime<Utc>>,
    next_follow_up_at: Option<DateTime<Utc>>,
) -> RepoResult<()> {
    sqlx::query(
        r#"
        UPDATE leads SET
            stage_changed_at = CASE WHEN stage <> $2 THEN now() ELSE stage_changed_at END,
            stage = $2,
            last_contacted_at = GREATEST(last_contacted_at, $3),
            next_follow_up_at = COALESCE($4, next_follow_up_at),
            updated_at = now()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(stage)
    .bind(contacted_at)
    .bind(next_follow_up_at)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Moves the sequence cursor to `order_index`, guarded on the campaign still matching.
pub async fn advance_cursor(
    conn: &mut PgConnection,
    id: Uuid,
    campaign_id: Uuid,
    order_index: i32,
    now: DateTime<Utc>,
) -> RepoResult<bool> {
    let res = sqlx::query(
        r#"
        UPDATE leads SET campaign_step = $3, campaign_step_at = $4
        WHERE id = $1 AND campaign_id = $2
          AND (campaign_step IS NULL OR campaign_step < $3)
        "#,
    )
    .bind(id)
    .bind(campaign_id)
    .bind(order_index)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected() > 0)
}

/// Stamps the end of the sequence; true only the first time.
pub async fn finish_campaign(pool: &PgPool, id: Uuid, campaign_id: Uuid) -> RepoResult<bool> {
    let res = sqlx::query(
        r#"
        UPDATE leads SET campaign_finished_at = now()
        WHERE id = $1 AND campaign_id = $2 AND campaign_finished_at IS NULL
        "#,
    )
    .bind(id)
    .bind(campaign_id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}

// The stream borrows its SQL for its whole lifetime.
static EXPORT_SQL: Lazy<String> = Lazy::new(|| {
    format!("SELECT {LEAD_COLUMNS} FROM leads WHERE ($1::uuid IS NULL OR user_id = $1) ORDER BY created_at ASC")
});

/// Streams every lead in scope, oldest first.
pub fn stream_for_export<'a>(
    pool: &'a PgPool,
    owner: Option<Uuid>,
) -> BoxStream<'a, Result<Lead, sqlx::Error>> {
    sqlx::query_as::<_, Lead>(EXPORT_SQL.as_str())
        .bind(owner)
        .fetch(pool)
}

/// Enrolls leads in a campaign, restarting their sequence cursor. Terminal leads are left out.
pub async fn enroll(
    pool: &PgPool,
    campaign_id: Uuid,
    ids: &[Uuid],
    owner: Option<Uuid>,
) -> RepoResult<u64> {
    let res = sqlx::query(
        r#"
        UPDATE leads SET
            campaign_id = $1,
            campaign_step = NULL,
            campaign_step_at = now(),
            campaign_finished_at = NULL,
            updated_at = now()
        WHERE id = ANY($2) AND ($3::uuid IS NULL OR user_id = $3)
          AND stage NOT IN ('CONVERTED', 'LOST')
        "#,
    )
    .bind(campaign_id)
    .bind(ids)
    .bind(owner)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

pub async fn unenroll(pool: &PgPool, campaign_id: Uuid, ids: &[Uuid]) -> RepoResult<u64> {
    let res = sqlx::query(
        r#"
        UPDATE leads SET
            campaign_id = NULL,
            campaign_step = NULL,
            campaign_step_at = NULL,
            campaign_finished_at = NULL,
            updated_at = now()
        WHERE campaign_id = $1 AND id = ANY($2)
        "#,
    )
    .bind(campaign_id)
    .bind(ids)
    .execute(pool)
    .await?;
    Ok(res.rows_affected())
}

pub async fn delete(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<bool> {
    let res = sqlx::query("DELETE FROM leads WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)")
        .bind(id)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}

pub async fn delete_many(pool: &PgPool, ids: &[Uuid], owner: Option<Uuid>) -> RepoResult<u64> {
    let res =
        sqlx::query("DELETE FROM leads WHERE id = ANY($1) AND ($2::uuid IS NULL OR user_id = $2)")
            .bind(ids)
            .bind(owner)
            .execute(pool)
            .await?;
    Ok(res.rows_affected())
}

pub async fn count_by_stage(pool: &PgPool, owner: Option<Uuid>) -> RepoResult<Vec<StageCount>> {
    let rows = sqlx::query_as::<_, StageCount>(
        r#"
        SELECT stage, COUNT(*) AS count
        FROM leads
        WHERE ($1::uuid IS NULL OR user_id = $1)
        GROUP BY stage
        ORDER BY stage
        "#,
    )
    .bind(owner)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn score_stats(pool: &PgPool, owner: Option<Uuid>) -> RepoResult<ScoreStats> {
    let stats = sqlx::query_as::<_, ScoreStats>(
        r#"
        SELECT COUNT(*) AS count,
               AVG(score)::float8 AS avg_score,
               MIN(score) AS min_score,
               MAX(score) AS max_score
        FROM leads
        WHERE ($1::uuid IS NULL OR user_id = $1)
        "#,
    )
    .bind(owner)
    .fetch_one(pool)
    .await?;
    Ok(stats)
}

/// Leads that entered `stage` inside the window and are still there.
pub async fn count_stage_in_window(
    pool: &PgPool,
    owner: Uuid,
    stage: LeadStage,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> RepoResult<i64> {
    let n: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM leads
        WHERE user_id = $1 AND stage = $2 AND stage_changed_at >= $3 AND stage_changed_at < $4
        "#,
    )
    .bind(owner)
    .bind(stage)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

pub async fn count_created_in_window(
    pool: &PgPool,
    owner: Uuid,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> RepoResult<i64> {
    let n: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM leads WHERE user_id = $1 AND created_at >= $2 AND created_at < $3",
    )
    .bind(owner)
    .bind(from)
    .bind(to)
    .fetch_one(pool)
    .await?;
    Ok(n)
}

pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| normalize_tag(t))
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_trimmed_lowercased_and_deduplicated() {
        let tags = vec![" VIP ".to_string(), "vip".into(), "".into(), "Fintech".into()];
        assert_eq!(normalize_tags(&tags), vec!["fintech".to_string(), "vip".to_string()]);
    }

    #[test]
    fn filter_defaults() {
        let filter: LeadFilter = serde_json::from_value(serde_json::json!({})).unwrap();
        assert_eq!(filter.order_by, LeadOrder::CreatedAt);
        assert!(!filter.desc);
        assert_eq!(filter.paging().limit(), crate::db::DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn filters_render_into_sql() {
        let filter = LeadFilter {
            stage: Some(LeadStage::Qualified),
            tag: Some("vip".into()),
            search: Some("  ".into()),
            ..Default::default()
        };
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM leads");
        push_filters(&mut qb, Some(Uuid::nil()), &filter);
        let sql = qb.sql();
        assert!(sql.contains("user_id = $1"));
        assert!(sql.contains("stage = $2"));
        assert!(sql.contains("$3 = ANY(tags)"));
        assert!(!sql.contains("ILIKE"));
    }

    #[test]
    fn tag_filter_matches_stored_form() {
        let filter = LeadFilter {
            tag: Some("  VIP ".into()),
            ..Default::default()
        };
        assert_eq!(filter.tag_value().as_deref(), Some("vip"));
        assert_eq!(
            filter.tag_value(),
            normalize_tags(&["VIP".to_string()]).into_iter().next()
        );

        let blank = LeadFilter {
            tag: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(blank.tag_value(), None);
        let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM leads");
        push_filters(&mut qb, None, &blank);
        assert!(!qb.sql().contains("ANY(tags)"));
    }
}
