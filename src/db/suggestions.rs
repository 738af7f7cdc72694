use crate::db::RepoResult;
use crate::domain::models::{AiSuggestion, SuggestionStatus};
use sqlx::PgPool;
use uuid::Uuid;

const SUGGESTION_COLUMNS: &str =
    "id, lead_id, title, content, status, priority, template_id, created_at, updated_at";

#[derive(Debug, Clone, PartialEq)]
pub struct NewSuggestion {
    pub title: String,
    pub content: String,
    pub priority: i32,
    pub template_id: Option<Uuid>,
}

pub async fn list_for_lead(
    pool: &PgPool,
    lead_id: Uuid,
    status: Option<SuggestionStatus>,
) -> RepoResult<Vec<AiSuggestion>> {
    let rows = sqlx::query_as::<_, AiSuggestion>(&format!(
        r#"
        SELECT {SUGGESTION_COLUMNS} FROM ai_suggestions
        WHERE lead_id = $1 AND ($2::suggestion_status IS NULL OR status = $2)
        ORDER BY priority ASC, created_at DESC
        "#
    ))
    .bind(lead_id)
    .bind(status)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Inserts a batch of drafts for one lead atomically.
pub async fn insert_many(
    pool: &PgPool,
    lead_id: Uuid,
    drafts: &[NewSuggestion],
) -> RepoResult<Vec<AiSuggestion>> {
    let mut tx = pool.begin().await?;
    let mut out = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let row = sqlx::query_as::<_, AiSuggestion>(&format!(
            r#"
            INSERT INTO ai_suggestions (id, lead_id, title, content, priority, template_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {SUGGESTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(lead_id)
        .bind(&draft.title)
        .bind(&draft.content)
        .bind(draft.priority)
        .bind(draft.template_id)
        .fetch_one(&mut *tx)
        .await?;
        out.push(row);
    }
    tx.commit().await?;
    Ok(out)
}

/// Suggestion visible to `owner` through its lead.
pub async fn find_scoped(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<Option<AiSuggestion>> {
    let row = sqlx::query_as::<_, AiSuggestion>(
        r#"
        SELECT s.id, s.lead_id, s.title, s.content, s.status, s.priority, s.template_id,
               s.created_at, s.updated_at
        FROM ai_suggestions s
        JOIN leads l ON l.id = s.lead_id
        WHERE s.id = $1 AND ($2::uuid IS NULL OR l.user_id = $2)
        "#,
    )
    .bind(id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// Compare-and-set on status so concurrent reviewers cannot both win.
pub async fn set_status(
    pool: &PgPool,
    id: Uuid,
    expected: SuggestionStatus,
    next: SuggestionStatus,
) -> RepoResult<Option<AiSuggestion>> {
    let row = sqlx::query_as::<_, AiSuggestion>(&format!(
        r#"
        UPDATE ai_suggestions SET status = $3, updated_at = now()
        WHERE id = $1 AND status = $2
        RETURNING {SUGGESTION_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(expected)
    .bind(next)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn count_open(pool: &PgPool, owner: Option<Uuid>) -> RepoResult<i64> {
    let n: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM ai_suggestions s
        JOIN leads l ON l.id = s.lead_id
        WHERE s.status = 'NEW' AND ($1::uuid IS NULL OR l.user_id = $1)
        "#,
    )
    .bind(owner)
    .fetch_one(pool)
    .await?;
    Ok(n)
}
