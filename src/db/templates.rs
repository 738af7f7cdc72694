use crate::db::RepoResult;
use crate::domain::models::{MessageTemplate, TemplateType};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

const TEMPLATE_COLUMNS: &str =
    "id, user_id, name, template_type, subject, content, is_ai_generated, created_at, updated_at";

#[derive(Debug, Clone, Deserialize)]
pub struct NewTemplate {
    pub name: String,
    pub template_type: TemplateType,
    pub subject: Option<String>,
    pub content: String,
    #[serde(default)]
    pub is_ai_generated: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub template_type: Option<TemplateType>,
    pub subject: Option<String>,
    pub content: Option<String>,
}

pub async fn list(
    pool: &PgPool,
    owner: Option<Uuid>,
    kind: Option<TemplateType>,
) -> RepoResult<Vec<MessageTemplate>> {
    let rows = sqlx::query_as::<_, MessageTemplate>(&format!(
        r#"
        SELECT {TEMPLATE_COLUMNS} FROM message_templates
        WHERE ($1::uuid IS NULL OR user_id = $1)
          AND ($2::template_type IS NULL OR template_type = $2)
        ORDER BY template_type, name
        "#
    ))
    .bind(owner)
    .bind(kind)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_scoped(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<Option<MessageTemplate>> {
    let row = sqlx::query_as::<_, MessageTemplate>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_many(pool: &PgPool, ids: &[Uuid]) -> RepoResult<Vec<MessageTemplate>> {
    let rows = sqlx::query_as::<_, MessageTemplate>(&format!(
        "SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE id = ANY($1)"
    ))
    .bind(ids)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn count_for_user(pool: &PgPool, owner: Uuid) -> RepoResult<i64> {
    let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM message_templates WHERE user_id = $1")
        .bind(owner)
        .fetch_one(pool)
        .await?;
    Ok(n)
}

pub async fn create(pool: &PgPool, owner: Uuid, new: &NewTemplate) -> RepoResult<MessageTemplate> {
    let row = sqlx::query_as::<_, MessageTemplate>(&format!(
        r#"
        INSERT INTO message_templates (id, user_id, name, template_type, subject, content, is_ai_generated)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING {TEMPLATE_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(owner)
    .bind(new.name.trim())
    .bind(new.template_type)
    .bind(&new.subject)
    .bind(&new.content)
    .bind(new.is_ai_generated)
    .fetch_one(pool)
    .await?;
    Ok(row)
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    owner: Option<Uuid>,
    patch: &TemplatePatch,
) -> RepoResult<Option<MessageTemplate>> {
    let row = sqlx::query_as::<_, MessageTemplate>(&format!(
        r#"
        UPDATE message_templates SET
            name = COALESCE($3, name),
            template_type = COALESCE($4, template_type),
            subject = COALESCE($5, subject),
            content = COALESCE($6, content),
            updated_at = now()
        WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)
        RETURNING {TEMPLATE_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(owner)
    .bind(patch.name.as_deref().map(str::trim))
    .bind(patch.template_type)
    .bind(&patch.subject)
    .bind(&patch.content)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn delete(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<bool> {
    let res = sqlx::query(
        "DELETE FROM message_templates WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)",
    )
    .bind(id)
    .bind(owner)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() > 0)
}
