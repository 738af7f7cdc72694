use crate::db::RepoResult;
use crate::domain::models::{Campaign, CampaignStep, StepType};
use serde::{Deserialize, Serialize};
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

const CAMPAIGN_COLUMNS: &str =
    "id, user_id, name, description, is_active, stats, created_at, updated_at";
const STEP_COLUMNS: &str = "id, campaign_id, step_type, wait_days, order_index, template_id, \
     conditions, created_at, updated_at";

/// Step definition; its position in the submitted list becomes `order_index`.
#[derive(Debug, Clone, Deserialize)]
pub struct StepInput {
    pub step_type: StepType,
    #[serde(default)]
    pub wait_days: i32,
    pub template_id: Option<Uuid>,
    #[serde(default = "empty_object")]
    pub conditions: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewCampaign {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub steps: Vec<StepInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CampaignPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Serialize)]
pub struct CampaignWithSteps {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub steps: Vec<CampaignStep>,
}

pub async fn list(pool: &PgPool, owner: Option<Uuid>) -> RepoResult<Vec<Campaign>> {
    let rows = sqlx::query_as::<_, Campaign>(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE ($1::uuid IS NULL OR user_id = $1) \
         ORDER BY created_at DESC"
    ))
    .bind(owner)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn list_active(pool: &PgPool) -> RepoResult<Vec<Campaign>> {
    let rows = sqlx::query_as::<_, Campaign>(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE is_active ORDER BY created_at ASC"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn find_scoped(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<Option<Campaign>> {
    let row = sqlx::query_as::<_, Campaign>(&format!(
        "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)"
    ))
    .bind(id)
    .bind(owner)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn steps(pool: &PgPool, campaign_id: Uuid) -> RepoResult<Vec<CampaignStep>> {
    let rows = sqlx::query_as::<_, CampaignStep>(&format!(
        "SELECT {STEP_COLUMNS} FROM campaign_steps WHERE campaign_id = $1 ORDER BY order_index ASC"
    ))
    .bind(campaign_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

async fn insert_steps(
    conn: &mut PgConnection,
    campaign_id: Uuid,
    inputs: &[StepInput],
) -> RepoResult<Vec<CampaignStep>> {
    let mut out = Vec::with_capacity(inputs.len());
    for (idx, input) in inputs.iter().enumerate() {
        let step = sqlx::query_as::<_, CampaignStep>(&format!(
            r#"
            INSERT INTO campaign_steps (id, campaign_id, step_type, wait_days, order_index, template_id, conditions)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {STEP_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(campaign_id)
        .bind(input.step_type)
        .bind(input.wait_days)
        .bind(idx as i32)
        .bind(input.template_id)
        .bind(&input.conditions)
        .fetch_one(&mut *conn)
        .await?;
        out.push(step);
    }
    Ok(out)
}

/// Campaign and its steps are written in one transaction.
pub async fn create(pool: &PgPool, owner: Uuid, new: &NewCampaign) -> RepoResult<CampaignWithSteps> {
    let mut tx = pool.begin().await?;
    let campaign = sqlx::query_as::<_, Campaign>(&format!(
        r#"
        INSERT INTO campaigns (id, user_id, name, description, is_active)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING {CAMPAIGN_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(owner)
    .bind(new.name.trim())
    .bind(&new.description)
    .bind(new.is_active)
    .fetch_one(&mut *tx)
    .await?;
    let steps = insert_steps(&mut tx, campaign.id, &new.steps).await?;
    tx.commit().await?;
    Ok(CampaignWithSteps { campaign, steps })
}

/// Replaces the whole step list. Enrolled leads keep their cursor, which now points
/// into the new order.
pub async fn replace_steps(
    pool: &PgPool,
    campaign_id: Uuid,
    inputs: &[StepInput],
) -> RepoResult<Vec<CampaignStep>> {
    let mut tx = pool.begin().await?;
    sqlx::query("DELETE FROM campaign_steps WHERE campaign_id = $1")
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
    let steps = insert_steps(&mut tx, campaign_id, inputs).await?;
    sqlx::query("UPDATE campaigns SET updated_at = now() WHERE id = $1")
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(steps)
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    owner: Option<Uuid>,
    patch: &CampaignPatch,
) -> RepoResult<Option<Campaign>> {
    let row = sqlx::query_as::<_, Campaign>(&format!(
        r#"
        UPDATE campaigns SET
            name = COALESCE($3, name),
            description = COALESCE($4, description),
            is_active = COALESCE($5, is_active),
            updated_at = now()
        WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)
        RETURNING {CAMPAIGN_COLUMNS}
        "#
    ))
    .bind(id)
    .bind(owner)
    .bind(patch.name.as_deref().map(str::trim))
    .bind(&patch.description)
    .bind(patch.is_active)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn set_stats(pool: &PgPool, id: Uuid, stats: &serde_json::Value) -> RepoResult<()> {
    sqlx::query("UPDATE campaigns SET stats = $2 WHERE id = $1")
        .bind(id)
        .bind(stats)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete(pool: &PgPool, id: Uuid, owner: Option<Uuid>) -> RepoResult<bool> {
    let res = sqlx::query("DELETE FROM campaigns WHERE id = $1 AND ($2::uuid IS NULL OR user_id = $2)")
        .bind(id)
        .bind(owner)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() > 0)
}
