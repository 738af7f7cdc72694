use crate::db::campaigns::{self, CampaignPatch, CampaignWithSteps, NewCampaign, StepInput};
use crate::db::{leads, templates, OrNotFound};
use crate::domain::models::{Campaign, CampaignStep, Lead};
use crate::state::SharedState;
use crate::web::session::UserSession;
use crate::web::{reject, required, valid_bulk};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

pub const MAX_STEPS: usize = 50;
pub const MAX_WAIT_DAYS: i32 = 365;

#[derive(Deserialize)]
pub struct StepsRequest {
    pub steps: Vec<StepInput>,
}

#[derive(Deserialize)]
pub struct EnrollRequest {
    pub lead_ids: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct EnrollResult {
    pub requested: usize,
    pub affected: u64,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_campaigns).post(create_campaign))
        .route(
            "/:id",
            get(get_campaign).patch(update_campaign).delete(delete_campaign),
        )
        .route("/:id/steps", put(replace_steps))
        .route("/:id/enroll", post(enroll))
        .route("/:id/unenroll", post(unenroll))
        .route("/:id/leads", get(enrolled_leads))
        .with_state(state)
}

fn validate_steps(steps: &[StepInput]) -> Result<(), StatusCode> {
    if steps.len() > MAX_STEPS {
        return Err(StatusCode::BAD_REQUEST);
    }
    for step in steps {
        if !(0..=MAX_WAIT_DAYS).contains(&step.wait_days) {
            return Err(StatusCode::BAD_REQUEST);
        }
        if !step.conditions.is_object() {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    Ok(())
}

/// Every referenced template must exist and be visible to the caller.
async fn check_templates(
    pool: &PgPool,
    steps: &[StepInput],
    scope: Option<Uuid>,
) -> Result<(), StatusCode> {
    for template_id in steps.iter().filter_map(|s| s.template_id) {
        templates::find_scoped(pool, template_id, scope)
            .await
            .map_err(reject)?
            .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    }
    Ok(())
}

async fn scoped_campaign(
    pool: &PgPool,
    session: &UserSession,
    id: Uuid,
) -> Result<Campaign, StatusCode> {
    campaigns::find_scoped(pool, id, session.owner_scope())
        .await
        .or_not_found("campaign")
        .map_err(reject)
}

async fn list_campaigns(
    State(state): State<SharedState>,
    session: UserSession,
) -> Result<Json<Vec<Campaign>>, StatusCode> {
    let rows = campaigns::list(&state.pool, session.owner_scope())
        .await
        .map_err(reject)?;
    Ok(Json(rows))
}

async fn create_campaign(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<NewCampaign>,
) -> Result<(StatusCode, Json<CampaignWithSteps>), StatusCode> {
    required(&payload.name, 200)?;
    validate_steps(&payload.steps)?;
    check_templates(&state.pool, &payload.steps, session.owner_scope()).await?;

    let created = campaigns::create(&state.pool, session.user_id, &payload)
        .await
        .map_err(reject)?;
    tracing::info!(
        "Campaign {} created with {} steps",
        created.campaign.id,
        created.steps.len()
    );
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_campaign(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<CampaignWithSteps>, StatusCode> {
    let campaign = scoped_campaign(&state.pool, &session, id).await?;
    let steps = campaigns::steps(&state.pool, campaign.id)
        .await
        .map_err(reject)?;
    Ok(Json(CampaignWithSteps { campaign, steps }))
}

async fn update_campaign(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(patch): Json<CampaignPatch>,
) -> Result<Json<Campaign>, StatusCode> {
    if let Some(name) = patch.name.as_deref() {
        required(name, 200)?;
    }
    let campaign = campaigns::update(&state.pool, id, session.owner_scope(), &patch)
        .await
        .or_not_found("campaign")
        .map_err(reject)?;
    Ok(Json(campaign))
}

async fn delete_campaign(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    if !campaigns::delete(&state.pool, id, session.owner_scope())
        .await
        .map_err(reject)?
    {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn replace_steps(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<StepsRequest>,
) -> Result<Json<Vec<CampaignStep>>, StatusCode> {
    validate_steps(&payload.steps)?;
    let campaign = scoped_campaign(&state.pool, &session, id).await?;
    check_templates(&state.pool, &payload.steps, session.owner_scope()).await?;

    let steps = campaigns::replace_steps(&state.pool, campaign.id, &payload.steps)
        .await
        .map_err(reject)?;
    Ok(Json(steps))
}

async fn enroll(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<EnrollRequest>,
) -> Result<Json<EnrollResult>, StatusCode> {
    valid_bulk(&payload.lead_ids)?;
    let campaign = scoped_campaign(&state.pool, &session, id).await?;
    let affected = leads::enroll(
        &state.pool,
        campaign.id,
        &payload.lead_ids,
        session.owner_scope(),
    )
    .await
    .map_err(reject)?;
    tracing::info!("Enrolled {} leads in campaign {}", affected, campaign.id);
    Ok(Json(EnrollResult {
        requested: payload.lead_ids.len(),
        affected,
    }))
}

async fn unenroll(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<EnrollRequest>,
) -> Result<Json<EnrollResult>, StatusCode> {
    valid_bulk(&payload.lead_ids)?;
    let campaign = scoped_campaign(&state.pool, &session, id).await?;
    let affected = leads::unenroll(&state.pool, campaign.id, &payload.lead_ids)
        .await
        .map_err(reject)?;
    Ok(Json(EnrollResult {
        requested: payload.lead_ids.len(),
        affected,
    }))
}

async fn enrolled_leads(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<Lead>>, StatusCode> {
    let campaign = scoped_campaign(&state.pool, &session, id).await?;
    let rows = leads::list_by_campaign(&state.pool, campaign.id)
        .await
        .map_err(reject)?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::StepType;
    use serde_json::json;

    fn step(step_type: StepType, wait_days: i32) -> StepInput {
        StepInput {
            step_type,
            wait_days,
            template_id: None,
            conditions: json!({}),
        }
    }

    #[test]
    fn wait_days_are_bounded() {
        assert!(validate_steps(&[step(StepType::Email, 0), step(StepType::Wait, 365)]).is_ok());
        assert!(validate_steps(&[step(StepType::Wait, -1)]).is_err());
        assert!(validate_steps(&[step(StepType::Wait, 366)]).is_err());
    }

    #[test]
    fn conditions_must_be_an_object() {
        let mut s = step(StepType::Call, 1);
        s.conditions = json!(["QUALIFIED"]);
        assert_eq!(validate_steps(&[s]), Err(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn step_count_is_capped() {
        let steps: Vec<_> = (0..=MAX_STEPS).map(|_| step(StepType::Task, 1)).collect();
        assert!(validate_steps(&steps).is_err());
    }

    #[test]
    fn steps_default_when_omitted() {
        let parsed: StepsRequest =
            serde_json::from_value(json!({"steps": [{"step_type": "LINKEDIN_MESSAGE"}]})).unwrap();
        assert_eq!(parsed.steps[0].wait_days, 0);
        assert_eq!(parsed.steps[0].conditions, json!({}));
    }
}
