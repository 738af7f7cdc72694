use crate::db::{leads, suggestions, OrNotFound};
use crate::domain::models::{AiSuggestion, SuggestionStatus};
use crate::services::suggestions::generate_for_lead;
use crate::state::SharedState;
use crate::web::session::UserSession;
use crate::web::{illegal, internal, reject};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct SuggestionQuery {
    pub status: Option<SuggestionStatus>,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub status: SuggestionStatus,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/leads/:id/suggestions", get(list_suggestions))
        .route("/leads/:id/suggestions/generate", post(generate))
        .route("/suggestions/:id/status", post(set_status))
        .with_state(state)
}

async fn list_suggestions(
    State(state): State<SharedState>,
    session: UserSession,
    Path(lead_id): Path<Uuid>,
    Query(query): Query<SuggestionQuery>,
) -> Result<Json<Vec<AiSuggestion>>, StatusCode> {
    let lead = leads::find_by_id(&state.pool, lead_id, session.owner_scope())
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    let rows = suggestions::list_for_lead(&state.pool, lead.id, query.status)
        .await
        .map_err(reject)?;
    Ok(Json(rows))
}

async fn generate(
    State(state): State<SharedState>,
    session: UserSession,
    Path(lead_id): Path<Uuid>,
) -> Result<(StatusCode, Json<Vec<AiSuggestion>>), StatusCode> {
    let lead = leads::find_by_id(&state.pool, lead_id, session.owner_scope())
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    if lead.stage.is_terminal() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let created = generate_for_lead(&state.pool, state.engine.as_ref(), &lead)
        .await
        .map_err(internal)?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn set_status(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<StatusRequest>,
) -> Result<Json<AiSuggestion>, StatusCode> {
    let current = suggestions::find_scoped(&state.pool, id, session.owner_scope())
        .await
        .or_not_found("suggestion")
        .map_err(reject)?;
    let next = current.status.transition(payload.status).map_err(illegal)?;
    if next == current.status {
        return Ok(Json(current));
    }

    // someone else moved it first
    let updated = suggestions::set_status(&state.pool, current.id, current.status, next)
        .await
        .map_err(reject)?
        .ok_or(StatusCode::CONFLICT)?;
    Ok(Json(updated))
}
