use crate::db::conversations::{self, ConversationPatch, DueFollowUp, NewConversation};
use crate::db::{leads, OrNotFound};
use crate::domain::models::Conversation;
use crate::services::activity::{self, RecordedConversation};
use crate::state::SharedState;
use crate::web::session::UserSession;
use crate::web::{reject, required};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, patch},
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use uuid::Uuid;

const MAX_CONTENT_LEN: usize = 20_000;
const MAX_FOLLOW_UP_WINDOW_DAYS: i64 = 90;
const FOLLOW_UP_LIST_LIMIT: i64 = 200;

#[derive(Deserialize)]
pub struct FollowUpQuery {
    /// Include follow-ups due within this many days from now.
    #[serde(default)]
    pub days: i64,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route(
            "/leads/:id/conversations",
            get(list_conversations).post(create_conversation),
        )
        .route("/conversations/follow-ups", get(follow_ups))
        .route(
            "/conversations/:id",
            patch(update_conversation).delete(delete_conversation),
        )
        .with_state(state)
}

fn validate_new(new: &NewConversation) -> Result<(), StatusCode> {
    required(&new.content, MAX_CONTENT_LEN)?;
    if new.follow_up_required && new.follow_up_date.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(())
}

async fn list_conversations(
    State(state): State<SharedState>,
    session: UserSession,
    Path(lead_id): Path<Uuid>,
) -> Result<Json<Vec<Conversation>>, StatusCode> {
    let lead = leads::find_by_id(&state.pool, lead_id, session.owner_scope())
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    let rows = conversations::list_for_lead(&state.pool, lead.id)
        .await
        .map_err(reject)?;
    Ok(Json(rows))
}

async fn create_conversation(
    State(state): State<SharedState>,
    session: UserSession,
    Path(lead_id): Path<Uuid>,
    Json(payload): Json<NewConversation>,
) -> Result<(StatusCode, Json<RecordedConversation>), StatusCode> {
    validate_new(&payload)?;
    let lead = leads::find_by_id(&state.pool, lead_id, session.owner_scope())
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    let recorded = activity::record_conversation(&state.pool, lead.id, session.user_id, &payload)
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(recorded)))
}

async fn update_conversation(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(patch): Json<ConversationPatch>,
) -> Result<Json<Conversation>, StatusCode> {
    if let Some(content) = patch.content.as_deref() {
        required(content, MAX_CONTENT_LEN)?;
    }
    let existing = conversations::find_scoped(&state.pool, id, session.owner_scope())
        .await
        .or_not_found("conversation")
        .map_err(reject)?;

    let wants_follow_up = patch.follow_up_required.unwrap_or(existing.follow_up_required);
    if wants_follow_up && patch.follow_up_date.or(existing.follow_up_date).is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let updated = conversations::update(&state.pool, existing.id, &patch)
        .await
        .or_not_found("conversation")
        .map_err(reject)?;
    Ok(Json(updated))
}

async fn delete_conversation(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    let existing = conversations::find_scoped(&state.pool, id, session.owner_scope())
        .await
        .or_not_found("conversation")
        .map_err(reject)?;
    conversations::delete(&state.pool, existing.id)
        .await
        .map_err(reject)?;
    // the lead's activity score depends on its remaining conversations
    activity::refresh_score(&state.pool, existing.lead_id)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn follow_ups(
    State(state): State<SharedState>,
    session: UserSession,
    Query(query): Query<FollowUpQuery>,
) -> Result<Json<Vec<DueFollowUp>>, StatusCode> {
    if !(0..=MAX_FOLLOW_UP_WINDOW_DAYS).contains(&query.days) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let until = Utc::now() + Duration::days(query.days);
    let rows = conversations::list_due_follow_ups(
        &state.pool,
        session.owner_scope(),
        until,
        FOLLOW_UP_LIST_LIMIT,
    )
        .await
        .map_err(reject)?;
    Ok(Json(rows))
}
