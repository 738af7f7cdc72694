use crate::db::{users, OrNotFound};
use crate::state::SharedState;
use crate::web::reject;
use crate::web::session::UserSession;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::Value;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/me/preferences", get(get_preferences).patch(patch_preferences))
        .with_state(state)
}

async fn get_preferences(
    State(state): State<SharedState>,
    session: UserSession,
) -> Result<Json<Value>, StatusCode> {
    let user = users::find_by_id(&state.pool, session.user_id)
        .await
        .or_not_found("user")
        .map_err(reject)?;
    Ok(Json(user.preferences))
}

/// Top-level keys replace stored ones; a `null` value is stored as-is.
async fn patch_preferences(
    State(state): State<SharedState>,
    session: UserSession,
    Json(patch): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    if !patch.is_object() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let prefs = users::merge_preferences(&state.pool, session.user_id, &patch)
        .await
        .or_not_found("user")
        .map_err(reject)?;
    Ok(Json(prefs))
}
