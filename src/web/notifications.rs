use crate::db::{notifications, OrNotFound, Page, Paging};
use crate::domain::models::Notification;
use crate::state::SharedState;
use crate::web::reject;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct NotificationQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Serialize)]
pub struct UnreadCount {
    pub unread: i64,
}

#[derive(Serialize)]
pub struct MarkedRead {
    pub updated: u64,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_notifications))
        .route("/unread-count", get(unread_count))
        .route("/read-all", post(read_all))
        .route("/:id/read", post(mark_read))
        .route("/:id", delete(delete_notification))
        .with_state(state)
}

// Notifications are personal: admins only ever see their own.
async fn list_notifications(
    State(state): State<SharedState>,
    session: UserSession,
    Query(query): Query<NotificationQuery>,
) -> Result<Json<Page<Notification>>, StatusCode> {
    let paging = Paging {
        limit: query.limit,
        offset: query.offset,
    };
    let page = notifications::list(&state.pool, session.user_id, query.unread_only, paging)
        .await
        .map_err(reject)?;
    Ok(Json(page))
}

async fn unread_count(
    State(state): State<SharedState>,
    session: UserSession,
) -> Result<Json<UnreadCount>, StatusCode> {
    let unread = notifications::unread_count(&state.pool, session.user_id)
        .await
        .map_err(reject)?;
    Ok(Json(UnreadCount { unread }))
}

async fn mark_read(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>, StatusCode> {
    let row = notifications::mark_read(&state.pool, id, session.user_id)
        .await
        .or_not_found("notification")
        .map_err(reject)?;
    Ok(Json(row))
}

async fn read_all(
    State(state): State<SharedState>,
    session: UserSession,
) -> Result<Json<MarkedRead>, StatusCode> {
    let updated = notifications::mark_all_read(&state.pool, session.user_id)
        .await
        .map_err(reject)?;
    Ok(Json(MarkedRead { updated }))
}

async fn delete_notification(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    if !notifications::delete(&state.pool, id, session.user_id)
        .await
        .map_err(reject)?
    {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}
