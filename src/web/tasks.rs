use crate::db::tasks::{self, NewTask, TaskFilter, TaskPatch};
use crate::db::{leads, OrNotFound, Page};
use crate::domain::models::{Task, TaskStatus};
use crate::state::SharedState;
use crate::web::session::UserSession;
use crate::web::{reject, required, valid_priority};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use uuid::Uuid;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/:id", get(get_task).patch(update_task).delete(delete_task))
        .route("/:id/complete", post(complete_task))
        .with_state(state)
}

async fn list_tasks(
    State(state): State<SharedState>,
    session: UserSession,
    Query(filter): Query<TaskFilter>,
) -> Result<Json<Page<Task>>, StatusCode> {
    let page = tasks::list(&state.pool, session.owner_scope(), &filter)
        .await
        .map_err(reject)?;
    Ok(Json(page))
}

async fn create_task(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<NewTask>,
) -> Result<(StatusCode, Json<Task>), StatusCode> {
    required(&payload.title, 300)?;
    valid_priority(payload.priority)?;
    if let Some(lead_id) = payload.lead_id {
        leads::find_by_id(&state.pool, lead_id, session.owner_scope())
            .await
            .map_err(reject)?
            .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    }
    let task = tasks::create(&state.pool, session.user_id, &payload)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(task)))
}

async fn get_task(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, StatusCode> {
    let task = tasks::find_scoped(&state.pool, id, session.owner_scope())
        .await
        .or_not_found("task")
        .map_err(reject)?;
    Ok(Json(task))
}

async fn update_task(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(patch): Json<TaskPatch>,
) -> Result<Json<Task>, StatusCode> {
    if let Some(title) = patch.title.as_deref() {
        required(title, 300)?;
    }
    valid_priority(patch.priority)?;
    let task = tasks::update(&state.pool, id, session.owner_scope(), &patch)
        .await
        .or_not_found("task")
        .map_err(reject)?;
    Ok(Json(task))
}

async fn delete_task(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    if !tasks::delete(&state.pool, id, session.owner_scope())
        .await
        .map_err(reject)?
    {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn complete_task(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<Task>, StatusCode> {
    let scope = session.owner_scope();
    let task = tasks::find_scoped(&state.pool, id, scope)
        .await
        .or_not_found("task")
        .map_err(reject)?;
    match task.status {
        TaskStatus::Completed => return Ok(Json(task)),
        TaskStatus::Cancelled => return Err(StatusCode::UNPROCESSABLE_ENTITY),
        TaskStatus::Pending | TaskStatus::InProgress => {}
    }

    let patch = TaskPatch {
        status: Some(TaskStatus::Completed),
        ..Default::default()
    };
    let task = tasks::update(&state.pool, task.id, scope, &patch)
        .await
        .or_not_found("task")
        .map_err(reject)?;
    Ok(Json(task))
}
