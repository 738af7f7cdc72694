use crate::db::{users, OrNotFound};
use crate::domain::models::{User, UserRole};
use crate::state::SharedState;
use crate::web::auth::{hash_password, valid_password};
use crate::web::session::UserSession;
use crate::web::{reject, required, valid_email};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub name: String,
    pub password: String,
    #[serde(default = "default_role")]
    pub role: UserRole,
}

fn default_role() -> UserRole {
    UserRole::User
}

#[derive(Deserialize)]
pub struct RoleRequest {
    pub role: UserRole,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", axum::routing::delete(delete_user))
        .route("/users/:id/role", post(set_role))
        .route("/users/:id/deactivate", post(deactivate_user))
        .route("/users/:id/reactivate", post(reactivate_user))
        .with_state(state)
}

async fn list_users(
    State(state): State<SharedState>,
    session: UserSession,
) -> Result<Json<Vec<User>>, StatusCode> {
    session.require_admin()?;
    let users = users::list(&state.pool).await.map_err(reject)?;
    Ok(Json(users))
}

async fn create_user(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), StatusCode> {
    session.require_admin()?;

    if !valid_email(&payload.email) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let name = required(&payload.name, 200)?;
    valid_password(&payload.password)?;

    let password_hash = hash_password(&payload.password)?;
    let user = users::create(
        &state.pool,
        users::NewUser {
            email: &payload.email,
            name,
            password_hash: &password_hash,
            role: payload.role,
        },
    )
    .await
    .map_err(reject)?;

    tracing::info!("Admin {} created user {} ({:?})", session.user_id, user.id, user.role);
    Ok((StatusCode::CREATED, Json(user)))
}

async fn set_role(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<RoleRequest>,
) -> Result<Json<User>, StatusCode> {
    session.require_admin()?;
    if id == session.user_id && payload.role != UserRole::Admin {
        // an admin cannot demote themselves out of the admin surface
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let user = users::set_role(&state.pool, id, payload.role)
        .await
        .or_not_found("user")
        .map_err(reject)?;
    tracing::info!("Admin {} set role of {} to {:?}", session.user_id, id, payload.role);
    Ok(Json(user))
}

async fn deactivate_user(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, StatusCode> {
    session.require_admin()?;
    if id == session.user_id {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    let user = users::set_active(&state.pool, id, false)
        .await
        .or_not_found("user")
        .map_err(reject)?;
    tracing::info!("Admin {} deactivated user {}", session.user_id, id);
    Ok(Json(user))
}

async fn reactivate_user(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<User>, StatusCode> {
    session.require_admin()?;
    let user = users::set_active(&state.pool, id, true)
        .await
        .or_not_found("user")
        .map_err(reject)?;
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    session.require_admin()?;
    if id == session.user_id {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }
    if !users::delete(&state.pool, id).await.map_err(reject)? {
        return Err(StatusCode::NOT_FOUND);
    }
    tracing::warn!("Admin {} deleted user {}", session.user_id, id);
    Ok(StatusCode::NO_CONTENT)
}
