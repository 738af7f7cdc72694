use crate::db::{password_resets, users, OrNotFound};
use crate::domain::models::User;
use crate::middleware::rate_limit_middleware;
use crate::state::SharedState;
use crate::web::session::{self, UserSession, SESSION_TTL_HOURS};
use crate::web::{reject, required, valid_email};
use argon2::{
    password_hash::{PasswordHash, PasswordHasher, SaltString},
    Argon2, PasswordVerifier,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_PASSWORD_LEN: usize = 128;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub user: User,
    pub token: String,
}

#[derive(Deserialize)]
pub struct ForgotRequest {
    pub email: String,
}

#[derive(Serialize)]
pub struct ForgotResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
}

#[derive(Deserialize)]
pub struct ResetRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub fn router(state: SharedState) -> Router {
    let login_routes = Router::new()
        .route("/login", post(login))
        .route_layer(middleware::from_fn_with_state(
            state.login_limiter.clone(),
            rate_limit_middleware,
        ));
    let forgot_routes = Router::new()
        .route("/password/forgot", post(forgot_password))
        .route_layer(middleware::from_fn_with_state(
            state.reset_limiter.clone(),
            rate_limit_middleware,
        ));

    Router::new()
        .route("/register", post(register))
        .route("/logout", post(logout))
        .route("/me", get(me))
        .route("/password/reset", post(reset_password))
        .route("/password/change", post(change_password))
        .merge(login_routes)
        .merge(forgot_routes)
        .with_state(state)
}

pub(crate) fn hash_password(password: &str) -> Result<String, StatusCode> {
    let salt = SaltString::generate(rand_core::OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| {
            tracing::error!("Failed to hash password: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub(crate) fn valid_password(password: &str) -> Result<(), StatusCode> {
    let len = password.chars().count();
    if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&len) {
        return Err(StatusCode::BAD_REQUEST);
    }
    Ok(())
}

/// Reset tokens are only ever stored as their SHA-256 digest.
fn hash_reset_token(token: &str) -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(Sha256::digest(token.as_bytes()))
}

fn new_reset_token() -> String {
    general_purpose::URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>())
}

fn issue_session(state: &SharedState, user: User) -> Result<(HeaderMap, Json<SessionResponse>), StatusCode> {
    let token = session::sign_session(user.id, user.role, state.session_key()).map_err(|e| {
        tracing::error!("Failed to sign session: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        session::session_cookie(&token, SESSION_TTL_HOURS * 3600, state.config.secure_cookies)?,
    );
    Ok((headers, Json(SessionResponse { user, token })))
}

async fn register(
    State(state): State<SharedState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    if !valid_email(&payload.email) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let name = required(&payload.name, 200)?;
    valid_password(&payload.password)?;

    let password_hash = hash_password(&payload.password)?;
    let user = users::register(
        &state.pool,
        &payload.email,
        name,
        &password_hash,
        state.config.allow_signup,
    )
    .await
    .map_err(reject)?
    .ok_or(StatusCode::FORBIDDEN)?;

    tracing::info!("Registered user {} as {:?}", user.id, user.role);
    let (headers, body) = issue_session(&state, user)?;
    Ok((StatusCode::CREATED, headers, body))
}

async fn login(
    State(state): State<SharedState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = users::find_by_email(&state.pool, &payload.email)
        .await
        .map_err(reject)?
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_password(&payload.password, &user.password_hash) {
        tracing::warn!("Failed login for user {}", user.id);
        return Err(StatusCode::UNAUTHORIZED);
    }
    if !user.is_active {
        return Err(StatusCode::UNAUTHORIZED);
    }

    issue_session(&state, user)
}

async fn logout(State(state): State<SharedState>) -> Result<impl IntoResponse, StatusCode> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::SET_COOKIE,
        session::session_cookie("", 0, state.config.secure_cookies)?,
    );
    Ok((StatusCode::NO_CONTENT, headers))
}

async fn me(
    State(state): State<SharedState>,
    session: UserSession,
) -> Result<Json<User>, StatusCode> {
    let user = users::find_by_id(&state.pool, session.user_id)
        .await
        .or_not_found("user")
        .map_err(reject)?;
    Ok(Json(user))
}

async fn forgot_password(
    State(state): State<SharedState>,
    Json(payload): Json<ForgotRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let mut reset_token = None;

    let user = users::find_by_email(&state.pool, &payload.email)
        .await
        .map_err(reject)?;
    if let Some(user) = user.filter(|u| u.is_active) {
        let token = new_reset_token();
        let expires_at = Utc::now() + Duration::minutes(state.config.reset_token_ttl_minutes);
        password_resets::create(&state.pool, user.id, &hash_reset_token(&token), expires_at)
            .await
            .map_err(reject)?;
        tracing::info!("Issued password reset for user {}", user.id);
        if state.config.expose_reset_tokens {
            reset_token = Some(token);
        }
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ForgotResponse {
            accepted: true,
            reset_token,
        }),
    ))
}

async fn reset_password(
    State(state): State<SharedState>,
    Json(payload): Json<ResetRequest>,
) -> Result<StatusCode, StatusCode> {
    valid_password(&payload.new_password)?;
    let token = payload.token.trim();
    if token.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let reset = password_resets::consume(&state.pool, &hash_reset_token(token), Utc::now())
        .await
        .map_err(reject)?
        .ok_or(StatusCode::BAD_REQUEST)?;

    let password_hash = hash_password(&payload.new_password)?;
    users::set_password_hash(&state.pool, reset.user_id, &password_hash)
        .await
        .map_err(reject)?;
    password_resets::revoke_for_user(&state.pool, reset.user_id)
        .await
        .map_err(reject)?;

    tracing::info!("Password reset completed for user {}", reset.user_id);
    Ok(StatusCode::NO_CONTENT)
}

async fn change_password(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<StatusCode, StatusCode> {
    valid_password(&payload.new_password)?;
    let user = users::find_by_id(&state.pool, session.user_id)
        .await
        .or_not_found("user")
        .map_err(reject)?;
    if !verify_password(&payload.current_password, &user.password_hash) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let password_hash = hash_password(&payload.new_password)?;
    users::set_password_hash(&state.pool, user.id, &password_hash)
        .await
        .map_err(reject)?;
    password_resets::revoke_for_user(&state.pool, user.id)
        .await
        .map_err(reject)?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::web::test_support;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn password_hash_verifies() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("anything", "not-a-phc-string"));
    }

    #[test]
    fn password_length_is_bounded() {
        assert!(valid_password("short").is_err());
        assert!(valid_password("long enough").is_ok());
        assert!(valid_password(&"x".repeat(MAX_PASSWORD_LEN + 1)).is_err());
    }

    #[test]
    fn reset_tokens_are_random_and_hashed() {
        let a = new_reset_token();
        let b = new_reset_token();
        assert_ne!(a, b);
        assert_eq!(hash_reset_token(&a), hash_reset_token(&a));
        assert_ne!(hash_reset_token(&a), a);
    }

    #[tokio::test]
    async fn register_rejects_bad_input_before_touching_db() {
        let app = router(test_support::state());
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/register")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"email":"not-an-email","name":"Ada","password":"long enough"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_clears_cookie() {
        let app = router(test_support::state());
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logout")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        let cookie = res.headers().get(header::SET_COOKIE).unwrap().to_str().unwrap();
        assert!(cookie.starts_with("session=;"));
        assert!(cookie.contains("Max-Age=0"));
    }
}
