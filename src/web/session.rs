use crate::db::users;
use crate::domain::models::UserRole;
use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap, HeaderValue, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_TTL_HOURS: i64 = 24;

#[derive(Debug, Clone)]
pub struct SessionClaims {
    pub user_id: Uuid,
    pub role: UserRole,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("invalid token format")]
    Invalid,
    #[error("signature mismatch")]
    Signature,
    #[error("expired")]
    Expired,
    #[error("bad role")]
    Role,
}

pub fn sign_session(user_id: Uuid, role: UserRole, key: &[u8]) -> Result<String, SessionError> {
    let exp = Utc::now() + Duration::hours(SESSION_TTL_HOURS);
    let payload = format!("{}|{}|{}", user_id, role_string(role), exp.timestamp());
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(payload.as_bytes());
    let sig = mac.finalize().into_bytes();
    let token = format!(
        "{}.{}",
        general_purpose::URL_SAFE_NO_PAD.encode(payload.as_bytes()),
        general_purpose::URL_SAFE_NO_PAD.encode(sig)
    );
    Ok(token)
}

pub fn verify_session(token: &str, key: &[u8]) -> Result<SessionClaims, SessionError> {
    let (payload_b64, sig_b64) = token.split_once('.').ok_or(SessionError::Invalid)?;
    let payload_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| SessionError::Invalid)?;
    let sig_bytes = general_purpose::URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| SessionError::Invalid)?;

    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| SessionError::Invalid)?;
    mac.update(&payload_bytes);
    mac.verify_slice(&sig_bytes)
        .map_err(|_| SessionError::Signature)?;

    let payload = String::from_utf8(payload_bytes).map_err(|_| SessionError::Invalid)?;
    let pieces: Vec<&str> = payload.split('|').collect();
    if pieces.len() != 3 {
        return Err(SessionError::Invalid);
    }
    let user_id = Uuid::parse_str(pieces[0]).map_err(|_| SessionError::Invalid)?;
    let role = parse_role(pieces[1])?;
    let exp: i64 = pieces[2].parse().map_err(|_| SessionError::Invalid)?;
    if Utc::now().timestamp() > exp {
        return Err(SessionError::Expired);
    }
    Ok(SessionClaims { user_id, role, exp })
}

pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(auth) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Ok(val) = auth.to_str() {
            if let Some(bearer) = val.strip_prefix("Bearer ") {
                return Some(bearer.trim().to_string());
            }
        }
    }
    if let Some(cookie) = headers.get(axum::http::header::COOKIE) {
        if let Ok(val) = cookie.to_str() {
            for pair in val.split(';') {
                if let Some(rest) = pair.trim().strip_prefix("session=") {
                    return Some(rest.to_string());
                }
            }
        }
    }
    None
}

/// `Set-Cookie` value carrying the session; an empty token with max-age 0 clears it.
pub fn session_cookie(token: &str, max_age_secs: i64, secure: bool) -> Result<HeaderValue, StatusCode> {
    let secure_flag = if secure { "; Secure" } else { "" };
    format!("session={token}; HttpOnly; SameSite=Lax; Path=/; Max-Age={max_age_secs}{secure_flag}")
        .parse()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

fn role_string(role: UserRole) -> &'static str {
    match role {
        UserRole::Admin => "ADMIN",
        UserRole::User => "USER",
    }
}

fn parse_role(raw: &str) -> Result<UserRole, SessionError> {
    match raw {
        "ADMIN" => Ok(UserRole::Admin),
        "USER" => Ok(UserRole::User),
        _ => Err(SessionError::Role),
    }
}

/// Authenticated caller. The role comes from the database, so demotions apply at once.
#[derive(Debug, Clone, Copy)]
pub struct UserSession {
    pub user_id: Uuid,
    pub role: UserRole,
}

impl UserSession {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    /// Ownership filter for repository queries: admins see everything.
    pub fn owner_scope(&self) -> Option<Uuid> {
        if self.is_admin() {
            None
        } else {
            Some(self.user_id)
        }
    }

    pub fn require_admin(&self) -> Result<(), StatusCode> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(StatusCode::FORBIDDEN)
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for UserSession
where
    S: Send + Sync,
    crate::state::SharedState: FromRef<S>,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let shared_state = crate::state::SharedState::from_ref(state);

        let token = extract_token(&parts.headers).ok_or(StatusCode::UNAUTHORIZED)?;

        let claims = verify_session(&token, shared_state.session_key()).map_err(|e| {
            tracing::warn!("Session verification failed: {}", e);
            StatusCode::UNAUTHORIZED
        })?;

        let user = users::find_by_id(&shared_state.pool, claims.user_id)
            .await
            .map_err(|e| {
                tracing::warn!("User lookup failed for session: {}", e);
                StatusCode::UNAUTHORIZED
            })?;

        let Some(user) = user else {
            return Err(StatusCode::UNAUTHORIZED);
        };

        if !user.is_active {
            return Err(StatusCode::UNAUTHORIZED);
        }

        Ok(UserSession {
            user_id: user.id,
            role: user.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn signed_token_verifies() {
        let id = Uuid::new_v4();
        let token = sign_session(id, UserRole::Admin, KEY).unwrap();
        let claims = verify_session(&token, KEY).unwrap();
        assert_eq!(claims.user_id, id);
        assert_eq!(claims.role, UserRole::Admin);
        assert!(claims.exp > Utc::now().timestamp());
    }

    #[test]
    fn tampered_or_foreign_tokens_fail() {
        let token = sign_session(Uuid::new_v4(), UserRole::User, KEY).unwrap();
        assert!(matches!(
            verify_session(&token, b"another-key-another-key-another!!"),
            Err(SessionError::Signature)
        ));

        let (_, sig) = token.split_once('.').unwrap();
        let forged_payload = format!("{}|ADMIN|{}", Uuid::new_v4(), i64::MAX);
        let forged = format!(
            "{}.{}",
            general_purpose::URL_SAFE_NO_PAD.encode(forged_payload),
            sig
        );
        assert!(matches!(verify_session(&forged, KEY), Err(SessionError::Signature)));
        assert!(matches!(verify_session("garbage", KEY), Err(SessionError::Invalid)));
    }

    #[test]
    fn token_found_in_bearer_or_cookie() {
        let mut headers = HeaderMap::new();
        assert!(extract_token(&headers).is_none());
        headers.insert("cookie", "theme=dark; session=abc.def".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("abc.def"));
        headers.insert("authorization", "Bearer xyz.uvw".parse().unwrap());
        assert_eq!(extract_token(&headers).as_deref(), Some("xyz.uvw"));
    }

    #[test]
    fn scope_follows_role() {
        let id = Uuid::new_v4();
        let admin = UserSession { user_id: id, role: UserRole::Admin };
        let user = UserSession { user_id: id, role: UserRole::User };
        assert_eq!(admin.owner_scope(), None);
        assert_eq!(user.owner_scope(), Some(id));
        assert_eq!(user.require_admin(), Err(StatusCode::FORBIDDEN));
    }

    #[test]
    fn cookie_flags() {
        let v = session_cookie("t", 60, true).unwrap();
        let s = v.to_str().unwrap();
        assert!(s.contains("HttpOnly"));
        assert!(s.contains("SameSite=Lax"));
        assert!(s.ends_with("; Secure"));
    }
}
