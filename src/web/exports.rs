use crate::db::{campaigns, exports, OrNotFound};
use crate::domain::models::{ExportJob, ExportType, JobStatus};
use crate::services::exporter::{content_type, export_path, file_extension};
use crate::state::SharedState;
use crate::web::reject;
use crate::web::session::UserSession;
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct CreateExport {
    pub export_type: ExportType,
    #[serde(default)]
    pub campaign_id: Option<Uuid>,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_exports).post(create_export))
        .route("/:id", get(get_export))
        .route("/:id/download", get(download_export))
        .with_state(state)
}

async fn list_exports(
    State(state): State<SharedState>,
    session: UserSession,
) -> Result<Json<Vec<ExportJob>>, StatusCode> {
    let rows = exports::list(&state.pool, session.user_id)
        .await
        .map_err(reject)?;
    Ok(Json(rows))
}

async fn create_export(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<CreateExport>,
) -> Result<(StatusCode, Json<ExportJob>), StatusCode> {
    let params = match (payload.export_type, payload.campaign_id) {
        (ExportType::CampaignData, None) => return Err(StatusCode::BAD_REQUEST),
        (ExportType::CampaignData, Some(campaign_id)) => {
            campaigns::find_scoped(&state.pool, campaign_id, session.owner_scope())
                .await
                .map_err(reject)?
                .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
            json!({ "campaignId": campaign_id })
        }
        _ => json!({}),
    };

    let job = exports::create(&state.pool, session.user_id, payload.export_type, &params)
        .await
        .map_err(reject)?;
    tracing::info!("Queued {:?} export {}", job.export_type, job.id);
    Ok((StatusCode::ACCEPTED, Json(job)))
}

async fn get_export(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<ExportJob>, StatusCode> {
    let job = exports::find_scoped(&state.pool, id, Some(session.user_id))
        .await
        .or_not_found("export")
        .map_err(reject)?;
    Ok(Json(job))
}

async fn download_export(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<(HeaderMap, Vec<u8>), StatusCode> {
    let job = exports::find_scoped(&state.pool, id, Some(session.user_id))
        .await
        .or_not_found("export")
        .map_err(reject)?;
    if job.status != JobStatus::Completed {
        return Err(StatusCode::CONFLICT);
    }

    let path = export_path(&state.config.export_dir, job.id, job.export_type);
    let bytes = tokio::fs::read(&path).await.map_err(|e| {
        tracing::error!("Export file {} unreadable: {}", path.display(), e);
        StatusCode::GONE
    })?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type(job.export_type)),
    );
    let disposition = format!(
        "attachment; filename=\"export-{}.{}\"",
        job.id,
        file_extension(job.export_type)
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        disposition
            .parse()
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );
    Ok((headers, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::UserRole;
    use crate::web::test_support;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    #[test]
    fn campaign_id_is_optional_in_body() {
        let parsed: CreateExport = serde_json::from_value(json!({"export_type": "LEADS"})).unwrap();
        assert_eq!(parsed.export_type, ExportType::Leads);
        assert!(parsed.campaign_id.is_none());
    }

    #[tokio::test]
    async fn signed_token_without_loadable_user_is_unauthorized() {
        let state = test_support::state();
        let app = router(state);
        let res = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/")
                    .header("content-type", "application/json")
                    .header(
                        "authorization",
                        format!("Bearer {}", test_support::token(UserRole::User)),
                    )
                    .body(Body::from(r#"{"export_type":"EVERYTHING"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }
}
