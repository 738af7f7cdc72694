use crate::db::templates::{self, NewTemplate, TemplatePatch};
use crate::db::{leads, users, OrNotFound};
use crate::domain::models::{MessageTemplate, Sender, TemplateType};
use crate::domain::render::render;
use crate::state::SharedState;
use crate::web::session::UserSession;
use crate::web::{internal, reject, required};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_TEMPLATE_LEN: usize = 20_000;
const MAX_BRIEF_LEN: usize = 2_000;

#[derive(Deserialize)]
pub struct TemplateQuery {
    pub template_type: Option<TemplateType>,
}

#[derive(Deserialize)]
pub struct GenerateRequest {
    pub template_type: TemplateType,
    #[serde(default)]
    pub brief: String,
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct PreviewRequest {
    pub lead_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct Preview {
    pub subject: Option<String>,
    pub content: String,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_templates).post(create_template))
        .route("/generate", post(generate_template))
        .route(
            "/:id",
            get(get_template).patch(update_template).delete(delete_template),
        )
        .route("/:id/preview", post(preview_template))
        .with_state(state)
}

async fn list_templates(
    State(state): State<SharedState>,
    session: UserSession,
    Query(query): Query<TemplateQuery>,
) -> Result<Json<Vec<MessageTemplate>>, StatusCode> {
    let rows = templates::list(&state.pool, session.owner_scope(), query.template_type)
        .await
        .map_err(reject)?;
    Ok(Json(rows))
}

async fn create_template(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<NewTemplate>,
) -> Result<(StatusCode, Json<MessageTemplate>), StatusCode> {
    required(&payload.name, 200)?;
    required(&payload.content, MAX_TEMPLATE_LEN)?;
    // only the generator marks templates as AI-made
    let new = NewTemplate {
        is_ai_generated: false,
        ..payload
    };
    let template = templates::create(&state.pool, session.user_id, &new)
        .await
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(template)))
}

async fn generate_template(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<GenerateRequest>,
) -> Result<(StatusCode, Json<MessageTemplate>), StatusCode> {
    if payload.brief.chars().count() > MAX_BRIEF_LEN {
        return Err(StatusCode::BAD_REQUEST);
    }
    let draft = state
        .engine
        .draft_template(payload.template_type, payload.brief.trim())
        .await
        .map_err(internal)?;

    let name = match payload.name.as_deref() {
        Some(name) => required(name, 200)?.to_string(),
        None => draft.name,
    };
    let new = NewTemplate {
        name,
        template_type: payload.template_type,
        subject: draft.subject,
        content: draft.content,
        is_ai_generated: true,
    };
    let template = templates::create(&state.pool, session.user_id, &new)
        .await
        .map_err(reject)?;
    tracing::info!(
        "Generated {:?} template {} via {}",
        template.template_type,
        template.id,
        state.engine.name()
    );
    Ok((StatusCode::CREATED, Json(template)))
}

async fn get_template(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageTemplate>, StatusCode> {
    let template = templates::find_scoped(&state.pool, id, session.owner_scope())
        .await
        .or_not_found("template")
        .map_err(reject)?;
    Ok(Json(template))
}

async fn update_template(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(patch): Json<TemplatePatch>,
) -> Result<Json<MessageTemplate>, StatusCode> {
    if let Some(name) = patch.name.as_deref() {
        required(name, 200)?;
    }
    if let Some(content) = patch.content.as_deref() {
        required(content, MAX_TEMPLATE_LEN)?;
    }
    let template = templates::update(&state.pool, id, session.owner_scope(), &patch)
        .await
        .or_not_found("template")
        .map_err(reject)?;
    Ok(Json(template))
}

async fn delete_template(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    if !templates::delete(&state.pool, id, session.owner_scope())
        .await
        .map_err(reject)?
    {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

fn render_preview(template: &MessageTemplate, lead: &crate::domain::models::Lead, sender: &Sender) -> Preview {
    Preview {
        subject: template.subject.as_deref().map(|s| render(s, lead, sender)),
        content: render(&template.content, lead, sender),
    }
}

async fn preview_template(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<PreviewRequest>,
) -> Result<Json<Preview>, StatusCode> {
    let scope = session.owner_scope();
    let template = templates::find_scoped(&state.pool, id, scope)
        .await
        .or_not_found("template")
        .map_err(reject)?;
    let lead = leads::find_by_id(&state.pool, payload.lead_id, scope)
        .await
        .map_err(reject)?
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    let me = users::find_by_id(&state.pool, session.user_id)
        .await
        .or_not_found("user")
        .map_err(reject)?;
    let sender = Sender {
        name: me.name,
        email: me.email,
    };
    Ok(Json(render_preview(&template, &lead, &sender)))
}
