use crate::db::leads::{self, LeadFilter, LeadPatch, NewLead, ScoreStats, StageCount};
use crate::db::{users, OrNotFound, Page};
use crate::domain::models::{Lead, LeadStage};
use crate::services::activity;
use crate::state::SharedState;
use crate::web::session::UserSession;
use crate::web::{illegal, reject, required, valid_bulk, valid_email};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_IMPORT_ROWS: usize = 5_000;

#[derive(Deserialize)]
pub struct StageRequest {
    pub stage: LeadStage,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub user_id: Uuid,
}

#[derive(Deserialize)]
pub struct BulkIds {
    pub ids: Vec<Uuid>,
}

#[derive(Deserialize)]
pub struct BulkStage {
    pub ids: Vec<Uuid>,
    pub stage: LeadStage,
}

#[derive(Deserialize)]
pub struct BulkTags {
    pub ids: Vec<Uuid>,
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Deserialize)]
pub struct ImportRequest {
    pub leads: Vec<NewLead>,
}

#[derive(Serialize)]
pub struct ImportResult {
    pub received: usize,
    pub imported: u64,
    pub skipped: u64,
}

#[derive(Serialize)]
pub struct BulkStageResult {
    pub updated: Vec<Uuid>,
    pub rejected: Vec<Uuid>,
}

#[derive(Serialize)]
pub struct BulkCount {
    pub affected: u64,
}

#[derive(Serialize)]
pub struct LeadStats {
    pub by_stage: Vec<StageCount>,
    pub score: ScoreStats,
}

/// One CSV row of an import; tags are `;`-separated.
#[derive(Deserialize)]
struct CsvLead {
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    phone: Option<String>,
    #[serde(default)]
    company: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    linkedin_url: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    notes: Option<String>,
    #[serde(default)]
    tags: Option<String>,
}

impl From<CsvLead> for NewLead {
    fn from(row: CsvLead) -> Self {
        let blank_to_none = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        NewLead {
            first_name: row.first_name,
            last_name: blank_to_none(row.last_name),
            email: blank_to_none(row.email),
            phone: blank_to_none(row.phone),
            company: blank_to_none(row.company),
            title: blank_to_none(row.title),
            linkedin_url: blank_to_none(row.linkedin_url),
            source: blank_to_none(row.source),
            notes: blank_to_none(row.notes),
            stage: None,
            tags: row
                .tags
                .map(|t| t.split(';').map(str::to_string).collect())
                .unwrap_or_default(),
        }
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(list_leads).post(create_lead))
        .route("/import", post(import_leads))
        .route("/stats", get(lead_stats))
        .route("/bulk/stage", post(bulk_stage))
        .route("/bulk/tags", post(bulk_tags))
        .route("/bulk/delete", post(bulk_delete))
        .route("/:id", get(get_lead).patch(update_lead).delete(delete_lead))
        .route("/:id/stage", post(change_stage))
        .route("/:id/assign", post(assign_lead))
        .with_state(state)
}

/// Admins may narrow to one owner with `owner_id`; everyone else is pinned to themselves.
fn list_scope(session: &UserSession, filter: &LeadFilter) -> Option<Uuid> {
    if session.is_admin() {
        filter.owner_id
    } else {
        Some(session.user_id)
    }
}

fn validate_new(new: &NewLead) -> Result<(), StatusCode> {
    required(&new.first_name, 200)?;
    if let Some(email) = new.email.as_deref() {
        if !valid_email(email) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    Ok(())
}

async fn list_leads(
    State(state): State<SharedState>,
    session: UserSession,
    Query(filter): Query<LeadFilter>,
) -> Result<Json<Page<Lead>>, StatusCode> {
    let page = leads::list(&state.pool, list_scope(&session, &filter), &filter)
        .await
        .map_err(reject)?;
    Ok(Json(page))
}

async fn create_lead(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<NewLead>,
) -> Result<(StatusCode, Json<Lead>), StatusCode> {
    validate_new(&payload)?;
    let lead = leads::create(&state.pool, session.user_id, &payload)
        .await
        .map_err(reject)?;
    activity::refresh_score(&state.pool, lead.id).await.map_err(reject)?;
    let lead = leads::find_by_id(&state.pool, lead.id, None)
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    Ok((StatusCode::CREATED, Json(lead)))
}

fn parse_import(headers: &HeaderMap, body: &[u8]) -> Result<Vec<NewLead>, StatusCode> {
    let is_csv = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("text/csv"))
        .unwrap_or(false);

    if is_csv {
        let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(body);
        reader
            .deserialize::<CsvLead>()
            .map(|row| row.map(NewLead::from))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| {
                tracing::debug!("Rejected CSV import: {}", e);
                StatusCode::BAD_REQUEST
            })
    } else {
        serde_json::from_slice::<ImportRequest>(body)
            .map(|req| req.leads)
            .map_err(|_| StatusCode::BAD_REQUEST)
    }
}

async fn import_leads(
    State(state): State<SharedState>,
    session: UserSession,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ImportResult>, StatusCode> {
    let rows = parse_import(&headers, &body)?;
    if rows.is_empty() || rows.len() > MAX_IMPORT_ROWS {
        return Err(StatusCode::BAD_REQUEST);
    }
    for row in &rows {
        validate_new(row)?;
    }

    let imported = leads::create_many(&state.pool, session.user_id, &rows)
        .await
        .map_err(reject)?;
    tracing::info!(
        "User {} imported {} of {} leads",
        session.user_id,
        imported,
        rows.len()
    );
    Ok(Json(ImportResult {
        received: rows.len(),
        imported,
        skipped: rows.len() as u64 - imported,
    }))
}

async fn lead_stats(
    State(state): State<SharedState>,
    session: UserSession,
) -> Result<Json<LeadStats>, StatusCode> {
    let scope = session.owner_scope();
    let by_stage = leads::count_by_stage(&state.pool, scope).await.map_err(reject)?;
    let score = leads::score_stats(&state.pool, scope).await.map_err(reject)?;
    Ok(Json(LeadStats { by_stage, score }))
}

async fn get_lead(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<Json<Lead>, StatusCode> {
    let lead = leads::find_by_id(&state.pool, id, session.owner_scope())
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    Ok(Json(lead))
}

async fn update_lead(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(patch): Json<LeadPatch>,
) -> Result<Json<Lead>, StatusCode> {
    if let Some(first_name) = patch.first_name.as_deref() {
        required(first_name, 200)?;
    }
    if let Some(email) = patch.email.as_deref() {
        if !valid_email(email) {
            return Err(StatusCode::BAD_REQUEST);
        }
    }
    let lead = leads::update(&state.pool, id, session.owner_scope(), &patch)
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    Ok(Json(lead))
}

async fn delete_lead(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    if !leads::delete(&state.pool, id, session.owner_scope())
        .await
        .map_err(reject)?
    {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn change_stage(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<StageRequest>,
) -> Result<Json<Lead>, StatusCode> {
    let lead = leads::find_by_id(&state.pool, id, session.owner_scope())
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    let next = lead.stage.transition(payload.stage).map_err(illegal)?;

    if next != lead.stage {
        let moved = leads::set_stage(&state.pool, lead.id, lead.stage, next)
            .await
            .map_err(reject)?;
        if !moved {
            tracing::warn!("Lead {} changed stage concurrently; refusing {:?}", lead.id, next);
            return Err(StatusCode::CONFLICT);
        }
        activity::refresh_score(&state.pool, lead.id).await.map_err(reject)?;
        tracing::info!("Lead {} moved {:?} -> {:?}", lead.id, lead.stage, next);
    }

    let lead = leads::find_by_id(&state.pool, id, None)
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    Ok(Json(lead))
}

async fn assign_lead(
    State(state): State<SharedState>,
    session: UserSession,
    Path(id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<Lead>, StatusCode> {
    session.require_admin()?;
    let assignee = users::find_by_id(&state.pool, payload.user_id)
        .await
        .map_err(reject)?
        .filter(|u| u.is_active)
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    let lead = leads::assign_owner(&state.pool, id, assignee.id)
        .await
        .or_not_found("lead")
        .map_err(reject)?;
    tracing::info!("Lead {} assigned to {}", lead.id, assignee.id);
    Ok(Json(lead))
}

/// Splits requested leads into `(id, current stage)` moves allowed to reach `stage` and refused ids.
/// Leads already at `stage` are neither.
fn partition_transitions(
    current: &[(Uuid, LeadStage)],
    stage: LeadStage,
) -> (Vec<(Uuid, LeadStage)>, Vec<Uuid>) {
    let mut allowed = Vec::new();
    let mut refused = Vec::new();
    for &(id, from) in current {
        if from == stage {
            continue;
        }
        if from.can_transition_to(stage) {
            allowed.push((id, from));
        } else {
            refused.push(id);
        }
    }
    (allowed, refused)
}

/// Allowed moves whose compare-and-set found the lead at another stage.
fn lost_races(allowed: &[(Uuid, LeadStage)], updated: &[Uuid]) -> Vec<Uuid> {
    allowed
        .iter()
        .map(|(id, _)| *id)
        .filter(|id| !updated.contains(id))
        .collect()
}

async fn bulk_stage(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<BulkStage>,
) -> Result<Json<BulkStageResult>, StatusCode> {
    valid_bulk(&payload.ids)?;
    let scope = session.owner_scope();
    let current = leads::stages_of(&state.pool, &payload.ids, scope)
        .await
        .map_err(reject)?;
    let (allowed, mut rejected) = partition_transitions(&current, payload.stage);

    let updated = if allowed.is_empty() {
        Vec::new()
    } else {
        leads::set_stage_many(&state.pool, &allowed, scope, payload.stage)
            .await
            .map_err(reject)?
    };
    let raced = lost_races(&allowed, &updated);
    if !raced.is_empty() {
        tracing::warn!("{} leads changed stage during a bulk move", raced.len());
        rejected.extend(raced);
    }
    for id in &updated {
        if let Err(e) = activity::refresh_score(&state.pool, *id).await {
            tracing::error!("Failed to rescore lead {}: {}", id, e);
        }
    }
    Ok(Json(BulkStageResult { updated, rejected }))
}

async fn bulk_tags(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<BulkTags>,
) -> Result<Json<BulkCount>, StatusCode> {
    valid_bulk(&payload.ids)?;
    if payload.add.is_empty() && payload.remove.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let affected = leads::retag_many(
        &state.pool,
        &payload.ids,
        session.owner_scope(),
        &payload.add,
        &payload.remove,
    )
    .await
    .map_err(reject)?;
    Ok(Json(BulkCount { affected }))
}

async fn bulk_delete(
    State(state): State<SharedState>,
    session: UserSession,
    Json(payload): Json<BulkIds>,
) -> Result<Json<BulkCount>, StatusCode> {
    valid_bulk(&payload.ids)?;
    let affected = leads::delete_many(&state.pool, &payload.ids, session.owner_scope())
        .await
        .map_err(reject)?;
    tracing::info!("User {} deleted {} leads", session.user_id, affected);
    Ok(Json(BulkCount { affected }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::UserRole;

    #[test]
    fn csv_import_maps_columns() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "text/csv".parse().unwrap());
        let body = b"first_name,last_name,email,company,tags\n\
                     Ada,Lovelace,ada@example.com,Engines,vip;math\n\
                     Grace,,,Navy,\n";
        let rows = parse_import(&headers, body).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].email.as_deref(), Some("ada@example.com"));
        assert_eq!(rows[0].tags, vec!["vip".to_string(), "math".to_string()]);
        assert_eq!(rows[1].last_name, None);
        assert!(rows[1].tags.is_empty());
    }

    #[test]
    fn json_import_requires_leads_array() {
        let headers = HeaderMap::new();
        let rows = parse_import(&headers, br#"{"leads":[{"first_name":"Ada"}]}"#).unwrap();
        assert_eq!(rows[0].first_name, "Ada");
        assert!(parse_import(&headers, b"[]").is_err());
    }

    #[test]
    fn new_lead_needs_name_and_valid_email() {
        let mut lead = NewLead {
            first_name: "  ".into(),
            ..Default::default()
        };
        assert!(validate_new(&lead).is_err());
        lead.first_name = "Ada".into();
        assert!(validate_new(&lead).is_ok());
        lead.email = Some("nope".into());
        assert!(validate_new(&lead).is_err());
    }

    #[test]
    fn terminal_leads_cannot_be_bulk_reopened() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let c = Uuid::new_v4();
        let current = [
            (a, LeadStage::Contacted),
            (b, LeadStage::Converted),
            (c, LeadStage::Qualified),
        ];
        let (allowed, refused) = partition_transitions(&current, LeadStage::Qualified);
        assert_eq!(allowed, vec![(a, LeadStage::Contacted)]);
        assert_eq!(refused, vec![b]);
    }

    #[test]
    fn moves_that_lost_the_compare_and_set_are_reported() {
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let allowed = [(a, LeadStage::New), (b, LeadStage::Engaged)];
        assert_eq!(lost_races(&allowed, &[a]), vec![b]);
        assert!(lost_races(&allowed, &[a, b]).is_empty());
    }

    #[test]
    fn only_admins_pick_the_listed_owner() {
        let other = Uuid::new_v4();
        let filter = LeadFilter {
            owner_id: Some(other),
            ..Default::default()
        };
        let me = Uuid::new_v4();
        let user = UserSession { user_id: me, role: UserRole::User };
        let admin = UserSession { user_id: me, role: UserRole::Admin };
        assert_eq!(list_scope(&user, &filter), Some(me));
        assert_eq!(list_scope(&admin, &filter), Some(other));
        assert_eq!(list_scope(&admin, &LeadFilter::default()), None);
    }
}
