//! Authenticated JSON endpoints used by the web app.

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::auth::Caller;
use super::phone::{clean_dial_number, normalize_us_number};
use super::token::{issue_credential, Credential};
use super::AppState;
use crate::error::ApiError;
use crate::pipeline::classifier::{self, OutcomeInput, OutcomeResult};
use crate::pipeline::outcomes::{outcomes_for, OutcomeSpec};
use crate::pipeline::{Activity, InteractionType, Lead, NewLead, Stage};
use crate::store::voice::{CallRecording, ForwardingSettings};

pub async fn get_token(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<Json<Credential>, ApiError> {
    Ok(Json(issue_credential(&state, &caller.user_id, Utc::now())?))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForwardingRequest {
    pub phone_number: Option<String>,
}

pub async fn get_forwarding_settings(
    State(state): State<AppState>,
    _caller: Caller,
) -> Result<Json<ForwardingSettings>, ApiError> {
    Ok(Json(state.store.lock().forwarding_settings()?))
}

/// Admin only. The number is normalized before it is stored.
pub async fn set_forwarding_number(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<ForwardingRequest>,
) -> Result<Json<ForwardingSettings>, ApiError> {
    let store = state.store.lock();
    caller.require_admin(&store)?;

    let number = request
        .phone_number
        .as_deref()
        .filter(|raw| clean_dial_number(raw).is_some())
        .map(normalize_us_number)
        .ok_or_else(|| ApiError::InvalidArgument("phoneNumber is required".to_string()))?;

    let settings = store.set_forwarding_number(&number, &caller.user_id, Utc::now())?;
    log::info!("Forwarding number set to {} by {}", number, caller.user_id);
    Ok(Json(settings))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RecordingsQuery {
    pub lead_id: Option<String>,
}

pub async fn get_call_recordings(
    State(state): State<AppState>,
    _caller: Caller,
    Query(query): Query<RecordingsQuery>,
) -> Result<Json<Vec<CallRecording>>, ApiError> {
    let lead_id = query
        .lead_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::InvalidArgument("leadId is required".to_string()))?;

    Ok(Json(state.store.lock().recordings_for_lead(&lead_id)?))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LeadListQuery {
    pub include_inactive: bool,
}

pub async fn list_leads(
    State(state): State<AppState>,
    _caller: Caller,
    Query(query): Query<LeadListQuery>,
) -> Result<Json<Vec<Lead>>, ApiError> {
    Ok(Json(state.store.lock().list_leads(query.include_inactive)?))
}

pub async fn create_lead(
    State(state): State<AppState>,
    caller: Caller,
    Json(new): Json<NewLead>,
) -> Result<Json<Lead>, ApiError> {
    if new.company_name.trim().is_empty() {
        return Err(ApiError::InvalidArgument("companyName is required".to_string()));
    }
    let lead = state.store.lock().create_lead(&new, Utc::now())?;
    log::info!("Lead {} created by {}", lead.id, caller.user_id);
    Ok(Json(lead))
}

pub async fn get_lead(
    State(state): State<AppState>,
    _caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Lead>, ApiError> {
    state
        .store
        .lock()
        .get_lead(&id)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("lead {}", id)))
}

pub async fn list_activities(
    State(state): State<AppState>,
    _caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Vec<Activity>>, ApiError> {
    let store = state.store.lock();
    if store.get_lead(&id)?.is_none() {
        return Err(ApiError::NotFound(format!("lead {}", id)));
    }
    Ok(Json(store.list_activities(&id)?))
}

pub async fn record_outcome(
    State(state): State<AppState>,
    caller: Caller,
    Json(input): Json<OutcomeInput>,
) -> Result<Json<OutcomeResult>, ApiError> {
    let mut store = state.store.lock();
    let result = classifier::record_outcome(&mut store, &input, &caller.user_id, Utc::now())?;
    Ok(Json(result))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageRequest {
    pub stage: Stage,
    #[serde(default)]
    pub expected_version: Option<i64>,
}

pub async fn set_stage(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
    Json(request): Json<StageRequest>,
) -> Result<Json<Lead>, ApiError> {
    let mut store = state.store.lock();
    let lead = classifier::set_stage(
        &mut store,
        &id,
        request.stage,
        request.expected_version,
        &caller.user_id,
        Utc::now(),
    )?;
    Ok(Json(lead))
}

/// Admin only.
pub async fn deactivate_lead(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<String>,
) -> Result<Json<Lead>, ApiError> {
    let mut store = state.store.lock();
    caller.require_admin(&store)?;
    let lead = classifier::deactivate_lead(&mut store, &id, &caller.user_id, Utc::now())?;
    log::info!("Lead {} deactivated by {}", id, caller.user_id);
    Ok(Json(lead))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomesQuery {
    pub interaction_type: InteractionType,
}

pub async fn list_outcomes(
    _caller: Caller,
    Query(query): Query<OutcomesQuery>,
) -> Json<Vec<&'static OutcomeSpec>> {
    Json(outcomes_for(query.interaction_type))
}
