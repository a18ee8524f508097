//! Provider-facing webhooks. Every handler answers 200 with TwiML, no matter
//! what: a failed lookup degrades the call instead of failing the request.

use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Form, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Deserialize;

use super::phone::clean_dial_number;
use super::routing;
use super::twiml::{VoiceResponse, HANGUP_ONLY};
use super::AppState;
use crate::store::voice::{CallEvent, CallRecording};

/// The subset of provider callback fields the routes read.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TwilioParams {
    pub call_sid: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    /// Custom parameter the browser attaches to outbound calls.
    pub lead_id: Option<String>,
    pub call_status: Option<String>,
    pub call_duration: Option<String>,
    pub dial_call_status: Option<String>,
    pub recording_sid: Option<String>,
    pub recording_url: Option<String>,
    pub recording_status: Option<String>,
    pub recording_duration: Option<String>,
}

impl TwilioParams {
    fn merge(form: Result<Form<Self>, FormRejection>, query: Result<Query<Self>, QueryRejection>) -> Self {
        let form = form.map(|Form(p)| p).unwrap_or_default();
        let query = query.map(|Query(p)| p).unwrap_or_default();
        Self {
            call_sid: form.call_sid.or(query.call_sid),
            from: form.from.or(query.from),
            to: form.to.or(query.to),
            lead_id: form.lead_id.or(query.lead_id),
            call_status: form.call_status.or(query.call_status),
            call_duration: form.call_duration.or(query.call_duration),
            dial_call_status: form.dial_call_status.or(query.dial_call_status),
            recording_sid: form.recording_sid.or(query.recording_sid),
            recording_url: form.recording_url.or(query.recording_url),
            recording_status: form.recording_status.or(query.recording_status),
            recording_duration: form.recording_duration.or(query.recording_duration),
        }
    }
}

/// Routing context the inbound handler put on the fallback action URL.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FallbackQuery {
    pub forward_to: Option<String>,
    pub from: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn seconds(value: Option<&str>) -> Option<u32> {
    value.and_then(|v| v.trim().parse().ok())
}

fn xml(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/xml")], body).into_response()
}

/// Best-effort write to the call log.
fn record(state: &AppState, call_sid: Option<&str>, event: CallEvent) {
    if let Err(e) = state.store.lock().append_call_log(call_sid, &event, Utc::now()) {
        log::error!("Failed to write {} call log: {}", event.kind(), e);
    }
}

fn render(state: &AppState, endpoint: &str, call_sid: Option<&str>, response: VoiceResponse) -> Response {
    match response.to_xml() {
        Ok(body) => xml(body),
        Err(e) => {
            log::error!("{} webhook could not render TwiML: {}", endpoint, e);
            record(
                state,
                call_sid,
                CallEvent::RoutingError {
                    endpoint: endpoint.to_string(),
                    message: e.to_string(),
                },
            );
            xml(HANGUP_ONLY.to_string())
        }
    }
}

/// Browser-originated call: dial the cleaned number from our caller id.
pub async fn outbound_call(
    State(state): State<AppState>,
    query: Result<Query<TwilioParams>, QueryRejection>,
    form: Result<Form<TwilioParams>, FormRejection>,
) -> Response {
    let params = TwilioParams::merge(form, query);
    let to = params.to.as_deref().and_then(clean_dial_number);
    let lead_id = non_empty(params.lead_id);

    log::info!(
        "Outbound call {} to {}",
        params.call_sid.as_deref().unwrap_or("-"),
        to.as_deref().unwrap_or("<none>")
    );
    record(
        &state,
        params.call_sid.as_deref(),
        CallEvent::OutboundCall {
            to: to.clone(),
            lead_id,
        },
    );

    let response = routing::route_outbound(to.as_deref(), &state.config);
    render(&state, "outbound", params.call_sid.as_deref(), response)
}

/// PSTN call to the business number: ring all live browsers.
pub async fn inbound_call(
    State(state): State<AppState>,
    query: Result<Query<TwilioParams>, QueryRejection>,
    form: Result<Form<TwilioParams>, FormRejection>,
) -> Response {
    let params = TwilioParams::merge(form, query);
    let from = non_empty(params.from);
    let now = Utc::now();

    let (clients, forward_to) = {
        let store = state.store.lock();
        let clients = store.active_client_identities(now).unwrap_or_else(|e| {
            log::error!("Active client lookup failed: {}", e);
            Vec::new()
        });
        let forward_to = match store.forwarding_settings() {
            Ok(settings) => settings.forwarding_number,
            Err(e) => {
                log::error!("Forwarding settings lookup failed: {}", e);
                None
            }
        };
        (clients, forward_to)
    };

    let plan = routing::route_inbound(from.as_deref(), &clients, forward_to.as_deref(), &state.config);
    log::info!(
        "Inbound call {} from {} ringing {} client(s)",
        params.call_sid.as_deref().unwrap_or("-"),
        from.as_deref().unwrap_or("<unknown>"),
        plan.clients.len()
    );
    record(
        &state,
        params.call_sid.as_deref(),
        CallEvent::InboundCall {
            from,
            clients: plan.clients.clone(),
            forward_to,
            degraded: plan.degraded,
        },
    );

    render(&state, "inbound", params.call_sid.as_deref(), plan.response)
}

/// Action callback after the browser ring ends.
pub async fn inbound_fallback(
    State(state): State<AppState>,
    fallback: Result<Query<FallbackQuery>, QueryRejection>,
    form: Result<Form<TwilioParams>, FormRejection>,
) -> Response {
    let params = form.map(|Form(p)| p).unwrap_or_default();
    let fallback = fallback.map(|Query(q)| q).unwrap_or_default();
    let forward_to = non_empty(fallback.forward_to);
    let from = non_empty(fallback.from).or(non_empty(params.from));

    let plan = routing::route_fallback(
        params.dial_call_status.as_deref(),
        forward_to.as_deref(),
        &state.config,
    );
    log::info!(
        "Call {} ring ended ({}): {}",
        params.call_sid.as_deref().unwrap_or("-"),
        params.dial_call_status.as_deref().unwrap_or("unknown"),
        plan.reason
    );
    record(
        &state,
        params.call_sid.as_deref(),
        CallEvent::ForwardDecision {
            from,
            to: plan.forwarded_to.clone(),
            dial_status: params.dial_call_status.clone(),
            reason: plan.reason.to_string(),
        },
    );

    render(&state, "fallback", params.call_sid.as_deref(), plan.response)
}

pub async fn call_status(
    State(state): State<AppState>,
    query: Result<Query<TwilioParams>, QueryRejection>,
    form: Result<Form<TwilioParams>, FormRejection>,
) -> Response {
    let params = TwilioParams::merge(form, query);
    log::debug!(
        "Call {} status {}",
        params.call_sid.as_deref().unwrap_or("-"),
        params.call_status.as_deref().unwrap_or("unknown")
    );
    record(
        &state,
        params.call_sid.as_deref(),
        CallEvent::CallStatus {
            status: params.call_status.clone(),
            duration: seconds(params.call_duration.as_deref()),
            from: params.from.clone(),
            to: params.to.clone(),
        },
    );

    render(&state, "status", params.call_sid.as_deref(), VoiceResponse::new())
}

/// Completed recordings are stored against the lead the call was placed for.
pub async fn recording_status(
    State(state): State<AppState>,
    query: Result<Query<TwilioParams>, QueryRejection>,
    form: Result<Form<TwilioParams>, FormRejection>,
) -> Response {
    let params = TwilioParams::merge(form, query);
    let duration = seconds(params.recording_duration.as_deref());
    let completed = params
        .recording_status
        .as_deref()
        .map_or(true, |s| s == "completed");

    if let (true, Some(call_sid), Some(recording_sid), Some(recording_url)) = (
        completed,
        params.call_sid.as_deref(),
        params.recording_sid.as_deref(),
        params.recording_url.as_deref(),
    ) {
        let store = state.store.lock();
        let lead_id = store.lead_for_call(call_sid).unwrap_or_else(|e| {
            log::error!("Lead lookup for call {} failed: {}", call_sid, e);
            None
        });
        let recording = CallRecording {
            recording_id: recording_sid.to_string(),
            recording_url: recording_url.to_string(),
            duration,
            call_sid: call_sid.to_string(),
            lead_id,
            timestamp: Utc::now(),
        };
        match store.save_recording(&recording) {
            Ok(()) => log::info!(
                "Stored recording {} for call {} (lead {})",
                recording.recording_id,
                call_sid,
                recording.lead_id.as_deref().unwrap_or("none")
            ),
            Err(e) => log::error!("Failed to store recording {}: {}", recording_sid, e),
        }
    }

    record(
        &state,
        params.call_sid.as_deref(),
        CallEvent::Recording {
            recording_sid: params.recording_sid.clone(),
            recording_url: params.recording_url.clone(),
            status: params.recording_status.clone(),
            duration,
        },
    );

    render(&state, "recording", params.call_sid.as_deref(), VoiceResponse::new())
}
