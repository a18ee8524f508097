//! HTTP backend: provider webhooks that route calls, and the authenticated
//! RPCs the web app calls.

pub mod auth;
pub mod phone;
pub mod routing;
pub mod rpc;
pub mod token;
pub mod twiml;
pub mod webhooks;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use parking_lot::Mutex;

use crate::config::AppConfig;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<Mutex<Store>>,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        Self {
            config: Arc::new(config),
            store: Arc::new(Mutex::new(store)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/twilio/voice/outbound",
            get(webhooks::outbound_call).post(webhooks::outbound_call),
        )
        .route("/twilio/voice/inbound", post(webhooks::inbound_call))
        .route(routing::FALLBACK_PATH, post(webhooks::inbound_fallback))
        .route("/twilio/status", post(webhooks::call_status))
        .route(routing::RECORDING_PATH, post(webhooks::recording_status))
        .route("/rpc/token", post(rpc::get_token))
        .route(
            "/rpc/forwarding",
            get(rpc::get_forwarding_settings).post(rpc::set_forwarding_number),
        )
        .route("/rpc/recordings", get(rpc::get_call_recordings))
        .route("/rpc/outcomes", get(rpc::list_outcomes).post(rpc::record_outcome))
        .route("/rpc/leads", get(rpc::list_leads).post(rpc::create_lead))
        .route("/rpc/leads/:id", get(rpc::get_lead))
        .route("/rpc/leads/:id/activities", get(rpc::list_activities))
        .route("/rpc/leads/:id/stage", post(rpc::set_stage))
        .route("/rpc/leads/:id/deactivate", post(rpc::deactivate_lead))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
