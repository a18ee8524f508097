//! Thin async client for the RPC surface, used by the browser session to
//! fetch voice tokens and by tooling that drives the backend.

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::error::ErrorBody;
use crate::pipeline::classifier::{OutcomeInput, OutcomeResult};
use crate::signaling::auth::USER_ID_HEADER;
use crate::signaling::rpc::ForwardingRequest;
use crate::signaling::token::Credential;
use crate::store::voice::{CallRecording, ForwardingSettings};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{code} ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}

#[derive(Debug, Clone)]
pub struct SignalingClient {
    http: Client,
    base_url: String,
    user_id: String,
}

impl SignalingClient {
    pub fn new(base_url: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = request.header(USER_ID_HEADER, &self.user_id).send().await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let body: ErrorBody = serde_json::from_str(&text).unwrap_or(ErrorBody {
                code: "unknown".to_string(),
                message: text,
            });
            return Err(ClientError::Api {
                status: status.as_u16(),
                code: body.code,
                message: body.message,
            });
        }

        Ok(response.json().await?)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        self.send(self.http.get(self.url(path))).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T, ClientError> {
        self.send(self.http.post(self.url(path)).json(body)).await
    }

    /// Voice token for the signed-in user; also registers them for inbound ringing.
    pub async fn fetch_token(&self) -> Result<Credential, ClientError> {
        self.send(self.http.post(self.url("/rpc/token"))).await
    }

    pub async fn forwarding_settings(&self) -> Result<ForwardingSettings, ClientError> {
        self.get("/rpc/forwarding").await
    }

    pub async fn set_forwarding_number(&self, phone_number: &str) -> Result<ForwardingSettings, ClientError> {
        let request = ForwardingRequest {
            phone_number: Some(phone_number.to_string()),
        };
        self.post("/rpc/forwarding", &request).await
    }

    pub async fn call_recordings(&self, lead_id: &str) -> Result<Vec<CallRecording>, ClientError> {
        let request = self
            .http
            .get(self.url("/rpc/recordings"))
            .query(&[("leadId", lead_id)]);
        self.send(request).await
    }

    pub async fn record_outcome(&self, input: &OutcomeInput) -> Result<OutcomeResult, ClientError> {
        self.post("/rpc/outcomes", input).await
    }
}
