//! Voice access tokens: an HS256 JWT signed with the Twilio API key secret,
//! granting one client identity incoming calls and outgoing calls through the
//! TwiML application.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

use super::phone::sanitize_identity;
use super::AppState;
use crate::config::TwilioCredentials;
use crate::error::ApiError;
use crate::store::voice::CallEvent;

type HmacSha256 = Hmac<Sha256>;

/// Token handed to the browser voice device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub token: String,
    pub identity: String,
    pub expires_at: DateTime<Utc>,
}

fn encode_segment(value: &serde_json::Value) -> Result<String, ApiError> {
    Ok(URL_SAFE_NO_PAD.encode(serde_json::to_vec(value)?))
}

pub fn mint_voice_token(
    creds: &TwilioCredentials<'_>,
    identity: &str,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<String, ApiError> {
    let header = json!({
        "alg": "HS256",
        "typ": "JWT",
        "cty": "twilio-fpa;v=1",
    });
    let claims = json!({
        "jti": format!("{}-{}", creds.api_key, issued_at.timestamp()),
        "iss": creds.api_key,
        "sub": creds.account_sid,
        "iat": issued_at.timestamp(),
        "nbf": issued_at.timestamp(),
        "exp": expires_at.timestamp(),
        "grants": {
            "identity": identity,
            "voice": {
                "incoming": { "allow": true },
                "outgoing": { "application_sid": creds.twiml_app_sid },
            },
        },
    });

    let signing_input = format!("{}.{}", encode_segment(&header)?, encode_segment(&claims)?);
    let mut mac = HmacSha256::new_from_slice(creds.api_secret.as_bytes())
        .map_err(|e| ApiError::Internal(format!("token signing key: {}", e)))?;
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature))
}

/// Register the caller as an active client, then mint their token. The
/// registration lands first so an inbound call can never miss a browser that
/// already holds a valid token.
pub fn issue_credential(
    state: &AppState,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Credential, ApiError> {
    let creds = state.config.twilio.credentials()?;
    let identity = sanitize_identity(user_id);
    if identity.is_empty() {
        return Err(ApiError::InvalidArgument("user id is empty".to_string()));
    }

    let expires_at = {
        let store = state.store.lock();
        let expires_at = store.register_active_client(
            &identity,
            user_id,
            now,
            Duration::seconds(state.config.token_ttl_secs),
        )?;
        let event = CallEvent::TokenIssued {
            identity: identity.clone(),
            user_id: user_id.to_string(),
        };
        if let Err(e) = store.append_call_log(None, &event, now) {
            log::warn!("Failed to log token issuance for {}: {}", identity, e);
        }
        expires_at
    };

    let token = mint_voice_token(&creds, &identity, now, expires_at)?;
    log::info!("Issued voice token for {} (expires {})", identity, expires_at);

    Ok(Credential {
        token,
        identity,
        expires_at,
    })
}
