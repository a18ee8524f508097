use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ApiError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_path: PathBuf,
    /// Externally reachable base URL, used for webhook action/callback URLs.
    pub public_base_url: String,
    pub token_ttl_secs: i64,
    pub inbound_ring_timeout_secs: u32,
    /// Browser identity dialed when no client is registered.
    pub fallback_client_identity: String,
    pub hold_message: String,
    pub twilio: TwilioConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub api_key: String,
    pub api_secret: String,
    pub twiml_app_sid: String,
    pub caller_id: String,
}

/// Borrowed view of a fully configured Twilio account.
#[derive(Debug, Clone, Copy)]
pub struct TwilioCredentials<'a> {
    pub account_sid: &'a str,
    pub api_key: &'a str,
    pub api_secret: &'a str,
    pub twiml_app_sid: &'a str,
    pub caller_id: &'a str,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            database_path: default_data_dir().join("detail-crm.db"),
            public_base_url: "http://localhost:8787".to_string(),
            token_ttl_secs: 3600,
            inbound_ring_timeout_secs: 20,
            fallback_client_identity: "admin".to_string(),
            hold_message: "Please hold while we connect your call.".to_string(),
            twilio: TwilioConfig::default(),
        }
    }
}

pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("detail-crm")
}

impl AppConfig {
    pub fn load(app_data: &Path) -> Self {
        let config_path = app_data.join("config.json");
        let mut config = if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                    log::warn!("Ignoring unreadable {}: {}", config_path.display(), e);
                    Self::default()
                }),
                Err(_) => Self::default(),
            }
        } else {
            let c = Self::default();
            c.save(app_data);
            c
        };

        config.apply_env(|key| std::env::var(key).ok());
        config
    }

    pub fn save(&self, app_data: &Path) {
        if std::fs::create_dir_all(app_data).is_err() {
            return;
        }
        let config_path = app_data.join("config.json");
        if let Ok(content) = serde_json::to_string_pretty(self) {
            std::fs::write(config_path, content).ok();
        }
    }

    /// Secrets come from the environment rather than the config file when set.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("TWILIO_ACCOUNT_SID") {
            self.twilio.account_sid = v;
        }
        if let Some(v) = get("TWILIO_API_KEY") {
            self.twilio.api_key = v;
        }
        if let Some(v) = get("TWILIO_API_SECRET") {
            self.twilio.api_secret = v;
        }
        if let Some(v) = get("TWILIO_TWIML_APP_SID") {
            self.twilio.twiml_app_sid = v;
        }
        if let Some(v) = get("TWILIO_CALLER_ID") {
            self.twilio.caller_id = v;
        }
        if let Some(v) = get("PUBLIC_BASE_URL") {
            self.public_base_url = v;
        }
        if let Some(v) = get("DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(port) = get("PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
    }

    pub fn webhook_url(&self, path: &str) -> String {
        format!("{}{}", self.public_base_url.trim_end_matches('/'), path)
    }
}

impl TwilioConfig {
    /// All five settings, or a precondition error naming every one that is missing.
    pub fn credentials(&self) -> Result<TwilioCredentials<'_>, ApiError> {
        let fields = [
            ("account_sid", &self.account_sid),
            ("api_key", &self.api_key),
            ("api_secret", &self.api_secret),
            ("twiml_app_sid", &self.twiml_app_sid),
            ("caller_id", &self.caller_id),
        ];

        let missing: Vec<&str> = fields
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(ApiError::FailedPrecondition(format!(
                "Twilio is not configured: missing {}",
                missing.join(", ")
            )));
        }

        Ok(TwilioCredentials {
            account_sid: &self.account_sid,
            api_key: &self.api_key,
            api_secret: &self.api_secret,
            twiml_app_sid: &self.twiml_app_sid,
            caller_id: &self.caller_id,
        })
    }
}
