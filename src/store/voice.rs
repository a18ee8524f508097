//! Telephony collections: active browser clients, the call event log,
//! recordings and the shared forwarding setting.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{opt_ts_col, ts, ts_col, Store};

const TWILIO_SETTINGS_KEY: &str = "twilio";

/// One entry of the append-only call log. The variant name is the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    TokenIssued {
        identity: String,
        user_id: String,
    },
    OutboundCall {
        to: Option<String>,
        lead_id: Option<String>,
    },
    InboundCall {
        from: Option<String>,
        clients: Vec<String>,
        forward_to: Option<String>,
        degraded: bool,
    },
    ForwardDecision {
        from: Option<String>,
        to: Option<String>,
        dial_status: Option<String>,
        reason: String,
    },
    CallStatus {
        status: Option<String>,
        duration: Option<u32>,
        from: Option<String>,
        to: Option<String>,
    },
    Recording {
        recording_sid: Option<String>,
        recording_url: Option<String>,
        status: Option<String>,
        duration: Option<u32>,
    },
    RoutingError {
        endpoint: String,
        message: String,
    },
}

impl CallEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CallEvent::TokenIssued { .. } => "token_issued",
            CallEvent::OutboundCall { .. } => "outbound_call",
            CallEvent::InboundCall { .. } => "inbound_call",
            CallEvent::ForwardDecision { .. } => "forward_decision",
            CallEvent::CallStatus { .. } => "call_status",
            CallEvent::Recording { .. } => "recording",
            CallEvent::RoutingError { .. } => "routing_error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallLogRecord {
    pub id: i64,
    pub call_sid: Option<String>,
    pub event: CallEvent,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecording {
    pub recording_id: String,
    pub recording_url: String,
    pub duration: Option<u32>,
    pub call_sid: String,
    pub lead_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardingSettings {
    pub forwarding_number: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TwilioSettingsDoc {
    forwarding_number: Option<String>,
}

impl Store {
    /// Create or refresh the presence record for a browser identity.
    pub fn register_active_client(
        &self,
        identity: &str,
        user_id: &str,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> rusqlite::Result<DateTime<Utc>> {
        let expires_at = now + ttl;
        self.conn_ref().execute(
            "INSERT INTO twilio_active_clients (identity, user_id, registered_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(identity) DO UPDATE SET
                user_id = excluded.user_id,
                registered_at = excluded.registered_at,
                expires_at = excluded.expires_at",
            params![identity, user_id, ts(&now), ts(&expires_at)],
        )?;
        Ok(expires_at)
    }

    /// Identities whose registration has not expired at `now`. Expired rows are
    /// never cleaned up; this filter is the only expiry enforcement.
    pub fn active_client_identities(&self, now: DateTime<Utc>) -> rusqlite::Result<Vec<String>> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT identity FROM twilio_active_clients WHERE expires_at > ?1 ORDER BY registered_at",
        )?;
        let identities = stmt
            .query_map(params![ts(&now)], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(identities)
    }

    pub fn append_call_log(
        &self,
        call_sid: Option<&str>,
        event: &CallEvent,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<i64> {
        let payload = serde_json::to_string(event)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;
        self.conn_ref().execute(
            "INSERT INTO twilio_logs (type, call_sid, payload, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![event.kind(), call_sid, payload, ts(&now)],
        )?;
        Ok(self.conn_ref().last_insert_rowid())
    }

    /// Most recent first.
    pub fn recent_call_logs(&self, limit: usize) -> rusqlite::Result<Vec<CallLogRecord>> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT id, call_sid, payload, created_at FROM twilio_logs ORDER BY id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit as i64], |row| {
                let payload: String = row.get(2)?;
                let event = serde_json::from_str(&payload).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
                })?;
                Ok(CallLogRecord {
                    id: row.get(0)?,
                    call_sid: row.get(1)?,
                    event,
                    created_at: ts_col(row, 3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Lead the browser attached when it placed the outbound call, if any.
    pub fn lead_for_call(&self, call_sid: &str) -> rusqlite::Result<Option<String>> {
        let payload: Option<String> = self
            .conn_ref()
            .query_row(
                "SELECT payload FROM twilio_logs
                  WHERE call_sid = ?1 AND type = 'outbound_call'
                  ORDER BY id DESC LIMIT 1",
                params![call_sid],
                |row| row.get(0),
            )
            .optional()?;

        Ok(payload
            .and_then(|p| serde_json::from_str::<CallEvent>(&p).ok())
            .and_then(|event| match event {
                CallEvent::OutboundCall { lead_id, .. } => lead_id,
                _ => None,
            }))
    }

    pub fn save_recording(&self, recording: &CallRecording) -> rusqlite::Result<()> {
        self.conn_ref().execute(
            "INSERT OR REPLACE INTO call_recordings
                (recording_id, recording_url, duration, call_sid, lead_id, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                recording.recording_id,
                recording.recording_url,
                recording.duration,
                recording.call_sid,
                recording.lead_id,
                ts(&recording.timestamp),
            ],
        )?;
        Ok(())
    }

    /// Newest first.
    pub fn recordings_for_lead(&self, lead_id: &str) -> rusqlite::Result<Vec<CallRecording>> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT recording_id, recording_url, duration, call_sid, lead_id, timestamp
               FROM call_recordings WHERE lead_id = ?1 ORDER BY timestamp DESC",
        )?;
        let recordings = stmt
            .query_map(params![lead_id], |row| {
                Ok(CallRecording {
                    recording_id: row.get(0)?,
                    recording_url: row.get(1)?,
                    duration: row.get(2)?,
                    call_sid: row.get(3)?,
                    lead_id: row.get(4)?,
                    timestamp: ts_col(row, 5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(recordings)
    }

    pub fn forwarding_settings(&self) -> rusqlite::Result<ForwardingSettings> {
        let row = self
            .conn_ref()
            .query_row(
                "SELECT value, updated_at, updated_by FROM settings WHERE key = ?1",
                params![TWILIO_SETTINGS_KEY],
                |row| {
                    let value: String = row.get(0)?;
                    Ok((value, opt_ts_col(row, 1)?, row.get::<_, Option<String>>(2)?))
                },
            )
            .optional()?;

        Ok(match row {
            Some((value, updated_at, updated_by)) => {
                let doc: Option<TwilioSettingsDoc> = serde_json::from_str(&value).ok();
                ForwardingSettings {
                    forwarding_number: doc.and_then(|d| d.forwarding_number),
                    updated_at,
                    updated_by,
                }
            }
            None => ForwardingSettings {
                forwarding_number: None,
                updated_at: None,
                updated_by: None,
            },
        })
    }

    pub fn set_forwarding_number(
        &self,
        number: &str,
        updated_by: &str,
        now: DateTime<Utc>,
    ) -> rusqlite::Result<ForwardingSettings> {
        let value = serde_json::to_string(&TwilioSettingsDoc {
            forwarding_number: Some(number.to_string()),
        })
        .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        self.conn_ref().execute(
            "INSERT INTO settings (key, value, updated_at, updated_by) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at,
                updated_by = excluded.updated_by",
            params![TWILIO_SETTINGS_KEY, value, ts(&now), updated_by],
        )?;

        Ok(ForwardingSettings {
            forwarding_number: Some(number.to_string()),
            updated_at: Some(now),
            updated_by: Some(updated_by.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_registrations_are_filtered_out() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        store
            .register_active_client("owner_1", "owner-1", now - Duration::hours(2), Duration::hours(1))
            .unwrap();
        store
            .register_active_client("dispatch_2", "dispatch-2", now, Duration::hours(1))
            .unwrap();

        assert_eq!(store.active_client_identities(now).unwrap(), vec!["dispatch_2"]);
    }

    #[test]
    fn re_registering_refreshes_expiry() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        store
            .register_active_client("owner_1", "owner-1", now - Duration::hours(2), Duration::hours(1))
            .unwrap();
        store
            .register_active_client("owner_1", "owner-1", now, Duration::hours(1))
            .unwrap();

        assert_eq!(store.active_client_identities(now).unwrap(), vec!["owner_1"]);
    }

    #[test]
    fn outbound_log_links_recordings_to_lead() {
        let store = Store::open_in_memory().unwrap();
        let now = Utc::now();

        store
            .append_call_log(
                Some("CA100"),
                &CallEvent::OutboundCall {
                    to: Some("+12065551234".into()),
                    lead_id: Some("lead-9".into()),
                },
                now,
            )
            .unwrap();

        assert_eq!(store.lead_for_call("CA100").unwrap().as_deref(), Some("lead-9"));
        assert_eq!(store.lead_for_call("CA999").unwrap(), None);

        let logs = store.recent_call_logs(10).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].event.kind(), "outbound_call");
    }

    #[test]
    fn forwarding_number_defaults_to_none_then_persists() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.forwarding_settings().unwrap().forwarding_number, None);

        store
            .set_forwarding_number("+12065550199", "owner-1", Utc::now())
            .unwrap();
        let settings = store.forwarding_settings().unwrap();
        assert_eq!(settings.forwarding_number.as_deref(), Some("+12065550199"));
        assert_eq!(settings.updated_by.as_deref(), Some("owner-1"));
    }
}
