//! Call routing decisions. Everything here is pure: the webhook handlers
//! gather state, call in, then log and render what comes back.

use url::form_urlencoded;

use super::twiml::{Dial, DialTarget, VoiceResponse};
use crate::config::AppConfig;

pub const FALLBACK_PATH: &str = "/twilio/voice/fallback";
pub const RECORDING_PATH: &str = "/twilio/recording";

const NO_DESTINATION: &str =
    "We could not place your call because no destination number was provided. Goodbye.";
const CALLING_NOT_CONFIGURED: &str = "Outbound calling is not configured. Goodbye.";
const UNAVAILABLE: &str = "We are unable to take your call right now. Please try again later.";

/// Dial statuses that mean somebody picked up, so nothing is left to do.
const ANSWERED: &[&str] = &["completed", "answered"];

pub fn route_outbound(to: Option<&str>, config: &AppConfig) -> VoiceResponse {
    let Some(to) = to.filter(|t| !t.is_empty()) else {
        return VoiceResponse::new().say(NO_DESTINATION).hangup();
    };

    let caller_id = config.twilio.caller_id.trim();
    if caller_id.is_empty() {
        log::warn!("Outbound call to {} refused: no caller id configured", to);
        return VoiceResponse::new().say(CALLING_NOT_CONFIGURED).hangup();
    }

    VoiceResponse::new().dial(Dial {
        caller_id: Some(caller_id.to_string()),
        recording_callback: Some(config.webhook_url(RECORDING_PATH)),
        targets: vec![DialTarget::Number(to.to_string())],
        ..Dial::default()
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundPlan {
    pub response: VoiceResponse,
    /// Identities actually rung.
    pub clients: Vec<String>,
    /// True when nobody was registered and the fallback identity was used.
    pub degraded: bool,
}

/// Ring every active browser at once; the first to answer wins. When the
/// dial ends unanswered the provider calls the fallback action, which carries
/// the forwarding number and original caller along.
pub fn route_inbound(
    from: Option<&str>,
    active_clients: &[String],
    forward_to: Option<&str>,
    config: &AppConfig,
) -> InboundPlan {
    let degraded = active_clients.is_empty();
    let clients = if degraded {
        log::warn!(
            "No active voice clients; ringing fallback identity {}",
            config.fallback_client_identity
        );
        vec![config.fallback_client_identity.clone()]
    } else {
        active_clients.to_vec()
    };

    let mut query = form_urlencoded::Serializer::new(String::new());
    if let Some(forward_to) = forward_to {
        query.append_pair("forwardTo", forward_to);
    }
    if let Some(from) = from {
        query.append_pair("from", from);
    }
    let query = query.finish();
    let action = if query.is_empty() {
        config.webhook_url(FALLBACK_PATH)
    } else {
        format!("{}?{}", config.webhook_url(FALLBACK_PATH), query)
    };

    let response = VoiceResponse::new().dial(Dial {
        caller_id: from.map(str::to_string),
        timeout: Some(config.inbound_ring_timeout_secs),
        action: Some(action),
        recording_callback: None,
        targets: clients.iter().cloned().map(DialTarget::Client).collect(),
    });

    InboundPlan {
        response,
        clients,
        degraded,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPlan {
    pub response: VoiceResponse,
    pub forwarded_to: Option<String>,
    pub reason: &'static str,
}

/// What to do once the browser ring has finished.
pub fn route_fallback(
    dial_status: Option<&str>,
    forward_to: Option<&str>,
    config: &AppConfig,
) -> ForwardPlan {
    if dial_status.is_some_and(|s| ANSWERED.contains(&s)) {
        return ForwardPlan {
            response: VoiceResponse::new().hangup(),
            forwarded_to: None,
            reason: "answered",
        };
    }

    match forward_to.map(str::trim).filter(|f| !f.is_empty()) {
        Some(number) => {
            let caller_id = config.twilio.caller_id.trim();
            let dial = Dial {
                caller_id: (!caller_id.is_empty()).then(|| caller_id.to_string()),
                targets: vec![DialTarget::Number(number.to_string())],
                ..Dial::default()
            };
            ForwardPlan {
                response: VoiceResponse::new().say(config.hold_message.as_str()).dial(dial),
                forwarded_to: Some(number.to_string()),
                reason: "unanswered_forwarded",
            }
        }
        None => ForwardPlan {
            response: VoiceResponse::new().say(UNAVAILABLE).hangup(),
            forwarded_to: None,
            reason: "unanswered_no_forwarding",
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::twiml::Verb;

    fn config() -> AppConfig {
        let mut config = AppConfig {
            public_base_url: "https://crm.example/".into(),
            ..AppConfig::default()
        };
        config.twilio.caller_id = "+12065550000".into();
        config
    }

    fn only_dial(response: &VoiceResponse) -> &Dial {
        match response.verbs() {
            [Verb::Dial(dial)] => dial,
            other => panic!("expected a single dial, got {:?}", other),
        }
    }

    #[test]
    fn outbound_dials_with_recording() {
        let response = route_outbound(Some("+12065551234"), &config());
        let dial = only_dial(&response);

        assert_eq!(dial.caller_id.as_deref(), Some("+12065550000"));
        assert_eq!(
            dial.recording_callback.as_deref(),
            Some("https://crm.example/twilio/recording")
        );
        assert_eq!(dial.targets, vec![DialTarget::Number("+12065551234".into())]);
    }

    #[test]
    fn outbound_without_destination_hangs_up() {
        for to in [None, Some("")] {
            let response = route_outbound(to, &config());
            assert!(matches!(response.verbs(), [Verb::Say(_), Verb::Hangup]));
        }
    }

    #[test]
    fn outbound_without_caller_id_hangs_up() {
        let response = route_outbound(Some("+12065551234"), &AppConfig::default());
        assert!(matches!(response.verbs(), [Verb::Say(_), Verb::Hangup]));
    }

    #[test]
    fn inbound_rings_every_active_client() {
        let clients = vec!["owner_1".to_string(), "dispatch_2".to_string()];
        let plan = route_inbound(Some("+15035550111"), &clients, Some("+12065550199"), &config());

        assert!(!plan.degraded);
        assert_eq!(plan.clients, clients);

        let dial = only_dial(&plan.response);
        assert_eq!(dial.timeout, Some(20));
        assert_eq!(
            dial.action.as_deref(),
            Some("https://crm.example/twilio/voice/fallback?forwardTo=%2B12065550199&from=%2B15035550111")
        );
        assert_eq!(
            dial.targets,
            vec![
                DialTarget::Client("owner_1".into()),
                DialTarget::Client("dispatch_2".into())
            ]
        );
    }

    #[test]
    fn inbound_with_nobody_online_rings_fallback_identity() {
        let plan = route_inbound(None, &[], None, &config());

        assert!(plan.degraded);
        assert_eq!(plan.clients, vec!["admin".to_string()]);
        let dial = only_dial(&plan.response);
        assert_eq!(dial.action.as_deref(), Some("https://crm.example/twilio/voice/fallback"));
    }

    #[test]
    fn answered_calls_just_end() {
        for status in ["completed", "answered"] {
            let plan = route_fallback(Some(status), Some("+12065550199"), &config());
            assert_eq!(plan.response.verbs(), &[Verb::Hangup]);
            assert_eq!(plan.forwarded_to, None);
        }
    }

    #[test]
    fn unanswered_calls_forward_with_hold_message() {
        for status in [Some("no-answer"), Some("busy"), Some("failed"), None] {
            let plan = route_fallback(status, Some("+12065550199"), &config());
            assert_eq!(plan.forwarded_to.as_deref(), Some("+12065550199"));

            match plan.response.verbs() {
                [Verb::Say(message), Verb::Dial(dial)] => {
                    assert_eq!(message, "Please hold while we connect your call.");
                    assert_eq!(dial.caller_id.as_deref(), Some("+12065550000"));
                    assert_eq!(dial.targets, vec![DialTarget::Number("+12065550199".into())]);
                }
                other => panic!("unexpected verbs {:?}", other),
            }
        }
    }

    #[test]
    fn unanswered_without_forwarding_hangs_up() {
        for forward in [None, Some(""), Some("  ")] {
            let plan = route_fallback(Some("no-answer"), forward, &config());
            assert_eq!(plan.reason, "unanswered_no_forwarding");
            assert!(matches!(plan.response.verbs(), [Verb::Say(_), Verb::Hangup]));
        }
    }
}
