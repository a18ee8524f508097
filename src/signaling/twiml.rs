//! Minimal TwiML writer covering the verbs the webhooks emit.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;

use crate::error::ApiError;

/// Served when a response cannot be rendered at all.
pub const HANGUP_ONLY: &str =
    r#"<?xml version="1.0" encoding="UTF-8"?><Response><Hangup/></Response>"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialTarget {
    Number(String),
    Client(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dial {
    pub caller_id: Option<String>,
    pub timeout: Option<u32>,
    pub action: Option<String>,
    /// Dual-channel recording from answer, reported to this callback.
    pub recording_callback: Option<String>,
    pub targets: Vec<DialTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Say(String),
    Dial(Dial),
    Hangup,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VoiceResponse {
    verbs: Vec<Verb>,
}

fn xml_error(e: impl std::fmt::Display) -> ApiError {
    ApiError::Internal(format!("twiml: {}", e))
}

impl VoiceResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn say(mut self, text: impl Into<String>) -> Self {
        self.verbs.push(Verb::Say(text.into()));
        self
    }

    pub fn dial(mut self, dial: Dial) -> Self {
        self.verbs.push(Verb::Dial(dial));
        self
    }

    pub fn hangup(mut self) -> Self {
        self.verbs.push(Verb::Hangup);
        self
    }

    pub fn verbs(&self) -> &[Verb] {
        &self.verbs
    }

    pub fn to_xml(&self) -> Result<String, ApiError> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_error)?;
        writer
            .write_event(Event::Start(BytesStart::new("Response")))
            .map_err(xml_error)?;

        for verb in &self.verbs {
            match verb {
                Verb::Say(text) => write_text_element(&mut writer, "Say", text)?,
                Verb::Hangup => writer
                    .write_event(Event::Empty(BytesStart::new("Hangup")))
                    .map_err(xml_error)?,
                Verb::Dial(dial) => write_dial(&mut writer, dial)?,
            }
        }

        writer
            .write_event(Event::End(BytesEnd::new("Response")))
            .map_err(xml_error)?;
        String::from_utf8(writer.into_inner()).map_err(xml_error)
    }
}

fn write_text_element(writer: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<(), ApiError> {
    writer
        .write_event(Event::Start(BytesStart::new(name)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .map_err(xml_error)?;
    writer
        .write_event(Event::End(BytesEnd::new(name)))
        .map_err(xml_error)?;
    Ok(())
}

fn write_dial(writer: &mut Writer<Vec<u8>>, dial: &Dial) -> Result<(), ApiError> {
    let timeout = dial.timeout.map(|t| t.to_string());
    let mut start = BytesStart::new("Dial");
    if let Some(caller_id) = &dial.caller_id {
        start.push_attribute(("callerId", caller_id.as_str()));
    }
    if let Some(timeout) = &timeout {
        start.push_attribute(("timeout", timeout.as_str()));
    }
    if let Some(action) = &dial.action {
        start.push_attribute(("action", action.as_str()));
    }
    if let Some(callback) = &dial.recording_callback {
        start.push_attribute(("record", "record-from-answer-dual"));
        start.push_attribute(("recordingStatusCallback", callback.as_str()));
        start.push_attribute(("recordingStatusCallbackEvent", "completed"));
    }

    writer.write_event(Event::Start(start)).map_err(xml_error)?;
    for target in &dial.targets {
        match target {
            DialTarget::Number(number) => write_text_element(writer, "Number", number)?,
            DialTarget::Client(identity) => write_text_element(writer, "Client", identity)?,
        }
    }
    writer
        .write_event(Event::End(BytesEnd::new("Dial")))
        .map_err(xml_error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_is_valid_document() {
        let xml = VoiceResponse::new().to_xml().unwrap();
        assert_eq!(
            xml,
            r#"<?xml version="1.0" encoding="UTF-8"?><Response></Response>"#
        );
    }

    #[test]
    fn hangup_fallback_matches_builder_output() {
        assert_eq!(VoiceResponse::new().hangup().to_xml().unwrap(), HANGUP_ONLY);
    }

    #[test]
    fn say_text_is_escaped() {
        let xml = VoiceResponse::new()
            .say("Tom & Jerry <detail>")
            .hangup()
            .to_xml()
            .unwrap();
        assert!(xml.contains("<Say>Tom &amp; Jerry &lt;detail&gt;</Say><Hangup/>"));
    }

    #[test]
    fn dial_renders_attributes_and_targets() {
        let xml = VoiceResponse::new()
            .dial(Dial {
                caller_id: Some("+12065550000".into()),
                timeout: Some(20),
                action: Some("https://crm.example/fallback?forwardTo=%2B1&from=x".into()),
                recording_callback: None,
                targets: vec![
                    DialTarget::Client("owner_1".into()),
                    DialTarget::Client("dispatch_2".into()),
                ],
            })
            .to_xml()
            .unwrap();

        assert!(xml.contains(r#"callerId="+12065550000""#));
        assert!(xml.contains(r#"timeout="20""#));
        assert!(xml.contains("forwardTo=%2B1&amp;from=x"));
        assert!(xml.contains("<Client>owner_1</Client><Client>dispatch_2</Client></Dial>"));
        assert!(!xml.contains("record="));
    }

    #[test]
    fn recording_callback_turns_on_recording() {
        let xml = VoiceResponse::new()
            .dial(Dial {
                recording_callback: Some("https://crm.example/twilio/recording".into()),
                targets: vec![DialTarget::Number("+12065551234".into())],
                ..Dial::default()
            })
            .to_xml()
            .unwrap();

        assert!(xml.contains(r#"record="record-from-answer-dual""#));
        assert!(xml.contains(r#"recordingStatusCallback="https://crm.example/twilio/recording""#));
        assert!(xml.contains("<Number>+12065551234</Number>"));
    }
}
