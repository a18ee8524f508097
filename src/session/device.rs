//! Narrow seam over the browser voice SDK.
//!
//! The state machine only needs a handful of calls plus an event feed. A
//! concrete device pushes its SDK callbacks into the `DeviceEvent` channel it
//! was built with; the session never sees SDK objects directly.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("Voice device is not registered")]
    NotRegistered,

    #[error("Voice SDK error: {0}")]
    Sdk(String),
}

/// SDK callbacks, tagged with the provider call id they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// Outbound call answered.
    Accepted { call_sid: String },
    /// Far end gave up before the call was answered.
    Cancelled { call_sid: String },
    Disconnected { call_sid: String },
    /// `call_sid` is None for device-level failures (e.g. an expired token).
    Error {
        call_sid: Option<String>,
        message: String,
    },
    Incoming { call_sid: String, from: String },
}

#[async_trait]
pub trait VoiceDevice: Send + Sync {
    async fn register(&self, token: &str) -> Result<(), VoiceError>;

    async fn unregister(&self) -> Result<(), VoiceError>;

    /// Start an outbound call; returns the provider call id.
    async fn connect(&self, to: &str) -> Result<String, VoiceError>;

    async fn disconnect(&self, call_sid: &str) -> Result<(), VoiceError>;

    async fn accept(&self, call_sid: &str) -> Result<(), VoiceError>;

    async fn reject(&self, call_sid: &str) -> Result<(), VoiceError>;

    async fn mute(&self, call_sid: &str, muted: bool) -> Result<(), VoiceError>;

    async fn send_digits(&self, call_sid: &str, digits: &str) -> Result<(), VoiceError>;
}

/// Looping local ring played while an incoming call is waiting.
pub trait Ringtone: Send + Sync {
    fn start(&self);
    fn stop(&self);
}
