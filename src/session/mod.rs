//! Browser-side telephony: one current call per session, driven by UI
//! commands and voice SDK events.

pub mod device;
pub mod manager;

pub use device::{DeviceEvent, Ringtone, VoiceDevice, VoiceError};
pub use manager::{CallDirection, CallError, CallSession, CallState, CallSummary, SessionHandle};
