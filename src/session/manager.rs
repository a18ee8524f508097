use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::WatchStream;

use super::device::{DeviceEvent, Ringtone, VoiceDevice, VoiceError};
use crate::signaling::phone::normalize_us_number;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    #[error("Calling is not available until you sign in")]
    NotSignedIn,

    #[error("A call is already in progress")]
    Busy,

    #[error("No destination number")]
    NoDestination,

    #[error("No active call")]
    NoActiveCall,

    #[error("No incoming call to answer")]
    NoIncomingCall,

    #[error("Could not get a calling credential: {0}")]
    Credential(String),

    #[error(transparent)]
    Device(#[from] VoiceError),

    #[error("Call session has shut down")]
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outbound,
    Inbound,
}

/// The one logical call this browser session can have.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CallState {
    Idle,
    Connecting {
        call_sid: String,
        to: String,
    },
    Connected {
        call_sid: String,
        /// Remote party: the dialed number, or the caller for inbound calls.
        to: String,
        since: DateTime<Utc>,
        muted: bool,
        direction: CallDirection,
    },
    IncomingRinging {
        call_sid: String,
        from: String,
    },
}

impl CallState {
    pub fn call_sid(&self) -> Option<&str> {
        match self {
            CallState::Idle => None,
            CallState::Connecting { call_sid, .. }
            | CallState::Connected { call_sid, .. }
            | CallState::IncomingRinging { call_sid, .. } => Some(call_sid),
        }
    }

    fn is_connected(&self) -> bool {
        matches!(self, CallState::Connected { .. })
    }

    fn is_ringing(&self) -> bool {
        matches!(self, CallState::IncomingRinging { .. })
    }
}

/// Handed to the outcome prompt when a connected call ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallSummary {
    pub call_sid: String,
    pub direction: CallDirection,
    pub number: String,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: CallState,
    pub duration_secs: u64,
    pub last_error: Option<String>,
    pub registered: bool,
}

pub struct CallSession<D, R> {
    device: D,
    ringtone: R,
    state: CallState,
    elapsed: Arc<AtomicU64>,
    ticker: Option<JoinHandle<()>>,
    last_error: Option<String>,
    last_call: Option<CallSummary>,
    registered: bool,
}

impl<D: VoiceDevice, R: Ringtone> CallSession<D, R> {
    pub fn new(device: D, ringtone: R) -> Self {
        Self {
            device,
            ringtone,
            state: CallState::Idle,
            elapsed: Arc::new(AtomicU64::new(0)),
            ticker: None,
            last_error: None,
            last_call: None,
            registered: false,
        }
    }

    pub fn state(&self) -> &CallState {
        &self.state
    }

    /// Seconds shown on the call clock; zero outside `Connected`.
    pub fn duration_secs(&self) -> u64 {
        self.elapsed.load(Ordering::SeqCst)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_call(&self) -> Option<&CallSummary> {
        self.last_call.as_ref()
    }

    pub fn is_registered(&self) -> bool {
        self.registered
    }

    pub fn is_timer_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state.clone(),
            duration_secs: self.duration_secs(),
            last_error: self.last_error.clone(),
            registered: self.registered,
        }
    }

    /// Single place where state changes. Starts and stops the ringtone and the
    /// call clock on the edges of `IncomingRinging` and `Connected`.
    fn transition(&mut self, next: CallState) -> Option<CallSummary> {
        let prev = std::mem::replace(&mut self.state, next);

        if prev.is_ringing() && !self.state.is_ringing() {
            self.ringtone.stop();
        }

        let mut summary = None;
        if let CallState::Connected {
            call_sid,
            to,
            direction,
            ..
        } = &prev
        {
            if !self.state.is_connected() {
                let duration_secs = self.stop_timer();
                let ended = CallSummary {
                    call_sid: call_sid.clone(),
                    direction: *direction,
                    number: to.clone(),
                    duration_secs,
                };
                self.last_call = Some(ended.clone());
                summary = Some(ended);
            }
        }

        if self.state.is_ringing() && !prev.is_ringing() {
            self.ringtone.start();
        }
        if self.state.is_connected() && !prev.is_connected() {
            self.start_timer();
        }

        log::debug!("Call state {:?} -> {:?}", prev, self.state);
        summary
    }

    fn start_timer(&mut self) {
        self.elapsed.store(0, Ordering::SeqCst);
        let elapsed = self.elapsed.clone();
        self.ticker = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            // First tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                elapsed.fetch_add(1, Ordering::SeqCst);
            }
        }));
    }

    fn stop_timer(&mut self) -> u64 {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.elapsed.swap(0, Ordering::SeqCst)
    }

    /// Records the error and ends the current call in the SDK as well, so the
    /// device never holds a call the session no longer tracks.
    async fn fail(&mut self, message: String) {
        log::warn!("Call error: {}", message);
        self.last_error = Some(message);

        match self.state.clone() {
            CallState::Connecting { call_sid, .. } | CallState::Connected { call_sid, .. } => {
                if let Err(e) = self.device.disconnect(&call_sid).await {
                    log::warn!("Disconnect after error failed: {}", e);
                }
            }
            CallState::IncomingRinging { call_sid, .. } => {
                if let Err(e) = self.device.reject(&call_sid).await {
                    log::warn!("Reject after error failed: {}", e);
                }
            }
            CallState::Idle => {}
        }
        self.transition(CallState::Idle);
    }

    pub fn clear_error(&mut self) {
        self.last_error = None;
    }

    pub async fn sign_in(&mut self, token: &str) -> Result<(), CallError> {
        self.device.register(token).await?;
        self.registered = true;
        log::info!("Voice device registered");
        Ok(())
    }

    /// Ends whatever call is in progress and drops the registration.
    pub async fn sign_out(&mut self) {
        match self.state.clone() {
            CallState::Connecting { call_sid, .. } | CallState::Connected { call_sid, .. } => {
                if let Err(e) = self.device.disconnect(&call_sid).await {
                    log::warn!("Disconnect during sign-out failed: {}", e);
                }
            }
            CallState::IncomingRinging { call_sid, .. } => {
                if let Err(e) = self.device.reject(&call_sid).await {
                    log::warn!("Reject during sign-out failed: {}", e);
                }
            }
            CallState::Idle => {}
        }
        self.transition(CallState::Idle);

        if self.registered {
            if let Err(e) = self.device.unregister().await {
                log::warn!("Unregister failed: {}", e);
            }
            self.registered = false;
            log::info!("Voice device unregistered");
        }
    }

    /// Returns the normalized number being dialed.
    pub async fn dial(&mut self, number: &str) -> Result<String, CallError> {
        if !self.registered {
            return Err(CallError::NotSignedIn);
        }
        if self.state != CallState::Idle {
            return Err(CallError::Busy);
        }
        let to = normalize_us_number(number);
        if to.is_empty() {
            return Err(CallError::NoDestination);
        }

        self.last_error = None;
        match self.device.connect(&to).await {
            Ok(call_sid) => {
                self.transition(CallState::Connecting {
                    call_sid,
                    to: to.clone(),
                });
                Ok(to)
            }
            Err(e) => {
                self.fail(e.to_string()).await;
                Err(e.into())
            }
        }
    }

    /// Local hang-up. Always lands in `Idle`, even if the SDK call fails.
    pub async fn hang_up(&mut self) -> Option<CallSummary> {
        match self.state.clone() {
            CallState::Connecting { call_sid, .. } | CallState::Connected { call_sid, .. } => {
                if let Err(e) = self.device.disconnect(&call_sid).await {
                    log::warn!("Disconnect failed: {}", e);
                }
                self.transition(CallState::Idle)
            }
            CallState::IncomingRinging { .. } => {
                let _ = self.reject().await;
                None
            }
            CallState::Idle => None,
        }
    }

    pub async fn accept(&mut self) -> Result<(), CallError> {
        let CallState::IncomingRinging { call_sid, from } = self.state.clone() else {
            return Err(CallError::NoIncomingCall);
        };

        match self.device.accept(&call_sid).await {
            Ok(()) => {
                self.transition(CallState::Connected {
                    call_sid,
                    to: from,
                    since: Utc::now(),
                    muted: false,
                    direction: CallDirection::Inbound,
                });
                Ok(())
            }
            Err(e) => {
                self.fail(e.to_string()).await;
                Err(e.into())
            }
        }
    }

    pub async fn reject(&mut self) -> Result<(), CallError> {
        let CallState::IncomingRinging { call_sid, .. } = self.state.clone() else {
            return Err(CallError::NoIncomingCall);
        };

        if let Err(e) = self.device.reject(&call_sid).await {
            log::warn!("Reject failed: {}", e);
        }
        self.transition(CallState::Idle);
        Ok(())
    }

    pub async fn toggle_mute(&mut self) -> Result<bool, CallError> {
        let CallState::Connected { muted, .. } = &self.state else {
            return Err(CallError::NoActiveCall);
        };
        let want = !*muted;
        self.set_muted(want).await
    }

    /// The local flag only changes after the SDK confirms.
    pub async fn set_muted(&mut self, want: bool) -> Result<bool, CallError> {
        let (call_sid, current) = match &self.state {
            CallState::Connected { call_sid, muted, .. } => (call_sid.clone(), *muted),
            _ => return Err(CallError::NoActiveCall),
        };
        if current == want {
            return Ok(current);
        }

        if let Err(e) = self.device.mute(&call_sid, want).await {
            log::warn!("Mute change failed: {}", e);
            self.last_error = Some(e.to_string());
            return Err(e.into());
        }

        if let CallState::Connected { muted, .. } = &mut self.state {
            *muted = want;
        }
        Ok(want)
    }

    /// No-op unless connected. Characters outside the keypad are dropped.
    pub async fn send_digits(&mut self, digits: &str) -> Result<(), CallError> {
        let CallState::Connected { call_sid, .. } = &self.state else {
            return Ok(());
        };
        let keys: String = digits
            .chars()
            .filter(|c| c.is_ascii_digit() || matches!(c, '*' | '#' | 'w'))
            .collect();
        if keys.is_empty() {
            return Ok(());
        }
        self.device.send_digits(call_sid, &keys).await?;
        Ok(())
    }

    fn is_current(&self, call_sid: &str) -> bool {
        self.state.call_sid() == Some(call_sid)
    }

    pub async fn handle_event(&mut self, event: DeviceEvent) {
        match event {
            DeviceEvent::Accepted { call_sid } => {
                if let CallState::Connecting { call_sid: current, to } = &self.state {
                    if *current == call_sid {
                        let to = to.clone();
                        self.transition(CallState::Connected {
                            call_sid,
                            to,
                            since: Utc::now(),
                            muted: false,
                            direction: CallDirection::Outbound,
                        });
                        return;
                    }
                }
                log::debug!("Ignoring accept for {}", call_sid);
            }
            DeviceEvent::Cancelled { call_sid } => {
                if !self.is_current(&call_sid) {
                    return;
                }
                if matches!(self.state, CallState::Connecting { .. }) {
                    self.fail("Call was cancelled".to_string()).await;
                } else if self.state.is_ringing() {
                    log::info!("Caller hung up before answer ({})", call_sid);
                    self.transition(CallState::Idle);
                }
            }
            DeviceEvent::Disconnected { call_sid } => {
                if self.is_current(&call_sid) {
                    self.transition(CallState::Idle);
                }
            }
            DeviceEvent::Error { call_sid, message } => match call_sid {
                Some(sid) if !self.is_current(&sid) => {
                    log::debug!("Ignoring error for stale call {}: {}", sid, message);
                }
                _ => self.fail(message).await,
            },
            DeviceEvent::Incoming { call_sid, from } => {
                if self.state == CallState::Idle {
                    log::info!("Incoming call from {}", from);
                    self.transition(CallState::IncomingRinging { call_sid, from });
                } else {
                    log::info!("Auto-rejecting incoming call from {} while busy", from);
                    if let Err(e) = self.device.reject(&call_sid).await {
                        log::warn!("Auto-reject failed: {}", e);
                    }
                }
            }
        }
    }
}

impl<D, R> Drop for CallSession<D, R> {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
    }
}

enum Command {
    SignIn {
        token: String,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    SignOut {
        reply: oneshot::Sender<()>,
    },
    Dial {
        number: String,
        reply: oneshot::Sender<Result<String, CallError>>,
    },
    HangUp {
        reply: oneshot::Sender<Option<CallSummary>>,
    },
    Accept {
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    Reject {
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    ToggleMute {
        reply: oneshot::Sender<Result<bool, CallError>>,
    },
    SendDigits {
        digits: String,
        reply: oneshot::Sender<Result<(), CallError>>,
    },
    ClearError,
}

/// Cloneable front for a `CallSession` running on its own task. UI commands
/// and SDK events are applied strictly one at a time in arrival order.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// The task runs until every handle is dropped, then signs out.
    pub fn spawn<D, R>(
        session: CallSession<D, R>,
        events: mpsc::UnboundedReceiver<DeviceEvent>,
    ) -> (Self, JoinHandle<()>)
    where
        D: VoiceDevice + 'static,
        R: Ringtone + 'static,
    {
        let (tx, rx) = mpsc::channel(32);
        let (publish, snapshot) = watch::channel(session.snapshot());
        let task = tokio::spawn(run(session, rx, events, publish));
        (
            Self {
                commands: tx,
                snapshot,
            },
            task,
        )
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CallError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| CallError::Closed)?;
        rx.await.map_err(|_| CallError::Closed)
    }

    pub async fn sign_in(&self, token: &str) -> Result<(), CallError> {
        let token = token.to_string();
        self.request(|reply| Command::SignIn { token, reply }).await?
    }

    /// Fetch a fresh credential from the signaling backend and register with it.
    pub async fn sign_in_with(
        &self,
        client: &crate::client::SignalingClient,
    ) -> Result<(), CallError> {
        let credential = client
            .fetch_token()
            .await
            .map_err(|e| CallError::Credential(e.to_string()))?;
        self.sign_in(&credential.token).await
    }

    pub async fn sign_out(&self) -> Result<(), CallError> {
        self.request(|reply| Command::SignOut { reply }).await
    }

    pub async fn dial(&self, number: &str) -> Result<String, CallError> {
        let number = number.to_string();
        self.request(|reply| Command::Dial { number, reply }).await?
    }

    pub async fn hang_up(&self) -> Result<Option<CallSummary>, CallError> {
        self.request(|reply| Command::HangUp { reply }).await
    }

    pub async fn accept(&self) -> Result<(), CallError> {
        self.request(|reply| Command::Accept { reply }).await?
    }

    pub async fn reject(&self) -> Result<(), CallError> {
        self.request(|reply| Command::Reject { reply }).await?
    }

    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        self.request(|reply| Command::ToggleMute { reply }).await?
    }

    pub async fn send_digits(&self, digits: &str) -> Result<(), CallError> {
        let digits = digits.to_string();
        self.request(|reply| Command::SendDigits { digits, reply })
            .await?
    }

    pub async fn clear_error(&self) -> Result<(), CallError> {
        self.commands
            .send(Command::ClearError)
            .await
            .map_err(|_| CallError::Closed)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Stream of snapshots, starting with the current one.
    pub fn watch(&self) -> WatchStream<SessionSnapshot> {
        WatchStream::new(self.snapshot.clone())
    }
}

/// Republishes the call clock while connected. It is idle between calls, so
/// missed ticks must not be replayed on the next connect.
fn refresh_interval() -> tokio::time::Interval {
    let mut refresh = tokio::time::interval(Duration::from_secs(1));
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    refresh
}

async fn run<D, R>(
    mut session: CallSession<D, R>,
    mut commands: mpsc::Receiver<Command>,
    mut events: mpsc::UnboundedReceiver<DeviceEvent>,
    publish: watch::Sender<SessionSnapshot>,
) where
    D: VoiceDevice,
    R: Ringtone,
{
    let mut refresh = refresh_interval();

    loop {
        // Queued SDK events drain before the next UI command.
        tokio::select! {
            biased;
            Some(event) = events.recv() => session.handle_event(event).await,
            command = commands.recv() => match command {
                Some(command) => apply(&mut session, command, &publish).await,
                None => break,
            },
            _ = refresh.tick(), if session.state().is_connected() => {}
        }
        publish.send_replace(session.snapshot());
    }

    session.sign_out().await;
    publish.send_replace(session.snapshot());
}

/// Publishes the post-command snapshot before answering, so a caller that
/// reads `snapshot()` after the reply sees the effect of its own command.
fn respond<T, D: VoiceDevice, R: Ringtone>(
    session: &CallSession<D, R>,
    publish: &watch::Sender<SessionSnapshot>,
    reply: oneshot::Sender<T>,
    value: T,
) {
    publish.send_replace(session.snapshot());
    // A dropped receiver only means the caller stopped waiting.
    let _ = reply.send(value);
}

async fn apply<D: VoiceDevice, R: Ringtone>(
    session: &mut CallSession<D, R>,
    command: Command,
    publish: &watch::Sender<SessionSnapshot>,
) {
    match command {
        Command::SignIn { token, reply } => {
            let result = session.sign_in(&token).await;
            respond(session, publish, reply, result);
        }
        Command::SignOut { reply } => {
            session.sign_out().await;
            respond(session, publish, reply, ());
        }
        Command::Dial { number, reply } => {
            let result = session.dial(&number).await;
            respond(session, publish, reply, result);
        }
        Command::HangUp { reply } => {
            let result = session.hang_up().await;
            respond(session, publish, reply, result);
        }
        Command::Accept { reply } => {
            let result = session.accept().await;
            respond(session, publish, reply, result);
        }
        Command::Reject { reply } => {
            let result = session.reject().await;
            respond(session, publish, reply, result);
        }
        Command::ToggleMute { reply } => {
            let result = session.toggle_mute().await;
            respond(session, publish, reply, result);
        }
        Command::SendDigits { digits, reply } => {
            let result = session.send_digits(&digits).await;
            respond(session, publish, reply, result);
        }
        Command::ClearError => session.clear_error(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::device::fake::{CountingRingtone, FakeDevice};

    async fn signed_in() -> (CallSession<FakeDevice, CountingRingtone>, FakeDevice, CountingRingtone) {
        let device = FakeDevice::default();
        let ringtone = CountingRingtone::default();
        let mut session = CallSession::new(device.clone(), ringtone.clone());
        session.sign_in("tok").await.unwrap();
        (session, device, ringtone)
    }

    async fn connected_outbound(session: &mut CallSession<FakeDevice, CountingRingtone>) -> String {
        session.dial("2065551234").await.unwrap();
        let sid = session.state().call_sid().unwrap().to_string();
        session
            .handle_event(DeviceEvent::Accepted { call_sid: sid.clone() })
            .await;
        sid
    }

    #[tokio::test]
    async fn dial_normalizes_and_enters_connecting() {
        let (mut session, device, _) = signed_in().await;

        let to = session.dial("(206) 555-1234").await.unwrap();
        assert_eq!(to, "+12065551234");
        assert!(matches!(session.state(), CallState::Connecting { to, .. } if to == "+12065551234"));
        assert!(device.calls().contains(&"connect:+12065551234".to_string()));
    }

    #[tokio::test]
    async fn dial_requires_sign_in_and_idle() {
        let mut session = CallSession::new(FakeDevice::default(), CountingRingtone::default());
        assert_eq!(session.dial("2065551234").await, Err(CallError::NotSignedIn));

        let (mut session, _, _) = signed_in().await;
        session.dial("2065551234").await.unwrap();
        assert_eq!(session.dial("2065550000").await, Err(CallError::Busy));
    }

    #[tokio::test]
    async fn empty_number_is_rejected_without_touching_the_sdk() {
        let (mut session, device, _) = signed_in().await;
        assert_eq!(session.dial("").await, Err(CallError::NoDestination));
        assert_eq!(device.calls(), vec!["register:tok".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn accept_then_hang_up_returns_to_clean_idle() {
        let (mut session, _, _) = signed_in().await;
        connected_outbound(&mut session).await;
        session.toggle_mute().await.unwrap();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(session.duration_secs(), 3);

        let summary = session.hang_up().await.expect("summary");
        assert_eq!(summary.duration_secs, 3);
        assert_eq!(summary.direction, CallDirection::Outbound);
        assert_eq!(session.state(), &CallState::Idle);
        assert_eq!(session.duration_secs(), 0);
        assert!(!session.is_timer_running());

        // A new call starts unmuted with a fresh clock.
        connected_outbound(&mut session).await;
        assert!(matches!(session.state(), CallState::Connected { muted: false, .. }));
        assert_eq!(session.duration_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn clock_stops_when_remote_disconnects() {
        let (mut session, _, _) = signed_in().await;
        let sid = connected_outbound(&mut session).await;

        tokio::time::sleep(Duration::from_millis(2500)).await;
        session
            .handle_event(DeviceEvent::Disconnected { call_sid: sid })
            .await;

        assert_eq!(session.last_call().map(|c| c.duration_secs), Some(2));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(session.duration_secs(), 0);
    }

    #[tokio::test]
    async fn cancel_or_error_while_connecting_surfaces_message() {
        let (mut session, _, _) = signed_in().await;
        session.dial("2065551234").await.unwrap();
        let sid = session.state().call_sid().unwrap().to_string();
        session
            .handle_event(DeviceEvent::Cancelled { call_sid: sid })
            .await;
        assert_eq!(session.state(), &CallState::Idle);
        assert_eq!(session.last_error(), Some("Call was cancelled"));

        session.dial("2065551234").await.unwrap();
        session
            .handle_event(DeviceEvent::Error {
                call_sid: None,
                message: "31005: Connection error".into(),
            })
            .await;
        assert_eq!(session.state(), &CallState::Idle);
        assert_eq!(session.last_error(), Some("31005: Connection error"));
    }

    #[tokio::test]
    async fn device_error_ends_the_live_call() {
        let (mut session, device, _) = signed_in().await;
        let sid = connected_outbound(&mut session).await;

        session
            .handle_event(DeviceEvent::Error {
                call_sid: None,
                message: "31009: Transport error".into(),
            })
            .await;

        assert_eq!(session.state(), &CallState::Idle);
        assert!(!session.is_timer_running());
        assert!(device.calls().contains(&format!("disconnect:{}", sid)));
        assert_eq!(session.last_call().map(|c| c.call_sid.as_str()), Some(sid.as_str()));
    }

    #[tokio::test]
    async fn device_error_while_ringing_rejects_the_caller() {
        let (mut session, device, ringtone) = signed_in().await;
        session
            .handle_event(DeviceEvent::Incoming { call_sid: "CA-in-9".into(), from: "+12065550009".into() })
            .await;

        session
            .handle_event(DeviceEvent::Error {
                call_sid: None,
                message: "31000: Device error".into(),
            })
            .await;

        assert_eq!(session.state(), &CallState::Idle);
        assert!(device.calls().contains(&"reject:CA-in-9".to_string()));
        assert_eq!(ringtone.stops(), 1);
    }

    #[tokio::test]
    async fn failed_accept_rejects_in_the_sdk() {
        let (mut session, device, _) = signed_in().await;
        *device.fail_accept.lock() = Some("media failure".into());
        session
            .handle_event(DeviceEvent::Incoming { call_sid: "CA-in-7".into(), from: "+12065550007".into() })
            .await;

        assert!(session.accept().await.is_err());
        assert_eq!(session.state(), &CallState::Idle);
        assert!(device.calls().contains(&"reject:CA-in-7".to_string()));
    }

    #[tokio::test]
    async fn connect_failure_returns_to_idle() {
        let (mut session, device, _) = signed_in().await;
        *device.fail_connect.lock() = Some("microphone blocked".into());

        let err = session.dial("2065551234").await.unwrap_err();
        assert!(matches!(err, CallError::Device(_)));
        assert_eq!(session.state(), &CallState::Idle);
        assert!(session.last_error().unwrap().contains("microphone blocked"));
    }

    #[tokio::test]
    async fn ringtone_stops_on_every_exit_from_ringing() {
        let (mut session, device, ringtone) = signed_in().await;

        // Accepted.
        session
            .handle_event(DeviceEvent::Incoming { call_sid: "CA-in-1".into(), from: "+12065550001".into() })
            .await;
        session.accept().await.unwrap();
        session.hang_up().await;

        // Rejected.
        session
            .handle_event(DeviceEvent::Incoming { call_sid: "CA-in-2".into(), from: "+12065550002".into() })
            .await;
        session.reject().await.unwrap();

        // Caller hung up first.
        session
            .handle_event(DeviceEvent::Incoming { call_sid: "CA-in-3".into(), from: "+12065550003".into() })
            .await;
        session
            .handle_event(DeviceEvent::Cancelled { call_sid: "CA-in-3".into() })
            .await;

        // Accept fails in the SDK.
        *device.fail_accept.lock() = Some("media failure".into());
        session
            .handle_event(DeviceEvent::Incoming { call_sid: "CA-in-4".into(), from: "+12065550004".into() })
            .await;
        assert!(session.accept().await.is_err());

        // Signed out while ringing.
        session
            .handle_event(DeviceEvent::Incoming { call_sid: "CA-in-5".into(), from: "+12065550005".into() })
            .await;
        session.sign_out().await;

        assert_eq!(ringtone.starts(), 5);
        assert_eq!(ringtone.stops(), ringtone.starts());
        assert_eq!(session.state(), &CallState::Idle);
    }

    #[tokio::test]
    async fn second_incoming_call_is_auto_rejected() {
        let (mut session, device, ringtone) = signed_in().await;
        let sid = connected_outbound(&mut session).await;

        session
            .handle_event(DeviceEvent::Incoming { call_sid: "CA-other".into(), from: "+12065550009".into() })
            .await;

        assert!(device.calls().contains(&"reject:CA-other".to_string()));
        assert_eq!(ringtone.starts(), 0);
        assert_eq!(session.state().call_sid(), Some(sid.as_str()));

        // Its late cancel must not end the current call.
        session
            .handle_event(DeviceEvent::Cancelled { call_sid: "CA-other".into() })
            .await;
        assert!(matches!(session.state(), CallState::Connected { .. }));
    }

    #[tokio::test]
    async fn failed_mute_keeps_local_flag() {
        let (mut session, device, _) = signed_in().await;
        connected_outbound(&mut session).await;

        *device.fail_mute.lock() = Some("track ended".into());
        assert!(session.toggle_mute().await.is_err());
        assert!(matches!(session.state(), CallState::Connected { muted: false, .. }));

        *device.fail_mute.lock() = None;
        assert_eq!(session.set_muted(true).await, Ok(true));
        assert_eq!(session.set_muted(true).await, Ok(true));
        let mutes = device.calls().iter().filter(|c| c.starts_with("mute:")).count();
        assert_eq!(mutes, 1);
        assert_eq!(session.toggle_mute().await, Ok(false));
    }

    #[tokio::test]
    async fn mute_and_digits_outside_a_call() {
        let (mut session, device, _) = signed_in().await;
        assert_eq!(session.toggle_mute().await, Err(CallError::NoActiveCall));
        session.send_digits("123").await.unwrap();
        assert!(!device.calls().iter().any(|c| c.starts_with("digits:")));

        let sid = connected_outbound(&mut session).await;
        session.send_digits("1 2#x").await.unwrap();
        assert!(device.calls().contains(&format!("digits:{}:12#", sid)));
    }

    #[tokio::test]
    async fn sign_out_tears_down_active_call() {
        let (mut session, device, _) = signed_in().await;
        let sid = connected_outbound(&mut session).await;

        session.sign_out().await;
        let calls = device.calls();
        assert!(calls.contains(&format!("disconnect:{}", sid)));
        assert_eq!(calls.last().map(String::as_str), Some("unregister"));
        assert!(!session.is_registered());
        assert!(!session.is_timer_running());
        assert_eq!(session.dial("2065551234").await, Err(CallError::NotSignedIn));
    }

    #[tokio::test]
    async fn clock_refresh_does_not_replay_idle_ticks() {
        let refresh = refresh_interval();
        assert_eq!(refresh.missed_tick_behavior(), MissedTickBehavior::Delay);
        assert_eq!(refresh.period(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn handle_serializes_commands_and_events() {
        let device = FakeDevice::default();
        let ringtone = CountingRingtone::default();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (handle, task) =
            SessionHandle::spawn(CallSession::new(device.clone(), ringtone.clone()), events_rx);

        handle.sign_in("tok").await.unwrap();
        handle.dial("12065551234").await.unwrap();
        let sid = handle.snapshot().state.call_sid().unwrap().to_string();

        events_tx
            .send(DeviceEvent::Accepted { call_sid: sid.clone() })
            .unwrap();
        // Queued events are applied before the next command.
        assert_eq!(handle.toggle_mute().await, Ok(true));
        assert!(matches!(handle.snapshot().state, CallState::Connected { muted: true, .. }));

        let summary = handle.hang_up().await.unwrap().expect("summary");
        assert_eq!(summary.call_sid, sid);
        assert_eq!(handle.snapshot().state, CallState::Idle);

        drop(handle);
        task.await.unwrap();
        assert_eq!(device.calls().last().map(String::as_str), Some("unregister"));
    }
}
