//! The scanning client as a pure state machine.
//!
//! [`Scanner`] owns the connection state, the scan session, the single-flight
//! processing marker and the detection memo. It performs no I/O: every input
//! is a method call (channel events arrive as a typed [`ChannelEvent`]) and
//! every output is a list of [`Effect`]s for the runtime to execute. This keeps
//! the whole coordination logic testable without sockets, cameras or timers.
//!
//! Channels and frames are tagged with monotonically increasing ids. Events
//! and pipeline completions carrying an id that is no longer current are
//! dropped, so a late callback from a discarded connection or an abandoned
//! capture cannot mutate state.

pub mod backoff;
pub mod detection;
pub mod throttle;

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::ScanConfig;
use crate::protocol::{
    ClientMessage, ServerMessage, CLOSE_MISSING_TOKEN, CLOSE_NORMAL, CLOSE_REASON_TEARDOWN,
    CLOSE_UNKNOWN_USER,
};
use backoff::ReconnectPolicy;
use detection::{Detection, DetectionOutcome, ScanPhase};
use throttle::{CaptureThrottle, GateInputs};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChannelId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct FrameId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    /// Label shown by the connection status indicator.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting…",
            Self::Connected => "Connected",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Host application visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Active,
    /// Visible but not interactive (e.g. a system overlay). Captures pause,
    /// scanning is not stopped.
    Inactive,
    Background,
}

/// Something that happened on a channel, as reported by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Opened { channel: ChannelId },
    Message { channel: ChannelId, text: String },
    Closed { channel: ChannelId, code: u16, reason: String },
    Error { channel: ChannelId, message: String },
}

impl ChannelEvent {
    pub fn channel(&self) -> ChannelId {
        match self {
            Self::Opened { channel }
            | Self::Message { channel, .. }
            | Self::Closed { channel, .. }
            | Self::Error { channel, .. } => *channel,
        }
    }
}

/// A user-facing notice. Blocking alerts need acknowledgement; the rest are
/// guidance the host may show transiently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub blocking: bool,
}

impl Alert {
    fn blocking(title: &str, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            blocking: true,
        }
    }

    fn guidance(title: &str, message: &str) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            blocking: false,
        }
    }
}

/// Work the runtime must carry out on behalf of the scanner.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenChannel { channel: ChannelId },
    CloseChannel { channel: ChannelId, code: u16, reason: String },
    Send { channel: ChannelId, message: ClientMessage },
    ScheduleReconnect { delay: Duration, attempt: u32 },
    CancelReconnect,
    /// Arm the repeating scan tick.
    StartScanLoop,
    /// Disarm the scan tick. No tick may be delivered after this.
    StopScanLoop,
    /// Run the frame pipeline once; report back with `on_frame_encoded` or
    /// `on_frame_failed` using the same id.
    Capture { frame: FrameId },
    /// Cancel any utterance in progress, then speak `name`.
    Announce { name: String },
    ScheduleResume { delay: Duration },
    CancelResume,
    RequestCameraPermission,
    PrepareCamera,
    Alert(Alert),
}

/// Timing knobs the scanner needs from [`ScanConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ScanTuning {
    pub throttle: Duration,
    pub resume_delay: Duration,
    /// How long a sent frame may wait for its reply before the next capture
    /// is allowed anyway.
    pub reply_timeout: Duration,
}

impl Default for ScanTuning {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

impl From<&ScanConfig> for ScanTuning {
    fn from(config: &ScanConfig) -> Self {
        Self {
            throttle: config.throttle(),
            resume_delay: config.resume_delay(),
            reply_timeout: config.capture_timeout(),
        }
    }
}

/// Serializable view of the scanner for status displays.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScanSnapshot {
    pub connection: ConnectionState,
    pub connection_label: &'static str,
    pub phase: ScanPhase,
    pub scanning: bool,
    pub processing: bool,
    pub camera_ready: bool,
    pub detected_name: Option<String>,
    pub retry_attempts: u32,
    pub status_line: String,
}

/// The single frame allowed between capture and reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Encoding(FrameId),
    AwaitingReply { frame: FrameId, sent_at: Instant },
}

impl InFlight {
    fn frame(&self) -> FrameId {
        match self {
            Self::Encoding(frame) | Self::AwaitingReply { frame, .. } => *frame,
        }
    }
}

pub struct Scanner {
    tuning: ScanTuning,
    policy: ReconnectPolicy,

    connection: ConnectionState,
    channel: Option<ChannelId>,
    next_channel: u64,
    attempts: u32,
    reconnect_pending: bool,

    phase: ScanPhase,
    throttle: CaptureThrottle,
    in_flight: Option<InFlight>,
    next_frame: u64,
    detection: Detection,
    resume_pending: bool,

    camera_permission: Option<bool>,
    camera_ready: bool,
    app_state: AppState,
    torn_down: bool,
}

impl Scanner {
    pub fn new(tuning: ScanTuning, policy: ReconnectPolicy) -> Self {
        Self {
            tuning,
            policy,
            connection: ConnectionState::Disconnected,
            channel: None,
            next_channel: 0,
            attempts: 0,
            reconnect_pending: false,
            phase: ScanPhase::Idle,
            throttle: CaptureThrottle::new(tuning.throttle),
            in_flight: None,
            next_frame: 0,
            detection: Detection::default(),
            resume_pending: false,
            camera_permission: None,
            camera_ready: false,
            app_state: AppState::Active,
            torn_down: false,
        }
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.channel
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn is_scanning(&self) -> bool {
        self.phase.is_scanning()
    }

    pub fn is_processing(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn in_flight(&self) -> Option<FrameId> {
        self.in_flight.map(|f| f.frame())
    }

    /// True once the in-flight frame has been sent and its reply is pending.
    pub fn awaiting_reply(&self) -> bool {
        matches!(self.in_flight, Some(InFlight::AwaitingReply { .. }))
    }

    pub fn detected_name(&self) -> Option<&str> {
        self.detection.detected()
    }

    pub fn last_announced(&self) -> Option<&str> {
        self.detection.last_announced()
    }

    pub fn camera_ready(&self) -> bool {
        self.camera_ready
    }

    pub fn camera_permission(&self) -> Option<bool> {
        self.camera_permission
    }

    pub fn app_state(&self) -> AppState {
        self.app_state
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn status_line(&self) -> String {
        if let Some(name) = self.detection.detected() {
            name.to_string()
        } else if !self.camera_ready {
            "Initializing camera…".into()
        } else if self.is_scanning() {
            "Scanning…".into()
        } else {
            "Ready".into()
        }
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        ScanSnapshot {
            connection: self.connection,
            connection_label: self.connection.label(),
            phase: self.phase,
            scanning: self.is_scanning(),
            processing: self.is_processing(),
            camera_ready: self.camera_ready,
            detected_name: self.detection.detected().map(str::to_string),
            retry_attempts: self.attempts,
            status_line: self.status_line(),
        }
    }

    /// Component mount: ask for the camera and open the channel.
    pub fn mount(&mut self) -> Vec<Effect> {
        self.torn_down = false;
        tracing::info!("scanner mounted");
        let mut effects = vec![Effect::RequestCameraPermission];
        effects.extend(self.connect());
        effects
    }

    /// Component unmount. Releases everything unconditionally; calling it
    /// again, or before anything was acquired, yields no effects.
    pub fn teardown(&mut self) -> Vec<Effect> {
        if self.torn_down {
            return Vec::new();
        }
        let mut effects = self.stop_scanning();
        effects.extend(self.close_channel(CLOSE_REASON_TEARDOWN));
        self.in_flight = None;
        self.detection.clear();
        self.camera_ready = false;
        self.torn_down = true;
        tracing::info!("scanner torn down");
        effects
    }

    pub fn on_app_state(&mut self, next: AppState) -> Vec<Effect> {
        let previous = self.app_state;
        self.app_state = next;
        if previous == next || self.torn_down {
            return Vec::new();
        }
        tracing::info!(from = ?previous, to = ?next, "app state changed");

        match next {
            AppState::Active => {
                let mut effects = Vec::new();
                if self.connection == ConnectionState::Disconnected && !self.reconnect_pending {
                    effects.extend(self.connect());
                }
                effects.push(Effect::RequestCameraPermission);
                effects
            }
            AppState::Background => self.stop_scanning(),
            AppState::Inactive => Vec::new(),
        }
    }

    pub fn on_camera_permission(&mut self, granted: bool) -> Vec<Effect> {
        self.camera_permission = Some(granted);
        if self.torn_down {
            return Vec::new();
        }
        if granted {
            tracing::info!("camera permission granted");
            if self.camera_ready {
                Vec::new()
            } else {
                vec![Effect::PrepareCamera]
            }
        } else {
            tracing::warn!("camera permission denied");
            self.camera_ready = false;
            let mut effects = self.stop_scanning();
            effects.push(Effect::Alert(Alert::blocking(
                "Camera Permission",
                "Camera access is required to recognize faces. Grant permission and try again.",
            )));
            effects
        }
    }

    pub fn on_camera_ready(&mut self) {
        if !self.torn_down {
            self.camera_ready = true;
            tracing::info!("camera ready");
        }
    }

    /// The camera stopped delivering frames (device removed, preview failed).
    pub fn on_camera_lost(&mut self, reason: &str) -> Vec<Effect> {
        tracing::warn!(reason, "camera unavailable");
        self.camera_ready = false;
        self.stop_scanning()
    }

    /// Open a channel unless one is already open or opening. Also serves as
    /// the manual retry action.
    pub fn connect(&mut self) -> Vec<Effect> {
        if self.torn_down || self.connection != ConnectionState::Disconnected {
            return Vec::new();
        }

        let mut effects = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        if let Some(old) = self.channel.take() {
            effects.push(Effect::CloseChannel {
                channel: old,
                code: CLOSE_NORMAL,
                reason: "Replaced".into(),
            });
        }

        self.next_channel += 1;
        let channel = ChannelId(self.next_channel);
        self.channel = Some(channel);
        self.connection = ConnectionState::Connecting;
        tracing::info!(channel = channel.0, attempt = self.attempts, "connecting to recognition service");
        effects.push(Effect::OpenChannel { channel });
        effects
    }

    /// Close the channel normally and cancel any pending reconnect. Idempotent.
    pub fn disconnect(&mut self) -> Vec<Effect> {
        let mut effects = self.stop_scanning();
        effects.extend(self.close_channel("Disconnect requested"));
        effects
    }

    fn close_channel(&mut self, reason: &str) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            effects.push(Effect::CancelReconnect);
        }
        if let Some(channel) = self.channel.take() {
            tracing::info!(channel = channel.0, reason, "closing channel");
            effects.push(Effect::CloseChannel {
                channel,
                code: CLOSE_NORMAL,
                reason: reason.into(),
            });
        }
        self.connection = ConnectionState::Disconnected;
        effects
    }

    fn schedule_reconnect(&mut self) -> Vec<Effect> {
        if self.reconnect_pending || self.torn_down {
            return Vec::new();
        }
        let attempt = self.attempts;
        let delay = self.policy.delay_for(attempt);
        self.attempts += 1;
        self.reconnect_pending = true;
        tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        vec![Effect::ScheduleReconnect { delay, attempt }]
    }

    pub fn on_reconnect_elapsed(&mut self) -> Vec<Effect> {
        if !self.reconnect_pending {
            return Vec::new();
        }
        self.reconnect_pending = false;
        self.connect()
    }

    pub fn on_channel(&mut self, event: ChannelEvent) -> Vec<Effect> {
        if self.torn_down || self.channel != Some(event.channel()) {
            tracing::debug!(channel = event.channel().0, "ignoring event from stale channel");
            return Vec::new();
        }

        match event {
            ChannelEvent::Opened { channel } => {
                self.connection = ConnectionState::Connected;
                self.attempts = 0;
                tracing::info!(channel = channel.0, "channel open");
                Vec::new()
            }
            ChannelEvent::Message { text, .. } => self.handle_message(&text),
            ChannelEvent::Closed { channel, code, reason } => {
                self.channel = None;
                self.connection = ConnectionState::Disconnected;
                self.release_reply("channel closed");
                let mut effects = self.stop_scanning();
                if code == CLOSE_NORMAL {
                    tracing::info!(channel = channel.0, reason = %reason, "channel closed normally");
                } else {
                    if code == CLOSE_MISSING_TOKEN || code == CLOSE_UNKNOWN_USER {
                        tracing::warn!(channel = channel.0, code, "recognition service rejected the user token");
                    } else {
                        tracing::warn!(channel = channel.0, code, reason = %reason, "channel closed unexpectedly");
                    }
                    effects.extend(self.schedule_reconnect());
                }
                effects
            }
            ChannelEvent::Error { channel, message } => {
                self.connection = ConnectionState::Disconnected;
                self.release_reply("channel error");
                tracing::error!(channel = channel.0, error = %message, "channel error");
                let mut effects = Vec::new();
                if self.attempts == 0 && !self.reconnect_pending {
                    effects.push(Effect::Alert(Alert::blocking(
                        "Connection Error",
                        "Failed to connect to the server. Please check your network settings.",
                    )));
                }
                effects.extend(self.schedule_reconnect());
                effects
            }
        }
    }

    /// Periodic keepalive while connected.
    pub fn on_keepalive(&mut self, timestamp_ms: i64) -> Vec<Effect> {
        match (self.connection, self.channel) {
            (ConnectionState::Connected, Some(channel)) if !self.torn_down => vec![Effect::Send {
                channel,
                message: ClientMessage::Ping {
                    timestamp: timestamp_ms,
                },
            }],
            _ => Vec::new(),
        }
    }

    fn handle_message(&mut self, text: &str) -> Vec<Effect> {
        let message = match ServerMessage::parse(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "malformed message from recognition service");
                self.release_reply("malformed reply");
                return Vec::new();
            }
        };

        match message {
            ServerMessage::FaceDetectionResult {
                identified_people, ..
            } => {
                self.release_reply("result");
                match self.detection.observe(&identified_people) {
                    DetectionOutcome::Identified { name, announce } => {
                        let mut effects = Vec::new();
                        if announce {
                            tracing::info!(person = %name, "person identified");
                            effects.push(Effect::Announce { name });
                        }
                        if self.is_scanning() {
                            self.phase = ScanPhase::Detected;
                            effects.push(Effect::StopScanLoop);
                        }
                        effects
                    }
                    DetectionOutcome::NoMatch => {
                        tracing::debug!("no known face in frame");
                        Vec::new()
                    }
                }
            }
            ServerMessage::Error { message, critical } => {
                self.release_reply("error");
                if critical {
                    tracing::error!(error = %message, "critical error from recognition service");
                    let mut effects = self.stop_scanning();
                    effects.push(Effect::Alert(Alert::blocking("Server Error", message)));
                    effects
                } else {
                    tracing::warn!(error = %message, "recognition service error");
                    Vec::new()
                }
            }
            ServerMessage::ConnectionEstablished { message } => {
                tracing::info!(message = message.as_deref().unwrap_or(""), "session established");
                Vec::new()
            }
            ServerMessage::Pong { timestamp } => {
                tracing::debug!(?timestamp, "pong");
                Vec::new()
            }
            ServerMessage::Unknown => {
                tracing::debug!("ignoring message of unknown type");
                Vec::new()
            }
        }
    }

    /// User pressed the scan button.
    pub fn toggle_scan(&mut self, now: Instant) -> Vec<Effect> {
        if self.torn_down {
            return Vec::new();
        }
        if self.is_scanning() {
            tracing::info!("stopping face scanning");
            return self.stop_scanning();
        }

        if self.connection != ConnectionState::Connected {
            return vec![Effect::Alert(Alert::guidance(
                "Not Connected",
                "Please wait for connection to server before scanning.",
            ))];
        }
        if !self.camera_ready {
            return vec![Effect::Alert(Alert::guidance(
                "Camera Not Ready",
                "Please wait for the camera to initialize.",
            ))];
        }

        let mut effects = Vec::new();
        if self.resume_pending {
            self.resume_pending = false;
            effects.push(Effect::CancelResume);
        }
        effects.extend(self.start_scanning(now));
        effects
    }

    /// User pressed "Continue" after a detection.
    pub fn resume(&mut self) -> Vec<Effect> {
        if self.torn_down || self.phase != ScanPhase::Detected || self.resume_pending {
            return Vec::new();
        }
        self.detection.clear();
        self.resume_pending = true;
        vec![Effect::ScheduleResume {
            delay: self.tuning.resume_delay,
        }]
    }

    pub fn on_resume_elapsed(&mut self, now: Instant) -> Vec<Effect> {
        if !self.resume_pending || self.torn_down {
            return Vec::new();
        }
        self.resume_pending = false;
        if self.connection == ConnectionState::Connected && self.camera_ready {
            self.start_scanning(now)
        } else {
            tracing::warn!(connection = %self.connection, camera_ready = self.camera_ready, "cannot resume scanning");
            self.phase = ScanPhase::Idle;
            Vec::new()
        }
    }

    fn start_scanning(&mut self, now: Instant) -> Vec<Effect> {
        tracing::info!("starting face scanning");
        self.detection.clear();
        self.phase = ScanPhase::Scanning;
        self.throttle.rebase(now);
        vec![Effect::StartScanLoop]
    }

    fn stop_scanning(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.resume_pending {
            self.resume_pending = false;
            effects.push(Effect::CancelResume);
        }
        if self.is_scanning() {
            self.phase = ScanPhase::Idle;
            effects.push(Effect::StopScanLoop);
        }
        effects
    }

    pub fn on_tick(&mut self, now: Instant) -> Vec<Effect> {
        if self.torn_down || !self.is_scanning() {
            return Vec::new();
        }
        if let Some(InFlight::AwaitingReply { frame, sent_at }) = self.in_flight {
            if now.saturating_duration_since(sent_at) >= self.tuning.reply_timeout {
                tracing::warn!(frame = frame.0, "no reply from recognition service, frame given up");
                self.in_flight = None;
            }
        }
        let inputs = GateInputs {
            scanning: self.is_scanning(),
            connected: self.connection == ConnectionState::Connected,
            processing: self.in_flight.is_some(),
            camera_ready: self.camera_ready,
            foreground: self.app_state == AppState::Active,
        };
        if !self.throttle.try_accept(inputs, now) {
            return Vec::new();
        }

        self.next_frame += 1;
        let frame = FrameId(self.next_frame);
        self.in_flight = Some(InFlight::Encoding(frame));
        tracing::debug!(frame = frame.0, "capturing frame");
        vec![Effect::Capture { frame }]
    }

    /// The pipeline produced `data_uri` for `frame`. When it is sent, the
    /// frame stays in flight until a reply, a channel failure or the reply
    /// timeout releases it.
    pub fn on_frame_encoded(
        &mut self,
        frame: FrameId,
        data_uri: String,
        now: Instant,
    ) -> Vec<Effect> {
        if self.in_flight != Some(InFlight::Encoding(frame)) {
            tracing::debug!(frame = frame.0, "dropping frame from abandoned capture");
            return Vec::new();
        }
        self.in_flight = None;

        if !self.is_scanning() {
            tracing::debug!(frame = frame.0, "scanning stopped, frame not sent");
            return Vec::new();
        }

        match (self.connection, self.channel) {
            (ConnectionState::Connected, Some(channel)) => {
                tracing::debug!(frame = frame.0, bytes = data_uri.len(), "sending frame");
                self.in_flight = Some(InFlight::AwaitingReply { frame, sent_at: now });
                vec![Effect::Send {
                    channel,
                    message: ClientMessage::Image { image: data_uri },
                }]
            }
            (ConnectionState::Disconnected, _) => {
                tracing::info!(frame = frame.0, "channel down, frame dropped");
                self.connect()
            }
            _ => Vec::new(),
        }
    }

    pub fn on_frame_failed(&mut self, frame: FrameId, reason: &str) {
        if self.in_flight == Some(InFlight::Encoding(frame)) {
            self.in_flight = None;
            tracing::warn!(frame = frame.0, reason, "frame pipeline aborted");
        }
    }

    /// Clear a sent frame. An encode that is still running is left alone.
    fn release_reply(&mut self, cause: &str) {
        if let Some(InFlight::AwaitingReply { frame, .. }) = self.in_flight {
            tracing::debug!(frame = frame.0, cause, "frame round trip finished");
            self.in_flight = None;
        }
    }
}

impl Default for Scanner {
    fn default() -> Self {
        Self::new(ScanTuning::default(), ReconnectPolicy::default())
    }
}
