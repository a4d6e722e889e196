//! Async driver for the [`Scanner`] state machine.
//!
//! [`ScanRuntime`] runs on a single tokio task. It feeds commands, channel
//! events, timer expiries and pipeline completions into the scanner one at a
//! time, in arrival order, and executes the effects that come back. Timers,
//! the scan tick and the transport live in their own tasks and only ever talk
//! to the driver through its event queue, so all scanner state is touched
//! from one place.

mod channel;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::MemlensConfig;
use crate::device::{Camera, Notifier, Speaker};
use crate::pipeline::{EncodedFrame, FramePipeline, PipelineError, PipelineSettings};
use crate::scanner::backoff::ReconnectPolicy;
use crate::scanner::{AppState, ChannelEvent, Effect, FrameId, ScanSnapshot, ScanTuning, Scanner};
use channel::ChannelHandle;

/// How long shutdown waits for a close frame to be flushed.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// User and host actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    ToggleScan,
    /// "Continue" after a detection.
    Continue,
    /// Manual reconnect from the disconnected indicator.
    Retry,
    /// Close the channel without scheduling a reconnect.
    Disconnect,
    AppState(AppState),
    Shutdown,
}

pub(crate) enum RuntimeEvent {
    Channel(ChannelEvent),
    ReconnectDue,
    ResumeDue,
    Tick,
    FrameDone {
        frame: FrameId,
        result: Result<EncodedFrame, PipelineError>,
    },
    Permission(bool),
    CameraPrepared(std::result::Result<(), String>),
}

/// Control surface handed to the host.
#[derive(Clone)]
pub struct ScanHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<ScanSnapshot>,
}

impl ScanHandle {
    pub async fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("scan runtime has stopped"))
    }

    pub async fn toggle_scan(&self) -> Result<()> {
        self.send(Command::ToggleScan).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.send(Command::Continue).await
    }

    pub async fn retry(&self) -> Result<()> {
        self.send(Command::Retry).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(Command::Disconnect).await
    }

    pub async fn set_app_state(&self, state: AppState) -> Result<()> {
        self.send(Command::AppState(state)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    pub fn snapshot(&self) -> ScanSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ScanSnapshot> {
        self.snapshots.clone()
    }
}

pub struct ScanRuntime {
    driver: Driver,
    events_rx: mpsc::UnboundedReceiver<RuntimeEvent>,
    commands_rx: mpsc::Receiver<Command>,
}

struct Driver {
    config: Arc<MemlensConfig>,
    scanner: Scanner,
    camera: Arc<dyn Camera>,
    speaker: Arc<dyn Speaker>,
    notifier: Arc<dyn Notifier>,
    pipeline: FramePipeline,
    events_tx: mpsc::UnboundedSender<RuntimeEvent>,
    snapshot_tx: watch::Sender<ScanSnapshot>,

    channel: Option<ChannelHandle>,
    closing: Vec<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    resume_timer: Option<JoinHandle<()>>,
    scan_loop: Option<CancellationToken>,
    capture_task: Option<JoinHandle<()>>,
    speech_task: Option<JoinHandle<()>>,
}

impl ScanRuntime {
    pub fn new(
        config: Arc<MemlensConfig>,
        camera: Arc<dyn Camera>,
        speaker: Arc<dyn Speaker>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, ScanHandle) {
        let scanner = Scanner::new(
            ScanTuning::from(&config.scan),
            ReconnectPolicy::from(&config.reconnect),
        );
        let pipeline = FramePipeline::new(Arc::clone(&camera), PipelineSettings::from(&config.scan));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::channel(32);
        let (snapshot_tx, snapshots) = watch::channel(scanner.snapshot());

        let driver = Driver {
            config,
            scanner,
            camera,
            speaker,
            notifier,
            pipeline,
            events_tx,
            snapshot_tx,
            channel: None,
            closing: Vec::new(),
            reconnect_timer: None,
            resume_timer: None,
            scan_loop: None,
            capture_task: None,
            speech_task: None,
        };

        let handle = ScanHandle {
            commands: commands_tx,
            snapshots,
        };
        (
            Self {
                driver,
                events_rx,
                commands_rx,
            },
            handle,
        )
    }

    /// Run until [`Command::Shutdown`] arrives or every [`ScanHandle`] is dropped.
    pub async fn run(self) -> Result<()> {
        let Self {
            mut driver,
            mut events_rx,
            mut commands_rx,
        } = self;

        let mut keepalive = driver.config.scan.keepalive().map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let effects = driver.scanner.mount();
        driver.apply(effects);
        driver.publish();

        loop {
            tokio::select! {
                command = commands_rx.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => driver.handle_command(command),
                },
                Some(event) = events_rx.recv() => driver.handle_event(event),
                _ = next_keepalive(&mut keepalive) => {
                    let effects = driver.scanner.on_keepalive(chrono::Utc::now().timestamp_millis());
                    driver.apply(effects);
                }
            }
            driver.publish();
        }

        driver.shutdown().await;
        Ok(())
    }
}

async fn next_keepalive(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn scan_loop(
    period: Duration,
    events: mpsc::UnboundedSender<RuntimeEvent>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if events.send(RuntimeEvent::Tick).is_err() {
                    break;
                }
            }
        }
    }
    tracing::debug!("scan loop stopped");
}

impl Driver {
    fn handle_command(&mut self, command: Command) {
        tracing::debug!(?command, "command");
        let now = std::time::Instant::now();
        let effects = match command {
            Command::ToggleScan => self.scanner.toggle_scan(now),
            Command::Continue => self.scanner.resume(),
            Command::Retry => self.scanner.connect(),
            Command::Disconnect => self.scanner.disconnect(),
            Command::AppState(state) => self.scanner.on_app_state(state),
            Command::Shutdown => Vec::new(),
        };
        self.apply(effects);
    }

    fn handle_event(&mut self, event: RuntimeEvent) {
        let now = std::time::Instant::now();
        let effects = match event {
            RuntimeEvent::Channel(event) => self.scanner.on_channel(event),
            RuntimeEvent::ReconnectDue => {
                self.reconnect_timer = None;
                self.scanner.on_reconnect_elapsed()
            }
            RuntimeEvent::ResumeDue => {
                self.resume_timer = None;
                self.scanner.on_resume_elapsed(now)
            }
            RuntimeEvent::Tick => self.scanner.on_tick(now),
            RuntimeEvent::FrameDone { frame, result } => {
                self.capture_task = None;
                match result {
                    Ok(encoded) => {
                        tracing::debug!(
                            frame = frame.0,
                            source = %encoded.source,
                            width = encoded.width,
                            height = encoded.height,
                            jpeg_bytes = encoded.jpeg_bytes,
                            "frame encoded"
                        );
                        self.scanner.on_frame_encoded(frame, encoded.data_uri, now)
                    }
                    Err(e) => {
                        self.scanner.on_frame_failed(frame, &e.to_string());
                        Vec::new()
                    }
                }
            }
            RuntimeEvent::Permission(granted) => self.scanner.on_camera_permission(granted),
            RuntimeEvent::CameraPrepared(Ok(())) => {
                self.scanner.on_camera_ready();
                Vec::new()
            }
            RuntimeEvent::CameraPrepared(Err(reason)) => self.scanner.on_camera_lost(&reason),
        };
        self.apply(effects);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::OpenChannel { channel } => match self.config.channel_url() {
                Ok(url) => {
                    self.channel = Some(ChannelHandle::open(
                        channel,
                        url.to_string(),
                        self.events_tx.clone(),
                    ));
                }
                Err(e) => {
                    let _ = self.events_tx.send(RuntimeEvent::Channel(ChannelEvent::Error {
                        channel,
                        message: format!("{e:#}"),
                    }));
                }
            },
            Effect::CloseChannel {
                channel,
                code,
                reason,
            } => {
                if self.channel.as_ref().map(ChannelHandle::id) == Some(channel) {
                    if let Some(handle) = self.channel.take() {
                        self.closing.push(handle.close(code, reason));
                    }
                }
                self.closing.retain(|task| !task.is_finished());
            }
            Effect::Send { channel, message } => match &self.channel {
                Some(handle) if handle.id() == channel => {
                    if !handle.send(message.to_json()) {
                        tracing::warn!(channel = channel.0, "transport gone, message dropped");
                    }
                }
                _ => tracing::debug!(channel = channel.0, "no open transport for message"),
            },
            Effect::ScheduleReconnect { delay, .. } => {
                abort(&mut self.reconnect_timer);
                self.reconnect_timer = Some(self.after(delay, || RuntimeEvent::ReconnectDue));
            }
            Effect::CancelReconnect => abort(&mut self.reconnect_timer),
            Effect::StartScanLoop => {
                if let Some(token) = self.scan_loop.take() {
                    token.cancel();
                }
                let token = CancellationToken::new();
                tokio::spawn(scan_loop(
                    self.config.scan.tick_interval(),
                    self.events_tx.clone(),
                    token.clone(),
                ));
                self.scan_loop = Some(token);
            }
            Effect::StopScanLoop => {
                if let Some(token) = self.scan_loop.take() {
                    token.cancel();
                }
            }
            Effect::Capture { frame } => {
                let pipeline = self.pipeline.clone();
                let limit = self.config.scan.capture_timeout();
                let events = self.events_tx.clone();
                self.capture_task = Some(tokio::spawn(async move {
                    let result = pipeline.run_with_timeout(limit).await;
                    let _ = events.send(RuntimeEvent::FrameDone { frame, result });
                }));
            }
            Effect::Announce { name } => self.announce(name),
            Effect::ScheduleResume { delay } => {
                abort(&mut self.resume_timer);
                self.resume_timer = Some(self.after(delay, || RuntimeEvent::ResumeDue));
            }
            Effect::CancelResume => abort(&mut self.resume_timer),
            Effect::RequestCameraPermission => {
                let camera = Arc::clone(&self.camera);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let granted = match tokio::task::spawn_blocking(move || camera.request_permission()).await {
                        Ok(Ok(granted)) => granted,
                        Ok(Err(e)) => {
                            tracing::error!(error = %e, "camera permission request failed");
                            false
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "camera permission task failed");
                            false
                        }
                    };
                    let _ = events.send(RuntimeEvent::Permission(granted));
                });
            }
            Effect::PrepareCamera => {
                let camera = Arc::clone(&self.camera);
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    let result = match tokio::task::spawn_blocking(move || camera.prepare()).await {
                        Ok(result) => result.map_err(|e| format!("{e:#}")),
                        Err(e) => Err(e.to_string()),
                    };
                    let _ = events.send(RuntimeEvent::CameraPrepared(result));
                });
            }
            Effect::Alert(alert) => self.notifier.alert(&alert),
        }
    }

    /// Cancel whatever is being said, pause briefly, then speak `name`.
    /// A newer announcement aborts an older one that has not started yet.
    fn announce(&mut self, name: String) {
        abort(&mut self.speech_task);
        let speaker = Arc::clone(&self.speaker);
        let gap = Duration::from_millis(self.config.speech.restart_delay_ms);
        self.speech_task = Some(tokio::spawn(async move {
            let stopper = Arc::clone(&speaker);
            let _ = tokio::task::spawn_blocking(move || stopper.stop()).await;
            tokio::time::sleep(gap).await;
            match tokio::task::spawn_blocking(move || speaker.speak(&name)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "speech failed"),
                Err(e) => tracing::warn!(error = %e, "speech task failed"),
            }
        }));
    }

    fn after(&self, delay: Duration, event: fn() -> RuntimeEvent) -> JoinHandle<()> {
        let events = self.events_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event());
        })
    }

    fn publish(&self) {
        let snapshot = self.scanner.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }

    async fn shutdown(&mut self) {
        let effects = self.scanner.teardown();
        self.apply(effects);

        abort(&mut self.reconnect_timer);
        abort(&mut self.resume_timer);
        abort(&mut self.capture_task);
        abort(&mut self.speech_task);
        if let Some(token) = self.scan_loop.take() {
            token.cancel();
        }
        let speaker = Arc::clone(&self.speaker);
        let _ = tokio::task::spawn_blocking(move || speaker.stop()).await;

        for task in self.closing.drain(..) {
            let abort_handle = task.abort_handle();
            if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, task).await.is_err() {
                tracing::debug!("close frame flush timed out");
                abort_handle.abort();
            }
        }
        self.publish();
        tracing::info!("scan runtime stopped");
    }
}

fn abort(task: &mut Option<JoinHandle<()>>) {
    if let Some(task) = task.take() {
        task.abort();
    }
}
