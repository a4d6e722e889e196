#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Result;
use memlens::config::MemlensConfig;
use memlens::device::{Camera, CaptureOptions, CapturedFrame, Notifier, Speaker};
use memlens::protocol::ClientMessage;
use memlens::scanner::{Alert, ChannelEvent, ChannelId, Effect, FrameId, Scanner};

/// Encode a solid-colour PNG of the given size.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([180, 140, 120]));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// Camera returning the same frame on every capture.
pub struct FakeCamera {
    frame: Vec<u8>,
    granted: bool,
    fail: bool,
    delay: Option<Duration>,
    captures: AtomicUsize,
}

impl FakeCamera {
    pub fn new(frame: Vec<u8>) -> Self {
        Self {
            frame,
            granted: true,
            fail: false,
            delay: None,
            captures: AtomicUsize::new(0),
        }
    }

    pub fn vga() -> Self {
        Self::new(png_bytes(640, 480))
    }

    pub fn denied() -> Self {
        Self {
            granted: false,
            ..Self::vga()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::vga()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::vga()
        }
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl Camera for FakeCamera {
    fn request_permission(&self) -> Result<bool> {
        Ok(self.granted)
    }

    fn prepare(&self) -> Result<()> {
        Ok(())
    }

    fn capture(&self, _options: &CaptureOptions) -> Result<CapturedFrame> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.fail {
            anyhow::bail!("sensor unavailable");
        }
        Ok(CapturedFrame {
            bytes: self.frame.clone(),
            source: "fake".into(),
        })
    }
}

/// Speaker that records what was said and every `stop`, in call order.
#[derive(Default)]
pub struct RecordingSpeaker {
    pub spoken: Mutex<Vec<String>>,
    pub stops: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl RecordingSpeaker {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// `"stop"` and `"speak:<text>"` entries in the order they happened.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Speaker for RecordingSpeaker {
    fn speak(&self, text: &str) -> Result<()> {
        self.calls.lock().unwrap().push(format!("speak:{text}"));
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn stop(&self) {
        self.calls.lock().unwrap().push("stop".into());
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<Alert>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.alerts
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.title.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn alert(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

/// Config with short timings pointed at `ws_url`.
pub fn test_config(ws_url: &str) -> MemlensConfig {
    let mut config = MemlensConfig::default();
    config.server.ws_url = ws_url.to_string();
    config.auth.token = "uid-test".into();
    config.scan.throttle_ms = 150;
    config.scan.tick_interval_ms = 20;
    config.scan.resume_delay_ms = 50;
    config.scan.capture_timeout_ms = 2000;
    config.scan.keepalive_secs = 0;
    config.reconnect.base_delay_ms = 50;
    config.reconnect.max_delay_ms = 200;
    config.speech.restart_delay_ms = 0;
    config
}

/// A scanner that is mounted, connected and has a ready camera.
pub fn ready_scanner() -> (Scanner, ChannelId) {
    let mut scanner = Scanner::default();
    scanner.mount();
    let channel = scanner.channel().unwrap();
    scanner.on_channel(ChannelEvent::Opened { channel });
    scanner.on_camera_permission(true);
    scanner.on_camera_ready();
    (scanner, channel)
}

pub fn result_message(channel: ChannelId, names: &[&str]) -> ChannelEvent {
    let people: Vec<serde_json::Value> = names
        .iter()
        .map(|n| serde_json::json!({ "person_name": n, "confidence": "90.00%" }))
        .collect();
    ChannelEvent::Message {
        channel,
        text: serde_json::json!({
            "type": "face_detection_result",
            "identified_people": people,
            "message": "Face identification completed",
        })
        .to_string(),
    }
}

pub fn captured_frame(effects: &[Effect]) -> Option<FrameId> {
    effects.iter().find_map(|e| match e {
        Effect::Capture { frame } => Some(*frame),
        _ => None,
    })
}

pub fn sent_images(effects: &[Effect]) -> usize {
    effects
        .iter()
        .filter(|e| {
            matches!(
                e,
                Effect::Send {
                    message: ClientMessage::Image { .. },
                    ..
                }
            )
        })
        .count()
}

pub fn announced(effects: &[Effect]) -> Vec<String> {
    effects
        .iter()
        .filter_map(|e| match e {
            Effect::Announce { name } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

pub fn ms(base: Instant, millis: u64) -> Instant {
    base + Duration::from_millis(millis)
}
