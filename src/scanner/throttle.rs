//! Capture gate: decides on each scan tick whether a frame may be captured.

use std::time::{Duration, Instant};

/// Snapshot of the conditions the gate checks, taken by the scanner on each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateInputs {
    pub scanning: bool,
    pub connected: bool,
    pub processing: bool,
    pub camera_ready: bool,
    pub foreground: bool,
}

impl GateInputs {
    fn all_hold(&self) -> bool {
        self.scanning && self.connected && !self.processing && self.camera_ready && self.foreground
    }
}

/// Enforces a minimum spacing between accepted captures.
#[derive(Debug, Clone)]
pub struct CaptureThrottle {
    interval: Duration,
    last_capture: Option<Instant>,
}

impl CaptureThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_capture: None,
        }
    }

    /// Restart the spacing window from `now`, so the first capture of a scan
    /// session happens no earlier than one interval after it starts.
    pub fn rebase(&mut self, now: Instant) {
        self.last_capture = Some(now);
    }

    pub fn last_capture(&self) -> Option<Instant> {
        self.last_capture
    }

    /// Returns true and records `now` as the new baseline when every gate
    /// condition holds and the interval has elapsed.
    pub fn try_accept(&mut self, inputs: GateInputs, now: Instant) -> bool {
        if !inputs.all_hold() {
            return false;
        }
        if let Some(last) = self.last_capture {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.last_capture = Some(now);
        true
    }
}
