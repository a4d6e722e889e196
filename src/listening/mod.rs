//! Passive listening: a daily time window during which the host records short
//! audio segments in the background.
//!
//! - [`ListeningSettings`] / [`ListeningWindow`]: what to record and when
//! - [`store`]: where settings live ([`SettingsStore`] is injected)
//! - [`job`]: the background job descriptor and the per-invocation logic

pub mod job;
pub mod recorder;
pub mod store;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use job::{
    BackgroundJob, CrontabRegistry, JobOutcome, JobRegistry, ListeningJob, RecordedSegment,
    SegmentRecorder,
};
pub use recorder::CommandRecorder;
pub use store::{JsonSettingsStore, SettingsStore};

pub const DEFAULT_ENVIRONMENT: &str = "Family Conversation";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListeningSettings {
    #[serde(rename = "isEnabled")]
    pub enabled: bool,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    /// Minutes per recorded segment.
    pub segment_duration: u32,
    pub environment: String,
    /// When the background job last ran. Written by the job itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<NaiveDateTime>,
}

impl Default for ListeningSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            start_time: NaiveTime::from_hms_opt(22, 0, 0).unwrap_or_default(),
            end_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap_or_default(),
            segment_duration: 1,
            environment: DEFAULT_ENVIRONMENT.into(),
            last_run: None,
        }
    }
}

impl ListeningSettings {
    pub fn window(&self) -> ListeningWindow {
        ListeningWindow::new(self.start_time, self.end_time)
    }

    pub fn segment_length(&self) -> Duration {
        Duration::from_secs(u64::from(self.segment_duration.max(1)) * 60)
    }
}

/// A daily window at minute resolution, inclusive at both ends. When `end`
/// is earlier than `start` the window runs overnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListeningWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

fn minute_of_day(time: NaiveTime) -> u32 {
    time.hour() * 60 + time.minute()
}

fn truncate_to_minute(time: NaiveTime) -> NaiveTime {
    time.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(time)
}

impl ListeningWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn is_overnight(&self) -> bool {
        minute_of_day(self.end) < minute_of_day(self.start)
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        let (start, end, now) = (
            minute_of_day(self.start),
            minute_of_day(self.end),
            minute_of_day(time),
        );
        if start <= end {
            (start..=end).contains(&now)
        } else {
            now >= start || now <= end
        }
    }

    /// True when at least one whole occurrence of the window opened after
    /// `from` and closed before `to`.
    pub fn fully_elapsed_between(&self, from: NaiveDateTime, to: NaiveDateTime) -> bool {
        if to <= from {
            return false;
        }
        if to - from >= TimeDelta::days(2) {
            return true;
        }
        let open_at = truncate_to_minute(self.start);
        let close_at = truncate_to_minute(self.end);
        let mut day = from.date().pred_opt().unwrap_or(from.date());
        while day <= to.date() {
            let open = day.and_time(open_at);
            let close_day = if self.is_overnight() {
                day.succ_opt().unwrap_or(day)
            } else {
                day
            };
            let close = close_day.and_time(close_at) + TimeDelta::minutes(1);
            if from < open && close <= to {
                return true;
            }
            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }
        false
    }
}
