//! The background listening job.
//!
//! The host scheduler wakes the job on a coarse, best-effort cadence. Each
//! invocation checks the listening window and records at most one segment.
//! Windows slept through entirely are reported but never caught up.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDateTime;

use super::{ListeningSettings, SettingsStore};

pub const LISTENING_JOB_NAME: &str = "memlens-background-recording";

/// What the host scheduler needs to know to run the job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackgroundJob {
    pub name: &'static str,
    pub minimum_interval: Duration,
    pub stop_on_terminate: bool,
    pub start_on_boot: bool,
}

/// Host scheduled-task facility.
pub trait JobRegistry {
    fn register(&self, job: &BackgroundJob) -> Result<()>;
}

/// Records one audio segment of the requested length, returning its path.
pub trait SegmentRecorder: Send + Sync {
    fn record(&self, duration: Duration, environment: &str) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSegment {
    pub path: PathBuf,
    pub environment: String,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    NoData,
    NewData(RecordedSegment),
    Failed(String),
}

pub struct ListeningJob {
    store: Arc<dyn SettingsStore>,
    recorder: Arc<dyn SegmentRecorder>,
}

impl ListeningJob {
    pub fn new(store: Arc<dyn SettingsStore>, recorder: Arc<dyn SegmentRecorder>) -> Self {
        Self { store, recorder }
    }

    pub fn descriptor() -> BackgroundJob {
        BackgroundJob {
            name: LISTENING_JOB_NAME,
            minimum_interval: Duration::from_secs(60),
            stop_on_terminate: false,
            start_on_boot: true,
        }
    }

    /// Register the job with the host scheduler. Called once at start.
    pub fn register(registry: &dyn JobRegistry) -> Result<()> {
        let job = Self::descriptor();
        registry.register(&job)?;
        tracing::info!(job = job.name, "background job registered");
        Ok(())
    }

    /// One scheduler invocation. Never panics; every failure becomes
    /// [`JobOutcome::Failed`].
    pub fn run(&self, now: NaiveDateTime) -> JobOutcome {
        let mut settings = match self.store.load() {
            Ok(settings) => settings.unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load listening settings");
                return JobOutcome::Failed(format!("settings: {e:#}"));
            }
        };

        if !settings.enabled {
            tracing::debug!("listening disabled");
            return JobOutcome::NoData;
        }

        let window = settings.window();
        if let Some(previous) = settings.last_run {
            if window.fully_elapsed_between(previous, now) {
                tracing::warn!(
                    %previous,
                    %now,
                    "listening window passed without a run; not catching up"
                );
            }
        }
        self.mark_run(&mut settings, now);

        if !window.contains(now.time()) {
            tracing::debug!(time = %now.time(), "outside listening window");
            return JobOutcome::NoData;
        }

        let duration = settings.segment_length();
        match self.recorder.record(duration, &settings.environment) {
            Ok(path) => {
                tracing::info!(path = %path.display(), "segment recorded");
                JobOutcome::NewData(RecordedSegment {
                    path,
                    environment: settings.environment,
                    duration,
                })
            }
            Err(e) => {
                tracing::warn!(error = %e, "segment recording failed");
                JobOutcome::Failed(format!("recording: {e:#}"))
            }
        }
    }

    fn mark_run(&self, settings: &mut ListeningSettings, now: NaiveDateTime) {
        settings.last_run = Some(now);
        if let Err(e) = self.store.save(settings) {
            tracing::warn!(error = %e, "failed to record last run time");
        }
    }
}

/// Registers jobs by printing a crontab entry that runs `listen tick` on the
/// job's minimum interval.
pub struct CrontabRegistry<W> {
    out: Mutex<W>,
    program: String,
}

impl<W: Write> CrontabRegistry<W> {
    pub fn new(out: W, program: impl Into<String>) -> Self {
        Self {
            out: Mutex::new(out),
            program: program.into(),
        }
    }

    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<W: Write> JobRegistry for CrontabRegistry<W> {
    fn register(&self, job: &BackgroundJob) -> Result<()> {
        let minutes = (job.minimum_interval.as_secs() / 60).clamp(1, 59);
        let mut out = self
            .out
            .lock()
            .map_err(|_| anyhow::anyhow!("crontab writer poisoned"))?;
        writeln!(out, "# {}", job.name)?;
        if job.start_on_boot {
            writeln!(out, "@reboot {} listen tick", self.program)?;
        }
        let schedule = if minutes == 1 {
            "*".to_string()
        } else {
            format!("*/{minutes}")
        };
        writeln!(out, "{schedule} * * * * {} listen tick", self.program)?;
        Ok(())
    }
}
