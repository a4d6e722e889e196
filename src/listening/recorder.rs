use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{bail, Context, Result};

use super::SegmentRecorder;

/// Records by running an external program (`arecord`, `sox`, ...) that writes
/// a WAV file and exits. `{seconds}` and `{output}` in the arguments are
/// replaced per segment.
pub struct CommandRecorder {
    program: String,
    args: Vec<String>,
    output_dir: PathBuf,
}

impl CommandRecorder {
    pub fn new(program: impl Into<String>, args: Vec<String>, output_dir: PathBuf) -> Self {
        Self {
            program: program.into(),
            args,
            output_dir,
        }
    }

    fn segment_path(&self) -> PathBuf {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        self.output_dir.join(format!("segment_{stamp}.wav"))
    }

    fn expand_args(&self, seconds: u64, output: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{seconds}", &seconds.to_string())
                    .replace("{output}", output)
            })
            .collect()
    }
}

impl SegmentRecorder for CommandRecorder {
    fn record(&self, duration: Duration, environment: &str) -> Result<PathBuf> {
        if self.program.is_empty() {
            bail!("no recorder configured (listening.recorder_command)");
        }
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("failed to create directory {}", self.output_dir.display())
        })?;

        let path = self.segment_path();
        let args = self.expand_args(duration.as_secs().max(1), &path.to_string_lossy());
        tracing::info!(program = %self.program, environment, secs = duration.as_secs(), "recording segment");
        let status = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .status()
            .with_context(|| format!("failed to start recorder {}", self.program))?;
        if !status.success() {
            bail!("recorder exited with {status}");
        }
        if !path.exists() {
            bail!("recorder produced no file at {}", path.display());
        }
        Ok(path)
    }
}
