//! Name announcements.

use std::process::{Child, Command, Stdio};
use std::sync::Mutex;

use anyhow::{Context, Result};

use super::Speaker;

/// Speaks by running an external synthesizer (`espeak`, `say`, ...) with the
/// text as its final argument. Only one utterance runs at a time.
pub struct CommandSpeaker {
    program: String,
    args: Vec<String>,
    current: Mutex<Option<Child>>,
}

impl CommandSpeaker {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            current: Mutex::new(None),
        }
    }
}

impl Speaker for CommandSpeaker {
    fn speak(&self, text: &str) -> Result<()> {
        self.stop();
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to start speech program {}", self.program))?;

        if let Ok(mut current) = self.current.lock() {
            *current = Some(child);
        }
        tracing::info!(text, "speaking");
        Ok(())
    }

    fn stop(&self) {
        let Ok(mut current) = self.current.lock() else {
            return;
        };
        if let Some(mut child) = current.take() {
            // already exited is fine
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl Drop for CommandSpeaker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Logs announcements instead of speaking them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSpeaker;

impl Speaker for LogSpeaker {
    fn speak(&self, text: &str) -> Result<()> {
        tracing::info!(text, "announce");
        Ok(())
    }

    fn stop(&self) {}
}
