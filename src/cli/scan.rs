//! CLI `scan` command: interactive live scanning on the terminal.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use memlens::config::MemlensConfig;
use memlens::device::{CommandSpeaker, DirectoryCamera, LogNotifier, LogSpeaker, Speaker};
use memlens::runtime::{Command, ScanHandle, ScanRuntime};
use memlens::scanner::{AppState, ScanSnapshot};

const HELP: &str = "commands: s = start/stop, c = continue, r = retry, d = disconnect, b = background, f = foreground, q = quit";

pub async fn scan(config: MemlensConfig, frames: Option<PathBuf>) -> Result<()> {
    anyhow::ensure!(
        !config.auth.token.is_empty(),
        "no user token configured; set [auth] token or MEMLENS_TOKEN"
    );
    config.channel_url()?;

    let frames_dir = frames.unwrap_or_else(|| config.resolved_frames_dir());
    let camera = Arc::new(DirectoryCamera::new(frames_dir));
    println!("frames: {}", camera.dir().display());
    let speaker: Arc<dyn Speaker> = if config.speech.command.is_empty() {
        Arc::new(LogSpeaker)
    } else {
        Arc::new(CommandSpeaker::new(
            config.speech.command.clone(),
            config.speech.args.clone(),
        ))
    };

    let (runtime, handle) = ScanRuntime::new(Arc::new(config), camera, speaker, Arc::new(LogNotifier));
    let runtime_task = tokio::spawn(runtime.run());
    let status_task = tokio::spawn(print_status(handle.clone()));

    println!("{HELP}");
    let result = read_commands(&handle).await;

    // the runtime may already be gone; shutdown is best effort
    let _ = handle.shutdown().await;
    runtime_task.await.context("scan runtime panicked")??;
    status_task.abort();
    result
}

async fn read_commands(handle: &ScanHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            return Ok(());
        };
        let command = match line.trim() {
            "" => continue,
            "s" => Command::ToggleScan,
            "c" => Command::Continue,
            "r" => Command::Retry,
            "d" => Command::Disconnect,
            "b" => Command::AppState(AppState::Background),
            "f" => Command::AppState(AppState::Active),
            "q" => return Ok(()),
            other => {
                println!("unknown command {other:?}; {HELP}");
                continue;
            }
        };
        handle.send(command).await?;
    }
}

async fn print_status(handle: ScanHandle) {
    let mut snapshots = handle.subscribe();
    let mut last = String::new();
    loop {
        let line = status_text(&snapshots.borrow_and_update());
        if line != last {
            println!("{line}");
            last = line;
        }
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

fn status_text(snapshot: &ScanSnapshot) -> String {
    let mut line = format!("[{}] {}", snapshot.connection_label, snapshot.status_line);
    if snapshot.retry_attempts > 0 {
        line.push_str(&format!(" (retry {})", snapshot.retry_attempts));
    }
    if snapshot.detected_name.is_some() {
        line.push_str(" (c to continue)");
    }
    line
}
