use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveTime;
use clap::Args;

use memlens::api::ApiClient;
use memlens::config::MemlensConfig;
use memlens::listening::{
    CommandRecorder, CrontabRegistry, JobOutcome, JsonSettingsStore, ListeningJob, SettingsStore,
};

#[derive(Args)]
pub struct SetArgs {
    /// Window start, HH:MM
    #[arg(long, value_parser = parse_time)]
    start: Option<NaiveTime>,
    /// Window end, HH:MM (earlier than start means overnight)
    #[arg(long, value_parser = parse_time)]
    end: Option<NaiveTime>,
    /// Segment length in minutes
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=60))]
    segment: Option<u32>,
    #[arg(long)]
    environment: Option<String>,
    #[arg(long, conflicts_with = "disable")]
    enable: bool,
    #[arg(long)]
    disable: bool,
}

fn parse_time(s: &str) -> std::result::Result<NaiveTime, String> {
    NaiveTime::parse_from_str(s, "%H:%M").map_err(|e| format!("expected HH:MM: {e}"))
}

fn store(config: &MemlensConfig) -> JsonSettingsStore {
    JsonSettingsStore::new(config.resolved_settings_path())
}

pub fn status(config: &MemlensConfig) -> Result<()> {
    let store = store(config);
    let settings = store.load()?.unwrap_or_default();
    let now = chrono::Local::now().naive_local();
    let window = settings.window();

    println!("Listening Settings");
    println!("{}", "=".repeat(40));
    println!("  File:         {}", store.path().display());
    println!("  Enabled:      {}", settings.enabled);
    println!(
        "  Window:       {} - {}{}",
        settings.start_time.format("%H:%M"),
        settings.end_time.format("%H:%M"),
        if window.is_overnight() { " (overnight)" } else { "" }
    );
    println!("  Segment:      {} min", settings.segment_duration);
    println!("  Environment:  {}", settings.environment);
    println!("  In window:    {}", window.contains(now.time()));
    match settings.last_run {
        Some(last) => println!("  Last run:     {last}"),
        None => println!("  Last run:     never"),
    }
    Ok(())
}

pub fn set(config: &MemlensConfig, args: SetArgs) -> Result<()> {
    let store = store(config);
    let mut settings = store.load()?.unwrap_or_default();

    if let Some(start) = args.start {
        settings.start_time = start;
    }
    if let Some(end) = args.end {
        settings.end_time = end;
    }
    if let Some(segment) = args.segment {
        settings.segment_duration = segment;
    }
    if let Some(environment) = args.environment {
        settings.environment = environment;
    }
    if args.enable {
        settings.enabled = true;
    }
    if args.disable {
        settings.enabled = false;
    }

    store.save(&settings)?;
    println!("Saved listening settings to {}", store.path().display());
    Ok(())
}

/// One background invocation: maybe record, then upload what was recorded.
pub async fn tick(config: &MemlensConfig, upload: bool) -> Result<()> {
    let recorder = CommandRecorder::new(
        config.listening.recorder_command.clone(),
        config.listening.recorder_args.clone(),
        config.resolved_segments_dir(),
    );
    let job = ListeningJob::new(Arc::new(store(config)), Arc::new(recorder));
    let now = chrono::Local::now().naive_local();

    // recording blocks for the whole segment
    let outcome = tokio::task::spawn_blocking(move || job.run(now))
        .await
        .context("listening job panicked")?;

    match outcome {
        JobOutcome::NoData => println!("no data"),
        JobOutcome::Failed(reason) => anyhow::bail!("listening job failed: {reason}"),
        JobOutcome::NewData(segment) => {
            println!("recorded {}", segment.path.display());
            if upload {
                let client = ApiClient::from_config(config)?;
                client
                    .upload_audio_memory(&segment.path, &segment.environment)
                    .await
                    .context("failed to upload segment")?;
                println!("uploaded");
            }
        }
    }
    Ok(())
}

pub fn install() -> Result<()> {
    let program = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "memlens".into());
    let registry = CrontabRegistry::new(std::io::stdout(), program);
    ListeningJob::register(&registry)?;
    Ok(())
}
