//! One-shot REST commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};

use memlens::api::{ApiClient, Frequency, NewUser, ProfileUpdate, Reminder, ReminderRequest};
use memlens::config::MemlensConfig;

/// Memories shown in the export summary.
const EXPORT_PREVIEW: usize = 20;

#[derive(Args)]
pub struct RegisterArgs {
    #[arg(long)]
    email: String,
    #[arg(long)]
    name: String,
    #[arg(long)]
    age: u32,
    #[arg(long)]
    gender: String,
    #[arg(long, default_value = "en")]
    language: String,
}

#[derive(Args)]
pub struct ProfileArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    age: Option<u32>,
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    language: Option<String>,
    #[arg(long)]
    stage: Option<u32>,
}

#[derive(Args)]
pub struct ReminderArgs {
    title: String,
    /// When it is due, RFC 3339 (2026-03-01T08:30:00+01:00)
    #[arg(long, value_parser = parse_when)]
    at: DateTime<Utc>,
    #[arg(long, default_value = "daily")]
    frequency: Frequency,
    #[arg(long, default_value = "")]
    description: String,
}

impl From<ReminderArgs> for ReminderRequest {
    fn from(args: ReminderArgs) -> Self {
        Self {
            title: args.title,
            description: args.description,
            time: args.at,
            frequency: args.frequency,
        }
    }
}

#[derive(Subcommand)]
pub enum ReminderAction {
    /// List your reminders
    List {
        /// Use the backend's catch-all listing
        #[arg(long)]
        all: bool,
    },
    Add(ReminderArgs),
    /// Replace a reminder
    Update {
        id: i64,
        #[command(flatten)]
        reminder: ReminderArgs,
    },
    Delete {
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum WallpaperAction {
    Upload {
        image: PathBuf,
        #[arg(long, default_value = "")]
        description: String,
    },
    /// Show a random wallpaper
    Random,
}

fn parse_when(s: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("expected an RFC 3339 time: {e}"))
}

pub async fn register(config: &MemlensConfig, args: RegisterArgs) -> Result<()> {
    let client = ApiClient::from_config(config)?;
    let user = NewUser {
        firebase_uid: config.auth.token.clone(),
        email: args.email,
        name: args.name,
        age: args.age,
        gender: args.gender,
        language: args.language,
    };
    let response = client.register_user(&user).await.context("registration failed")?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

pub async fn profile(config: &MemlensConfig, args: ProfileArgs) -> Result<()> {
    let client = ApiClient::from_config(config)?;
    let update = ProfileUpdate {
        name: args.name,
        age: args.age,
        gender: args.gender,
        language: args.language,
        stage: args.stage,
    };
    let profile = if update.is_empty() {
        client.get_profile().await.context("failed to fetch profile")?
    } else {
        client
            .update_profile(&update)
            .await
            .context("failed to update profile")?
    };
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

pub async fn register_face(config: &MemlensConfig, name: &str, image: &Path) -> Result<()> {
    anyhow::ensure!(!name.trim().is_empty(), "person name must not be empty");
    let client = ApiClient::from_config(config)?;
    let response = client
        .register_face(name.trim(), image)
        .await
        .with_context(|| format!("failed to register face for {name}"))?;

    let message = response
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("Face registered");
    println!("{message}");
    Ok(())
}

pub async fn reminders(config: &MemlensConfig, action: ReminderAction) -> Result<()> {
    let client = ApiClient::from_config(config)?;
    match action {
        ReminderAction::List { all } => {
            let reminders = if all {
                client.get_all_reminders().await
            } else {
                client.list_reminders().await
            }
            .context("failed to list reminders")?;
            if reminders.is_empty() {
                println!("No reminders.");
            }
            for reminder in &reminders {
                print_reminder(reminder);
            }
        }
        ReminderAction::Add(args) => {
            let created = client
                .create_reminder(&args.into())
                .await
                .context("failed to create reminder")?;
            print_reminder(&created);
        }
        ReminderAction::Update { id, reminder } => {
            let updated = client
                .update_reminder(id, &reminder.into())
                .await
                .with_context(|| format!("failed to update reminder {id}"))?;
            print_reminder(&updated);
        }
        ReminderAction::Delete { id } => {
            client
                .delete_reminder(id)
                .await
                .with_context(|| format!("failed to delete reminder {id}"))?;
            println!("Deleted reminder {id}");
        }
    }
    Ok(())
}

fn print_reminder(reminder: &Reminder) {
    println!(
        "#{:<5} {}  {:<8} {}",
        reminder.id,
        reminder.time.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M"),
        reminder.frequency.as_str(),
        reminder.title
    );
    if !reminder.description.is_empty() {
        println!("       {}", reminder.description);
    }
}

/// Print the analysed memory export, or the raw audio memory list.
pub async fn memories(config: &MemlensConfig, raw: bool) -> Result<()> {
    let client = ApiClient::from_config(config)?;
    if raw {
        let list = client
            .list_audio_memories()
            .await
            .context("failed to list audio memories")?;
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(());
    }

    let records = client
        .export_memories()
        .await
        .context("failed to export memories")?;
    println!("{} memories", records.len());
    for record in records.iter().take(EXPORT_PREVIEW) {
        let when = record
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "unknown time".into());
        let label = if record.sentiment_label.is_empty() {
            "neutral"
        } else {
            record.sentiment_label.as_str()
        };
        println!("  {when}  [{label}] {}", record.input_text);
        if !record.location_indicators.is_empty() {
            println!("      location: {}", record.location_indicators);
        }
    }
    Ok(())
}

pub async fn wallpaper(config: &MemlensConfig, action: WallpaperAction) -> Result<()> {
    let client = ApiClient::from_config(config)?;
    match action {
        WallpaperAction::Upload { image, description } => {
            let stored = client
                .upload_wallpaper(&image, &description)
                .await
                .with_context(|| format!("failed to upload {}", image.display()))?;
            println!("Uploaded wallpaper #{} ({})", stored.id, stored.image);
        }
        WallpaperAction::Random => match client.get_random_wallpaper().await? {
            Some(wallpaper) => println!("{}  {}", wallpaper.image_url, wallpaper.description),
            None => println!("No wallpapers available."),
        },
    }
    Ok(())
}
