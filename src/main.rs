mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use memlens::config::MemlensConfig;

#[derive(Parser)]
#[command(name = "memlens", version, about = "Live face-recognition scanning client")]
struct Cli {
    /// Config file (defaults to ~/.memlens/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the recognition service and scan interactively
    Scan {
        /// Directory of still frames to use as the camera
        #[arg(long)]
        frames: Option<PathBuf>,
    },
    /// Upload a reference photo for a person
    RegisterFace {
        name: String,
        image: PathBuf,
    },
    /// Create the backend account for the configured token
    Register(cli::backend::RegisterArgs),
    /// Print the user profile, or update it when any field is given
    Profile(cli::backend::ProfileArgs),
    /// Manage reminders
    Reminders {
        #[command(subcommand)]
        action: cli::backend::ReminderAction,
    },
    /// Show analysed audio memories
    Memories {
        /// Print the raw audio memory list instead of the export
        #[arg(long)]
        raw: bool,
    },
    /// Upload or fetch wallpapers
    Wallpaper {
        #[command(subcommand)]
        action: cli::backend::WallpaperAction,
    },
    /// Background listening window
    Listen {
        #[command(subcommand)]
        action: ListenAction,
    },
    /// Show the effective configuration
    Config,
}

#[derive(Subcommand)]
enum ListenAction {
    /// Show listening settings and whether the window is open now
    Status,
    /// Change listening settings
    Set(cli::listen::SetArgs),
    /// Run the background job once (invoked by the host scheduler)
    Tick {
        /// Keep the recorded segment instead of uploading it
        #[arg(long)]
        no_upload: bool,
    },
    /// Print the scheduler entry that runs the background job
    Install,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => MemlensConfig::load_from(path)?,
        None => MemlensConfig::load()?,
    };

    // stdout is for command output; logs go to stderr.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Scan { frames } => cli::scan::scan(config, frames).await?,
        Command::RegisterFace { name, image } => {
            cli::backend::register_face(&config, &name, &image).await?
        }
        Command::Register(args) => cli::backend::register(&config, args).await?,
        Command::Profile(args) => cli::backend::profile(&config, args).await?,
        Command::Reminders { action } => cli::backend::reminders(&config, action).await?,
        Command::Memories { raw } => cli::backend::memories(&config, raw).await?,
        Command::Wallpaper { action } => cli::backend::wallpaper(&config, action).await?,
        Command::Listen { action } => match action {
            ListenAction::Status => cli::listen::status(&config)?,
            ListenAction::Set(args) => cli::listen::set(&config, args)?,
            ListenAction::Tick { no_upload } => cli::listen::tick(&config, !no_upload).await?,
            ListenAction::Install => cli::listen::install()?,
        },
        Command::Config => cli::show_config(&config, cli.config.as_deref())?,
    }

    Ok(())
}
