use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use media_catalog::config::Config;
use media_catalog::state::data::Album;
use media_catalog::state::job::{JobController, ScanStatus, StartOutcome};
use media_catalog::state::library::Library;

#[derive(Parser)]
#[command(name = "media-catalog", version, about = "Keep a catalog of a photo and video tree")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the catalog database location
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    /// Override the thumbnail directory
    #[arg(long, global = true)]
    thumbnails: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Reconcile the catalog with everything under DIR
    Scan { dir: PathBuf },

    /// Print catalog entries, newest first
    List {
        /// Only entries captured on this day (YYYY-MM-DD)
        #[arg(long, conflicts_with = "album")]
        date: Option<NaiveDate>,

        /// all, camera, screenshot, web or video
        #[arg(long)]
        album: Option<Album>,
    },

    /// Print one entry and where its thumbnail lives
    Show { identity: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&config_path)?;
    if let Some(database) = cli.database {
        config.database_path = database;
    }
    if let Some(thumbnails) = cli.thumbnails {
        config.thumbnail_dir = thumbnails;
    }

    match cli.command {
        Command::Scan { dir } => scan(&config, dir).await,
        Command::List { date, album } => list(&config, date, album),
        Command::Show { identity } => show(&config, &identity),
    }
}

async fn scan(config: &Config, dir: PathBuf) -> Result<()> {
    let jobs = JobController::new(config.scan_environment()?);

    if let StartOutcome::AlreadyRunning { root, .. } = jobs.start_scan(&dir) {
        bail!("a scan of {} is already running", root.display());
    }
    info!(root = %dir.display(), database = %config.database_path.display(), "scan requested");

    let status = jobs.wait_until_finished().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if let ScanStatus::Failed { error, .. } = status {
        bail!("scan failed: {}", error);
    }
    Ok(())
}

fn list(config: &Config, date: Option<NaiveDate>, album: Option<Album>) -> Result<()> {
    let library = open_library(config)?;

    let entries = match (date, album) {
        (Some(date), _) => library.list_by_capture_date(date)?,
        (None, Some(album)) => library.list_album(album)?,
        (None, None) => library.list_all()?,
    };

    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

fn show(config: &Config, identity: &str) -> Result<()> {
    let library = open_library(config)?;
    let Some(entry) = library.get_by_identity(identity)? else {
        bail!("no catalog entry with identity {}", identity);
    };

    let thumbnails = config.thumbnail_store()?;
    let thumbnail_path = entry
        .thumbnail_ref
        .as_deref()
        .and_then(|reference| thumbnails.resolve(reference));

    let output = json!({
        "entry": entry,
        "thumbnail_path": thumbnail_path,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn open_library(config: &Config) -> Result<Library> {
    Library::open(&config.database_path)
        .with_context(|| format!("could not open catalog at {}", config.database_path.display()))
}
