use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod error;
mod filesystem;
mod services;
mod settings;

use error::AppError;
use services::{commands, Pipeline};
use settings::{UploaderSettings, SETTINGS_FILE_NAME};

/// Reliable delivery of photobooth captures to the gallery backend
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Settings file (default: uploader.toml in the data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the queue (overrides the settings file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload queued sessions until interrupted
    Run,
    /// Queue a capture session (files or directories of media files)
    Enqueue {
        #[arg(long)]
        event: String,
        #[arg(long, default_value_t = 0)]
        strip: u32,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Show queued sessions and failed uploads
    Status,
    /// Put failed uploads back in line
    Retry,
    /// Remove a session from the queue, or all of them
    Purge {
        session_id: Option<String>,
        #[arg(long, conflicts_with = "session_id")]
        all: bool,
    },
    /// List events known to the booth
    Events,
    /// Save the QR code linking to a session's gallery
    Qr {
        session_id: String,
        #[arg(long, short)]
        output: PathBuf,
    },
    /// E-mail a session's gallery link
    Email {
        session_id: String,
        address: String,
        #[arg(long)]
        message: Option<String>,
    },
    /// Write a settings file with the current values
    Init,
}

fn init_logging() {
    #[cfg(target_os = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Info)
            .with_tag("fotox-uploader"),
    );

    #[cfg(not(target_os = "android"))]
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        log::error!("{}", e);
        eprintln!("{}", e.user_message());
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), AppError> {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| filesystem::get_app_data_dir().join(SETTINGS_FILE_NAME));
    let settings = UploaderSettings::load(&config_path)?.with_env();
    let data_dir = cli
        .data_dir
        .clone()
        .or_else(|| settings.data_dir.clone())
        .unwrap_or_else(filesystem::get_app_data_dir);
    log::debug!(
        "Settings from {}, data in {}",
        config_path.display(),
        data_dir.display()
    );

    if let Command::Init = cli.command {
        settings.save(&config_path)?;
        println!("Wrote {}", config_path.display());
        return Ok(());
    }

    let pipeline = Pipeline::build(&settings, &data_dir)?;
    match cli.command {
        Command::Run => commands::run_worker(pipeline).await?,
        Command::Enqueue {
            event,
            strip,
            files,
        } => {
            let session_id = commands::enqueue_capture(&pipeline, &event, &files, strip).await?;
            println!("{}", session_id);
        }
        Command::Status => commands::print_status(&pipeline).await?,
        Command::Retry => {
            let count = commands::retry_failed(&pipeline).await?;
            println!("Re-queued {} uploads", count);
        }
        Command::Purge { session_id, all } => {
            if session_id.is_none() && !all {
                return Err(AppError::Validation(
                    "name a session or pass --all".to_string(),
                ));
            }
            let removed = commands::purge(&pipeline, session_id.as_deref()).await?;
            println!("Removed {} sessions", removed);
        }
        Command::Events => commands::print_events(&pipeline).await?,
        Command::Qr { session_id, output } => {
            commands::save_session_qr(&pipeline, &session_id, &output).await?
        }
        Command::Email {
            session_id,
            address,
            message,
        } => {
            commands::email_session(&pipeline, &session_id, &address, message).await?;
            println!("Sent gallery link to {}", address);
        }
        Command::Init => {}
    }
    Ok(())
}
