//! Reelsmith CLI: assemble short videos from a visual track, a voice track
//! and optional overlay text.
//!
//! Usage:
//!   reelsmith assemble --visual <SRC> --audio <SRC>   Assemble one video
//!   reelsmith batch <JOBS.json>                       Assemble many videos
//!   reelsmith reconcile <VISUAL_SECS> <AUDIO_SECS>    Show a trim plan
//!   reelsmith probe <FILE>                            Inspect a media file
//!   reelsmith check                                   Check system capabilities
//!   reelsmith config                                  Print effective config

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use reelsmith_common::config::AppConfig;
use reelsmith_job_model::{OutputFormat, TrackKind};

mod commands;

#[derive(Parser)]
#[command(
    name = "reelsmith",
    about = "Assemble finished short videos from generated media",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to the user config location)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Assemble one video
    Assemble {
        /// Visual source: http(s) URL, file:// URL or path
        #[arg(long)]
        visual: String,

        /// Voice track source: http(s) URL, file:// URL or path
        #[arg(long)]
        audio: String,

        /// Text burned over the whole video
        #[arg(long)]
        subtitle: Option<String>,

        /// Output format: mp4-h264, mp4-h265, webm
        #[arg(long, default_value = "mp4-h264")]
        format: OutputFormat,

        /// Cap on output length (seconds)
        #[arg(long)]
        max_duration: Option<f64>,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the job summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// Assemble every request in a JSON array, concurrently
    Batch {
        /// File holding a JSON array of job requests
        jobs: PathBuf,

        /// Directory for finished videos
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },

    /// Compute the trim plan for two track durations
    Reconcile {
        /// Visual track duration (seconds)
        visual_secs: f64,

        /// Audio track duration (seconds)
        audio_secs: f64,

        /// Cap on output length (seconds)
        #[arg(long)]
        cap: Option<f64>,
    },

    /// Show duration and streams of a media file
    Probe {
        /// Path to the media file
        path: PathBuf,

        /// Track role to check the file against
        #[arg(long, value_enum, default_value = "visual")]
        kind: KindArg,
    },

    /// Check system capabilities
    Check,

    /// Print the effective configuration
    Config {
        /// Also write it to the user config location
        #[arg(long)]
        save: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Visual,
    Audio,
}

impl From<KindArg> for TrackKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Visual => TrackKind::Visual,
            KindArg::Audio => TrackKind::Audio,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => AppConfig::load(),
    };

    // Initialize logging
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    if cli.json_logs {
        config.logging.json = true;
    }
    reelsmith_common::logging::init_logging(&config.logging)?;

    match cli.command {
        Commands::Assemble {
            visual,
            audio,
            subtitle,
            format,
            max_duration,
            output,
            json,
        } => {
            commands::assemble::run(
                config,
                commands::assemble::AssembleArgs {
                    visual,
                    audio,
                    subtitle,
                    format,
                    max_duration,
                    output,
                    json,
                },
            )
            .await
        }
        Commands::Batch { jobs, out_dir } => commands::batch::run(config, jobs, out_dir).await,
        Commands::Reconcile {
            visual_secs,
            audio_secs,
            cap,
        } => commands::reconcile::run(&config, visual_secs, audio_secs, cap),
        Commands::Probe { path, kind } => commands::probe::run(&config, path, kind.into()).await,
        Commands::Check => commands::check::run(&config),
        Commands::Config { save } => commands::config::run(&config, save),
    }
}
