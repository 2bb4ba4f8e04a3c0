use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "harvester",
    about = "Channel Harvester - Collect metadata, transcripts, and comments from YouTube channels",
    version,
    long_about = "A CLI tool that harvests public metadata, transcripts, and comments for a set of \
YouTube channels into append-only JSONL files. Runs are idempotent and resumable: a completion \
ledger tracks which videos finished which stage, so reruns only do the missing work."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable progress indicators
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Harvest one or more channels into the output directory
    Harvest {
        /// Channel IDs to harvest (e.g. UCyLqyEa45kWaSZlpvJvKhHA)
        #[arg(value_name = "CHANNEL_ID", required = true)]
        channels: Vec<String>,

        /// Output directory for the JSONL files and ledger
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// How many years back to harvest
        #[arg(long, value_name = "YEARS")]
        lookback_years: Option<u32>,

        /// Skip the transcript stage entirely
        #[arg(long)]
        skip_transcripts: bool,

        /// Skip the comment stage entirely
        #[arg(long)]
        skip_comments: bool,

        /// Never fall back to local transcription; caption misses become
        /// definitive "no transcript" outcomes
        #[arg(long)]
        captions_only: bool,

        /// Concurrent per-video workers
        #[arg(long, value_name = "COUNT")]
        workers: Option<usize>,

        /// Whisper model for the local fallback (tiny, base, small, medium, large)
        #[arg(long, value_name = "MODEL")]
        whisper_model: Option<String>,

        /// Data API key (falls back to the config file)
        #[arg(long, env = "YOUTUBE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Look up channel IDs from free-text names or handles
    FindChannel {
        /// Channel names or handles to search for
        #[arg(value_name = "QUERY", required = true)]
        queries: Vec<String>,

        /// Data API key (falls back to the config file)
        #[arg(long, env = "YOUTUBE_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
    },

    /// Inspect or initialize the configuration file
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,
    },
}
