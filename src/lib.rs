//! Channel Harvester - A Rust CLI tool for harvesting channel data from YouTube
//!
//! This library collects public metadata, transcripts, and comments for a set
//! of channels into append-only line-delimited JSON files. The orchestration
//! core is idempotent and resumable: a durable ledger tracks which videos
//! completed which stage, transient upstream failures retry on the next run,
//! and failures stay isolated per video and per stage.

pub mod cli;
pub mod config;
pub mod pipeline;
pub mod providers;
pub mod records;
pub mod store;
pub mod transcribe;
pub mod utils;

pub use cli::{Cli, Commands};
pub use config::Config;
pub use pipeline::{ChannelStats, HarvestOptions, HarvestPipeline};
pub use providers::ProviderError;
pub use transcribe::TranscriptResolver;

/// Result type used throughout the library
pub type Result<T> = anyhow::Result<T>;
