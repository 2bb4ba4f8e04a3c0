use anyhow::Result;
use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use channel_harvester::cli::{Cli, Commands};
use channel_harvester::config::Config;
use channel_harvester::pipeline::{HarvestOptions, HarvestPipeline};
use channel_harvester::providers::captions::CaptionTrackClient;
use channel_harvester::providers::youtube::DataApiClient;
use channel_harvester::providers::{CaptionSource, CommentsProvider, MetadataProvider};
use channel_harvester::store::{self, Ledger, OutputStores};
use channel_harvester::transcribe::whisper::WhisperEngine;
use channel_harvester::transcribe::{SpeechEngine, TranscriptResolver};
use channel_harvester::utils;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let default_filter = if cli.verbose {
        "channel_harvester=debug,harvester=debug"
    } else {
        "channel_harvester=info,harvester=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Commands::Harvest {
            channels,
            output_dir,
            lookback_years,
            skip_transcripts,
            skip_comments,
            captions_only,
            workers,
            whisper_model,
            api_key,
        } => {
            run_harvest(HarvestArgs {
                channels,
                output_dir,
                lookback_years,
                skip_transcripts,
                skip_comments,
                captions_only,
                workers,
                whisper_model,
                api_key,
            })
            .await?;
        }
        Commands::FindChannel { queries, api_key } => {
            find_channels(queries, api_key).await?;
        }
        Commands::Config { show } => {
            let config = Config::load().await?;
            if show {
                config.display();
            } else {
                config.save().await?;
                println!("Config file: {}", Config::config_path()?.display());
                println!("Edit it to set defaults (API key, output directory, whisper model).");
            }
        }
    }

    Ok(())
}

struct HarvestArgs {
    channels: Vec<String>,
    output_dir: Option<PathBuf>,
    lookback_years: Option<u32>,
    skip_transcripts: bool,
    skip_comments: bool,
    captions_only: bool,
    workers: Option<usize>,
    whisper_model: Option<String>,
    api_key: Option<String>,
}

async fn run_harvest(args: HarvestArgs) -> Result<()> {
    let mut config = Config::load().await?;
    if let Some(dir) = args.output_dir {
        config.harvest.output_dir = dir;
    }
    if let Some(years) = args.lookback_years {
        config.harvest.lookback_years = years;
    }
    if let Some(workers) = args.workers {
        config.harvest.workers = workers;
    }
    if let Some(model) = args.whisper_model {
        config.transcription.model = model;
    }
    if args.captions_only {
        config.transcription.local_fallback = false;
    }
    config.validate()?;

    let api_key = config.resolve_api_key(args.api_key)?;

    // Check for required external tools (non-fatal: they may still resolve at
    // call time, e.g. inside a container image)
    let whisper = config
        .transcription
        .local_fallback
        .then_some(config.transcription.whisper_path.as_str());
    let missing = utils::check_dependencies(&config.transcription.yt_dlp_path, whisper).await;
    if !missing.is_empty() {
        eprintln!("⚠️  Dependency check warnings:");
        for dep in missing {
            eprintln!("   • {}", dep);
        }
        eprintln!("   (Continuing anyway - tools may be available)");
    }

    let timeout = Duration::from_secs(config.api.request_timeout_secs);
    let data_api = Arc::new(DataApiClient::new(api_key, timeout)?);
    let captions: Arc<dyn CaptionSource> = Arc::new(CaptionTrackClient::new(
        config.transcription.yt_dlp_path.as_str(),
        timeout,
    )?);
    let engine: Option<Arc<dyn SpeechEngine>> = if config.transcription.local_fallback {
        Some(Arc::new(WhisperEngine::new(
            config.transcription.whisper_path.as_str(),
            config.transcription.yt_dlp_path.as_str(),
            config.transcription.model.as_str(),
            config.transcription.max_concurrent_jobs,
        )))
    } else {
        None
    };
    let resolver = TranscriptResolver::new(captions, engine);

    let stores = Arc::new(OutputStores::open(&config.harvest.output_dir).await?);
    let ledger = Arc::new(Ledger::open(store::ledger_path(&config.harvest.output_dir)).await?);

    let options = HarvestOptions {
        lookback_days: i64::from(config.harvest.lookback_years) * 365,
        skip_transcripts: args.skip_transcripts,
        skip_comments: args.skip_comments,
        workers: config.harvest.workers,
        caption_delay: Duration::from_millis(config.harvest.caption_delay_ms),
    };
    let pipeline = HarvestPipeline::new(
        Arc::clone(&data_api) as Arc<dyn MetadataProvider>,
        resolver,
        data_api as Arc<dyn CommentsProvider>,
        ledger,
        stores,
        options,
    );

    let started = Instant::now();
    let mut total_failures = 0;
    let channel_count = args.channels.len();
    for (index, channel_id) in args.channels.iter().enumerate() {
        println!(
            "{}",
            style(format!(
                "Processing channel {}/{}: {}",
                index + 1,
                channel_count,
                channel_id
            ))
            .bold()
        );
        let stats = pipeline.process_channel(channel_id).await;
        println!("{stats}");
        total_failures += stats.failures();
    }

    println!(
        "\n{} in {}",
        style("Harvest complete").green().bold(),
        utils::format_duration(started.elapsed().as_secs_f64())
    );
    if total_failures > 0 {
        println!(
            "{}",
            style(format!(
                "{total_failures} stage attempts failed transiently - rerun to retry just those"
            ))
            .yellow()
        );
    }
    println!("Output files in {}:", config.harvest.output_dir.display());
    println!("  - videos.jsonl");
    println!("  - transcripts.jsonl");
    println!("  - comments.jsonl");

    Ok(())
}

async fn find_channels(queries: Vec<String>, api_key: Option<String>) -> Result<()> {
    let config = Config::load().await?;
    let api_key = config.resolve_api_key(api_key)?;
    let client = DataApiClient::new(
        api_key,
        Duration::from_secs(config.api.request_timeout_secs),
    )?;

    for query in &queries {
        println!("\n{}", style(format!("'{query}'")).bold());
        match client.search_channels(query).await {
            Ok(matches) if matches.is_empty() => {
                println!("  No results found");
                if let Ok(Some(id)) = client.channel_id_for_username(query).await {
                    println!("  Legacy username match: {id}");
                }
            }
            Ok(matches) => {
                for (index, found) in matches.iter().enumerate() {
                    println!("  {}. {}", index + 1, style(&found.title).green());
                    println!("     ID: {}", found.channel_id);
                    if !found.description.is_empty() {
                        let description: String = found.description.chars().take(100).collect();
                        let ellipsis = if found.description.chars().count() > 100 {
                            "..."
                        } else {
                            ""
                        };
                        println!("     Description: {description}{ellipsis}");
                    }
                }
            }
            Err(err) => eprintln!("  Search failed: {err}"),
        }
    }

    Ok(())
}
