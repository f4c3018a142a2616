//! opus-works - resolve classical work hierarchies for release tracks
//!
//! Reads a JSON array of tracks, looks up their works on MusicBrainz and
//! prints each release's per-track annotations as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use opus_common::config::{load_toml_config, ConfigFileResolver};
use opus_common::logging::init_tracing;
use opus_works::{MusicBrainzWorkClient, TomlConfig, TrackInput, WorkGraphCache, WorkPartsProcessor};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Command-line arguments for opus-works
#[derive(Parser, Debug)]
#[command(name = "opus-works")]
#[command(about = "Resolve classical work hierarchies for release tracks")]
#[command(version)]
struct Args {
    /// Config file (overrides OPUS_CONFIG and the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level; RUST_LOG still takes precedence
    #[arg(short, long, env = "OPUS_LOG_LEVEL")]
    log_level: Option<String>,

    /// JSON file holding an array of tracks
    input: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = ConfigFileResolver::new(args.config.clone()).resolve();
    let mut config: TomlConfig =
        load_toml_config(config_path.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    init_tracing(&config.logging)?;

    info!("Starting opus-works v{}", env!("CARGO_PKG_VERSION"));

    let content = std::fs::read_to_string(&args.input)
        .with_context(|| format!("Failed to read {}", args.input.display()))?;
    let tracks: Vec<TrackInput> =
        serde_json::from_str(&content).context("Input is not a JSON array of tracks")?;

    let client = MusicBrainzWorkClient::new(&config.musicbrainz)
        .context("Failed to build MusicBrainz client")?;
    let cache = Arc::new(WorkGraphCache::new());
    let (processor, mut results) = WorkPartsProcessor::new(config.works, Arc::new(client), cache);

    let releases: BTreeSet<&str> = tracks.iter().map(|t| t.release_id.as_str()).collect();
    info!(tracks = tracks.len(), releases = releases.len(), "Submitting tracks");
    let release_count = releases.len();
    for track in tracks.iter().cloned() {
        processor.add_track(track);
    }

    processor.wait_idle().await;
    for release in processor.pending_releases() {
        warn!(release = %release, "Release still incomplete after all lookups finished");
        processor.abandon_release(&release);
    }

    let mut output = Vec::with_capacity(release_count);
    while let Ok(works) = results.try_recv() {
        output.push(works.to_json());
    }
    info!(releases = output.len(), "Done");
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
