use anyhow::{bail, Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use track_loader::config::LoaderConfig;
use track_loader::credentials::{
    CredentialProvider, RefreshSettings, RefreshingCredentials, StaticToken,
};
use track_loader::error::LoaderError;
use track_loader::models::LoadMode;
use track_loader::orchestrator::run_with_progress;
use track_loader::progress::{format_duration, set_log_only};
use track_loader::spotify::SpotifyClient;
use track_loader::tags::{TagReader, TagSource};
use track_loader::transport::{Transport, UreqTransport};

#[derive(Parser)]
#[command(name = "track-loader")]
#[command(about = "Save the best Spotify match for every tagged track in a local music library")]
struct Args {
    /// Music directories to scan
    #[arg(required = true)]
    dirs: Vec<PathBuf>,

    #[arg(long, value_enum, default_value = "title")]
    mode: LoadMode,

    #[arg(long, env = "SPOTIFY_ACCESS_TOKEN", hide_env_values = true)]
    access_token: String,

    /// Enables background token refresh together with the client credentials
    #[arg(long, env = "SPOTIFY_REFRESH_TOKEN", hide_env_values = true)]
    refresh_token: Option<String>,

    #[arg(long, env = "SPOTIFY_CLIENT_ID")]
    client_id: Option<String>,

    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    client_secret: Option<String>,

    /// Remaining access token lifetime in seconds (0 = unknown)
    #[arg(long, env = "SPOTIFY_TOKEN_EXPIRES_IN", default_value = "0")]
    expires_in: u64,

    #[arg(long, env = "TRACK_LOADER_API_BASE", default_value = track_loader::config::DEFAULT_API_BASE)]
    api_base: String,

    /// Hide the spinner and log periodic progress lines instead
    #[arg(long)]
    log_only: bool,

    #[arg(long)]
    verbose: bool,

    /// Write run statistics as JSON
    #[arg(long)]
    stats_json: Option<PathBuf>,
}

fn build_credentials(
    args: &Args,
    config: &LoaderConfig,
    transport: &Arc<dyn Transport>,
) -> Arc<dyn CredentialProvider> {
    match (&args.refresh_token, &args.client_id, &args.client_secret) {
        (Some(refresh_token), Some(client_id), Some(client_secret)) => {
            info!("Token refresh enabled");
            Arc::new(RefreshingCredentials::start(
                Arc::clone(transport),
                RefreshSettings {
                    accounts_url: config.accounts_url.clone(),
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                },
                args.access_token.clone(),
                refresh_token.clone(),
                Duration::from_secs(args.expires_in),
            ))
        }
        _ => Arc::new(StaticToken::new(args.access_token.clone())),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut clog = colog::default_builder();
    clog.filter(
        None,
        if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        },
    );
    clog.init();
    set_log_only(args.log_only);

    for dir in &args.dirs {
        if !dir.is_dir() {
            bail!("Not a directory: {}", dir.display());
        }
    }

    let start = Instant::now();
    let config = LoaderConfig {
        api_base: args.api_base.clone(),
        ..Default::default()
    };

    let transport: Arc<dyn Transport> = Arc::new(UreqTransport::new(&config));
    let credentials = build_credentials(&args, &config, &transport);
    let client = SpotifyClient::new(config.clone(), Arc::clone(&transport), credentials);

    info!("Scanning {} root(s), mode {:?}", args.dirs.len(), args.mode);
    let source = TagSource::spawn(
        args.dirs.clone(),
        Arc::new(TagReader::new()),
        config.channel_capacity,
    );

    let result = run_with_progress(
        source.tracks(),
        args.mode,
        &client,
        &client,
        config.progress_interval,
    );
    let walk = source.join();
    info!(
        "Read tags from {} of {} audio files ({} skipped)",
        walk.tracks, walk.audio_files, walk.skipped
    );

    let stats = match result {
        Ok(stats) => stats,
        Err(LoaderError::Unsent { unsent, source }) => {
            error!("Final batch could not be saved: {}", source);
            for id in &unsent {
                error!("Unsent track: {}", id);
            }
            bail!("{} track(s) were not saved", unsent.len());
        }
        Err(err) => return Err(err).context("Run failed"),
    };

    if let Some(path) = &args.stats_json {
        stats
            .write_to_file(path)
            .with_context(|| format!("Failed to write stats to {}", path.display()))?;
    }

    info!("{:=<60}", "");
    info!("Load complete!");
    info!("  Tracks: {}", stats.tracks_seen);
    info!("  Matched: {} ({:.1}%)", stats.matched, stats.match_rate());
    info!("  Saved: {}", stats.submitted);
    info!("  Elapsed: {}", format_duration(start.elapsed()));
    info!("{:=<60}", "");

    Ok(())
}
