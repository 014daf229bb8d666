use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config as LogConfig, TermLogger, TerminalMode};
use std::path::PathBuf;
use std::sync::Arc;

use peersync::api::ApiClient;
use peersync::cache::{FileStateCache, MemoryCache, StateCache};
use peersync::config::{get_config_path, load_config};
use peersync::settings::ConnectionSettings;
use peersync::sync::channel::ConnectionChannel;
use peersync::sync::store::{StoreView, SyncStore};

/// Command-line consumer of the peersync store: connects to the tracker,
/// then prints the synchronized view as updates arrive.
#[derive(Parser, Debug)]
#[command(name = "peersync", version, about)]
struct Args {
    /// Backend API base URL (overrides the config file)
    #[arg(long)]
    backend: Option<String>,

    /// Tracker address to configure on the backend
    #[arg(long, default_value = "127.0.0.1")]
    tracker_ip: String,

    /// Tracker port to configure on the backend
    #[arg(long, default_value = "12345")]
    tracker_port: String,

    /// Directory for direct file downloads
    #[arg(long, default_value = "./downloads")]
    download_dir: PathBuf,

    /// Ask the backend to join a remote tracker instead of starting a
    /// local one
    #[arg(long)]
    remote_tracker: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    TermLogger::init(
        level,
        LogConfig::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logging")?;

    // Load configuration at startup
    let config_path = get_config_path()?;
    let mut config = load_config(&config_path).context("Failed to load configuration")?;
    if let Some(backend) = args.backend {
        config.backend_url = backend;
    }

    let api = ApiClient::new(config.backend()?)?;
    let channel = ConnectionChannel::new(
        config.push_endpoint()?,
        config.reconnect_policy(),
        config.keepalive(),
    );
    let cache: Arc<dyn StateCache> = match FileStateCache::open_default() {
        Ok(cache) => Arc::new(cache),
        Err(e) => {
            warn!("state cache unavailable, continuing without persistence: {:#}", e);
            Arc::new(MemoryCache::default())
        }
    };
    let store = SyncStore::new(api, channel, cache, config.refresh_config()).await;

    store.set_connection_settings(ConnectionSettings {
        tracker_ip: args.tracker_ip,
        tracker_port: args.tracker_port,
        download_dir: args.download_dir,
        auto_seed: true,
        use_local_tracker: !args.remote_tracker,
    });

    if store.connect_to_tracker().await {
        info!("connected to tracker");
        store.refresh_files();
    } else {
        warn!("could not connect to tracker; showing the last cached view");
    }

    let mut view_rx = store.subscribe();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                print_view(&view);
            }
        }
    }

    info!("shutting down");
    store.shutdown();
    Ok(())
}

fn print_view(view: &StoreView) {
    let Some(snapshot) = &view.snapshot else {
        info!("no status yet");
        return;
    };
    info!(
        "tracker {} (seeders: {})",
        snapshot.tracker.address,
        snapshot
            .tracker
            .active_seeders
            .map(|n| n.to_string())
            .unwrap_or_else(|| "?".to_string())
    );
    for download in &snapshot.downloads.current {
        info!("  downloading {} {}", download.filename, download.progress);
    }
    for filename in &snapshot.downloads.completed {
        info!("  seeding {}", filename);
    }
    if !view.files.is_empty() {
        info!("{} files available", view.files.len());
    }
}
