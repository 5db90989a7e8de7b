mod cli;

use reelcache::{
    config,
    headless::HeadlessPlayer,
    streaming::{
        cache_key, FetchOutcome, HttpTransport, PlaybackController, PlaybackOptions, Transport,
    },
};
use reelcache_common::{paths::normalize_extension, Dimensions};
use reelcache_store::CacheStore;

use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use cli::{Cli, Commands};
use std::path::Path;
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "reelcache=trace,reelcache_store=debug,reelcache_common=debug,reqwest=debug".to_string()
        } else {
            "reelcache=info,reelcache_store=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Fetch {
            url,
            ext,
            output,
            json,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(fetch_url(
                &url,
                ext.as_deref(),
                output.as_deref(),
                json,
                config_path,
            ))
        }
        Commands::Lookup { url, ext, json } => lookup_url(&url, ext.as_deref(), json, config_path),
        Commands::List { json } => list_entries(json, config_path),
        Commands::Prune => prune(config_path),
        Commands::Clear => clear(config_path),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or_else(|| config_path.map(Path::to_path_buf));
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("reelcache {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn open_store(config_path: Option<&Path>) -> Result<(config::Config, CacheStore)> {
    let config = config::load_config_or_default(config_path)?;
    let store = config.cache.open_store()?;
    Ok((config, store))
}

async fn fetch_url(
    url: &str,
    ext: Option<&str>,
    output: Option<&Path>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let (config, store) = open_store(config_path)?;
    tracing::info!("Cache directory: {:?}", store.root());

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(&config.fetch.user_agent));
    let mut player = HeadlessPlayer::from_config(&config.playback);
    if let Some(output) = output {
        player = player.with_output(output);
    }

    let mut controller = PlaybackController::new(
        player,
        Arc::new(store),
        transport,
        PlaybackOptions::from(&config),
    );

    // No layout information on the command line
    let state = controller.configure(url, ext, Dimensions::new(0, 0)).await?;
    controller.play();

    let played = controller.player_mut().finished().await;
    let download = controller.wait_for_download().await;
    controller.cancel();

    if let Some(FetchOutcome::Failed(ref e)) = download {
        anyhow::bail!("Download of {} failed: {}", url, e);
    }
    let report = played?;

    if json {
        let value = serde_json::json!({
            "state": state,
            "playback": report,
            "download": download.as_ref().map(describe_download),
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
    } else {
        println!("URL: {}", url);
        println!("State: {}", state);
        println!("Bytes played: {}", report.bytes);
        if let Some(ref content_type) = report.content_type {
            println!("Content type: {}", content_type);
        }
        println!("Requests: {}", report.requests);
        match download {
            Some(outcome) => println!("Download: {}", describe_download(&outcome)),
            None => println!("Download: none (served from cache)"),
        }
        if let Some(output) = output {
            println!("Output: {}", output.display());
        }
    }

    Ok(())
}

fn describe_download(outcome: &FetchOutcome) -> String {
    match outcome {
        FetchOutcome::Cached(entry) => format!("cached at {}", entry.path.display()),
        FetchOutcome::Uncached { bytes, reason } => {
            format!("{} bytes, not cached ({})", bytes, reason)
        }
        FetchOutcome::Failed(e) => format!("failed ({})", e),
        FetchOutcome::Cancelled => "cancelled".to_string(),
    }
}

fn lookup_url(url: &str, ext: Option<&str>, json: bool, config_path: Option<&Path>) -> Result<()> {
    let (config, store) = open_store(config_path)?;
    let extension = normalize_extension(ext, &config.playback.default_extension);
    let parsed = Url::parse(url).with_context(|| format!("Invalid video URL: {}", url))?;
    let key = cache_key(&parsed);
    let entry = store.lookup(&key, &extension);

    if json {
        let value = serde_json::json!({
            "url": url,
            "key": key,
            "cached": entry.is_some(),
            "entry": entry,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Key: {}", key);
    match entry {
        Some(entry) => {
            println!("Cached: yes");
            println!("Path: {}", entry.path.display());
            println!("Size: {} bytes", entry.size);
        }
        None => {
            println!("Cached: no");
            println!("Path: {}", store.path_for(&key, &extension).display());
        }
    }

    Ok(())
}

fn list_entries(json: bool, config_path: Option<&Path>) -> Result<()> {
    let (_config, store) = open_store(config_path)?;
    let mut entries = store.entries()?;
    entries.sort_by(|a, b| b.modified.cmp(&a.modified));

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    println!("Cache: {}", store.root().display());
    for entry in &entries {
        println!(
            "  {}.{}  {:>12} bytes  {}",
            entry.key,
            entry.extension,
            entry.size,
            entry.modified.format("%Y-%m-%d %H:%M:%S")
        );
    }
    let total: u64 = entries.iter().map(|e| e.size).sum();
    println!("{} entries, {} bytes", entries.len(), total);

    Ok(())
}

fn prune(config_path: Option<&Path>) -> Result<()> {
    let (_config, store) = open_store(config_path)?;
    let report = store.evict()?;
    println!(
        "Removed {} entries ({} bytes), {} bytes remaining",
        report.removed, report.freed_bytes, report.remaining_bytes
    );
    Ok(())
}

fn clear(config_path: Option<&Path>) -> Result<()> {
    let (_config, store) = open_store(config_path)?;
    let removed = store.clear()?;
    println!("Removed {} entries from {}", removed, store.root().display());
    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            let config = config::load_config(p)?;
            println!("✓ Configuration is valid");
            print_config(&config);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = config::Config::default();
            println!("Default config:");
            print_config(&config);
        }
    }

    Ok(())
}

fn print_config(config: &config::Config) {
    println!("  Cache dir: {}", config.cache.resolved_dir().display());
    println!("  Max bytes: {}", config.cache.max_bytes);
    println!("  Max age: {}s", config.cache.max_age_secs);
    println!("  Fetch timeout: {}s", config.fetch.timeout_secs);
    println!("  Redirect scheme: {}", config.fetch.redirect_scheme);
    println!("  Default extension: {}", config.playback.default_extension);
    println!("  Looping: {}", config.playback.looping);
}
