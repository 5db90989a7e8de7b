mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let mut config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;
    // URL schemes are case-insensitive and parsed URLs carry them lowercased
    config.fetch.redirect_scheme.make_ascii_lowercase();

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    // Try default locations
    let default_paths = [
        "./reelcache.toml",
        "./config.toml",
        "~/.config/reelcache/config.toml",
        "/etc/reelcache/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    // Return default config if no file found
    Ok(Config::default())
}

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    if config.cache.dir.as_os_str().is_empty() {
        anyhow::bail!("Cache directory cannot be empty");
    }

    if config.fetch.timeout_secs == 0 {
        anyhow::bail!("Fetch timeout cannot be 0");
    }

    let scheme = &config.fetch.redirect_scheme;
    let valid_scheme = scheme
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid_scheme {
        anyhow::bail!("Invalid redirect scheme: {:?}", scheme);
    }
    if matches!(scheme.to_ascii_lowercase().as_str(), "http" | "https" | "file") {
        anyhow::bail!(
            "Redirect scheme '{}' would let the player load the URL itself",
            scheme
        );
    }

    if config.playback.default_extension.trim_start_matches('.').is_empty() {
        anyhow::bail!("Default extension cannot be empty");
    }
    if !reelcache_common::paths::is_video_extension(&config.playback.default_extension) {
        tracing::warn!(
            "Default extension '{}' is not a known video extension",
            config.playback.default_extension
        );
    }

    if config.playback.chunk_size == 0 {
        anyhow::bail!("Playback chunk size cannot be 0");
    }

    Ok(())
}
