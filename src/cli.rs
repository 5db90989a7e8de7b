use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "reelcache")]
#[command(author, version, about = "Streaming video cache for short-form feeds")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Play a URL headlessly through the cache (downloads and caches on a miss)
    Fetch {
        /// Video URL
        #[arg(required = true)]
        url: String,

        /// File extension for the cache entry (defaults to playback.default_extension)
        #[arg(long)]
        ext: Option<String>,

        /// Also write the played bytes to this file
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether a URL is cached
    Lookup {
        /// Video URL
        #[arg(required = true)]
        url: String,

        /// File extension of the cache entry
        #[arg(long)]
        ext: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// List cache entries
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Apply the eviction policy now
    Prune,

    /// Remove every cache entry
    Clear,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
