use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "audioproxy",
    about = "Audio extraction proxy - turn video URLs into MP3 files",
    version,
    long_about = "Resolves video URLs, acquires their audio through a fallback chain of extractors (yt-dlp profiles, a Piped API instance, an external converter), transcodes it to MP3 with ffmpeg and serves the results over HTTP."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Configuration file (defaults to ./audioproxy.yaml, then the user config directory)
    #[arg(short, long, global = true, value_name = "FILE", env = "AUDIOPROXY_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP server
    Serve {
        /// Address to listen on (overrides the configuration)
        #[arg(long, value_name = "HOST")]
        host: Option<String>,

        /// Port to listen on (overrides the configuration)
        #[arg(short, long, value_name = "PORT")]
        port: Option<u16>,
    },

    /// Show metadata for a URL without downloading it
    Info {
        #[arg(value_name = "URL")]
        url: String,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Download a URL to MP3 in the foreground
    Fetch {
        #[arg(value_name = "URL")]
        url: String,
    },

    /// List downloaded files, newest first
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Delete a downloaded file
    Remove {
        #[arg(value_name = "FILENAME")]
        filename: String,
    },

    /// Print the content id a URL resolves to
    Resolve {
        #[arg(value_name = "URL")]
        url: String,
    },

    /// Remove partial downloads and work directories left by an earlier run
    Sweep,

    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(short, long)]
        show: bool,

        /// Write the default configuration file
        #[arg(long)]
        init: bool,
    },

    /// List supported platforms and acquisition strategies
    Platforms,
}

#[derive(ValueEnum, Clone, Debug)]
pub enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}
