use clap::{Parser, Subcommand};
use std::path::PathBuf;
use streamforged_common::ConversionStatus;

#[derive(Parser)]
#[command(name = "streamforged")]
#[command(author, version, about = "Proxy remote media through ffmpeg as HLS or progressive MP4")]
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
    /// Start the streaming and conversion API server
    Start {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Convert a remote source to a cached MP4 and wait for the result
    Convert {
        /// Source URL (http or https)
        #[arg(required = true)]
        url: String,
    },

    /// List conversion jobs
    Jobs {
        /// Only show jobs in this state (pending, ready, failed)
        #[arg(long)]
        status: Option<ConversionStatus>,

        /// Maximum number of jobs to show
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },

    /// Check that the transcoding engine is available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
