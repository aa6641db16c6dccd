pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "moodleware")]
#[command(author, version, about = "Moodleware - REST facade over Moodle web services")]
pub struct Cli {
    /// Path to config file (checked in order: ./moodleware.toml, ~/.config/moodleware/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the proxy server
    Start {
        /// Port to listen on (overrides config)
        #[arg(short, long)]
        port: Option<u16>,

        /// Endpoints file (overrides config)
        #[arg(short, long)]
        endpoints: Option<PathBuf>,
    },

    /// Print the proxied function table
    Routes {
        /// Endpoints file (overrides config)
        #[arg(short, long)]
        endpoints: Option<PathBuf>,
    },

    /// Show configuration and server status
    Status,

    /// Generate a new session signing secret
    GenerateSecret,
}
