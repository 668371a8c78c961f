//! apmkit CLI
//!
//! Command-line tools for inspecting collector responses and exercising
//! the beacon sender.
//!
//! # Commands
//!
//! - `parse-status` - Decode a status response body into attributes
//! - `simulate` - Run scripted sessions against a loopback collector
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// apmkit command-line tools.
#[derive(Parser)]
#[command(name = "apmkit")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a status response body into attributes
    ParseStatus {
        /// Response body (key-value or JSON)
        #[arg(short, long, conflicts_with = "file")]
        body: Option<String>,

        /// Read the response body from a file
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Print the effective attributes after merging onto the defaults
        #[arg(short, long)]
        merged: bool,
    },

    /// Run scripted sessions against a loopback collector
    Simulate {
        /// Agent configuration file (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of sessions to open
        #[arg(short, long, default_value = "1")]
        sessions: usize,

        /// Actions per session
        #[arg(short, long, default_value = "3")]
        actions: usize,

        /// Let the collector switch capture off
        #[arg(long)]
        capture_off: bool,

        /// Output format (text, json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::ParseStatus { body, file, merged } => {
            commands::parse_status::run(body.as_deref(), file.as_deref(), merged)?;
        }
        Commands::Simulate {
            config,
            sessions,
            actions,
            capture_off,
            format,
        } => {
            let options = commands::simulate::SimulationOptions {
                sessions,
                actions,
                capture: !capture_off,
            };
            commands::simulate::run(config.as_deref(), &options, &format)?;
        }
        Commands::Version => {
            commands::version::run();
        }
    }

    Ok(())
}
