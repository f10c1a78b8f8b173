//! Command-line interface.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::{parse_duration, Mode};
use crate::report::ReportFormat;

#[derive(Parser)]
#[command(name = "wardgate")]
#[command(about = "Reverse-proxy security gateway with rule scoring and learned contracts")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a configuration file
    Validate {
        /// Path to config file
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run the gateway
    Run {
        /// Path to config file
        #[arg(short, long)]
        config: PathBuf,
        /// Override policy mode for all policies
        #[arg(long, value_enum)]
        mode: Option<Mode>,
        /// Override contract path for all policies
        #[arg(long)]
        contract: Option<PathBuf>,
    },
    /// Run in learn mode for a fixed duration, then save contracts
    Learn {
        /// Path to config file
        #[arg(short, long)]
        config: PathBuf,
        /// Learn duration (e.g. 2m)
        #[arg(long, value_parser = parse_duration)]
        duration: Duration,
        /// Override contract output path
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Run with mode forced to enforce
    Enforce {
        /// Path to config file
        #[arg(short, long)]
        config: PathBuf,
        /// Override contract path
        #[arg(long)]
        contract: Option<PathBuf>,
    },
    /// Summarize a decision log
    Report {
        /// Path to decision log JSONL
        #[arg(long = "in")]
        input: PathBuf,
        /// Only include entries newer than this duration (e.g. 10m)
        #[arg(long, value_parser = parse_duration)]
        since: Option<Duration>,
        /// Output format
        #[arg(long, value_enum, default_value = "text")]
        format: ReportFormat,
        /// Output file path (default stdout)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print version information
    Version,
}
