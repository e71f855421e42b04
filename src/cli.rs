//! CLI argument parsing for the contention demo

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for survey reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable tables (default)
    Text,
    /// JSON for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "bottleneck-survey")]
#[command(version)]
#[command(about = "Run a synthetic contended workload and report the most utilized bottlenecks", long_about = None)]
pub struct Cli {
    /// Number of worker threads contending on the shared lock
    #[arg(short = 't', long = "threads", default_value = "4")]
    pub threads: usize,

    /// Iterations per worker
    #[arg(short = 'n', long = "iterations", default_value = "50")]
    pub iterations: usize,

    /// Time each worker holds the shared lock per iteration (microseconds)
    #[arg(long = "hold-us", value_name = "MICROS", default_value = "200")]
    pub hold_us: u64,

    /// Number of bottlenecks to report per surveyor (default from config, else 5)
    #[arg(short = 'k', long = "top", value_name = "N")]
    pub top: Option<usize>,

    /// Time window length in milliseconds (default from config, else 1000)
    #[arg(short = 'w', long = "window-ms", value_name = "MILLIS")]
    pub window_ms: Option<u64>,

    /// Only track bottlenecks whose id matches this regex
    #[arg(long = "allow", value_name = "REGEX")]
    pub allow: Option<String>,

    /// Never track bottlenecks whose id matches this regex (wins over --allow)
    #[arg(long = "block", value_name = "REGEX")]
    pub block: Option<String>,

    /// TOML settings file with default filters and report options
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Enable debug logging to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
