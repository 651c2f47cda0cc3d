//! Clap derive structures for the `telemux` CLI.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use telemux_core::AlertSeverity;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// telemux -- live telemetry from a homelab dashboard backend
#[derive(Debug, Parser)]
#[command(
    name = "telemux",
    version,
    about = "Stream live metrics, container events and alerts from a telemetry server",
    long_about = "Opens one WebSocket to the dashboard backend and multiplexes\n\
        metrics, container and alert topics over it. Reconnects with\n\
        exponential backoff and re-subscribes automatically.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "TELEMUX_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// WebSocket URL (overrides config)
    #[arg(long, short = 'u', global = true)]
    pub url: Option<String>,

    /// Output format
    #[arg(long, short = 'o', default_value = "text", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress connection status messages
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Live dashboard summary (devices, containers, alerts, health)
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Stream metric samples for one or more devices
    #[command(alias = "m")]
    Metrics(MetricsArgs),

    /// Stream the alert feed
    #[command(alias = "a")]
    Alerts(AlertsArgs),

    /// Inspect CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Options shared by every streaming command.
#[derive(Debug, Args)]
pub struct StreamOpts {
    /// Stop after this long (e.g. "30s", "5m")
    #[arg(long, short = 'd', value_parser = parse_duration)]
    pub duration: Option<Duration>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Devices whose metrics and containers are tracked
    #[arg(long = "device", short = 'D', value_name = "ID")]
    pub devices: Vec<String>,

    /// Skip inventory polling even if `inventory_url` is configured
    #[arg(long)]
    pub no_inventory: bool,

    #[command(flatten)]
    pub stream: StreamOpts,
}

#[derive(Debug, Args)]
pub struct MetricsArgs {
    /// Device IDs to subscribe to
    #[arg(required = true, num_args = 1.., value_name = "ID")]
    pub devices: Vec<String>,

    /// Stop after this many samples
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    #[command(flatten)]
    pub stream: StreamOpts,
}

#[derive(Debug, Args)]
pub struct AlertsArgs {
    /// Only show alerts at or above this severity
    #[arg(long, short = 's', default_value = "info")]
    pub min_severity: AlertSeverity,

    /// Stop after this many alerts
    #[arg(long, short = 'n')]
    pub count: Option<usize>,

    #[command(flatten)]
    pub stream: StreamOpts,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display current resolved configuration
    Show,

    /// Print the config file path
    Path,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}

fn parse_duration(raw: &str) -> Result<Duration, humantime::DurationError> {
    humantime::parse_duration(raw)
}
