//! Line-oriented rendering for streaming commands.
//!
//! Text output is colored with the dashboard palette when the terminal
//! allows it; JSON output is one object per line for piping into `jq`.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use serde::Serialize;

use telemux_core::{
    AggregateSummary, Alert, AlertSeverity, ConnectionState, ConnectionStatus, Health, MetricSample,
    Rgb,
};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

fn paint(text: &str, color: Rgb, enabled: bool) -> String {
    if enabled {
        text.truecolor(color.r, color.g, color.b).to_string()
    } else {
        text.to_owned()
    }
}

fn health_color(health: Health) -> Rgb {
    match health {
        Health::Excellent | Health::Good => telemux_core::color::SUCCESS_GREEN,
        Health::Warning => telemux_core::color::ELECTRIC_YELLOW,
        Health::Critical => telemux_core::color::CORAL,
    }
}

fn severity_color(severity: AlertSeverity) -> Rgb {
    match severity {
        AlertSeverity::Info => telemux_core::color::LIGHT_BLUE,
        AlertSeverity::Warning => telemux_core::color::ELECTRIC_YELLOW,
        AlertSeverity::Error | AlertSeverity::Critical => telemux_core::color::CORAL,
    }
}

// ── Renderer ─────────────────────────────────────────────────────────

/// Renders records in the format chosen by `--output`.
#[derive(Debug, Clone, Copy)]
pub struct Renderer {
    format: OutputFormat,
    color: bool,
}

impl Renderer {
    pub fn new(format: OutputFormat, color: ColorMode) -> Self {
        Self {
            format,
            color: format == OutputFormat::Text && should_color(color),
        }
    }

    pub fn summary(&self, summary: &AggregateSummary) -> Result<String, CliError> {
        if self.format == OutputFormat::Json {
            return json_line(summary);
        }
        let health = paint(&summary.health.to_string(), health_color(summary.health), self.color);
        Ok(format!(
            "devices {}/{} online | containers {} running, {} stopped | alerts {} ({} critical, {} warning) | health {health}",
            summary.online_devices,
            summary.total_devices,
            summary.running_containers,
            summary.stopped_containers,
            summary.total_alerts,
            summary.critical_alerts,
            summary.warning_alerts,
        ))
    }

    pub fn sample(&self, sample: &MetricSample, color: Rgb) -> Result<String, CliError> {
        if self.format == OutputFormat::Json {
            return json_line(sample);
        }
        Ok(format!(
            "{} {:<12} cpu {} mem {} disk {} {}",
            sample.timestamp.format("%H:%M:%S"),
            paint(&sample.device_id, color, self.color),
            percent(sample.cpu_percent),
            percent(sample.memory_percent),
            percent(sample.disk_percent),
            sample.status,
        ))
    }

    pub fn alert(&self, alert: &Alert) -> Result<String, CliError> {
        if self.format == OutputFormat::Json {
            return json_line(alert);
        }
        let severity = paint(
            &format!("{:<8}", alert.severity.to_string()),
            severity_color(alert.severity),
            self.color,
        );
        let device = alert.device_id.as_deref().unwrap_or("-");
        Ok(format!(
            "{} {severity} {device:<12} {}",
            alert.timestamp.format("%H:%M:%S"),
            alert.message,
        ))
    }

    /// Status line for connection transitions. `None` when not worth printing.
    pub fn connection(&self, state: &ConnectionState) -> Option<String> {
        let text = match state.status {
            ConnectionStatus::Connected => "connected".to_owned(),
            ConnectionStatus::Reconnecting => format!(
                "reconnecting (attempt {}){}",
                state.retry_count,
                state
                    .last_error
                    .as_deref()
                    .map(|e| format!(": {e}"))
                    .unwrap_or_default()
            ),
            ConnectionStatus::Connecting | ConnectionStatus::Disconnected => return None,
        };
        let color = if state.is_connected() {
            telemux_core::color::SUCCESS_GREEN
        } else {
            telemux_core::color::ELECTRIC_YELLOW
        };
        Some(paint(&text, color, self.color))
    }
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "    -".to_owned(), |v| format!("{v:>5.1}%"))
}

fn json_line<T: Serialize>(value: &T) -> Result<String, CliError> {
    Ok(serde_json::to_string(value)?)
}

/// Write one line to stdout. A closed pipe is not an error.
pub fn emit(line: &str) -> Result<(), CliError> {
    let mut out = io::stdout().lock();
    match writeln!(out, "{line}") {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => Ok(other?),
    }
}

/// Status messages go to stderr so stdout stays machine-readable.
pub fn status(line: &str, quiet: bool) {
    if !quiet {
        eprintln!("{line}");
    }
}
