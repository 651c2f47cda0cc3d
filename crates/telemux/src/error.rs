//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use telemux_config::ConfigError;
use telemux_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to telemetry server at {url}")]
    #[diagnostic(
        code(telemux::connection_failed),
        help(
            "Check that the server is running and reachable.\n\
             Reason: {reason}\n\
             Raise [reconnect] max_retries, or leave it unset to retry forever."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Inventory request failed with HTTP {status}")]
    #[diagnostic(
        code(telemux::inventory),
        help("Check inventory_url in your config, or pass --no-inventory.")
    )]
    Inventory { status: u16 },

    #[error("Malformed data from server: {message}")]
    #[diagnostic(code(telemux::malformed))]
    Malformed { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(telemux::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Failed to load configuration from {path}")]
    #[diagnostic(
        code(telemux::config),
        help("Run: telemux config show --config {path} to inspect the resolved values.")
    )]
    Config {
        path: String,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("Internal error: {0}")]
    #[diagnostic(code(telemux::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    #[diagnostic(code(telemux::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Inventory { .. } => exit_code::CONNECTION,
            Self::Validation { .. } => exit_code::USAGE,
            Self::Config { .. } => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }

    /// Wrap a config failure, promoting validation errors to usage errors.
    pub fn from_config(path: impl Into<String>, err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            other => Self::Config {
                path: path.into(),
                source: Box::new(other),
            },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },

            CoreError::Disconnected => CliError::ConnectionFailed {
                url: "(disconnected)".into(),
                reason: "Telemetry server closed the connection".into(),
            },

            CoreError::Inventory { status } => CliError::Inventory { status },

            CoreError::Malformed { message } => CliError::Malformed { message },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_by_category() {
        let conn = CliError::from(CoreError::Disconnected);
        assert_eq!(conn.exit_code(), exit_code::CONNECTION);

        let usage = CliError::from_config(
            "x.toml",
            ConfigError::Validation {
                field: "url".into(),
                reason: "bad".into(),
            },
        );
        assert_eq!(usage.exit_code(), exit_code::USAGE);

        let io = CliError::from_config(
            "x.toml",
            ConfigError::Io(std::io::Error::other("disk gone")),
        );
        assert_eq!(io.exit_code(), exit_code::CONFIG);
        assert_eq!(CliError::Internal("x".into()).exit_code(), exit_code::GENERAL);
    }
}
