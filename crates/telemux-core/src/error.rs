// ── Core error types ──
//
// User-facing errors from telemux-core. Consumers never see WebSocket
// close codes or JSON parse failures directly; the
// `From<telemux_api::Error>` impl translates wire-layer errors into
// domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to telemetry server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Telemetry server disconnected")]
    Disconnected,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Inventory request failed with HTTP {status}")]
    Inventory { status: u16 },

    #[error("Malformed data from server: {message}")]
    Malformed { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from wire-layer errors ────────────────────────────────

impl From<telemux_api::Error> for CoreError {
    fn from(err: telemux_api::Error) -> Self {
        match err {
            telemux_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            telemux_api::Error::WebSocketClosed { .. } | telemux_api::Error::StreamEnded => {
                CoreError::Disconnected
            }
            telemux_api::Error::Transport(ref e) => CoreError::ConnectionFailed {
                url: e
                    .url()
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "<unknown>".into()),
                reason: e.to_string(),
            },
            telemux_api::Error::Status { status, .. } => CoreError::Inventory { status },
            telemux_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            telemux_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            telemux_api::Error::Deserialization { message, .. } => {
                CoreError::Malformed { message }
            }
        }
    }
}

/// Why an inbound frame could not be turned into an envelope.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid frame JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame is missing a device id")]
    MissingDevice,
}

/// Failure reported by a consumer callback.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ListenerError {
    pub message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_close_maps_to_disconnected() {
        let err: CoreError = telemux_api::Error::StreamEnded.into();
        assert!(matches!(err, CoreError::Disconnected));
    }

    #[test]
    fn http_status_maps_to_inventory() {
        let err: CoreError = telemux_api::Error::Status {
            status: 502,
            url: "http://localhost/api/inventory".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Inventory { status: 502 }));
        assert_eq!(err.to_string(), "Inventory request failed with HTTP 502");
    }

    #[test]
    fn bad_body_maps_to_malformed() {
        let err: CoreError = telemux_api::Error::Deserialization {
            message: "expected `,`".into(),
            body: "{".into(),
        }
        .into();
        assert!(matches!(err, CoreError::Malformed { .. }));
    }
}
