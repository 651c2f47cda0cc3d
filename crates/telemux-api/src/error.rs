use thiserror::Error;

/// Top-level error type for the `telemux-api` crate.
///
/// Covers every failure mode of the wire layer: WebSocket transport,
/// HTTP inventory fetches, and frame/body deserialization.
/// `telemux-core` maps these into user-facing variants.
#[derive(Debug, Error)]
pub enum Error {
    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket handshake or socket I/O failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// The server closed the WebSocket.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The stream ended without a close frame.
    #[error("WebSocket stream ended unexpectedly")]
    StreamEnded,

    // ── HTTP ────────────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status from the inventory endpoint.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } | Self::StreamEnded => true,
            Self::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_failures_are_transient() {
        assert!(Error::WebSocketConnect("refused".into()).is_transient());
        assert!(Error::StreamEnded.is_transient());
        assert!(
            Error::WebSocketClosed {
                code: 1001,
                reason: "going away".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn client_errors_are_not_transient() {
        let err = Error::Status {
            status: 404,
            url: "http://localhost/api/inventory".into(),
        };
        assert!(!err.is_transient());

        let err = Error::Deserialization {
            message: "expected value".into(),
            body: "<html>".into(),
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = Error::Status {
            status: 503,
            url: "http://localhost/api/inventory".into(),
        };
        assert!(err.is_transient());
    }
}
