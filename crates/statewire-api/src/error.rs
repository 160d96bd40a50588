use thiserror::Error;

/// Top-level error type for the `statewire-api` crate.
///
/// Covers every failure mode at the transport boundary: socket
/// establishment, authentication, daemon-rejected requests, and frame
/// decoding. `statewire-core` maps these into domain-level errors.
#[derive(Debug, Clone, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// The WebSocket could not be established (DNS, refused, TLS, upgrade).
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The daemon rejected the `authenticate` request.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The connection dropped while a request was still in flight.
    #[error("Connection closed")]
    ConnectionClosed,

    // ── Daemon ──────────────────────────────────────────────────────
    /// Structured error response from the daemon.
    #[error("Daemon error {code}: {message}")]
    Daemon { code: i64, message: String },

    // ── Data ────────────────────────────────────────────────────────
    /// A frame or payload could not be encoded/decoded.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl Error {
    pub(crate) fn serialization(err: &serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}
