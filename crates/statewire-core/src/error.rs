// ── Core error types ──
//
// User-facing errors from statewire-core. These are NOT wire-specific --
// consumers never see raw frames or JSON parse failures directly. The
// `From<statewire_api::Error>` impl translates peer-layer errors into
// domain-appropriate variants.
//
// `Clone` is load-bearing: one connect failure must be delivered to
// every task that was waiting on the same peer slot.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to daemon at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Daemon disconnected")]
    Disconnected,

    #[error("Connection was force-closed while tasks were waiting on it")]
    ForcedClose,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("No element registered at path: {path}")]
    ElementNotFound { path: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("Operation rejected by daemon (code {code}): {message}")]
    Rejected { code: i64, message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from peer-layer errors ────────────────────────────────

impl From<statewire_api::Error> for CoreError {
    fn from(err: statewire_api::Error) -> Self {
        match err {
            statewire_api::Error::Connect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            statewire_api::Error::Authentication { message } => {
                CoreError::AuthenticationFailed { message }
            }
            statewire_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            statewire_api::Error::ConnectionClosed => CoreError::Disconnected,
            statewire_api::Error::Daemon { code, message } => CoreError::Rejected { code, message },
            statewire_api::Error::Serialization { message } => {
                CoreError::Internal(format!("Serialization error: {message}"))
            }
        }
    }
}
