// ── Peer identity ──
//
// Deterministic key derived from connection credentials. Two callers
// with the same identity share one physical connection; the broker's
// connection table is keyed by this type.

use std::fmt;

use secrecy::ExposeSecret;
use statewire_api::ConnectOptions;

/// Opaque, hashable connection key.
///
/// The key folds in the url, user, password, and any auth headers, so
/// changing a credential yields a distinct physical connection. The
/// password never leaves this type: `Debug` and `Display` show only
/// the url and user.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerIdentity {
    key: String,
    label: String,
}

impl PeerIdentity {
    pub fn of(opts: &ConnectOptions) -> Self {
        let user = opts.user.as_deref().unwrap_or("");
        let password = opts
            .password
            .as_ref()
            .map_or("", |p| p.expose_secret());

        let mut key = format!("{}\u{1f}{user}\u{1f}{password}", opts.url);
        // Header order must not change the identity.
        let mut headers: Vec<_> = opts
            .headers
            .iter()
            .map(|(n, v)| format!("{n}={v}"))
            .collect();
        headers.sort_unstable();
        for header in headers {
            key.push('\u{1f}');
            key.push_str(&header);
        }

        let label = if user.is_empty() {
            opts.url.to_string()
        } else {
            format!("{user}@{}", opts.url)
        };
        Self { key, label }
    }
}

impl fmt::Display for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl fmt::Debug for PeerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerIdentity").field(&self.label).finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use url::Url;

    fn opts(url: &str) -> ConnectOptions {
        ConnectOptions::new(Url::parse(url).unwrap())
    }

    #[test]
    fn same_credentials_same_identity() {
        let a = PeerIdentity::of(&opts("ws://host:11123").with_credentials("u", "p"));
        let b = PeerIdentity::of(&opts("ws://host:11123").with_credentials("u", "p"));
        assert_eq!(a, b);
    }

    #[test]
    fn differing_password_differs() {
        let a = PeerIdentity::of(&opts("ws://host:11123").with_credentials("u", "p1"));
        let b = PeerIdentity::of(&opts("ws://host:11123").with_credentials("u", "p2"));
        assert_ne!(a, b);
    }

    #[test]
    fn header_order_is_irrelevant() {
        let a = PeerIdentity::of(&opts("ws://host").with_header("x-a", "1").with_header("x-b", "2"));
        let b = PeerIdentity::of(&opts("ws://host").with_header("x-b", "2").with_header("x-a", "1"));
        assert_eq!(a, b);
    }

    #[test]
    fn display_never_leaks_the_password() {
        let id = PeerIdentity::of(&opts("ws://host").with_credentials("u", "hunter2"));
        assert!(!id.to_string().contains("hunter2"));
        assert!(!format!("{id:?}").contains("hunter2"));
    }
}
