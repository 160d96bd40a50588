// ── Element registry ──
//
// Locally owned namespace entries, keyed by (peer identity, path).
// Mutate and unpublish are only valid while the element is registered;
// hitting an unregistered path is a deterministic local failure, never
// a round trip to the daemon.

use dashmap::DashMap;

use crate::error::CoreError;
use crate::identity::PeerIdentity;

/// Tracks elements this process has published.
pub struct ElementRegistry<C> {
    owned: DashMap<(PeerIdentity, String), C>,
}

impl<C: Clone> ElementRegistry<C> {
    pub fn new() -> Self {
        Self {
            owned: DashMap::new(),
        }
    }

    /// Record ownership of `path`. Called only after the daemon has
    /// acknowledged the registration.
    pub fn insert(&self, identity: &PeerIdentity, path: &str, conn: C) {
        self.owned
            .insert((identity.clone(), path.to_owned()), conn);
    }

    /// Connection that owns `path`, or a local not-found failure.
    pub fn lookup(&self, identity: &PeerIdentity, path: &str) -> Result<C, CoreError> {
        self.owned
            .get(&(identity.clone(), path.to_owned()))
            .map(|conn| conn.clone())
            .ok_or_else(|| CoreError::ElementNotFound {
                path: path.to_owned(),
            })
    }

    /// Drop ownership of `path`, returning the owning connection.
    pub fn remove(&self, identity: &PeerIdentity, path: &str) -> Result<C, CoreError> {
        self.owned
            .remove(&(identity.clone(), path.to_owned()))
            .map(|(_, conn)| conn)
            .ok_or_else(|| CoreError::ElementNotFound {
                path: path.to_owned(),
            })
    }

    /// Forget every element owned through `identity`. Used on
    /// disconnect; the daemon has already dropped them.
    pub fn clear_peer(&self, identity: &PeerIdentity) {
        self.owned.retain(|(owner, _), _| owner != identity);
    }

    pub fn len(&self) -> usize {
        self.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owned.is_empty()
    }
}

impl<C: Clone> Default for ElementRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
