// ── Fetch registry ──
//
// One live subscription per (peer identity, fetch id). The registry
// is pure bookkeeping: replace ordering (cancel the old registration
// before installing the new one) is driven by the client, which takes
// the previous slot out, silences its pump, unfetches it, and only
// then installs.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::event::FetchId;
use crate::identity::PeerIdentity;
use statewire_api::FetchToken;

/// A live subscription's daemon-side handle.
pub struct FetchSlot<C> {
    pub conn: C,
    pub token: FetchToken,
    /// Ends the pump that forwards this subscription's packets.
    /// Cancelling it guarantees nothing buffered for the old
    /// expression reaches the event stream afterwards.
    pub stop: CancellationToken,
}

/// Tracks live subscriptions across all peers.
pub struct FetchRegistry<C> {
    live: DashMap<(PeerIdentity, FetchId), FetchSlot<C>>,
}

impl<C: Clone> FetchRegistry<C> {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
        }
    }

    /// Remove and return the slot at `(identity, fetch)`, if any. The
    /// caller owns its teardown from here.
    pub fn take(&self, identity: &PeerIdentity, fetch: &FetchId) -> Option<FetchSlot<C>> {
        self.live
            .remove(&(identity.clone(), fetch.clone()))
            .map(|(_, slot)| slot)
    }

    /// Record a freshly installed subscription. Any previous slot for
    /// the pair must already have been taken.
    pub fn install(
        &self,
        identity: &PeerIdentity,
        fetch: &FetchId,
        conn: C,
        token: FetchToken,
        stop: CancellationToken,
    ) {
        self.live
            .insert((identity.clone(), fetch.clone()), FetchSlot { conn, token, stop });
    }

    /// Drop every subscription belonging to `identity` and end its
    /// pumps. Used when the peer disconnects; there is nothing left
    /// to unfetch remotely.
    pub fn clear_peer(&self, identity: &PeerIdentity) -> Vec<FetchId> {
        let doomed: Vec<FetchId> = self
            .live
            .iter()
            .filter(|entry| &entry.key().0 == identity)
            .map(|entry| entry.key().1.clone())
            .collect();
        for fetch in &doomed {
            if let Some((_, slot)) = self.live.remove(&(identity.clone(), fetch.clone())) {
                slot.stop.cancel();
            }
        }
        doomed
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

impl<C: Clone> Default for FetchRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
