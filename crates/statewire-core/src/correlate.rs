// ── Request correlator ──
//
// Hands out a unique id per write-style request and matches the
// eventual completion back to it. Settles each id at most once;
// completions for unknown or already-settled ids are dropped, since
// they are expected under re-subscription races.

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::debug;

use crate::event::{PendingRequest, RequestId, RequestOutcome, WritePayload};

struct Settler {
    path: String,
    tx: oneshot::Sender<RequestOutcome>,
}

/// Tracks in-flight writes by id.
#[derive(Default)]
pub struct RequestCorrelator {
    pending: DashMap<RequestId, Settler>,
}

impl RequestCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new write against `path`. Returns the pending
    /// record (carrying the generated id) and a receiver that settles
    /// exactly once with the outcome.
    pub fn issue(
        &self,
        path: &str,
        payload: WritePayload,
    ) -> (PendingRequest, oneshot::Receiver<RequestOutcome>) {
        let pending = PendingRequest::new(path, payload);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            pending.id,
            Settler {
                path: path.to_owned(),
                tx,
            },
        );
        (pending, rx)
    }

    /// Deliver a completion. Returns the request's path when the id
    /// was in flight, `None` when it was unknown or already settled.
    pub fn settle(&self, id: RequestId, outcome: RequestOutcome) -> Option<String> {
        let Some((_, settler)) = self.pending.remove(&id) else {
            debug!(%id, "completion for unknown request id");
            return None;
        };
        // Receiver may have been dropped; the path is still needed so
        // the settlement event reaches projections.
        let _ = settler.tx.send(outcome);
        Some(settler.path)
    }

    /// Number of writes still awaiting completion.
    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }
}
