// ── View entries ──
//
// One reconciled entry plus the optional pending-write sub-record.
// The sub-record is purely local metadata: remote resyncs replace the
// entry's value but carry the mark over by path, so write feedback
// survives independent of server resync cadence.

use serde_json::Value;
use statewire_api::EntryChange;

use crate::event::{PendingRequest, RequestId, RequestOutcome, WritePayload};

/// Local record of a write targeting this entry's path.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestMark {
    pub id: RequestId,
    pub pending: bool,
    pub payload: WritePayload,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl RequestMark {
    fn issued(request: &PendingRequest) -> Self {
        Self {
            id: request.id,
            pending: true,
            payload: request.payload.clone(),
            result: None,
            error: None,
        }
    }
}

/// One entry of a projection.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ViewEntry {
    pub path: String,
    /// Absolute window position. Only meaningful in ordered views.
    pub index: Option<u64>,
    pub value: Option<Value>,
    pub request: Option<RequestMark>,
}

impl ViewEntry {
    pub fn from_change(change: &EntryChange) -> Self {
        Self {
            path: change.path.clone(),
            index: change.index,
            value: change.value.clone(),
            request: None,
        }
    }

    /// Attach a fresh pending mark, overwriting any stale one. A new
    /// write supersedes whatever the previous write left behind.
    pub fn mark_issued(&mut self, request: &PendingRequest) {
        self.request = Some(RequestMark::issued(request));
    }

    /// Settle the mark if (and only if) `id` matches the one in
    /// flight. A late completion for a superseded write must not
    /// clobber the newer mark.
    pub fn mark_settled(&mut self, id: RequestId, outcome: &RequestOutcome) {
        let Some(mark) = &mut self.request else {
            return;
        };
        if mark.id != id {
            return;
        }
        mark.pending = false;
        match outcome {
            RequestOutcome::Success(result) => mark.result = Some(result.clone()),
            RequestOutcome::Failure(error) => mark.error = Some(error.clone()),
        }
    }
}
