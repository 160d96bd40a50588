// ── Sync events ──
//
// Typed notifications emitted by the client and consumed by the view
// reconcilers. The transport's callback surface is converted into
// these variants once, at the client boundary; views never sniff raw
// payload shapes.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;
use statewire_api::{EntryChange, FetchPacket};
use uuid::Uuid;

use crate::identity::PeerIdentity;

// ── Identifiers ──────────────────────────────────────────────────────

/// Caller-chosen subscription id. One live subscription and one
/// projection exist per (peer identity, fetch id) pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FetchId(String);

impl FetchId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FetchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FetchId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Unique id for one write-style request. Time-ordered (UUID v7) so
/// ids also sort by issue time, and collision-free process-wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Write requests ───────────────────────────────────────────────────

/// What a write carries: a new value (`set`) or call arguments (`call`).
#[derive(Debug, Clone, PartialEq)]
pub enum WritePayload {
    Value(Value),
    Args(Vec<Value>),
}

/// A write awaiting daemon acknowledgment.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRequest {
    pub id: RequestId,
    pub path: String,
    pub payload: WritePayload,
    pub issued_at: DateTime<Utc>,
}

impl PendingRequest {
    pub fn new(path: impl Into<String>, payload: WritePayload) -> Self {
        Self {
            id: RequestId::generate(),
            path: path.into(),
            payload,
            issued_at: Utc::now(),
        }
    }
}

/// How a write settled.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success(Value),
    Failure(String),
}

// ── Events ───────────────────────────────────────────────────────────

/// Everything a projection can react to.
///
/// Subscription events carry the fetch id they belong to; request
/// events target entries by path across every projection, since a
/// write is not tied to any one subscription.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A subscription is being (re)installed. Projections reset.
    FetchStarted { fetch: FetchId },
    /// The subscription is live. Synthesized exactly once, whichever
    /// of daemon ack or first data arrives first.
    FetchReady { fetch: FetchId },
    /// The subscription could not be installed.
    FetchFailed { fetch: FetchId, error: String },
    /// One change delivery for a live subscription.
    FetchData { fetch: FetchId, packet: FetchPacket },
    /// A one-shot `get` snapshot resolved.
    SnapshotLoaded {
        fetch: FetchId,
        entries: Vec<EntryChange>,
    },
    /// A one-shot `get` snapshot failed.
    SnapshotFailed { fetch: FetchId, error: String },
    /// A write was issued and is now in flight.
    RequestIssued(PendingRequest),
    /// A write settled. Delivered at most once per id.
    RequestSettled {
        id: RequestId,
        path: String,
        outcome: RequestOutcome,
    },
    /// The physical connection for `identity` is gone.
    PeerClosed { identity: PeerIdentity },
}
