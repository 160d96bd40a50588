// statewire-core: connection multiplexing and view reconciliation over statewire-api.

pub mod client;
pub mod correlate;
pub mod elements;
pub mod error;
pub mod event;
pub mod fetches;
pub mod identity;
pub mod peers;
pub mod view;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::SyncClient;
pub use correlate::RequestCorrelator;
pub use error::CoreError;
pub use event::{FetchId, PendingRequest, RequestId, RequestOutcome, SyncEvent, WritePayload};
pub use identity::PeerIdentity;
pub use peers::PeerBroker;
pub use view::{FreeformView, KeyedView, RequestMark, SingleView, SortedView, ViewEntry};

// Re-export the wire types consumers need to drive the client.
pub use statewire_api::{
    ChangeKind, ConnectOptions, ElementSpec, EntryChange, FetchPacket, MatchExpr, SortSpec,
};
