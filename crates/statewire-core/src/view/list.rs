// ── Freeform-list projection ──
//
// Sequence of entries without index semantics. Entry identity is the
// path string; add appends, change replaces in place, remove deletes.
// Batches fold entry-wise, so a freeform view also works against a
// daemon that batches its deliveries.

use statewire_api::{ChangeKind, EntryChange, FetchPacket};
use tracing::debug;

use crate::event::{FetchId, SyncEvent};
use crate::view::entry::ViewEntry;

/// Projection for an unordered fetch, kept in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeformView {
    fetch: FetchId,
    ready: bool,
    error: Option<String>,
    entries: Vec<ViewEntry>,
}

impl FreeformView {
    pub fn new(fetch: FetchId) -> Self {
        Self {
            fetch,
            ready: false,
            error: None,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[ViewEntry] {
        &self.entries
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn apply(&mut self, event: &SyncEvent) {
        match event {
            SyncEvent::FetchStarted { fetch } if *fetch == self.fetch => self.reset(),
            SyncEvent::FetchReady { fetch } if *fetch == self.fetch => self.ready = true,
            SyncEvent::FetchFailed { fetch, error } | SyncEvent::SnapshotFailed { fetch, error }
                if *fetch == self.fetch =>
            {
                self.reset();
                self.error = Some(error.clone());
            }
            SyncEvent::FetchData { fetch, packet } if *fetch == self.fetch => match packet {
                FetchPacket::Entry(change) => self.fold(change),
                FetchPacket::Batch { entries, .. } => {
                    for change in entries {
                        self.fold(change);
                    }
                }
            },
            SyncEvent::SnapshotLoaded { fetch, entries } if *fetch == self.fetch => {
                self.entries = entries.iter().map(ViewEntry::from_change).collect();
            }
            SyncEvent::RequestIssued(request) => {
                if let Some(entry) = self.entry_mut(&request.path) {
                    entry.mark_issued(request);
                }
            }
            SyncEvent::RequestSettled { id, path, outcome } => {
                if let Some(entry) = self.entry_mut(path) {
                    entry.mark_settled(*id, outcome);
                }
            }
            SyncEvent::PeerClosed { .. } => self.reset(),
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.entries.clear();
        self.ready = false;
        self.error = None;
    }

    fn entry_mut(&mut self, path: &str) -> Option<&mut ViewEntry> {
        self.entries.iter_mut().find(|entry| entry.path == path)
    }

    fn fold(&mut self, change: &EntryChange) {
        match change.event {
            ChangeKind::Add => match self.entry_mut(&change.path) {
                // A re-announced path behaves like a change; the mark
                // stays attached.
                Some(entry) => entry.value = change.value.clone(),
                None => self.entries.push(ViewEntry::from_change(change)),
            },
            ChangeKind::Change => match self.entry_mut(&change.path) {
                Some(entry) => entry.value = change.value.clone(),
                None => debug!(path = %change.path, "change for unknown path"),
            },
            ChangeKind::Remove => self.entries.retain(|entry| entry.path != change.path),
        }
    }
}
