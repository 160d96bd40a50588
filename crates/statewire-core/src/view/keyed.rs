// ── Keyed-map projection ──
//
// Path-to-entry mapping backed by an IndexMap, so iteration keeps
// insertion order while lookups stay O(1). Same fold rules as the
// freeform list, minus positional semantics.

use indexmap::IndexMap;
use statewire_api::{ChangeKind, EntryChange, FetchPacket};
use tracing::debug;

use crate::event::{FetchId, SyncEvent};
use crate::view::entry::ViewEntry;

/// Projection for an unordered fetch, addressable by path.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedView {
    fetch: FetchId,
    ready: bool,
    error: Option<String>,
    entries: IndexMap<String, ViewEntry>,
}

impl KeyedView {
    pub fn new(fetch: FetchId) -> Self {
        Self {
            fetch,
            ready: false,
            error: None,
            entries: IndexMap::new(),
        }
    }

    pub fn get(&self, path: &str) -> Option<&ViewEntry> {
        self.entries.get(path)
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &ViewEntry)> {
        self.entries.iter().map(|(path, entry)| (path.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
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
                self.entries = entries
                    .iter()
                    .map(|change| (change.path.clone(), ViewEntry::from_change(change)))
                    .collect();
            }
            SyncEvent::RequestIssued(request) => {
                if let Some(entry) = self.entries.get_mut(&request.path) {
                    entry.mark_issued(request);
                }
            }
            SyncEvent::RequestSettled { id, path, outcome } => {
                if let Some(entry) = self.entries.get_mut(path) {
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

    fn fold(&mut self, change: &EntryChange) {
        match change.event {
            ChangeKind::Add => {
                let entry = self
                    .entries
                    .entry(change.path.clone())
                    .or_insert_with(|| ViewEntry::from_change(change));
                entry.value = change.value.clone();
            }
            ChangeKind::Change => match self.entries.get_mut(&change.path) {
                Some(entry) => entry.value = change.value.clone(),
                None => debug!(path = %change.path, "change for unknown path"),
            },
            // shift_remove keeps the remaining insertion order intact.
            ChangeKind::Remove => {
                self.entries.shift_remove(&change.path);
            }
        }
    }
}
