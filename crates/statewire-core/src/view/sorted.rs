// ── Ordered-list projection ──
//
// Mirrors a sorted fetch window. Every batch delta rebuilds the
// visible window: previous entries truncated or padded to the new
// total, changed entries overwritten at (reported index - origin),
// and pending-write marks re-attached by path since they are local
// metadata the daemon knows nothing about.

use std::collections::HashMap;

use statewire_api::{EntryChange, FetchPacket};
use tracing::debug;

use crate::event::{FetchId, SyncEvent};
use crate::view::entry::{RequestMark, ViewEntry};

/// Projection for a sorted fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct SortedView {
    fetch: FetchId,
    /// First absolute index of the window, from the match
    /// expression's sort range.
    origin: u64,
    ready: bool,
    error: Option<String>,
    entries: Vec<ViewEntry>,
}

impl SortedView {
    pub fn new(fetch: FetchId, origin: u64) -> Self {
        Self {
            fetch,
            origin,
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

    /// Fold one event into the projection. Events for other fetch ids
    /// are ignored; write events target entries by path regardless of
    /// which subscription produced them.
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
                FetchPacket::Batch { entries, total } => self.rebuild(entries, *total),
                FetchPacket::Entry(change) => {
                    // A sorted fetch only ever delivers batches.
                    debug!(path = %change.path, "ignoring unindexed entry in sorted view");
                }
            },
            SyncEvent::SnapshotLoaded { fetch, entries } if *fetch == self.fetch => {
                // Snapshot entries may lack indices; assign window
                // positions in delivery order.
                let mut position = self.origin;
                let indexed: Vec<EntryChange> = entries
                    .iter()
                    .map(|change| {
                        let indexed = EntryChange {
                            index: change.index.or(Some(position)),
                            ..change.clone()
                        };
                        position += 1;
                        indexed
                    })
                    .collect();
                let total = u64::try_from(entries.len()).unwrap_or(u64::MAX);
                self.rebuild(&indexed, total);
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

    fn rebuild(&mut self, changes: &[EntryChange], total: u64) {
        let Ok(total) = usize::try_from(total) else {
            debug!(total, "absurd window length, keeping previous state");
            return;
        };

        let marks: HashMap<String, RequestMark> = self
            .entries
            .iter()
            .filter(|entry| !entry.path.is_empty())
            .filter_map(|entry| {
                entry
                    .request
                    .as_ref()
                    .map(|mark| (entry.path.clone(), mark.clone()))
            })
            .collect();

        self.entries.resize_with(total, ViewEntry::default);
        for change in changes {
            let Some(absolute) = change.index else {
                debug!(path = %change.path, "batch entry without index");
                continue;
            };
            let Some(offset) = absolute.checked_sub(self.origin) else {
                debug!(path = %change.path, absolute, origin = self.origin, "index below window");
                continue;
            };
            let Ok(slot) = usize::try_from(offset) else {
                continue;
            };
            if slot >= total {
                debug!(path = %change.path, slot, total, "index beyond window");
                continue;
            }
            self.entries[slot] = ViewEntry::from_change(change);
        }

        for entry in &mut self.entries {
            if entry.request.is_none() {
                if let Some(mark) = marks.get(&entry.path) {
                    entry.request = Some(mark.clone());
                }
            }
        }
    }
}
