// ── Single-value projection ──
//
// For match expressions known to select at most one entry. Add and
// change both replace the sole value; remove empties it; a resync
// keeps at most the first surviving match.

use statewire_api::{ChangeKind, EntryChange, FetchPacket};

use crate::event::{FetchId, SyncEvent};
use crate::view::entry::ViewEntry;

/// Projection holding zero or one entries.
#[derive(Debug, Clone, PartialEq)]
pub struct SingleView {
    fetch: FetchId,
    ready: bool,
    error: Option<String>,
    entry: Option<ViewEntry>,
}

impl SingleView {
    pub fn new(fetch: FetchId) -> Self {
        Self {
            fetch,
            ready: false,
            error: None,
            entry: None,
        }
    }

    pub fn entry(&self) -> Option<&ViewEntry> {
        self.entry.as_ref()
    }

    /// The current value, if any.
    pub fn value(&self) -> Option<&serde_json::Value> {
        self.entry.as_ref().and_then(|entry| entry.value.as_ref())
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
                FetchPacket::Batch { entries, .. } => self.resync(entries),
            },
            SyncEvent::SnapshotLoaded { fetch, entries } if *fetch == self.fetch => {
                self.resync(entries);
            }
            SyncEvent::RequestIssued(request) => {
                if let Some(entry) = self.entry_at_mut(&request.path) {
                    entry.mark_issued(request);
                }
            }
            SyncEvent::RequestSettled { id, path, outcome } => {
                if let Some(entry) = self.entry_at_mut(path) {
                    entry.mark_settled(*id, outcome);
                }
            }
            SyncEvent::PeerClosed { .. } => self.reset(),
            _ => {}
        }
    }

    fn reset(&mut self) {
        self.entry = None;
        self.ready = false;
        self.error = None;
    }

    fn entry_at_mut(&mut self, path: &str) -> Option<&mut ViewEntry> {
        self.entry.as_mut().filter(|entry| entry.path == path)
    }

    fn fold(&mut self, change: &EntryChange) {
        match change.event {
            ChangeKind::Add | ChangeKind::Change => {
                // Carry the mark across when the same path is being
                // replaced; a different path is a different entry.
                let request = self
                    .entry
                    .take()
                    .filter(|entry| entry.path == change.path)
                    .and_then(|entry| entry.request);
                let mut next = ViewEntry::from_change(change);
                next.request = request;
                self.entry = Some(next);
            }
            ChangeKind::Remove => self.entry = None,
        }
    }

    /// Keep at most the first match still present after a resync.
    fn resync(&mut self, entries: &[EntryChange]) {
        match entries
            .iter()
            .find(|change| change.event != ChangeKind::Remove)
        {
            Some(change) => self.fold(change),
            None => self.entry = None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::event::{PendingRequest, WritePayload};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn data(fetch: &FetchId, path: &str, kind: ChangeKind, value: Option<serde_json::Value>) -> SyncEvent {
        SyncEvent::FetchData {
            fetch: fetch.clone(),
            packet: FetchPacket::Entry(EntryChange {
                path: path.into(),
                value,
                event: kind,
                index: None,
            }),
        }
    }

    #[test]
    fn add_and_change_replace_the_sole_value() {
        let fetch = FetchId::new("mode");
        let mut view = SingleView::new(fetch.clone());

        view.apply(&data(&fetch, "mode", ChangeKind::Add, Some(json!("day"))));
        assert_eq!(view.value(), Some(&json!("day")));

        view.apply(&data(&fetch, "mode", ChangeKind::Change, Some(json!("night"))));
        assert_eq!(view.value(), Some(&json!("night")));

        view.apply(&data(&fetch, "mode", ChangeKind::Remove, None));
        assert!(view.entry().is_none());
    }

    #[test]
    fn resync_keeps_at_most_the_first_match() {
        let fetch = FetchId::new("mode");
        let mut view = SingleView::new(fetch.clone());

        view.apply(&SyncEvent::SnapshotLoaded {
            fetch: fetch.clone(),
            entries: vec![
                EntryChange {
                    path: "mode".into(),
                    value: Some(json!("a")),
                    event: ChangeKind::Add,
                    index: None,
                },
                EntryChange {
                    path: "mode2".into(),
                    value: Some(json!("b")),
                    event: ChangeKind::Add,
                    index: None,
                },
            ],
        });
        assert_eq!(view.entry().unwrap().path, "mode");

        view.apply(&SyncEvent::SnapshotLoaded {
            fetch: fetch.clone(),
            entries: vec![],
        });
        assert!(view.entry().is_none());
    }

    #[test]
    fn pending_mark_survives_same_path_replacement() {
        let fetch = FetchId::new("mode");
        let mut view = SingleView::new(fetch.clone());
        view.apply(&data(&fetch, "mode", ChangeKind::Add, Some(json!("day"))));

        let request = PendingRequest::new("mode", WritePayload::Value(json!("night")));
        view.apply(&SyncEvent::RequestIssued(request.clone()));
        view.apply(&data(&fetch, "mode", ChangeKind::Change, Some(json!("night"))));

        assert_eq!(view.entry().unwrap().request.as_ref().unwrap().id, request.id);
    }

    #[test]
    fn disconnect_resets_to_empty() {
        let fetch = FetchId::new("mode");
        let mut view = SingleView::new(fetch.clone());
        view.apply(&data(&fetch, "mode", ChangeKind::Add, Some(json!(1))));

        let identity = crate::identity::PeerIdentity::of(&statewire_api::ConnectOptions::new(
            url::Url::parse("ws://gone").unwrap(),
        ));
        view.apply(&SyncEvent::PeerClosed { identity });
        assert!(view.entry().is_none());
    }
}
