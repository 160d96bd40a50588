// ── View reconciliation ──
//
// Pure folds from [`SyncEvent`](crate::event::SyncEvent) streams into
// local read-models. Four shapes, one per subscription style; all of
// them swallow malformed or irrelevant events rather than failing,
// since a stale projection beats a crashed one.

pub mod entry;
pub mod keyed;
pub mod list;
pub mod single;
pub mod sorted;

pub use entry::{RequestMark, ViewEntry};
pub use keyed::KeyedView;
pub use list::FreeformView;
pub use single::SingleView;
pub use sorted::SortedView;
