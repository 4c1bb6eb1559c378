//! Journal of served requests and snapshot persistence

mod journal;
mod snapshot;

pub use journal::{Journal, ServeEvent, ServeOutcome};
pub use snapshot::{SnapshotSummary, SnapshotWriter};
