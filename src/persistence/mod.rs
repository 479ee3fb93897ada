//! Persistence layer for audit and recovery
//!
//! - Event journal: append-only record of committed mutations
//! - Snapshots: full ledger images for restart

pub mod journal;
pub mod snapshot;

pub use journal::{EventJournal, EventMetadata, StoredEvent};
pub use snapshot::{FileSnapshotStore, LedgerSnapshot, SnapshotStore, SNAPSHOT_VERSION};
